use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub title: String,
    pub description: Option<String>,

    /// Raw location column. Older clients wrote a bare string, newer ones a
    /// JSON object; use [`Event::location`] for the normalized form.
    pub location: Option<String>,

    pub starts_at: Option<NaiveDateTime>,
    pub created_by: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Event {
    pub fn location(&self) -> Option<Location> {
        self.location.as_deref().map(Location::parse)
    }
}

/// Normalized event location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl Location {
    /// Parse the raw stored value. A JSON object yields the structured
    /// fields; anything else (bare string, malformed JSON, JSON scalar)
    /// degrades to a name-only location.
    pub fn parse(raw: &str) -> Location {
        let trimmed = raw.trim();
        if trimmed.starts_with('{') {
            if let Ok(loc) = serde_json::from_str::<Location>(trimmed) {
                return loc;
            }
        }
        Location {
            name: raw.to_string(),
            address: None,
            latitude: None,
            longitude: None,
        }
    }
}
