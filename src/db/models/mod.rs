//! Database models split into separate files.
//! This module re-exports individual model modules so imports like
//! `use crate::db::models::*;` keep working.

pub mod chat;
pub mod event;
pub mod notification;
pub mod push_token;
pub mod user;
pub mod user_notification;

pub use self::chat::*;
pub use self::event::*;
pub use self::notification::*;
pub use self::push_token::*;
pub use self::user::*;
pub use self::user_notification::*;
