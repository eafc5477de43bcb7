pub mod events;
pub mod notifications;
pub mod push_tokens;
pub mod threads;
pub mod users;

pub use events::EventRepository;
pub use notifications::NotificationRepository;
pub use push_tokens::PushTokenRepository;
pub use threads::ChatRepository;
pub use users::UserRepository;
