pub mod chat;
pub mod message;
pub mod user;

pub use chat::ChatRecord;
pub use message::{MessageRecord, Role};
pub use user::UserRecord;
