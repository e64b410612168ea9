pub mod error;
pub mod push;
pub mod service;

pub use error::ChatError;
pub use push::EventSink;
pub use service::{ChatService, LoadedMessages};
