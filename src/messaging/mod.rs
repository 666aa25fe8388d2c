// Messaging module - Message kinds, frame validation and inbound routing
pub mod event;
pub mod router;
pub mod validator;

pub use event::MessageKind;
pub use router::{MessageRouter, normalize_updates};
pub use validator::Validator;
