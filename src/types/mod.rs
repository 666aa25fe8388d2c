pub mod constants;
pub mod error;
pub mod message;
pub mod room;

pub use constants::*;
pub use error::{Result, SyncError, ValidationError};
pub use message::{Envelope, generate_message_id};
pub use room::{InitialData, LabelMap, Room, RoomUpdate};
