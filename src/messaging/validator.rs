use super::MessageKind;
use crate::types::{Envelope, ValidationError};
use serde_json::Value;

/// Checks raw frames against the envelope contract before anything else sees them.
#[derive(Debug, Clone, Copy)]
pub struct Validator {
    max_frame_size: usize,
}

impl Validator {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Returns `true` when `raw` would be accepted by [`Validator::validate`].
    pub fn is_valid(&self, raw: &str) -> bool {
        self.validate(raw).is_ok()
    }

    /// Parses and validates one inbound frame.
    ///
    /// A frame is accepted iff it is at most `max_frame_size` bytes, its `type` is a recognized
    /// kind, `timestamp` is a number and `messageId` is a string.
    pub fn validate(&self, raw: &str) -> Result<Envelope, ValidationError> {
        if raw.len() > self.max_frame_size {
            return Err(ValidationError::TooLarge {
                size: raw.len(),
                max: self.max_frame_size,
            });
        }

        let mut value: Value =
            serde_json::from_str(raw).map_err(|e| ValidationError::Malformed(e.to_string()))?;

        let kind = match value.get("type") {
            Some(Value::String(s)) => {
                MessageKind::parse(s).ok_or_else(|| ValidationError::UnknownType(s.clone()))?
            }
            _ => return Err(ValidationError::MissingType),
        };

        let timestamp = value
            .get("timestamp")
            .and_then(|t| t.as_i64().or_else(|| t.as_f64().map(|f| f as i64)))
            .ok_or(ValidationError::MissingTimestamp)?;

        let message_id = match value.get("messageId") {
            Some(Value::String(id)) => id.clone(),
            _ => return Err(ValidationError::MissingMessageId),
        };

        let payload = value
            .get_mut("payload")
            .map(Value::take)
            .unwrap_or(Value::Null);

        Ok(Envelope {
            kind,
            payload,
            timestamp,
            message_id,
        })
    }
}
