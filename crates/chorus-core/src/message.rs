//! Chat message types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A unique, strictly increasing message identifier.
pub type MessageId = u64;

/// Maximum author name length in bytes.
pub const MAX_AUTHOR_LENGTH: usize = 256;

/// Default maximum body length in bytes.
pub const DEFAULT_MAX_BODY_LENGTH: usize = 64 * 1024;

/// Submission validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// Author is empty or whitespace.
    #[error("author must not be empty")]
    EmptyAuthor,

    /// Body is empty or whitespace.
    #[error("body must not be empty")]
    EmptyBody,

    /// Author exceeds [`MAX_AUTHOR_LENGTH`].
    #[error("author is {0} bytes, maximum is {MAX_AUTHOR_LENGTH}")]
    AuthorTooLong(usize),

    /// Body exceeds the configured limit.
    #[error("body is {len} bytes, maximum is {max}")]
    BodyTooLong {
        /// Actual length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
}

/// A message as submitted, before it is sequenced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Message author.
    #[serde(alias = "username")]
    pub author: String,
    /// Message text.
    #[serde(alias = "content")]
    pub body: String,
}

impl NewMessage {
    /// Create a new submission.
    #[must_use]
    pub fn new(author: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            body: body.into(),
        }
    }

    /// Check the submission against the shape rules.
    ///
    /// # Errors
    ///
    /// Returns the first rule the submission breaks.
    pub fn validate(&self, max_body_length: usize) -> Result<(), MessageError> {
        if self.author.trim().is_empty() {
            return Err(MessageError::EmptyAuthor);
        }
        if self.author.len() > MAX_AUTHOR_LENGTH {
            return Err(MessageError::AuthorTooLong(self.author.len()));
        }
        if self.body.trim().is_empty() {
            return Err(MessageError::EmptyBody);
        }
        if self.body.len() > max_body_length {
            return Err(MessageError::BodyTooLong {
                len: self.body.len(),
                max: max_body_length,
            });
        }
        Ok(())
    }

    /// Attach the sequenced ID.
    #[must_use]
    pub fn into_message(self, id: MessageId) -> Message {
        Message {
            id,
            author: self.author,
            body: self.body,
        }
    }
}

/// A sequenced chat message. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// Message author.
    #[serde(alias = "username")]
    pub author: String,
    /// Message text.
    #[serde(alias = "content")]
    pub body: String,
}

impl Message {
    /// Create a message with a known ID.
    #[must_use]
    pub fn new(id: MessageId, author: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id,
            author: author.into(),
            body: body.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        let max = DEFAULT_MAX_BODY_LENGTH;
        assert!(NewMessage::new("alice", "hi").validate(max).is_ok());
        assert_eq!(
            NewMessage::new("  ", "hi").validate(max),
            Err(MessageError::EmptyAuthor)
        );
        assert_eq!(
            NewMessage::new("alice", "").validate(max),
            Err(MessageError::EmptyBody)
        );
        assert_eq!(
            NewMessage::new("a".repeat(MAX_AUTHOR_LENGTH + 1), "hi").validate(max),
            Err(MessageError::AuthorTooLong(MAX_AUTHOR_LENGTH + 1))
        );
        assert_eq!(
            NewMessage::new("alice", "hello").validate(4),
            Err(MessageError::BodyTooLong { len: 5, max: 4 })
        );
    }

    #[test]
    fn test_submission_ignores_id() {
        let new: NewMessage =
            serde_json::from_str(r#"{"id":77,"author":"bob","body":"yo"}"#).unwrap();
        assert_eq!(new.into_message(3), Message::new(3, "bob", "yo"));
    }

    #[test]
    fn test_legacy_field_names() {
        let msg: Message =
            serde_json::from_str(r#"{"id":1,"username":"alice","content":"hi"}"#).unwrap();
        assert_eq!(msg, Message::new(1, "alice", "hi"));

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, serde_json::json!({"id": 1, "author": "alice", "body": "hi"}));
    }
}
