use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Suffix Service Bus uses to address the dead-letter sub-queue of a queue.
pub const DEAD_LETTER_SUFFIX: &str = "$deadletterqueue";

/// A message payload with the transport metadata the policies care about.
///
/// The body is kept as raw bytes. Requeue forwards it untouched; pull and
/// tidy read it as (lossy) UTF-8 text.
///
/// # Examples
///
/// ```no_run
/// use server::model::Message;
///
/// let message = Message::from_text("{\"id\":1}");
/// assert_eq!(message.body_text(), "{\"id\":1}");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// Transport message id, when one was set by the sender
    pub id: Option<String>,
    /// Sequence number assigned by the broker
    pub sequence: i64,
    /// Number of times the broker delivered this message
    pub delivery_count: u32,
    /// Raw payload
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(id: Option<String>, sequence: i64, delivery_count: u32, body: Vec<u8>) -> Self {
        Self {
            id,
            sequence,
            delivery_count,
            body,
        }
    }

    pub fn from_text(text: &str) -> Self {
        Self {
            body: text.as_bytes().to_vec(),
            ..Self::default()
        }
    }

    /// Payload as text. Invalid UTF-8 sequences are replaced.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Identifier used in log lines.
    pub fn display_id(&self) -> Cow<'_, str> {
        match &self.id {
            Some(id) => Cow::Borrowed(id.as_str()),
            None => Cow::Owned(format!("seq:{}", self.sequence)),
        }
    }
}

/// Which sub-queue of a queue an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    /// Active messages
    Main,
    /// Messages that failed normal processing
    DeadLetter,
}

impl QueueType {
    pub fn from_dead_letter_flag(dead_letter: bool) -> Self {
        if dead_letter {
            QueueType::DeadLetter
        } else {
            QueueType::Main
        }
    }

    pub fn is_dead_letter(self) -> bool {
        self == QueueType::DeadLetter
    }

    /// The sibling sub-queue of the same queue.
    pub fn opposite(self) -> Self {
        match self {
            QueueType::Main => QueueType::DeadLetter,
            QueueType::DeadLetter => QueueType::Main,
        }
    }
}

/// A queue name plus the sub-queue it targets.
///
/// # Examples
///
/// ```no_run
/// use server::model::{QueueInfo, QueueType};
///
/// let dlq = QueueInfo::new("orders", QueueType::DeadLetter).unwrap();
/// assert_eq!(dlq.entity_path(), "orders/$deadletterqueue");
/// assert_eq!(dlq.to_opposite().entity_path(), "orders");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueInfo {
    /// Base queue name, never carrying the dead-letter suffix
    pub name: String,
    pub queue_type: QueueType,
}

impl QueueInfo {
    /// Builds a queue reference from a base name.
    ///
    /// A name that already carries the `/$deadletterqueue` suffix is split so
    /// the sub-queue is tracked by `queue_type` only.
    pub fn new(name: &str, queue_type: QueueType) -> Result<Self, QueueNameError> {
        let trimmed = name.trim();
        let suffix = format!("/{DEAD_LETTER_SUFFIX}");
        let (base, queue_type) = match trimmed.strip_suffix(&suffix) {
            Some(base) => (base, QueueType::DeadLetter),
            None => (trimmed, queue_type),
        };

        if base.is_empty() {
            return Err(QueueNameError::Empty);
        }
        if base.contains(char::is_whitespace) {
            return Err(QueueNameError::Whitespace(base.to_string()));
        }

        Ok(Self {
            name: base.to_string(),
            queue_type,
        })
    }

    /// Path used to address the entity on the transport.
    pub fn entity_path(&self) -> String {
        match self.queue_type {
            QueueType::Main => self.name.clone(),
            QueueType::DeadLetter => format!("{}/{DEAD_LETTER_SUFFIX}", self.name),
        }
    }

    pub fn to_opposite(&self) -> Self {
        Self {
            name: self.name.clone(),
            queue_type: self.queue_type.opposite(),
        }
    }
}

impl fmt::Display for QueueInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entity_path())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueNameError {
    #[error("queue name must not be empty")]
    Empty,
    #[error("queue name must not contain whitespace: '{0}'")]
    Whitespace(String),
}
