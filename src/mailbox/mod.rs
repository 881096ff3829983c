//! Mailbox provider — lists unseen messages and acknowledges them.
//!
//! The same message may be listed as unseen in more than one poll cycle;
//! callers deduplicate on [`RawMessage::message_id`].

pub mod imap;
pub mod parse;

use async_trait::async_trait;

use crate::error::MailboxError;

pub use imap::{ImapConfig, ImapMailbox};
pub use parse::{ParsedMessage, parse_message};

/// An unseen message as delivered by the mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Mailbox-assigned identifier, unique within the mailbox.
    pub message_id: String,
    /// Full RFC 5322 message.
    pub raw: Vec<u8>,
}

#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Unseen messages, in mailbox order. Listing never marks them seen.
    async fn list_unseen(&self) -> Result<Vec<RawMessage>, MailboxError>;

    /// Flag a message as seen so it stops being listed.
    async fn mark_seen(&self, message_id: &str) -> Result<(), MailboxError>;
}
