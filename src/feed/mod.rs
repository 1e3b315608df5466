//! Mail feed abstraction — where observed items come from.
//!
//! A feed adapter reports batches of item handles; the observer decides what
//! is new and worth extracting. Any source that can say "here is an item,
//! this is its identity, it is (un)read" fits behind these traits, whether
//! it polls a mailbox protocol or scrapes a webmail view.

pub mod imap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FeedError;

pub use imap::{ImapExtractor, ImapFeed, ImapItem};

/// Opaque handle to one observed mailbox entry.
///
/// The identifier must be stable across repeated observations of the same
/// underlying message; an empty identifier marks an item the source could
/// not identify (the observer skips those without remembering them).
pub trait MailItem: Send + Sync {
    fn identifier(&self) -> &str;
    fn is_unread(&self) -> bool;
    /// Sender as reported by the feed, for fallback rendering.
    fn sender(&self) -> &str;
    /// Subject as reported by the feed, for fallback rendering.
    fn subject(&self) -> &str;
}

/// Full text pulled out of one mail item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedMail {
    pub sender: String,
    pub subject: String,
    pub body: String,
}

/// Pulls the full content of an item out of the mail source.
///
/// Extraction is the slow, fallible half of the feed: it may take seconds
/// and may fail outright. Failures are reported, never retried for the same
/// item.
#[async_trait]
pub trait MailExtractor<I: MailItem>: Send + Sync {
    async fn extract(&self, item: &I) -> Result<ExtractedMail, FeedError>;
}

/// Check whether a sender address passes the configured allowlist.
///
/// - Empty list allows everyone (no filtering configured)
/// - `*` allows everyone
/// - `@domain.com` or `domain.com` allow the whole domain
/// - `user@domain.com` allows that exact address
pub fn sender_permitted(allowed: &[String], email: &str) -> bool {
    if allowed.is_empty() || allowed.iter().any(|a| a == "*") {
        return true;
    }
    let email_lower = email.to_lowercase();
    allowed.iter().any(|a| {
        if a.starts_with('@') {
            email_lower.ends_with(&a.to_lowercase())
        } else if a.contains('@') {
            a.eq_ignore_ascii_case(email)
        } else {
            email_lower.ends_with(&format!("@{}", a.to_lowercase()))
        }
    })
}
