//! Dispatch policy and notification rendering.
//!
//! `decide` is the whole policy: a match renders as a catalog hit, anything
//! else renders as the default preview. The `Dispatcher` pushes the rendered
//! notification through the configured surfaces and, when a reply pipeline
//! is attached, follows a catalog hit with a drafted reply.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::feed::ExtractedMail;
use crate::matcher::{KeywordMatch, MatchOutcome};
use crate::notify::{Notifier, ReplySender};
use crate::reply::ReplyDrafter;

/// Surfaces truncate the context line hard.
const CONTEXT_MAX_CHARS: usize = 50;

/// Body preview length for default notifications.
const PREVIEW_MAX_CHARS: usize = 100;

// ── Decision table ──────────────────────────────────────────────────

/// What a match outcome requires downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchAction {
    /// Render the catalog hit (key, price, confidence).
    CatalogMatch,
    /// Render the plain sender/subject/preview notification.
    DefaultPreview,
}

/// Pure decision table from match outcome to action.
pub fn decide(outcome: &MatchOutcome) -> DispatchAction {
    match outcome {
        MatchOutcome::Match(_) => DispatchAction::CatalogMatch,
        MatchOutcome::NoMatch => DispatchAction::DefaultPreview,
    }
}

// ── Notification ────────────────────────────────────────────────────

/// A rendered notification ready for a surface.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    pub context: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    fn new(title: &str, message: &str, context: &str) -> Self {
        Self {
            id: format!("mail-{}", Uuid::new_v4()),
            title: if title.is_empty() {
                "New mail".to_string()
            } else {
                title.to_string()
            },
            message: if message.is_empty() {
                "No content".to_string()
            } else {
                message.to_string()
            },
            context: truncate_chars(context, CONTEXT_MAX_CHARS),
            created_at: Utc::now(),
        }
    }

    /// Rendering for a catalog hit.
    pub fn catalog_match(
        sender: &str,
        hit: &KeywordMatch,
        price: Option<&Decimal>,
    ) -> Self {
        let price_text = price
            .map(|p| format!("${p}"))
            .unwrap_or_else(|| "price unavailable".to_string());
        let detail = format!(
            "Matched \"{}\" ({}), confidence {:.0}%",
            hit.original_key,
            price_text,
            f64::from(hit.confidence) * 100.0,
        );
        Self::new(sender, "Product detected", &detail)
    }

    /// Rendering for the no-match / no-content fallback.
    pub fn default_preview(sender: &str, subject: &str, preview: &str) -> Self {
        Self::new(sender, subject, preview)
    }
}

/// Truncate to at most `max` characters, appending an ellipsis when cut.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{cut}...")
}

// ── Dispatcher ──────────────────────────────────────────────────────

/// Drafts a reply on catalog hits and sends it back to the sender.
pub struct ReplyPipeline {
    pub drafter: Arc<dyn ReplyDrafter>,
    pub outbox: Arc<dyn ReplySender>,
}

/// Routes match events to notification surfaces and the reply pipeline.
pub struct Dispatcher {
    notifiers: Vec<Arc<dyn Notifier>>,
    reply: Option<ReplyPipeline>,
}

impl Dispatcher {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self {
            notifiers,
            reply: None,
        }
    }

    pub fn with_reply(mut self, pipeline: ReplyPipeline) -> Self {
        self.reply = Some(pipeline);
        self
    }

    /// Render and deliver the outcome for one item.
    ///
    /// Surface and reply failures are logged, never propagated: dispatch
    /// sits inside the observer's per-item boundary.
    pub async fn dispatch(
        &self,
        sender: &str,
        subject: &str,
        extracted: Option<&ExtractedMail>,
        outcome: &MatchOutcome,
        catalog: &Catalog,
    ) {
        let preview = extracted
            .map(|mail| truncate_chars(&mail.body, PREVIEW_MAX_CHARS))
            .unwrap_or_else(|| "(no content)".to_string());

        let notification = match outcome {
            MatchOutcome::Match(hit) => {
                Notification::catalog_match(sender, hit, catalog.price_of(&hit.original_key))
            }
            MatchOutcome::NoMatch => Notification::default_preview(sender, subject, &preview),
        };

        debug!(
            id = %notification.id,
            action = ?decide(outcome),
            "Dispatching notification"
        );

        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(&notification).await {
                warn!(error = %e, "Notification surface failed");
            }
        }

        if let (Some(pipeline), MatchOutcome::Match(hit), Some(mail)) =
            (&self.reply, outcome, extracted)
        {
            let price = catalog.price_of(&hit.original_key);
            match pipeline.drafter.draft(mail, hit, price).await {
                Ok(draft) => {
                    let subject = reply_subject(&mail.subject);
                    if let Err(e) = pipeline
                        .outbox
                        .send_reply(&mail.sender, &subject, &draft)
                        .await
                    {
                        warn!(to = %mail.sender, error = %e, "Reply send failed");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Reply draft failed; notification only");
                }
            }
        }
    }
}

/// Subject line for a reply, avoiding stacked "Re:" prefixes.
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed.to_lowercase().starts_with("re:") {
        trimmed.to_string()
    } else if trimmed.is_empty() {
        "Re: your message".to_string()
    } else {
        format!("Re: {trimmed}")
    }
}
