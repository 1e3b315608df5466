//! IMAP polling feed — reports unread inbox items and extracts their bodies.
//!
//! The poller runs a blocking IMAP-over-TLS session under `spawn_blocking`
//! on a fixed interval: LOGIN, SELECT INBOX, SEARCH UNSEEN, then a header
//! FETCH per hit. All fetches use `BODY.PEEK` so the mailbox read state is
//! never touched; deciding what is genuinely new is the observer's job, and
//! re-reporting the same unseen message every poll is expected.
//!
//! Poll failures are logged and retried on the next tick. The feed never
//! takes the process down.

use std::io::Write as IoWrite;
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

use crate::config::MailboxConfig;
use crate::error::FeedError;
use crate::feed::{ExtractedMail, MailExtractor, MailItem, sender_permitted};

/// IMAP read timeout. Bounds how long a stalled server can hold a poll.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

// ── Item handle ─────────────────────────────────────────────────────

/// One inbox entry as reported by a poll cycle.
#[derive(Debug, Clone)]
pub struct ImapItem {
    /// Sequence number within the selected mailbox, used for later fetches.
    pub uid: String,
    /// Message-ID header; empty when the message carries none.
    pub message_id: String,
    pub unread: bool,
    pub sender: String,
    pub subject: String,
    pub received_at: Option<DateTime<Utc>>,
}

impl MailItem for ImapItem {
    fn identifier(&self) -> &str {
        &self.message_id
    }

    fn is_unread(&self) -> bool {
        self.unread
    }

    fn sender(&self) -> &str {
        &self.sender
    }

    fn subject(&self) -> &str {
        &self.subject
    }
}

// ── Polling feed ────────────────────────────────────────────────────

/// Spawns the background poll loop for a mailbox.
pub struct ImapFeed;

impl ImapFeed {
    /// Start polling. Returns the batch stream, the task handle, and a
    /// shutdown flag; set the flag to stop polling after the current tick.
    pub fn spawn(
        config: MailboxConfig,
    ) -> (
        UnboundedReceiverStream<Vec<ImapItem>>,
        JoinHandle<()>,
        Arc<AtomicBool>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);

        let handle = tokio::spawn(async move {
            info!(
                host = %config.imap_host,
                interval_secs = config.poll_interval_secs,
                "Mail feed started"
            );

            let mut tick =
                tokio::time::interval(Duration::from_secs(config.poll_interval_secs));

            loop {
                tick.tick().await;

                if shutdown.load(Ordering::Relaxed) {
                    info!("Mail feed shutting down");
                    return;
                }

                let cfg = config.clone();
                let fetched =
                    tokio::task::spawn_blocking(move || fetch_unread_summaries(&cfg)).await;

                let items = match fetched {
                    Ok(Ok(items)) => items,
                    Ok(Err(e)) => {
                        error!(error = %e, "Mail poll failed");
                        continue;
                    }
                    Err(e) => {
                        error!(error = %e, "Mail poll task panicked");
                        continue;
                    }
                };

                let batch: Vec<ImapItem> = items
                    .into_iter()
                    .filter(|item| {
                        if sender_permitted(&config.allowed_senders, &item.sender) {
                            true
                        } else {
                            warn!(sender = %item.sender, "Blocked mail from disallowed sender");
                            false
                        }
                    })
                    .collect();

                if batch.is_empty() {
                    continue;
                }

                debug!(count = batch.len(), "Reporting inbox batch");
                if tx.send(batch).is_err() {
                    info!("Feed consumer dropped; stopping poll loop");
                    return;
                }
            }
        });

        (UnboundedReceiverStream::new(rx), handle, shutdown_flag)
    }
}

// ── Extraction ──────────────────────────────────────────────────────

/// Fetches the full message body for an observed item.
pub struct ImapExtractor {
    config: MailboxConfig,
}

impl ImapExtractor {
    pub fn new(config: MailboxConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailExtractor<ImapItem> for ImapExtractor {
    async fn extract(&self, item: &ImapItem) -> Result<ExtractedMail, FeedError> {
        let cfg = self.config.clone();
        let uid = item.uid.clone();
        let id = item.message_id.clone();

        tokio::task::spawn_blocking(move || fetch_full_message(&cfg, &uid))
            .await
            .map_err(|e| FeedError::Extraction {
                id,
                reason: format!("extraction task failed: {e}"),
            })?
    }
}

// ── Blocking IMAP session ───────────────────────────────────────────

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// A logged-in IMAP session with INBOX selected.
struct ImapSession {
    tls: TlsStream,
    tag: u32,
}

impl ImapSession {
    fn connect(config: &MailboxConfig) -> Result<Self, FeedError> {
        let tcp = TcpStream::connect((&*config.imap_host, config.imap_port))
            .map_err(|e| FeedError::Connect { reason: e.to_string() })?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))
            .map_err(|e| FeedError::Connect { reason: e.to_string() })?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name: rustls::pki_types::ServerName<'_> =
            rustls::pki_types::ServerName::try_from(config.imap_host.clone())
                .map_err(|e| FeedError::Connect { reason: e.to_string() })?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| FeedError::Connect { reason: e.to_string() })?;

        let mut session = Self {
            tls: rustls::StreamOwned::new(conn, tcp),
            tag: 0,
        };

        // Server greeting precedes any command.
        session.read_line()?;

        let login = session.command(&format!(
            "LOGIN \"{}\" \"{}\"",
            config.username, config.password
        ))?;
        if !login.last().is_some_and(|l| l.contains("OK")) {
            return Err(FeedError::Connect {
                reason: "IMAP login rejected".into(),
            });
        }

        session.command("SELECT \"INBOX\"")?;
        Ok(session)
    }

    /// Send one command and collect response lines through the tagged
    /// completion line.
    fn command(&mut self, cmd: &str) -> Result<Vec<String>, FeedError> {
        self.tag += 1;
        let tag = format!("A{}", self.tag);
        let full = format!("{tag} {cmd}\r\n");
        IoWrite::write_all(&mut self.tls, full.as_bytes())
            .map_err(|e| FeedError::Protocol { reason: e.to_string() })?;
        IoWrite::flush(&mut self.tls)
            .map_err(|e| FeedError::Protocol { reason: e.to_string() })?;

        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let done = line.starts_with(&tag);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    fn read_line(&mut self) -> Result<String, FeedError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match std::io::Read::read(&mut self.tls, &mut byte) {
                Ok(0) => {
                    return Err(FeedError::Protocol {
                        reason: "connection closed mid-response".into(),
                    });
                }
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(FeedError::Protocol { reason: e.to_string() }),
            }
        }
    }

    fn logout(mut self) {
        let _ = self.command("LOGOUT");
    }
}

/// One poll cycle: search unseen and fetch a header summary per hit.
fn fetch_unread_summaries(config: &MailboxConfig) -> Result<Vec<ImapItem>, FeedError> {
    let mut session = ImapSession::connect(config)?;

    let search = session.command("SEARCH UNSEEN")?;
    let uids = parse_search_uids(&search);

    let mut items = Vec::with_capacity(uids.len());
    for uid in uids {
        let resp = session.command(&format!("FETCH {uid} (FLAGS BODY.PEEK[HEADER])"))?;
        let unread = !response_has_seen_flag(&resp);
        let raw = response_payload(&resp);

        if let Some(parsed) = MessageParser::default().parse(raw.as_bytes()) {
            let received_at = parsed.date().and_then(mail_date_to_utc);
            items.push(ImapItem {
                uid: uid.clone(),
                message_id: parsed.message_id().unwrap_or_default().to_string(),
                unread,
                sender: extract_sender(&parsed),
                subject: parsed.subject().unwrap_or("(no subject)").to_string(),
                received_at,
            });
        } else {
            warn!(uid = %uid, "Unparseable message headers; skipping");
        }
    }

    session.logout();
    Ok(items)
}

/// Fetch and parse the full RFC822 body of one message.
fn fetch_full_message(config: &MailboxConfig, uid: &str) -> Result<ExtractedMail, FeedError> {
    let mut session = ImapSession::connect(config)?;
    let resp = session.command(&format!("FETCH {uid} (BODY.PEEK[])"))?;
    session.logout();

    let raw = response_payload(&resp);
    let parsed = MessageParser::default()
        .parse(raw.as_bytes())
        .ok_or_else(|| FeedError::Extraction {
            id: uid.to_string(),
            reason: "unparseable message".into(),
        })?;

    Ok(ExtractedMail {
        sender: extract_sender(&parsed),
        subject: parsed.subject().unwrap_or("(no subject)").to_string(),
        body: extract_text(&parsed),
    })
}

// ── Response parsing helpers ────────────────────────────────────────

/// Pull sequence numbers out of `* SEARCH n n n` lines.
fn parse_search_uids(lines: &[String]) -> Vec<String> {
    let mut uids = Vec::new();
    for line in lines {
        if line.starts_with("* SEARCH") {
            uids.extend(
                line.split_whitespace()
                    .skip(2)
                    .map(str::to_owned),
            );
        }
    }
    uids
}

/// Whether a FETCH response reports the `\Seen` flag.
fn response_has_seen_flag(lines: &[String]) -> bool {
    lines
        .iter()
        .any(|l| l.contains("FLAGS") && l.contains("\\Seen"))
}

/// The message payload of a FETCH response: everything between the untagged
/// opening line and the closing/tagged lines.
fn response_payload(lines: &[String]) -> String {
    lines
        .iter()
        .skip(1)
        .take(lines.len().saturating_sub(2))
        .cloned()
        .collect()
}

/// Extract the sender address from a parsed message.
fn extract_sender(parsed: &mail_parser::Message) -> String {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into())
}

/// Extract readable text from a parsed message, preferring plain text.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.to_string();
        }
    }
    String::new()
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Convert a parsed mail date to UTC.
fn mail_date_to_utc(d: &mail_parser::DateTime) -> Option<DateTime<Utc>> {
    let naive = chrono::NaiveDate::from_ymd_opt(
        i32::from(d.year),
        u32::from(d.month),
        u32::from(d.day),
    )?
    .and_hms_opt(
        u32::from(d.hour),
        u32::from(d.minute),
        u32::from(d.second),
    )?;
    Some(naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_uids_parsed_from_untagged_line() {
        let lines = vec![
            "* SEARCH 3 7 12\r\n".to_string(),
            "A2 OK SEARCH completed\r\n".to_string(),
        ];
        assert_eq!(parse_search_uids(&lines), vec!["3", "7", "12"]);
    }

    #[test]
    fn search_with_no_hits_yields_nothing() {
        let lines = vec![
            "* SEARCH\r\n".to_string(),
            "A2 OK SEARCH completed\r\n".to_string(),
        ];
        assert!(parse_search_uids(&lines).is_empty());
    }

    #[test]
    fn seen_flag_detected_in_fetch_response() {
        let seen = vec![
            r"* 3 FETCH (FLAGS (\Seen) BODY[HEADER] {10}".to_string(),
            "A3 OK FETCH completed\r\n".to_string(),
        ];
        assert!(response_has_seen_flag(&seen));

        let unseen = vec![
            r"* 3 FETCH (FLAGS () BODY[HEADER] {10}".to_string(),
            "A3 OK FETCH completed\r\n".to_string(),
        ];
        assert!(!response_has_seen_flag(&unseen));
    }

    #[test]
    fn payload_drops_envelope_lines() {
        let lines = vec![
            "* 3 FETCH (BODY[] {20}\r\n".to_string(),
            "Subject: hi\r\n".to_string(),
            "\r\n".to_string(),
            "body text\r\n".to_string(),
            "A3 OK FETCH completed\r\n".to_string(),
        ];
        let payload = response_payload(&lines);
        assert!(payload.contains("Subject: hi"));
        assert!(payload.contains("body text"));
        assert!(!payload.contains("OK FETCH"));
    }

    #[test]
    fn strip_html_basic() {
        assert_eq!(strip_html("<p>Hello</p>"), "Hello");
        assert_eq!(
            strip_html("<div><b>Bold</b> and <i>italic</i></div>"),
            "Bold and italic"
        );
    }

    #[test]
    fn strip_html_normalizes_whitespace() {
        assert_eq!(strip_html("<p>  Hello   World  </p>"), "Hello World");
    }

    #[test]
    fn strip_html_plain_text_passthrough() {
        assert_eq!(strip_html("No HTML here"), "No HTML here");
        assert_eq!(strip_html(""), "");
    }

    #[test]
    fn item_exposes_message_id_as_identifier() {
        let item = ImapItem {
            uid: "3".into(),
            message_id: "<abc@example.com>".into(),
            unread: true,
            sender: "alice@example.com".into(),
            subject: "Hi".into(),
            received_at: None,
        };
        assert_eq!(item.identifier(), "<abc@example.com>");
        assert!(item.is_unread());
    }
}
