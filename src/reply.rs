//! Reply drafting — asks a generative backend for a response to a catalog hit.
//!
//! The drafter is a collaborator, not part of the matching core: a draft
//! failure downgrades dispatch to notification-only and never blocks the
//! observer loop.

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::DraftError;
use crate::feed::ExtractedMail;
use crate::matcher::KeywordMatch;

/// Request timeout for draft calls.
const DRAFT_TIMEOUT_SECS: u64 = 30;

/// Default endpoint of the Generative Language REST API.
const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Drafts a reply for a mail that hit the catalog.
#[async_trait]
pub trait ReplyDrafter: Send + Sync {
    async fn draft(
        &self,
        mail: &ExtractedMail,
        hit: &KeywordMatch,
        price: Option<&Decimal>,
    ) -> Result<String, DraftError>;
}

/// Drafter backed by the Gemini `generateContent` REST endpoint.
pub struct GeminiDrafter {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    endpoint: String,
}

impl GeminiDrafter {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Result<Self, DraftError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(DRAFT_TIMEOUT_SECS))
            .build()
            .map_err(|e| DraftError::Request {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            api_key,
            model: model.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        })
    }

    /// Point the drafter at a different API base (tests, proxies).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl ReplyDrafter for GeminiDrafter {
    async fn draft(
        &self,
        mail: &ExtractedMail,
        hit: &KeywordMatch,
        price: Option<&Decimal>,
    ) -> Result<String, DraftError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.endpoint,
            self.model,
            self.api_key.expose_secret(),
        );

        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": build_draft_prompt(mail, hit, price) }] }],
            "generationConfig": {
                "temperature": 0.9,
                "topP": 1,
                "topK": 1,
                "maxOutputTokens": 4096,
            },
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DraftError::Request {
                reason: e.to_string(),
            })?;

        let raw = response.text().await.map_err(|e| DraftError::Request {
            reason: e.to_string(),
        })?;

        parse_generate_response(&raw)
    }
}

/// Prompt handed to the backend for one catalog hit.
fn build_draft_prompt(
    mail: &ExtractedMail,
    hit: &KeywordMatch,
    price: Option<&Decimal>,
) -> String {
    let mut prompt = String::with_capacity(512);
    prompt.push_str(
        "You answer customer emails for a small shop. Draft a short, polite \
         reply in the language of the original mail. Mention the product and \
         its price, and invite the customer to confirm. Reply with the mail \
         body only.\n\n",
    );
    prompt.push_str(&format!("Product: {}\n", hit.original_key));
    match price {
        Some(p) => prompt.push_str(&format!("Price: ${p}\n")),
        None => prompt.push_str("Price: not listed\n"),
    }
    prompt.push_str(&format!("From: {}\n", mail.sender));
    prompt.push_str(&format!("Subject: {}\n", mail.subject));

    // Bound the quoted body for token economy.
    let body_preview: String = mail.body.chars().take(1000).collect();
    prompt.push_str(&format!("\nOriginal mail:\n{body_preview}"));
    prompt
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Pull the first candidate's text out of a `generateContent` response.
fn parse_generate_response(raw: &str) -> Result<String, DraftError> {
    let parsed: GenerateResponse = serde_json::from_str(raw)?;

    if let Some(error) = parsed.error {
        return Err(DraftError::Request {
            reason: error.message,
        });
    }

    let text = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content.parts.into_iter().next())
        .map(|p| p.text)
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(DraftError::InvalidResponse {
            reason: "no candidate text in response".into(),
        });
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn mail() -> ExtractedMail {
        ExtractedMail {
            sender: "alice@example.com".into(),
            subject: "Consulta por tacho".into(),
            body: "Hola, quería saber el precio del tacho grande.".into(),
        }
    }

    fn hit() -> KeywordMatch {
        KeywordMatch {
            keyword: "tacho 20l".into(),
            original_key: "Tacho 20L".into(),
            matched_token: "tacho".into(),
            confidence: 1.0,
        }
    }

    #[test]
    fn prompt_names_product_price_and_body() {
        let price = dec!(50);
        let prompt = build_draft_prompt(&mail(), &hit(), Some(&price));
        assert!(prompt.contains("Tacho 20L"));
        assert!(prompt.contains("$50"));
        assert!(prompt.contains("precio del tacho"));
    }

    #[test]
    fn prompt_without_price() {
        let prompt = build_draft_prompt(&mail(), &hit(), None);
        assert!(prompt.contains("Price: not listed"));
    }

    #[test]
    fn prompt_bounds_long_bodies() {
        let mut long_mail = mail();
        long_mail.body = "x".repeat(5000);
        let prompt = build_draft_prompt(&long_mail, &hit(), None);
        assert!(prompt.len() < 2000);
    }

    #[test]
    fn parse_extracts_first_candidate_text() {
        let raw = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "Hola! El Tacho 20L sale $50."}]}}
            ]
        }"#;
        assert_eq!(
            parse_generate_response(raw).unwrap(),
            "Hola! El Tacho 20L sale $50."
        );
    }

    #[test]
    fn parse_surfaces_api_errors() {
        let raw = r#"{"error": {"message": "API key not valid"}}"#;
        let err = parse_generate_response(raw).unwrap_err();
        assert!(matches!(err, DraftError::Request { .. }));
        assert!(err.to_string().contains("API key not valid"));
    }

    #[test]
    fn parse_rejects_empty_candidates() {
        let raw = r#"{"candidates": []}"#;
        assert!(matches!(
            parse_generate_response(raw).unwrap_err(),
            DraftError::InvalidResponse { .. }
        ));
    }

    #[test]
    fn parse_rejects_malformed_json() {
        assert!(matches!(
            parse_generate_response("not json").unwrap_err(),
            DraftError::Json(_)
        ));
    }
}
