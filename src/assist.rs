//! # Feature: AI Assist
//!
//! Two prompt-completion calls used by the storefront: Maya's chat replies
//! and complementary-item suggestions for the purchase modal. Both are single
//! attempts that fall back to static answers on any failure.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//! - **Toggleable**: true (no API key = fallbacks only)
//!
//! ## Changelog
//! - 1.1.0: Conversation history passed along with the latest query
//! - 1.0.0: Initial chat reply and suggestion prompts

use crate::catalog::{default_suggestions, extras_for, Extra, Product};
use crate::event_log::EventLog;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const SOURCE: &str = "AiAssist";

/// Reply used whenever the chat model cannot be reached
pub const CHAT_FALLBACK: &str =
    "Lo siento, estoy teniendo problemas para conectarme. Por favor, intenta de nuevo más tarde.";

/// First message shown by the chat widget
pub const WELCOME_MESSAGE: &str =
    "¡Hola! Soy Maya de Trama Hogar. ¿En qué puedo ayudarte con tu presupuesto hoy? 👋";

/// Suggestions kept per product
pub const MAX_SUGGESTIONS: usize = 3;

const CHAT_SYSTEM_PROMPT: &str = "You are Maya, a helpful AI assistant for Trama Hogar, an online store selling artisanal textile products for the home.

You should answer questions about product details, customization options, and help customers find what they are looking for.

Be informative and friendly.

Reply with a JSON object of the form {\"response\": \"...\"}.";

const SUGGEST_SYSTEM_PROMPT: &str = "You are an AI assistant specializing in suggesting complementary items for products on the Trama Hogar website.

Given the name of a product, suggest three complementary items that would enhance the user's experience with the product.

Reply with a JSON object of the form {\"items\": [{\"name\": \"...\", \"description\": \"...\"}]}.";

/// Something that turns a system prompt and a user prompt into text
#[async_trait]
pub trait PromptModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

// ============================================================================
// OpenAI-compatible chat completions
// ============================================================================

pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout: Duration) -> Self {
        OpenAiChat {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl PromptModel for OpenAiChat {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": user },
                ],
                "response_format": { "type": "json_object" },
            }))
            .send()
            .await
            .context("Failed to connect to OpenAI API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API error ({}): {}", status, body);
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse OpenAI API response")?;

        let content = body
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("OpenAI API response missing message content"))?;

        Ok(content.to_string())
    }
}

// ============================================================================
// Prompt flows
// ============================================================================

/// Who said a line of chat history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    /// Written by the customer
    Sent,
    /// Shown to the customer (Maya or WhatsApp)
    Received,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    pub role: HistoryRole,
    pub text: String,
}

/// `User: …` / `Maya: …` transcript
pub fn format_history(history: &[HistoryEntry]) -> String {
    history
        .iter()
        .map(|entry| match entry.role {
            HistoryRole::Sent => format!("User: {}", entry.text),
            HistoryRole::Received => format!("Maya: {}", entry.text),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// A complementary item proposed by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SuggestionReply {
    List(Vec<Suggestion>),
    Wrapped {
        #[serde(alias = "suggestions")]
        items: Vec<Suggestion>,
    },
}

fn parse_chat_reply(content: &str) -> Result<String> {
    #[derive(Deserialize)]
    struct ChatReply {
        response: String,
    }

    let trimmed = content.trim();
    if trimmed.is_empty() {
        anyhow::bail!("Model returned an empty reply");
    }
    match serde_json::from_str::<ChatReply>(trimmed) {
        Ok(reply) => Ok(reply.response),
        // plain text is accepted as the reply itself
        Err(_) => Ok(trimmed.to_string()),
    }
}

fn parse_suggestions(content: &str) -> Result<Vec<Suggestion>> {
    let reply: SuggestionReply =
        serde_json::from_str(content.trim()).context("Suggestion reply is not the expected JSON")?;
    Ok(match reply {
        SuggestionReply::List(items) => items,
        SuggestionReply::Wrapped { items } => items,
    })
}

/// Match model suggestions against what the product can be sold with
///
/// Each suggestion picks the first extra whose name contains it
/// (case-insensitive). Duplicates keep their first position and the latest
/// description. At most [`MAX_SUGGESTIONS`] are returned.
pub fn match_suggestions(suggestions: &[Suggestion], available: &[Extra]) -> Vec<Extra> {
    let mut order: Vec<String> = Vec::new();
    let mut matched: HashMap<String, Extra> = HashMap::new();

    for suggestion in suggestions {
        let needle = suggestion.name.trim().to_lowercase();
        if needle.is_empty() {
            continue;
        }
        let Some(found) = available.iter().find(|e| e.name.to_lowercase().contains(&needle)) else {
            continue;
        };

        let mut extra = found.clone();
        extra.description = Some(suggestion.description.clone());
        extra.suggested = true;

        if !matched.contains_key(&extra.id) {
            order.push(extra.id.clone());
        }
        matched.insert(extra.id.clone(), extra);
    }

    order
        .into_iter()
        .filter_map(|id| matched.remove(&id))
        .take(MAX_SUGGESTIONS)
        .collect()
}

#[derive(Clone)]
pub struct AiAssist {
    model: Option<Arc<dyn PromptModel>>,
    events: Arc<EventLog>,
}

impl AiAssist {
    pub fn new(model: Option<Arc<dyn PromptModel>>, events: Arc<EventLog>) -> Self {
        AiAssist { model, events }
    }

    fn model(&self) -> Result<&Arc<dyn PromptModel>> {
        self.model
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No AI model configured"))
    }

    /// Maya's answer to the latest query, given the conversation so far
    pub async fn chat_reply(&self, query: &str, history: &[HistoryEntry]) -> String {
        let full_query = format!(
            "Full conversation history for context:\n{}\n\nLatest user query: {}",
            format_history(history),
            query
        );
        self.events.info(
            SOURCE,
            "Getting AI chat response.",
            Some(json!({ "query": full_query })),
        );

        let result = async {
            let model = self.model()?;
            let content = model
                .complete(CHAT_SYSTEM_PROMPT, &format!("Customer Query: {full_query}\n\nResponse:"))
                .await?;
            parse_chat_reply(&content)
        }
        .await;

        match result {
            Ok(reply) => {
                self.events.success(SOURCE, "Received AI chat response.", Some(json!({ "response": reply })));
                reply
            }
            Err(e) => {
                self.events.error(
                    SOURCE,
                    "Error getting AI chat response.",
                    Some(json!({ "error": e.to_string() })),
                );
                CHAT_FALLBACK.to_string()
            }
        }
    }

    /// Up to three extras that go well with `product`
    pub async fn suggest_extras(&self, product: &Product) -> Vec<Extra> {
        self.events.info(
            SOURCE,
            "Fetching AI suggestions for product.",
            Some(json!({ "productName": product.name })),
        );

        let result = async {
            let model = self.model()?;
            let content = model
                .complete(
                    SUGGEST_SYSTEM_PROMPT,
                    &format!("Product Name: {}\n\nComplementary Items:", product.name),
                )
                .await?;
            parse_suggestions(&content)
        }
        .await;

        match result {
            Ok(suggestions) => {
                self.events.success(
                    SOURCE,
                    "Received AI suggestions.",
                    serde_json::to_value(&suggestions).ok(),
                );
                match_suggestions(&suggestions, &extras_for(product.id))
            }
            Err(e) => {
                self.events.error(
                    SOURCE,
                    "Error getting AI suggestions.",
                    Some(json!({ "error": e.to_string() })),
                );
                default_suggestions()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::find_product;
    use std::sync::Mutex;

    /// Returns a fixed reply and remembers the prompts it saw
    struct CannedModel {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedModel {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(CannedModel {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(CannedModel {
                reply: Err("timeout".to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PromptModel for CannedModel {
        async fn complete(&self, _system: &str, user: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(user.to_string());
            self.reply.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    fn assist(model: Arc<CannedModel>) -> AiAssist {
        AiAssist::new(Some(model), Arc::new(EventLog::new()))
    }

    fn history() -> Vec<HistoryEntry> {
        vec![
            HistoryEntry {
                role: HistoryRole::Received,
                text: WELCOME_MESSAGE.to_string(),
            },
            HistoryEntry {
                role: HistoryRole::Sent,
                text: "¿Hacen envíos?".to_string(),
            },
        ]
    }

    #[test]
    fn test_format_history() {
        assert_eq!(
            format_history(&history()),
            format!("Maya: {WELCOME_MESSAGE}\nUser: ¿Hacen envíos?")
        );
    }

    #[tokio::test]
    async fn test_chat_reply_parses_json_and_sends_history() {
        let model = CannedModel::ok(r#"{"response": "¡Sí, enviamos a todo el país!"}"#);
        let reply = assist(model.clone()).chat_reply("¿Hacen envíos?", &history()).await;

        assert_eq!(reply, "¡Sí, enviamos a todo el país!");
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("Full conversation history for context:\nMaya: "));
        assert!(prompts[0].contains("Latest user query: ¿Hacen envíos?"));
    }

    #[tokio::test]
    async fn test_chat_reply_accepts_plain_text() {
        let reply = assist(CannedModel::ok("Claro que sí")).chat_reply("hola", &[]).await;
        assert_eq!(reply, "Claro que sí");
    }

    #[tokio::test]
    async fn test_chat_reply_falls_back() {
        let reply = assist(CannedModel::failing()).chat_reply("hola", &[]).await;
        assert_eq!(reply, CHAT_FALLBACK);

        let unconfigured = AiAssist::new(None, Arc::new(EventLog::new()));
        assert_eq!(unconfigured.chat_reply("hola", &[]).await, CHAT_FALLBACK);
    }

    #[tokio::test]
    async fn test_suggest_extras_matches_catalog() {
        let model = CannedModel::ok(
            r#"{"items": [
                {"name": "anillos", "description": "Completan la mesa"},
                {"name": "Camino", "description": "Une los individuales"},
                {"name": "Vajilla de porcelana", "description": "No la vendemos"}
            ]}"#,
        );
        let product = find_product(1).unwrap();

        let extras = assist(model).suggest_extras(&product).await;

        let ids: Vec<_> = extras.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["x1", "p-9"]);
        assert!(extras.iter().all(|e| e.suggested));
        assert_eq!(extras[0].description.as_deref(), Some("Completan la mesa"));
    }

    #[tokio::test]
    async fn test_suggest_extras_falls_back_on_error() {
        let product = find_product(1).unwrap();

        let extras = assist(CannedModel::failing()).suggest_extras(&product).await;
        assert_eq!(extras, default_suggestions());

        let garbage = assist(CannedModel::ok("not json")).suggest_extras(&product).await;
        assert_eq!(garbage, default_suggestions());
    }

    #[test]
    fn test_match_suggestions_dedupes_and_caps() {
        let available = extras_for(1);
        let suggestions = vec![
            Suggestion { name: "Pegatinas".into(), description: "first".into() },
            Suggestion { name: "servilleta".into(), description: "napkins".into() },
            Suggestion { name: "pegatinas 'gracias'".into(), description: "second".into() },
            Suggestion { name: "Cinta".into(), description: "ribbon".into() },
            Suggestion { name: "Pétalos".into(), description: "petals".into() },
            Suggestion { name: "".into(), description: "ignored".into() },
        ];

        let matched = match_suggestions(&suggestions, &available);

        let ids: Vec<_> = matched.iter().map(|e| e.id.as_str()).collect();
        // "servilleta" hits the napkin rings before any product
        assert_eq!(ids, vec!["x2", "x1", "x4"]);
        assert_eq!(matched[0].description.as_deref(), Some("second"));
    }

    #[test]
    fn test_parse_suggestions_accepts_bare_list() {
        let parsed = parse_suggestions(r#"[{"name": "Cinta", "description": "d"}]"#).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "Cinta");
    }
}
