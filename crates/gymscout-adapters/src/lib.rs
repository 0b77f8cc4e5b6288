//! External service adapters: grounded chat completion and checkout sessions.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use gymscout_core::KnowledgeContext;
use gymscout_storage::HttpClientConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "gymscout-adapters";
pub const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_STRIPE_API_URL: &str = "https://api.stripe.com";
pub const MAX_OUTPUT_TOKENS: u32 = 300;
/// Prior turns kept when forwarding a conversation.
pub const MAX_HISTORY_TURNS: usize = 10;
/// Recommended gym names are wrapped in this on both sides so the UI can link them.
pub const GYM_NAME_DELIMITER: &str = "|||";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

impl ChatRole {
    /// Client history uses `assistant`/`bot`; anything that is not the assistant is the user.
    pub fn from_client_role(role: &str) -> Self {
        match role.trim().to_ascii_lowercase().as_str() {
            "assistant" | "bot" | "model" => Self::Model,
            _ => Self::User,
        }
    }
}

/// A turn as sent by the browser client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    #[serde(default)]
    pub role: String,
    #[serde(default, alias = "text", alias = "message")]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
}

/// Normalizes client history into at most [`MAX_HISTORY_TURNS`] turns opening with a user turn.
pub fn prepare_history(history: &[HistoryTurn]) -> Vec<ChatTurn> {
    let turns = history
        .iter()
        .filter(|turn| !turn.content.trim().is_empty())
        .map(|turn| ChatTurn {
            role: ChatRole::from_client_role(&turn.role),
            text: turn.content.trim().to_string(),
        })
        .collect::<Vec<_>>();

    let start = turns.len().saturating_sub(MAX_HISTORY_TURNS);
    turns
        .into_iter()
        .skip(start)
        .skip_while(|turn| turn.role == ChatRole::Model)
        .collect()
}

/// The exact reply for requests that match no verified gym.
pub fn fallback_reply(gym_names: &[String]) -> String {
    if gym_names.is_empty() {
        "I don't have verified gym data available right now.".to_string()
    } else {
        format!(
            "I only have verified data on these gyms: {}.",
            gym_names.join(", ")
        )
    }
}

pub fn system_instruction(knowledge: &KnowledgeContext) -> String {
    let data = if knowledge.is_empty() {
        "No gym data available currently."
    } else {
        knowledge.text.as_str()
    };
    let names = if knowledge.gym_names.is_empty() {
        "(none)".to_string()
    } else {
        knowledge.gym_names.join(", ")
    };
    let fallback = fallback_reply(&knowledge.gym_names);
    let d = GYM_NAME_DELIMITER;

    format!(
        "You are an expert Muay Thai scout in Thailand with verified data on a fixed list of gyms.\n\
         \n\
         VERIFIED GYM DATA:\n\
         {data}\n\
         \n\
         VERIFIED GYM NAMES: {names}\n\
         \n\
         RULES:\n\
         - Keep replies short: two to four sentences.\n\
         - Never greet the user or introduce yourself.\n\
         - Only recommend gyms from the verified list. Never invent gyms, prices or facts.\n\
         - If the user asks about a gym that is not in the list, or nothing in the list matches, \
         reply with exactly: \"{fallback}\"\n\
         - Wrap every gym name you recommend like {d}Gym Name{d}.\n\
         - When a detail reads \"Contact for details.\", tell the user to contact the gym."
    )
}

/// A grounded completion request. `message` is the new user turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system_instruction: String,
    pub history: Vec<ChatTurn>,
    pub message: String,
}

impl ChatRequest {
    pub fn grounded(knowledge: &KnowledgeContext, message: &str, history: &[HistoryTurn]) -> Self {
        Self {
            system_instruction: system_instruction(knowledge),
            history: prepare_history(history),
            message: message.trim().to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("chat backend returned {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("chat backend returned no text")]
    EmptyResponse,
}

/// A text-generation backend. The reply is returned to the caller unmodified.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(&self, request: &ChatRequest) -> Result<String, ChatError>;
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub max_output_tokens: u32,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_GEMINI_API_URL.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            max_output_tokens: MAX_OUTPUT_TOKENS,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

/// Google Gemini `generateContent` backend.
#[derive(Debug, Clone)]
pub struct GeminiChat {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiChat {
    pub fn new(config: GeminiConfig, http: &HttpClientConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: http.build_client()?,
            config,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.api_url.trim_end_matches('/'),
            self.config.model
        )
    }

    fn request_body(&self, request: &ChatRequest) -> serde_json::Value {
        let contents = request
            .history
            .iter()
            .map(|turn| json!({ "role": turn.role, "parts": [{ "text": turn.text }] }))
            .chain(std::iter::once(
                json!({ "role": ChatRole::User, "parts": [{ "text": request.message }] }),
            ))
            .collect::<Vec<_>>();

        json!({
            "systemInstruction": { "parts": [{ "text": request.system_instruction }] },
            "contents": contents,
            "generationConfig": { "maxOutputTokens": self.config.max_output_tokens },
        })
    }
}

#[async_trait]
impl ChatBackend for GeminiChat {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, ChatError> {
        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&self.request_body(request))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateContentResponse = resp.json().await?;
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .filter(|text| !text.is_empty())
            .ok_or(ChatError::EmptyResponse)?;
        debug!(model = %self.config.model, chars = text.len(), "chat completion received");
        Ok(text)
    }
}

/// Purchasable products. Amounts are in US cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceTier {
    FighterPassport,
    VipConcierge,
}

impl PriceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FighterPassport => "fighter-passport",
            Self::VipConcierge => "vip-concierge",
        }
    }

    pub fn product_name(&self) -> &'static str {
        match self {
            Self::FighterPassport => "Fighter's Passport",
            Self::VipConcierge => "VIP Concierge",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::FighterPassport => "Unlimited AI Finder, Black Book Access & Scam Filter",
            Self::VipConcierge => "Fighter's Passport + Personal Booking Service",
        }
    }

    pub fn unit_amount(&self) -> u32 {
        match self {
            Self::FighterPassport => 4700,
            Self::VipConcierge => 14700,
        }
    }
}

impl FromStr for PriceTier {
    type Err = CheckoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fighter-passport" => Ok(Self::FighterPassport),
            "vip-concierge" => Ok(Self::VipConcierge),
            other => Err(CheckoutError::InvalidPriceType(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("invalid price type: {0}")]
    InvalidPriceType(String),
    #[error("checkout request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("payment provider returned {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("payment provider returned a session without a url")]
    MissingUrl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub tier: PriceTier,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: BTreeMap<String, String>,
}

impl CheckoutRequest {
    /// Redirects land back on the client's index page with a `success`/`canceled` flag.
    pub fn for_client(tier: PriceTier, client_url: &str, metadata: BTreeMap<String, String>) -> Self {
        let base = client_url.trim_end_matches('/');
        Self {
            tier,
            success_url: format!("{base}/index.html?success=true"),
            cancel_url: format!("{base}/index.html?canceled=true"),
            metadata,
        }
    }

    /// Stripe's bracketed form encoding of a one-item card payment session.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("line_items[0][price_data][currency]".to_string(), "usd".to_string()),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                self.tier.product_name().to_string(),
            ),
            (
                "line_items[0][price_data][product_data][description]".to_string(),
                self.tier.description().to_string(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                self.tier.unit_amount().to_string(),
            ),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), self.success_url.clone()),
            ("cancel_url".to_string(), self.cancel_url.clone()),
        ];
        fields.extend(
            self.metadata
                .iter()
                .map(|(key, value)| (format!("metadata[{key}]"), value.clone())),
        );
        fields
    }
}

#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    /// Creates a hosted checkout session and returns its redirect url.
    async fn create_session(&self, request: &CheckoutRequest) -> Result<String, CheckoutError>;
}

#[derive(Debug, Deserialize)]
struct StripeSession {
    url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StripeCheckout {
    client: reqwest::Client,
    api_url: String,
    secret_key: String,
}

impl StripeCheckout {
    pub fn new(
        secret_key: impl Into<String>,
        api_url: impl Into<String>,
        http: &HttpClientConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: http.build_client()?,
            api_url: api_url.into(),
            secret_key: secret_key.into(),
        })
    }
}

#[async_trait]
impl CheckoutGateway for StripeCheckout {
    async fn create_session(&self, request: &CheckoutRequest) -> Result<String, CheckoutError> {
        let url = format!("{}/v1/checkout/sessions", self.api_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.secret_key)
            .form(&request.form_fields())
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CheckoutError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        let session: StripeSession = resp.json().await?;
        session.url.ok_or(CheckoutError::MissingUrl)
    }
}
