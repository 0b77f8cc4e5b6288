//! Axum JSON API for Gym Scout: grounded chat, gym listing, traffic status, signups and checkout.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use gymscout_adapters::{
    ChatBackend, ChatRequest, CheckoutGateway, CheckoutRequest, GeminiChat, GeminiConfig,
    HistoryTurn, PriceTier, StripeCheckout, DEFAULT_GEMINI_API_URL, DEFAULT_GEMINI_MODEL,
    DEFAULT_STRIPE_API_URL,
};
use gymscout_core::{build_grounding, traffic_status, GymView, KnowledgeContext};
use gymscout_storage::{
    AirtableClient, AirtableConfig, HttpClientConfig, TableCache, WriteError, DEFAULT_API_URL,
};
use serde::Deserialize;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "gymscout-web";

pub const MOCK_MODE_MESSAGE: &str =
    "Backend is running but API keys are not configured in .env. Using mock data.";

/// Runtime settings, read from the process environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub gemini_api_key: Option<String>,
    pub gemini_api_url: String,
    pub gemini_model: String,
    pub airtable_api_key: Option<String>,
    pub airtable_base_id: Option<String>,
    pub airtable_api_url: String,
    pub gyms_table: String,
    pub prices_table: String,
    pub waitlist_table: String,
    pub bookings_table: String,
    pub stripe_secret_key: Option<String>,
    pub stripe_api_url: String,
    pub client_url: String,
    pub cache_ttl: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        Self {
            port: get("PORT").and_then(|v| v.parse().ok()).unwrap_or(3000),
            gemini_api_key: get("GEMINI_API_KEY").or_else(|| get("GOOGLE_API_KEY")),
            gemini_api_url: or("GEMINI_API_URL", DEFAULT_GEMINI_API_URL),
            gemini_model: or("GEMINI_MODEL", DEFAULT_GEMINI_MODEL),
            airtable_api_key: get("AIRTABLE_API_KEY"),
            airtable_base_id: get("AIRTABLE_BASE_ID"),
            airtable_api_url: or("AIRTABLE_API_URL", DEFAULT_API_URL),
            gyms_table: or("AIRTABLE_TABLE_NAME", "Gyms"),
            prices_table: or("AIRTABLE_PRICES_TABLE", "Prices"),
            waitlist_table: or("AIRTABLE_WAITLIST_TABLE", "Waitlist"),
            bookings_table: or("AIRTABLE_BOOKINGS_TABLE", "Bookings"),
            stripe_secret_key: get("STRIPE_SECRET_KEY"),
            stripe_api_url: or("STRIPE_API_URL", DEFAULT_STRIPE_API_URL),
            client_url: or("CLIENT_URL", "http://localhost:3000"),
            cache_ttl: get("GYM_CACHE_TTL_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::ZERO),
        }
    }

    pub fn has_google(&self) -> bool {
        self.gemini_api_key.is_some()
    }

    pub fn has_airtable(&self) -> bool {
        self.airtable_api_key.is_some() && self.airtable_base_id.is_some()
    }
}

/// Shared handler state. Each external service is `None` when its credentials are missing.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub airtable: Option<AirtableClient>,
    pub chat: Option<Arc<dyn ChatBackend>>,
    pub checkout: Option<Arc<dyn CheckoutGateway>>,
}

impl AppState {
    /// State with no external services attached.
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            airtable: None,
            chat: None,
            checkout: None,
        }
    }

    /// Wires every service whose credentials are present in `config`.
    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let http = HttpClientConfig {
            timeout: None,
            user_agent: Some(format!("gymscout/{}", env!("CARGO_PKG_VERSION"))),
        };
        let mut state = Self::new(config.clone());

        if let (Some(key), Some(base)) = (&config.airtable_api_key, &config.airtable_base_id) {
            let airtable_config =
                AirtableConfig::new(key.clone(), base.clone()).with_api_url(&config.airtable_api_url);
            let mut client = AirtableClient::new(airtable_config, &http)?;
            if !config.cache_ttl.is_zero() {
                client = client.with_cache(Arc::new(TableCache::new(config.cache_ttl)));
            }
            state.airtable = Some(client);
        }
        if let Some(key) = &config.gemini_api_key {
            let mut gemini = GeminiConfig::new(key.clone());
            gemini.api_url = config.gemini_api_url.clone();
            gemini.model = config.gemini_model.clone();
            state.chat = Some(Arc::new(GeminiChat::new(gemini, &http)?));
        }
        if let Some(key) = &config.stripe_secret_key {
            state.checkout = Some(Arc::new(StripeCheckout::new(
                key.clone(),
                config.stripe_api_url.clone(),
                &http,
            )?));
        }
        Ok(state)
    }

    pub fn with_airtable(mut self, client: AirtableClient) -> Self {
        self.airtable = Some(client);
        self
    }

    pub fn with_chat(mut self, chat: Arc<dyn ChatBackend>) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn with_checkout(mut self, checkout: Arc<dyn CheckoutGateway>) -> Self {
        self.checkout = Some(checkout);
        self
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotConfigured(String),
    #[error("{0}")]
    Upstream(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

type ApiResult = Result<Json<JsonValue>, ApiError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    conversation_history: Option<Vec<HistoryTurn>>,
}

#[derive(Debug, Deserialize)]
struct WaitlistBody {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookingBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    gym_name: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    training_type: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutBody {
    #[serde(default)]
    price_type: Option<String>,
    #[serde(default)]
    metadata: Option<JsonMap<String, JsonValue>>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/gyms", get(gyms_handler))
        .route("/api/gym-status", get(gym_status_handler))
        .route("/api/health", get(health_handler))
        .route("/api/waitlist", post(waitlist_handler))
        .route("/api/record-booking", post(record_booking_handler))
        .route("/api/create-checkout-session", post(checkout_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = AppConfig::from_env();
    let port = config.port;
    info!(
        google = config.has_google(),
        airtable = config.has_airtable(),
        stripe = config.stripe_secret_key.is_some(),
        "loaded configuration"
    );
    let state = AppState::from_config(config)?;
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("server running at http://localhost:{port}");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Fetches the gym and price tables concurrently and normalizes them.
async fn load_grounding(
    airtable: &AirtableClient,
    config: &AppConfig,
) -> (Vec<GymView>, KnowledgeContext) {
    let (gyms, prices) = tokio::join!(
        airtable.fetch_records(&config.gyms_table),
        airtable.fetch_records(&config.prices_table),
    );
    build_grounding(&gyms, &prices)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    let Some(message) = non_blank(body.message) else {
        return Err(ApiError::BadRequest("Message is required".to_string()));
    };

    let (Some(chat), Some(airtable)) = (&state.chat, &state.airtable) else {
        return Ok(Json(json!({ "useMock": true, "message": MOCK_MODE_MESSAGE })));
    };

    let (_, knowledge) = load_grounding(airtable, &state.config).await;
    let history = body.conversation_history.unwrap_or_default();
    let request = ChatRequest::grounded(&knowledge, &message, &history);
    match chat.complete(&request).await {
        Ok(reply) => Ok(Json(json!({ "response": reply }))),
        Err(err) => {
            error!(backend = chat.name(), error = %err, "chat completion failed");
            Err(ApiError::Upstream("Internal Server Error".to_string()))
        }
    }
}

async fn gyms_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let Some(airtable) = &state.airtable else {
        warn!("airtable is not configured; returning no gyms");
        return Ok(Json(json!({ "gyms": [] })));
    };
    let (gyms, _) = load_grounding(airtable, &state.config).await;
    Ok(Json(json!({ "gyms": gyms })))
}

async fn gym_status_handler() -> Json<JsonValue> {
    Json(json!(traffic_status(Utc::now())))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
    Json(json!({
        "status": "ok",
        "config": {
            "google": state.config.has_google(),
            "airtable": state.config.has_airtable(),
        }
    }))
}

/// Maps known Airtable failure texts to actionable hints for the waitlist form.
fn waitlist_diagnostic(err: &WriteError, table: &str) -> String {
    let text = err.to_string();
    if text.contains("NOT_FOUND") || text.contains("Could not find table") {
        format!(
            "Waitlist table \"{table}\" was not found in Airtable. Check AIRTABLE_WAITLIST_TABLE."
        )
    } else if text.contains("UNKNOWN_FIELD_NAME") || text.contains("Unknown field name") {
        format!(
            "Waitlist table \"{table}\" is missing expected columns (Email, Name, Signup Date)."
        )
    } else {
        "Failed to join waitlist. Please try again later.".to_string()
    }
}

async fn waitlist_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<WaitlistBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    let Some(email) = non_blank(body.email) else {
        return Err(ApiError::BadRequest("Email is required".to_string()));
    };
    let Some(airtable) = &state.airtable else {
        return Err(ApiError::NotConfigured(
            "Waitlist is not configured".to_string(),
        ));
    };

    let table = &state.config.waitlist_table;
    let mut fields = JsonMap::new();
    fields.insert("Email".into(), json!(email));
    if let Some(name) = non_blank(body.name) {
        fields.insert("Name".into(), json!(name));
    }
    fields.insert(
        "Signup Date".into(),
        json!(Utc::now().format("%Y-%m-%d").to_string()),
    );

    match airtable.create_record(table, fields).await {
        Ok(id) => {
            info!(record_id = %id, "waitlist signup recorded");
            Ok(Json(json!({
                "success": true,
                "message": "You're on the waitlist! We'll be in touch soon."
            })))
        }
        Err(err) => {
            error!(table = %table, error = %err, "waitlist write failed");
            Err(ApiError::Upstream(waitlist_diagnostic(&err, table)))
        }
    }
}

async fn record_booking_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BookingBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    let (Some(name), Some(email)) = (non_blank(body.name), non_blank(body.email)) else {
        return Err(ApiError::BadRequest(
            "Name and email are required".to_string(),
        ));
    };
    let Some(airtable) = &state.airtable else {
        return Err(ApiError::NotConfigured(
            "Booking service is not configured".to_string(),
        ));
    };

    let mut fields = JsonMap::new();
    fields.insert("Name".into(), json!(name));
    fields.insert("Email".into(), json!(email));
    for (column, value) in [
        ("Gym Name", body.gym_name),
        ("Date", body.date),
        ("Time", body.time),
        ("Training Type", body.training_type),
        ("Notes", body.notes),
    ] {
        if let Some(value) = non_blank(value) {
            fields.insert(column.into(), json!(value));
        }
    }
    fields.insert("Status".into(), json!("Pending"));

    let table = &state.config.bookings_table;
    match airtable.create_record(table, fields).await {
        Ok(id) => {
            info!(record_id = %id, "booking recorded");
            Ok(Json(json!({ "success": true })))
        }
        Err(err) => {
            error!(table = %table, error = %err, "booking write failed");
            Err(ApiError::Upstream("Failed to record booking".to_string()))
        }
    }
}

fn metadata_strings(metadata: Option<JsonMap<String, JsonValue>>) -> BTreeMap<String, String> {
    metadata
        .unwrap_or_default()
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let text = match value {
                JsonValue::String(s) => s,
                other => other.to_string(),
            };
            (key, text)
        })
        .collect()
}

async fn checkout_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CheckoutBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    let tier: PriceTier = body
        .price_type
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid price type".to_string()))?;
    let Some(checkout) = &state.checkout else {
        error!("checkout requested but STRIPE_SECRET_KEY is not set");
        return Err(ApiError::Upstream(
            "Payments are not configured".to_string(),
        ));
    };

    let request = CheckoutRequest::for_client(
        tier,
        &state.config.client_url,
        metadata_strings(body.metadata),
    );
    match checkout.create_session(&request).await {
        Ok(url) => Ok(Json(json!({ "url": url }))),
        Err(err) => {
            error!(price_type = tier.as_str(), error = %err, "checkout session failed");
            Err(ApiError::Upstream(
                "Failed to create checkout session".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request};
    use gymscout_adapters::{ChatError, CheckoutError};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn bare_config() -> AppConfig {
        AppConfig::from_lookup(|_| None)
    }

    fn airtable_for(server: &MockServer) -> AirtableClient {
        let config = AirtableConfig::new("key", "appBase").with_api_url(server.uri());
        AirtableClient::new(config, &HttpClientConfig::default()).expect("client")
    }

    #[derive(Default)]
    struct FakeChat {
        reply: Option<String>,
        seen: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl ChatBackend for FakeChat {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn complete(&self, request: &ChatRequest) -> Result<String, ChatError> {
            self.seen.lock().expect("lock").push(request.clone());
            self.reply.clone().ok_or(ChatError::EmptyResponse)
        }
    }

    #[derive(Default)]
    struct CountingCheckout {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CheckoutGateway for CountingCheckout {
        async fn create_session(&self, request: &CheckoutRequest) -> Result<String, CheckoutError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("https://pay.example/{}", request.tier.as_str()))
        }
    }

    async fn mount_tables(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/v0/appBase/Gyms"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "records": [{
                    "id": "recGym1",
                    "fields": {
                        "Gym Name": "Sinbi",
                        "Location": "Phuket",
                        "Prices": ["recPrice1", "recGone"],
                        "Overall Rating": 5,
                        "Cleanliness Rating": 3
                    }
                }]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v0/appBase/Prices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "records": [{"id": "recPrice1", "fields": {"Name": "1 Month", "Price": 12000}}]
            })))
            .mount(server)
            .await;
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: JsonValue) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, JsonValue) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn config_reads_overrides_and_defaults() {
        let config = AppConfig::from_lookup(|key| match key {
            "GOOGLE_API_KEY" => Some("g".to_string()),
            "AIRTABLE_API_KEY" => Some("a".to_string()),
            "AIRTABLE_BASE_ID" => Some("  ".to_string()),
            "AIRTABLE_WAITLIST_TABLE" => Some("Signups".to_string()),
            "GYM_CACHE_TTL_SECS" => Some("30".to_string()),
            _ => None,
        });
        assert!(config.has_google());
        assert!(!config.has_airtable());
        assert_eq!(config.waitlist_table, "Signups");
        assert_eq!(config.gyms_table, "Gyms");
        assert_eq!(config.port, 3000);
        assert_eq!(config.cache_ttl, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn chat_requires_message() {
        let (status, body) = send(app(AppState::new(bare_config())), post_json("/api/chat", json!({"message": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Message is required");

        let (status, _) = send(app(AppState::new(bare_config())), post_json("/api/chat", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_without_credentials_signals_mock_mode() {
        let (status, body) = send(
            app(AppState::new(bare_config())),
            post_json("/api/chat", json!({"message": "Best gym in Phuket?"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["useMock"], true);
        assert_eq!(body["message"], MOCK_MODE_MESSAGE);
    }

    #[tokio::test]
    async fn chat_accepts_null_or_partial_history() {
        for history in [json!(null), json!([{"role": "user"}, {"text": "hi"}])] {
            let (status, body) = send(
                app(AppState::new(bare_config())),
                post_json("/api/chat", json!({"message": "hi", "conversationHistory": history})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["useMock"], true);
        }
    }

    #[tokio::test]
    async fn chat_grounds_completion_on_gym_data() {
        let server = MockServer::start().await;
        mount_tables(&server).await;
        let chat = Arc::new(FakeChat {
            reply: Some("Try |||Sinbi|||.".to_string()),
            ..FakeChat::default()
        });
        let state = AppState::new(bare_config())
            .with_airtable(airtable_for(&server))
            .with_chat(chat.clone());

        let (status, body) = send(
            app(state),
            post_json(
                "/api/chat",
                json!({
                    "message": "Where should I train?",
                    "conversationHistory": [{"role": "assistant", "content": "Hello!"}]
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"], "Try |||Sinbi|||.");

        let seen = chat.seen.lock().expect("lock");
        let request = &seen[0];
        assert!(request.system_instruction.contains("Gym: Sinbi"));
        assert!(request.system_instruction.contains("Prices: 1 Month: ฿12,000"));
        assert!(!request.system_instruction.contains("recGone"));
        assert!(request.history.is_empty());
        assert_eq!(request.message, "Where should I train?");
    }

    #[tokio::test]
    async fn chat_backend_failure_is_500() {
        let server = MockServer::start().await;
        mount_tables(&server).await;
        let state = AppState::new(bare_config())
            .with_airtable(airtable_for(&server))
            .with_chat(Arc::new(FakeChat::default()));
        let (status, body) = send(app(state), post_json("/api/chat", json!({"message": "hi"}))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal Server Error");
    }

    #[tokio::test]
    async fn gyms_are_normalized_with_resolved_prices() {
        let server = MockServer::start().await;
        mount_tables(&server).await;
        let state = AppState::new(bare_config()).with_airtable(airtable_for(&server));

        let (status, body) = send(app(state), get("/api/gyms")).await;
        assert_eq!(status, StatusCode::OK);
        let gym = &body["gyms"][0];
        assert_eq!(gym["id"], "recGym1");
        assert_eq!(gym["name"], "Sinbi");
        assert_eq!(gym["rating"], json!(4.0));
        assert_eq!(gym["price"], json!(["1 Month: ฿12,000"]));
        assert_eq!(gym["Prices"], json!(["1 Month: ฿12,000"]));
    }

    #[tokio::test]
    async fn gyms_degrade_to_empty_list() {
        let (status, body) = send(app(AppState::new(bare_config())), get("/api/gyms")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"gyms": []}));

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let state = AppState::new(bare_config()).with_airtable(airtable_for(&server));
        let (status, body) = send(app(state), get("/api/gyms")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"gyms": []}));
    }

    #[tokio::test]
    async fn gym_status_reports_schedule() {
        let (status, body) = send(app(AppState::new(bare_config())), get("/api/gym-status")).await;
        assert_eq!(status, StatusCode::OK);
        for key in ["time", "hour", "status", "color", "statuses"] {
            assert!(body.get(key).is_some(), "missing {key}");
        }
        assert!(body["statuses"].as_array().is_some_and(|s| !s.is_empty()));
    }

    #[tokio::test]
    async fn health_reports_configured_services() {
        let config = AppConfig::from_lookup(|key| match key {
            "AIRTABLE_API_KEY" => Some("a".to_string()),
            "AIRTABLE_BASE_ID" => Some("b".to_string()),
            _ => None,
        });
        let (status, body) = send(app(AppState::new(config)), get("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok", "config": {"google": false, "airtable": true}}));
    }

    #[tokio::test]
    async fn waitlist_validates_and_requires_configuration() {
        let (status, _) = send(app(AppState::new(bare_config())), post_json("/api/waitlist", json!({"name": "Sam"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            app(AppState::new(bare_config())),
            post_json("/api/waitlist", json!({"email": "sam@example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "Waitlist is not configured");
    }

    #[tokio::test]
    async fn waitlist_signup_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v0/appBase/Waitlist"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "recW1", "fields": {}})))
            .expect(1)
            .mount(&server)
            .await;
        let state = AppState::new(bare_config()).with_airtable(airtable_for(&server));
        let (status, body) = send(
            app(state),
            post_json("/api/waitlist", json!({"email": "sam@example.com", "name": "Sam"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn waitlist_reports_missing_table_and_unknown_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"type": "TABLE_NOT_FOUND", "message": "Could not find table Waitlist"}
            })))
            .mount(&server)
            .await;
        let state = AppState::new(bare_config()).with_airtable(airtable_for(&server));
        let (status, body) = send(app(state), post_json("/api/waitlist", json!({"email": "a@b.co"}))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("was not found"));

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "error": {"type": "UNKNOWN_FIELD_NAME", "message": "Unknown field name: \"Signup Date\""}
            })))
            .mount(&server)
            .await;
        let state = AppState::new(bare_config()).with_airtable(airtable_for(&server));
        let (status, body) = send(app(state), post_json("/api/waitlist", json!({"email": "a@b.co"}))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("missing expected columns"));
    }

    #[tokio::test]
    async fn booking_requires_name_and_email() {
        let (status, body) = send(
            app(AppState::new(bare_config())),
            post_json("/api/record-booking", json!({"email": "a@b.co", "gymName": "Sinbi"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Name and email are required");
    }

    #[tokio::test]
    async fn booking_is_written_to_bookings_table() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v0/appBase/Bookings"))
            .and(wiremock::matchers::body_partial_json(json!({
                "fields": {"Name": "Sam", "Gym Name": "Sinbi", "Training Type": "Private", "Status": "Pending"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "recB1", "fields": {}})))
            .expect(1)
            .mount(&server)
            .await;
        let state = AppState::new(bare_config()).with_airtable(airtable_for(&server));
        let (status, body) = send(
            app(state),
            post_json(
                "/api/record-booking",
                json!({
                    "name": "Sam", "email": "sam@example.com", "gymName": "Sinbi",
                    "date": "2025-07-01", "time": "07:00", "trainingType": "Private"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));
    }

    #[tokio::test]
    async fn checkout_rejects_unknown_price_type_without_calling_gateway() {
        let gateway = Arc::new(CountingCheckout::default());
        let state = AppState::new(bare_config()).with_checkout(gateway.clone());
        let (status, body) = send(
            app(state),
            post_json("/api/create-checkout-session", json!({"priceType": "platinum"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid price type");
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn checkout_returns_session_url() {
        let gateway = Arc::new(CountingCheckout::default());
        let state = AppState::new(bare_config()).with_checkout(gateway.clone());
        let (status, body) = send(
            app(state),
            post_json(
                "/api/create-checkout-session",
                json!({"priceType": "fighter-passport", "metadata": {"email": "a@b.co"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["url"], "https://pay.example/fighter-passport");
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn metadata_values_are_stringified() {
        let mut map = JsonMap::new();
        map.insert("email".into(), json!("a@b.co"));
        map.insert("seats".into(), json!(2));
        map.insert("skip".into(), JsonValue::Null);
        let strings = metadata_strings(Some(map));
        assert_eq!(strings.get("email").map(String::as_str), Some("a@b.co"));
        assert_eq!(strings.get("seats").map(String::as_str), Some("2"));
        assert!(!strings.contains_key("skip"));
    }
}
