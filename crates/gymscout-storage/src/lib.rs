//! Airtable table access for Gym Scout: record fetch, record creation and an optional TTL cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use gymscout_core::RawRecord;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info_span, warn, Instrument};

pub const CRATE_NAME: &str = "gymscout-storage";
pub const DEFAULT_API_URL: &str = "https://api.airtable.com";
/// Airtable's maximum page size; only the first page is read.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct AirtableConfig {
    pub api_url: String,
    pub api_key: String,
    pub base_id: String,
    pub page_size: u32,
}

impl AirtableConfig {
    pub fn new(api_key: impl Into<String>, base_id: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: api_key.into(),
            base_id: base_id.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}

/// Client-level settings. Timeouts default to reqwest's own.
#[derive(Debug, Clone, Default)]
pub struct HttpClientConfig {
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
}

impl HttpClientConfig {
    pub fn build_client(&self) -> anyhow::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        builder.build().context("building reqwest client")
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid table url: {0}")]
    Url(String),
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("airtable rejected write with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("invalid table url: {0}")]
    Url(String),
}

#[derive(Debug, Deserialize)]
struct ListRecordsResponse {
    #[serde(default)]
    records: Vec<RawRecord>,
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedRecord {
    id: String,
}

#[derive(Debug, Clone)]
struct CachedTable {
    records: Vec<RawRecord>,
    fetched_at: Instant,
}

/// Per-table record cache with a fixed time-to-live. A zero TTL disables caching.
#[derive(Debug)]
pub struct TableCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedTable>>,
}

impl TableCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub async fn get(&self, table: &str, now: Instant) -> Option<Vec<RawRecord>> {
        if !self.is_enabled() {
            return None;
        }
        let entries = self.entries.lock().await;
        entries
            .get(table)
            .filter(|cached| now.saturating_duration_since(cached.fetched_at) < self.ttl)
            .map(|cached| cached.records.clone())
    }

    pub async fn put(&self, table: &str, records: Vec<RawRecord>, now: Instant) {
        if !self.is_enabled() {
            return;
        }
        self.entries.lock().await.insert(
            table.to_string(),
            CachedTable {
                records,
                fetched_at: now,
            },
        );
    }
}

#[derive(Debug, Clone)]
pub struct AirtableClient {
    client: reqwest::Client,
    config: AirtableConfig,
    cache: Option<Arc<TableCache>>,
}

impl AirtableClient {
    pub fn new(config: AirtableConfig, http: &HttpClientConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: http.build_client()?,
            config,
            cache: None,
        })
    }

    pub fn with_cache(mut self, cache: Arc<TableCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    fn table_url(&self, table: &str) -> Result<Url, String> {
        let mut url = Url::parse(&self.config.api_url).map_err(|e| e.to_string())?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| format!("{} cannot be a base url", self.config.api_url))?;
            segments
                .pop_if_empty()
                .extend(["v0", self.config.base_id.as_str(), table]);
        }
        Ok(url)
    }

    /// Rows of `table`, or an empty vector when the fetch fails for any reason.
    ///
    /// Callers cannot tell a failed fetch from an empty table; the failure is only logged.
    pub async fn fetch_records(&self, table: &str) -> Vec<RawRecord> {
        if let Some(cache) = &self.cache {
            if let Some(records) = cache.get(table, Instant::now()).await {
                debug!(table, count = records.len(), "serving table from cache");
                return records;
            }
        }

        match self.try_fetch_records(table).await {
            Ok(records) => {
                if let Some(cache) = &self.cache {
                    if !records.is_empty() {
                        cache.put(table, records.clone(), Instant::now()).await;
                    }
                }
                records
            }
            Err(err) => {
                warn!(table, error = %err, "airtable fetch failed; treating table as empty");
                Vec::new()
            }
        }
    }

    /// Single-page fetch of `table`. No retries and no pagination past the first page.
    pub async fn try_fetch_records(&self, table: &str) -> Result<Vec<RawRecord>, FetchError> {
        let url = self.table_url(table).map_err(FetchError::Url)?;
        let span = info_span!("airtable_fetch", table);

        async {
            let resp = self
                .client
                .get(url)
                .bearer_auth(&self.config.api_key)
                .query(&[("pageSize", self.config.page_size)])
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: resp.url().to_string(),
                });
            }

            let page: ListRecordsResponse = resp.json().await?;
            if page.offset.is_some() {
                debug!(table, "table has more rows than one page; ignoring the rest");
            }
            debug!(table, count = page.records.len(), "fetched airtable records");
            Ok::<_, FetchError>(page.records)
        }
        .instrument(span)
        .await
    }

    /// Creates one row and returns its record id. Airtable typecasts the values.
    pub async fn create_record(
        &self,
        table: &str,
        fields: JsonMap<String, JsonValue>,
    ) -> Result<String, WriteError> {
        let url = self.table_url(table).map_err(WriteError::Url)?;
        let span = info_span!("airtable_create", table);

        async {
            let resp = self
                .client
                .post(url)
                .bearer_auth(&self.config.api_key)
                .json(&json!({ "fields": fields, "typecast": true }))
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(WriteError::Rejected {
                    status: status.as_u16(),
                    body,
                });
            }
            let created: CreatedRecord = resp.json().await?;
            debug!(table, id = %created.id, "created airtable record");
            Ok::<_, WriteError>(created.id)
        }
        .instrument(span)
        .await
    }
}
