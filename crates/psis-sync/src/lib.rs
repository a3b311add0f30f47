//! Ingestion orchestration: procurement sync and backfill, grant news,
//! faculty contact discovery and LLM document drafting.
//!
//! Everything runs sequentially on the caller's task. Batch operations
//! (backfill windows, news queries, contact sources) record per-item
//! failures in their report; single-shot operations propagate them.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use psis_adapters::naver::GRANT_QUERIES;
use psis_adapters::{
    filter_target_bids, plan_backfill_windows, sanitize_credential, AdapterError, DocumentRequest,
    GeminiClient, KonepsClient, KonepsEndpoint, NaverNewsClient, TavilyClient, Transport,
};
use psis_core::{DateWindow, TIMESTAMP_FORMAT};
use psis_storage::{HttpClientConfig, HttpFetcher, Store, StoreError, DEFAULT_DB_PATH};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "psis-sync";
pub const DEFAULT_SECRETS_PATH: &str = ".psis/secrets.toml";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;
pub const LLM_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_USER_AGENT: &str = "psis/0.1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub db_path: PathBuf,
    pub secrets_path: PathBuf,
    pub http_timeout_secs: u64,
    pub llm_timeout_secs: u64,
    pub user_agent: String,
    /// Rows collected per procurement window; one page when unset.
    pub bid_row_cap: Option<usize>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            secrets_path: PathBuf::from(DEFAULT_SECRETS_PATH),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            llm_timeout_secs: LLM_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            bid_row_cap: None,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            db_path: env_var("PSIS_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            secrets_path: env_var("PSIS_SECRETS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.secrets_path),
            http_timeout_secs: parse_env("PSIS_HTTP_TIMEOUT_SECS")?
                .unwrap_or(defaults.http_timeout_secs),
            llm_timeout_secs: defaults.llm_timeout_secs,
            user_agent: env_var("PSIS_USER_AGENT").unwrap_or(defaults.user_agent),
            bid_row_cap: parse_env("PSIS_BID_ROW_CAP")?,
        })
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_var(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("parsing {key}={raw:?}"))
        })
        .transpose()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential {
    KonepsApiKey,
    GeminiApiKey,
    TavilyApiKey,
    NaverClientId,
    NaverClientSecret,
}

impl Credential {
    pub const ALL: [Credential; 5] = [
        Credential::KonepsApiKey,
        Credential::GeminiApiKey,
        Credential::TavilyApiKey,
        Credential::NaverClientId,
        Credential::NaverClientSecret,
    ];

    pub const fn key(self) -> &'static str {
        match self {
            Credential::KonepsApiKey => "KONEPS_API_KEY",
            Credential::GeminiApiKey => "GEMINI_API_KEY",
            Credential::TavilyApiKey => "TAVILY_API_KEY",
            Credential::NaverClientId => "NAVER_CLIENT_ID",
            Credential::NaverClientSecret => "NAVER_CLIENT_SECRET_KEY",
        }
    }
}

/// Provider keys from the managed secrets file, falling back to the
/// process environment.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    secrets: BTreeMap<String, String>,
    read_env: bool,
}

impl Credentials {
    /// A missing secrets file is fine; an unreadable or malformed one is not.
    pub fn load(secrets_path: &Path) -> Result<Self> {
        let secrets = match std::fs::read_to_string(secrets_path) {
            Ok(text) => parse_secrets(&text)
                .with_context(|| format!("parsing {}", secrets_path.display()))?,
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", secrets_path.display()))
            }
        };
        Ok(Self {
            secrets,
            read_env: true,
        })
    }

    /// Fixed values; the environment is never consulted.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            secrets: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
            read_env: false,
        }
    }

    /// First source whose value survives sanitizing wins, so a placeholder
    /// such as `""` in the secrets file falls through to the environment.
    pub fn resolve(&self, credential: Credential) -> Option<String> {
        let key = credential.key();
        let from_file = self.secrets.get(key).cloned();
        let from_env = if self.read_env {
            std::env::var(key).ok()
        } else {
            None
        };
        [from_file, from_env]
            .into_iter()
            .flatten()
            .map(|value| sanitize_credential(&value))
            .find(|value| !value.is_empty())
    }

    pub fn require(&self, credential: Credential) -> Result<String, AdapterError> {
        self.resolve(credential)
            .ok_or(AdapterError::MissingCredential(credential.key()))
    }

    pub fn is_set(&self, credential: Credential) -> bool {
        self.resolve(credential).is_some()
    }
}

/// Top-level string entries of the secrets file.
fn parse_secrets(text: &str) -> Result<BTreeMap<String, String>, toml::de::Error> {
    let table: toml::Table = text.parse()?;
    Ok(table
        .into_iter()
        .filter_map(|(key, value)| match value {
            toml::Value::String(value) => Some((key, value)),
            _ => None,
        })
        .collect())
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedWindow {
    pub window: DateWindow,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub windows_attempted: usize,
    /// Sum over windows that completed.
    pub added: usize,
    pub failed_windows: Vec<FailedWindow>,
}

impl BackfillReport {
    pub fn windows_succeeded(&self) -> usize {
        self.windows_attempted - self.failed_windows.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedQuery {
    pub query: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GrantSyncReport {
    /// False when news credentials were absent and nothing ran.
    pub credentials_present: bool,
    pub cleared: u64,
    pub queries_run: usize,
    pub collected: usize,
    pub added: usize,
    pub failed_queries: Vec<FailedQuery>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedSource {
    pub source_url: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContactDiscoveryReport {
    pub school_name: String,
    pub sources_searched: usize,
    pub extracted: usize,
    pub added: usize,
    pub failed_sources: Vec<FailedSource>,
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn now_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

pub struct SyncPipeline {
    store: Store,
    credentials: Credentials,
    provider: Arc<dyn Transport>,
    llm: Arc<dyn Transport>,
    bid_row_cap: Option<usize>,
}

impl SyncPipeline {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let provider = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
        })?;
        let llm = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.llm_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
        })?;
        let credentials = Credentials::load(&config.secrets_path)?;
        Ok(Self::with_parts(
            Store::new(config.db_path.clone()),
            credentials,
            Arc::new(provider),
            Arc::new(llm),
        )
        .with_bid_row_cap(config.bid_row_cap))
    }

    /// Provider APIs go through `provider`; LLM calls through `llm`, which
    /// normally carries a longer timeout.
    pub fn with_parts(
        store: Store,
        credentials: Credentials,
        provider: Arc<dyn Transport>,
        llm: Arc<dyn Transport>,
    ) -> Self {
        Self {
            store,
            credentials,
            provider,
            llm,
            bid_row_cap: None,
        }
    }

    pub fn with_bid_row_cap(mut self, bid_row_cap: Option<usize>) -> Self {
        self.bid_row_cap = bid_row_cap;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    fn koneps(&self, endpoint: KonepsEndpoint) -> Result<KonepsClient, AdapterError> {
        let key = self.credentials.require(Credential::KonepsApiKey)?;
        let client = KonepsClient::new(self.provider.clone(), key, endpoint);
        Ok(match self.bid_row_cap {
            Some(cap) => client.with_row_cap(cap),
            None => client,
        })
    }

    async fn ingest_window(
        &self,
        client: &KonepsClient,
        window: &DateWindow,
    ) -> Result<usize, SyncError> {
        let rows = client.fetch_window(window).await?;
        let bids = filter_target_bids(&rows, client.endpoint().stage);
        let added = self.store.insert_bids(&bids).await?;
        debug!(
            source_id = client.endpoint().source_id,
            %window,
            fetched = rows.len(),
            matched = bids.len(),
            added,
            "window ingested"
        );
        Ok(added)
    }

    /// Bid notices from the last `days` days.
    pub async fn sync_recent(&self, days: u32) -> Result<usize, SyncError> {
        self.sync_recent_until(today(), days).await
    }

    #[instrument(skip(self), fields(run_id = %Uuid::new_v4()))]
    pub async fn sync_recent_until(&self, end: NaiveDate, days: u32) -> Result<usize, SyncError> {
        let client = self.koneps(KonepsEndpoint::bid_notices())?;
        let window = DateWindow::ending_on(end, days);
        let added = self.ingest_window(&client, &window).await?;
        info!(%window, added, "recent bid sync finished");
        Ok(added)
    }

    /// Bid notices for the last `years` years, walked in 30-day windows.
    pub async fn sync_historical(&self, years: u32) -> Result<BackfillReport, SyncError> {
        self.sync_historical_until(today(), years).await
    }

    #[instrument(skip(self), fields(run_id = %Uuid::new_v4()))]
    pub async fn sync_historical_until(
        &self,
        end: NaiveDate,
        years: u32,
    ) -> Result<BackfillReport, SyncError> {
        let client = self.koneps(KonepsEndpoint::bid_notices())?;
        let mut report = BackfillReport::default();
        for window in plan_backfill_windows(end, years) {
            report.windows_attempted += 1;
            match self.ingest_window(&client, &window).await {
                Ok(added) => report.added += added,
                Err(err) => {
                    warn!(%window, error = %err, "backfill window failed");
                    report.failed_windows.push(FailedWindow {
                        window,
                        reason: err.to_string(),
                    });
                }
            }
        }
        info!(
            windows = report.windows_attempted,
            failed = report.failed_windows.len(),
            added = report.added,
            "historical backfill finished"
        );
        Ok(report)
    }

    /// Pre-spec notices from the last `days` days. Without a procurement
    /// key this is a no-op.
    pub async fn sync_pre_spec(&self, days: u32) -> Result<usize, SyncError> {
        self.sync_pre_spec_until(today(), days).await
    }

    #[instrument(skip(self), fields(run_id = %Uuid::new_v4()))]
    pub async fn sync_pre_spec_until(&self, end: NaiveDate, days: u32) -> Result<usize, SyncError> {
        let client = match self.koneps(KonepsEndpoint::pre_spec()) {
            Ok(client) => client,
            Err(AdapterError::MissingCredential(credential)) => {
                warn!(credential, "pre-spec sync skipped");
                return Ok(0);
            }
            Err(err) => return Err(err.into()),
        };
        let window = DateWindow::ending_on(end, days);
        let added = self.ingest_window(&client, &window).await?;
        info!(%window, added, "pre-spec sync finished");
        Ok(added)
    }

    /// Crawl grant-award news. With `reset` the grants table is emptied
    /// first, but only once credentials are known to be present.
    #[instrument(skip(self), fields(run_id = %Uuid::new_v4()))]
    pub async fn sync_grants(&self, reset: bool) -> Result<GrantSyncReport, SyncError> {
        let (Some(client_id), Some(client_secret)) = (
            self.credentials.resolve(Credential::NaverClientId),
            self.credentials.resolve(Credential::NaverClientSecret),
        ) else {
            warn!("news search credentials missing; grant sync skipped");
            return Ok(GrantSyncReport::default());
        };

        let mut report = GrantSyncReport {
            credentials_present: true,
            ..GrantSyncReport::default()
        };
        if reset {
            report.cleared = self.store.clear_grants().await?;
        }

        let client = NaverNewsClient::new(self.provider.clone(), client_id, client_secret);
        let crawl = client.crawl_grants(&now_timestamp()).await;
        report.queries_run = GRANT_QUERIES.len();
        report.collected = crawl.grants.len();
        report.failed_queries = crawl
            .failed_queries
            .into_iter()
            .map(|(query, err)| FailedQuery {
                query,
                reason: err.to_string(),
            })
            .collect();
        report.added = self.store.insert_grants(&crawl.grants).await?;
        info!(
            cleared = report.cleared,
            collected = report.collected,
            added = report.added,
            failed = report.failed_queries.len(),
            "grant sync finished"
        );
        Ok(report)
    }

    /// Search the school's faculty pages and extract contacts from each hit.
    #[instrument(skip(self), fields(run_id = %Uuid::new_v4()))]
    pub async fn discover_contacts(
        &self,
        school_name: &str,
    ) -> Result<ContactDiscoveryReport, SyncError> {
        let search_key = self.credentials.require(Credential::TavilyApiKey)?;
        let llm_key = self.credentials.require(Credential::GeminiApiKey)?;
        let search = TavilyClient::new(self.provider.clone(), search_key);
        let gemini = GeminiClient::new(self.llm.clone(), llm_key);

        let hits = search.search_faculty(school_name).await?;
        let mut report = ContactDiscoveryReport {
            school_name: school_name.to_string(),
            sources_searched: hits.len(),
            ..ContactDiscoveryReport::default()
        };
        let mut contacts = Vec::new();
        for hit in &hits {
            match gemini
                .extract_contacts(school_name, &hit.url, &hit.content)
                .await
            {
                Ok(found) => contacts.extend(found),
                Err(err) => {
                    warn!(source_url = %hit.url, error = %err, "contact extraction failed");
                    report.failed_sources.push(FailedSource {
                        source_url: hit.url.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        report.extracted = contacts.len();
        report.added = self.store.insert_contacts(&contacts).await?;
        info!(
            sources = report.sources_searched,
            extracted = report.extracted,
            added = report.added,
            failed = report.failed_sources.len(),
            "contact discovery finished"
        );
        Ok(report)
    }

    #[instrument(skip(self, request), fields(run_id = %Uuid::new_v4(), school = %request.school_name))]
    pub async fn generate_document(&self, request: &DocumentRequest) -> Result<String, SyncError> {
        let key = self.credentials.require(Credential::GeminiApiKey)?;
        let document = GeminiClient::new(self.llm.clone(), key)
            .generate_document(request)
            .await?;
        info!(chars = document.chars().count(), "document generated");
        Ok(document)
    }
}
