//! Provider adapter contracts: procurement API, grant news, faculty search
//! and the LLM, plus the bid relevance filter.

use async_trait::async_trait;
use psis_storage::{FetchError, FetchedResponse, HttpFetcher};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

pub mod filter;
pub mod gemini;
pub mod koneps;
pub mod naver;
pub mod tavily;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use filter::filter_target_bids;
pub use gemini::{DocumentRequest, GeminiClient, GenerationConfig};
pub use koneps::{normalize_items, plan_backfill_windows, KonepsClient, KonepsEndpoint};
pub use naver::{GrantCrawl, NaverNewsClient};
pub use tavily::{SearchHit, TavilyClient};

pub const CRATE_NAME: &str = "psis-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("missing credential {0}")]
    MissingCredential(&'static str),
    #[error("upstream API error: {0}")]
    UpstreamApi(String),
    #[error("network error: {0}")]
    Network(#[from] FetchError),
    #[error("could not parse LLM reply: {0}")]
    Parse(String),
}

/// HTTP seam between adapters and the network.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        source_id: &str,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<FetchedResponse, FetchError>;

    async fn post_json(
        &self,
        source_id: &str,
        url: &str,
        query: &[(&str, String)],
        body: &JsonValue,
    ) -> Result<FetchedResponse, FetchError>;
}

#[async_trait]
impl Transport for HttpFetcher {
    async fn get(
        &self,
        source_id: &str,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<FetchedResponse, FetchError> {
        HttpFetcher::get(self, source_id, url, query, headers).await
    }

    async fn post_json(
        &self,
        source_id: &str,
        url: &str,
        query: &[(&str, String)],
        body: &JsonValue,
    ) -> Result<FetchedResponse, FetchError> {
        HttpFetcher::post_json(self, source_id, url, query, body).await
    }
}

/// Keep only `[A-Za-z0-9_-]`. Secrets pasted from dashboards often carry
/// quotes, whitespace or line breaks.
pub fn sanitize_credential(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Provider bodies that are not JSON usually mean a blocked URL or an
/// exhausted quota page.
pub(crate) fn decode_json<T: DeserializeOwned>(
    source_id: &str,
    response: &FetchedResponse,
) -> Result<T, AdapterError> {
    serde_json::from_slice(&response.body).map_err(|err| {
        AdapterError::UpstreamApi(format!(
            "{source_id} returned a non-JSON body ({err}); the URL may be blocked or the quota exhausted"
        ))
    })
}

/// Text of a JSON scalar; numbers are rendered, everything else is empty.
pub(crate) fn json_text(value: Option<&JsonValue>) -> String {
    match value {
        Some(JsonValue::String(s)) => s.trim().to_string(),
        Some(JsonValue::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_everything_outside_the_key_alphabet() {
        assert_eq!(sanitize_credential("  \"abc-DEF_123\"\n"), "abc-DEF_123");
        assert_eq!(sanitize_credential("a+b/c=="), "abc");
        assert_eq!(sanitize_credential("키"), "");
    }

    #[test]
    fn json_text_renders_scalars() {
        let value = serde_json::json!({"s": " x ", "n": 1500000, "b": true});
        assert_eq!(json_text(value.get("s")), "x");
        assert_eq!(json_text(value.get("n")), "1500000");
        assert_eq!(json_text(value.get("b")), "");
        assert_eq!(json_text(value.get("missing")), "");
    }
}
