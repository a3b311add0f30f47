//! Faculty page search through the Tavily search API.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::{decode_json, AdapterError, Transport};

pub const SEARCH_SOURCE_ID: &str = "tavily-search";
pub const SEARCH_URL: &str = "https://api.tavily.com/search";
pub const MAX_RESULTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

pub fn faculty_query(school_name: &str) -> String {
    format!("{school_name} 기계공학과 OR 건축공학과 교수진 이름 이메일 연락처 연구분야")
}

#[derive(Clone)]
pub struct TavilyClient {
    transport: Arc<dyn Transport>,
    api_key: String,
}

impl TavilyClient {
    pub fn new(transport: Arc<dyn Transport>, api_key: String) -> Self {
        Self { transport, api_key }
    }

    /// Extracted page text for the school's engineering faculty listings.
    /// Hits with no content are dropped.
    pub async fn search_faculty(&self, school_name: &str) -> Result<Vec<SearchHit>, AdapterError> {
        let body = json!({
            "api_key": self.api_key,
            "query": faculty_query(school_name),
            "search_depth": "advanced",
            "include_raw_content": false,
            "max_results": MAX_RESULTS,
        });
        let response = self
            .transport
            .post_json(SEARCH_SOURCE_ID, SEARCH_URL, &[], &body)
            .await?;
        let parsed: SearchResponse = decode_json(SEARCH_SOURCE_ID, &response)?;
        Ok(parsed
            .results
            .into_iter()
            .filter(|hit| !hit.content.trim().is_empty())
            .collect())
    }
}
