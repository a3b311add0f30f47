//! In-memory [`Transport`] that replays scripted responses in order and
//! records every request it sees.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use psis_storage::{FetchError, FetchedResponse, StatusCode};
use serde_json::Value as JsonValue;

use crate::Transport;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub source_id: String,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<JsonValue>,
}

impl RecordedRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

enum Scripted {
    Body(Vec<u8>),
    Status(u16),
}

#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_json(&self, value: JsonValue) {
        self.push(Scripted::Body(value.to_string().into_bytes()));
    }

    pub fn respond_text(&self, text: &str) {
        self.push(Scripted::Body(text.as_bytes().to_vec()));
    }

    /// Next request fails the way an unreachable or erroring host does.
    pub fn fail_with_status(&self, status: u16) {
        self.push(Scripted::Status(status));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    fn push(&self, item: Scripted) {
        self.script.lock().expect("script lock").push_back(item);
    }

    fn answer(&self, request: RecordedRequest) -> Result<FetchedResponse, FetchError> {
        let url = request.url.clone();
        self.requests.lock().expect("requests lock").push(request);
        match self.script.lock().expect("script lock").pop_front() {
            Some(Scripted::Body(body)) => Ok(FetchedResponse {
                status: StatusCode::OK,
                final_url: url,
                body,
            }),
            Some(Scripted::Status(status)) => Err(FetchError::HttpStatus {
                status,
                url,
                detail: "scripted failure".to_string(),
            }),
            None => Err(FetchError::HttpStatus {
                status: 599,
                url,
                detail: "script exhausted".to_string(),
            }),
        }
    }
}

fn owned_pairs(pairs: &[(&str, String)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(
        &self,
        source_id: &str,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<FetchedResponse, FetchError> {
        self.answer(RecordedRequest {
            source_id: source_id.to_string(),
            url: url.to_string(),
            query: owned_pairs(query),
            headers: owned_pairs(headers),
            body: None,
        })
    }

    async fn post_json(
        &self,
        source_id: &str,
        url: &str,
        query: &[(&str, String)],
        body: &JsonValue,
    ) -> Result<FetchedResponse, FetchError> {
        self.answer(RecordedRequest {
            source_id: source_id.to_string(),
            url: url.to_string(),
            query: owned_pairs(query),
            headers: Vec::new(),
            body: Some(body.clone()),
        })
    }
}
