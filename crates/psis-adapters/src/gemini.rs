//! Gemini `generateContent` client used for faculty contact extraction and
//! spec-in document drafting.

use std::sync::Arc;

use psis_core::NewContact;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::{decode_json, json_text, AdapterError, Transport};

pub const LLM_SOURCE_ID: &str = "gemini";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationConfig {
    pub temperature: f64,
    pub max_output_tokens: u32,
}

impl GenerationConfig {
    /// Low temperature for structured output.
    pub const EXTRACTION: Self = Self {
        temperature: 0.1,
        max_output_tokens: 2048,
    };

    pub const DOCUMENT: Self = Self {
        temperature: 0.5,
        max_output_tokens: 2048,
    };
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

/// Inputs for a spec-in proposal aimed at a school's procurement staff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentRequest {
    pub school_name: String,
    pub project_name: String,
    pub budget: String,
    pub solution_name: String,
    pub extra_points: String,
}

impl DocumentRequest {
    pub fn prompt(&self) -> String {
        let extra = if self.extra_points.trim().is_empty() {
            "없음"
        } else {
            self.extra_points.trim()
        };
        format!(
            "너는 교육기관 대상 B2G 영업 전문가이자 조달 규격서 작성 전문가야.\n\
             아래 정보를 바탕으로 '{school}' 담당자에게 전달할 사전 규격 제안서(스펙인 문서)를 작성해줘.\n\n\
             - 기관명: {school}\n\
             - 사업명: {project}\n\
             - 예산 규모: {budget}\n\
             - 제안 솔루션: {solution}\n\
             - 강조 사항: {extra}\n\n\
             문서는 다음 순서로 구성해.\n\
             1. 사업 개요 및 도입 필요성\n\
             2. 권장 규격(하드웨어/소프트웨어 요구사항 표)\n\
             3. 교육 과정 연계 방안\n\
             4. 기대 효과\n\
             5. 담당자 안내 문구\n\n\
             특정 업체명을 직접 노출하지 말고, 조달 규격서에 그대로 옮길 수 있는 객관적 문체로 작성해.",
            school = self.school_name.trim(),
            project = self.project_name.trim(),
            budget = self.budget.trim(),
            solution = self.solution_name.trim(),
            extra = extra,
        )
    }
}

pub fn contact_extraction_prompt(school_name: &str, content: &str) -> String {
    format!(
        "다음 텍스트는 '{school_name}'의 3D CAD, 설계, 제조, 디자인, 디지털 트윈, 시뮬레이션, 스마트팩토리 관련 학과 \
         홈페이지 및 교수진 검색 결과야.\n\
         해당 분야의 과목을 가르치거나 연구할 가능성이 있는 교수들의 정보를 추출해줘.\n\n\
         반드시 아래 형식의 JSON 배열만 응답하고, 설명이나 코드블록은 붙이지 마.\n\
         [{{\"school_name\": \"{school_name}\", \"name\": \"이름\", \"department\": \"소속학과\", \
         \"email\": \"이메일주소\", \"phone\": \"전화번호\", \"research_area\": \"연구분야\", \"source_url\": \"\"}}]\n\n\
         관련 교수 정보가 없으면 빈 배열 [] 을 반환해.\n\n\
         [검색 결과 내용 시작]\n{content}\n[검색 결과 내용 끝]\n"
    )
}

/// The outermost `[...]` span of an LLM reply, parsed as a JSON array.
/// Models wrap arrays in prose or code fences often enough that the whole
/// reply cannot be parsed directly.
pub fn extract_json_array(reply: &str) -> Result<Vec<JsonValue>, AdapterError> {
    let (Some(open), Some(close)) = (reply.find('['), reply.rfind(']')) else {
        return Err(AdapterError::Parse("reply contains no JSON array".to_string()));
    };
    if close < open {
        return Err(AdapterError::Parse("reply contains no JSON array".to_string()));
    }
    serde_json::from_str(&reply[open..=close])
        .map_err(|err| AdapterError::Parse(format!("invalid JSON array: {err}")))
}

/// Models emit `null` or numbers for fields they could not read, so every
/// column goes through [`json_text`].
fn contact_from_row(row: &JsonValue, school_name: &str, source_url: &str) -> NewContact {
    let field = |name: &str| json_text(row.get(name));
    let or = |value: String, fallback: &str| {
        if value.is_empty() {
            fallback.to_string()
        } else {
            value
        }
    };
    NewContact {
        school_name: or(field("school_name"), school_name),
        name: field("name"),
        department: field("department"),
        email: field("email"),
        phone: field("phone"),
        research_area: field("research_area"),
        source_url: or(field("source_url"), source_url),
    }
}

#[derive(Clone)]
pub struct GeminiClient {
    transport: Arc<dyn Transport>,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(transport: Arc<dyn Transport>, api_key: String) -> Self {
        Self {
            transport,
            api_key,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{API_BASE}/{}:generateContent", self.model)
    }

    /// Text of the first candidate's first part.
    pub async fn generate(
        &self,
        prompt: &str,
        config: GenerationConfig,
    ) -> Result<String, AdapterError> {
        let body = json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {
                "temperature": config.temperature,
                "maxOutputTokens": config.max_output_tokens,
            },
        });
        let url = self.endpoint();
        let response = self
            .transport
            .post_json(LLM_SOURCE_ID, &url, &[("key", self.api_key.clone())], &body)
            .await?;
        let parsed: GenerateResponse = decode_json(LLM_SOURCE_ID, &response)?;
        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .and_then(|part| part.text)
            .ok_or_else(|| AdapterError::Parse("reply has no candidate text".to_string()))
    }

    /// Faculty contacts found in one search hit. Rows without a name are
    /// dropped; missing school and source fields are filled from the caller.
    pub async fn extract_contacts(
        &self,
        school_name: &str,
        source_url: &str,
        content: &str,
    ) -> Result<Vec<NewContact>, AdapterError> {
        let reply = self
            .generate(
                &contact_extraction_prompt(school_name, content),
                GenerationConfig::EXTRACTION,
            )
            .await?;
        let rows = extract_json_array(&reply)?;
        let total = rows.len();
        let contacts: Vec<NewContact> = rows
            .into_iter()
            .map(|row| contact_from_row(&row, school_name, source_url))
            .filter(|contact| !contact.name.is_empty())
            .collect();
        debug!(source_url, total, kept = contacts.len(), "extracted contacts");
        Ok(contacts)
    }

    pub async fn generate_document(&self, request: &DocumentRequest) -> Result<String, AdapterError> {
        self.generate(&request.prompt(), GenerationConfig::DOCUMENT).await
    }
}
