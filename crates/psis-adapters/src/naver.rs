//! Grant-award news from the Naver news search API.

use std::collections::HashSet;
use std::sync::Arc;

use psis_core::NewGrant;
use scraper::Html;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{decode_json, AdapterError, Transport};

pub const NEWS_SOURCE_ID: &str = "naver-news";
pub const NEWS_URL: &str = "https://openapi.naver.com/v1/search/news.json";
pub const NEWS_DISPLAY: usize = 20;

pub const GRANT_QUERIES: &[&str] = &[
    "\"선정 완료\" 대학 사업",
    "\"최종 선정\" 대학교 사업",
    "\"사업비 확보\" 대학",
    "글로컬 대학 최종 선정",
    "첨단산업 부트캠프 사업 선정",
    "소프트웨어 중심대학 선정 발표",
    "디지털 혁신공유대학 선정 명단",
    "직업전환교육기관 지정 결과",
];

/// At least one must appear for an article to count as an award announcement.
pub const MUST_INCLUDE: &[&str] = &[
    "선정", "확정", "지정", "발표", "사업비", "축하", "수주", "확보", "명단",
];

/// Recruiting and event notices that reuse award vocabulary.
pub const MUST_EXCLUDE: &[&str] = &[
    "모집", "교육생", "참가자", "인턴", "신입생", "수강생", "특강", "설명회",
];

pub const NEWS_AGENCY: &str = "네이버 뉴스";
pub const NEWS_BUDGET_SCALE: &str = "기사 원문 참조";
pub const NEWS_STATUS: &str = "선정완료(뉴스)";
pub const SCHOOL_PLACEHOLDER: &str = "확인 필요(제목 참조)";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NewsItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub originallink: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub description: String,
}

impl NewsItem {
    /// Publisher URL when present, otherwise the Naver mirror.
    pub fn canonical_link(&self) -> &str {
        if self.originallink.trim().is_empty() {
            self.link.trim()
        } else {
            self.originallink.trim()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct NewsPage {
    #[serde(default)]
    items: Vec<NewsItem>,
}

/// Outcome of one pass over [`GRANT_QUERIES`].
#[derive(Debug, Default)]
pub struct GrantCrawl {
    pub grants: Vec<NewGrant>,
    pub failed_queries: Vec<(String, AdapterError)>,
}

#[derive(Clone)]
pub struct NaverNewsClient {
    transport: Arc<dyn Transport>,
    client_id: String,
    client_secret: String,
}

impl NaverNewsClient {
    pub fn new(transport: Arc<dyn Transport>, client_id: String, client_secret: String) -> Self {
        Self {
            transport,
            client_id,
            client_secret,
        }
    }

    pub async fn search(&self, query: &str) -> Result<Vec<NewsItem>, AdapterError> {
        let params = [
            ("query", query.to_string()),
            ("display", NEWS_DISPLAY.to_string()),
            ("sort", "sim".to_string()),
        ];
        let headers = [
            ("X-Naver-Client-Id", self.client_id.clone()),
            ("X-Naver-Client-Secret", self.client_secret.clone()),
        ];
        let response = self
            .transport
            .get(NEWS_SOURCE_ID, NEWS_URL, &params, &headers)
            .await?;
        let page: NewsPage = decode_json(NEWS_SOURCE_ID, &response)?;
        Ok(page.items)
    }

    /// Run every grant query in order. A failing query is recorded and the
    /// crawl moves on; links already seen in this pass are skipped. Items
    /// without any link are never treated as repeats.
    pub async fn crawl_grants(&self, crawled_at: &str) -> GrantCrawl {
        let mut crawl = GrantCrawl::default();
        let mut seen_links = HashSet::new();
        for query in GRANT_QUERIES {
            let items = match self.search(query).await {
                Ok(items) => items,
                Err(err) => {
                    warn!(query, error = %err, "grant news query failed");
                    crawl.failed_queries.push((query.to_string(), err));
                    continue;
                }
            };
            let before = crawl.grants.len();
            for item in items {
                let link = item.canonical_link();
                if !link.is_empty() && !seen_links.insert(link.to_string()) {
                    continue;
                }
                if let Some(grant) = grant_from_news(&item, crawled_at) {
                    crawl.grants.push(grant);
                }
            }
            debug!(query, kept = crawl.grants.len() - before, "grant news query done");
        }
        crawl
    }
}

/// Text content of a snippet with `<b>` highlights and entities resolved.
pub fn strip_markup(raw: &str) -> String {
    let fragment = Html::parse_fragment(raw);
    fragment.root_element().text().collect::<String>().trim().to_string()
}

pub fn is_award_announcement(text: &str) -> bool {
    let text = text.to_lowercase();
    MUST_INCLUDE.iter().any(|k| text.contains(k)) && !MUST_EXCLUDE.iter().any(|k| text.contains(k))
}

pub fn grant_from_news(item: &NewsItem, crawled_at: &str) -> Option<NewGrant> {
    let title = strip_markup(&item.title);
    let description = strip_markup(&item.description);
    if !is_award_announcement(&format!("{title} {description}")) {
        return None;
    }
    Some(NewGrant {
        selected_school: guess_school(&title),
        project_name: title,
        agency: NEWS_AGENCY.to_string(),
        budget_scale: NEWS_BUDGET_SCALE.to_string(),
        notice_url: item.canonical_link().to_string(),
        status: NEWS_STATUS.to_string(),
        crawled_at: crawled_at.to_string(),
    })
}

/// First title word naming a school, when the headline mentions one.
pub fn guess_school(title: &str) -> String {
    if !(title.contains("대학") || title.contains("학교")) {
        return SCHOOL_PLACEHOLDER.to_string();
    }
    title
        .split_whitespace()
        .find(|word| word.contains('대') || word.contains("학교"))
        .map(str::to_string)
        .unwrap_or_else(|| SCHOOL_PLACEHOLDER.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::ScriptedTransport;
    use serde_json::json;

    fn item(title: &str, description: &str, link: &str) -> NewsItem {
        NewsItem {
            title: title.into(),
            originallink: link.into(),
            link: format!("https://n.news.naver.com/{link}"),
            description: description.into(),
        }
    }

    #[test]
    fn award_news_is_kept() {
        let grant = grant_from_news(
            &item("<b>한국대학교</b> 글로컬대학 최종 선정", "5년간 1000억 지원", "https://a/1"),
            "2026-10-18 09:00:00",
        )
        .unwrap();
        assert_eq!(grant.project_name, "한국대학교 글로컬대학 최종 선정");
        assert_eq!(grant.selected_school, "한국대학교");
        assert_eq!(grant.agency, NEWS_AGENCY);
        assert_eq!(grant.status, NEWS_STATUS);
        assert_eq!(grant.notice_url, "https://a/1");
    }

    #[test]
    fn recruiting_news_is_dropped_even_when_it_says_selected() {
        let news = item("부트캠프 사업 선정 기념 교육생 모집", "", "https://a/2");
        assert!(grant_from_news(&news, "").is_none());
    }

    #[test]
    fn news_without_award_vocabulary_is_dropped() {
        assert!(grant_from_news(&item("대학 축제 개최", "", "https://a/3"), "").is_none());
    }

    #[test]
    fn school_guess_falls_back_to_placeholder() {
        assert_eq!(guess_school("정부 R&D 예산 확정"), SCHOOL_PLACEHOLDER);
        assert_eq!(guess_school("부산대학교, SW중심대학 선정"), "부산대학교,");
    }

    #[test]
    fn markup_and_entities_are_stripped() {
        assert_eq!(strip_markup("<b>AI</b> &amp; 디지털 &quot;선정&quot;"), "AI & 디지털 \"선정\"");
    }

    #[test]
    fn canonical_link_prefers_the_publisher() {
        let mut news = item("", "", "https://press/1");
        assert_eq!(news.canonical_link(), "https://press/1");
        news.originallink.clear();
        assert_eq!(news.canonical_link(), "https://n.news.naver.com/https://press/1");
    }

    #[tokio::test]
    async fn items_without_links_are_not_collapsed() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond_json(json!({"items": [
            {"title": "한국대학교 글로컬대학 최종 선정", "originallink": "", "link": "", "description": ""},
            {"title": "부산대학교 SW중심대학 선정", "originallink": "", "link": "", "description": ""},
        ]}));
        let client = NaverNewsClient::new(transport, "id".into(), "secret".into());
        let crawl = client.crawl_grants("2026-10-18 09:00:00").await;

        let schools: Vec<&str> = crawl.grants.iter().map(|g| g.selected_school.as_str()).collect();
        assert_eq!(schools, vec!["한국대학교", "부산대학교"]);
        assert_eq!(crawl.failed_queries.len(), GRANT_QUERIES.len() - 1);
    }

    #[tokio::test]
    async fn crawl_skips_failed_queries_and_repeated_links() {
        let transport = Arc::new(ScriptedTransport::new());
        let page = json!({"items": [
            {"title": "한국대학교 글로컬대학 최종 선정", "originallink": "https://press/1", "link": "", "description": ""},
        ]});
        transport.fail_with_status(500);
        for _ in 1..GRANT_QUERIES.len() {
            transport.respond_json(page.clone());
        }
        let client = NaverNewsClient::new(transport.clone(), "id".into(), "secret".into());
        let crawl = client.crawl_grants("2026-10-18 09:00:00").await;

        assert_eq!(crawl.grants.len(), 1);
        assert_eq!(crawl.failed_queries.len(), 1);
        assert_eq!(crawl.failed_queries[0].0, GRANT_QUERIES[0]);

        let requests = transport.requests();
        assert_eq!(requests.len(), GRANT_QUERIES.len());
        assert_eq!(requests[1].param("query"), Some(GRANT_QUERIES[1]));
        assert_eq!(requests[1].param("display"), Some("20"));
        assert_eq!(requests[1].param("sort"), Some("sim"));
        assert_eq!(requests[1].header("x-naver-client-id"), Some("id"));
        assert_eq!(requests[1].header("X-Naver-Client-Secret"), Some("secret"));
    }
}
