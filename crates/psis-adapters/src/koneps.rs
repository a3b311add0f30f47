//! Public procurement (KONEPS / data.go.kr) bid and pre-spec endpoints.
//!
//! The provider rejects query ranges much longer than a month, so long spans
//! are walked backward in 30-day windows by [`plan_backfill_windows`]. Each
//! window is fetched with [`KonepsClient::fetch_window`], which follows pages
//! up to the configured row cap.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use psis_core::{DateWindow, NoticeStage};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{decode_json, json_text, AdapterError, Transport};

pub const SUCCESS_CODE: &str = "00";
pub const BACKFILL_WINDOW_DAYS: i64 = 30;
/// Extra iterations allowed beyond `ceil(span / 30)` before the walk gives up.
pub const BACKFILL_LOOP_BUFFER: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KonepsEndpoint {
    pub source_id: &'static str,
    pub url: &'static str,
    pub page_size: usize,
    pub inqry_div: Option<&'static str>,
    pub stage: NoticeStage,
}

impl KonepsEndpoint {
    pub const fn bid_notices() -> Self {
        Self {
            source_id: "koneps-bids",
            url: "https://apis.data.go.kr/1230000/ad/BidPublicInfoService/getBidPblancListInfoServc",
            page_size: 200,
            inqry_div: Some("1"),
            stage: NoticeStage::BidNotice,
        }
    }

    pub const fn pre_spec() -> Self {
        Self {
            source_id: "koneps-pre-spec",
            url: "https://apis.data.go.kr/1230000/ao/HrcspsSstndrdInfoService/getOpnSstndrdInfoListServc",
            page_size: 100,
            inqry_div: None,
            stage: NoticeStage::PreSpec,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    response: ResponseBody,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseBody {
    #[serde(default)]
    header: Header,
    #[serde(default)]
    body: Body,
}

#[derive(Debug, Default, Deserialize)]
struct Header {
    #[serde(rename = "resultCode", default)]
    result_code: JsonValue,
    #[serde(rename = "resultMsg", default)]
    result_msg: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Body {
    #[serde(default)]
    items: JsonValue,
    #[serde(rename = "totalCount", default)]
    total_count: JsonValue,
}

/// One decoded page of provider rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemsPage {
    pub items: Vec<JsonValue>,
    pub total_count: Option<usize>,
}

/// Decode the `{response:{header,body}}` envelope, failing on any result
/// code other than `"00"`.
pub fn parse_envelope(source_id: &str, envelope: JsonValue) -> Result<ItemsPage, AdapterError> {
    let envelope: Envelope = serde_json::from_value(envelope).map_err(|err| {
        AdapterError::UpstreamApi(format!("{source_id} returned an unexpected envelope: {err}"))
    })?;
    let header = envelope.response.header;
    let code = json_text(Some(&header.result_code));
    if code != SUCCESS_CODE {
        let message = header
            .result_msg
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| format!("unknown API error (resultCode={code:?})"));
        return Err(AdapterError::UpstreamApi(message));
    }

    let body = envelope.response.body;
    let total_count = json_text(Some(&body.total_count)).parse::<usize>().ok();
    Ok(ItemsPage {
        items: normalize_items(&body.items),
        total_count,
    })
}

/// The provider sends `items` as an array, as `{item: ...}`, as a bare
/// object when there is one row, or as `""` when there are none.
pub fn normalize_items(items: &JsonValue) -> Vec<JsonValue> {
    match items {
        JsonValue::Null => Vec::new(),
        JsonValue::String(s) if s.trim().is_empty() => Vec::new(),
        JsonValue::Array(rows) => rows.clone(),
        JsonValue::Object(map) if map.is_empty() => Vec::new(),
        JsonValue::Object(map) => match map.get("item") {
            Some(inner) => normalize_items(inner),
            None => vec![items.clone()],
        },
        other => vec![other.clone()],
    }
}

/// Backward 30-day windows tiling `[end - 365*years days, end]`, newest
/// first. Adjacent windows share no day and leave no gap. Spans reaching
/// past the earliest representable date stop there.
pub fn plan_backfill_windows(end: NaiveDate, years: u32) -> Vec<DateWindow> {
    let start = Duration::try_days(365 * i64::from(years))
        .and_then(|span| end.checked_sub_signed(span))
        .unwrap_or(NaiveDate::MIN);
    let span_days = (end - start).num_days().max(0) as usize;
    let max_loops = span_days.div_ceil(BACKFILL_WINDOW_DAYS as usize) + BACKFILL_LOOP_BUFFER;

    let mut windows = Vec::new();
    let mut current_end = end;
    while current_end >= start && windows.len() < max_loops {
        let current_start = current_end
            .checked_sub_signed(Duration::days(BACKFILL_WINDOW_DAYS))
            .unwrap_or(NaiveDate::MIN)
            .max(start);
        windows.push(DateWindow::new(current_start, current_end));
        let Some(next_end) = current_start.pred_opt() else {
            break;
        };
        current_end = next_end;
    }
    windows
}

pub fn inquiry_begin(window: &DateWindow) -> String {
    window.start.format("%Y%m%d0000").to_string()
}

pub fn inquiry_end(window: &DateWindow) -> String {
    window.end.format("%Y%m%d2359").to_string()
}

/// Paginated client for one KONEPS endpoint.
#[derive(Clone)]
pub struct KonepsClient {
    transport: Arc<dyn Transport>,
    service_key: String,
    endpoint: KonepsEndpoint,
    row_cap: usize,
}

impl KonepsClient {
    pub fn new(transport: Arc<dyn Transport>, service_key: String, endpoint: KonepsEndpoint) -> Self {
        Self {
            transport,
            service_key,
            row_cap: endpoint.page_size,
            endpoint,
        }
    }

    /// Upper bound on rows collected per window; at least one page is read.
    pub fn with_row_cap(mut self, row_cap: usize) -> Self {
        self.row_cap = row_cap.max(1);
        self
    }

    pub fn endpoint(&self) -> KonepsEndpoint {
        self.endpoint
    }

    /// All raw rows for `window`, following pages until the provider's
    /// total or the row cap is reached. At most `row_cap / page_size`
    /// (rounded up) pages are requested.
    pub async fn fetch_window(&self, window: &DateWindow) -> Result<Vec<JsonValue>, AdapterError> {
        let max_pages = self.row_cap.div_ceil(self.endpoint.page_size.max(1)).max(1);
        let mut rows = Vec::new();
        let mut page_no = 1usize;
        loop {
            let page = self.fetch_page(window, page_no).await?;
            let received = page.items.len();
            rows.extend(page.items);
            let target = page
                .total_count
                .map_or(self.row_cap, |total| total.min(self.row_cap));
            debug!(
                source_id = self.endpoint.source_id,
                %window,
                page_no,
                received,
                target,
                "fetched page"
            );
            if received == 0 || rows.len() >= target || page_no >= max_pages {
                break;
            }
            page_no += 1;
        }
        rows.truncate(self.row_cap);
        Ok(rows)
    }

    pub async fn fetch_page(
        &self,
        window: &DateWindow,
        page_no: usize,
    ) -> Result<ItemsPage, AdapterError> {
        let mut query = vec![
            ("serviceKey", self.service_key.clone()),
            ("numOfRows", self.endpoint.page_size.to_string()),
            ("pageNo", page_no.to_string()),
            ("inqryBgnDt", inquiry_begin(window)),
            ("inqryEndDt", inquiry_end(window)),
        ];
        if let Some(div) = self.endpoint.inqry_div {
            query.push(("inqryDiv", div.to_string()));
        }
        query.push(("type", "json".to_string()));

        let response = self
            .transport
            .get(self.endpoint.source_id, self.endpoint.url, &query, &[])
            .await?;
        let envelope: JsonValue = decode_json(self.endpoint.source_id, &response)?;
        parse_envelope(self.endpoint.source_id, envelope)
    }
}
