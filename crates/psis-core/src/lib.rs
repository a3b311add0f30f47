//! Core domain model for PSIS: bids, grants, contacts and target schools.

use std::fmt;

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "psis-core";

/// Date format used for every persisted calendar date.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Timestamp format used for `crawled_at` columns.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Procurement stage a bid row was observed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeStage {
    BidNotice,
    PreSpec,
}

impl NoticeStage {
    /// Placeholder stored in `successful_bidder` until an award is known.
    pub fn bidder_placeholder(self) -> &'static str {
        match self {
            NoticeStage::BidNotice => "미상(공고 단계)",
            NoticeStage::PreSpec => "미상(사전규격 단계)",
        }
    }
}

/// Normalized bid handed from the relevance filter to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBid {
    pub bid_title: String,
    pub demand_agency: String,
    pub successful_bidder: String,
    /// Opaque text; provider price formats vary.
    pub bid_price: String,
    pub introduced_items: String,
    pub contract_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidRecord {
    pub id: i64,
    pub bid_title: String,
    pub demand_agency: String,
    pub successful_bidder: String,
    pub bid_price: String,
    pub introduced_items: String,
    pub contract_date: String,
}

impl BidRecord {
    pub fn contract_day(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(self.contract_date.trim(), DATE_FORMAT).ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGrant {
    pub project_name: String,
    pub agency: String,
    /// Best-effort guess taken from the headline.
    pub selected_school: String,
    pub budget_scale: String,
    pub notice_url: String,
    pub status: String,
    pub crawled_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRecord {
    pub id: i64,
    pub project_name: String,
    pub agency: String,
    pub selected_school: String,
    pub budget_scale: String,
    pub notice_url: String,
    pub status: String,
    pub crawled_at: String,
}

/// Contact as extracted from a faculty page. Every field is optional on the
/// wire, so missing keys deserialize to empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NewContact {
    pub school_name: String,
    pub name: String,
    pub department: String,
    pub email: String,
    pub phone: String,
    pub research_area: String,
    pub source_url: String,
}

impl NewContact {
    /// Blank e-mails never take part in deduplication.
    pub fn dedup_email(&self) -> Option<&str> {
        let email = self.email.trim();
        (!email.is_empty()).then_some(email)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id: i64,
    pub school_name: String,
    pub name: String,
    pub department: String,
    pub email: String,
    pub phone: String,
    pub research_area: String,
    pub source_url: String,
    pub crawled_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSchool {
    pub school_name: String,
    pub category: String,
    pub contact: String,
    pub existing_equipments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSchool {
    pub id: i64,
    pub school_name: String,
    pub category: String,
    pub contact: String,
    pub existing_equipments: String,
}

/// Inclusive calendar-day range used for provider queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Window of `days` days ending on `end`, clamped at the earliest
    /// representable date.
    pub fn ending_on(end: NaiveDate, days: u32) -> Self {
        let start = end
            .checked_sub_signed(chrono::Duration::days(i64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end }
    }

    pub fn span_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ~ {}",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

/// Bids whose contract date falls between five and three years before
/// `today`, the usual equipment replacement cycle. Input order is kept.
pub fn replacement_targets(bids: &[BidRecord], today: NaiveDate) -> Vec<&BidRecord> {
    let (Some(oldest), Some(newest)) = (
        today.checked_sub_months(Months::new(60)),
        today.checked_sub_months(Months::new(36)),
    ) else {
        return Vec::new();
    };
    bids.iter()
        .filter(|bid| {
            bid.contract_day()
                .is_some_and(|day| day >= oldest && day <= newest)
        })
        .collect()
}

/// Congratulation mail draft for a freshly detected grant.
pub fn grant_outreach_email(grant: &GrantRecord) -> String {
    let headline: String = grant.project_name.chars().take(20).collect();
    format!(
        "제목: [{school}] {headline}... 선정을 진심으로 축하드립니다!\n\n\
         안녕하세요, 교수님.\n\
         이번에 귀교가 대규모 국고 지원 사업에 선정되셨다는 반가운 소식을 뉴스({url})를 통해 접했습니다.\n\
         예산 집행 계획과 관련하여, 저희가 타 대학 사업단에 성공적으로 구축한 3D CAD 및 디지털 트윈 실습실 레퍼런스를 공유해 드릴까 합니다.\n\
         편하신 시간에 연락 주십시오.",
        school = grant.selected_school,
        url = grant.notice_url,
    )
}
