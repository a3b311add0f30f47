//! Relevance filter for procurement rows: education-sector buyers that are
//! tendering CAD / 3D / digital-twin work.

use psis_core::{NewBid, NoticeStage};
use serde_json::Value as JsonValue;

use crate::json_text;

/// Bump when either list below changes.
pub const BID_FILTER_VERSION: u32 = 1;

pub const TARGET_AGENCIES: &[&str] = &[
    "고등학교",
    "대학교",
    "대학",
    "산학협력단",
    "직업훈련",
    "폴리텍",
    "마이스터",
    "과학고",
    "영재학교",
    "정보고",
    "기술고",
    "특성화",
    "교육청",
    "교육원",
    "인력개발",
    "직업전문",
];

/// Matched against the upper-cased notice title.
pub const TARGET_KEYWORDS: &[&str] = &[
    "3D",
    "CAD",
    "캐드",
    "설계",
    "디지털 트윈",
    "디지털트윈",
    "실습실",
    "소프트웨어",
    "SW",
    "3D프린터",
    "메타버스",
    "기계",
    "역설계",
    "엔지니어링",
    "스마트팩토리",
    "카티아",
    "CATIA",
    "솔리드웍스",
    "SOLIDWORKS",
    "설계소프트웨어",
];

// Bid notices and pre-spec rows name the same facts differently.
const AGENCY_FIELDS: &[&str] = &["dmdInsttNm", "rlDminsttNm", "orderInsttNm"];
const TITLE_FIELDS: &[&str] = &["bidNtceNm", "prdctClsfcNoNm"];
const DATE_FIELDS: &[&str] = &["bidNtceDt", "rcptDt"];
const PRICE_FIELDS: &[&str] = &["asignBdgtAmt", "presmptPrce"];

pub fn agency_matches(agency: &str) -> bool {
    TARGET_AGENCIES.iter().any(|needle| agency.contains(needle))
}

pub fn title_matches(title: &str) -> bool {
    let upper = title.to_uppercase();
    TARGET_KEYWORDS.iter().any(|needle| upper.contains(needle))
}

/// Keep rows whose agency AND title both match, in input order.
pub fn filter_target_bids(items: &[JsonValue], stage: NoticeStage) -> Vec<NewBid> {
    items
        .iter()
        .filter_map(|item| normalize_bid(item, stage))
        .collect()
}

fn normalize_bid(item: &JsonValue, stage: NoticeStage) -> Option<NewBid> {
    let demand_agency = first_text(item, AGENCY_FIELDS);
    let bid_title = first_text(item, TITLE_FIELDS);
    if !(agency_matches(&demand_agency) && title_matches(&bid_title)) {
        return None;
    }
    Some(NewBid {
        bid_title,
        demand_agency,
        successful_bidder: stage.bidder_placeholder().to_string(),
        bid_price: first_text(item, PRICE_FIELDS),
        introduced_items: String::new(),
        contract_date: normalize_notice_date(&first_text(item, DATE_FIELDS)),
    })
}

fn first_text(item: &JsonValue, fields: &[&str]) -> String {
    fields
        .iter()
        .map(|field| json_text(item.get(*field)))
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

/// `2024-01-15 10:00:00` and `20240115` both become `2024-01-15`.
pub fn normalize_notice_date(raw: &str) -> String {
    let raw = raw.trim();
    let digits: Vec<char> = raw.chars().take(8).collect();
    if digits.len() == 8 && digits.iter().all(char::is_ascii_digit) {
        let d: String = digits.into_iter().collect();
        return format!("{}-{}-{}", &d[0..4], &d[4..6], &d[6..8]);
    }
    raw.chars().take(10).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn agency_and_keyword_must_both_match() {
        let items = vec![
            json!({"dmdInsttNm": "서울대학교 산학협력단", "bidNtceNm": "3D CAD 실습실 구축", "bidNtceDt": "20240115"}),
            json!({"dmdInsttNm": "서울대학교", "bidNtceNm": "청소 용역", "bidNtceDt": "20240116"}),
            json!({"dmdInsttNm": "서울특별시청", "bidNtceNm": "3D 프린터 구매", "bidNtceDt": "20240117"}),
        ];
        let bids = filter_target_bids(&items, NoticeStage::BidNotice);
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].bid_title, "3D CAD 실습실 구축");
        assert_eq!(bids[0].demand_agency, "서울대학교 산학협력단");
        assert_eq!(bids[0].contract_date, "2024-01-15");
        assert_eq!(bids[0].successful_bidder, "미상(공고 단계)");
    }

    #[test]
    fn keyword_match_ignores_case() {
        assert!(title_matches("SolidWorks 라이선스 구매"));
        assert!(title_matches("cad 소프트웨어 유지보수"));
        assert!(!title_matches("급식 식자재 납품"));
    }

    #[test]
    fn output_preserves_input_order() {
        let items = vec![
            json!({"dmdInsttNm": "부산대학교", "bidNtceNm": "디지털트윈 플랫폼"}),
            json!({"dmdInsttNm": "경기도교육청", "bidNtceNm": "메타버스 교실"}),
            json!({"dmdInsttNm": "한국폴리텍대학", "bidNtceNm": "CATIA 교육장비"}),
        ];
        let titles: Vec<String> = filter_target_bids(&items, NoticeStage::BidNotice)
            .into_iter()
            .map(|b| b.bid_title)
            .collect();
        assert_eq!(titles, vec!["디지털트윈 플랫폼", "메타버스 교실", "CATIA 교육장비"]);
    }

    #[test]
    fn price_prefers_assigned_budget_and_renders_numbers() {
        let items = vec![
            json!({"dmdInsttNm": "대학교", "bidNtceNm": "CAD", "asignBdgtAmt": 55000000, "presmptPrce": "50000000"}),
            json!({"dmdInsttNm": "대학교", "bidNtceNm": "3D", "asignBdgtAmt": "", "presmptPrce": "50000000"}),
            json!({"dmdInsttNm": "대학교", "bidNtceNm": "SW"}),
        ];
        let prices: Vec<String> = filter_target_bids(&items, NoticeStage::BidNotice)
            .into_iter()
            .map(|b| b.bid_price)
            .collect();
        assert_eq!(prices, vec!["55000000", "50000000", ""]);
    }

    #[test]
    fn pre_spec_rows_use_their_own_field_names() {
        let items = vec![json!({
            "rlDminsttNm": "한국기술교육대학교",
            "prdctClsfcNoNm": "3D프린터 실습장비",
            "rcptDt": "2024-03-02 09:00:00",
        })];
        let bids = filter_target_bids(&items, NoticeStage::PreSpec);
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].contract_date, "2024-03-02");
        assert_eq!(bids[0].successful_bidder, "미상(사전규격 단계)");
    }

    #[test]
    fn notice_dates_normalize() {
        assert_eq!(normalize_notice_date("2024-01-15 10:00:00"), "2024-01-15");
        assert_eq!(normalize_notice_date("202401151030"), "2024-01-15");
        assert_eq!(normalize_notice_date(""), "");
    }
}
