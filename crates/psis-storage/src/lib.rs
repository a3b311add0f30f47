//! SQLite record store + HTTP fetch utilities for PSIS.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use psis_core::{
    BidRecord, ContactRecord, GrantRecord, NewBid, NewContact, NewGrant, NewSchool,
    TargetSchool, TIMESTAMP_FORMAT,
};
pub use reqwest::StatusCode;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Connection, Row};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info_span, Instrument};

pub const CRATE_NAME: &str = "psis-storage";

pub const DEFAULT_DB_PATH: &str = "db/sales_data.db";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS schools (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        school_name TEXT NOT NULL,
        category TEXT,
        contact TEXT,
        existing_equipments TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS grants (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_name TEXT NOT NULL,
        agency TEXT,
        selected_school TEXT,
        budget_scale TEXT,
        notice_url TEXT,
        status TEXT,
        crawled_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bid_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        bid_title TEXT NOT NULL,
        demand_agency TEXT,
        successful_bidder TEXT,
        bid_price TEXT,
        introduced_items TEXT,
        contract_date TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS contacts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        school_name TEXT NOT NULL,
        name TEXT NOT NULL,
        department TEXT,
        email TEXT,
        phone TEXT,
        research_area TEXT,
        source_url TEXT,
        crawled_at TEXT
    )
    "#,
];

/// Columns added after the first release. Each is patched in on its own so
/// one already-present column does not mask the others.
const ADDITIVE_COLUMNS: &[(&str, &str)] = &[
    ("grants", "status"),
    ("grants", "crawled_at"),
    ("grants", "agency"),
    ("bid_history", "bid_price"),
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("preparing store directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// File-backed relational store. Every operation opens its own connection
/// and closes it before returning.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self, create_if_missing: bool) -> Result<SqliteConnection, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(create_if_missing);
        Ok(SqliteConnection::connect_with(&options).await?)
    }

    /// Create missing tables and patch older schemas with newer columns.
    /// Safe to run on every start.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let mut conn = self.open(true).await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut conn).await?;
        }
        for &(table, column) in ADDITIVE_COLUMNS {
            let statement = format!("ALTER TABLE {table} ADD COLUMN {column} TEXT");
            match sqlx::query(&statement).execute(&mut conn).await {
                Ok(_) => debug!(table, column, "added column"),
                Err(err) if is_duplicate_column(&err) => {}
                Err(err) => return Err(err.into()),
            }
        }
        conn.close().await?;
        Ok(())
    }

    pub async fn check_connection(&self) -> bool {
        let Ok(mut conn) = self.open(true).await else {
            return false;
        };
        let ok = sqlx::query("SELECT 1").fetch_one(&mut conn).await.is_ok();
        let _ = conn.close().await;
        ok
    }

    /// Insert bids not yet present under the (title, agency) key.
    pub async fn insert_bids(&self, bids: &[NewBid]) -> Result<usize, StoreError> {
        let mut conn = self.open(true).await?;
        let mut added = 0usize;
        for bid in bids {
            let existing = sqlx::query(
                "SELECT id FROM bid_history WHERE bid_title = ? AND demand_agency = ?",
            )
            .bind(&bid.bid_title)
            .bind(&bid.demand_agency)
            .fetch_optional(&mut conn)
            .await?;
            if existing.is_some() {
                continue;
            }
            sqlx::query(
                r#"
                INSERT INTO bid_history
                    (bid_title, demand_agency, successful_bidder, bid_price, introduced_items, contract_date)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&bid.bid_title)
            .bind(&bid.demand_agency)
            .bind(&bid.successful_bidder)
            .bind(&bid.bid_price)
            .bind(&bid.introduced_items)
            .bind(&bid.contract_date)
            .execute(&mut conn)
            .await?;
            added += 1;
        }
        conn.close().await?;
        Ok(added)
    }

    /// Insert grants whose URL and project name are both unseen. A blank URL
    /// never matches.
    pub async fn insert_grants(&self, grants: &[NewGrant]) -> Result<usize, StoreError> {
        let mut conn = self.open(true).await?;
        let mut added = 0usize;
        for grant in grants {
            let existing = sqlx::query(
                "SELECT id FROM grants WHERE (notice_url = ? AND notice_url <> '') OR project_name = ?",
            )
            .bind(grant.notice_url.trim())
            .bind(&grant.project_name)
            .fetch_optional(&mut conn)
            .await?;
            if existing.is_some() {
                continue;
            }
            sqlx::query(
                r#"
                INSERT INTO grants
                    (project_name, agency, selected_school, budget_scale, notice_url, status, crawled_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&grant.project_name)
            .bind(&grant.agency)
            .bind(&grant.selected_school)
            .bind(&grant.budget_scale)
            .bind(&grant.notice_url)
            .bind(&grant.status)
            .bind(&grant.crawled_at)
            .execute(&mut conn)
            .await?;
            added += 1;
        }
        conn.close().await?;
        Ok(added)
    }

    /// Insert contacts, skipping those whose non-blank e-mail is already stored.
    pub async fn insert_contacts(&self, contacts: &[NewContact]) -> Result<usize, StoreError> {
        let crawled_at = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let mut conn = self.open(true).await?;
        let mut added = 0usize;
        for contact in contacts {
            if let Some(email) = contact.dedup_email() {
                let existing = sqlx::query("SELECT id FROM contacts WHERE email = ?")
                    .bind(email)
                    .fetch_optional(&mut conn)
                    .await?;
                if existing.is_some() {
                    continue;
                }
            }
            sqlx::query(
                r#"
                INSERT INTO contacts
                    (school_name, name, department, email, phone, research_area, source_url, crawled_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&contact.school_name)
            .bind(&contact.name)
            .bind(&contact.department)
            .bind(contact.email.trim())
            .bind(&contact.phone)
            .bind(&contact.research_area)
            .bind(&contact.source_url)
            .bind(&crawled_at)
            .execute(&mut conn)
            .await?;
            added += 1;
        }
        conn.close().await?;
        Ok(added)
    }

    pub async fn insert_school(&self, school: &NewSchool) -> Result<i64, StoreError> {
        let mut conn = self.open(true).await?;
        let result = sqlx::query(
            "INSERT INTO schools (school_name, category, contact, existing_equipments) VALUES (?, ?, ?, ?)",
        )
        .bind(&school.school_name)
        .bind(&school.category)
        .bind(&school.contact)
        .bind(&school.existing_equipments)
        .execute(&mut conn)
        .await?;
        conn.close().await?;
        Ok(result.last_insert_rowid())
    }

    /// Hard-delete every grant row. Returns the number of rows removed.
    pub async fn clear_grants(&self) -> Result<u64, StoreError> {
        let mut conn = self.open(true).await?;
        let result = sqlx::query("DELETE FROM grants").execute(&mut conn).await?;
        conn.close().await?;
        Ok(result.rows_affected())
    }

    pub async fn all_bids(&self) -> Result<Vec<BidRecord>, StoreError> {
        self.read_table("bid_history", |row| {
            Ok(BidRecord {
                id: row.try_get("id")?,
                bid_title: text(row, "bid_title")?,
                demand_agency: text(row, "demand_agency")?,
                successful_bidder: text(row, "successful_bidder")?,
                bid_price: text(row, "bid_price")?,
                introduced_items: text(row, "introduced_items")?,
                contract_date: text(row, "contract_date")?,
            })
        })
        .await
    }

    pub async fn all_grants(&self) -> Result<Vec<GrantRecord>, StoreError> {
        self.read_table("grants", |row| {
            Ok(GrantRecord {
                id: row.try_get("id")?,
                project_name: text(row, "project_name")?,
                agency: text(row, "agency")?,
                selected_school: text(row, "selected_school")?,
                budget_scale: text(row, "budget_scale")?,
                notice_url: text(row, "notice_url")?,
                status: text(row, "status")?,
                crawled_at: text(row, "crawled_at")?,
            })
        })
        .await
    }

    pub async fn all_contacts(&self) -> Result<Vec<ContactRecord>, StoreError> {
        self.read_table("contacts", |row| {
            Ok(ContactRecord {
                id: row.try_get("id")?,
                school_name: text(row, "school_name")?,
                name: text(row, "name")?,
                department: text(row, "department")?,
                email: text(row, "email")?,
                phone: text(row, "phone")?,
                research_area: text(row, "research_area")?,
                source_url: text(row, "source_url")?,
                crawled_at: text(row, "crawled_at")?,
            })
        })
        .await
    }

    pub async fn all_schools(&self) -> Result<Vec<TargetSchool>, StoreError> {
        self.read_table("schools", |row| {
            Ok(TargetSchool {
                id: row.try_get("id")?,
                school_name: text(row, "school_name")?,
                category: text(row, "category")?,
                contact: text(row, "contact")?,
                existing_equipments: text(row, "existing_equipments")?,
            })
        })
        .await
    }

    /// Newest-first read of a whole table. A store file or table that does
    /// not exist yet reads as empty; every other failure is returned.
    async fn read_table<T>(
        &self,
        table: &'static str,
        map: impl Fn(&SqliteRow) -> Result<T, sqlx::Error>,
    ) -> Result<Vec<T>, StoreError> {
        if !fs::try_exists(&self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?
        {
            return Ok(Vec::new());
        }

        let mut conn = self.open(false).await?;
        let present = sqlx::query("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_optional(&mut conn)
            .await?;
        if present.is_none() {
            conn.close().await?;
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!("SELECT * FROM {table} ORDER BY id DESC"))
            .fetch_all(&mut conn)
            .await?;
        conn.close().await?;
        rows.iter().map(|row| map(row).map_err(StoreError::from)).collect()
    }
}

fn text(row: &SqliteRow, column: &str) -> Result<String, sqlx::Error> {
    Ok(row.try_get::<Option<String>, _>(column)?.unwrap_or_default())
}

fn is_duplicate_column(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("duplicate column name"))
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    /// Final URL with the query string removed; provider keys travel there.
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {detail}")]
    HttpStatus {
        status: u16,
        url: String,
        detail: String,
    },
}

/// Single-attempt HTTP client bounded by a request timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn get(
        &self,
        source_id: &str,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<FetchedResponse, FetchError> {
        let mut request = self.client.get(url).query(query);
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        self.send(source_id, url, request).await
    }

    pub async fn post_json(
        &self,
        source_id: &str,
        url: &str,
        query: &[(&str, String)],
        body: &serde_json::Value,
    ) -> Result<FetchedResponse, FetchError> {
        let request = self.client.post(url).query(query).json(body);
        self.send(source_id, url, request).await
    }

    async fn send(
        &self,
        source_id: &str,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", source_id, url);
        async move {
            let resp = request.send().await?;
            let status = resp.status();
            let mut final_url = resp.url().clone();
            final_url.set_query(None);
            let final_url = final_url.to_string();
            let body = resp.bytes().await?.to_vec();

            if !status.is_success() {
                let detail: String = String::from_utf8_lossy(&body).chars().take(200).collect();
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                    detail,
                });
            }

            debug!(status = status.as_u16(), bytes = body.len(), "fetched");
            Ok(FetchedResponse {
                status,
                final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn bid(title: &str, agency: &str) -> NewBid {
        NewBid {
            bid_title: title.to_string(),
            demand_agency: agency.to_string(),
            successful_bidder: "미상(공고 단계)".to_string(),
            bid_price: "15000000".to_string(),
            introduced_items: String::new(),
            contract_date: "2024-01-15".to_string(),
        }
    }

    fn grant(name: &str, url: &str) -> NewGrant {
        NewGrant {
            project_name: name.to_string(),
            agency: "네이버 뉴스".to_string(),
            selected_school: "한국대".to_string(),
            budget_scale: "기사 원문 참조".to_string(),
            notice_url: url.to_string(),
            status: "선정완료(뉴스)".to_string(),
            crawled_at: "2026-10-18 09:00:00".to_string(),
        }
    }

    fn contact(name: &str, email: &str) -> NewContact {
        NewContact {
            school_name: "인하대학교".to_string(),
            name: name.to_string(),
            department: "기계공학과".to_string(),
            email: email.to_string(),
            ..Default::default()
        }
    }

    async fn fresh_store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().expect("tempdir");
        let store = Store::new(dir.path().join("db").join("sales_data.db"));
        store.init_schema().await.expect("init schema");
        (dir, store)
    }

    #[tokio::test]
    async fn init_schema_is_idempotent_and_creates_parent_dir() {
        let (dir, store) = fresh_store().await;
        store.init_schema().await.expect("second init");
        assert!(dir.path().join("db").join("sales_data.db").exists());
        assert!(store.check_connection().await);
    }

    #[tokio::test]
    async fn init_schema_patches_older_tables() {
        let dir = tempdir().expect("tempdir");
        let store = Store::new(dir.path().join("legacy.db"));
        let mut conn = store.open(true).await.expect("open");
        sqlx::query("CREATE TABLE grants (id INTEGER PRIMARY KEY AUTOINCREMENT, project_name TEXT NOT NULL, selected_school TEXT, budget_scale TEXT, notice_url TEXT)")
            .execute(&mut conn)
            .await
            .expect("legacy grants");
        sqlx::query("INSERT INTO grants (project_name, notice_url) VALUES ('old row', 'https://old')")
            .execute(&mut conn)
            .await
            .expect("legacy row");
        conn.close().await.expect("close");

        store.init_schema().await.expect("patch schema");
        let grants = store.all_grants().await.expect("read grants");
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].project_name, "old row");
        assert_eq!(grants[0].status, "");
        assert_eq!(grants[0].agency, "");
    }

    #[tokio::test]
    async fn inserting_same_bid_twice_adds_nothing_the_second_time() {
        let (_dir, store) = fresh_store().await;
        let bids = vec![bid("3D CAD 실습실 구축", "서울대학교 산학협력단")];
        assert_eq!(store.insert_bids(&bids).await.unwrap(), 1);
        assert_eq!(store.insert_bids(&bids).await.unwrap(), 0);
        assert_eq!(store.all_bids().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_title_under_another_agency_is_a_new_bid() {
        let (_dir, store) = fresh_store().await;
        let added = store
            .insert_bids(&[
                bid("3D CAD 실습실 구축", "서울대학교"),
                bid("3D CAD 실습실 구축", "부산대학교"),
                bid("3D CAD 실습실 구축", "서울대학교"),
            ])
            .await
            .unwrap();
        assert_eq!(added, 2);
    }

    #[tokio::test]
    async fn reads_are_newest_first() {
        let (_dir, store) = fresh_store().await;
        store
            .insert_bids(&[bid("first", "대학교"), bid("second", "대학교")])
            .await
            .unwrap();
        let titles: Vec<String> = store
            .all_bids()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.bid_title)
            .collect();
        assert_eq!(titles, vec!["second".to_string(), "first".to_string()]);
    }

    #[tokio::test]
    async fn grants_dedup_on_either_url_or_name() {
        let (_dir, store) = fresh_store().await;
        let added = store
            .insert_grants(&[
                grant("글로컬대학 선정", "https://a"),
                grant("다른 제목", "https://a"),
                grant("글로컬대학 선정", "https://b"),
                grant("RISE 사업 확정", "https://c"),
            ])
            .await
            .unwrap();
        assert_eq!(added, 2);
    }

    #[tokio::test]
    async fn grants_without_url_dedup_on_name_only() {
        let (_dir, store) = fresh_store().await;
        let added = store
            .insert_grants(&[
                grant("글로컬대학 선정", ""),
                grant("SW중심대학 선정", ""),
                grant("글로컬대학 선정", ""),
            ])
            .await
            .unwrap();
        assert_eq!(added, 2);
    }

    #[tokio::test]
    async fn clear_grants_removes_every_row() {
        let (_dir, store) = fresh_store().await;
        store
            .insert_grants(&[grant("a", "https://a"), grant("b", "https://b")])
            .await
            .unwrap();
        assert_eq!(store.clear_grants().await.unwrap(), 2);
        assert!(store.all_grants().await.unwrap().is_empty());
        assert_eq!(store.insert_grants(&[grant("a", "https://a")]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn contacts_dedup_on_non_empty_email_only() {
        let (_dir, store) = fresh_store().await;
        let added = store
            .insert_contacts(&[
                contact("김교수", "kim@inha.ac.kr"),
                contact("김교수(중복)", "kim@inha.ac.kr"),
            ])
            .await
            .unwrap();
        assert_eq!(added, 1);

        let added = store
            .insert_contacts(&[contact("이교수", ""), contact("박교수", "  ")])
            .await
            .unwrap();
        assert_eq!(added, 2);

        let contacts = store.all_contacts().await.unwrap();
        assert_eq!(contacts.len(), 3);
        assert!(contacts.iter().all(|c| !c.crawled_at.is_empty()));
    }

    #[tokio::test]
    async fn schools_are_append_only() {
        let (_dir, store) = fresh_store().await;
        let school = NewSchool {
            school_name: "한국폴리텍대학".to_string(),
            category: "전문대".to_string(),
            contact: "02-000-0000".to_string(),
            existing_equipments: "CATIA V5 30석".to_string(),
        };
        let first = store.insert_school(&school).await.unwrap();
        let second = store.insert_school(&school).await.unwrap();
        assert!(second > first);
        assert_eq!(store.all_schools().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_store_reads_as_empty() {
        let dir = tempdir().expect("tempdir");
        let store = Store::new(dir.path().join("never-created.db"));
        assert!(store.all_bids().await.unwrap().is_empty());
        assert!(store.all_contacts().await.unwrap().is_empty());
        assert!(!dir.path().join("never-created.db").exists());
    }

    #[tokio::test]
    async fn missing_table_reads_as_empty() {
        let dir = tempdir().expect("tempdir");
        let store = Store::new(dir.path().join("bare.db"));
        let conn = store.open(true).await.expect("open");
        conn.close().await.expect("close");
        assert!(store.all_grants().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_store_is_an_error_not_an_empty_list() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("corrupt.db");
        std::fs::write(&path, b"this is not a sqlite database at all, just text padding it out")
            .expect("write garbage");
        let store = Store::new(path);
        assert!(store.all_bids().await.is_err());
    }
}
