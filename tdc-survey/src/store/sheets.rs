//! Google Sheets v4 backend
//!
//! One `SheetsStore` is created at startup and shared by every session;
//! the HTTP client and access token are reused across requests.

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;

use super::auth::ServiceAccountAuth;
use super::{parse_counter, Row, StoreError, SurveyStore, Table, COUNTER_CELL, META_SHEET};
use crate::credentials::SheetCredentials;

pub const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com";
const USER_AGENT: &str = concat!("tdc-survey/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one request attempt
enum Sent {
    Response(reqwest::Response),
    /// 401 with the response body
    Unauthorized(String),
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValueRangeBody<'a> {
    range: &'a str,
    major_dimension: &'static str,
    values: Vec<Vec<String>>,
}

/// Spreadsheet-backed store
pub struct SheetsStore {
    http_client: reqwest::Client,
    auth: ServiceAccountAuth,
    spreadsheet_key: String,
    base_url: Url,
    /// Serializes `increment_counter` within this process
    counter_lock: Mutex<()>,
}

impl SheetsStore {
    pub fn new(credentials: SheetCredentials) -> Result<Self, StoreError> {
        Self::with_base_url(credentials, SHEETS_BASE_URL)
    }

    /// Store talking to a different API root, e.g. a local test server
    pub fn with_base_url(credentials: SheetCredentials, base_url: &str) -> Result<Self, StoreError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let base_url = Url::parse(base_url)
            .map_err(|e| StoreError::Parse(format!("invalid base URL {}: {}", base_url, e)))?;

        let auth = ServiceAccountAuth::new(credentials.account, http_client.clone())?;

        tracing::info!(
            client_email = %auth.client_email(),
            "Spreadsheet client initialized"
        );

        Ok(Self {
            http_client,
            auth,
            spreadsheet_key: credentials.gsheet_key,
            base_url,
            counter_lock: Mutex::new(()),
        })
    }

    fn counter_range() -> String {
        format!("{}!{}", META_SHEET, COUNTER_CELL)
    }

    /// `{base}/v4/spreadsheets/{key}/values/{range}{suffix}`
    fn values_url(&self, range: &str, suffix: &str) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Parse("base URL cannot hold a path".to_string()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", &self.spreadsheet_key, "values"])
            .push(&format!("{}{}", range, suffix));
        Ok(url)
    }

    /// Send one request with a bearer token
    ///
    /// A 401 means the cached token was revoked or expired early; the token
    /// is dropped and the request is sent once more with a fresh one.
    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&ValueRangeBody<'_>>,
    ) -> Result<reqwest::Response, StoreError> {
        let mut refreshed = false;
        loop {
            match self.send_once(method.clone(), url.clone(), body).await? {
                Sent::Response(response) => return Ok(response),
                Sent::Unauthorized(text) => {
                    self.auth.invalidate().await;
                    if refreshed {
                        return Err(StoreError::Auth(format!("access token rejected: {}", text)));
                    }
                    tracing::warn!("Spreadsheet rejected the access token, fetching a new one");
                    refreshed = true;
                }
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: Url,
        body: Option<&ValueRangeBody<'_>>,
    ) -> Result<Sent, StoreError> {
        // Nothing has gone to the spreadsheet while the token is fetched
        let token = self.auth.access_token().await.map_err(|e| {
            if e.is_transient() {
                StoreError::NotSent(e.to_string())
            } else {
                e
            }
        })?;

        tracing::debug!(method = %method, url = %url, "Spreadsheet request");

        let mut request = self.http_client.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                StoreError::NotSent(e.to_string())
            } else {
                StoreError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(Sent::Response(response));
        }

        let text = response.text().await.unwrap_or_default();
        match status {
            StatusCode::TOO_MANY_REQUESTS => Err(StoreError::RateLimited),
            StatusCode::UNAUTHORIZED => Ok(Sent::Unauthorized(text)),
            StatusCode::FORBIDDEN => Err(StoreError::Auth(text)),
            _ => Err(StoreError::Api {
                status: status.as_u16(),
                body: text,
            }),
        }
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SurveyStore for SheetsStore {
    fn name(&self) -> &'static str {
        "sheets"
    }

    async fn read_counter(&self) -> Result<u64, StoreError> {
        let url = self.values_url(&Self::counter_range(), "")?;
        let range: ValueRange = self
            .send(Method::GET, url, None)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Parse(e.to_string()))?;

        let cell = range
            .values
            .first()
            .and_then(|row| row.first())
            .map(cell_text);
        parse_counter(cell.as_deref())
    }

    async fn append_rows(&self, table: Table, rows: Vec<Row>) -> Result<(), StoreError> {
        let row_count = rows.len();
        let sheet = table.sheet_name();
        let mut url = self.values_url(sheet, ":append")?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");

        let body = ValueRangeBody {
            range: sheet,
            major_dimension: "ROWS",
            values: rows,
        };
        self.send(Method::POST, url, Some(&body)).await?;

        tracing::info!(table = %table, rows = row_count, "Appended rows to spreadsheet");
        Ok(())
    }

    async fn write_counter(&self, value: u64) -> Result<(), StoreError> {
        let range = Self::counter_range();
        let mut url = self.values_url(&range, "")?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");

        let body = ValueRangeBody {
            range: &range,
            major_dimension: "ROWS",
            values: vec![vec![value.to_string()]],
        };
        self.send(Method::PUT, url, Some(&body)).await?;

        tracing::info!(counter = value, "Updated participant counter");
        Ok(())
    }

    async fn increment_counter(&self) -> Result<u64, StoreError> {
        // The Sheets API has no compare-and-swap; this only orders writers in
        // this process. Separate processes can still interleave.
        let _guard = self.counter_lock.lock().await;
        let current = self.read_counter().await?;
        self.write_counter(current + 1).await?;
        Ok(current + 1)
    }
}
