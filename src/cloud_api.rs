use crate::config::Credentials;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// The cloud side of the hub: every endpoint is a GET with its
// parameters carried in the query string.

pub const DEFAULT_CLOUD_URL: &str = "https://trustsmartcloud2.com/ics2000_api";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// What login tells us about the (first) home on the account
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct HomeInfo {
    pub home_id: String,
    pub aes_key: String,
    pub mac: String,
}

#[derive(Deserialize, Debug)]
struct LoginResponse {
    #[serde(default)]
    homes: Vec<HomeInfo>,
}

/// A device or scene record as the cloud returns it. `data` describes
/// the entity and `status` carries its current function values; both
/// are encrypted with the home's AES key and base64 encoded.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct EncryptedRecord {
    pub id: u32,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReportPrecision {
    Day,
    Month,
}

impl ReportPrecision {
    /// The date of the row following the one for `date`.
    /// Month rows are keyed to the first day of their month.
    pub fn next(self, date: NaiveDate) -> Option<NaiveDate> {
        match self {
            Self::Day => date.succ_opt(),
            Self::Month => date
                .with_day(1)?
                .checked_add_months(chrono::Months::new(1)),
        }
    }
}

/// One row of an aggregated report; `None` marks a gap in the data
pub type ReportRow = Vec<Option<i64>>;

#[async_trait]
pub trait HubCloud: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> anyhow::Result<HomeInfo>;

    async fn sync(&self, creds: &Credentials) -> anyhow::Result<Vec<EncryptedRecord>>;

    async fn get_multiple(
        &self,
        creds: &Credentials,
        entity_ids: &[u32],
    ) -> anyhow::Result<Vec<EncryptedRecord>>;

    /// Live meter functions of the energy module
    async fn check(&self, creds: &Credentials, entity_id: u32) -> anyhow::Result<Vec<Option<i64>>>;

    async fn aggregated_reports(
        &self,
        creds: &Credentials,
        entity_id: u32,
        precision: ReportPrecision,
        from: NaiveDate,
        till: NaiveDate,
    ) -> anyhow::Result<Vec<ReportRow>>;
}

#[derive(Clone)]
pub struct CloudClient {
    base_url: String,
}

impl CloudClient {
    pub fn new<U: Into<String>>(base_url: U) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn get_request_with_json_response<R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> anyhow::Result<R> {
        let response = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?
            .request(Method::GET, self.endpoint(path))
            .query(query)
            .send()
            .await
            .map_err(|err| err.without_url())
            .with_context(|| format!("request {path} action={}", action_of(query)))?;

        http_response_body(response).await
    }
}

fn action_of<'a>(query: &'a [(&str, String)]) -> &'a str {
    query
        .iter()
        .find(|(k, _)| *k == "action")
        .map(|(_, v)| v.as_str())
        .unwrap_or("")
}

fn account_query(action: &str, creds: &Credentials) -> Vec<(&'static str, String)> {
    vec![
        ("action", action.to_string()),
        ("email", creds.email.clone()),
        ("password_hash", creds.password.clone()),
        ("mac", creds.mac.to_string().replace(':', "")),
        ("home_id", creds.home_id.clone()),
    ]
}

#[async_trait]
impl HubCloud for CloudClient {
    async fn login(&self, email: &str, password: &str) -> anyhow::Result<HomeInfo> {
        let resp: LoginResponse = self
            .get_request_with_json_response(
                "account.php",
                &[
                    ("action", "login".to_string()),
                    ("email", email.to_string()),
                    ("password_hash", password.to_string()),
                ],
            )
            .await?;
        resp.homes
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("account {email} has no homes"))
    }

    async fn sync(&self, creds: &Credentials) -> anyhow::Result<Vec<EncryptedRecord>> {
        self.get_request_with_json_response("gateway.php", &account_query("sync", creds))
            .await
    }

    async fn get_multiple(
        &self,
        creds: &Credentials,
        entity_ids: &[u32],
    ) -> anyhow::Result<Vec<EncryptedRecord>> {
        let mut query = account_query("get-multiple", creds);
        query.push(("entity_id", serde_json::to_string(entity_ids)?));
        self.get_request_with_json_response("entity.php", &query)
            .await
    }

    async fn check(&self, creds: &Credentials, entity_id: u32) -> anyhow::Result<Vec<Option<i64>>> {
        let mut query = account_query("check", creds);
        query.push(("entity_id", entity_id.to_string()));
        self.get_request_with_json_response("entity.php", &query)
            .await
    }

    async fn aggregated_reports(
        &self,
        creds: &Credentials,
        entity_id: u32,
        precision: ReportPrecision,
        from: NaiveDate,
        till: NaiveDate,
    ) -> anyhow::Result<Vec<ReportRow>> {
        let mut query = account_query("aggregated_reports", creds);
        query.push(("entity_id", entity_id.to_string()));
        query.push(("precision", precision.to_string()));
        query.push(("date_from", format!("{from} 00:00:00")));
        query.push(("date_till", format!("{till} 23:59:59")));
        self.get_request_with_json_response("entity.php", &query)
            .await
    }
}

pub fn from_json<T: serde::de::DeserializeOwned, S: AsRef<[u8]>>(text: S) -> anyhow::Result<T> {
    let text = text.as_ref();
    serde_json_path_to_error::from_slice(text)
        .map_err(|err| anyhow::anyhow!("{err}. Input: {}", String::from_utf8_lossy(text)))
}

pub async fn http_response_body<R: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> anyhow::Result<R> {
    // The url carries the account password in its query string
    let mut url = response.url().clone();
    url.set_query(None);

    let status = response.status();
    if !status.is_success() {
        let body_bytes = response.bytes().await.with_context(|| {
            format!(
                "request {url} status {}: {}, and failed to read response body",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )
        })?;

        anyhow::bail!(
            "request {url} status {}: {}. Response body: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            String::from_utf8_lossy(&body_bytes)
        );
    }
    let data = response.bytes().await.with_context(|| {
        format!(
            "read {url} response body, status {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )
    })?;
    from_json(&data).with_context(|| format!("parsing {url} response"))
}
