//! Zoho CRM client
//!
//! Implements [`RecordSource`] over the Zoho REST API:
//! - OAuth refresh-token grant, access token cached until shortly before expiry
//! - Bulk read v7 (`/crm/bulk/v7/read`)
//! - Field metadata, organization currency and direct paginated reads (v7)
//!
//! Response bodies vary between endpoints and API revisions (job ids arrive as
//! text or numbers, errors arrive inside `data[]` or at top level). All of that
//! is decoded here by the `decode_*` functions; callers only see crate types.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use spt_common::config::CrmConfig;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{Criteria, FieldMeta, JobStatus, RawRecord, RecordPage, RecordSource, SourceError};
use crate::models::CurrencyInfo;

const USER_AGENT: &str = concat!("spt-dashboard/", env!("CARGO_PKG_VERSION"));

/// Records per page for direct reads (API maximum)
pub const PAGE_SIZE: u32 = 200;

/// Refresh the access token this long before it expires
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Zoho CRM API client
pub struct ZohoClient {
    http_client: Client,
    api_domain: String,
    accounts_domain: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    token: Mutex<Option<AccessToken>>,
    rate_limiter: DefaultDirectRateLimiter,
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl ZohoClient {
    /// Build a client from CRM configuration; credentials are required
    pub fn new(config: &CrmConfig) -> Result<Self, SourceError> {
        let credential = |value: &Option<String>, name: &str| {
            value
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string)
                .ok_or_else(|| SourceError::Auth(format!("missing {}", name)))
        };

        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SourceError::Network(e.to_string()))?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            http_client,
            api_domain: config.api_domain.trim_end_matches('/').to_string(),
            accounts_domain: config.accounts_domain.trim_end_matches('/').to_string(),
            client_id: credential(&config.client_id, "client_id")?,
            client_secret: credential(&config.client_secret, "client_secret")?,
            refresh_token: credential(&config.refresh_token, "refresh_token")?,
            token: Mutex::new(None),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    /// Current access token, running the refresh-token grant when needed
    async fn access_token(&self) -> Result<String, SourceError> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_EXPIRY_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        tracing::debug!("Requesting new CRM access token");

        let url = format!("{}/oauth/v2/token", self.accounts_domain);
        let response = self
            .http_client
            .post(&url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        let grant = decode_token_response(status, &body)?;
        let value = grant.access_token.clone();
        *cached = Some(AccessToken {
            value: grant.access_token,
            expires_at: Instant::now() + Duration::from_secs(grant.expires_in),
        });

        tracing::info!(expires_in = grant.expires_in, "CRM access token refreshed");
        Ok(value)
    }

    /// Issue an authorized request; 401 drops the cached token
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, SourceError> {
        self.rate_limiter.until_ready().await;
        let token = self.access_token().await?;

        let response = request
            .header("Authorization", format!("Zoho-oauthtoken {}", token))
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            *self.token.lock().await = None;
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Auth(error_message(&body)));
        }

        Ok(response)
    }

    async fn send_for_text(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<(StatusCode, String), SourceError> {
        let response = self.send(request).await?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;
        Ok((status, body))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_domain, path)
    }
}

#[async_trait]
impl RecordSource for ZohoClient {
    async fn submit_bulk_job(
        &self,
        module: &str,
        fields: &[String],
        criteria: Option<&Criteria>,
    ) -> Result<String, SourceError> {
        let body = bulk_read_request(module, fields, criteria);
        tracing::debug!(module = %module, field_count = fields.len(), "Submitting bulk read");

        let request = self.http_client.post(self.url("/crm/bulk/v7/read")).json(&body);
        let (status, text) = self.send_for_text(request).await?;
        decode_submit_response(status, &text)
    }

    async fn get_job_status(&self, job_id: &str) -> Result<JobStatus, SourceError> {
        let request = self
            .http_client
            .get(self.url(&format!("/crm/bulk/v7/read/{}", job_id)));
        let (status, text) = self.send_for_text(request).await?;
        decode_status_response(status, &text)
    }

    async fn download_job_result(&self, job_id: &str) -> Result<Vec<u8>, SourceError> {
        let request = self
            .http_client
            .get(self.url(&format!("/crm/bulk/v7/read/{}/result", job_id)));
        let response = self.send(request).await?;
        let status = response.status();

        if status == StatusCode::NO_CONTENT {
            return Err(SourceError::NoContent(format!("job {} has no result", job_id)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, &body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn get_module_fields(&self, module: &str) -> Result<Vec<FieldMeta>, SourceError> {
        let request = self
            .http_client
            .get(self.url("/crm/v7/settings/fields"))
            .query(&[("module", module)]);
        let (status, text) = self.send_for_text(request).await?;
        decode_fields_response(status, &text)
    }

    async fn get_base_currency(&self) -> Result<CurrencyInfo, SourceError> {
        let request = self.http_client.get(self.url("/crm/v7/org"));
        let (status, text) = self.send_for_text(request).await?;
        decode_org_response(status, &text)
    }

    async fn get_records(
        &self,
        module: &str,
        fields: &[String],
        page: u32,
    ) -> Result<RecordPage, SourceError> {
        let request = self
            .http_client
            .get(self.url(&format!("/crm/v7/{}", module)))
            .query(&[
                ("fields", fields.join(",")),
                ("page", page.to_string()),
                ("per_page", PAGE_SIZE.to_string()),
            ]);
        let (status, text) = self.send_for_text(request).await?;
        decode_records_response(status, &text)
    }
}

// ----------------------------------------------------------------------------
// Wire formats
// ----------------------------------------------------------------------------

/// Job identifiers arrive as strings or as bare numbers
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JobId {
    Text(String),
    Number(u64),
}

impl JobId {
    fn into_string(self) -> String {
        match self {
            JobId::Text(s) => s,
            JobId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BulkReadEntry {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    id: Option<JobId>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    details: Option<BulkReadDetails>,
}

#[derive(Debug, Deserialize)]
struct BulkReadDetails {
    #[serde(default)]
    id: Option<JobId>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BulkReadEnvelope {
    Data { data: Vec<BulkReadEntry> },
    Error(ApiErrorBody),
}

#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenEnvelope {
    Granted(TokenGrant),
    Denied { error: String },
}

#[derive(Debug, Deserialize)]
struct FieldEntry {
    api_name: String,
    #[serde(default)]
    system_field: bool,
    #[serde(default)]
    read_only: bool,
}

#[derive(Debug, Deserialize)]
struct FieldsEnvelope {
    #[serde(default)]
    fields: Vec<FieldEntry>,
}

#[derive(Debug, Deserialize)]
struct OrgEntry {
    #[serde(default)]
    iso_code: Option<String>,
    #[serde(default)]
    currency_symbol: Option<String>,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrgEnvelope {
    #[serde(default)]
    org: Vec<OrgEntry>,
}

#[derive(Debug, Deserialize)]
struct RecordsEnvelope {
    #[serde(default)]
    data: Vec<serde_json::Map<String, Value>>,
    #[serde(default)]
    info: Option<PageInfo>,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    #[serde(default)]
    more_records: bool,
}

/// JSON body for a bulk read submission
pub fn bulk_read_request(module: &str, fields: &[String], criteria: Option<&Criteria>) -> Value {
    let mut query = json!({
        "module": { "api_name": module },
        "fields": fields,
        "page": 1,
    });

    if let Some(c) = criteria {
        query["criteria"] = json!({
            "field": { "api_name": c.field },
            "comparator": c.comparator,
            "value": c.value,
        });
    }

    json!({ "query": query })
}

fn parse<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, SourceError> {
    serde_json::from_str(body).map_err(|e| SourceError::Parse(e.to_string()))
}

/// Best-effort human message from an error body
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(err) => match err.code {
            Some(code) => format!("{}: {}", code, err.message),
            None => err.message,
        },
        Err(_) if body.trim().is_empty() => "empty response".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

fn api_error(status: StatusCode, body: &str) -> SourceError {
    SourceError::Api {
        status: status.as_u16(),
        message: error_message(body),
    }
}

fn decode_token_response(status: StatusCode, body: &str) -> Result<TokenGrant, SourceError> {
    if !status.is_success() {
        return Err(SourceError::Auth(error_message(body)));
    }
    match parse::<TokenEnvelope>(body)? {
        TokenEnvelope::Granted(grant) => Ok(grant),
        TokenEnvelope::Denied { error } => Err(SourceError::Auth(error)),
    }
}

fn first_entry(status: StatusCode, body: &str) -> Result<BulkReadEntry, SourceError> {
    let entry = match parse::<BulkReadEnvelope>(body) {
        Ok(BulkReadEnvelope::Data { data }) => data.into_iter().next(),
        Ok(BulkReadEnvelope::Error(err)) => {
            return Err(SourceError::Api {
                status: status.as_u16(),
                message: err.message,
            })
        }
        Err(e) if status.is_success() => return Err(e),
        Err(_) => return Err(api_error(status, body)),
    };

    let entry = entry.ok_or_else(|| SourceError::Parse("empty data array".to_string()))?;

    if !status.is_success() || entry.status.as_deref() == Some("error") {
        let message = entry
            .message
            .or(entry.code)
            .unwrap_or_else(|| "request rejected".to_string());
        return Err(SourceError::Api {
            status: status.as_u16(),
            message,
        });
    }

    Ok(entry)
}

/// Decode a bulk read submission response into the job id
pub fn decode_submit_response(status: StatusCode, body: &str) -> Result<String, SourceError> {
    let entry = first_entry(status, body)?;
    entry
        .details
        .and_then(|d| d.id)
        .or(entry.id)
        .map(JobId::into_string)
        .ok_or_else(|| SourceError::Parse("job id missing from response".to_string()))
}

/// Decode a bulk read status response
pub fn decode_status_response(status: StatusCode, body: &str) -> Result<JobStatus, SourceError> {
    let entry = first_entry(status, body)?;
    let state = entry
        .state
        .or(entry.details.and_then(|d| d.state))
        .ok_or_else(|| SourceError::Parse("job state missing from response".to_string()))?;
    state.parse().map_err(SourceError::Parse)
}

/// Decode field metadata
pub fn decode_fields_response(
    status: StatusCode,
    body: &str,
) -> Result<Vec<FieldMeta>, SourceError> {
    if !status.is_success() {
        return Err(api_error(status, body));
    }
    let envelope: FieldsEnvelope = parse(body)?;
    Ok(envelope
        .fields
        .into_iter()
        .map(|f| FieldMeta {
            api_name: f.api_name,
            system_managed: f.system_field,
            read_only: f.read_only,
        })
        .collect())
}

/// Decode organization details into the base currency
pub fn decode_org_response(status: StatusCode, body: &str) -> Result<CurrencyInfo, SourceError> {
    if !status.is_success() {
        return Err(api_error(status, body));
    }
    let envelope: OrgEnvelope = parse(body)?;
    let org = envelope
        .org
        .into_iter()
        .next()
        .ok_or_else(|| SourceError::Parse("organization missing from response".to_string()))?;
    let code = org
        .iso_code
        .ok_or_else(|| SourceError::Parse("iso_code missing".to_string()))?;

    Ok(CurrencyInfo {
        symbol: org.currency_symbol.unwrap_or_else(|| code.clone()),
        name: org.currency.unwrap_or_else(|| code.clone()),
        code,
    })
}

/// Decode one page of a direct record read; 204 is an empty final page
pub fn decode_records_response(status: StatusCode, body: &str) -> Result<RecordPage, SourceError> {
    if status == StatusCode::NO_CONTENT || (status.is_success() && body.trim().is_empty()) {
        return Ok(RecordPage::default());
    }
    if !status.is_success() {
        return Err(api_error(status, body));
    }

    let envelope: RecordsEnvelope = parse(body)?;
    Ok(RecordPage {
        records: envelope.data.into_iter().map(flatten_record).collect(),
        more_records: envelope.info.map(|i| i.more_records).unwrap_or(false),
    })
}

/// Flatten a JSON record into string cells the way bulk CSV exports present them
fn flatten_record(object: serde_json::Map<String, Value>) -> RawRecord {
    object
        .into_iter()
        .filter_map(|(key, value)| flatten_value(value).map(|v| (key, v)))
        .collect()
}

fn flatten_value(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        // Lookups and owners: {"name": .., "id": ..}
        Value::Object(mut map) => match map.remove("name") {
            Some(name) => flatten_value(name),
            None => map.remove("id").and_then(flatten_value),
        },
        Value::Array(items) => {
            let parts: Vec<String> = items.into_iter().filter_map(flatten_value).collect();
            Some(parts.join(";"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_response_with_text_id() {
        let body = r#"{"data":[{"status":"success","code":"ADDED_SUCCESSFULLY",
            "message":"Added successfully.",
            "details":{"id":"554023000000568002","operation":"read","state":"ADDED"}}],
            "info":{}}"#;
        let id = decode_submit_response(StatusCode::CREATED, body).unwrap();
        assert_eq!(id, "554023000000568002");
    }

    #[test]
    fn test_submit_response_with_numeric_id() {
        let body = r#"{"data":[{"status":"success","details":{"id":554023000000568002}}]}"#;
        let id = decode_submit_response(StatusCode::CREATED, body).unwrap();
        assert_eq!(id, "554023000000568002");
    }

    #[test]
    fn test_submit_rejection_is_api_error() {
        let body = r#"{"data":[{"status":"error","code":"INVALID_DATA",
            "message":"invalid field","details":{}}]}"#;
        match decode_submit_response(StatusCode::BAD_REQUEST, body) {
            Err(SourceError::Api { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "invalid field");
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[test]
    fn test_top_level_error_body() {
        let body = r#"{"code":"INVALID_TOKEN","details":{},"message":"invalid oauth token","status":"error"}"#;
        assert!(matches!(
            decode_submit_response(StatusCode::BAD_REQUEST, body),
            Err(SourceError::Api { status: 400, .. })
        ));
    }

    #[test]
    fn test_status_response_states() {
        let body = |state: &str| {
            format!(
                r#"{{"data":[{{"id":"1","operation":"read","state":"{}"}}]}}"#,
                state
            )
        };
        assert_eq!(
            decode_status_response(StatusCode::OK, &body("ADDED")).unwrap(),
            JobStatus::Queued
        );
        assert_eq!(
            decode_status_response(StatusCode::OK, &body("IN PROGRESS")).unwrap(),
            JobStatus::InProgress
        );
        assert_eq!(
            decode_status_response(StatusCode::OK, &body("COMPLETED")).unwrap(),
            JobStatus::Completed
        );
        assert!(matches!(
            decode_status_response(StatusCode::OK, &body("PAUSED")),
            Err(SourceError::Parse(_))
        ));
    }

    #[test]
    fn test_fields_response() {
        let body = r#"{"fields":[
            {"api_name":"Deal_Name","system_field":false,"read_only":false},
            {"api_name":"Created_By","system_field":true,"read_only":true},
            {"api_name":"Amount"}]}"#;
        let fields = decode_fields_response(StatusCode::OK, body).unwrap();
        assert_eq!(fields.len(), 3);
        assert!(fields[1].system_managed);
        assert!(!fields[2].read_only);
    }

    #[test]
    fn test_org_currency() {
        let body = r#"{"org":[{"iso_code":"EUR","currency_symbol":"€","currency":"Euro"}]}"#;
        let currency = decode_org_response(StatusCode::OK, body).unwrap();
        assert_eq!(currency.code, "EUR");
        assert_eq!(currency.symbol, "€");
        assert_eq!(currency.name, "Euro");
    }

    #[test]
    fn test_records_page_flattens_nested_values() {
        let body = r#"{"data":[{"id":"1","Deal_Name":"Renewal","Amount":1200.5,
            "Owner":{"name":"Dana","id":"77"},"Closing_Date":null,
            "Tags":["a","b"]}],
            "info":{"more_records":true,"page":1,"per_page":200}}"#;
        let page = decode_records_response(StatusCode::OK, body).unwrap();
        assert!(page.more_records);
        let record = &page.records[0];
        assert_eq!(record["Amount"], "1200.5");
        assert_eq!(record["Owner"], "Dana");
        assert_eq!(record["Tags"], "a;b");
        assert!(!record.contains_key("Closing_Date"));
    }

    #[test]
    fn test_no_content_is_empty_page() {
        let page = decode_records_response(StatusCode::NO_CONTENT, "").unwrap();
        assert!(page.records.is_empty());
        assert!(!page.more_records);
    }

    #[test]
    fn test_bulk_read_request_body() {
        let criteria = Criteria {
            field: "Stage".to_string(),
            comparator: "equal".to_string(),
            value: json!("Closed Won"),
        };
        let body = bulk_read_request("Deals", &["Amount".to_string()], Some(&criteria));
        assert_eq!(body["query"]["module"]["api_name"], "Deals");
        assert_eq!(body["query"]["page"], 1);
        assert_eq!(body["query"]["criteria"]["field"]["api_name"], "Stage");

        let plain = bulk_read_request("Accounts", &[], None);
        assert!(plain["query"].get("criteria").is_none());
    }

    #[test]
    fn test_token_response() {
        let grant = decode_token_response(
            StatusCode::OK,
            r#"{"access_token":"abc","expires_in":3600,"token_type":"Bearer"}"#,
        )
        .unwrap();
        assert_eq!(grant.access_token, "abc");

        assert!(matches!(
            decode_token_response(StatusCode::OK, r#"{"error":"invalid_code"}"#),
            Err(SourceError::Auth(_))
        ));
    }

    #[test]
    fn test_new_requires_credentials() {
        let config = CrmConfig {
            client_id: Some("id".to_string()),
            client_secret: None,
            refresh_token: Some("token".to_string()),
            api_domain: "https://www.zohoapis.com".to_string(),
            accounts_domain: "https://accounts.zoho.com".to_string(),
            requests_per_second: 10,
        };
        assert!(matches!(ZohoClient::new(&config), Err(SourceError::Auth(_))));
    }
}
