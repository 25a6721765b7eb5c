use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use fleet_core::{
    Credential, DiscoveredAttribute, ExistenceVerdict, HostKey, HostSpec, InventoryFilter,
    InventoryPage, InventoryRecord, ProbeReport, ProbeResult, ProbeTarget, RecordId, VerifiedHost,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::duration_ms;
use crate::{ApiError, FailureKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub base_url: String,
    #[serde(with = "duration_ms", rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_ms", rename = "request_timeout_ms")]
    pub request_timeout: Duration,
    pub bearer_token: Option<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            bearer_token: None,
        }
    }
}

/// Backend operation that can be triggered over a set of servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    Scan,
    Named(String),
}

impl OperationKind {
    fn path_segment(&self) -> &str {
        match self {
            OperationKind::Scan => "scans",
            OperationKind::Named(name) => name,
        }
    }
}

/// REST collaborator consumed by the loader, pipeline and dispatcher.
#[async_trait::async_trait]
pub trait FleetApi: Send + Sync {
    async fn inventory(
        &self,
        filter: &InventoryFilter,
        page: u32,
        page_size: u32,
    ) -> Result<InventoryPage, ApiError>;

    async fn exists_by_key(&self, key: &HostKey) -> Result<ExistenceVerdict, ApiError>;

    async fn test_connectivity(&self, targets: &[ProbeTarget]) -> Result<ProbeReport, ApiError>;

    /// All-or-nothing create of `hosts`.
    async fn create_batch(
        &self,
        hosts: &[VerifiedHost],
        group_id: Option<u64>,
    ) -> Result<(), ApiError>;

    /// `ids = None` means every server matching the backend's current scope.
    async fn trigger_operation(
        &self,
        kind: &OperationKind,
        ids: Option<&[RecordId]>,
        batch_size: usize,
    ) -> Result<bool, ApiError>;

    /// Total count for `filter` from a single one-row request.
    async fn count(&self, filter: &InventoryFilter) -> Result<u64, ApiError> {
        Ok(self.inventory(filter, 1, 1).await?.total_count)
    }

    /// Every id matching `filter`. Asks for one page sized to the total and
    /// keeps paging at the backend's own page size if it caps the request.
    /// Fewer ids than the backend reports is an error, never a short list.
    async fn fetch_all_ids(
        &self,
        filter: &InventoryFilter,
        total_count: u64,
    ) -> Result<Vec<RecordId>, ApiError> {
        let mut page_size = u32::try_from(total_count.max(1)).unwrap_or(u32::MAX);
        let mut ids = Vec::new();
        let mut seen = HashSet::new();
        let mut page_number = 1;
        loop {
            let page = self.inventory(filter, page_number, page_size).await?;
            let fetched = page.records.len();
            ids.extend(
                page.records
                    .into_iter()
                    .map(|record| record.id)
                    .filter(|id| seen.insert(*id)),
            );
            if ids.len() as u64 >= page.total_count {
                return Ok(ids);
            }
            if fetched == 0 {
                return Err(ApiError {
                    kind: FailureKind::Decode,
                    message: format!(
                        "inventory listed {} of {} matching servers",
                        ids.len(),
                        page.total_count
                    ),
                });
            }
            if page_number == 1 && (fetched as u64) < u64::from(page_size) {
                page_size = u32::try_from(fetched).unwrap_or(u32::MAX);
            }
            page_number += 1;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestFleetApi {
    base: Url,
    client: reqwest::Client,
    bearer_token: Option<String>,
}

impl ReqwestFleetApi {
    pub fn new(settings: &ClientSettings) -> Result<Self, ApiError> {
        let mut raw = settings.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base =
            Url::parse(&raw).map_err(|err| ApiError::new(FailureKind::InvalidUrl, err.to_string()))?;
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| ApiError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self {
            base,
            client,
            bearer_token: settings.bearer_token.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path)
            .map_err(|err| ApiError::new(FailureKind::InvalidUrl, err.to_string()))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::new(
            FailureKind::HttpStatus(status.as_u16()),
            error_message(&body).unwrap_or_else(|| status.to_string()),
        ))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    map_reqwest_error(err)
                } else {
                    ApiError::new(FailureKind::Decode, err.to_string())
                }
            })
    }
}

#[async_trait::async_trait]
impl FleetApi for ReqwestFleetApi {
    async fn inventory(
        &self,
        filter: &InventoryFilter,
        page: u32,
        page_size: u32,
    ) -> Result<InventoryPage, ApiError> {
        let mut url = self.endpoint("api/servers")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("page", &page.to_string());
            query.append_pair("page_size", &page_size.to_string());
            if let Some(search) = &filter.search {
                query.append_pair("search", search);
            }
            if let Some(group_id) = filter.group_id {
                query.append_pair("group_id", &group_id.to_string());
            }
            if let Some(status) = &filter.status {
                query.append_pair("status", status);
            }
        }
        let body: InventoryResponse = self.send_json(self.client.get(url)).await?;
        Ok(InventoryPage {
            records: body.records,
            total_count: body.total_count,
        })
    }

    async fn exists_by_key(&self, key: &HostKey) -> Result<ExistenceVerdict, ApiError> {
        let mut url = self.endpoint("api/servers/exists")?;
        url.query_pairs_mut().append_pair("ip", key.as_str());
        let body: ExistsResponse = self.send_json(self.client.get(url)).await?;
        Ok(ExistenceVerdict {
            // The backend answers "is this address still free".
            exists: !body.valid,
            message: body.message,
        })
    }

    async fn test_connectivity(&self, targets: &[ProbeTarget]) -> Result<ProbeReport, ApiError> {
        let url = self.endpoint("api/servers/test-connection")?;
        let payload = TestConnectivityRequest {
            targets: targets.iter().map(|t| HostDto::from(&t.host)).collect(),
        };
        let body: TestConnectivityResponse =
            self.send_json(self.client.post(url).json(&payload)).await?;
        Ok(body.into_report())
    }

    async fn create_batch(
        &self,
        hosts: &[VerifiedHost],
        group_id: Option<u64>,
    ) -> Result<(), ApiError> {
        let url = self.endpoint("api/servers/batch")?;
        let payload = CreateBatchRequest {
            servers: hosts.iter().map(|h| HostDto::from(h.host())).collect(),
            group_id,
        };
        self.send(self.client.post(url).json(&payload)).await?;
        Ok(())
    }

    async fn trigger_operation(
        &self,
        kind: &OperationKind,
        ids: Option<&[RecordId]>,
        batch_size: usize,
    ) -> Result<bool, ApiError> {
        let url = self.endpoint(&format!("api/{}/trigger", kind.path_segment()))?;
        let payload = TriggerRequest { ids, batch_size };
        let body: TriggerResponse = self.send_json(self.client.post(url).json(&payload)).await?;
        Ok(body.accepted)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        return ApiError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_builder() {
        return ApiError::new(FailureKind::InvalidUrl, err.to_string());
    }
    ApiError::new(FailureKind::Network, err.to_string())
}

/// Pulls a human-readable reason out of an error body, JSON or plain text.
fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(trimmed) {
        for field in ["message", "error", "detail"] {
            if let Some(serde_json::Value::String(text)) = map.get(field) {
                return Some(text.clone());
            }
        }
    }
    Some(trimmed.to_string())
}

#[derive(Debug, Deserialize)]
struct InventoryResponse {
    #[serde(alias = "items", alias = "results")]
    records: Vec<InventoryRecord>,
    #[serde(alias = "total", alias = "count")]
    total_count: u64,
}

#[derive(Debug, Deserialize)]
struct ExistsResponse {
    valid: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct HostDto<'a> {
    ip: String,
    port: u16,
    username: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ssh_key_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hostname: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    os: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "is_empty_map")]
    extra: &'a BTreeMap<String, String>,
}

impl<'a> From<&'a HostSpec> for HostDto<'a> {
    fn from(host: &'a HostSpec) -> Self {
        let (password, ssh_key_id) = match &host.credential {
            Credential::Password(password) => (Some(password.as_str()), None),
            Credential::KeyId(id) => (None, Some(*id)),
        };
        Self {
            ip: host.key().to_string(),
            port: host.port,
            username: &host.username,
            password,
            ssh_key_id,
            hostname: host.hostname.as_deref(),
            os: host.os.as_deref(),
            description: host.description.as_deref(),
            extra: &host.extra,
        }
    }
}

fn is_empty_map(map: &&BTreeMap<String, String>) -> bool {
    map.is_empty()
}

#[derive(Debug, Serialize)]
struct TestConnectivityRequest<'a> {
    targets: Vec<HostDto<'a>>,
}

#[derive(Debug, Deserialize)]
struct TestConnectivityResponse {
    #[serde(default)]
    results: Vec<ProbeResultDto>,
    #[serde(default)]
    successful_count: Option<usize>,
}

impl TestConnectivityResponse {
    fn into_report(self) -> ProbeReport {
        let results: Vec<ProbeResult> = self.results.into_iter().map(ProbeResult::from).collect();
        let successful_count = self
            .successful_count
            .unwrap_or_else(|| results.iter().filter(|r| r.succeeded).count());
        ProbeReport {
            results,
            successful_count,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeResultDto {
    #[serde(alias = "ip")]
    key: String,
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    discovered: Option<DiscoveredDto>,
}

#[derive(Debug, Default, Deserialize)]
struct DiscoveredDto {
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default, alias = "os_type")]
    os: Option<String>,
    #[serde(flatten)]
    other: BTreeMap<String, serde_json::Value>,
}

impl From<ProbeResultDto> for ProbeResult {
    fn from(dto: ProbeResultDto) -> Self {
        let mut discovered = Vec::new();
        if let Some(found) = dto.discovered {
            if let Some(hostname) = found.hostname {
                discovered.push(DiscoveredAttribute::Hostname(hostname));
            }
            if let Some(os) = found.os {
                discovered.push(DiscoveredAttribute::OperatingSystem(os));
            }
            for (key, value) in found.other {
                let value = match value {
                    serde_json::Value::String(text) => text,
                    serde_json::Value::Null => continue,
                    other => other.to_string(),
                };
                discovered.push(DiscoveredAttribute::Other { key, value });
            }
        }
        Self {
            key: HostKey::from_reported(&dto.key),
            succeeded: dto.status.eq_ignore_ascii_case("success"),
            message: dto.message,
            detail: dto.detail,
            discovered,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateBatchRequest<'a> {
    servers: Vec<HostDto<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_id: Option<u64>,
}

#[derive(Debug, Serialize)]
struct TriggerRequest<'a> {
    ids: Option<&'a [RecordId]>,
    batch_size: usize,
}

#[derive(Debug, Deserialize)]
struct TriggerResponse {
    accepted: bool,
}
