#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Once};
use std::time::Duration;

use fleet_core::{
    DiscoveredAttribute, ExistenceVerdict, HostKey, InventoryFilter, InventoryPage,
    InventoryRecord, ProbeReport, ProbeResult, ProbeTarget, RecordId, VerifiedHost,
};
use fleet_engine::{ApiError, FailureKind, FleetApi, OperationKind};

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(fleet_logging::initialize_for_tests);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Inventory {
        search: Option<String>,
        page: u32,
        page_size: u32,
    },
    Exists(String),
    Probe(Vec<String>),
    Create {
        addresses: Vec<String>,
        group_id: Option<u64>,
    },
    Trigger {
        kind: OperationKind,
        ids: Option<Vec<RecordId>>,
        batch_size: usize,
    },
}

/// In-memory backend recording every call it receives.
#[derive(Default)]
pub struct FakeApi {
    records: Mutex<Vec<InventoryRecord>>,
    existing: Mutex<HashSet<String>>,
    unreachable: Mutex<HashSet<String>>,
    search_delays: Mutex<HashMap<String, Duration>>,
    exists_delay: Mutex<Duration>,
    probe_delay: Mutex<Duration>,
    create_error: Mutex<Option<ApiError>>,
    reject_trigger_after: Mutex<Option<usize>>,
    max_page_size: Mutex<Option<u32>>,
    phantom_total: Mutex<u64>,
    fail_inventory: AtomicBool,
    fail_probe: AtomicBool,
    calls: Mutex<Vec<Call>>,
}

pub fn record(id: RecordId) -> InventoryRecord {
    InventoryRecord {
        id,
        hostname: format!("host-{id:05}"),
        address: format!("10.{}.{}.{}", id / 65536, (id / 256) % 256, id % 256),
        os: Some("linux".to_string()),
        group: None,
        status: Some("online".to_string()),
    }
}

pub fn transport_error() -> ApiError {
    ApiError {
        kind: FailureKind::Network,
        message: "connection refused".to_string(),
    }
}

impl FakeApi {
    pub fn with_records(count: u64) -> Self {
        let api = Self::default();
        *api.records.lock().unwrap() = (1..=count).map(record).collect();
        api
    }

    pub fn mark_existing(&self, address: &str) {
        self.existing.lock().unwrap().insert(address.to_string());
    }

    pub fn mark_unreachable(&self, address: &str) {
        self.unreachable.lock().unwrap().insert(address.to_string());
    }

    pub fn delay_search(&self, search: &str, delay: Duration) {
        self.search_delays
            .lock()
            .unwrap()
            .insert(search.to_string(), delay);
    }

    pub fn set_exists_delay(&self, delay: Duration) {
        *self.exists_delay.lock().unwrap() = delay;
    }

    pub fn set_probe_delay(&self, delay: Duration) {
        *self.probe_delay.lock().unwrap() = delay;
    }

    pub fn fail_create_with(&self, error: ApiError) {
        *self.create_error.lock().unwrap() = Some(error);
    }

    /// Accepts this many trigger requests, then answers `accepted: false`.
    pub fn reject_trigger_after(&self, accepted: usize) {
        *self.reject_trigger_after.lock().unwrap() = Some(accepted);
    }

    /// Serves at most `limit` records per inventory page, whatever was asked.
    pub fn cap_page_size(&self, limit: u32) {
        *self.max_page_size.lock().unwrap() = Some(limit);
    }

    /// Reports `extra` more matches than it ever lists.
    pub fn overstate_total(&self, extra: u64) {
        *self.phantom_total.lock().unwrap() = extra;
    }

    pub fn set_fail_inventory(&self, fail: bool) {
        self.fail_inventory.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_probe(&self, fail: bool) {
        self.fail_probe.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn inventory_calls(&self) -> Vec<Call> {
        self.calls_matching(|call| matches!(call, Call::Inventory { .. }))
    }

    pub fn probe_calls(&self) -> Vec<Call> {
        self.calls_matching(|call| matches!(call, Call::Probe(_)))
    }

    pub fn trigger_calls(&self) -> Vec<Call> {
        self.calls_matching(|call| matches!(call, Call::Trigger { .. }))
    }

    pub fn create_calls(&self) -> Vec<Call> {
        self.calls_matching(|call| matches!(call, Call::Create { .. }))
    }

    fn calls_matching(&self, keep: impl Fn(&Call) -> bool) -> Vec<Call> {
        self.calls().into_iter().filter(|call| keep(call)).collect()
    }

    fn log(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl FleetApi for FakeApi {
    async fn inventory(
        &self,
        filter: &InventoryFilter,
        page: u32,
        page_size: u32,
    ) -> Result<InventoryPage, ApiError> {
        self.log(Call::Inventory {
            search: filter.search.clone(),
            page,
            page_size,
        });
        let delay = filter
            .search
            .as_ref()
            .and_then(|search| self.search_delays.lock().unwrap().get(search).copied());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_inventory.load(Ordering::SeqCst) {
            return Err(transport_error());
        }

        let matching: Vec<InventoryRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|rec| match &filter.search {
                Some(search) => rec.hostname.contains(search.as_str()),
                None => true,
            })
            .cloned()
            .collect();
        let page_size = match *self.max_page_size.lock().unwrap() {
            Some(limit) => page_size.min(limit),
            None => page_size,
        };
        let start = (page.saturating_sub(1) as usize) * page_size as usize;
        Ok(InventoryPage {
            total_count: matching.len() as u64 + *self.phantom_total.lock().unwrap(),
            records: matching
                .into_iter()
                .skip(start)
                .take(page_size as usize)
                .collect(),
        })
    }

    async fn exists_by_key(&self, key: &HostKey) -> Result<ExistenceVerdict, ApiError> {
        self.log(Call::Exists(key.to_string()));
        let delay = *self.exists_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(ExistenceVerdict {
            exists: self.existing.lock().unwrap().contains(key.as_str()),
            message: None,
        })
    }

    async fn test_connectivity(&self, targets: &[ProbeTarget]) -> Result<ProbeReport, ApiError> {
        self.log(Call::Probe(
            targets.iter().map(|target| target.key.to_string()).collect(),
        ));
        let delay = *self.probe_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_probe.load(Ordering::SeqCst) {
            return Err(transport_error());
        }

        let unreachable = self.unreachable.lock().unwrap().clone();
        // Reported in reverse so callers cannot rely on positional matching.
        let results: Vec<ProbeResult> = targets
            .iter()
            .rev()
            .map(|target| {
                let succeeded = !unreachable.contains(target.key.as_str());
                ProbeResult {
                    key: target.key.clone(),
                    succeeded,
                    message: (!succeeded).then(|| "authentication failed".to_string()),
                    detail: None,
                    discovered: if succeeded {
                        vec![DiscoveredAttribute::OperatingSystem("ubuntu".to_string())]
                    } else {
                        Vec::new()
                    },
                }
            })
            .collect();
        let successful_count = results.iter().filter(|result| result.succeeded).count();
        Ok(ProbeReport {
            results,
            successful_count,
        })
    }

    async fn create_batch(
        &self,
        hosts: &[VerifiedHost],
        group_id: Option<u64>,
    ) -> Result<(), ApiError> {
        self.log(Call::Create {
            addresses: hosts.iter().map(|host| host.host().key().to_string()).collect(),
            group_id,
        });
        match self.create_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn trigger_operation(
        &self,
        kind: &OperationKind,
        ids: Option<&[RecordId]>,
        batch_size: usize,
    ) -> Result<bool, ApiError> {
        let previous = self.trigger_calls().len();
        self.log(Call::Trigger {
            kind: kind.clone(),
            ids: ids.map(<[RecordId]>::to_vec),
            batch_size,
        });
        let limit = *self.reject_trigger_after.lock().unwrap();
        Ok(limit.map_or(true, |limit| previous < limit))
    }
}
