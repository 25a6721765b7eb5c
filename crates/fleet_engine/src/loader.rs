use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use fleet_core::{
    AppendMode, ApplyOutcome, InventoryCollection, InventoryFilter, InventoryRecord, PageRequest,
};
use fleet_logging::{fleet_debug, fleet_warn};
use serde::{Deserialize, Serialize};

use crate::config::duration_ms;
use crate::debounce::{Debouncer, Ticket};
use crate::{ApiError, FleetApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    pub page_size: u32,
    #[serde(with = "duration_ms", rename = "debounce_ms")]
    pub debounce: Duration,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            page_size: 50,
            debounce: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied { added: usize, replaced: usize },
    /// Nothing left to fetch for the current filter.
    Exhausted,
    /// A newer filter or search overtook this load; its result was dropped.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InventoryView {
    pub filter: InventoryFilter,
    pub records: Vec<InventoryRecord>,
    pub total_count: u64,
    pub has_more: bool,
}

/// Page-by-page view of the remote inventory for one filter at a time.
pub struct InventoryLoader<A: FleetApi + ?Sized> {
    api: Arc<A>,
    settings: LoaderSettings,
    collection: Mutex<InventoryCollection>,
    debouncer: Debouncer,
}

impl<A: FleetApi + ?Sized> InventoryLoader<A> {
    pub fn new(api: Arc<A>, settings: LoaderSettings) -> Self {
        Self {
            api,
            settings,
            collection: Mutex::new(InventoryCollection::default()),
            debouncer: Debouncer::new(settings.debounce),
        }
    }

    pub fn filter(&self) -> InventoryFilter {
        self.lock().filter().clone()
    }

    pub fn has_more(&self) -> bool {
        self.lock().has_more()
    }

    pub fn snapshot(&self) -> InventoryView {
        let collection = self.lock();
        InventoryView {
            filter: collection.filter().clone(),
            records: collection.records().to_vec(),
            total_count: collection.total_count(),
            has_more: collection.has_more(),
        }
    }

    /// Switches to `filter` and loads its first page. Pending searches are
    /// abandoned.
    pub async fn reload(&self, filter: InventoryFilter) -> Result<LoadOutcome, ApiError> {
        let ticket = self.debouncer.bypass();
        self.load_first_page(filter, ticket).await
    }

    /// Debounced search-as-you-type. Only the last call of a burst issues a
    /// request, and only the newest response is applied.
    pub async fn search(&self, text: &str) -> Result<LoadOutcome, ApiError> {
        let Some(ticket) = self.debouncer.settle().await else {
            return Ok(LoadOutcome::Superseded);
        };
        let filter = self.filter().with_search(text);
        self.load_first_page(filter, ticket).await
    }

    pub async fn load_more(&self) -> Result<LoadOutcome, ApiError> {
        let request = {
            let collection = self.lock();
            if collection.pages_loaded() > 0 && !collection.has_more() {
                return Ok(LoadOutcome::Exhausted);
            }
            collection.next_request(self.settings.page_size)
        };
        self.fetch_and_apply(&request, AppendMode::KeepExisting, None)
            .await
    }

    /// Re-fetches every loaded page, replacing held attributes.
    pub async fn refresh_loaded(&self) -> Result<LoadOutcome, ApiError> {
        let requests = self.lock().refresh_requests(self.settings.page_size);
        let (mut added, mut replaced) = (0, 0);
        for request in &requests {
            match self.fetch_and_apply(request, AppendMode::Refresh, None).await? {
                LoadOutcome::Applied {
                    added: a,
                    replaced: r,
                } => {
                    added += a;
                    replaced += r;
                }
                LoadOutcome::Superseded => return Ok(LoadOutcome::Superseded),
                LoadOutcome::Exhausted => {}
            }
        }
        Ok(LoadOutcome::Applied { added, replaced })
    }

    async fn load_first_page(
        &self,
        filter: InventoryFilter,
        ticket: Ticket,
    ) -> Result<LoadOutcome, ApiError> {
        let request = self.lock().first_page_request(filter, self.settings.page_size);
        self.fetch_and_apply(&request, AppendMode::Replace, Some(ticket))
            .await
    }

    async fn fetch_and_apply(
        &self,
        request: &PageRequest,
        mode: AppendMode,
        ticket: Option<Ticket>,
    ) -> Result<LoadOutcome, ApiError> {
        let page = self
            .api
            .inventory(&request.filter, request.page, request.page_size)
            .await
            .inspect_err(|err| {
                fleet_warn!("inventory page {} failed: {}", request.page, err);
            })?;

        if ticket.is_some_and(|ticket| !self.debouncer.is_latest(ticket)) {
            fleet_debug!("dropping superseded inventory page {}", request.page);
            return Ok(LoadOutcome::Superseded);
        }
        let outcome = self.lock().apply(request, page, mode);
        match outcome {
            ApplyOutcome::Applied { added, replaced } => {
                Ok(LoadOutcome::Applied { added, replaced })
            }
            ApplyOutcome::Stale => {
                fleet_debug!(
                    "dropping stale inventory page {} (generation {})",
                    request.page,
                    request.generation
                );
                Ok(LoadOutcome::Superseded)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, InventoryCollection> {
        self.collection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
