use std::sync::Arc;

use fleet_core::{
    DispatchTarget, FilterChangePolicy, InventoryFilter, RecordId, Selection, SelectionCount,
};
use fleet_logging::{fleet_debug, fleet_info};

use crate::{ApiError, FleetApi};

/// Selection over a partially loaded inventory. "All matching" stays symbolic
/// until a partial deselect or a consumer forces it into explicit ids.
pub struct SelectionController<A: FleetApi + ?Sized> {
    api: Arc<A>,
    selection: Selection,
    policy: FilterChangePolicy,
}

impl<A: FleetApi + ?Sized> SelectionController<A> {
    pub fn new(api: Arc<A>, filter: InventoryFilter, policy: FilterChangePolicy) -> Self {
        Self {
            api,
            selection: Selection::new(filter),
            policy,
        }
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn is_selected(&self, id: RecordId) -> bool {
        self.selection.is_selected(id)
    }

    pub fn resolved_count(&self) -> SelectionCount {
        self.selection.resolved_count()
    }

    pub fn materialize(&self) -> DispatchTarget {
        self.selection.materialize()
    }

    pub fn select_none(&mut self) {
        self.selection.select_none();
    }

    /// Flips `id`. A symbolic selection is first expanded with one bulk id
    /// fetch; on fetch failure the selection is left untouched.
    pub async fn toggle(&mut self, id: RecordId) -> Result<bool, ApiError> {
        match self.selection.toggle(id) {
            Ok(selected) => Ok(selected),
            Err(required) => {
                fleet_info!(
                    "expanding all-matching selection of {} records before toggle",
                    required.total_count
                );
                let ids = self
                    .api
                    .fetch_all_ids(&required.filter, required.total_count)
                    .await?;
                self.selection.materialize_with(ids);
                // Explicit mode cannot fail to toggle.
                Ok(self.selection.toggle(id).unwrap_or(false))
            }
        }
    }

    /// Selects everything matching `filter`. Uses `known_total` when the
    /// caller already has it, otherwise a single count request.
    pub async fn select_all_matching(
        &mut self,
        filter: InventoryFilter,
        known_total: Option<u64>,
    ) -> Result<u64, ApiError> {
        let total = match known_total {
            Some(total) => total,
            None => self.api.count(&filter).await?,
        };
        fleet_debug!("selecting all {} records matching {:?}", total, filter);
        self.selection.select_all_matching(filter, total);
        Ok(total)
    }

    /// Forces an explicit id list, fetching it if the selection is symbolic.
    pub async fn resolve_ids(&mut self) -> Result<Vec<RecordId>, ApiError> {
        match self.selection.materialize() {
            DispatchTarget::Ids(ids) => Ok(ids),
            DispatchTarget::AllMatching { filter, count } => {
                let ids = self.api.fetch_all_ids(&filter, count).await?;
                self.selection.materialize_with(ids.iter().copied());
                Ok(ids)
            }
        }
    }

    /// Rebinds to a new filter; returns true when the selection was dropped.
    pub fn filter_changed(&mut self, filter: InventoryFilter) -> bool {
        self.selection.filter_changed(filter, self.policy)
    }

    /// Call when the owning dialog closes or its operation completes.
    pub fn finish(&mut self) {
        self.selection.clear();
    }
}
