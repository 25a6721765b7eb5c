use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::inventory::{InventoryFilter, RecordId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionMode {
    Explicit(BTreeSet<RecordId>),
    /// Everything matching the filter, kept symbolic until ids are needed.
    AllMatching { total_count: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterChangePolicy {
    /// Drop every selection when the filter changes.
    #[default]
    ClearAll,
    /// Only drop "all matching" selections; explicit ids survive.
    KeepExplicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionCount {
    Exact(usize),
    AllMatching { total: u64 },
}

/// What a dispatch should act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchTarget {
    Ids(Vec<RecordId>),
    AllMatching { filter: InventoryFilter, count: u64 },
}

impl DispatchTarget {
    pub fn len(&self) -> u64 {
        match self {
            DispatchTarget::Ids(ids) => ids.len() as u64,
            DispatchTarget::AllMatching { count, .. } => *count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Returned by [`Selection::toggle`] when the selection is still symbolic and
/// the full id list for `filter` has to be fetched first.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("selection covers all {total_count} records matching the filter; ids must be fetched first")]
pub struct MaterializationRequired {
    pub filter: InventoryFilter,
    pub total_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    filter: InventoryFilter,
    mode: SelectionMode,
}

impl Selection {
    pub fn new(filter: InventoryFilter) -> Self {
        Self {
            filter,
            mode: SelectionMode::Explicit(BTreeSet::new()),
        }
    }

    pub fn filter(&self) -> &InventoryFilter {
        &self.filter
    }

    pub fn mode(&self) -> &SelectionMode {
        &self.mode
    }

    pub fn is_all_matching(&self) -> bool {
        matches!(self.mode, SelectionMode::AllMatching { .. })
    }

    /// Flips `id` and returns whether it is now selected.
    pub fn toggle(&mut self, id: RecordId) -> Result<bool, MaterializationRequired> {
        match &mut self.mode {
            SelectionMode::Explicit(ids) => {
                if ids.remove(&id) {
                    Ok(false)
                } else {
                    ids.insert(id);
                    Ok(true)
                }
            }
            SelectionMode::AllMatching { total_count } => Err(MaterializationRequired {
                filter: self.filter.clone(),
                total_count: *total_count,
            }),
        }
    }

    /// Replaces a symbolic selection by the fetched id list of its filter.
    pub fn materialize_with<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = RecordId>,
    {
        self.mode = SelectionMode::Explicit(ids.into_iter().collect());
    }

    pub fn select_all_matching(&mut self, filter: InventoryFilter, total_count: u64) {
        self.filter = filter;
        self.mode = SelectionMode::AllMatching { total_count };
    }

    pub fn select_none(&mut self) {
        self.mode = SelectionMode::Explicit(BTreeSet::new());
    }

    /// Called when the owning dialog or operation closes.
    pub fn clear(&mut self) {
        self.select_none();
    }

    /// `id` is assumed to come from the current filter's result set.
    pub fn is_selected(&self, id: RecordId) -> bool {
        match &self.mode {
            SelectionMode::Explicit(ids) => ids.contains(&id),
            SelectionMode::AllMatching { .. } => true,
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.mode {
            SelectionMode::Explicit(ids) => ids.is_empty(),
            SelectionMode::AllMatching { total_count } => *total_count == 0,
        }
    }

    pub fn resolved_count(&self) -> SelectionCount {
        match &self.mode {
            SelectionMode::Explicit(ids) => SelectionCount::Exact(ids.len()),
            SelectionMode::AllMatching { total_count } => SelectionCount::AllMatching {
                total: *total_count,
            },
        }
    }

    pub fn materialize(&self) -> DispatchTarget {
        match &self.mode {
            SelectionMode::Explicit(ids) => DispatchTarget::Ids(ids.iter().copied().collect()),
            SelectionMode::AllMatching { total_count } => DispatchTarget::AllMatching {
                filter: self.filter.clone(),
                count: *total_count,
            },
        }
    }

    /// Rebinds the selection to `filter`. Returns true when anything was
    /// dropped.
    pub fn filter_changed(&mut self, filter: InventoryFilter, policy: FilterChangePolicy) -> bool {
        if filter == self.filter {
            return false;
        }
        self.filter = filter;
        let drop_selection = match (&self.mode, policy) {
            (SelectionMode::AllMatching { .. }, _) => true,
            (SelectionMode::Explicit(ids), FilterChangePolicy::ClearAll) => !ids.is_empty(),
            (SelectionMode::Explicit(_), FilterChangePolicy::KeepExplicit) => false,
        };
        if drop_selection {
            self.select_none();
        }
        drop_selection
    }
}

impl Default for Selection {
    fn default() -> Self {
        Self::new(InventoryFilter::default())
    }
}
