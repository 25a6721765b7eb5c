//! Owned, resettable collection of inventory pages held for one filter.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub type RecordId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub id: RecordId,
    #[serde(default)]
    pub hostname: String,
    #[serde(default, alias = "ip")]
    pub address: String,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Filter descriptor for the remote inventory. `Default` matches everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct InventoryFilter {
    pub search: Option<String>,
    pub group_id: Option<u64>,
    pub status: Option<String>,
}

impl InventoryFilter {
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        let search = search.into();
        let trimmed = search.trim();
        self.search = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InventoryPage {
    pub records: Vec<InventoryRecord>,
    pub total_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendMode {
    /// Records already held keep their attributes.
    KeepExisting,
    /// Records already held are replaced by the fetched copy.
    Refresh,
    /// The page starts a new listing: held pages are discarded and the
    /// collection rebinds to the request's filter.
    Replace,
}

/// A fetch the collection wants issued. The generation ties the eventual
/// response back to the filter it was requested under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub generation: u64,
    pub filter: InventoryFilter,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { added: usize, replaced: usize },
    /// The response belongs to a superseded filter or reload and was dropped.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryCollection {
    filter: InventoryFilter,
    generation: u64,
    records: Vec<InventoryRecord>,
    index: HashMap<RecordId, usize>,
    total_count: u64,
    pages_loaded: u32,
}

impl InventoryCollection {
    pub fn new(filter: InventoryFilter) -> Self {
        Self {
            filter,
            generation: 0,
            records: Vec::new(),
            index: HashMap::new(),
            total_count: 0,
            pages_loaded: 0,
        }
    }

    /// Discards every held page and binds the collection to `filter`.
    pub fn reset(&mut self, filter: InventoryFilter) {
        self.filter = filter;
        self.generation += 1;
        self.records.clear();
        self.index.clear();
        self.total_count = 0;
        self.pages_loaded = 0;
    }

    pub fn filter(&self) -> &InventoryFilter {
        &self.filter
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn records(&self) -> &[InventoryRecord] {
        &self.records
    }

    pub fn get(&self, id: RecordId) -> Option<&InventoryRecord> {
        self.index.get(&id).map(|&pos| &self.records[pos])
    }

    pub fn held_count(&self) -> usize {
        self.records.len()
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn pages_loaded(&self) -> u32 {
        self.pages_loaded
    }

    /// Derived from counts rather than page emptiness so it survives the
    /// server's total drifting between requests.
    pub fn has_more(&self) -> bool {
        (self.records.len() as u64) < self.total_count
    }

    pub fn next_request(&self, page_size: u32) -> PageRequest {
        PageRequest {
            generation: self.generation,
            filter: self.filter.clone(),
            page: self.pages_loaded + 1,
            page_size,
        }
    }

    /// First page of a new listing for `filter`. Held pages stay until the
    /// response is applied with [`AppendMode::Replace`]; requests issued
    /// before this one become stale.
    pub fn first_page_request(&mut self, filter: InventoryFilter, page_size: u32) -> PageRequest {
        self.generation += 1;
        PageRequest {
            generation: self.generation,
            filter,
            page: 1,
            page_size,
        }
    }

    /// Requests re-fetching every page loaded so far.
    pub fn refresh_requests(&self, page_size: u32) -> Vec<PageRequest> {
        (1..=self.pages_loaded.max(1))
            .map(|page| PageRequest {
                generation: self.generation,
                filter: self.filter.clone(),
                page,
                page_size,
            })
            .collect()
    }

    pub fn apply(
        &mut self,
        request: &PageRequest,
        page: InventoryPage,
        mode: AppendMode,
    ) -> ApplyOutcome {
        if request.generation != self.generation {
            return ApplyOutcome::Stale;
        }
        if mode == AppendMode::Replace {
            self.filter = request.filter.clone();
            self.records.clear();
            self.index.clear();
            self.pages_loaded = 0;
        } else if request.filter != self.filter {
            return ApplyOutcome::Stale;
        }

        let mut added = 0;
        let mut replaced = 0;
        for record in page.records {
            match self.index.get(&record.id) {
                Some(&pos) => {
                    if mode == AppendMode::Refresh {
                        self.records[pos] = record;
                        replaced += 1;
                    }
                }
                None => {
                    self.index.insert(record.id, self.records.len());
                    self.records.push(record);
                    added += 1;
                }
            }
        }

        self.total_count = page.total_count;
        self.pages_loaded = self.pages_loaded.max(request.page);
        ApplyOutcome::Applied { added, replaced }
    }
}

impl Default for InventoryCollection {
    fn default() -> Self {
        Self::new(InventoryFilter::default())
    }
}
