//! Hierarchy builder: reconstructs the nomenclature tree from flat,
//! indent-leveled records.

use tracing::{debug, info, instrument, warn};

use crate::domain::entities::HierarchyRecord;
use crate::domain::error::DomainError;
use crate::domain::store::{HierarchyNode, HierarchyStore};

/// Result type for hierarchy construction.
pub type BuildResult<T> = Result<T, DomainError>;

/// Rows at or below this depth are leaves unless flagged as group headings.
pub const DEFAULT_MAX_LEAF_DEPTH: i64 = 9;

const PROGRESS_INTERVAL: usize = 1000;

/// Constructs a [`HierarchyStore`] from flat records.
///
/// Parents are not given explicitly: a record hangs below the nearest
/// preceding record that is still open and has a smaller depth.
pub struct HierarchyBuilder {
    max_leaf_depth: i64,
    duplicate_codes: Vec<String>,
}

impl Default for HierarchyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HierarchyBuilder {
    pub fn new() -> Self {
        Self::with_max_leaf_depth(DEFAULT_MAX_LEAF_DEPTH)
    }

    pub fn with_max_leaf_depth(max_leaf_depth: i64) -> Self {
        Self {
            max_leaf_depth,
            duplicate_codes: Vec::new(),
        }
    }

    /// Codes that were indexed more than once during the last build.
    ///
    /// The later record wins the index slot; the earlier node stays in the
    /// tree but is no longer reachable by code.
    pub fn duplicate_codes(&self) -> &[String] {
        &self.duplicate_codes
    }

    /// Build the store.
    ///
    /// Records are stable-sorted by depth, then attached in that order using
    /// an explicit stack of open ancestors (one slot per open depth level).
    #[instrument(level = "debug", skip(self, records), fields(records = records.len()))]
    pub fn build(&mut self, records: &[HierarchyRecord]) -> BuildResult<HierarchyStore> {
        self.duplicate_codes.clear();
        Self::validate(records)?;

        info!("Building hierarchy from {} records", records.len());

        let mut sorted: Vec<&HierarchyRecord> = records.iter().collect();
        sorted.sort_by_key(|record| record.depth);

        let mut store = HierarchyStore::empty();
        let root = store.root_index();
        let mut stack = vec![(-1_i64, root)];

        for (i, record) in sorted.into_iter().enumerate() {
            if i > 0 && i % PROGRESS_INTERVAL == 0 {
                debug!("Processed {} records", i);
            }

            while stack
                .last()
                .is_some_and(|&(open_depth, _)| open_depth >= record.depth)
            {
                stack.pop();
            }
            // The root sits at depth -1 and is never popped.
            let parent = stack.last().map_or(root, |&(_, idx)| idx);

            let ancestor_path = store.child_ancestor_path(parent);
            let idx = store.attach(parent, HierarchyNode::from_record(record, ancestor_path));

            if record.is_group_heading || record.depth < self.max_leaf_depth {
                stack.push((record.depth, idx));
            }

            let key = record.code.trim();
            if !key.is_empty() && store.register(key.to_string(), idx).is_some() {
                warn!("Duplicate code {:?} in source data, keeping the later record", key);
                self.duplicate_codes.push(key.to_string());
            }
        }

        info!(
            "Hierarchy built with {} indexed codes ({} duplicates)",
            store.len(),
            self.duplicate_codes.len()
        );
        Ok(store)
    }

    fn validate(records: &[HierarchyRecord]) -> BuildResult<()> {
        for (position, record) in records.iter().enumerate() {
            if record.depth < 0 {
                return Err(DomainError::SourceData {
                    position,
                    reason: format!("negative depth {}", record.depth),
                });
            }
        }
        Ok(())
    }
}
