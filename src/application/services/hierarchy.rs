//! Hierarchy service
//!
//! Builds stores from the flat source file and moves them to and from disk.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::application::{ApplicationResult, IoResultExt};
use crate::domain::{HierarchyBuilder, HierarchyRecord, HierarchyStore};
use crate::infrastructure::traits::FileSystem;

/// Outcome of building a store from source.
#[derive(Debug)]
pub struct BuildOutput {
    pub store: HierarchyStore,
    pub record_count: usize,
    /// Codes that appeared more than once; the later record won
    pub duplicate_codes: Vec<String>,
}

pub struct HierarchyService {
    fs: Arc<dyn FileSystem>,
    max_leaf_depth: i64,
}

impl HierarchyService {
    pub fn new(fs: Arc<dyn FileSystem>, max_leaf_depth: i64) -> Self {
        Self { fs, max_leaf_depth }
    }

    /// Read a JSON array of records from `source` and build a store from it.
    #[instrument(level = "debug", skip(self))]
    pub fn build_from_source(&self, source: &Path) -> ApplicationResult<BuildOutput> {
        let content = self
            .fs
            .read_to_string(source)
            .with_path_context("read hierarchy source", source)?;
        let records = HierarchyRecord::parse_json_array(&content)?;
        debug!("Parsed {} records from {}", records.len(), source.display());

        let mut builder = HierarchyBuilder::with_max_leaf_depth(self.max_leaf_depth);
        let store = builder.build(&records)?;
        Ok(BuildOutput {
            store,
            record_count: records.len(),
            duplicate_codes: builder.duplicate_codes().to_vec(),
        })
    }

    pub fn save(&self, store: &HierarchyStore, path: &Path) -> ApplicationResult<()> {
        let bytes = store.to_bytes()?;
        self.fs
            .ensure_parent(path)
            .with_path_context("create store directory", path)?;
        self.fs
            .write(path, &bytes)
            .with_path_context("write store", path)?;
        info!("Saved store with {} codes to {}", store.len(), path.display());
        Ok(())
    }

    pub fn load(&self, path: &Path) -> ApplicationResult<HierarchyStore> {
        let bytes = self.fs.read(path).with_path_context("read store", path)?;
        let store = HierarchyStore::from_bytes(&bytes)?;
        debug!("Loaded store with {} codes from {}", store.len(), path.display());
        Ok(store)
    }
}
