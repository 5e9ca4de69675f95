//! Service container for dependency injection
//!
//! Wires up all services with their dependencies.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::services::{HierarchyService, TraversalEngine};
use crate::application::{ApplicationError, SessionCodec};
use crate::config::Settings;
use crate::domain::{HierarchyNavigator, HierarchyStore};
use crate::infrastructure::oracle::{ChatCompletionsOracle, OfflineOracle};
use crate::infrastructure::traits::{DecisionOracle, FileSystem, RealFileSystem};
use crate::infrastructure::{InfraError, InfraResult};

/// Container holding all application services.
///
/// The oracle is created lazily: commands that never classify do not need
/// an API key.
pub struct ServiceContainer {
    /// Application settings
    pub settings: Arc<Settings>,

    /// Filesystem abstraction
    pub fs: Arc<dyn FileSystem>,

    oracle: OnceLock<Arc<dyn DecisionOracle>>,
}

impl ServiceContainer {
    /// Create a new service container with real implementations.
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Arc::new(settings),
            fs: Arc::new(RealFileSystem),
            oracle: OnceLock::new(),
        }
    }

    /// Create a service container with custom dependencies (for testing).
    pub fn with_deps(
        settings: Settings,
        fs: Arc<dyn FileSystem>,
        oracle: Arc<dyn DecisionOracle>,
    ) -> Self {
        let container = Self {
            settings: Arc::new(settings),
            fs,
            oracle: OnceLock::new(),
        };
        let _ = container.oracle.set(oracle);
        container
    }

    pub fn hierarchy_service(&self) -> HierarchyService {
        HierarchyService::new(self.fs.clone(), self.settings.max_leaf_depth)
    }

    /// Load the store from `path`, or from the configured store path.
    pub fn load_store(&self, path: Option<&Path>) -> InfraResult<Arc<HierarchyStore>> {
        let path = path.unwrap_or(self.settings.store_path.as_path());
        debug!("Loading store from {}", path.display());
        Ok(Arc::new(self.hierarchy_service().load(path)?))
    }

    /// The decision oracle, built from settings on first use.
    pub fn oracle(&self) -> InfraResult<Arc<dyn DecisionOracle>> {
        if let Some(oracle) = self.oracle.get() {
            return Ok(oracle.clone());
        }
        let oracle: Arc<dyn DecisionOracle> =
            Arc::new(ChatCompletionsOracle::from_config(&self.settings.oracle)?);
        Ok(self.oracle.get_or_init(|| oracle).clone())
    }

    /// Codec sealing session blobs with `session.key`, or with the key file.
    ///
    /// The key file is created with a random key on first use, so blobs stay
    /// valid across processes of the same installation.
    pub fn session_codec(&self) -> InfraResult<SessionCodec> {
        if let Some(key) = &self.settings.session.key {
            return Ok(SessionCodec::new(key)?);
        }

        let path = self.settings.session.key_path.as_path();
        let key = if self.fs.exists(path) {
            self.fs
                .read_to_string(path)
                .map_err(|e| InfraError::io(format!("read session key {}", path.display()), e))?
        } else {
            let key = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
            self.fs
                .ensure_parent(path)
                .and_then(|_| self.fs.write(path, key.as_bytes()))
                .map_err(|e| InfraError::io(format!("write session key {}", path.display()), e))?;
            info!("Generated session key {}", path.display());
            key
        };

        let key = key.trim();
        if key.is_empty() {
            return Err(ApplicationError::Config {
                message: format!("session key file {} is empty", path.display()),
            }
            .into());
        }
        Ok(SessionCodec::new(key)?)
    }

    /// Traversal engine that works without an API key.
    ///
    /// Falls back to an offline oracle so caller-supplied answers still work;
    /// only oracle-driven steps fail.
    pub fn interactive_engine(&self, store: Arc<HierarchyStore>) -> TraversalEngine {
        let oracle = self.oracle().unwrap_or_else(|e| {
            warn!("Oracle unavailable, continuing offline: {}", e);
            let offline: Arc<dyn DecisionOracle> = Arc::new(OfflineOracle::new(e.to_string()));
            offline
        });
        let navigator = Arc::new(HierarchyNavigator::new(&store));
        TraversalEngine::new(store, navigator, oracle, self.settings.traversal_settings())
    }

    /// Traversal engine over `store` using the configured oracle.
    pub fn engine(&self, store: Arc<HierarchyStore>) -> InfraResult<TraversalEngine> {
        let navigator = Arc::new(HierarchyNavigator::new(&store));
        Ok(TraversalEngine::new(
            store,
            navigator,
            self.oracle()?,
            self.settings.traversal_settings(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HierarchyBuilder, TraversalSession};
    use crate::util::testing::{sample_records, ScriptedOracle};
    use tempfile::TempDir;

    fn container_in(dir: &TempDir, key: Option<&str>) -> ServiceContainer {
        let mut settings = Settings {
            store_path: dir.path().join("store.json"),
            ..Settings::default()
        };
        settings.session.key = key.map(str::to_string);
        settings.session.key_path = dir.path().join("keys").join("session.key");
        ServiceContainer::with_deps(
            settings,
            Arc::new(RealFileSystem),
            Arc::new(ScriptedOracle::always("1")),
        )
    }

    #[test]
    fn given_saved_store_when_classifying_through_container_then_uses_injected_oracle() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            store_path: dir.path().join("store.json"),
            ..Settings::default()
        };
        let oracle = Arc::new(ScriptedOracle::always("1"));
        let container =
            ServiceContainer::with_deps(settings, Arc::new(RealFileSystem), oracle.clone());

        let store = HierarchyBuilder::new().build(&sample_records()).unwrap();
        container
            .hierarchy_service()
            .save(&store, &container.settings.store_path)
            .unwrap();

        let engine = container.engine(container.load_store(None).unwrap()).unwrap();
        let result = engine.classify("research reactor").unwrap();

        assert_eq!(result.code, "8401.10.00.10");
        assert!(result.complete);
        assert_eq!(oracle.calls(), 5);
    }

    #[test]
    fn given_no_configured_key_when_sealing_then_key_file_is_created_and_reused() {
        let dir = TempDir::new().unwrap();
        let session = TraversalSession::new("steam boiler");

        let blob = container_in(&dir, None)
            .session_codec()
            .unwrap()
            .encode(&session)
            .unwrap();

        let key_path = dir.path().join("keys").join("session.key");
        assert!(key_path.exists());
        // a second process of the same installation opens the blob
        let reopened = container_in(&dir, None).session_codec().unwrap().decode(&blob).unwrap();
        assert_eq!(reopened, session);
    }

    #[test]
    fn given_configured_key_when_sealing_then_no_key_file_is_written() {
        let dir = TempDir::new().unwrap();
        let session = TraversalSession::new("steam boiler");

        let blob = container_in(&dir, Some("shared-secret"))
            .session_codec()
            .unwrap()
            .encode(&session)
            .unwrap();

        assert!(!dir.path().join("keys").join("session.key").exists());
        assert!(container_in(&dir, None).session_codec().unwrap().decode(&blob).is_err());
        assert!(container_in(&dir, Some("shared-secret"))
            .session_codec()
            .unwrap()
            .decode(&blob)
            .is_ok());
    }
}
