//! I/O boundary traits for testability
//!
//! These traits abstract external I/O operations, allowing services
//! to be tested with mock implementations.

use std::io;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::domain::CandidateOption;

/// Filesystem abstraction for testability.
pub trait FileSystem: Send + Sync {
    /// Read file contents to string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Read file contents as bytes.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Write bytes to file.
    fn write(&self, path: &Path, content: &[u8]) -> io::Result<()>;

    /// Check if path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Create parent directories if needed.
    fn ensure_parent(&self, path: &Path) -> io::Result<()>;
}

/// Which decision the oracle is asked to make.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStage {
    /// Choose a chapter; declaring final is not allowed
    TopLevel,
    /// Choose a child of the current code or declare it final
    Child,
}

/// Everything the oracle gets to see for one decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionRequest {
    pub product_description: String,
    pub stage: DecisionStage,
    pub current_code: String,
    /// Human readable path of `current_code`
    pub current_path: String,
    pub options: Vec<CandidateOption>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// Worth retrying (timeouts, connection failures, rate limits, 5xx)
    #[error("transient oracle failure: {0}")]
    Transient(String),

    /// Not worth retrying (bad credentials, malformed request)
    #[error("oracle rejected request: {0}")]
    Rejected(String),
}

/// External decision capability (an LLM in production).
///
/// Returns free-form text; interpreting it is the engine's job. This is the
/// only blocking point of a traversal step, so implementations must bound
/// each call with their own timeout.
pub trait DecisionOracle: Send + Sync {
    fn decide(&self, request: &DecisionRequest) -> Result<String, OracleError>;
}

// ============================================================
// REAL IMPLEMENTATIONS
// ============================================================

/// Real filesystem implementation.
#[derive(Debug, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        std::fs::write(path, content)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn ensure_parent(&self, path: &Path) -> io::Result<()> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
            _ => Ok(()),
        }
    }
}
