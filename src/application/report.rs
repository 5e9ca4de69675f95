//! Classification reports
//!
//! Plain text and JSON renderings of finished classifications, for the CLI
//! and for downstream consumers of the audit trail.

use std::fmt::Write as _;

use serde::Serialize;

use crate::application::{ApplicationError, ApplicationResult};
use crate::domain::{ClassificationResult, ClassificationStep};

/// Multi-line text report of one result, step log included.
pub fn render_text(result: &ClassificationResult) -> String {
    let mut out = String::new();
    let code = if result.code.is_empty() {
        "(none)"
    } else {
        result.code.as_str()
    };
    let _ = writeln!(out, "Product:  {}", result.product);
    let _ = writeln!(out, "Code:     {}", code);
    if !result.path.is_empty() {
        let _ = writeln!(out, "Path:     {}", result.path);
    }
    let status = if result.complete { "complete" } else { "incomplete" };
    let _ = writeln!(out, "Status:   {} ({})", status, result.reason);
    let _ = writeln!(out, "Steps:    {}", result.steps.len());
    for step in &result.steps {
        let _ = writeln!(out, "  {}", render_step(step));
    }
    out
}

/// One line per step: `2. 84 -> 8402 [5 options] answer "2"`.
pub fn render_step(step: &ClassificationStep) -> String {
    let before = if step.code_before.is_empty() {
        "(root)"
    } else {
        step.code_before.as_str()
    };
    let after = if step.code_after.is_empty() {
        "(none)"
    } else {
        step.code_after.as_str()
    };
    let mut line = format!(
        "{}. {} -> {} [{} options]",
        step.step_index,
        before,
        after,
        step.candidate_options.len()
    );
    match &step.oracle_raw_response {
        Some(raw) => {
            let _ = write!(line, " answer {:?}", raw);
        }
        None => line.push_str(" no answer needed"),
    }
    line
}

/// Pretty JSON for a single result or a batch.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> ApplicationResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| ApplicationError::OperationFailed {
        context: "serialize classification report".to_string(),
        source: Box::new(e),
    })
}
