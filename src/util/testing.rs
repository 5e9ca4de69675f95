use std::collections::VecDeque;
use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Once};
use tracing::{debug, info};
use tracing_subscriber::{
    filter::filter_fn,
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

use crate::domain::HierarchyRecord;
use crate::infrastructure::traits::{DecisionOracle, DecisionRequest, OracleError};

static TEST_SETUP: Once = Once::new();

pub fn init_test_setup() {
    TEST_SETUP.call_once(|| {
        if env::var("RUST_LOG").is_err() {
            env::set_var("RUST_LOG", "trace");
        }
        // global logging subscriber, used by all tracing log macros
        setup_test_logging();
        info!("Test Setup complete");
    });
}

fn setup_test_logging() {
    debug!("INIT: Attempting logger init from testing.rs");

    // Create a filter for noisy modules
    let noisy_modules = ["reqwest", "hyper"];
    let module_filter = filter_fn(move |metadata| {
        !noisy_modules
            .iter()
            .any(|name| metadata.target().starts_with(name))
    });

    // Set up the subscriber with environment filter
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    // Build and set the subscriber
    let subscriber = tracing_subscriber::registry().with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(false)
            .with_span_events(FmtSpan::ENTER)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(module_filter)
            .with_filter(env_filter),
    );

    // Only set if we haven't already set a global subscriber
    if tracing::dispatcher::has_been_set() {
        debug!("Tracing subscriber already set");
    } else {
        subscriber.try_init().unwrap_or_else(|e| {
            eprintln!("Error: Failed to set up logging: {}", e);
        });
    }
}

/// Oracle that replays a fixed script of answers and records every request.
///
/// Once the script runs out, every further call answers with `fallback`
/// (or an unparseable text when none is set).
pub struct ScriptedOracle {
    script: Mutex<VecDeque<Result<String, OracleError>>>,
    fallback: Option<String>,
    calls: AtomicUsize,
    requests: Mutex<Vec<DecisionRequest>>,
}

impl ScriptedOracle {
    pub fn new(script: Vec<Result<String, OracleError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Oracle that gives the same answer forever.
    pub fn always(answer: &str) -> Self {
        let mut oracle = Self::new(Vec::new());
        oracle.fallback = Some(answer.to_string());
        oracle
    }

    /// Oracle that answers `answers` in order.
    pub fn answers(answers: &[&str]) -> Self {
        Self::new(answers.iter().map(|a| Ok(a.to_string())).collect())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl DecisionOracle for ScriptedOracle {
    fn decide(&self, request: &DecisionRequest) -> Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front());
        match next {
            Some(answer) => answer,
            None => Ok(self
                .fallback
                .clone()
                .unwrap_or_else(|| "no idea".to_string())),
        }
    }
}

/// Small slice of chapters 84 and 85, shaped like the USITC export.
///
/// Every level of the code convention is present below `8401` so a
/// traversal can run five steps deep.
pub fn sample_records() -> Vec<HierarchyRecord> {
    let mut records = vec![
        HierarchyRecord::new(
            "84",
            "Nuclear reactors, boilers, machinery and mechanical appliances; parts thereof",
            0,
        ),
        HierarchyRecord::new(
            "8401",
            "Nuclear reactors; fuel elements (cartridges), non-irradiated, for nuclear reactors",
            1,
        ),
        HierarchyRecord::new("8401.10", "Nuclear reactors", 2),
        HierarchyRecord::new("8401.10.00", "Nuclear reactors", 3),
        HierarchyRecord::new("8401.10.00.10", "For research", 4),
        HierarchyRecord::new("8401.10.00.90", "Other", 4),
        HierarchyRecord::new("8401.20", "Machinery and apparatus for isotopic separation", 2),
        HierarchyRecord::new("8401.20.00", "Machinery and apparatus for isotopic separation", 3),
        HierarchyRecord::new("8402", "Steam or other vapor generating boilers", 1),
        HierarchyRecord::new("", "Steam or other vapor generating boilers:", 2).group_heading(),
        HierarchyRecord::new(
            "8402.11",
            "Watertube boilers with a steam production exceeding 45 t per hour",
            3,
        ),
        HierarchyRecord::new(
            "8402.12",
            "Watertube boilers with a steam production not exceeding 45 t per hour",
            3,
        ),
        HierarchyRecord::new("85", "Electrical machinery and equipment and parts thereof", 0),
        HierarchyRecord::new(
            "8501",
            "Electric motors and generators (excluding generating sets)",
            1,
        ),
    ];
    for record in &mut records {
        if record.code.len() >= 10 {
            record.general = "Free".to_string();
            record.units = vec!["No.".to_string()];
        }
    }
    records
}

// test
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_test_setup() {
        init_test_setup();
    }
}
