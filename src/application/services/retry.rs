//! Fixed-budget retry around oracle calls.

use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::application::{ApplicationError, ApplicationResult};
use crate::infrastructure::traits::{DecisionOracle, DecisionRequest, OracleError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first call included
    pub attempts: u32,
    /// Fixed pause between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn no_backoff(attempts: u32) -> Self {
        Self {
            attempts,
            backoff: Duration::ZERO,
        }
    }
}

/// Ask `oracle`, retrying transient failures per `policy`.
///
/// Rejections are returned immediately. When every attempt fails
/// transiently the last failure is propagated as `OracleUnavailable`.
pub fn call_with_retry(
    oracle: &dyn DecisionOracle,
    request: &DecisionRequest,
    policy: &RetryPolicy,
) -> ApplicationResult<String> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match oracle.decide(request) {
            Ok(answer) => return Ok(answer),
            Err(OracleError::Rejected(message)) => {
                return Err(ApplicationError::OracleRejected { message });
            }
            Err(err @ OracleError::Transient(_)) => {
                warn!("Oracle call failed (attempt {}/{}): {}", attempt, attempts, err);
                if attempt >= attempts {
                    return Err(ApplicationError::OracleUnavailable {
                        attempts,
                        source: Box::new(err),
                    });
                }
                thread::sleep(policy.backoff);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::traits::DecisionStage;
    use crate::util::testing::ScriptedOracle;

    fn request() -> DecisionRequest {
        DecisionRequest {
            product_description: "pump".into(),
            stage: DecisionStage::TopLevel,
            current_code: String::new(),
            current_path: String::new(),
            options: vec![],
        }
    }

    #[test]
    fn given_transient_then_success_when_calling_then_returns_answer() {
        let oracle = ScriptedOracle::new(vec![
            Err(OracleError::Transient("timeout".into())),
            Ok("2".into()),
        ]);
        let answer = call_with_retry(&oracle, &request(), &RetryPolicy::no_backoff(3)).unwrap();
        assert_eq!(answer, "2");
        assert_eq!(oracle.calls(), 2);
    }

    #[test]
    fn given_only_transient_failures_when_calling_then_unavailable_after_budget() {
        let oracle = ScriptedOracle::new(vec![
            Err(OracleError::Transient("a".into())),
            Err(OracleError::Transient("b".into())),
            Err(OracleError::Transient("c".into())),
            Ok("1".into()),
        ]);
        let err = call_with_retry(&oracle, &request(), &RetryPolicy::no_backoff(3)).unwrap_err();
        assert!(matches!(err, ApplicationError::OracleUnavailable { attempts: 3, .. }));
        assert_eq!(oracle.calls(), 3);
    }

    #[test]
    fn given_rejection_when_calling_then_no_retry() {
        let oracle = ScriptedOracle::new(vec![
            Err(OracleError::Rejected("401".into())),
            Ok("1".into()),
        ]);
        let err = call_with_retry(&oracle, &request(), &RetryPolicy::no_backoff(3)).unwrap_err();
        assert!(matches!(err, ApplicationError::OracleRejected { .. }));
        assert_eq!(oracle.calls(), 1);
    }
}
