//! Integration tests for the traversal engine state machine.

use std::sync::Arc;

use hstree::application::services::{RetryPolicy, TraversalEngine, TraversalSettings};
use hstree::application::{ApplicationError, SessionCodec};
use hstree::domain::{
    HierarchyBuilder, HierarchyNavigator, HierarchyRecord, TerminalReason, TraversalState,
};
use hstree::infrastructure::traits::{DecisionStage, OracleError};
use hstree::util::testing::{init_test_setup, sample_records, ScriptedOracle};

#[ctor::ctor]
fn init() {
    init_test_setup();
}

fn engine(
    records: &[HierarchyRecord],
    oracle: Arc<ScriptedOracle>,
    max_steps: u32,
) -> TraversalEngine {
    let store = HierarchyBuilder::new().build(records).unwrap();
    let navigator = HierarchyNavigator::new(&store);
    TraversalEngine::new(
        Arc::new(store),
        Arc::new(navigator),
        oracle,
        TraversalSettings {
            max_steps,
            retry: RetryPolicy::no_backoff(2),
            ..TraversalSettings::default()
        },
    )
}

fn sample_engine(oracle: Arc<ScriptedOracle>) -> TraversalEngine {
    engine(&sample_records(), oracle, 10)
}

#[test]
fn given_unparseable_first_answer_when_starting_then_terminal_with_empty_code() {
    let oracle = Arc::new(ScriptedOracle::answers(&["I am not sure"]));
    let engine = sample_engine(oracle.clone());

    let session = engine.start("industrial steam boiler").unwrap();

    assert!(session.is_terminal());
    assert_eq!(session.current_code, "");
    assert!(!session.is_complete());
    assert_eq!(session.terminal_reason(), Some(TerminalReason::Unparseable));
    assert_eq!(session.step_log.len(), 1);
    assert_eq!(session.step_log[0].code_after, "");
    assert_eq!(session.step_log[0].candidate_options.len(), 2);
    assert_eq!(oracle.calls(), 1);
}

#[test]
fn given_always_first_option_when_classifying_then_reaches_leaf() {
    let oracle = Arc::new(ScriptedOracle::always("1"));
    let engine = sample_engine(oracle.clone());

    let result = engine.classify("research reactor").unwrap();

    assert_eq!(result.code, "8401.10.00.10");
    assert!(result.complete);
    assert_eq!(result.reason, TerminalReason::LeafReached);
    assert!(result.path.ends_with("For research"));
    let trail: Vec<_> = result.steps.iter().map(|s| s.code_after.as_str()).collect();
    assert_eq!(
        trail,
        vec!["84", "8401", "8401.10", "8401.10.00", "8401.10.00.10"]
    );
    assert_eq!(oracle.calls(), 5);
}

#[test]
fn given_pick_without_children_when_advancing_then_terminal_in_same_step() {
    let oracle = Arc::new(ScriptedOracle::answers(&["1", "2", "1"]));
    let engine = sample_engine(oracle.clone());

    let result = engine.classify("watertube boiler, 60 t/h").unwrap();

    assert_eq!(result.code, "8402.11");
    assert_eq!(result.reason, TerminalReason::LeafReached);
    assert_eq!(result.steps.len(), 3);
    assert_eq!(oracle.calls(), 3);
}

#[test]
fn given_code_without_children_when_advancing_then_terminal_without_oracle_call() {
    // The session reached 8501 against a store where 8501 still had children;
    // the store it resumes against has none.
    let mut richer = sample_records();
    richer.push(HierarchyRecord::new("8501.10", "Motors of an output not exceeding 37.5 W", 2));
    let first = engine(&richer, Arc::new(ScriptedOracle::answers(&["2", "1"])), 10);
    let session = first.start("small motor").unwrap();
    let session = first.advance(&session).unwrap();
    assert_eq!(session.current_code, "8501");
    assert_eq!(session.state, TraversalState::AwaitingChildChoice);

    let oracle = Arc::new(ScriptedOracle::always("1"));
    let second = sample_engine(oracle.clone());
    let session = second.advance(&session).unwrap();

    assert_eq!(session.terminal_reason(), Some(TerminalReason::LeafReached));
    assert_eq!(session.current_code, "8501");
    assert_eq!(session.step_count, 3);
    let last = session.step_log.last().unwrap();
    assert!(last.candidate_options.is_empty());
    assert!(last.oracle_raw_response.is_none());
    assert_eq!(oracle.calls(), 0);
}

#[test]
fn given_step_budget_of_three_when_oracle_keeps_picking_then_exhausted_at_step_three() {
    let oracle = Arc::new(ScriptedOracle::always("1"));
    let engine = engine(&sample_records(), oracle.clone(), 3);

    let result = engine.classify("reactor").unwrap();

    assert_eq!(result.steps.len(), 3);
    assert_eq!(result.reason, TerminalReason::BudgetExhausted);
    assert!(!result.complete);
    assert_eq!(result.code, "8401.10");
    assert_eq!(oracle.calls(), 3);
}

#[test]
fn given_terminal_session_when_advancing_again_then_unchanged_and_oracle_untouched() {
    let oracle = Arc::new(ScriptedOracle::answers(&["1", "1", "FINAL: 8401"]));
    let engine = sample_engine(oracle.clone());
    let mut session = engine.start("fuel elements").unwrap();
    while !session.is_terminal() {
        session = engine.advance(&session).unwrap();
    }
    assert_eq!(session.terminal_reason(), Some(TerminalReason::DeclaredFinal));
    let calls = oracle.calls();

    let again = engine.advance(&session).unwrap();
    let with_answer = engine.advance_with_answer(&session, "2");

    assert_eq!(again, session);
    assert_eq!(with_answer, session);
    assert_eq!(oracle.calls(), calls);
}

#[test]
fn given_final_marker_when_advancing_then_declared_final_keeps_code() {
    let oracle = Arc::new(ScriptedOracle::answers(&["1", "1", "FINAL: 8401"]));
    let engine = sample_engine(oracle);

    let result = engine.classify("nuclear fuel elements").unwrap();

    assert_eq!(result.code, "8401");
    assert_eq!(result.reason, TerminalReason::DeclaredFinal);
    assert!(!result.complete);
    assert_eq!(result.steps[2].code_before, "8401");
    assert_eq!(result.steps[2].code_after, "8401");
}

#[test]
fn given_out_of_range_pick_when_advancing_then_unparseable_keeps_progress() {
    let oracle = Arc::new(ScriptedOracle::answers(&["1", "7"]));
    let engine = sample_engine(oracle);

    let result = engine.classify("boiler").unwrap();

    assert_eq!(result.code, "84");
    assert_eq!(result.reason, TerminalReason::Unparseable);
    assert_eq!(result.steps[1].oracle_raw_response.as_deref(), Some("7"));
}

#[test]
fn given_child_step_when_oracle_is_asked_then_request_carries_path_and_options() {
    let oracle = Arc::new(ScriptedOracle::answers(&["1", "FINAL: 84"]));
    let engine = sample_engine(oracle.clone());

    engine.classify("boiler").unwrap();

    let requests = oracle.requests();
    assert_eq!(requests[0].stage, DecisionStage::TopLevel);
    assert_eq!(requests[1].stage, DecisionStage::Child);
    assert_eq!(requests[1].current_code, "84");
    assert!(requests[1].current_path.starts_with("Nuclear reactors, boilers"));
    let codes: Vec<_> = requests[1].options.iter().map(|o| o.code.as_str()).collect();
    assert_eq!(codes, vec!["8401", "8402"]);
}

#[test]
fn given_session_blob_when_resuming_in_fresh_engine_then_continues_where_it_stopped() {
    let first = sample_engine(Arc::new(ScriptedOracle::answers(&["1", "2"])));
    let session = first.start("steam boiler").unwrap();
    let session = first.advance(&session).unwrap();
    let blob = SessionCodec::new("install-key").unwrap().encode(&session).unwrap();

    let oracle = Arc::new(ScriptedOracle::answers(&["2"]));
    let second = sample_engine(oracle.clone());
    let resumed = SessionCodec::new("install-key").unwrap().decode(&blob).unwrap();
    assert_eq!(resumed, session);
    let finished = second.advance(&resumed).unwrap();

    assert_eq!(finished.current_code, "8402.12");
    assert!(finished.is_complete());
    assert_eq!(finished.step_count, 3);
    assert_eq!(oracle.calls(), 1);
}

#[test]
fn given_oracle_down_when_advancing_then_unavailable_and_session_still_usable() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        Err(OracleError::Transient("connection reset".into())),
        Err(OracleError::Transient("connection reset".into())),
    ]));
    let engine = sample_engine(oracle.clone());
    let session = engine.open("steam boiler");

    let err = engine.advance(&session).unwrap_err();

    assert!(matches!(err, ApplicationError::OracleUnavailable { attempts: 2, .. }));
    assert_eq!(oracle.calls(), 2);
    assert_eq!(session.step_count, 0);
    let next = engine.advance_with_answer(&session, "1");
    assert_eq!(next.current_code, "84");
}

#[test]
fn given_rejecting_oracle_when_starting_then_rejected_without_retry() {
    let oracle = Arc::new(ScriptedOracle::new(vec![Err(OracleError::Rejected(
        "401 Unauthorized".into(),
    ))]));
    let engine = sample_engine(oracle.clone());

    let err = engine.start("steam boiler").unwrap_err();

    assert!(matches!(err, ApplicationError::OracleRejected { .. }));
    assert_eq!(oracle.calls(), 1);
}

#[test]
fn given_empty_hierarchy_when_starting_then_no_candidates_without_oracle_call() {
    let oracle = Arc::new(ScriptedOracle::always("1"));
    let engine = engine(&[], oracle.clone(), 10);

    let session = engine.start("anything").unwrap();

    assert_eq!(session.terminal_reason(), Some(TerminalReason::NoCandidates));
    assert_eq!(session.step_count, 1);
    assert_eq!(oracle.calls(), 0);
}

#[test]
fn given_several_products_when_classifying_batch_then_results_keep_input_order() {
    let engine = sample_engine(Arc::new(ScriptedOracle::always("1")));
    let products = vec![
        "electric motor".to_string(),
        "generator".to_string(),
        "servo motor".to_string(),
    ];

    let results = engine.classify_batch(&products);

    assert_eq!(results.len(), 3);
    for (product, result) in products.iter().zip(results) {
        let result = result.unwrap();
        assert_eq!(&result.product, product);
        assert_eq!(result.code, "8401.10.00.10");
        assert!(result.complete);
    }
}
