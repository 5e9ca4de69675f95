//! Traversal engine
//!
//! Drives one classification from the empty code down to a terminal code,
//! one oracle decision per step. The engine holds no session state: every
//! call takes a session and returns the next one, so steps can be spread
//! across processes with the session blob in between.

use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{debug, info, instrument, warn};

use crate::application::services::retry::{call_with_retry, RetryPolicy};
use crate::application::{ApplicationError, ApplicationResult};
use crate::domain::{
    AnswerParser, CandidateOption, ClassificationResult, HierarchyNavigator, HierarchyStore,
    OracleAnswer, TerminalReason, TraversalSession, TraversalState,
};
use crate::infrastructure::traits::{DecisionOracle, DecisionRequest, DecisionStage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalSettings {
    /// Hard cap on logged steps per session
    pub max_steps: u32,
    pub retry: RetryPolicy,
    /// Joins ancestor descriptions in display paths
    pub separator: String,
    /// Sessions of a batch in flight at once, and so concurrent oracle calls
    pub concurrency: usize,
}

impl Default for TraversalSettings {
    fn default() -> Self {
        Self {
            max_steps: 10,
            retry: RetryPolicy::default(),
            separator: " > ".to_string(),
            concurrency: 4,
        }
    }
}

/// The decision the next step of a session will ask for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingQuestion {
    pub stage: DecisionStage,
    pub current_code: String,
    pub current_path: String,
    pub options: Vec<CandidateOption>,
}

enum Prepared {
    /// The step resolved without an answer
    Settled(TraversalSession),
    /// The step needs an answer to this question
    Ask(PendingQuestion),
}

pub struct TraversalEngine {
    store: Arc<HierarchyStore>,
    navigator: Arc<HierarchyNavigator>,
    oracle: Arc<dyn DecisionOracle>,
    parser: AnswerParser,
    settings: TraversalSettings,
}

impl TraversalEngine {
    pub fn new(
        store: Arc<HierarchyStore>,
        navigator: Arc<HierarchyNavigator>,
        oracle: Arc<dyn DecisionOracle>,
        settings: TraversalSettings,
    ) -> Self {
        Self {
            store,
            navigator,
            oracle,
            parser: AnswerParser::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &TraversalSettings {
        &self.settings
    }

    /// Fresh session awaiting its top-level choice. Does not call the oracle.
    pub fn open(&self, product_description: &str) -> TraversalSession {
        let session = TraversalSession::new(product_description.trim());
        debug!("Opened session {}", session.session_id);
        session
    }

    /// Open a session and take the top-level step.
    #[instrument(level = "debug", skip(self))]
    pub fn start(&self, product_description: &str) -> ApplicationResult<TraversalSession> {
        let session = self.open(product_description);
        self.advance(&session)
    }

    /// Take one step, asking the oracle when the step needs a decision.
    ///
    /// A terminal session comes back unchanged. If the oracle stays
    /// unavailable the error is returned and `session` remains valid for a
    /// later retry.
    #[instrument(
        level = "debug",
        skip(self, session),
        fields(session = %session.session_id, code = %session.current_code)
    )]
    pub fn advance(&self, session: &TraversalSession) -> ApplicationResult<TraversalSession> {
        match self.prepare(session) {
            Prepared::Settled(next) => Ok(next),
            Prepared::Ask(question) => {
                let request = DecisionRequest {
                    product_description: session.product_description.clone(),
                    stage: question.stage,
                    current_code: question.current_code.clone(),
                    current_path: question.current_path.clone(),
                    options: question.options.clone(),
                };
                let raw = call_with_retry(self.oracle.as_ref(), &request, &self.settings.retry)?;
                Ok(self.apply(session, question, raw))
            }
        }
    }

    /// Take one step with an answer supplied by the caller.
    ///
    /// Same transition as [`TraversalEngine::advance`]; the answer is ignored
    /// when the step resolves without one.
    #[instrument(
        level = "debug",
        skip(self, session),
        fields(session = %session.session_id, code = %session.current_code)
    )]
    pub fn advance_with_answer(
        &self,
        session: &TraversalSession,
        answer: &str,
    ) -> TraversalSession {
        match self.prepare(session) {
            Prepared::Settled(next) => next,
            Prepared::Ask(question) => self.apply(session, question, answer.to_string()),
        }
    }

    /// What the next step would ask, or `None` if no question is pending.
    pub fn pending_question(&self, session: &TraversalSession) -> Option<PendingQuestion> {
        match self.prepare(session) {
            Prepared::Ask(question) => Some(question),
            Prepared::Settled(_) => None,
        }
    }

    /// Run a whole classification against the oracle.
    #[instrument(level = "info", skip(self))]
    pub fn classify(&self, product_description: &str) -> ApplicationResult<ClassificationResult> {
        let mut session = self.start(product_description)?;
        while !session.is_terminal() {
            session = self.advance(&session)?;
        }
        info!(
            "Classified {:?} as {:?} ({})",
            session.product_description,
            session.current_code,
            session
                .terminal_reason()
                .map(|r| r.to_string())
                .unwrap_or_default()
        );
        self.result(&session)
            .ok_or_else(|| ApplicationError::OperationFailed {
                context: "session ended without a terminal state".to_string(),
                source: "classification loop exited early".into(),
            })
    }

    /// Classify independent products in parallel, one session each.
    ///
    /// At most `concurrency` sessions run at once. Results keep the order of
    /// `products`.
    pub fn classify_batch(
        &self,
        products: &[String],
    ) -> Vec<ApplicationResult<ClassificationResult>> {
        let workers = self.settings.concurrency.max(1);
        info!("Classifying {} products, {} at a time", products.len(), workers);
        match ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool.install(|| {
                products
                    .par_iter()
                    .map(|product| self.classify(product))
                    .collect()
            }),
            Err(e) => {
                warn!("No worker pool ({}), classifying sequentially", e);
                products.iter().map(|product| self.classify(product)).collect()
            }
        }
    }

    /// Summary of a terminal session; `None` while it is still running.
    pub fn result(&self, session: &TraversalSession) -> Option<ClassificationResult> {
        let reason = session.terminal_reason()?;
        Some(ClassificationResult {
            session_id: session.session_id,
            product: session.product_description.clone(),
            code: session.current_code.clone(),
            path: self
                .store
                .display_path(&session.current_code, &self.settings.separator),
            complete: reason.is_complete(),
            reason,
            steps: session.step_log.clone(),
        })
    }

    fn prepare(&self, session: &TraversalSession) -> Prepared {
        let stage = match session.state {
            TraversalState::Terminal(_) => return Prepared::Settled(session.clone()),
            TraversalState::AwaitingTopLevelChoice => DecisionStage::TopLevel,
            TraversalState::AwaitingChildChoice => DecisionStage::Child,
        };

        if session.step_count >= self.settings.max_steps {
            warn!(
                "Session {} hit the step budget of {}",
                session.session_id, self.settings.max_steps
            );
            let mut next = session.clone();
            next.record_step(
                session.current_code.clone(),
                Vec::new(),
                None,
                TraversalState::Terminal(TerminalReason::BudgetExhausted),
            );
            return Prepared::Settled(next);
        }

        let current_code = match stage {
            DecisionStage::TopLevel => String::new(),
            DecisionStage::Child => session.current_code.clone(),
        };
        let options = self.navigator.options(&self.store, &current_code);

        if options.is_empty() {
            let reason = match stage {
                DecisionStage::TopLevel => TerminalReason::NoCandidates,
                DecisionStage::Child => TerminalReason::LeafReached,
            };
            debug!("No options below {:?}: {}", current_code, reason);
            let mut next = session.clone();
            next.record_step(
                session.current_code.clone(),
                Vec::new(),
                None,
                TraversalState::Terminal(reason),
            );
            return Prepared::Settled(next);
        }

        Prepared::Ask(PendingQuestion {
            stage,
            current_path: self
                .store
                .display_path(&current_code, &self.settings.separator),
            current_code,
            options,
        })
    }

    fn apply(
        &self,
        session: &TraversalSession,
        question: PendingQuestion,
        raw: String,
    ) -> TraversalSession {
        let answer = self.parser.parse(&raw, question.options.len());
        debug!("Answer {:?} parsed as {:?}", raw, answer);

        let mut next = session.clone();
        match (question.stage, answer) {
            (_, OracleAnswer::Pick(position)) => {
                let code = question.options[position].code.clone();
                // a pick without children ends the walk right here
                let state = if self.navigator.has_children(&code) {
                    TraversalState::AwaitingChildChoice
                } else {
                    TraversalState::Terminal(TerminalReason::LeafReached)
                };
                next.record_step(code, question.options, Some(raw), state);
            }
            (DecisionStage::Child, OracleAnswer::Final(echoed)) => {
                if echoed.as_deref().is_some_and(|code| code != session.current_code) {
                    debug!(
                        "Oracle declared {:?} final while at {:?}; keeping the current code",
                        echoed, session.current_code
                    );
                }
                next.record_step(
                    session.current_code.clone(),
                    question.options,
                    Some(raw),
                    TraversalState::Terminal(TerminalReason::DeclaredFinal),
                );
            }
            _ => {
                warn!("Unusable oracle answer {:?} at {:?}", raw, session.current_code);
                next.record_step(
                    session.current_code.clone(),
                    question.options,
                    Some(raw),
                    TraversalState::Terminal(TerminalReason::Unparseable),
                );
            }
        }

        if !next.is_terminal() && next.step_count >= self.settings.max_steps {
            warn!(
                "Session {} hit the step budget of {}",
                next.session_id, self.settings.max_steps
            );
            next.state = TraversalState::Terminal(TerminalReason::BudgetExhausted);
        }
        next
    }
}
