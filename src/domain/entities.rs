//! Domain entities: core data structures

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::domain::error::DomainError;

/// Annotation attached to a tariff line (e.g. "See 9903.88.15").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Footnote {
    #[serde(deserialize_with = "nullable")]
    pub columns: Vec<String>,
    #[serde(deserialize_with = "nullable")]
    pub value: String,
    #[serde(rename = "type", deserialize_with = "nullable")]
    pub kind: String,
}

/// Duty rate columns. Opaque strings, never interpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DutyRates {
    pub general: String,
    pub special: String,
    pub other: String,
}

/// One flat entry of the nomenclature source.
///
/// Accepts the USITC export field names (`htsno`, `indent`, `superior`) as
/// aliases. `indent` may be a number or a numeric string and `superior` may be
/// a bool or the strings `"true"`/`"false"`; nulls fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyRecord {
    #[serde(alias = "htsno", deserialize_with = "nullable")]
    pub code: String,
    #[serde(deserialize_with = "nullable")]
    pub description: String,
    #[serde(alias = "indent", deserialize_with = "flexible_depth")]
    pub depth: i64,
    #[serde(alias = "superior", deserialize_with = "flexible_flag")]
    pub is_group_heading: bool,
    #[serde(deserialize_with = "nullable")]
    pub units: Vec<String>,
    #[serde(deserialize_with = "nullable")]
    pub general: String,
    #[serde(deserialize_with = "nullable")]
    pub special: String,
    #[serde(deserialize_with = "nullable")]
    pub other: String,
    #[serde(deserialize_with = "nullable")]
    pub footnotes: Vec<Footnote>,
}

impl HierarchyRecord {
    pub fn new(code: &str, description: &str, depth: i64) -> Self {
        Self {
            code: code.to_string(),
            description: description.to_string(),
            depth,
            ..Self::default()
        }
    }

    pub fn group_heading(mut self) -> Self {
        self.is_group_heading = true;
        self
    }

    pub fn duty_rates(&self) -> DutyRates {
        DutyRates {
            general: self.general.clone(),
            special: self.special.clone(),
            other: self.other.clone(),
        }
    }

    /// Parse a JSON array of records.
    ///
    /// Each element is decoded on its own so the error names the offending
    /// position; nothing is returned unless every element decodes.
    pub fn parse_json_array(content: &str) -> Result<Vec<Self>, DomainError> {
        let values: Vec<serde_json::Value> =
            serde_json::from_str(content).map_err(|e| DomainError::SourceData {
                position: 0,
                reason: format!("not a JSON array of records: {e}"),
            })?;

        values
            .into_iter()
            .enumerate()
            .map(|(position, value)| {
                serde_json::from_value(value).map_err(|e| DomainError::SourceData {
                    position,
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDepth {
    Number(i64),
    Text(String),
}

fn flexible_depth<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawDepth>::deserialize(deserializer)? {
        None => Ok(0),
        Some(RawDepth::Number(n)) => Ok(n),
        Some(RawDepth::Text(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| serde::de::Error::custom(format!("indent is not an integer: {s:?}"))),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFlag {
    Bool(bool),
    Text(String),
}

fn flexible_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<RawFlag>::deserialize(deserializer)? {
        None => false,
        Some(RawFlag::Bool(b)) => b,
        Some(RawFlag::Text(s)) => s.trim().eq_ignore_ascii_case("true"),
    })
}

/// One option offered to the decision oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateOption {
    pub code: String,
    pub description: String,
    #[serde(default)]
    pub duty_rates: DutyRates,
}

/// Immutable audit record of one traversal transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationStep {
    /// 1-based position in the step log
    pub step_index: u32,
    pub code_before: String,
    pub code_after: String,
    /// Options as they were offered (empty when none existed)
    pub candidate_options: Vec<CandidateOption>,
    /// Raw oracle text; `None` when no answer was consulted for this step
    pub oracle_raw_response: Option<String>,
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// Reached a code without children
    LeafReached,
    /// Oracle declared the current code final
    DeclaredFinal,
    /// Step budget ran out
    BudgetExhausted,
    /// Oracle answer could not be interpreted
    Unparseable,
    /// Hierarchy offered no top-level codes
    NoCandidates,
}

impl TerminalReason {
    /// Only a true leaf counts as a complete classification.
    pub fn is_complete(self) -> bool {
        matches!(self, TerminalReason::LeafReached)
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TerminalReason::LeafReached => "leaf reached",
            TerminalReason::DeclaredFinal => "declared final by oracle",
            TerminalReason::BudgetExhausted => "step budget exhausted",
            TerminalReason::Unparseable => "unparseable oracle answer",
            TerminalReason::NoCandidates => "no top-level candidates",
        };
        f.write_str(text)
    }
}

/// Position of a session in the traversal state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum TraversalState {
    AwaitingTopLevelChoice,
    AwaitingChildChoice,
    Terminal(TerminalReason),
}

/// Working state of one classification attempt.
///
/// Lives entirely in the session blob between calls; nothing about a session
/// is kept in process memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalSession {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub product_description: String,
    pub current_code: String,
    pub state: TraversalState,
    pub step_log: Vec<ClassificationStep>,
    pub step_count: u32,
}

impl TraversalSession {
    pub fn new(product_description: &str) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            product_description: product_description.to_string(),
            current_code: String::new(),
            state: TraversalState::AwaitingTopLevelChoice,
            step_log: Vec::new(),
            step_count: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, TraversalState::Terminal(_))
    }

    pub fn terminal_reason(&self) -> Option<TerminalReason> {
        match self.state {
            TraversalState::Terminal(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.terminal_reason().is_some_and(TerminalReason::is_complete)
    }

    /// Append the audit record for one transition and move to `next`.
    pub(crate) fn record_step(
        &mut self,
        code_after: String,
        candidate_options: Vec<CandidateOption>,
        oracle_raw_response: Option<String>,
        next: TraversalState,
    ) {
        self.step_count += 1;
        self.step_log.push(ClassificationStep {
            step_index: self.step_count,
            code_before: self.current_code.clone(),
            code_after: code_after.clone(),
            candidate_options,
            oracle_raw_response,
        });
        self.current_code = code_after;
        self.state = next;
    }

    /// Check the structural invariants a decoded session must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.step_count as usize != self.step_log.len() {
            return Err(format!(
                "step count {} does not match step log length {}",
                self.step_count,
                self.step_log.len()
            ));
        }
        for (i, step) in self.step_log.iter().enumerate() {
            if step.step_index as usize != i + 1 {
                return Err(format!(
                    "step at position {} carries index {}",
                    i + 1,
                    step.step_index
                ));
            }
        }
        if let Some(last) = self.step_log.last() {
            if last.code_after != self.current_code {
                return Err("current code differs from last step outcome".into());
            }
        }
        match self.state {
            TraversalState::AwaitingTopLevelChoice => {
                if !self.step_log.is_empty() || !self.current_code.is_empty() {
                    return Err("top-level choice pending after steps were taken".into());
                }
            }
            TraversalState::AwaitingChildChoice => {
                if self.step_log.is_empty() || self.current_code.trim().is_empty() {
                    return Err("child choice pending without a current code".into());
                }
            }
            TraversalState::Terminal(reason) => {
                if self.step_log.is_empty() {
                    return Err(format!("terminal ({reason}) without any step"));
                }
            }
        }
        Ok(())
    }
}

/// Outcome of a finished classification, for reports and downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub session_id: Uuid,
    pub product: String,
    pub code: String,
    pub path: String,
    pub complete: bool,
    pub reason: TerminalReason,
    pub steps: Vec<ClassificationStep>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_usitc_record_when_parsing_then_maps_aliases() {
        let json = r#"[{"htsno":"0101","indent":"0","description":"Live horses","superior":null,"units":[],"general":"Free","special":"","other":"","footnotes":null}]"#;
        let records = HierarchyRecord::parse_json_array(json).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].code, "0101");
        assert_eq!(records[0].depth, 0);
        assert!(!records[0].is_group_heading);
        assert_eq!(records[0].general, "Free");
        assert!(records[0].footnotes.is_empty());
    }

    #[test]
    fn given_superior_string_when_parsing_then_sets_group_heading() {
        let json = r#"[{"htsno":"","indent":1,"description":"Horses:","superior":"true"}]"#;
        let records = HierarchyRecord::parse_json_array(json).unwrap();
        assert!(records[0].is_group_heading);
        assert_eq!(records[0].depth, 1);
    }

    #[test]
    fn given_non_numeric_indent_when_parsing_then_names_position() {
        let json = r#"[{"htsno":"01","indent":"0"},{"htsno":"0101","indent":"x"}]"#;
        let err = HierarchyRecord::parse_json_array(json).unwrap_err();
        assert!(matches!(err, DomainError::SourceData { position: 1, .. }));
    }

    #[test]
    fn given_new_session_when_validating_then_ok() {
        let session = TraversalSession::new("steel screws");
        assert!(session.validate().is_ok());
        assert!(!session.is_terminal());
        assert_eq!(session.state, TraversalState::AwaitingTopLevelChoice);
    }

    #[test]
    fn given_recorded_step_when_inspecting_then_log_and_code_advance() {
        let mut session = TraversalSession::new("steel screws");
        session.record_step(
            "73".into(),
            vec![],
            Some("1".into()),
            TraversalState::AwaitingChildChoice,
        );
        assert_eq!(session.step_count, 1);
        assert_eq!(session.current_code, "73");
        assert_eq!(session.step_log[0].code_before, "");
        assert_eq!(session.step_log[0].step_index, 1);
        assert!(session.validate().is_ok());
    }

    fn session_at_8401() -> TraversalSession {
        let mut session = TraversalSession::new("steam boiler");
        for code in ["84", "8401"] {
            session.record_step(
                code.into(),
                vec![],
                Some("1".into()),
                TraversalState::AwaitingChildChoice,
            );
        }
        session
    }

    #[test]
    fn given_steps_taken_but_top_level_pending_when_validating_then_rejected() {
        let mut session = session_at_8401();
        session.state = TraversalState::AwaitingTopLevelChoice;
        let err = session.validate().unwrap_err();
        assert!(err.contains("top-level"));
    }

    #[test]
    fn given_child_choice_without_code_when_validating_then_rejected() {
        let mut session = TraversalSession::new("steam boiler");
        session.state = TraversalState::AwaitingChildChoice;
        assert!(session.validate().is_err());
    }

    #[test]
    fn given_terminal_without_steps_when_validating_then_rejected() {
        let mut session = TraversalSession::new("steam boiler");
        session.state = TraversalState::Terminal(TerminalReason::LeafReached);
        assert!(session.validate().is_err());
    }

    #[test]
    fn given_session_mid_traversal_when_validating_then_ok() {
        assert!(session_at_8401().validate().is_ok());
    }

    #[test]
    fn given_only_leaf_reached_when_checking_completeness_then_complete() {
        assert!(TerminalReason::LeafReached.is_complete());
        assert!(!TerminalReason::DeclaredFinal.is_complete());
        assert!(!TerminalReason::BudgetExhausted.is_complete());
        assert!(!TerminalReason::Unparseable.is_complete());
        assert!(!TerminalReason::NoCandidates.is_complete());
    }
}
