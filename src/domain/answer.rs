//! Interpretation of free-text oracle answers.

use regex::Regex;

/// What an oracle answer means for the current step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleAnswer {
    /// Zero-based position of the chosen option
    Pick(usize),
    /// Stop at the current code; carries the code the oracle echoed, if any
    Final(Option<String>),
    Unparseable,
}

pub struct AnswerParser {
    final_marker: Regex,
    leading_number: Regex,
}

impl Default for AnswerParser {
    fn default() -> Self {
        Self::new()
    }
}

impl AnswerParser {
    pub fn new() -> Self {
        Self {
            final_marker: Regex::new(r"(?is)^FINAL\s*:\s*(.*)$").unwrap(),
            leading_number: Regex::new(r"^([0-9]+)(?:[^0-9]|$)").unwrap(),
        }
    }

    /// Parse `text` against a list of `option_count` options.
    ///
    /// A leading integer selects an option by 1-based position and is only
    /// valid inside `1..=option_count`. `FINAL: <code>` declares the current
    /// code final. Everything else is unparseable.
    pub fn parse(&self, text: &str, option_count: usize) -> OracleAnswer {
        let text = text.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`');

        if let Some(caps) = self.final_marker.captures(text) {
            let code = caps
                .get(1)
                .map(|m| m.as_str().trim())
                .filter(|code| !code.is_empty())
                .map(str::to_string);
            return OracleAnswer::Final(code);
        }

        self.leading_number
            .captures(text)
            .and_then(|caps| caps[1].parse::<usize>().ok())
            .filter(|&position| (1..=option_count).contains(&position))
            .map_or(OracleAnswer::Unparseable, |position| {
                OracleAnswer::Pick(position - 1)
            })
    }
}
