//! Chat-completions decision oracle
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint over a
//! blocking HTTP client. Each request carries its own timeout, independent
//! of the engine's retry loop.

use std::time::Duration;

use itertools::Itertools;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::OracleConfig;
use crate::domain::CandidateOption;
use crate::infrastructure::traits::{DecisionOracle, DecisionRequest, DecisionStage, OracleError};
use crate::infrastructure::{InfraError, InfraResult};

const SYSTEM_PROMPT: &str =
    "You are a customs classification expert assigning Harmonized System codes.";

pub struct ChatCompletionsOracle {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl ChatCompletionsOracle {
    pub fn new(
        endpoint: &str,
        model: &str,
        api_key: String,
        timeout: Duration,
    ) -> InfraResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InfraError::Http {
                message: format!("build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    /// Build from settings, reading the API key from the configured variable.
    pub fn from_config(config: &OracleConfig) -> InfraResult<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| InfraError::Http {
            message: format!("{} environment variable not set", config.api_key_env),
        })?;
        Self::new(
            &config.endpoint,
            &config.model,
            api_key,
            Duration::from_secs(config.timeout_secs),
        )
    }
}

/// Numbered option list, one per line: `1. 8401: Nuclear reactors (Duty: Free)`.
pub fn format_options(options: &[CandidateOption]) -> String {
    options
        .iter()
        .enumerate()
        .map(|(i, option)| {
            let mut line = format!("{}. {}: {}", i + 1, option.code, option.description);
            if !option.duty_rates.general.trim().is_empty() {
                line.push_str(&format!(" (Duty: {})", option.duty_rates.general));
            }
            line
        })
        .join("\n")
}

pub fn render_prompt(request: &DecisionRequest) -> String {
    let options = format_options(&request.options);
    match request.stage {
        DecisionStage::TopLevel => format!(
            "Pick the chapter this product belongs to.\n\n\
             PRODUCT: {}\n\n\
             OPTIONS:\n{}\n\n\
             Reply with the option number only, e.g. \"3\".",
            request.product_description, options
        ),
        DecisionStage::Child => format!(
            "Continue classifying this product.\n\n\
             PRODUCT: {}\n\n\
             CURRENT CLASSIFICATION: {} - {}\n\n\
             NEXT LEVEL OPTIONS:\n{}\n\n\
             Reply with the option number only, e.g. \"3\".\n\
             If none of the options fits better than the current classification, \
             reply \"FINAL: {}\".",
            request.product_description,
            request.current_code,
            request.current_path,
            options,
            request.current_code
        ),
    }
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

impl DecisionOracle for ChatCompletionsOracle {
    #[instrument(
        level = "debug",
        skip(self, request),
        fields(stage = ?request.stage, code = %request.current_code)
    )]
    fn decide(&self, request: &DecisionRequest) -> Result<String, OracleError> {
        let body = serde_json::json!({
            "model": &self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": render_prompt(request)}
            ]
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| OracleError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            let message = format!("{}: {}", status, text);
            return Err(
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    OracleError::Transient(message)
                } else {
                    OracleError::Rejected(message)
                },
            );
        }

        let parsed: ApiResponse = response
            .json()
            .map_err(|e| OracleError::Transient(format!("unreadable response: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        debug!("Oracle answered {:?}", content);
        Ok(content.trim().to_string())
    }
}

/// Stand-in when no oracle is configured.
///
/// Interactive sessions supply their own answers; any step that would need
/// the oracle is rejected with a hint instead.
#[derive(Debug, Default)]
pub struct OfflineOracle {
    reason: String,
}

impl OfflineOracle {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl DecisionOracle for OfflineOracle {
    fn decide(&self, _request: &DecisionRequest) -> Result<String, OracleError> {
        Err(OracleError::Rejected(format!(
            "no oracle available ({}); pass an answer explicitly",
            self.reason
        )))
    }
}
