//! Language-model lookup that splits multi-composer lines into
//! `(composer, work)` pairs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::OracleConfig;
use crate::error::{MigrationError, Result};

/// One composer attributed to one work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkAttribution {
    #[serde(default)]
    pub composer: String,
    #[serde(default)]
    pub work: String,
}

#[async_trait]
pub trait Oracle: Send + Sync {
    /// Zero or more attributions for a record's composer and work text.
    /// An empty result means "no answer", not "no works".
    async fn extract(&self, composer_text: &str, work_text: &str, notes: &str) -> Result<Vec<WorkAttribution>>;
}

/// Oracle backed by an OpenAI-compatible chat-completions endpoint
pub struct HttpOracle {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    system_prompt: String,
}

impl HttpOracle {
    pub fn new(config: &OracleConfig) -> Result<Self> {
        let api_key = config.api_key()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
        })
    }
}

/// The oracle to use for this run, if any. A misconfigured oracle is not
/// fatal: the run goes on with first-composer attribution.
pub fn build_oracle(config: &OracleConfig, requested: bool) -> Option<Box<dyn Oracle>> {
    if !(requested || config.enabled) {
        return None;
    }
    match HttpOracle::new(config) {
        Ok(oracle) => {
            info!(model = %config.model, "Oracle enabled");
            Some(Box::new(oracle))
        }
        Err(e) => {
            warn!("Oracle unavailable, using first-composer attribution: {}", e);
            None
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn extract(&self, composer_text: &str, work_text: &str, notes: &str) -> Result<Vec<WorkAttribution>> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": self.system_prompt },
                { "role": "user", "content": build_prompt(composer_text, work_text, notes) },
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MigrationError::oracle(format!("endpoint answered {status}")));
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| MigrationError::oracle("empty completion"))?;

        debug!(reply = %content, "Oracle reply");
        parse_attributions(&content)
    }
}

fn build_prompt(composer_text: &str, work_text: &str, notes: &str) -> String {
    format!(
        "A concert archive entry lists these composers: \"{composer_text}\".\n\
         The works field reads: \"{work_text}\".\n\
         Reviewer notes: \"{notes}\".\n\n\
         Work out which composer wrote which performed work. Use full composer names. \
         Return only a raw JSON object of the form \
         {{\"pairs\": [{{\"composer\": \"...\", \"work\": \"...\"}}]}} \
         and an empty list when you cannot tell."
    )
}

/// Remove a surrounding markdown code fence, if any
fn strip_code_fence(text: &str) -> &str {
    let mut result = text.trim();
    if let Some(rest) = result.strip_prefix("```json") {
        result = rest;
    } else if let Some(rest) = result.strip_prefix("```") {
        result = rest;
    }
    if let Some(rest) = result.strip_suffix("```") {
        result = rest;
    }
    result.trim()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Reply {
    Wrapped { pairs: Vec<WorkAttribution> },
    Bare(Vec<WorkAttribution>),
}

/// Parse a model reply into attributions, dropping pairs without a work title
pub fn parse_attributions(reply: &str) -> Result<Vec<WorkAttribution>> {
    let pairs = match serde_json::from_str::<Reply>(strip_code_fence(reply))? {
        Reply::Wrapped { pairs } | Reply::Bare(pairs) => pairs,
    };

    Ok(pairs
        .into_iter()
        .map(|pair| WorkAttribution {
            composer: pair.composer.trim().to_string(),
            work: pair.work.trim().to_string(),
        })
        .filter(|pair| !pair.work.is_empty())
        .collect())
}
