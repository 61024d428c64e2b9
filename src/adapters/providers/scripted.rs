//! Scripted provider for tests and offline runs.
//!
//! Responses are chosen by the first rule whose pattern occurs in the
//! request's system or user prompt. A rule with several responses plays them
//! in order and then repeats the last one.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::domain::ports::{
    Completion, CompletionRequest, ModelProvider, ProviderError, ProviderErrorKind,
};

/// One scripted reply.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Fail with this kind and message instead of replying
    pub error: Option<(ProviderErrorKind, String)>,
    /// Simulated latency
    pub delay: Option<Duration>,
}

impl Default for ScriptedResponse {
    fn default() -> Self {
        Self {
            text: "Scripted response.".to_string(),
            error: None,
            delay: None,
            input_tokens: 100,
            output_tokens: 50,
        }
    }
}

impl ScriptedResponse {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn failure(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: Some((kind, message.into())),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, input_tokens: u32, output_tokens: u32) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

struct Rule {
    pattern: String,
    responses: Vec<ScriptedResponse>,
    served: usize,
}

/// Deterministic rule-based provider.
pub struct ScriptedProvider {
    rules: Mutex<Vec<Rule>>,
    default_response: ScriptedResponse,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::with_default_response(ScriptedResponse::default())
    }

    pub fn with_default_response(response: ScriptedResponse) -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            default_response: response,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Reply with `response` whenever a prompt contains `pattern`.
    pub fn on(self, pattern: impl Into<String>, response: ScriptedResponse) -> Self {
        self.on_sequence(pattern, vec![response])
    }

    /// Reply with `responses` in order whenever a prompt contains `pattern`.
    pub fn on_sequence(mut self, pattern: impl Into<String>, responses: Vec<ScriptedResponse>) -> Self {
        self.rules.get_mut().push(Rule {
            pattern: pattern.into(),
            responses,
            served: 0,
        });
        self
    }

    /// Offline script producing well-formed output for every pipeline stage.
    pub fn offline() -> Self {
        let plan = serde_json::json!({
            "goal_restatement": "Answer the user's goal directly.",
            "approach": "Reason step by step from the available context.",
            "key_considerations": ["correctness", "clarity"],
            "estimated_steps": 3,
            "requires_evidence": true
        });
        let judgment = serde_json::json!({
            "score": 0.8,
            "reasoning": "Offline judgment: the answer is coherent and addresses the goal."
        });
        let candidate = serde_json::json!({
            "answer": "Offline answer: no model provider is configured, so this is a placeholder.",
            "citations": ["R1"]
        });

        Self::new()
            .on("\"score\"", ScriptedResponse::success(judgment.to_string()))
            .on("\"citations\"", ScriptedResponse::success(candidate.to_string()))
            .on("goal_restatement", ScriptedResponse::success(plan.to_string()))
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of calls whose prompt contained `pattern`.
    pub async fn calls_matching(&self, pattern: &str) -> usize {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|r| r.prompt.contains(pattern) || r.system.contains(pattern))
            .count()
    }

    /// Every request received, in arrival order.
    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }

    async fn next_response(&self, request: &CompletionRequest) -> ScriptedResponse {
        let mut rules = self.rules.lock().await;
        for rule in rules.iter_mut() {
            if !(request.prompt.contains(&rule.pattern) || request.system.contains(&rule.pattern)) {
                continue;
            }
            let index = rule.served.min(rule.responses.len().saturating_sub(1));
            rule.served += 1;
            if let Some(response) = rule.responses.get(index) {
                return response.clone();
            }
        }
        self.default_response.clone()
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().await.push(request.clone());

        let response = self.next_response(request).await;

        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some((kind, message)) = response.error {
            return Err(ProviderError { kind, message });
        }

        Ok(Completion {
            text: response.text,
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ExecutionParams;

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest {
            model: "m".to_string(),
            system: String::new(),
            prompt: prompt.to_string(),
            params: ExecutionParams::default(),
        }
    }

    #[tokio::test]
    async fn test_first_matching_rule_wins() {
        let provider = ScriptedProvider::new()
            .on("alpha", ScriptedResponse::success("A"))
            .on("alp", ScriptedResponse::success("B"));

        assert_eq!(provider.complete(&request("alpha beta")).await.unwrap().text, "A");
        assert_eq!(provider.complete(&request("alps")).await.unwrap().text, "B");
        assert_eq!(provider.complete(&request("none")).await.unwrap().text, "Scripted response.");
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_sequence_repeats_last() {
        let provider = ScriptedProvider::new().on_sequence(
            "x",
            vec![
                ScriptedResponse::failure(ProviderErrorKind::Transient, "busy"),
                ScriptedResponse::success("ok"),
            ],
        );

        assert!(provider.complete(&request("x")).await.unwrap_err().is_transient());
        assert_eq!(provider.complete(&request("x")).await.unwrap().text, "ok");
        assert_eq!(provider.complete(&request("x")).await.unwrap().text, "ok");
        assert_eq!(provider.calls_matching("x").await, 3);
    }
}
