use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::analyzer::{Analyzer, AnalyzerError};
use crate::context::{ChatMessage, ContextStore, Role};

/// Request timeout against the LLM adapter service.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Keep this many bytes from each end of an over-long command output
/// before prompting.
const OUTPUT_HEAD: usize = 2000;
const OUTPUT_TAIL: usize = 2000;
const TRUNCATION_MARKER: &str = "...[output truncated]...";

/// HTTP client for the external LLM adapter service.
///
/// Speaks `POST {base}/api/chat` with the session's conversation context;
/// the adapter answers `{"content": ...}`.
pub struct HttpAnalyzer {
    client: reqwest::Client,
    base_url: String,
    provider: String,
    model: String,
    contexts: Arc<ContextStore>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    provider: &'a str,
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    content: String,
}

/// Clip over-long output to its head and tail, on char boundaries.
pub fn truncate_output(output: &str) -> String {
    if output.len() <= OUTPUT_HEAD + OUTPUT_TAIL {
        return output.to_string();
    }
    let mut head_end = OUTPUT_HEAD;
    while !output.is_char_boundary(head_end) {
        head_end -= 1;
    }
    let mut tail_start = output.len() - OUTPUT_TAIL;
    while !output.is_char_boundary(tail_start) {
        tail_start += 1;
    }
    format!(
        "{}{}{}",
        &output[..head_end],
        TRUNCATION_MARKER,
        &output[tail_start..]
    )
}

impl HttpAnalyzer {
    pub fn new(
        base_url: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
        contexts: Arc<ContextStore>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            provider: provider.into(),
            model: model.into(),
            contexts,
        }
    }

    async fn request(&self, messages: &[ChatMessage]) -> Result<String, AnalyzerError> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let request = ChatRequest {
            provider: &self.provider,
            model: &self.model,
            messages,
        };

        let response = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| AnalyzerError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalyzerError::Status(status.as_u16()));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| AnalyzerError::Request(e.to_string()))?;
        if body.content.is_empty() {
            return Err(AnalyzerError::Empty);
        }
        Ok(body.content)
    }

    async fn prompt(&self, session_id: &str, prompt: String) -> Result<String, AnalyzerError> {
        self.contexts.push(session_id, Role::User, prompt);
        let context = self.contexts.context(session_id);

        let reply = self.request(&context).await?;
        self.contexts.push(session_id, Role::Assistant, reply.clone());
        Ok(reply)
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    async fn analyze_command(
        &self,
        session_id: &str,
        command: &str,
    ) -> Result<String, AnalyzerError> {
        tracing::debug!(session_id, command, "analyzing command");
        self.prompt(
            session_id,
            format!("Please explain this command concisely: {command}"),
        )
        .await
    }

    async fn analyze_output(
        &self,
        session_id: &str,
        command: &str,
        output: &str,
    ) -> Result<String, AnalyzerError> {
        tracing::debug!(session_id, command, output_len = output.len(), "analyzing output");
        let output = truncate_output(output);
        self.prompt(
            session_id,
            format!("Please explain the output of this command: {command}\n\nOutput:\n{output}"),
        )
        .await
    }

    fn clear_context(&self, session_id: &str) {
        self.contexts.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_passes_through() {
        let output = "short output";
        assert_eq!(truncate_output(output), output);
    }

    #[test]
    fn long_output_keeps_head_and_tail() {
        let output = format!("{}{}{}", "H".repeat(3000), "M".repeat(3000), "T".repeat(3000));
        let truncated = truncate_output(&output);

        assert!(truncated.starts_with(&"H".repeat(2000)));
        assert!(truncated.ends_with(&"T".repeat(2000)));
        assert!(truncated.contains(TRUNCATION_MARKER));
        assert_eq!(
            truncated.len(),
            OUTPUT_HEAD + OUTPUT_TAIL + TRUNCATION_MARKER.len()
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // Multi-byte characters straddling the cut points must not panic.
        let output = "é".repeat(4000);
        let truncated = truncate_output(&output);
        assert!(truncated.contains(TRUNCATION_MARKER));
        assert!(truncated.chars().all(|c| c == 'é' || TRUNCATION_MARKER.contains(c)));
    }
}
