use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::analyzer::{Analyzer, AnalyzerError};

/// What a [`ScriptedAnalyzer`] was asked to do, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzerCall {
    Command {
        session_id: String,
        command: String,
    },
    Output {
        session_id: String,
        command: String,
        output: String,
    },
    ClearContext {
        session_id: String,
    },
}

/// In-process analyzer for tests: answers from a scripted queue (falling
/// back to a canned reply) and records every call.
pub struct ScriptedAnalyzer {
    responses: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<AnalyzerCall>>,
    fail: bool,
}

impl ScriptedAnalyzer {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn with_responses(responses: impl IntoIterator<Item = String>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// An analyzer whose every call fails, for error-path tests.
    pub fn failing() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<AnalyzerCall> {
        self.calls.lock().unwrap().clone()
    }

    fn next_response(&self, fallback: &str) -> Result<String, AnalyzerError> {
        if self.fail {
            return Err(AnalyzerError::Request("scripted failure".to_string()));
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| fallback.to_string()))
    }
}

impl Default for ScriptedAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    async fn analyze_command(
        &self,
        session_id: &str,
        command: &str,
    ) -> Result<String, AnalyzerError> {
        self.calls.lock().unwrap().push(AnalyzerCall::Command {
            session_id: session_id.to_string(),
            command: command.to_string(),
        });
        self.next_response(&format!("Explanation of `{command}`"))
    }

    async fn analyze_output(
        &self,
        session_id: &str,
        command: &str,
        output: &str,
    ) -> Result<String, AnalyzerError> {
        self.calls.lock().unwrap().push(AnalyzerCall::Output {
            session_id: session_id.to_string(),
            command: command.to_string(),
            output: output.to_string(),
        });
        self.next_response(&format!("Analysis of `{command}` output"))
    }

    fn clear_context(&self, session_id: &str) {
        self.calls.lock().unwrap().push(AnalyzerCall::ClearContext {
            session_id: session_id.to_string(),
        });
    }
}
