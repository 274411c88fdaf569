//! One-shot code tasks run through non-streaming generation

use crate::{ClientConfig, InferenceProvider, Result};

/// A single-request transform over a code snippet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeTask {
    Complete,
    Explain,
    Refactor,
}

impl CodeTask {
    /// Task name as used on the command line
    pub fn name(&self) -> &'static str {
        match self {
            CodeTask::Complete => "complete",
            CodeTask::Explain => "explain",
            CodeTask::Refactor => "refactor",
        }
    }

    /// System instructions for this task
    pub fn system_prompt(&self) -> &'static str {
        match self {
            CodeTask::Complete => {
                "You are a code completion assistant. Complete the code snippet provided. \
                 Only return the code completion, no explanations."
            }
            CodeTask::Explain => {
                "You are a code explanation assistant. Explain the given code in clear, concise language."
            }
            CodeTask::Refactor => {
                "You are a code refactoring assistant. Suggest improvements to the code for \
                 efficiency, readability, and maintainability. Return only the refactored code."
            }
        }
    }

    /// User prompt wrapping `code`
    pub fn prompt(&self, code: &str) -> String {
        match self {
            CodeTask::Complete => format!("Complete this code:\n\n{}", code),
            CodeTask::Explain => format!("Explain this code:\n\n{}", code),
            CodeTask::Refactor => format!(
                "Refactor this code to be more efficient and cleaner:\n\n{}",
                code
            ),
        }
    }

    /// Run the task and return the model's answer
    pub async fn run(
        &self,
        provider: &dyn InferenceProvider,
        config: &ClientConfig,
        code: &str,
    ) -> Result<String> {
        let request = config
            .request(self.prompt(code))
            .with_system(self.system_prompt());
        tracing::debug!("Running {} task on {} chars", self.name(), code.len());
        let response = provider.generate(request).await?;
        Ok(response.response)
    }
}

impl std::str::FromStr for CodeTask {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "complete" => Ok(CodeTask::Complete),
            "explain" => Ok(CodeTask::Explain),
            "refactor" => Ok(CodeTask::Refactor),
            other => Err(format!("unknown task: {}", other)),
        }
    }
}
