//! External collaborators the roles delegate their work to

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::bus::WorkKind;

/// One request to the completion service
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub kind: WorkKind,
    pub instructions: String,
    pub input: Value,
}

/// Language-model completion, stateless per call
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Value>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeMetrics {
    pub lines_of_code: usize,
    pub functions: usize,
    pub classes: usize,
    /// Branch points plus one
    pub complexity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeIssue {
    pub line: usize,
    pub severity: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseResult {
    pub language: String,
    pub metrics: CodeMetrics,
    pub issues: Vec<CodeIssue>,
}

/// Source analysis
#[async_trait]
pub trait CodeParser: Send + Sync {
    async fn parse_file(&self, path: &Path) -> Result<ParseResult>;
}

const MAX_LINE_LENGTH: usize = 120;

const BRANCH_KEYWORDS: &[&str] = &["if ", "else if", "for ", "while ", "match ", "case ", "catch", "&&", "||"];

/// Line-based parser that needs no external tooling
#[derive(Debug, Clone, Default)]
pub struct HeuristicParser;

impl HeuristicParser {
    fn language_for(path: &Path) -> &'static str {
        match path.extension().and_then(|e| e.to_str()).unwrap_or_default() {
            "rs" => "rust",
            "ts" | "tsx" => "typescript",
            "js" | "jsx" | "mjs" => "javascript",
            "py" => "python",
            "go" => "go",
            "java" => "java",
            _ => "unknown",
        }
    }

    /// Measure `source` as if it were written in `language`
    pub fn analyze(language: &str, source: &str) -> ParseResult {
        let mut metrics = CodeMetrics {
            complexity: 1,
            ..Default::default()
        };
        let mut issues = Vec::new();

        for (idx, raw) in source.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with("//") || line.starts_with('#') {
                continue;
            }
            metrics.lines_of_code += 1;

            let words: Vec<&str> = line.split_whitespace().collect();
            if words
                .iter()
                .take(3)
                .any(|w| matches!(*w, "fn" | "function" | "def" | "func"))
            {
                metrics.functions += 1;
            }
            if words
                .iter()
                .take(3)
                .any(|w| matches!(*w, "class" | "struct" | "interface"))
            {
                metrics.classes += 1;
            }
            metrics.complexity += BRANCH_KEYWORDS.iter().filter(|k| line.contains(*k)).count();

            if raw.len() > MAX_LINE_LENGTH {
                issues.push(CodeIssue {
                    line: idx + 1,
                    severity: "warning".to_string(),
                    message: format!("Line exceeds {} characters", MAX_LINE_LENGTH),
                });
            }
        }

        ParseResult {
            language: language.to_string(),
            metrics,
            issues,
        }
    }
}

#[async_trait]
impl CodeParser for HeuristicParser {
    async fn parse_file(&self, path: &Path) -> Result<ParseResult> {
        debug!(path = %path.display(), "HeuristicParser::parse_file: called");
        let source = tokio::fs::read_to_string(path)
            .await
            .context(format!("Failed to read {}", path.display()))?;
        Ok(Self::analyze(Self::language_for(path), &source))
    }
}

/// Captured outcome of one command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs shell commands for test execution and deployments
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command`; a non-zero exit is an `Ok` output, only failing to run is an error
    async fn run(&self, command: &str, working_dir: Option<&Path>) -> Result<CommandOutput>;
}

pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 120_000;

/// `sh -c` with a timeout
#[derive(Debug, Clone)]
pub struct ShellRunner {
    timeout: Duration,
}

impl ShellRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS))
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str, working_dir: Option<&Path>) -> Result<CommandOutput> {
        debug!(%command, ?working_dir, "ShellRunner::run: called");
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command).kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let started = Instant::now();
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(eyre!("Failed to execute command: {}", e)),
            Err(_) => return Err(eyre!("Command timed out after {}ms", self.timeout.as_millis())),
        };
        debug!(status = ?output.status, "ShellRunner::run: command completed");

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Completion service returning canned responses in order
    pub struct MockCompletionService {
        responses: Vec<Value>,
        call_count: AtomicUsize,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl MockCompletionService {
        pub fn new(responses: Vec<Value>) -> Self {
            debug!(response_count = %responses.len(), "MockCompletionService::new: called");
            Self {
                responses,
                call_count: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        pub fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionService for MockCompletionService {
        async fn complete(&self, request: CompletionRequest) -> Result<Value> {
            self.requests.lock().unwrap().push(request);
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            self.responses
                .get(idx)
                .cloned()
                .ok_or_else(|| eyre!("No more mock responses"))
        }
    }

    /// Parser returning one fixed result, or failing when built with `failing`
    pub struct MockCodeParser {
        result: Option<ParseResult>,
    }

    impl MockCodeParser {
        pub fn new(result: ParseResult) -> Self {
            Self { result: Some(result) }
        }

        pub fn failing() -> Self {
            Self { result: None }
        }
    }

    #[async_trait]
    impl CodeParser for MockCodeParser {
        async fn parse_file(&self, path: &Path) -> Result<ParseResult> {
            self.result
                .clone()
                .ok_or_else(|| eyre!("cannot parse {}", path.display()))
        }
    }

    /// Runner returning a fixed exit code and recording commands
    pub struct MockCommandRunner {
        exit_code: i32,
        stdout: String,
        commands: Mutex<Vec<String>>,
    }

    impl MockCommandRunner {
        pub fn new(exit_code: i32, stdout: &str) -> Self {
            Self {
                exit_code,
                stdout: stdout.to_string(),
                commands: Mutex::new(Vec::new()),
            }
        }

        pub fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for MockCommandRunner {
        async fn run(&self, command: &str, _working_dir: Option<&Path>) -> Result<CommandOutput> {
            self.commands.lock().unwrap().push(command.to_string());
            Ok(CommandOutput {
                exit_code: self.exit_code,
                stdout: self.stdout.clone(),
                stderr: String::new(),
                duration_ms: 1,
            })
        }
    }
}
