//! Command-based analyzer.
//!
//! Runs an external analysis tool (by default `magic-pdf`) against the uploaded
//! file and reads the artifact files it leaves behind. Arguments and output
//! paths may use placeholders:
//!
//! - `{file}` - full path of the uploaded document
//! - `{output_dir}` - per-task output directory
//! - `{basename}` / `{stem}` - file name with / without extension
//! - `{method}` - `ocr` when OCR is forced, `auto` otherwise

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{
    AnalysisError, AnalysisInput, Analyzer, Artifacts, ARTIFACT_CONTENT_LIST,
    ARTIFACT_MARKDOWN, ARTIFACT_MIDDLE_JSON,
};

/// Combined stdout/stderr of the analysis command, kept in the output directory.
const LOG_FILE: &str = "analyzer.log";

/// Command analyzer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAnalyzerConfig {
    /// Executable to run.
    #[serde(default = "default_command")]
    pub command: String,
    /// Arguments (placeholders allowed).
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Artifacts that must be present for the analysis to count as successful.
    #[serde(default = "default_required_artifacts")]
    pub required_artifacts: Vec<String>,
    /// How often to check on the child process and the cancellation token.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Artifact name -> output file template, relative to `{output_dir}`.
    #[serde(default = "default_outputs")]
    pub outputs: BTreeMap<String, String>,
}

fn default_command() -> String {
    "magic-pdf".to_string()
}

fn default_args() -> Vec<String> {
    ["-p", "{file}", "-o", "{output_dir}", "-m", "{method}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_outputs() -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            ARTIFACT_MARKDOWN.to_string(),
            "{stem}/{method}/{stem}.md".to_string(),
        ),
        (
            ARTIFACT_CONTENT_LIST.to_string(),
            "{stem}/{method}/{stem}_content_list.json".to_string(),
        ),
        (
            ARTIFACT_MIDDLE_JSON.to_string(),
            "{stem}/{method}/{stem}_middle.json".to_string(),
        ),
    ])
}

fn default_required_artifacts() -> Vec<String> {
    crate::analysis::ALL_ARTIFACTS
        .iter()
        .map(|name| name.to_string())
        .collect()
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for CommandAnalyzerConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            required_artifacts: default_required_artifacts(),
            poll_interval_ms: default_poll_interval_ms(),
            outputs: default_outputs(),
        }
    }
}

/// Analyzer that shells out to an external tool.
pub struct CommandAnalyzer {
    config: CommandAnalyzerConfig,
}

impl CommandAnalyzer {
    pub fn new(config: CommandAnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommandAnalyzerConfig {
        &self.config
    }

    /// Replace placeholders in a template.
    fn expand(&self, template: &str, input: &AnalysisInput) -> String {
        let file = &input.file_path;
        let mut result = template
            .replace("{file}", &file.to_string_lossy())
            .replace("{output_dir}", &input.output_dir.to_string_lossy())
            .replace("{method}", input.method());
        if let Some(basename) = file.file_name().and_then(|n| n.to_str()) {
            result = result.replace("{basename}", basename);
        }
        if let Some(stem) = file.file_stem().and_then(|n| n.to_str()) {
            result = result.replace("{stem}", stem);
        }
        result
    }

    fn build_args(&self, input: &AnalysisInput) -> Vec<String> {
        self.config
            .args
            .iter()
            .map(|arg| self.expand(arg, input))
            .collect()
    }

    /// Run the command to completion, killing it if `cancel` fires.
    fn run(
        &self,
        input: &AnalysisInput,
        cancel: &CancellationToken,
        log_path: &Path,
    ) -> Result<ExitStatus, AnalysisError> {
        let log = File::create(log_path)?;
        let args = self.build_args(input);

        let mut child = Command::new(&self.config.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    AnalysisError::NotAvailable(self.availability_hint())
                } else {
                    AnalysisError::CommandFailed(format!("Failed to run command: {}", e))
                }
            })?;

        tracing::debug!(command = %self.config.command, ?args, "Started analysis command");

        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if cancel.is_cancelled() {
                tracing::info!(command = %self.config.command, "Killing cancelled analysis command");
                let _ = child.kill();
                let _ = child.wait();
                return Err(AnalysisError::Cancelled);
            }
            std::thread::sleep(poll);
        }
    }

    /// Read every configured output file into the artifact map.
    fn collect_outputs(&self, input: &AnalysisInput) -> Result<Artifacts, AnalysisError> {
        let mut artifacts = Artifacts::new();

        for (name, template) in &self.config.outputs {
            let path = input.output_dir.join(self.expand(template, input));
            match fs::read_to_string(&path) {
                Ok(content) => {
                    artifacts.insert(name.clone(), content);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if self.config.required_artifacts.contains(name) {
                        return Err(AnalysisError::MissingArtifact {
                            name: name.clone(),
                            path: path.display().to_string(),
                        });
                    }
                    tracing::debug!(artifact = %name, path = %path.display(), "Optional artifact not produced");
                }
                Err(e) => return Err(AnalysisError::Io(e)),
            }
        }

        if let Some(name) = self
            .config
            .required_artifacts
            .iter()
            .find(|name| !self.config.outputs.contains_key(*name))
        {
            return Err(AnalysisError::MissingArtifact {
                name: name.clone(),
                path: "<no output template configured>".to_string(),
            });
        }

        Ok(artifacts)
    }
}

impl Analyzer for CommandAnalyzer {
    fn name(&self) -> &str {
        &self.config.command
    }

    fn is_available(&self) -> bool {
        which::which(&self.config.command).is_ok()
    }

    fn availability_hint(&self) -> String {
        format!("Install or add to PATH: {}", self.config.command)
    }

    fn analyze(
        &self,
        input: &AnalysisInput,
        cancel: &CancellationToken,
    ) -> Result<Artifacts, AnalysisError> {
        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }
        fs::create_dir_all(&input.output_dir)?;

        let log_path = input.output_dir.join(LOG_FILE);
        let status = self.run(input, cancel, &log_path)?;

        if !status.success() {
            let log = fs::read_to_string(&log_path).unwrap_or_default();
            let lines: Vec<&str> = log.lines().collect();
            let tail = lines[lines.len().saturating_sub(5)..].join("\n");
            return Err(AnalysisError::CommandFailed(format!(
                "{} failed (exit code {:?}): {}",
                self.config.command,
                status.code(),
                tail
            )));
        }

        self.collect_outputs(input)
    }
}
