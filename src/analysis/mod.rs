//! Document analysis collaborator.
//!
//! The lifecycle core only needs a synchronous "analyze one document, return
//! named artifacts or fail" contract. [`Analyzer`] is that contract:
//!
//! - [`CommandAnalyzer`] runs an external analysis tool and collects its output files
//! - any `Fn(&AnalysisInput, &CancellationToken) -> Result<Artifacts, AnalysisError>`
//!   closure is an analyzer too, which is handy for embedding and tests
//!
//! Implementations receive a cancellation token. Honouring it is optional: the
//! controller never waits for a cancelled worker to stop.

mod command;
pub mod gpu;

pub use command::{CommandAnalyzer, CommandAnalyzerConfig};
pub use gpu::{GpuDevice, GpuStatus};

use std::path::PathBuf;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use crate::tasks::Artifacts;

/// Markdown rendering of the document.
pub const ARTIFACT_MARKDOWN: &str = "markdown";
/// Flat list of content blocks (JSON).
pub const ARTIFACT_CONTENT_LIST: &str = "content_list";
/// Intermediate layout structure (JSON).
pub const ARTIFACT_MIDDLE_JSON: &str = "middle_json";

/// Every artifact a complete analysis produces.
pub const ALL_ARTIFACTS: [&str; 3] = [
    ARTIFACT_MARKDOWN,
    ARTIFACT_CONTENT_LIST,
    ARTIFACT_MIDDLE_JSON,
];

/// Errors from analysis backends.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Analyzer not available: {0}")]
    NotAvailable(String),

    #[error("Analysis failed: {0}")]
    Failed(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Missing artifact '{name}' (expected at {path})")]
    MissingArtifact { name: String, path: String },

    #[error("Analysis cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One unit of work handed to an analyzer.
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    /// Path of the uploaded document on disk.
    pub file_path: PathBuf,
    /// Directory the analyzer may write intermediate output into.
    pub output_dir: PathBuf,
    /// Force OCR instead of letting the analyzer pick a text-layer strategy.
    pub ocr: bool,
}

impl AnalysisInput {
    /// Parse method understood by the analysis tool.
    pub fn method(&self) -> &'static str {
        if self.ocr {
            "ocr"
        } else {
            "auto"
        }
    }
}

/// Synchronous, blocking document analysis.
pub trait Analyzer: Send + Sync {
    /// Short identifier for logs and health output.
    fn name(&self) -> &str {
        "inline"
    }

    /// Whether dependencies (binaries, models) are present.
    fn is_available(&self) -> bool {
        true
    }

    /// What is needed to make this analyzer available.
    fn availability_hint(&self) -> String {
        String::new()
    }

    /// Analyze one document. Must return either the full artifact set or an error.
    fn analyze(
        &self,
        input: &AnalysisInput,
        cancel: &CancellationToken,
    ) -> Result<Artifacts, AnalysisError>;
}

impl<F> Analyzer for F
where
    F: Fn(&AnalysisInput, &CancellationToken) -> Result<Artifacts, AnalysisError> + Send + Sync,
{
    fn analyze(
        &self,
        input: &AnalysisInput,
        cancel: &CancellationToken,
    ) -> Result<Artifacts, AnalysisError> {
        self(input, cancel)
    }
}
