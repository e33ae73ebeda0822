//! One-shot analysis of a local file.

use std::path::Path;
use std::sync::Arc;

use console::style;

use crate::analysis::{CommandAnalyzer, ARTIFACT_MARKDOWN};
use crate::config::Settings;
use crate::storage::UploadStore;
use crate::tasks::{TaskController, TaskRegistry, TaskState, Upload, WorkerPool};

/// Output file name for an artifact: `markdown` -> `{stem}.md`,
/// `middle_json` -> `{stem}_middle.json`.
fn artifact_filename(stem: &str, name: &str) -> String {
    if name == ARTIFACT_MARKDOWN {
        format!("{}.md", stem)
    } else {
        format!("{}_{}.json", stem, name.trim_end_matches("_json"))
    }
}

/// Run the configured analyzer on `file` with the usual lifecycle rules
/// (worker pool, processing timeout, required artifacts).
pub async fn cmd_analyze(
    settings: &Settings,
    file: &Path,
    ocr: bool,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    settings.validate()?;
    settings.ensure_directories()?;

    let bytes = tokio::fs::read(file)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", file.display(), e))?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    let controller = TaskController::new(
        Arc::new(TaskRegistry::new()),
        Arc::new(WorkerPool::new(1)),
        Arc::new(CommandAnalyzer::new(settings.analyzer.clone())),
        UploadStore::new(&settings.data_dir),
        settings.lifecycle(),
    );

    eprintln!(
        "{} Analyzing {} ({})",
        style("→").cyan(),
        file.display(),
        if ocr { "ocr" } else { "auto" }
    );
    let record = controller
        .process_and_wait(Upload {
            filename,
            bytes,
            ocr,
        })
        .await?;

    if record.state != TaskState::Completed {
        anyhow::bail!(
            "Analysis failed: {}",
            record.error.unwrap_or_else(|| record.state.to_string())
        );
    }
    let artifacts = record.result.unwrap_or_default();

    match output {
        Some(dir) => {
            tokio::fs::create_dir_all(dir).await?;
            for (name, content) in &artifacts {
                let path = dir.join(artifact_filename(&stem, name));
                tokio::fs::write(&path, content).await?;
                eprintln!("  {} {}", style("✓").green(), path.display());
            }
        }
        None => match artifacts.get(ARTIFACT_MARKDOWN) {
            Some(markdown) => println!("{}", markdown),
            None => eprintln!("{} No markdown artifact produced", style("!").yellow()),
        },
    }

    eprintln!(
        "{} Done in {:.1}s",
        style("✓").green(),
        record.elapsed_secs.unwrap_or_default()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_filename() {
        assert_eq!(artifact_filename("paper", "markdown"), "paper.md");
        assert_eq!(
            artifact_filename("paper", "content_list"),
            "paper_content_list.json"
        );
        assert_eq!(artifact_filename("paper", "middle_json"), "paper_middle.json");
    }
}
