use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::analysis::AnalysisResult;

pub const EXPORT_FILE_NAME: &str = "nutrition_analysis.txt";

/// Writes analysis text verbatim as plain text.
pub fn write_analysis_text(path: &Path, text: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

/// Exports a successful result to `<out_dir>/nutrition_analysis.txt`.
///
/// Failures have nothing to export and yield `None`.
pub fn export_analysis(out_dir: &Path, result: &AnalysisResult) -> anyhow::Result<Option<PathBuf>> {
    let Some(text) = result.text() else {
        return Ok(None);
    };
    let path = out_dir.join(EXPORT_FILE_NAME);
    write_analysis_text(&path, text)?;
    Ok(Some(path))
}
