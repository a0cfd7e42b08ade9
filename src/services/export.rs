use anyhow::{bail, Result};
use std::path::Path;

use crate::core::io::Storage;
use crate::core::state::EpisodePlanEntry;
use crate::services::controller::StageController;

pub fn episode_file_name(episode_number: u32) -> String {
    format!("episode_{:02}.md", episode_number)
}

fn render_episode(entry: Option<&EpisodePlanEntry>, episode_number: u32, content: &str) -> String {
    let mut out = match entry {
        Some(ep) => format!("# 第 {} 集 {}\n\n", episode_number, ep.title),
        None => format!("# 第 {} 集\n\n", episode_number),
    };
    if let Some(ep) = entry.filter(|ep| !ep.synopsis.is_empty()) {
        out.push_str(&format!("> {}\n\n", ep.synopsis));
    }
    out.push_str(content.trim_end());
    out.push('\n');
    out
}

/// Writes the adaptation package into `out_dir` and returns the written paths.
///
/// Layout: `analysis.json`, `plan.json`, one `episode_NN.md` per script and
/// `progress.log` (oldest entry first).
pub async fn export_package(
    storage: &dyn Storage,
    out_dir: &str,
    controller: &StageController,
) -> Result<Vec<String>> {
    let Some(analysis) = controller.analysis() else {
        bail!("Nothing to export: no analysis loaded");
    };
    let plan = controller.plan();
    let dir = Path::new(out_dir);
    let mut written = Vec::new();

    let path = dir.join("analysis.json").to_string_lossy().to_string();
    storage
        .write(&path, serde_json::to_string_pretty(&analysis)?.as_bytes())
        .await?;
    written.push(path);

    let path = dir.join("plan.json").to_string_lossy().to_string();
    storage
        .write(&path, serde_json::to_string_pretty(&plan)?.as_bytes())
        .await?;
    written.push(path);

    for artifact in controller.artifacts() {
        let entry = plan
            .iter()
            .find(|ep| ep.episode_number == artifact.episode_number);
        let body = render_episode(entry, artifact.episode_number, &artifact.content);
        let path = dir
            .join(episode_file_name(artifact.episode_number))
            .to_string_lossy()
            .to_string();
        storage.write(&path, body.as_bytes()).await?;
        written.push(path);
    }

    let path = dir.join("progress.log").to_string_lossy().to_string();
    let mut log = controller.log_chronological().join("\n");
    log.push('\n');
    storage.write(&path, log.as_bytes()).await?;
    written.push(path);

    log::info!("Exported {} files to {}", written.len(), out_dir);
    Ok(written)
}
