use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::services::llm::LlmConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_input")]
    pub input_folder: String,

    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default)]
    pub unattended: bool,

    pub llm: LlmConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub workflow: WorkflowConfig,
}

/// What to do when the planner hands back repeated or zero episode numbers.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeNumbering {
    /// Fail the run with a schema violation.
    #[default]
    Reject,
    /// Renumber 1..=n in plan order.
    Renumber,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScriptConcurrency {
    /// One controller operation at a time.
    #[default]
    Serialized,
    /// Distinct episodes may generate at the same time; repeats of an
    /// in-flight episode are rejected.
    PerEpisode,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_analysis_char_limit")]
    pub analysis_char_limit: usize,
    #[serde(default = "default_planning_char_limit")]
    pub planning_char_limit: usize,
    /// None sends the full source text with every script request.
    #[serde(default)]
    pub script_context_limit: Option<usize>,
    #[serde(default)]
    pub episode_numbering: EpisodeNumbering,
    #[serde(default)]
    pub script_concurrency: ScriptConcurrency,
    #[serde(default)]
    pub complete_when_all_scripted: bool,
    #[serde(default = "default_true")]
    pub simplified_chinese: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analysis_char_limit: default_analysis_char_limit(),
            planning_char_limit: default_planning_char_limit(),
            script_context_limit: None,
            episode_numbering: EpisodeNumbering::default(),
            script_concurrency: ScriptConcurrency::default(),
            complete_when_all_scripted: false,
            simplified_chinese: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkflowConfig {
    #[serde(default = "default_parallel_scripts")]
    pub parallel_scripts: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            parallel_scripts: default_parallel_scripts(),
        }
    }
}

fn default_input() -> String {
    "input".to_string()
}
fn default_output() -> String {
    "output".to_string()
}
fn default_analysis_char_limit() -> usize {
    30_000
}
fn default_planning_char_limit() -> usize {
    50_000
}
fn default_parallel_scripts() -> usize {
    3
}
fn default_true() -> bool {
    true
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.yml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.input_folder)?;
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_fills_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yml");
        fs::write(
            &path,
            "llm:\n  provider: gemini\n  gemini:\n    api_key: k\n    model: gemini-2.5-flash\n",
        )?;

        let config = Config::load_from(&path)?;
        assert_eq!(config.input_folder, "input");
        assert_eq!(config.output_folder, "output");
        assert!(!config.unattended);
        assert_eq!(config.llm.retry_count, 3);
        assert_eq!(config.pipeline.analysis_char_limit, 30_000);
        assert_eq!(config.pipeline.planning_char_limit, 50_000);
        assert_eq!(config.pipeline.script_context_limit, None);
        assert_eq!(config.pipeline.episode_numbering, EpisodeNumbering::Reject);
        assert_eq!(config.pipeline.script_concurrency, ScriptConcurrency::Serialized);
        assert!(config.pipeline.simplified_chinese);
        assert_eq!(config.workflow.parallel_scripts, 3);
        Ok(())
    }

    #[test]
    fn test_pipeline_policies_parse_snake_case() -> Result<()> {
        let yaml = "llm:\n  provider: ollama\n  ollama:\n    base_url: http://localhost:11434\n    model: qwen2.5\n\
                    pipeline:\n  episode_numbering: renumber\n  script_concurrency: per_episode\n  script_context_limit: 8000\n";
        let config: Config = serde_yaml_ng::from_str(yaml)?;

        assert_eq!(config.pipeline.episode_numbering, EpisodeNumbering::Renumber);
        assert_eq!(config.pipeline.script_concurrency, ScriptConcurrency::PerEpisode);
        assert_eq!(config.pipeline.script_context_limit, Some(8000));
        Ok(())
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("config.yml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
