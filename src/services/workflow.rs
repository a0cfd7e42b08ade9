use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;

use crate::core::config::{Config, ScriptConcurrency};
use crate::core::error::PipelineResult;
use crate::core::io::{is_supported_source, load_source_text, Storage};
use crate::services::controller::{ScriptOutcome, StageController};
use crate::services::engines::{LlmAnalysisEngine, LlmPlanningEngine, LlmScriptEngine};
use crate::services::export::export_package;
use crate::services::llm::LlmClient;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GenerationSummary {
    pub generated: usize,
    pub unchanged: usize,
    pub failed: Vec<u32>,
}

impl GenerationSummary {
    fn record(&mut self, episode_number: u32, outcome: PipelineResult<ScriptOutcome>) {
        match outcome {
            Ok(ScriptOutcome::Generated) => self.generated += 1,
            Ok(ScriptOutcome::Unchanged) => self.unchanged += 1,
            Ok(ScriptOutcome::Failed(_)) => self.failed.push(episode_number),
            Err(e) => {
                log::warn!("Episode {} was not attempted: {}", episode_number, e);
                self.failed.push(episode_number);
            }
        }
    }
}

/// Drives one source file through the pipeline and exports the package.
pub struct WorkflowManager {
    config: Config,
    controller: Arc<StageController>,
    storage: Arc<dyn Storage>,
}

impl WorkflowManager {
    /// `llm` serves analysis and planning. `script_llm` writes episodes and may
    /// use a different model.
    pub fn new(
        config: Config,
        llm: Arc<dyn LlmClient>,
        script_llm: Arc<dyn LlmClient>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let settings = config.pipeline.clone();
        let controller = StageController::new(
            Box::new(LlmAnalysisEngine::new(llm.clone(), &settings)),
            Box::new(LlmPlanningEngine::new(llm, &settings)),
            Box::new(LlmScriptEngine::new(script_llm, &settings)),
            settings,
        );
        Self::with_controller(config, Arc::new(controller), storage)
    }

    pub fn with_controller(
        config: Config,
        controller: Arc<StageController>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            config,
            controller,
            storage,
        }
    }

    pub fn controller(&self) -> &StageController {
        &self.controller
    }

    /// Picks the source file from the input folder. Asks when there is more
    /// than one candidate, unless running unattended.
    pub async fn select_source(&self) -> Result<String> {
        let candidates: Vec<String> = self
            .storage
            .list(&self.config.input_folder)
            .await?
            .into_iter()
            .filter(|p| is_supported_source(p))
            .collect();

        match candidates.len() {
            0 => Err(anyhow!(
                "No .txt or .epub files found in {}",
                self.config.input_folder
            )),
            1 => Ok(candidates[0].clone()),
            _ if self.config.unattended => Ok(candidates[0].clone()),
            _ => Ok(inquire::Select::new("Select the novel segment to adapt:", candidates)
                .prompt()?),
        }
    }

    pub async fn run(&self, source_path: &str) -> Result<GenerationSummary> {
        println!("Loading {}", source_path);
        let text = load_source_text(self.storage.as_ref(), source_path).await?;

        println!("Analyzing and planning...");
        self.controller.start(&text).await?;

        if let Some(analysis) = self.controller.analysis() {
            println!("《{}》 [{}] {}", analysis.title, analysis.genre, analysis.logline);
        }
        let pending = self.controller.pending_episodes();
        println!("{} episodes planned.", pending.len());

        let summary = if self.confirm_generation(pending.len())? {
            self.generate_scripts(&pending).await
        } else {
            println!("Skipping script generation.");
            GenerationSummary::default()
        };

        if !summary.failed.is_empty() {
            println!("Scripts failed for episodes: {:?}", summary.failed);
        }

        let out_dir = self.output_dir_for(source_path);
        let written = export_package(self.storage.as_ref(), &out_dir, &self.controller).await?;
        println!("Package written to {} ({} files)", out_dir, written.len());

        Ok(summary)
    }

    fn confirm_generation(&self, count: usize) -> Result<bool> {
        if self.config.unattended || count == 0 {
            return Ok(count > 0);
        }
        let ans = inquire::Confirm::new(&format!("Generate scripts for {} episodes now?", count))
            .with_default(true)
            .prompt();
        match ans {
            Ok(answer) => Ok(answer),
            Err(_) => {
                println!("Error reading input, skipping script generation.");
                Ok(false)
            }
        }
    }

    /// Generates the given episodes following the configured concurrency policy.
    pub async fn generate_scripts(&self, episodes: &[u32]) -> GenerationSummary {
        let pb = ProgressBar::new(episodes.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} episodes {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        let mut summary = GenerationSummary::default();
        match self.controller.settings().script_concurrency {
            ScriptConcurrency::Serialized => {
                for &n in episodes {
                    pb.set_message(format!("episode {}", n));
                    let outcome = self.controller.generate_script(n).await;
                    summary.record(n, outcome);
                    pb.inc(1);
                }
            }
            ScriptConcurrency::PerEpisode => {
                let parallel = self.config.workflow.parallel_scripts.max(1);
                let mut results = futures_util::stream::iter(episodes.iter().copied())
                    .map(|n| {
                        let controller = self.controller.clone();
                        async move { (n, controller.generate_script(n).await) }
                    })
                    .buffer_unordered(parallel);

                while let Some((n, outcome)) = results.next().await {
                    summary.record(n, outcome);
                    pb.inc(1);
                }
            }
        }
        pb.finish_with_message("done");

        summary.failed.sort_unstable();
        summary
    }

    fn output_dir_for(&self, source_path: &str) -> String {
        let stem = Path::new(source_path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "package".to_string());
        Path::new(&self.config.output_folder)
            .join(stem)
            .to_string_lossy()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{PipelineConfig, WorkflowConfig};
    use crate::core::io::NativeStorage;
    use crate::services::llm::{ChatOptions, LlmConfig};
    use async_trait::async_trait;
    use std::fs;
    use std::sync::Mutex;

    // Mock LLM Client
    #[derive(Debug)]
    struct MockLlmClient {
        call_count: Arc<Mutex<usize>>,
        fail_episode: Option<u32>,
    }

    impl MockLlmClient {
        fn new(fail_episode: Option<u32>) -> Self {
            Self {
                call_count: Arc::new(Mutex::new(0)),
                fail_episode,
            }
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn chat(&self, _system: &str, user: &str, _options: &ChatOptions) -> Result<String> {
            *self.call_count.lock().unwrap() += 1;

            if user.contains("请分析下面的网络小说文本") {
                return Ok(r#"{"genre":"玄幻","title":"T","themes":["穿越","复仇"],"characters":[],"pacing":"快","targetAudience":"青年"}"#.to_string());
            } else if user.contains("把故事拆分为漫剧分集") {
                return Ok(r#"```json
{"episodes":[{"episodeNumber":1,"title":"开端","synopsis":"穿越"},{"episodeNumber":2,"title":"复仇","synopsis":"反击"}]}
```"#
                    .to_string());
            } else if let Some(n) = self.fail_episode {
                if user.contains(&format!("现在请写出第 {} 集的剧本", n)) {
                    return Err(anyhow!("Mock LLM error"));
                }
            }

            Ok("[SCENE] 山门，黄昏\n[VISUAL] 少年仰望石阶\n少年: 我回来了。".to_string())
        }
    }

    fn test_config(root: &Path, concurrency: ScriptConcurrency) -> Config {
        Config {
            input_folder: root.join("input").to_string_lossy().to_string(),
            output_folder: root.join("output").to_string_lossy().to_string(),
            unattended: true,
            llm: LlmConfig {
                provider: "mock".to_string(),
                retry_count: 0,
                retry_delay_seconds: 0,
                script_model: None,
                gemini: None,
                ollama: None,
                openai: None,
            },
            pipeline: PipelineConfig {
                script_concurrency: concurrency,
                ..PipelineConfig::default()
            },
            workflow: WorkflowConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_run_exports_full_package() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("input"))?;
        let chapter_path = root.join("input").join("chapter_1.txt");
        fs::write(&chapter_path, "少年穿越到了修仙世界。")?;

        let config = test_config(root, ScriptConcurrency::Serialized);
        let mock_llm = Arc::new(MockLlmClient::new(None));
        let call_count = mock_llm.call_count.clone();

        let workflow = WorkflowManager::new(
            config,
            mock_llm.clone(),
            mock_llm,
            Arc::new(NativeStorage::new()),
        );

        let source = workflow.select_source().await?;
        assert_eq!(source, chapter_path.to_string_lossy());

        let summary = workflow.run(&source).await?;
        assert_eq!(summary.generated, 2);
        assert!(summary.failed.is_empty());
        assert_eq!(
            *call_count.lock().unwrap(),
            4,
            "Analysis + Plan + one call per episode"
        );

        let out = root.join("output").join("chapter_1");
        assert!(out.join("analysis.json").exists());
        assert!(out.join("plan.json").exists());
        let episode = fs::read_to_string(out.join("episode_01.md"))?;
        assert!(episode.starts_with("# 第 1 集 开端"));
        assert!(episode.contains("少年: 我回来了。"));

        let log = fs::read_to_string(out.join("progress.log"))?;
        assert!(log.starts_with("Analysis queue initialized."));
        Ok(())
    }

    #[tokio::test]
    async fn test_parallel_generation_isolates_failed_episode() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("input"))?;
        let chapter_path = root.join("input").join("chapter_1.txt");
        fs::write(&chapter_path, "少年穿越到了修仙世界。")?;

        let config = test_config(root, ScriptConcurrency::PerEpisode);
        let mock_llm = Arc::new(MockLlmClient::new(Some(2)));

        let workflow = WorkflowManager::new(
            config,
            mock_llm.clone(),
            mock_llm,
            Arc::new(NativeStorage::new()),
        );

        let summary = workflow.run(chapter_path.to_str().unwrap()).await?;
        assert_eq!(summary.generated, 1);
        assert_eq!(summary.failed, vec![2]);

        let out = root.join("output").join("chapter_1");
        assert!(out.join("episode_01.md").exists());
        assert!(!out.join("episode_02.md").exists());
        assert_eq!(workflow.controller().pending_episodes(), vec![2]);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_input_folder_is_an_error() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("input"))?;
        fs::write(root.join("input").join("notes.md"), "not a source")?;

        let mock_llm = Arc::new(MockLlmClient::new(None));
        let workflow = WorkflowManager::new(
            test_config(root, ScriptConcurrency::Serialized),
            mock_llm.clone(),
            mock_llm,
            Arc::new(NativeStorage::new()),
        );

        assert!(workflow.select_source().await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_blank_source_stops_before_llm() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("input"))?;
        let chapter_path = root.join("input").join("empty.txt");
        fs::write(&chapter_path, "   ")?;

        let mock_llm = Arc::new(MockLlmClient::new(None));
        let call_count = mock_llm.call_count.clone();
        let workflow = WorkflowManager::new(
            test_config(root, ScriptConcurrency::Serialized),
            mock_llm.clone(),
            mock_llm,
            Arc::new(NativeStorage::new()),
        );

        let err = workflow.run(chapter_path.to_str().unwrap()).await.unwrap_err();
        assert!(err.to_string().contains("input text is empty"));
        assert_eq!(*call_count.lock().unwrap(), 0);
        Ok(())
    }
}
