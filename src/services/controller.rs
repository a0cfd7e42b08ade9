//! Staged pipeline controller.
//!
//! `StageController` is the single owner of pipeline state. Analysis and
//! Planning run as one automatic, all-or-nothing span started by
//! [`StageController::start`]. Scripts are produced afterwards, one episode
//! per [`StageController::generate_script`] call, and a failure there stays
//! local to that episode.
//!
//! Session state lives behind a `std::sync::Mutex` that is only taken in
//! short synchronous sections and never held across an `.await`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::config::{EpisodeNumbering, PipelineConfig, ScriptConcurrency};
use crate::core::error::{Capability, PipelineError, PipelineResult};
use crate::core::state::{
    AnalysisResult, EpisodePlanEntry, PipelineState, ScriptArtifact, Stage,
};
use crate::services::artifacts::ArtifactStore;
use crate::services::engines::{AnalysisEngine, PlanningEngine, ScriptEngine};
use crate::services::events::EventLog;

/// Result of a `generate_script` call that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptOutcome {
    Generated,
    /// The episode already had a script; nothing was called.
    Unchanged,
    /// The script engine failed. Only the log and `last_error` changed.
    Failed(PipelineError),
}

/// Everything one pipeline session owns.
#[derive(Debug, Default)]
struct PipelineSession {
    stage: Stage,
    running_start: bool,
    in_flight: HashSet<u32>,
    source_text: Option<Arc<str>>,
    analysis: Option<Arc<AnalysisResult>>,
    plan: Vec<EpisodePlanEntry>,
    log: EventLog,
    artifacts: ArtifactStore,
    last_error: Option<PipelineError>,
}

impl PipelineSession {
    fn busy(&self) -> bool {
        self.running_start || !self.in_flight.is_empty()
    }

    fn discard_run(&mut self) {
        self.source_text = None;
        self.analysis = None;
        self.plan.clear();
    }

    fn all_scripted(&self) -> bool {
        !self.plan.is_empty()
            && self
                .plan
                .iter()
                .all(|ep| self.artifacts.contains(ep.episode_number))
    }
}

/// Checks episode numbering on a freshly planned list. Returns the plan to
/// keep and whether it had to be renumbered.
pub fn validate_plan(
    mut plan: Vec<EpisodePlanEntry>,
    policy: EpisodeNumbering,
) -> PipelineResult<(Vec<EpisodePlanEntry>, bool)> {
    if plan.is_empty() {
        return Err(PipelineError::capability(
            Capability::Planning,
            "plan contains no episodes",
        ));
    }

    let mut seen = HashSet::with_capacity(plan.len());
    let problem = plan.iter().find_map(|ep| {
        if ep.episode_number == 0 {
            Some("episode number 0 is not allowed".to_string())
        } else if !seen.insert(ep.episode_number) {
            Some(format!("duplicate episode number {}", ep.episode_number))
        } else {
            None
        }
    });

    match (problem, policy) {
        (None, _) => Ok((plan, false)),
        (Some(message), EpisodeNumbering::Reject) => {
            Err(PipelineError::schema(Capability::Planning, message))
        }
        (Some(_), EpisodeNumbering::Renumber) => {
            for (i, ep) in plan.iter_mut().enumerate() {
                ep.episode_number = i as u32 + 1;
            }
            Ok((plan, true))
        }
    }
}

/// Clears the running-start mark when `start` ends, including when its
/// future is dropped mid-run. An interrupted run is discarded like a failed one.
struct StartGuard<'a> {
    controller: &'a StageController,
    armed: bool,
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut s = self.controller.session();
        s.running_start = false;
        s.stage = Stage::Idle;
        s.discard_run();
        s.log.push_failure("Analysis run interrupted.");
    }
}

/// Releases an episode's in-flight mark if `generate_script` is dropped
/// before the engine returns.
struct InFlightGuard<'a> {
    controller: &'a StageController,
    episode_number: u32,
    armed: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut s = self.controller.session();
        s.in_flight.remove(&self.episode_number);
        s.log.push_failure(format!(
            "Script generation for episode {} was interrupted.",
            self.episode_number
        ));
    }
}

pub struct StageController {
    analysis_engine: Box<dyn AnalysisEngine>,
    planning_engine: Box<dyn PlanningEngine>,
    script_engine: Box<dyn ScriptEngine>,
    settings: PipelineConfig,
    session: Mutex<PipelineSession>,
}

impl StageController {
    pub fn new(
        analysis_engine: Box<dyn AnalysisEngine>,
        planning_engine: Box<dyn PlanningEngine>,
        script_engine: Box<dyn ScriptEngine>,
        settings: PipelineConfig,
    ) -> Self {
        Self {
            analysis_engine,
            planning_engine,
            script_engine,
            settings,
            session: Mutex::new(PipelineSession::default()),
        }
    }

    pub fn settings(&self) -> &PipelineConfig {
        &self.settings
    }

    fn session(&self) -> MutexGuard<'_, PipelineSession> {
        // State is only mutated in short non-panicking sections.
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs Analysis then Planning on `text`.
    ///
    /// Replaces any previous run, including its scripts. On failure the stage
    /// drops back to Idle with nothing from this run kept, and the error is
    /// both logged and returned.
    pub async fn start(&self, text: &str) -> PipelineResult<()> {
        if text.trim().is_empty() {
            return Err(PipelineError::validation("input text is empty"));
        }

        let source: Arc<str> = Arc::from(text);
        {
            let mut s = self.session();
            if s.busy() {
                return Err(PipelineError::Busy);
            }
            s.discard_run();
            s.artifacts.clear();
            s.last_error = None;
            s.running_start = true;
            s.stage = Stage::Analyzing;
            s.source_text = Some(source.clone());
            s.log.push("Analysis queue initialized.");
        }
        let mut guard = StartGuard {
            controller: self,
            armed: true,
        };

        let result = self.run_automatic_span(&source).await;

        let mut s = self.session();
        guard.armed = false;
        s.running_start = false;
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                s.log.push_failure(format!("Error: {}", e));
                s.stage = Stage::Idle;
                s.discard_run();
                s.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    async fn run_automatic_span(&self, text: &str) -> PipelineResult<()> {
        self.session().log.push("Sending text to the analysis engine...");
        let analysis = Arc::new(self.analysis_engine.analyze(text).await?);

        {
            let mut s = self.session();
            s.log.push(format!("Analysis complete. Genre: {}", analysis.genre));
            s.log
                .push(format!("Key themes: {}", analysis.themes.join(", ")));
            s.analysis = Some(analysis.clone());
            s.stage = Stage::Planning;
            s.log.push("Building narrative structure...");
        }

        let raw_plan = self.planning_engine.plan(&analysis, text).await?;
        let (plan, renumbered) = validate_plan(raw_plan, self.settings.episode_numbering)?;

        let mut s = self.session();
        if renumbered {
            s.log
                .push_failure("Planner returned conflicting episode numbers; renumbered in order.");
        }
        s.log
            .push(format!("Structure ready. {} episodes planned.", plan.len()));
        s.plan = plan;
        s.stage = Stage::Writing;
        Ok(())
    }

    /// Writes the script for one planned episode.
    ///
    /// Validation problems come back as `Err` before any engine call. Once the
    /// engine is involved the call always returns `Ok`, with engine failures
    /// reported as [`ScriptOutcome::Failed`].
    pub async fn generate_script(&self, episode_number: u32) -> PipelineResult<ScriptOutcome> {
        let (episode, analysis, text) = {
            let mut s = self.session();

            let analysis = s
                .analysis
                .clone()
                .ok_or_else(|| PipelineError::validation("no analysis loaded"))?;
            if s.plan.is_empty() {
                return Err(PipelineError::validation("no episode plan loaded"));
            }
            let episode = s
                .plan
                .iter()
                .find(|ep| ep.episode_number == episode_number)
                .cloned()
                .ok_or_else(|| {
                    PipelineError::validation(format!(
                        "episode {} is not in the current plan",
                        episode_number
                    ))
                })?;

            if s.artifacts.contains(episode_number) {
                return Ok(ScriptOutcome::Unchanged);
            }

            match self.settings.script_concurrency {
                ScriptConcurrency::Serialized if s.busy() => return Err(PipelineError::Busy),
                ScriptConcurrency::PerEpisode if s.running_start => {
                    return Err(PipelineError::Busy)
                }
                ScriptConcurrency::PerEpisode if s.in_flight.contains(&episode_number) => {
                    return Err(PipelineError::EpisodeInFlight(episode_number))
                }
                _ => {}
            }

            let text = s
                .source_text
                .clone()
                .ok_or_else(|| PipelineError::validation("no source text loaded"))?;

            s.in_flight.insert(episode_number);
            s.log.push(format!(
                "Starting script generation for episode {}...",
                episode_number
            ));
            (episode, analysis, text)
        };
        let mut guard = InFlightGuard {
            controller: self,
            episode_number,
            armed: true,
        };

        let result = self
            .script_engine
            .write_script(&episode, &analysis, &text)
            .await
            .and_then(|script| {
                if script.trim().is_empty() {
                    Err(PipelineError::capability(
                        Capability::Script,
                        "empty script response",
                    ))
                } else {
                    Ok(script)
                }
            });

        let mut s = self.session();
        guard.armed = false;
        s.in_flight.remove(&episode_number);
        match result {
            Ok(script) => {
                s.artifacts.insert_if_absent(episode_number, script);
                s.log
                    .push(format!("Episode {} script compiled.", episode_number));
                if self.settings.complete_when_all_scripted
                    && s.stage == Stage::Writing
                    && s.all_scripted()
                {
                    s.stage = Stage::Complete;
                    s.log.push("All planned episodes have scripts.");
                }
                Ok(ScriptOutcome::Generated)
            }
            Err(e) => {
                log::debug!("episode {} script failure: {}", episode_number, e);
                s.log.push_failure(format!(
                    "Script generation failed for episode {}.",
                    episode_number
                ));
                s.last_error = Some(e.clone());
                Ok(ScriptOutcome::Failed(e))
            }
        }
    }

    pub fn stage(&self) -> Stage {
        self.session().stage
    }

    pub fn is_busy(&self) -> bool {
        self.session().busy()
    }

    pub fn snapshot(&self) -> PipelineState {
        let s = self.session();
        let mut in_flight: Vec<u32> = s.in_flight.iter().copied().collect();
        in_flight.sort_unstable();
        PipelineState {
            stage: s.stage,
            busy: s.busy(),
            log: s.log.to_vec(),
            in_flight,
            last_error: s.last_error.clone(),
        }
    }

    pub fn analysis(&self) -> Option<AnalysisResult> {
        self.session().analysis.as_deref().cloned()
    }

    pub fn plan(&self) -> Vec<EpisodePlanEntry> {
        self.session().plan.clone()
    }

    pub fn source_text(&self) -> Option<String> {
        self.session().source_text.as_deref().map(str::to_string)
    }

    pub fn artifact(&self, episode_number: u32) -> Option<ScriptArtifact> {
        self.session().artifacts.get(episode_number)
    }

    /// Scripts sorted by episode number.
    pub fn artifacts(&self) -> Vec<ScriptArtifact> {
        self.session().artifacts.sorted()
    }

    /// Newest first.
    pub fn log(&self) -> Vec<String> {
        self.session().log.to_vec()
    }

    /// Oldest first.
    pub fn log_chronological(&self) -> Vec<String> {
        self.session().log.oldest_first()
    }

    pub fn last_error(&self) -> Option<PipelineError> {
        self.session().last_error.clone()
    }

    /// Planned episode numbers that still lack a script, in plan order.
    pub fn pending_episodes(&self) -> Vec<u32> {
        let s = self.session();
        s.plan
            .iter()
            .map(|ep| ep.episode_number)
            .filter(|n| !s.artifacts.contains(*n))
            .collect()
    }
}
