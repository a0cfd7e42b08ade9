//! Capability adapters around the generative service.
//!
//! The three traits are the contracts the controller consumes. The `Llm*`
//! implementations own prompt construction, input truncation and response
//! parsing. Every response is treated as untrusted: empty or non-JSON
//! payloads become `CapabilityFailure`, payloads with the wrong shape become
//! `SchemaViolation`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use zhconv::{zhconv, Variant};

use crate::core::config::PipelineConfig;
use crate::core::error::{Capability, PipelineError, PipelineResult};
use crate::core::state::{AnalysisResult, Character, EpisodePlanEntry, Genre};
use crate::services::llm::{ChatOptions, LlmClient};

pub const SCRIPT_TEMPERATURE: f32 = 0.8;

#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    async fn analyze(&self, text: &str) -> PipelineResult<AnalysisResult>;
}

#[async_trait]
pub trait PlanningEngine: Send + Sync {
    async fn plan(
        &self,
        analysis: &AnalysisResult,
        text: &str,
    ) -> PipelineResult<Vec<EpisodePlanEntry>>;
}

/// Writes one episode script. Failures must come back as `Err`; the
/// controller additionally treats a blank `Ok` body as a failed attempt.
#[async_trait]
pub trait ScriptEngine: Send + Sync {
    async fn write_script(
        &self,
        episode: &EpisodePlanEntry,
        analysis: &AnalysisResult,
        text: &str,
    ) -> PipelineResult<String>;
}

/// First `limit` characters of `text`, and whether anything was cut.
pub fn truncate_chars(text: &str, limit: usize) -> (&str, bool) {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => (&text[..idx], true),
        None => (text, false),
    }
}

/// Removes a Markdown fence (```json, ```markdown, bare ```) around a reply.
pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if !s.starts_with("```") {
        return s.to_string();
    }

    let body = match s.find('\n') {
        Some(idx) => &s[idx + 1..],
        None => s.trim_start_matches("```").trim_start_matches("json"),
    };
    body.trim_end().trim_end_matches("```").trim().to_string()
}

fn to_target_language(raw: &str, simplified: bool) -> String {
    if simplified {
        zhconv(raw, Variant::ZhCN)
    } else {
        raw.to_string()
    }
}

fn parse_json_payload(raw: &str, capability: Capability) -> PipelineResult<Value> {
    let clean = strip_code_blocks(raw);
    if clean.is_empty() {
        return Err(PipelineError::capability(capability, "empty response"));
    }
    serde_json::from_str(&clean).map_err(|e| {
        PipelineError::capability(capability, format!("unparseable response: {}", e))
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAnalysis {
    genre: String,
    title: String,
    #[serde(default)]
    logline: String,
    #[serde(default)]
    themes: Vec<String>,
    #[serde(default)]
    pacing: String,
    #[serde(default, alias = "target_audience")]
    target_audience: String,
    #[serde(default)]
    characters: Vec<Character>,
}

/// Parses an analysis reply. Themes are de-duplicated in first-seen order.
pub fn parse_analysis(raw: &str) -> PipelineResult<AnalysisResult> {
    let value = parse_json_payload(raw, Capability::Analysis)?;
    let raw: RawAnalysis = serde_json::from_value(value)
        .map_err(|e| PipelineError::schema(Capability::Analysis, e.to_string()))?;

    let genre: Genre = raw
        .genre
        .parse()
        .map_err(|e: String| PipelineError::schema(Capability::Analysis, e))?;

    let mut themes: Vec<String> = Vec::with_capacity(raw.themes.len());
    for theme in raw.themes {
        let theme = theme.trim().to_string();
        if !theme.is_empty() && !themes.contains(&theme) {
            themes.push(theme);
        }
    }

    Ok(AnalysisResult {
        genre,
        title: raw.title,
        logline: raw.logline,
        themes,
        pacing: raw.pacing,
        target_audience: raw.target_audience,
        characters: raw.characters,
    })
}

/// Parses a plan reply: either a bare array or `{"episodes": [...]}`.
/// Numbering is left for the controller to check.
pub fn parse_plan(raw: &str) -> PipelineResult<Vec<EpisodePlanEntry>> {
    let value = parse_json_payload(raw, Capability::Planning)?;
    let list = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => match map.remove("episodes") {
            Some(list @ Value::Array(_)) => list,
            _ => {
                return Err(PipelineError::schema(
                    Capability::Planning,
                    "expected an episode array or an object with an \"episodes\" array",
                ))
            }
        },
        _ => {
            return Err(PipelineError::schema(
                Capability::Planning,
                "expected an episode array",
            ))
        }
    };

    let entries: Vec<EpisodePlanEntry> = serde_json::from_value(list)
        .map_err(|e| PipelineError::schema(Capability::Planning, e.to_string()))?;

    if entries.is_empty() {
        return Err(PipelineError::capability(
            Capability::Planning,
            "plan contains no episodes",
        ));
    }
    Ok(entries)
}

// --- Response schemas ---

/// Structured-output schema for an analysis reply. `genre` is limited to
/// the twelve category labels.
pub fn analysis_schema() -> Value {
    let genres: Vec<&str> = Genre::ALL.iter().map(|g| g.label()).collect();
    json!({
        "type": "object",
        "properties": {
            "genre": { "type": "string", "enum": genres },
            "title": { "type": "string" },
            "logline": { "type": "string" },
            "themes": { "type": "array", "items": { "type": "string" } },
            "pacing": { "type": "string" },
            "targetAudience": { "type": "string" },
            "characters": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "role": { "type": "string" },
                        "description": { "type": "string" },
                        "traits": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["name", "role", "description", "traits"]
                }
            }
        },
        "required": ["genre", "title", "logline", "themes", "characters", "pacing", "targetAudience"]
    })
}

/// Structured-output schema for a plan reply, wrapped as `{"episodes": [...]}`.
pub fn plan_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "episodes": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "episodeNumber": { "type": "integer" },
                        "title": { "type": "string" },
                        "synopsis": { "type": "string" },
                        "keyEvents": { "type": "array", "items": { "type": "string" } },
                        "charactersInvolved": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["episodeNumber", "title", "synopsis", "keyEvents", "charactersInvolved"]
                }
            }
        },
        "required": ["episodes"]
    })
}

// --- Prompts ---

const ANALYSIS_SYSTEM: &str =
    "你是一位精通中文网络小说的文学分析师。只输出合法的 JSON，所有字段值一律使用简体中文。";

const PLANNING_SYSTEM: &str =
    "你是一位漫剧（动态漫画）改编的分集编剧。只输出合法的 JSON，所有字段值一律使用简体中文。";

const SCRIPT_SYSTEM: &str =
    "你是一位专业的漫剧编剧，擅长竖屏条漫与动态漫画的视觉叙事。剧本正文必须使用简体中文。";

pub fn analysis_prompt(text: &str, limit: usize) -> String {
    let (segment, truncated) = truncate_chars(text, limit);
    let genres = Genre::ALL
        .iter()
        .map(|g| g.label())
        .collect::<Vec<_>>()
        .join("、");

    format!(
        "请分析下面的网络小说文本，为漫剧改编做准备。\
        \n- 从以下题材中选出最主要的一个：{}\
        \n- 提取主要角色（姓名、身份定位、简介、性格特点）。\
        \n- 总结核心主题，写出一句有吸引力的故事梗概（logline）。\
        \n- 说明叙事节奏与目标受众。\
        \n\n请仅返回一个 JSON 对象（不可翻译 JSON key）：\
        {{ \"genre\": \"...\", \"title\": \"...\", \"logline\": \"...\", \"themes\": [\"...\"], \
        \"pacing\": \"...\", \"targetAudience\": \"...\", \
        \"characters\": [ {{ \"name\": \"...\", \"role\": \"...\", \"description\": \"...\", \"traits\": [\"...\"] }} ] }}\
        \n\n小说文本：\n{}{}",
        genres,
        segment,
        if truncated { "\n……（以下内容为控制长度已截断）" } else { "" },
    )
}

pub fn planning_prompt(
    analysis: &AnalysisResult,
    text: &str,
    limit: usize,
) -> PipelineResult<String> {
    let analysis_json = serde_json::to_string(analysis)
        .map_err(|e| PipelineError::capability(Capability::Planning, e.to_string()))?;
    let (segment, _) = truncate_chars(text, limit);

    Ok(format!(
        "根据下面的小说分析和原文，把故事拆分为漫剧分集。\
        \n- 每一集节奏要快，开头有钩子，结尾尽量留悬念。\
        \n- 这一段文本的目标集数为 10 到 12 集。\
        \n- episodeNumber 从 1 开始连续编号，不可重复。\
        \n\n请仅返回一个 JSON 对象（不可翻译 JSON key）：\
        {{ \"episodes\": [ {{ \"episodeNumber\": 1, \"title\": \"...\", \"synopsis\": \"...\", \
        \"keyEvents\": [\"...\"], \"charactersInvolved\": [\"...\"] }} ] }}\
        \n\n分析：{}\
        \n\n小说文本：\n{}",
        analysis_json, segment,
    ))
}

pub fn script_prompt(
    episode: &EpisodePlanEntry,
    analysis: &AnalysisResult,
    text: &str,
    context_limit: Option<usize>,
) -> String {
    let profiles = analysis
        .characters
        .iter()
        .filter(|c| episode.characters_involved.iter().any(|n| n == &c.name))
        .map(|c| format!("- {}（{}）：{}", c.name, c.role, c.description))
        .collect::<Vec<_>>()
        .join("\n");

    let context = match context_limit {
        Some(limit) => truncate_chars(text, limit).0,
        None => text,
    };

    format!(
        "根据下面的分集大纲，写出一集详细的漫剧（动态漫画）剧本。\
        \n\n题材：{}\
        \n作品：{}\
        \n第 {} 集：{}\
        \n剧情梗概：{}\
        \n关键事件：{}\
        \n出场角色：{}\
        \n{}\
        \n\n格式要求：\
        \n- [SCENE] 场景：地点与时间。\
        \n- [VISUAL] 画面：分镜构图、人物表情、动作与光影。\
        \n- [SFX] 音效。\
        \n- 角色名: 台词（每句对白单独一行）。\
        \n- 以适合竖屏条漫与动态漫画的视觉叙事为重点。\
        \n\n原文参考：\n{}\
        \n\n现在请写出第 {} 集的剧本。",
        analysis.genre,
        analysis.title,
        episode.episode_number,
        episode.title,
        episode.synopsis,
        episode.key_events.join("；"),
        episode.characters_involved.join("、"),
        if profiles.is_empty() {
            String::new()
        } else {
            format!("角色设定：\n{}", profiles)
        },
        context,
        episode.episode_number,
    )
}

// --- LLM-backed engines ---

pub struct LlmAnalysisEngine {
    llm: Arc<dyn LlmClient>,
    char_limit: usize,
    simplified: bool,
}

impl LlmAnalysisEngine {
    pub fn new(llm: Arc<dyn LlmClient>, settings: &PipelineConfig) -> Self {
        Self {
            llm,
            char_limit: settings.analysis_char_limit,
            simplified: settings.simplified_chinese,
        }
    }
}

#[async_trait]
impl AnalysisEngine for LlmAnalysisEngine {
    async fn analyze(&self, text: &str) -> PipelineResult<AnalysisResult> {
        let prompt = analysis_prompt(text, self.char_limit);
        let reply = self
            .llm
            .chat(
                ANALYSIS_SYSTEM,
                &prompt,
                &ChatOptions::json_with_schema(analysis_schema()),
            )
            .await
            .map_err(|e| PipelineError::from_transport(Capability::Analysis, &e))?;

        parse_analysis(&to_target_language(&reply, self.simplified))
    }
}

pub struct LlmPlanningEngine {
    llm: Arc<dyn LlmClient>,
    char_limit: usize,
    simplified: bool,
}

impl LlmPlanningEngine {
    pub fn new(llm: Arc<dyn LlmClient>, settings: &PipelineConfig) -> Self {
        Self {
            llm,
            char_limit: settings.planning_char_limit,
            simplified: settings.simplified_chinese,
        }
    }
}

#[async_trait]
impl PlanningEngine for LlmPlanningEngine {
    async fn plan(
        &self,
        analysis: &AnalysisResult,
        text: &str,
    ) -> PipelineResult<Vec<EpisodePlanEntry>> {
        let prompt = planning_prompt(analysis, text, self.char_limit)?;
        let reply = self
            .llm
            .chat(
                PLANNING_SYSTEM,
                &prompt,
                &ChatOptions::json_with_schema(plan_schema()),
            )
            .await
            .map_err(|e| PipelineError::from_transport(Capability::Planning, &e))?;

        parse_plan(&to_target_language(&reply, self.simplified))
    }
}

pub struct LlmScriptEngine {
    llm: Arc<dyn LlmClient>,
    context_limit: Option<usize>,
    simplified: bool,
}

impl LlmScriptEngine {
    pub fn new(llm: Arc<dyn LlmClient>, settings: &PipelineConfig) -> Self {
        Self {
            llm,
            context_limit: settings.script_context_limit,
            simplified: settings.simplified_chinese,
        }
    }
}

#[async_trait]
impl ScriptEngine for LlmScriptEngine {
    async fn write_script(
        &self,
        episode: &EpisodePlanEntry,
        analysis: &AnalysisResult,
        text: &str,
    ) -> PipelineResult<String> {
        let prompt = script_prompt(episode, analysis, text, self.context_limit);
        let reply = self
            .llm
            .chat(
                SCRIPT_SYSTEM,
                &prompt,
                &ChatOptions::creative(SCRIPT_TEMPERATURE),
            )
            .await
            .map_err(|e| PipelineError::from_transport(Capability::Script, &e))?;

        let script = strip_code_blocks(&reply);
        if script.is_empty() {
            return Err(PipelineError::capability(
                Capability::Script,
                "empty script response",
            ));
        }
        Ok(to_target_language(&script, self.simplified))
    }
}
