use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Standard Chinese web-novel categories. Serialized with the Chinese label.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Genre {
    #[serde(rename = "玄幻")]
    Xuanhuan,
    #[serde(rename = "武侠")]
    Wuxia,
    #[serde(rename = "都市")]
    Urban,
    #[serde(rename = "言情")]
    Romance,
    #[serde(rename = "古言")]
    AncientRomance,
    #[serde(rename = "悬疑")]
    Suspense,
    #[serde(rename = "推理")]
    Mystery,
    #[serde(rename = "科幻")]
    SciFi,
    #[serde(rename = "末世")]
    Doomsday,
    #[serde(rename = "重生")]
    Rebirth,
    #[serde(rename = "穿越")]
    Transmigration,
    #[serde(rename = "其他")]
    Other,
}

impl Genre {
    pub const ALL: [Genre; 12] = [
        Genre::Xuanhuan,
        Genre::Wuxia,
        Genre::Urban,
        Genre::Romance,
        Genre::AncientRomance,
        Genre::Suspense,
        Genre::Mystery,
        Genre::SciFi,
        Genre::Doomsday,
        Genre::Rebirth,
        Genre::Transmigration,
        Genre::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Genre::Xuanhuan => "玄幻",
            Genre::Wuxia => "武侠",
            Genre::Urban => "都市",
            Genre::Romance => "言情",
            Genre::AncientRomance => "古言",
            Genre::Suspense => "悬疑",
            Genre::Mystery => "推理",
            Genre::SciFi => "科幻",
            Genre::Doomsday => "末世",
            Genre::Rebirth => "重生",
            Genre::Transmigration => "穿越",
            Genre::Other => "其他",
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            Genre::Xuanhuan => "Xuanhuan",
            Genre::Wuxia => "Wuxia",
            Genre::Urban => "Urban",
            Genre::Romance => "Romance",
            Genre::AncientRomance => "AncientRomance",
            Genre::Suspense => "Suspense",
            Genre::Mystery => "Mystery",
            Genre::SciFi => "SciFi",
            Genre::Doomsday => "Doomsday",
            Genre::Rebirth => "Rebirth",
            Genre::Transmigration => "Transmigration",
            Genre::Other => "Other",
        }
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Genre {
    type Err = String;

    /// Accepts the Chinese label or the variant name in any case
    /// ("科幻", "SciFi", "scifi").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Genre::ALL
            .iter()
            .copied()
            .find(|g| g.label() == s || g.variant_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown genre: {:?}", s))
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct Character {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub traits: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub genre: Genre,
    pub title: String,
    #[serde(default)]
    pub logline: String,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub pacing: String,
    #[serde(default)]
    pub target_audience: String,
    #[serde(default)]
    pub characters: Vec<Character>,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EpisodePlanEntry {
    pub episode_number: u32,
    pub title: String,
    #[serde(default)]
    pub synopsis: String,
    #[serde(default)]
    pub key_events: Vec<String>,
    /// Names only. Not checked against the analysis characters.
    #[serde(default)]
    pub characters_involved: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScriptArtifact {
    pub episode_number: u32,
    pub content: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Idle,
    Analyzing,
    Planning,
    Writing,
    Complete,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Analyzing => "analyzing",
            Stage::Planning => "planning",
            Stage::Writing => "writing",
            Stage::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the controller for progress display.
#[derive(Clone, Debug)]
pub struct PipelineState {
    pub stage: Stage,
    pub busy: bool,
    /// Newest first.
    pub log: Vec<String>,
    pub in_flight: Vec<u32>,
    pub last_error: Option<crate::core::error::PipelineError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genre_parsing_accepts_label_and_name() {
        assert_eq!("玄幻".parse::<Genre>().unwrap(), Genre::Xuanhuan);
        assert_eq!(" 科幻 ".parse::<Genre>().unwrap(), Genre::SciFi);
        assert_eq!("scifi".parse::<Genre>().unwrap(), Genre::SciFi);
        assert_eq!("AncientRomance".parse::<Genre>().unwrap(), Genre::AncientRomance);
        assert!("space opera".parse::<Genre>().is_err());
    }

    #[test]
    fn test_analysis_serializes_with_chinese_genre_and_camel_case() {
        let analysis = AnalysisResult {
            genre: Genre::Xuanhuan,
            title: "T".to_string(),
            logline: String::new(),
            themes: vec!["穿越".to_string()],
            pacing: "快".to_string(),
            target_audience: "青年".to_string(),
            characters: vec![],
        };

        let json = serde_json::to_string(&analysis).unwrap();
        assert!(json.contains(r#""genre":"玄幻""#));
        assert!(json.contains(r#""targetAudience":"青年""#));

        let back: AnalysisResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, analysis);
    }

    #[test]
    fn test_plan_entry_defaults_optional_lists() {
        let entry: EpisodePlanEntry =
            serde_json::from_str(r#"{"episodeNumber": 3, "title": "重逢"}"#).unwrap();
        assert_eq!(entry.episode_number, 3);
        assert!(entry.key_events.is_empty());
        assert!(entry.characters_involved.is_empty());
    }
}
