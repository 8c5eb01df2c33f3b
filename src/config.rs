use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::assembly::{Presentation, TextConfig};

const ENV_PREFIX: &str = "P2V_";

/// What the rendering stage does when some clips fail to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RenderFailurePolicy {
    /// Any failed clip fails the task on entering finalize, after every
    /// lane has finished.
    #[default]
    Fatal,
    /// Continue with the clips that rendered, as long as at least one did.
    Tolerate,
}

impl FromStr for RenderFailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fatal" => Ok(Self::Fatal),
            "tolerate" => Ok(Self::Tolerate),
            other => Err(anyhow::anyhow!("Invalid render failure policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BusTopics {
    pub inbound: String,
    pub progress: String,
    pub result: String,
}

impl Default for BusTopics {
    fn default() -> Self {
        Self {
            inbound: "prompt2video.requests".to_string(),
            progress: "prompt2video.progress".to_string(),
            result: "prompt2video.results".to_string(),
        }
    }
}

/// Base URLs of the HTTP collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceEndpoints {
    pub podcast_url: String,
    pub keyword_url: String,
    pub image_search_url: String,
    pub render_url: String,
    pub languages: [String; 2],
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            podcast_url: "http://localhost:8000".to_string(),
            keyword_url: "http://localhost:8001".to_string(),
            image_search_url: "http://localhost:8002".to_string(),
            render_url: "http://localhost:8003/api/v1/video/".to_string(),
            languages: ["vi".to_string(), "en".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub max_generation_attempts: u32,
    pub generation_retry_delay: Duration,
    // per clip, scaled by batch size when polling
    pub render_max_attempts: u32,
    pub render_poll_delay: Duration,
    pub keyword_poll_interval: Duration,
    pub keyword_timeout: Duration,
    pub image_count: usize,
    pub music_path: PathBuf,
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    pub render_failure_policy: RenderFailurePolicy,
    pub presentation: Presentation,
    pub topics: BusTopics,
    pub endpoints: ServiceEndpoints,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_generation_attempts: 5,
            generation_retry_delay: Duration::ZERO,
            render_max_attempts: 1200,
            render_poll_delay: Duration::from_secs(1),
            keyword_poll_interval: Duration::from_millis(500),
            keyword_timeout: Duration::from_secs(30),
            image_count: 12,
            music_path: PathBuf::from("./p2v_data/assets/music.mp3"),
            work_dir: PathBuf::from("./p2v_data/work"),
            output_dir: PathBuf::from("./p2v_data/output"),
            render_failure_policy: RenderFailurePolicy::Fatal,
            presentation: Presentation::default(),
            topics: BusTopics::default(),
            endpoints: ServiceEndpoints::default(),
        }
    }
}

impl PipelineConfig {
    /// Build from `P2V_*` variables, process environment first, then `.env`.
    /// Unset keys keep their defaults; unparsable values are errors.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(lookup_env)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| lookup(&format!("{}{}", ENV_PREFIX, key));

        let millis = |key: &str, default: Duration| -> Result<Duration> {
            parse_or(get(key), key, default.as_millis() as u64).map(Duration::from_millis)
        };

        let presentation = Presentation {
            fps: parse_or(get("FPS"), "FPS", defaults.presentation.fps)?,
            width: parse_or(get("FRAME_WIDTH"), "FRAME_WIDTH", defaults.presentation.width)?,
            height: parse_or(get("FRAME_HEIGHT"), "FRAME_HEIGHT", defaults.presentation.height)?,
            text: TextConfig {
                font_color: get("FONT_COLOR").unwrap_or(defaults.presentation.text.font_color),
                background_color: get("BACKGROUND_COLOR")
                    .unwrap_or(defaults.presentation.text.background_color),
            },
        };

        let endpoints = ServiceEndpoints {
            podcast_url: get("PODCAST_URL").unwrap_or(defaults.endpoints.podcast_url),
            keyword_url: get("KEYWORD_URL").unwrap_or(defaults.endpoints.keyword_url),
            image_search_url: get("IMAGE_SEARCH_URL").unwrap_or(defaults.endpoints.image_search_url),
            render_url: get("RENDER_URL").unwrap_or(defaults.endpoints.render_url),
            languages: match get("LANGUAGES") {
                Some(value) => parse_languages(&value)?,
                None => defaults.endpoints.languages,
            },
        };

        Ok(Self {
            max_generation_attempts: parse_or(
                get("MAX_GENERATION_ATTEMPTS"),
                "MAX_GENERATION_ATTEMPTS",
                defaults.max_generation_attempts,
            )?,
            generation_retry_delay: millis("GENERATION_RETRY_DELAY_MS", defaults.generation_retry_delay)?,
            render_max_attempts: parse_or(
                get("RENDER_MAX_ATTEMPTS"),
                "RENDER_MAX_ATTEMPTS",
                defaults.render_max_attempts,
            )?,
            render_poll_delay: millis("RENDER_POLL_DELAY_MS", defaults.render_poll_delay)?,
            keyword_poll_interval: millis("KEYWORD_POLL_INTERVAL_MS", defaults.keyword_poll_interval)?,
            keyword_timeout: millis("KEYWORD_TIMEOUT_MS", defaults.keyword_timeout)?,
            image_count: parse_or(get("IMAGE_COUNT"), "IMAGE_COUNT", defaults.image_count)?,
            music_path: get("MUSIC_PATH").map(PathBuf::from).unwrap_or(defaults.music_path),
            work_dir: get("WORK_DIR").map(PathBuf::from).unwrap_or(defaults.work_dir),
            output_dir: get("OUTPUT_DIR").map(PathBuf::from).unwrap_or(defaults.output_dir),
            render_failure_policy: parse_or(
                get("RENDER_FAILURE_POLICY"),
                "RENDER_FAILURE_POLICY",
                defaults.render_failure_policy,
            )?,
            presentation,
            topics: BusTopics {
                inbound: get("INBOUND_TOPIC").unwrap_or(defaults.topics.inbound),
                progress: get("PROGRESS_TOPIC").unwrap_or(defaults.topics.progress),
                result: get("RESULT_TOPIC").unwrap_or(defaults.topics.result),
            },
            endpoints,
        })
    }
}

fn lookup_env(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) => Some(value),
        Err(_) => dotenv::var(key).ok(),
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}{}: {:?} ({})", ENV_PREFIX, key, raw, e)),
        None => Ok(default),
    }
}

fn parse_languages(value: &str) -> Result<[String; 2]> {
    let parts: Vec<&str> = value.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
    match parts.as_slice() {
        [first, second] => Ok([first.to_string(), second.to_string()]),
        _ => Err(anyhow::anyhow!("{}LANGUAGES must name exactly two languages", ENV_PREFIX)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.max_generation_attempts, 5);
        assert_eq!(config.render_max_attempts, 1200);
        assert_eq!(config.image_count, 12);
        assert_eq!(config.presentation.fps, 24);
        assert_eq!(config.render_failure_policy, RenderFailurePolicy::Fatal);
    }

    #[test]
    fn test_overrides() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("P2V_MAX_GENERATION_ATTEMPTS", "3"),
            ("P2V_RENDER_POLL_DELAY_MS", "250"),
            ("P2V_RENDER_FAILURE_POLICY", "Tolerate"),
            ("P2V_FRAME_WIDTH", "1280"),
            ("P2V_OUTPUT_DIR", "/tmp/out"),
            ("P2V_LANGUAGES", "en, fr"),
            ("P2V_RESULT_TOPIC", "done"),
        ]))
        .unwrap();

        assert_eq!(config.max_generation_attempts, 3);
        assert_eq!(config.render_poll_delay, Duration::from_millis(250));
        assert_eq!(config.render_failure_policy, RenderFailurePolicy::Tolerate);
        assert_eq!(config.presentation.width, 1280);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.endpoints.languages, ["en".to_string(), "fr".to_string()]);
        assert_eq!(config.topics.result, "done");
    }

    #[test]
    fn test_invalid_values() {
        assert!(PipelineConfig::from_lookup(lookup(&[("P2V_IMAGE_COUNT", "many")])).is_err());
        assert!(PipelineConfig::from_lookup(lookup(&[("P2V_RENDER_FAILURE_POLICY", "retry")])).is_err());
        assert!(PipelineConfig::from_lookup(lookup(&[("P2V_LANGUAGES", "en")])).is_err());
    }
}
