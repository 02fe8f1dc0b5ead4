//! Environment configuration for the watcher.
//!
//! | Variable               | Required | Default                     |
//! |------------------------|----------|-----------------------------|
//! | `EYESIS_API_URL`       | no       | `http://localhost:5000/api` |
//! | `EYESIS_WS_URL`        | no       | derived from the API URL    |
//! | `EYESIS_PERSON_IDS`    | yes      | --                          |
//! | `EYESIS_FRAMES_DIR`    | yes      | --                          |
//! | `EYESIS_FPS`           | no       | `10`                        |
//! | `EYESIS_OUTPUT_DIR`    | no       | `./eyesis-output`           |
//! | `EYESIS_VIDEO_PATH`    | no       | --                          |
//! | `EYESIS_DISPLAY_NAMES` | no       | --                          |

use std::collections::HashMap;
use std::path::PathBuf;

use eyesis_client::client::derive_ws_url;
use eyesis_core::types::PersonId;

pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_FPS: f64 = 10.0;
pub const DEFAULT_OUTPUT_DIR: &str = "./eyesis-output";

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub api_url: String,
    pub ws_url: String,
    /// Watched persons, in selection order.
    pub person_ids: Vec<PersonId>,
    pub frames_dir: PathBuf,
    pub fps: f64,
    pub output_dir: PathBuf,
    /// Source video; closed clips are cut from it server-side when set.
    pub video_path: Option<PathBuf>,
    pub display_names: HashMap<PersonId, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} has an invalid value: {value}")]
    Invalid { var: &'static str, value: String },
}

impl WatchConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_url = var("EYESIS_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let ws_url = match var("EYESIS_WS_URL") {
            Some(url) => url,
            None => derive_ws_url(&api_url).map_err(|_| ConfigError::Invalid {
                var: "EYESIS_API_URL",
                value: api_url.clone(),
            })?,
        };

        let raw_ids = var("EYESIS_PERSON_IDS").ok_or(ConfigError::Missing("EYESIS_PERSON_IDS"))?;
        let person_ids = parse_ids(&raw_ids);
        if person_ids.is_empty() {
            return Err(ConfigError::Invalid {
                var: "EYESIS_PERSON_IDS",
                value: raw_ids,
            });
        }

        let frames_dir = var("EYESIS_FRAMES_DIR")
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing("EYESIS_FRAMES_DIR"))?;

        let fps = match var("EYESIS_FPS") {
            Some(raw) => raw
                .parse::<f64>()
                .ok()
                .filter(|fps| fps.is_finite() && *fps > 0.0)
                .ok_or(ConfigError::Invalid {
                    var: "EYESIS_FPS",
                    value: raw,
                })?,
            None => DEFAULT_FPS,
        };

        let display_names = match var("EYESIS_DISPLAY_NAMES") {
            Some(raw) => parse_display_names(&raw)?,
            None => HashMap::new(),
        };

        Ok(Self {
            api_url,
            ws_url,
            person_ids,
            frames_dir,
            fps,
            output_dir: PathBuf::from(
                var("EYESIS_OUTPUT_DIR").unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string()),
            ),
            video_path: var("EYESIS_VIDEO_PATH").map(PathBuf::from),
            display_names,
        })
    }
}

/// Comma-separated ids; blanks dropped, repeats keep their first position.
pub fn parse_ids(raw: &str) -> Vec<PersonId> {
    let mut ids: Vec<PersonId> = Vec::new();
    for id in raw.split(',').map(str::trim).filter(|id| !id.is_empty()) {
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

/// `id=name` pairs separated by commas.
pub fn parse_display_names(raw: &str) -> Result<HashMap<PersonId, String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((id, name)) if !id.trim().is_empty() && !name.trim().is_empty() => {
                Ok((id.trim().to_string(), name.trim().to_string()))
            }
            _ => Err(ConfigError::Invalid {
                var: "EYESIS_DISPLAY_NAMES",
                value: pair.to_string(),
            }),
        })
        .collect()
}
