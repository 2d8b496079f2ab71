use std::path::PathBuf;
use std::time::Duration;

use crate::drift::DriftMethod;
use crate::error::SettingsError;
use crate::routing::{
    normalize_provider_name, parse_provider_list, OperatingMode, LAST_RESORT_PROVIDER,
};

pub const DEFAULT_DRIFT_THRESHOLD: f64 = 0.35;
pub const DEFAULT_OUTPUT_DIR: &str = "outputs";

/// Connection details for the built-in provider adapters.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub local_library: Option<PathBuf>,
    pub comfyui_url: String,
    pub comfyui_timeout: Duration,
    pub openai_api_base: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub stability_api_base: String,
    pub stability_api_key: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            local_library: None,
            comfyui_url: "http://127.0.0.1:8188".to_string(),
            comfyui_timeout: Duration::from_secs(60),
            openai_api_base: "https://api.openai.com/v1".to_string(),
            openai_api_key: None,
            openai_model: "gpt-image-1".to_string(),
            stability_api_base: "https://api.stability.ai".to_string(),
            stability_api_key: None,
        }
    }
}

/// Fully resolved process configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub mode: OperatingMode,
    pub default_provider: String,
    pub fallbacks: Vec<String>,
    pub drift_threshold: f64,
    pub drift_method: DriftMethod,
    pub reference_image: Option<String>,
    pub output_dir: PathBuf,
    pub providers: ProviderSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: OperatingMode::Strict,
            default_provider: LAST_RESORT_PROVIDER.to_string(),
            fallbacks: Vec::new(),
            drift_threshold: DEFAULT_DRIFT_THRESHOLD,
            drift_method: DriftMethod::Auto,
            reference_image: None,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            providers: ProviderSettings::default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves settings through `lookup`; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Settings::default();
        let provider_defaults = ProviderSettings::default();

        let mode = match get("LIKENESS_MODE") {
            Some(raw) => raw.parse()?,
            None => defaults.mode,
        };
        let drift_method = match get("LIKENESS_DRIFT_METHOD") {
            Some(raw) => raw.parse()?,
            None => defaults.drift_method,
        };
        let drift_threshold = match get("LIKENESS_DRIFT_THRESHOLD") {
            Some(raw) => parse_threshold(&raw)?,
            None => defaults.drift_threshold,
        };
        let comfyui_timeout = match get("COMFYUI_TIMEOUT") {
            Some(raw) => parse_seconds("COMFYUI_TIMEOUT", &raw)?,
            None => provider_defaults.comfyui_timeout,
        };

        Ok(Self {
            mode,
            default_provider: get("LIKENESS_PROVIDER")
                .map(|value| normalize_provider_name(&value))
                .unwrap_or(defaults.default_provider),
            fallbacks: get("LIKENESS_FALLBACKS")
                .map(|value| parse_provider_list(&value))
                .unwrap_or_default(),
            drift_threshold,
            drift_method,
            reference_image: get("LIKENESS_REFERENCE_IMAGE"),
            output_dir: get("LIKENESS_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            providers: ProviderSettings {
                local_library: get("LIKENESS_LOCAL_LIBRARY").map(PathBuf::from),
                comfyui_url: get("COMFYUI_URL")
                    .map(|value| value.trim_end_matches('/').to_string())
                    .unwrap_or(provider_defaults.comfyui_url),
                comfyui_timeout,
                openai_api_base: get("OPENAI_API_BASE")
                    .map(|value| value.trim_end_matches('/').to_string())
                    .unwrap_or(provider_defaults.openai_api_base),
                openai_api_key: get("OPENAI_API_KEY"),
                openai_model: get("OPENAI_IMAGE_MODEL").unwrap_or(provider_defaults.openai_model),
                stability_api_base: get("STABILITY_API_BASE")
                    .map(|value| value.trim_end_matches('/').to_string())
                    .unwrap_or(provider_defaults.stability_api_base),
                stability_api_key: get("STABILITY_API_KEY"),
            },
        })
    }
}

/// Accepts only thresholds strictly inside `(0, 1)`.
pub fn parse_threshold(raw: &str) -> Result<f64, SettingsError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| SettingsError::InvalidThreshold(raw.trim().to_string()))?;
    if !(value > 0.0 && value < 1.0) {
        return Err(SettingsError::InvalidThreshold(raw.trim().to_string()));
    }
    Ok(value)
}

fn parse_seconds(key: &str, raw: &str) -> Result<Duration, SettingsError> {
    raw.parse::<f64>()
        .ok()
        .filter(|value| *value > 0.0)
        .and_then(|value| Duration::try_from_secs_f64(value).ok())
        .ok_or_else(|| SettingsError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
        })
}
