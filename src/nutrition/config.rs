use std::str::FromStr;

use anyhow::anyhow;
use tracing::warn;

use crate::util::env::{env_flag, env_opt, env_parse};

pub const DEFAULT_WGER_INSTANCE: &str = "https://wger.de";

/// Where point fetches pull ingredient images from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadMode {
    /// Point fetches are turned off.
    #[default]
    Disabled,
    /// Pull from the ingredient's Open Food Facts product record.
    OpenFoodFacts,
    /// Pull from another wger deployment (`WGER_INSTANCE`).
    WgerPeer,
}

impl FromStr for DownloadMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "NONE" | "DISABLED" => Ok(Self::Disabled),
            "OFF" => Ok(Self::OpenFoodFacts),
            "WGER" => Ok(Self::WgerPeer),
            other => Err(anyhow!("unknown DOWNLOAD_INGREDIENT_IMAGES value {other:?}")),
        }
    }
}

/// Settings consumed by the image sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub download_mode: DownloadMode,
    /// Set in test deployments; turns point fetches into no-ops.
    pub testing: bool,
    /// Base URL of the peer deployment, without trailing slash.
    pub instance_url: String,
    pub http_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            download_mode: DownloadMode::Disabled,
            testing: false,
            instance_url: DEFAULT_WGER_INSTANCE.to_string(),
            http_timeout_secs: 30,
        }
    }
}

impl SyncConfig {
    /// Reads `DOWNLOAD_INGREDIENT_IMAGES`, `WGER_INSTANCE`, `TESTING` and
    /// `HTTP_TIMEOUT_SECS`. An unknown download mode is an error.
    pub fn from_env() -> anyhow::Result<Self> {
        let download_mode = resolve_download_mode(env_opt("DOWNLOAD_INGREDIENT_IMAGES").as_deref(), false)?;
        Ok(Self::from_env_with_mode(download_mode))
    }

    /// Like [`SyncConfig::from_env`], but an unknown download mode is logged
    /// and treated as disabled. For commands that never consult the mode.
    pub fn from_env_lenient() -> Self {
        let raw = env_opt("DOWNLOAD_INGREDIENT_IMAGES");
        let download_mode = resolve_download_mode(raw.as_deref(), true).unwrap_or_default();
        Self::from_env_with_mode(download_mode)
    }

    fn from_env_with_mode(download_mode: DownloadMode) -> Self {
        let instance_url = env_opt("WGER_INSTANCE")
            .unwrap_or_else(|| DEFAULT_WGER_INSTANCE.to_string());
        Self {
            download_mode,
            testing: env_flag("TESTING", false),
            instance_url: normalize_base_url(&instance_url),
            http_timeout_secs: env_parse("HTTP_TIMEOUT_SECS", 30u64),
        }
    }

    pub fn with_download_mode(mut self, mode: DownloadMode) -> Self {
        self.download_mode = mode;
        self
    }

    pub fn with_instance_url(mut self, url: &str) -> Self {
        self.instance_url = normalize_base_url(url);
        self
    }
}

pub fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Parses a raw `DOWNLOAD_INGREDIENT_IMAGES` value; unset means disabled.
/// With `lenient`, an unknown value is logged and read as disabled.
pub fn resolve_download_mode(raw: Option<&str>, lenient: bool) -> anyhow::Result<DownloadMode> {
    let Some(raw) = raw else {
        return Ok(DownloadMode::Disabled);
    };
    match raw.parse() {
        Ok(mode) => Ok(mode),
        Err(e) if lenient => {
            warn!(value = raw, error = %e, "ignoring DOWNLOAD_INGREDIENT_IMAGES; point fetches disabled");
            Ok(DownloadMode::Disabled)
        }
        Err(e) => Err(e),
    }
}
