use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::fit::FitOptions;

/// Config file looked up in the working directory.
pub const CONFIG_FILE: &str = "xps-view.json";
/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "XPS_VIEW_CONFIG";

// ---------------------------------------------------------------------------
// Viewer configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub window_size: [f32; 2],
    /// Archive opened at start-up when no path is given on the command line.
    pub default_archive: Option<PathBuf>,
    /// Resolution of the parameter value sliders.
    pub slider_steps: usize,
    /// Opacity of shaded component groups.
    pub group_alpha: f32,
    pub fit: FitOptions,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        ViewerConfig {
            window_size: [1200.0, 800.0],
            default_archive: None,
            slider_steps: 1000,
            group_alpha: 0.3,
            fit: FitOptions::default(),
        }
    }
}

impl ViewerConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Load from `$XPS_VIEW_CONFIG` or `./xps-view.json`; defaults when
    /// neither exists or the file is malformed.
    pub fn load() -> Self {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
        if !path.exists() {
            log::debug!("no config at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::from_path(&path) {
            Ok(cfg) => {
                log::info!("loaded config from {}", path.display());
                cfg
            }
            Err(e) => {
                log::warn!("{e:#}; using defaults");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let cfg: ViewerConfig =
            serde_json::from_str(r#"{ "slider_steps": 50, "fit": { "max_nfev": 10 } }"#).unwrap();
        assert_eq!(cfg.slider_steps, 50);
        assert_eq!(cfg.fit.max_nfev, 10);
        assert_eq!(cfg.fit.ftol, FitOptions::default().ftol);
        assert_eq!(cfg.window_size, [1200.0, 800.0]);
        assert!(cfg.default_archive.is_none());
    }

    #[test]
    fn test_malformed_config_is_error() {
        let path = std::env::temp_dir().join(format!("xps_view_cfg_{}.json", std::process::id()));
        std::fs::write(&path, "{ not json").unwrap();
        assert!(ViewerConfig::from_path(&path).is_err());
        std::fs::remove_file(&path).ok();
    }
}
