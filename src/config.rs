use anyhow::Result;
use serde::Deserialize;

use crate::session::SyncConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate of the reconstructed WAV (and of headerless device PCM)
    pub target_sample_rate: u32,
    /// Files above this size are not sliced
    pub slice_max_bytes: usize,
    /// Where downloaded recordings are written
    pub output_dir: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000,
            slice_max_bytes: 50 * 1024 * 1024,
            output_dir: "recordings".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("RECORDER_SYNC").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();

        assert_eq!(cfg.audio.target_sample_rate, 16000);
        assert_eq!(cfg.audio.slice_max_bytes, 50 * 1024 * 1024);
        assert_eq!(cfg.sync.watchdog_ms, 8000);
        assert_eq!(cfg.sync.catalog_idle_ms, 1500);
    }

    #[test]
    fn test_load_partial_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sync.toml");
        std::fs::write(&path, "[sync]\nwatchdog_ms = 3000\n")?;

        let cfg = Config::load(path.to_str().unwrap_or_default())?;

        assert_eq!(cfg.sync.watchdog_ms, 3000);
        assert_eq!(cfg.sync.progress_interval_ms, 200);
        assert_eq!(cfg.audio.output_dir, "recordings");
        Ok(())
    }
}
