//! voxqueue configuration loader.

use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use vq_queue::CollectionWindowConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct VoxQueueConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub queue: CollectionWindowConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    /// Transcription backend that receives one JSON request per job.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Upper bound for one backend call. Long recordings take minutes.
    #[serde(default = "default_processor_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_processor_timeout_secs() -> u64 {
    900
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            timeout_secs: default_processor_timeout_secs(),
        }
    }
}

impl VoxQueueConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let (cfg, _) = Self::load_with_path(path).await?;
        Ok(cfg)
    }

    pub async fn load_with_path(path: Option<PathBuf>) -> anyhow::Result<(Self, PathBuf)> {
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;

        let mut cfg = Self::parse(&contents)
            .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok((cfg, path))
    }

    fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !v.trim().is_empty() {
                self.telegram.bot_token = v;
            }
        }
        if let Ok(v) = std::env::var("VOXQUEUE_PROCESSOR_ENDPOINT") {
            if !v.trim().is_empty() {
                self.processor.endpoint = v;
            }
        }
        if let Ok(v) = std::env::var("VOXQUEUE_PROCESSOR_API_KEY") {
            if !v.trim().is_empty() {
                self.processor.api_key = Some(v);
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "telegram.bot_token is required (or set TELEGRAM_BOT_TOKEN)"
            ));
        }
        if self.processor.endpoint.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "processor.endpoint is required (or set VOXQUEUE_PROCESSOR_ENDPOINT)"
            ));
        }
        Url::parse(self.processor.endpoint.trim())
            .map_err(|e| anyhow::anyhow!("processor.endpoint is not a valid URL: {e}"))?;
        if self.processor.timeout_secs == 0 {
            return Err(anyhow::anyhow!("processor.timeout_secs must be > 0"));
        }
        self.queue.validate()?;
        Ok(())
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".voxqueue").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::VoxQueueConfig;

    const MINIMAL: &str = r#"
[telegram]
bot_token = "123:abc"

[processor]
endpoint = "http://127.0.0.1:9000/transcribe"
"#;

    #[test]
    fn minimal_config_uses_queue_defaults() {
        let cfg = VoxQueueConfig::parse(MINIMAL).expect("parse minimal config");
        cfg.validate().expect("minimal config is valid");
        assert_eq!(cfg.queue.initial_delay_ms, 100);
        assert_eq!(cfg.queue.max_total_delay_ms, 200);
        assert_eq!(cfg.queue.quiet_period_ms, 50);
        assert_eq!(cfg.processor.timeout_secs, 900);
    }

    #[test]
    fn queue_section_overrides_window_timing() {
        let contents = format!("{MINIMAL}\n[queue]\ninitial_delay_ms = 40\nmax_total_delay_ms = 120\n");
        let cfg = VoxQueueConfig::parse(&contents).expect("parse config");
        assert_eq!(cfg.queue.initial_delay_ms, 40);
        assert_eq!(cfg.queue.max_total_delay_ms, 120);
        assert_eq!(cfg.queue.quiet_period_ms, 50);
    }

    #[test]
    fn invalid_queue_timing_is_rejected() {
        let contents = format!("{MINIMAL}\n[queue]\ninitial_delay_ms = 300\n");
        let cfg = VoxQueueConfig::parse(&contents).expect("parse config");
        let err = cfg.validate().expect_err("max below initial delay");
        assert!(err.to_string().contains("max_total_delay_ms"), "{err}");
    }

    #[test]
    fn bad_processor_endpoint_is_rejected() {
        let cfg = VoxQueueConfig::parse(
            "[telegram]\nbot_token = \"t\"\n[processor]\nendpoint = \"not a url\"\n",
        )
        .expect("parse config");
        let err = cfg.validate().expect_err("endpoint must be a URL");
        assert!(err.to_string().contains("processor.endpoint"), "{err}");
    }

    #[tokio::test]
    async fn loads_config_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, MINIMAL).await.expect("write config");

        let (cfg, loaded_from) = VoxQueueConfig::load_with_path(Some(path.clone()))
            .await
            .expect("load config");
        assert_eq!(loaded_from, path);
        assert!(!cfg.telegram.bot_token.is_empty());
    }

    #[tokio::test]
    async fn missing_file_names_the_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.toml");
        let err = VoxQueueConfig::load(Some(path))
            .await
            .expect_err("missing config must fail");
        assert!(err.to_string().contains("absent.toml"), "{err}");
    }
}
