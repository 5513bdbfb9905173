//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` con nomi dei tool, encoder e costanti di pipeline
//! - Fornisce validazione dei parametri
//! - Supporta caricamento/salvataggio configurazione da/verso file JSON
//! - Fornisce valori di default sensati per tutti i parametri
//!
//! ## Parametri principali:
//! - `tools`: nomi (o path) di ffmpeg, ffprobe, upscaler e interpolatore
//! - `encoder`: codec (H.264/H.265) e device (CPU/CUDA) per le ricodifiche
//! - `optimize_tolerance`: non ottimizzare se `target * tolleranza > bitrate` (default: 1.15)
//! - `video_extensions` / `audio_extensions` / `subtitle_extensions`: allow-list della scansione
//! - `scan_depth`: profondità di scansione (0 = solo top-level, -1 = illimitata)
//! - `poll_interval_ms`: intervallo di polling del frame watcher
//! - `preview_margin`: frazione della durata esclusa agli estremi nelle preview
//! - `exit_code_file_name`: file side-channel per l'exit code (default: `exitCode.txt`)
//!
//! ## Esempio:
//! ```rust
//! use video_scripy::Config;
//!
//! let config = Config {
//!     scan_depth: -1,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Video codec used when re-encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    H265,
}

/// Where the re-encode runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
}

/// Encoder selection (codec x device)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderSettings {
    pub codec: VideoCodec,
    pub device: Device,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H265,
            device: Device::Cuda,
        }
    }
}

impl EncoderSettings {
    pub fn uses_gpu(&self) -> bool {
        self.device == Device::Cuda
    }
}

/// External tool names, resolved through `ToolPathResolver` at run time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg: String,
    pub ffprobe: String,
    /// Real-ESRGAN ncnn build
    pub upscaler: String,
    /// IFRNet ncnn build
    pub interpolator: String,
    /// Directory holding bundled tool builds (None = system PATH only)
    pub tools_dir: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            upscaler: "realesrgan-ncnn-vulkan".to_string(),
            interpolator: "ifrnet-ncnn-vulkan".to_string(),
            tools_dir: None,
        }
    }
}

/// Configuration for the batch pipelines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub encoder: EncoderSettings,
    /// GPU index passed to the AI tools (`-g`)
    pub ai_gpu_id: u32,
    /// Skip optimize/resize when target bit rate * tolerance exceeds the source
    pub optimize_tolerance: f64,
    pub video_extensions: Vec<String>,
    pub audio_extensions: Vec<String>,
    pub subtitle_extensions: Vec<String>,
    /// Also scan audio/subtitle sidecar files
    pub include_sidecars: bool,
    /// 0 = top-level only, -1 = unlimited
    pub scan_depth: i32,
    /// Character rejected in scanned paths
    pub reserved_char: char,
    pub poll_interval_ms: u64,
    /// Fraction of the clip trimmed from both ends before spacing preview stills
    pub preview_margin: f64,
    pub exit_code_file_name: String,
    /// Output progress and status as JSON lines for programmatic use
    pub json_output: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tools: ToolsConfig::default(),
            encoder: EncoderSettings::default(),
            ai_gpu_id: 1,
            optimize_tolerance: 1.15,
            video_extensions: vec!["mp4".to_string(), "mkv".to_string()],
            audio_extensions: vec![
                "mp3".to_string(),
                "aac".to_string(),
                "m4a".to_string(),
                "flac".to_string(),
                "opus".to_string(),
                "wav".to_string(),
            ],
            subtitle_extensions: vec![
                "srt".to_string(),
                "ass".to_string(),
                "ssa".to_string(),
                "vtt".to_string(),
            ],
            include_sidecars: false,
            scan_depth: 0,
            reserved_char: '&',
            poll_interval_ms: 100,
            preview_margin: 0.233,
            exit_code_file_name: "exitCode.txt".to_string(),
            json_output: false,
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.optimize_tolerance <= 1.0 {
            return Err(anyhow::anyhow!("Optimize tolerance must be greater than 1.0"));
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("Poll interval must be greater than 0"));
        }

        if !(0.0..0.5).contains(&self.preview_margin) {
            return Err(anyhow::anyhow!("Preview margin must be between 0.0 and 0.5"));
        }

        if self.video_extensions.is_empty() {
            return Err(anyhow::anyhow!("At least one video extension is required"));
        }

        if self.scan_depth < -1 {
            return Err(anyhow::anyhow!("Scan depth must be -1 (unlimited) or >= 0"));
        }

        if self.exit_code_file_name.trim().is_empty() {
            return Err(anyhow::anyhow!("Exit code file name must not be empty"));
        }

        Ok(())
    }

    /// Default location: `~/.video-scripy/config.json`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".video-scripy")
            .join("config.json")
    }

    /// Load configuration from file
    pub async fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.optimize_tolerance = 1.0;
        assert!(config.validate().is_err());

        config.optimize_tolerance = 1.15;
        config.preview_margin = 0.5;
        assert!(config.validate().is_err());

        config.preview_margin = 0.233;
        config.scan_depth = -2;
        assert!(config.validate().is_err());

        config.scan_depth = -1;
        config.video_extensions.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.optimize_tolerance, 1.15);
        assert_eq!(config.video_extensions, vec!["mp4", "mkv"]);
        assert_eq!(config.exit_code_file_name, "exitCode.txt");
        assert_eq!(config.scan_depth, 0);
        assert!(config.encoder.uses_gpu());
        assert!(!config.include_sidecars);
    }

    #[tokio::test]
    async fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.json");

        let original_config = Config {
            encoder: EncoderSettings {
                codec: VideoCodec::H264,
                device: Device::Cpu,
            },
            scan_depth: 2,
            ai_gpu_id: 0,
            ..Default::default()
        };

        original_config.save_to_file(&config_path).await.unwrap();
        let loaded_config = Config::from_file(&config_path).await.unwrap();

        assert_eq!(loaded_config, original_config);
        assert!(!loaded_config.encoder.uses_gpu());
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let loaded = Config::from_file(&temp_dir.path().join("absent.json")).await.unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[tokio::test]
    async fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        tokio::fs::write(&path, r#"{"scan_depth": -1}"#).await.unwrap();

        let loaded = Config::from_file(&path).await.unwrap();
        assert_eq!(loaded.scan_depth, -1);
        assert_eq!(loaded.tools.ffmpeg, "ffmpeg");
    }

    #[test]
    fn test_invalid_file_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, r#"{"optimize_tolerance": 0.9}"#).unwrap();

        assert!(tokio_test::block_on(Config::from_file(&path)).is_err());
    }
}
