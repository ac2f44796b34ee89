// Recording configuration
//
// All knobs for one recording session: target format, mix mode and gain,
// output location, and the auto-stop limits consumed by the control loop.

use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use crate::capture::SourceKind;
use crate::error::RecorderError;
use crate::session::keys::KeyBindings;

/// Which capture sources feed the mixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MixMode {
    /// System loopback only; samples pass through unmixed.
    SystemOnly,
    /// Microphone only; samples pass through unmixed.
    MicrophoneOnly,
    /// Both sources, mixed as `clamp((gain * system + mic) / 2)`.
    Dual,
}

impl MixMode {
    /// Sources this mode expects to deliver samples.
    pub fn active_sources(&self) -> &'static [SourceKind] {
        match self {
            MixMode::SystemOnly => &[SourceKind::System],
            MixMode::MicrophoneOnly => &[SourceKind::Microphone],
            MixMode::Dual => &[SourceKind::System, SourceKind::Microphone],
        }
    }

    pub fn uses(&self, kind: SourceKind) -> bool {
        self.active_sources().contains(&kind)
    }
}

/// Silence auto-stop settings.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct SilenceConfig {
    /// Average level below this is considered silent.
    pub threshold_db: f32,
    /// Contiguous silence required before stopping.
    pub min_duration: Duration,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            threshold_db: -60.0,
            min_duration: Duration::from_secs(5),
        }
    }
}

/// Configuration for one recording session.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RecorderConfig {
    pub id: String,
    pub output_directory: PathBuf,
    /// Base file name (without extension) for output segments.
    pub file_stem: String,

    // Target format every source is normalized into
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,

    // Mixing
    pub mix_mode: MixMode,
    /// Gain applied to the system (primary) source before mixing.
    pub system_gain: f32,

    // Auto-stop limits (all optional)
    pub max_duration: Option<Duration>,
    pub max_file_size_bytes: Option<u64>,
    pub split_interval: Option<Duration>,
    pub silence: Option<SilenceConfig>,

    // Keyboard control
    pub keys: KeyBindings,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            output_directory: dirs::audio_dir().unwrap_or_else(|| PathBuf::from(".")),
            file_stem: "session".to_string(),
            sample_rate: 48_000,
            channels: 2,
            bit_depth: 24,
            mix_mode: MixMode::Dual,
            system_gain: 1.0,
            max_duration: None,
            max_file_size_bytes: None,
            split_interval: None,
            silence: None,
            keys: KeyBindings::default(),
        }
    }
}

impl RecorderConfig {
    /// Validate the target format. Invalid rates or channel counts are fatal
    /// before any capture starts.
    pub fn validate(&self) -> Result<(), RecorderError> {
        if self.sample_rate < 8_000 || self.sample_rate > 384_000 {
            return Err(RecorderError::Format(format!(
                "unsupported sample rate: {} Hz",
                self.sample_rate
            )));
        }
        if self.channels == 0 || self.channels > 8 {
            return Err(RecorderError::Format(format!(
                "unsupported channel count: {}",
                self.channels
            )));
        }
        if !matches!(self.bit_depth, 16 | 24 | 32) {
            return Err(RecorderError::Format(format!(
                "unsupported bit depth: {}",
                self.bit_depth
            )));
        }
        if !self.system_gain.is_finite() || self.system_gain < 0.0 {
            return Err(RecorderError::Format(format!(
                "invalid system gain: {}",
                self.system_gain
            )));
        }
        Ok(())
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: &std::path::Path) -> Result<Self, RecorderError> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| RecorderError::Format(format!("invalid config file: {e}")))
    }

    /// Path of the `index`-th output segment (0-based). The first segment
    /// uses the plain stem; later ones get a `_partNN` suffix.
    pub fn segment_path(&self, index: usize) -> PathBuf {
        let name = if index == 0 {
            format!("{}.wav", self.file_stem)
        } else {
            format!("{}_part{:02}.wav", self.file_stem, index + 1)
        };
        self.output_directory.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RecorderConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_channels_is_a_format_error() {
        let config = RecorderConfig {
            channels: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RecorderError::Format(_))
        ));
    }

    #[test]
    fn odd_bit_depth_is_rejected() {
        let config = RecorderConfig {
            bit_depth: 20,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = RecorderConfig {
            max_duration: Some(Duration::from_secs(90)),
            ..Default::default()
        };
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

        let loaded = RecorderConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded.id, config.id);
        assert_eq!(loaded.max_duration, config.max_duration);
        assert_eq!(loaded.mix_mode, config.mix_mode);
    }

    #[test]
    fn segment_paths_number_from_part02() {
        let config = RecorderConfig {
            output_directory: PathBuf::from("/tmp"),
            file_stem: "take".into(),
            ..Default::default()
        };
        assert_eq!(config.segment_path(0), PathBuf::from("/tmp/take.wav"));
        assert_eq!(config.segment_path(1), PathBuf::from("/tmp/take_part02.wav"));
        assert_eq!(config.segment_path(2), PathBuf::from("/tmp/take_part03.wav"));
    }
}
