use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ai::gemini::{CLASSIFY_PROMPT, DEFAULT_ENDPOINT, DEFAULT_MODEL};

/// Environment variables checked for the API key, in order.
pub const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("No config directory on this platform")]
    NoConfigDir,
    #[error("Settings I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed settings file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Could not serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("No API key configured (set GEMINI_API_KEY or apiKey in settings)")]
    MissingApiKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub request_timeout_secs: u64,
    pub jpeg_quality: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_image_bytes: Option<u64>,
    pub prompt: String,
    pub camera: CameraSettings,
}

/// Camera input read through the system `ffmpeg` binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraSettings {
    pub ffmpeg_path: String,
    /// ffmpeg input format (`v4l2`, `avfoundation`, `dshow`). Empty disables the camera.
    pub input_format: String,
    /// Extra input options placed before `-i`.
    pub input_args: Vec<String>,
    /// Default video device.
    pub device: String,
    /// Device used when the rear camera is requested. Unset means there is none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rear_device: Option<String>,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    /// Time to wait for the first frame before the camera counts as unavailable.
    pub open_timeout_secs: u64,
    /// Delay between opening the camera and taking the snapshot.
    pub warmup_ms: u64,
}

#[cfg(target_os = "linux")]
const CAMERA_INPUT: (&str, &str, &[&str]) = ("v4l2", "/dev/video0", &[]);
#[cfg(target_os = "macos")]
const CAMERA_INPUT: (&str, &str, &[&str]) = ("avfoundation", "0", &["-framerate", "30"]);
// dshow devices are addressed by name, so there is no usable default.
#[cfg(target_os = "windows")]
const CAMERA_INPUT: (&str, &str, &[&str]) = ("dshow", "", &[]);
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const CAMERA_INPUT: (&str, &str, &[&str]) = ("", "", &[]);

impl Default for CameraSettings {
    fn default() -> Self {
        let (input_format, device, input_args) = CAMERA_INPUT;
        Self {
            ffmpeg_path: "ffmpeg".into(),
            input_format: input_format.into(),
            input_args: input_args.iter().map(|a| a.to_string()).collect(),
            device: device.into(),
            rear_device: None,
            width: 640,
            height: 480,
            framerate: 10,
            open_timeout_secs: 5,
            warmup_ms: 500,
        }
    }
}

impl CameraSettings {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs.max(1))
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            api_key: String::new(),
            model: DEFAULT_MODEL.into(),
            request_timeout_secs: 30,
            jpeg_quality: 90,
            max_image_bytes: None,
            prompt: CLASSIFY_PROMPT.into(),
            camera: CameraSettings::default(),
        }
    }
}

/// `<config_dir>/ecoscan/settings.toml`
pub fn config_path() -> Result<PathBuf, SettingsError> {
    let dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
    Ok(dir.join("ecoscan").join("settings.toml"))
}

/// Load `.env.local`, falling back to `.env`, from the working directory.
pub fn load_dotenv() {
    for env_file in [".env.local", ".env"] {
        let path = Path::new(env_file);
        if path.exists() {
            match dotenvy::from_path(path) {
                Ok(_) => log::info!("Loaded {}", path.display()),
                Err(e) => log::warn!("Failed to load {}: {}", path.display(), e),
            }
            break;
        }
    }
}

impl Settings {
    /// Load settings from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            log::info!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let io_err = |source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(io_err)?;
        log::info!("Settings saved to {}", path.display());
        Ok(())
    }

    /// Apply the process environment on top of the file values.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup. The first non-empty
    /// `API_KEY_VARS` entry replaces `api_key`.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = API_KEY_VARS
            .iter()
            .filter_map(|var| lookup(var))
            .find(|v| !v.trim().is_empty())
        {
            self.api_key = key;
        }
        self
    }

    /// The API key, or `MissingApiKey` if none is configured.
    pub fn api_key(&self) -> Result<&str, SettingsError> {
        let key = self.api_key.trim();
        if key.is_empty() {
            return Err(SettingsError::MissingApiKey);
        }
        Ok(key)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.model, "gemini-2.5-flash");
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let settings = Settings {
            api_key: "k".into(),
            request_timeout_secs: 5,
            max_image_bytes: Some(4_000_000),
            ..Settings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "model = \"gemini-2.0-flash\"\nrequestTimeoutSecs = 10\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.model, "gemini-2.0-flash");
        assert_eq!(settings.request_timeout(), Duration::from_secs(10));
        assert_eq!(settings.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(settings.max_image_bytes, None);
    }

    #[test]
    fn camera_table_overrides_only_what_it_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(
            &path,
            "jpegQuality = 70\n\n[camera]\nrearDevice = \"/dev/video2\"\nwidth = 320\n",
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.jpeg_quality, 70);
        assert_eq!(settings.camera.rear_device.as_deref(), Some("/dev/video2"));
        assert_eq!(settings.camera.width, 320);
        assert_eq!(settings.camera.height, 480);
        assert_eq!(settings.camera.ffmpeg_path, "ffmpeg");
        assert_eq!(settings.camera.open_timeout(), Duration::from_secs(5));

        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "model = [not toml").unwrap();
        assert!(matches!(Settings::load(&path), Err(SettingsError::Parse(_))));
    }

    #[test]
    fn env_key_overrides_file_key() {
        let settings = Settings {
            api_key: "from-file".into(),
            ..Settings::default()
        }
        .with_overrides_from(|var| match var {
            "API_KEY" => Some("from-env".into()),
            _ => None,
        });
        assert_eq!(settings.api_key().unwrap(), "from-env");
    }

    #[test]
    fn gemini_var_wins_and_blank_values_are_ignored() {
        let settings = Settings::default().with_overrides_from(|var| match var {
            "GEMINI_API_KEY" => Some("  ".into()),
            "API_KEY" => Some("second".into()),
            _ => None,
        });
        assert_eq!(settings.api_key().unwrap(), "second");

        let settings = Settings::default().with_overrides_from(|var| match var {
            "GEMINI_API_KEY" => Some("first".into()),
            "API_KEY" => Some("second".into()),
            _ => None,
        });
        assert_eq!(settings.api_key().unwrap(), "first");
    }

    #[test]
    fn empty_key_is_reported() {
        assert!(matches!(
            Settings::default().api_key(),
            Err(SettingsError::MissingApiKey)
        ));
    }

    #[test]
    fn zero_timeout_is_clamped() {
        let settings = Settings {
            request_timeout_secs: 0,
            ..Settings::default()
        };
        assert_eq!(settings.request_timeout(), Duration::from_secs(1));
    }
}
