//! ==============================================================================
//! config.rs - configuration document and runtime settings
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     two layers of configuration:
//!     - the JSON configuration document (e.g. `sensor-app.json`). it names the
//!       management service, the cloud upload target and the datapoints. the
//!       agent owns it and rewrites it after every structural change so that
//!       ids assigned by the service survive a restart.
//!     - the optional `agent.toml` runtime settings (poll interval, logging,
//!       sensor driver). falls back to defaults when absent.
//!
//! structure:
//!     - AgentConfig:   the JSON document (unknown keys are kept verbatim)
//!     - ConfigStore:   load / save of the document at a fixed path
//!     - AgentSettings: the TOML settings, with per-section defaults
//! ```
//!
//! ==============================================================================

use crate::domain::{int_from_value, lenient_int, lenient_int_opt, Datapoint};
use crate::error::{AgentError, Result};
use crate::upload::UploadTarget;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub const DEFAULT_CLOUD_HOST: &str = "cloud.easyiot.com.cn";
pub const DEFAULT_CLOUD_PORT: u16 = 80;
pub const DEFAULT_CLOUD_API: &str = "/api/file/personal";
pub const DEFAULT_UPLOAD_RETRY: u32 = 5;

// ==============================================================================
// json configuration document
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// management service address
    pub host: String,
    #[serde(deserialize_with = "lenient_int")]
    pub port: u16,

    #[serde(rename = "appName", default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,

    // cloud upload target, all optional
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloudserveraddr: Option<String>,
    #[serde(default, deserialize_with = "lenient_int_opt", skip_serializing_if = "Option::is_none")]
    pub cloudserverport: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apikey: Option<String>,
    #[serde(default, deserialize_with = "lenient_int_opt", skip_serializing_if = "Option::is_none")]
    pub retry: Option<u32>,

    pub datapoints: Vec<Datapoint>,

    /// application-global attributes read by samplers
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AgentConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let doc: Value = serde_json::from_str(text)?;
        match doc.get("datapoints") {
            Some(Value::Array(_)) => {}
            Some(_) => return Err(AgentError::InvalidConfig("\"datapoints\" must be an array".into())),
            None => return Err(AgentError::InvalidConfig("missing \"datapoints\"".into())),
        }
        serde_json::from_value(doc).map_err(|e| AgentError::InvalidConfig(e.to_string()))
    }

    /// `host:port` of the management service
    pub fn service_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// where file samples are uploaded to, with defaults applied
    pub fn upload_target(&self) -> UploadTarget {
        UploadTarget {
            host: self.cloudserveraddr.clone().unwrap_or_else(|| DEFAULT_CLOUD_HOST.to_string()),
            port: self.cloudserverport.unwrap_or(DEFAULT_CLOUD_PORT),
            api: self.api.clone().unwrap_or_else(|| DEFAULT_CLOUD_API.to_string()),
            api_key: self.apikey.clone().unwrap_or_default(),
            retries: self.retry.unwrap_or(DEFAULT_UPLOAD_RETRY),
        }
    }

    /// global string attribute
    pub fn string_by_name(&self, name: &str) -> Option<&str> {
        self.extra.get(name).and_then(Value::as_str)
    }

    /// global integer attribute; numeric strings coerce
    pub fn int_by_name(&self, name: &str) -> Option<i64> {
        self.extra.get(name).and_then(int_from_value)
    }
}

/// the configuration document on disk
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<AgentConfig> {
        let content = std::fs::read_to_string(&self.path)?;
        AgentConfig::from_json(&content)
    }

    /// rewrite the document
    ///
    /// goes through a sibling temp file so a crash mid-write never leaves a
    /// truncated document behind.
    pub fn save(&self, config: &AgentConfig) -> Result<()> {
        let text = serde_json::to_string_pretty(config)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::debug!("configuration written to {}", self.path.display());
        Ok(())
    }
}

// ==============================================================================
// toml runtime settings
// ==============================================================================

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AgentSettings {
    #[serde(default)]
    pub polling: PollingSettings,
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub sensor: SensorSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingSettings {
    /// bounded wait on socket readability, one scheduler tick
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionSettings {
    /// pause before the single reconnect attempt at startup
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub show_sensor_data: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SensorSettings {
    #[serde(default)]
    pub driver: SensorDriver,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SensorDriver {
    /// simulated temperature / humidity / image datapoints
    #[default]
    Virtual,
    /// grove kit sensors on the board's analog pins plus a webcam
    Grove,
    /// smartfarm kit: rs485 climate sensor, particulate sensor, light, webcam
    Smartfarm,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_reconnect_delay() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self { interval_ms: default_poll_interval() }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self { reconnect_delay_ms: default_reconnect_delay() }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: default_log_level(), show_sensor_data: true }
    }
}

impl AgentSettings {
    /// Load settings from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&content)?)
    }

    /// Load with default fallback
    ///
    /// an explicit path that fails to load is reported and then ignored,
    /// same as the search paths.
    pub fn load_or_default(explicit: Option<&Path>) -> Self {
        let paths: Vec<PathBuf> = match explicit {
            Some(p) => vec![p.to_path_buf()],
            None => vec![
                PathBuf::from("config").join("agent.toml"),
                PathBuf::from("..").join("config").join("agent.toml"),
            ],
        };

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(settings) => {
                        println!("[CONFIG] Loaded settings from {}", path.display());
                        return settings;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] No settings file found - using defaults");
        Self::default()
    }

    /// Print configuration summary
    pub fn print_summary(&self, config: &AgentConfig) {
        let registered = config.datapoints.iter().filter(|d| d.id.is_some()).count();
        println!("┌─────────────────────────────────────────┐");
        println!("│          AGENT CONFIGURATION            │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Service: {}", config.service_addr());
        println!("│ App: {}", config.app_name.as_deref().unwrap_or("-"));
        println!("│ Datapoints: {} ({} registered)", config.datapoints.len(), registered);
        println!("│ Poll Interval: {}ms", self.polling.interval_ms);
        println!("│ Sensor Driver: {:?}", self.sensor.driver);
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DatapointId;
    use serde_json::json;

    const SAMPLE: &str = r#"{
        "host": "127.0.0.1",
        "port": 9000,
        "appName": "virtsensor",
        "webcamResolution": "640x480",
        "adcBits": "12",
        "datapoints": [
            {"props": {"name": "temperature", "dataType": "numeric", "sampleRate": 5}},
            {"id": "3", "props": {"name": "humidity", "dataType": "numeric", "sampleRate": 10}}
        ]
    }"#;

    #[test]
    fn test_parse_document() {
        let config = AgentConfig::from_json(SAMPLE).unwrap();
        assert_eq!(config.service_addr(), "127.0.0.1:9000");
        assert_eq!(config.app_name.as_deref(), Some("virtsensor"));
        assert_eq!(config.datapoints.len(), 2);
        assert_eq!(config.datapoints[0].id, None);
        assert_eq!(config.datapoints[1].id, Some(DatapointId(3)));
        assert_eq!(config.string_by_name("webcamResolution"), Some("640x480"));
        assert_eq!(config.int_by_name("adcBits"), Some(12));
    }

    #[test]
    fn test_datapoints_must_be_array() {
        let err = AgentConfig::from_json(r#"{"host":"h","port":1,"datapoints":{}}"#).unwrap_err();
        assert!(matches!(err, AgentError::InvalidConfig(_)));
        let err = AgentConfig::from_json(r#"{"host":"h","port":1}"#).unwrap_err();
        assert!(matches!(err, AgentError::InvalidConfig(_)));
        let err = AgentConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, AgentError::Json(_)));
    }

    #[test]
    fn test_upload_defaults() {
        let config = AgentConfig::from_json(SAMPLE).unwrap();
        let target = config.upload_target();
        assert_eq!(target.host, DEFAULT_CLOUD_HOST);
        assert_eq!(target.port, 80);
        assert_eq!(target.api, DEFAULT_CLOUD_API);
        assert_eq!(target.api_key, "");
        assert_eq!(target.retries, 5);
    }

    #[test]
    fn test_upload_overrides() {
        let mut config = AgentConfig::from_json(SAMPLE).unwrap();
        config.cloudserveraddr = Some("files.local".into());
        config.cloudserverport = Some(8080);
        config.api = Some("/v2/files".into());
        config.apikey = Some("secret".into());
        config.retry = Some(2);
        let target = config.upload_target();
        assert_eq!(target.host, "files.local");
        assert_eq!(target.port, 8080);
        assert_eq!(target.api, "/v2/files");
        assert_eq!(target.api_key, "secret");
        assert_eq!(target.retries, 2);
    }

    #[test]
    fn test_store_round_trip_keeps_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensor-app.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let store = ConfigStore::new(&path);
        let mut config = store.load().unwrap();
        config.datapoints[0].id = Some(DatapointId(101));
        store.save(&config).unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["webcamResolution"], json!("640x480"));
        assert_eq!(raw["datapoints"][0]["id"], json!(101));
        assert_eq!(raw["datapoints"][1]["id"], json!(3));
        assert!(raw.get("cloudserveraddr").is_none());
        assert_eq!(store.load().unwrap(), config);
    }

    #[test]
    fn test_numeric_strings_accepted_for_ports_and_retry() {
        let config = AgentConfig::from_json(
            r#"{"host":"h","port":"9000","cloudserverport":" 8080","retry":"3","datapoints":[]}"#,
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.cloudserverport, Some(8080));
        assert_eq!(config.retry, Some(3));

        let err = AgentConfig::from_json(r#"{"host":"h","port":"x","datapoints":[]}"#).unwrap_err();
        assert!(matches!(err, AgentError::InvalidConfig(_)));
    }

    #[test]
    fn test_datapoint_extra_keys_survive_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensor-app.json");
        std::fs::write(
            &path,
            r#"{"host":"h","port":1,"datapoints":[{"props":{"name":"t1"},"unit":"C"}]}"#,
        )
        .unwrap();

        let store = ConfigStore::new(&path);
        let mut config = store.load().unwrap();
        config.datapoints[0].id = Some(DatapointId(5));
        store.save(&config).unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["datapoints"][0], json!({"id": 5, "props": {"name": "t1"}, "unit": "C"}));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("nope.json"));
        assert!(matches!(store.load(), Err(AgentError::Io(_))));
    }

    #[test]
    fn test_settings_defaults_and_partial_file() {
        let s = AgentSettings::default();
        assert_eq!(s.polling.interval_ms, 10);
        assert_eq!(s.connection.reconnect_delay_ms, 1000);
        assert_eq!(s.logging.level, "info");
        assert!(s.logging.show_sensor_data);
        assert_eq!(s.sensor.driver, SensorDriver::Virtual);

        let s: AgentSettings = toml::from_str("[sensor]\ndriver = \"grove\"\n[polling]\ninterval_ms = 50\n").unwrap();
        assert_eq!(s.sensor.driver, SensorDriver::Grove);
        assert_eq!(s.polling.interval_ms, 50);
        assert_eq!(s.logging.level, "info");

        let s: AgentSettings = toml::from_str("[sensor]\ndriver = \"smartfarm\"\n").unwrap();
        assert_eq!(s.sensor.driver, SensorDriver::Smartfarm);
    }

    #[test]
    fn test_settings_load_or_default_with_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\nshow_sensor_data = false\n").unwrap();
        let s = AgentSettings::load_or_default(Some(path.as_path()));
        assert_eq!(s.logging.level, "debug");
        assert!(!s.logging.show_sensor_data);

        let s = AgentSettings::load_or_default(Some(dir.path().join("missing.toml").as_path()));
        assert_eq!(s.logging.level, "info");
    }
}
