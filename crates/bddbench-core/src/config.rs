//! Configuration management for bddbench
//!
//! Sources, lowest precedence first:
//! - Hardcoded defaults
//! - ./config/bddbench.{yaml,toml}
//! - The file named by `BDDBENCH_CONFIG`
//! - Environment variables (`BDDBENCH_SUT__URL`, `BDDBENCH_REPORT__DIR`, ...)

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ids::RunId;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BenchConfig {
    /// Database under test.
    pub sut: EndpointConfig,

    /// Optional results database that receives KPI records.
    #[serde(default)]
    pub main: Option<EndpointConfig>,

    #[serde(default)]
    pub report: ReportConfig,

    /// Fixed run id instead of a freshly generated one.
    #[serde(default)]
    pub run_id: Option<String>,
}

impl BenchConfig {
    /// Load configuration from defaults, config files and environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Self::set_defaults(Config::builder())?;

        builder = builder.add_source(File::with_name("./config/bddbench").required(false));
        if let Ok(config_path) = std::env::var("BDDBENCH_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        // Example: BDDBENCH_SUT__TIMEOUT_SECS=60
        builder = builder.add_source(
            Environment::with_prefix("BDDBENCH")
                .separator("__")
                .try_parsing(true),
        );

        let config: BenchConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load defaults overlaid with a single file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: BenchConfig = Self::set_defaults(Config::builder())?
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn set_defaults(
        builder: ConfigBuilder<DefaultState>,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        builder
            .set_default("sut.url", "http://localhost:8086")?
            .set_default("sut.token", "")?
            .set_default("sut.org", "bddbench")?
            .set_default("sut.bucket", "bddbench")?
            .set_default("sut.timeout_secs", 30)?
            .set_default("report.dir", "reports")?
            .set_default("report.environment", "local")?
            .set_default("report.export_strict", false)?
            .set_default("report.state_file", "reports/bddbench_state.json")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sut.validate("sut")?;
        if let Some(main) = &self.main {
            main.validate("main")?;
        }
        if self.report.dir.as_os_str().is_empty() {
            return Err(ConfigError::Message("report.dir must not be empty".to_string()));
        }
        if let Some(run_id) = &self.run_id {
            run_id.parse::<RunId>().map_err(|e| {
                ConfigError::Message(format!("run_id `{run_id}` is not a UUID: {e}"))
            })?;
        }
        Ok(())
    }

    /// The configured run id, or a new one.
    pub fn run_id(&self) -> RunId {
        self.run_id
            .as_deref()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_else(RunId::new)
    }
}

/// Connection settings for one InfluxDB v2 endpoint
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct EndpointConfig {
    pub url: String,

    #[serde(default)]
    pub token: String,

    pub org: String,

    /// Default bucket for single-target scenarios
    pub bucket: String,

    /// HTTP client timeout per request
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl EndpointConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ConfigError::Message(format!(
                "{section}.url must be an http(s) URL, got `{}`",
                self.url
            )));
        }
        if self.org.trim().is_empty() {
            return Err(ConfigError::Message(format!("{section}.org must not be empty")));
        }
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::Message(format!(
                "{section}.bucket must not be empty"
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Message(format!(
                "{section}.timeout_secs must be > 0"
            )));
        }
        Ok(())
    }
}

/// Report output settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Directory for JSON reports, context files and the KPI log
    pub dir: PathBuf,

    /// Value of the `environment` KPI tag
    pub environment: String,

    /// Fail the run when exporting KPI records to `main` fails
    pub export_strict: bool,

    /// Ledger of created buckets and written runs
    pub state_file: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("reports"),
            environment: "local".to_string(),
            export_strict: false,
            state_file: PathBuf::from("reports/bddbench_state.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_toml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn file_overrides_defaults() {
        let file = write_toml(
            r#"
            [sut]
            url = "http://influx:8086"
            token = "secret"
            org = "perf"
            bucket = "bench"

            [report]
            environment = "ci"
            "#,
        );
        let config = BenchConfig::from_file(file.path()).unwrap();
        assert_eq!(config.sut.url, "http://influx:8086");
        assert_eq!(config.sut.timeout_secs, 30);
        assert_eq!(config.report.environment, "ci");
        assert_eq!(config.report.dir, PathBuf::from("reports"));
        assert!(!config.report.export_strict);
        assert!(config.main.is_none());
    }

    #[test]
    fn rejects_zero_timeout_and_bad_url() {
        let file = write_toml("[sut]\ntimeout_secs = 0\n");
        assert!(BenchConfig::from_file(file.path()).is_err());

        let file = write_toml("[sut]\nurl = \"influx:8086\"\n");
        let err = BenchConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("sut.url"));
    }

    #[test]
    fn main_endpoint_is_validated() {
        let file = write_toml(
            "[main]\nurl = \"http://results:8086\"\norg = \"\"\nbucket = \"kpi\"\n",
        );
        let err = BenchConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("main.org"));
    }

    #[test]
    fn run_id_override_must_be_uuid() {
        let file = write_toml("run_id = \"not-a-uuid\"\n");
        assert!(BenchConfig::from_file(file.path()).is_err());

        let id = RunId::new();
        let file = write_toml(&format!("run_id = \"{id}\"\n"));
        let config = BenchConfig::from_file(file.path()).unwrap();
        assert_eq!(config.run_id(), id);
    }
}
