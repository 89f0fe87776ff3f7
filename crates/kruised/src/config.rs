//! kruised.toml configuration.
//!
//! Every key is optional. The file is read first, then the environment
//! overrides it: `PORT`, `LOG_LEVEL`, `LOG_FORMAT`, `KRUISE_BACKEND`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};
use kruise_watch::WatchSettings;
use kruise_workload::FanOut;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub log: LogConfig,
    pub watch: WatchConfig,
    pub workloads: WorkloadsConfig,
    pub cluster: ClusterConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => bail!("unknown log format: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub heartbeat_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { heartbeat_secs: 20 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadsConfig {
    pub per_kind_timeout_secs: u64,
    pub overall_timeout_secs: u64,
}

impl Default for WorkloadsConfig {
    fn default() -> Self {
        Self {
            per_kind_timeout_secs: 10,
            overall_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub backend: Backend,
    /// JSON file of objects loaded into the memory backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// The cluster from the ambient kubeconfig or service account.
    #[default]
    Kube,
    /// A process-local cluster, optionally seeded from a file.
    Memory,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kube" | "kubernetes" => Ok(Self::Kube),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown cluster backend: {other}"),
        }
    }
}

impl DaemonConfig {
    /// Defaults, then the file (if any), then the process environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: DaemonConfig =
            toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("PORT is not a valid port: {port}"))?;
        }
        if let Some(level) = lookup("LOG_LEVEL").filter(|level| !level.trim().is_empty()) {
            self.log.level = level.trim().to_string();
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.log.format = format.trim().parse()?;
        }
        if let Some(backend) = lookup("KRUISE_BACKEND") {
            self.cluster.backend = backend.trim().parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.watch.heartbeat_secs == 0 {
            bail!("watch.heartbeat_secs must be positive");
        }
        if self.workloads.per_kind_timeout_secs == 0 || self.workloads.overall_timeout_secs == 0 {
            bail!("workload timeouts must be positive");
        }
        if self.cluster.seed.is_some() && self.cluster.backend != Backend::Memory {
            bail!("cluster.seed requires the memory backend");
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn fan_out(&self) -> FanOut {
        FanOut::new(
            Duration::from_secs(self.workloads.per_kind_timeout_secs),
            Duration::from_secs(self.workloads.overall_timeout_secs),
        )
    }

    pub fn watch_settings(&self) -> WatchSettings {
        WatchSettings {
            heartbeat: Duration::from_secs(self.watch.heartbeat_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_deployment_knobs() {
        let config = DaemonConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, LogFormat::Pretty);
        assert_eq!(config.fan_out().per_task, Duration::from_secs(10));
        assert_eq!(config.fan_out().overall, Duration::from_secs(15));
        assert_eq!(config.watch_settings().heartbeat, Duration::from_secs(20));
        assert_eq!(config.cluster.backend, Backend::Kube);
    }

    #[test]
    fn parses_a_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9090

[cluster]
backend = "memory"
seed = "/etc/kruised/seed.json"

[watch]
heartbeat_secs = 5
"#
        )
        .unwrap();

        let config = DaemonConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.cluster.backend, Backend::Memory);
        assert_eq!(config.cluster.seed.as_deref(), Some(Path::new("/etc/kruised/seed.json")));
        assert_eq!(config.watch.heartbeat_secs, 5);
        assert_eq!(config.workloads, WorkloadsConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn environment_overrides_the_file() {
        let mut config = DaemonConfig::default();
        config
            .apply_env(env(&[
                ("PORT", "3000"),
                ("LOG_LEVEL", "debug"),
                ("LOG_FORMAT", "JSON"),
                ("KRUISE_BACKEND", "memory"),
            ]))
            .unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.cluster.backend, Backend::Memory);
    }

    #[test]
    fn invalid_environment_values_are_errors() {
        let mut config = DaemonConfig::default();
        assert!(config.apply_env(env(&[("PORT", "eighty")])).is_err());
        assert!(config.apply_env(env(&[("LOG_FORMAT", "xml")])).is_err());
        assert!(config.apply_env(env(&[("KRUISE_BACKEND", "etcd")])).is_err());
    }

    #[test]
    fn validation_rejects_zero_durations_and_stray_seeds() {
        let mut config = DaemonConfig::default();
        config.watch.heartbeat_secs = 0;
        assert!(config.validate().is_err());

        let mut config = DaemonConfig::default();
        config.cluster.seed = Some(PathBuf::from("seed.json"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = DaemonConfig::default();
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("heartbeat_secs = 20"));
        let parsed: DaemonConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
