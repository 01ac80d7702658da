use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Accepted range for the overall graceful shutdown budget, in seconds.
pub const SHUTDOWN_TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 5..=300;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LameduckConfig {
    pub shutdown: ShutdownConfig,
    pub supervisor: SupervisorConfig,
    pub server: ServerConfig,
}

/// In-process shutdown budget used by the coordinator
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ShutdownConfig {
    /// Upper bound for the whole graceful sequence
    #[serde(default = "default_shutdown_timeout")]
    pub timeout_seconds: u64,

    /// Portion of the budget spent waiting for in-flight requests
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_seconds: u64,

    /// Portion of the budget available to the cleanup chain
    #[serde(default = "default_cleanup_timeout")]
    pub cleanup_timeout_seconds: u64,

    /// Timeout applied to cleanup steps registered without their own
    #[serde(default = "default_step_timeout")]
    pub step_timeout_seconds: u64,

    /// Wait for active connections before running cleanup
    #[serde(default = "default_wait_for_connections")]
    pub wait_for_connections: bool,

    /// How often the drain loop samples the connection tracker
    #[serde(default = "default_drain_poll_interval")]
    pub drain_poll_interval_ms: u64,

    /// Cadence of drain progress log lines
    #[serde(default = "default_progress_interval")]
    pub progress_interval_seconds: u64,
}

/// Outer process supervisor settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// How long the worker gets after the first signal before escalation
    #[serde(default = "default_supervisor_timeout")]
    pub timeout_seconds: u64,

    /// Required slack between the supervisor window and the coordinator budget
    #[serde(default = "default_safety_margin")]
    pub safety_margin_seconds: u64,

    /// Send SIGKILL once the window elapses
    #[serde(default = "default_force_kill")]
    pub force_kill: bool,

    /// Child liveness poll interval
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Cadence of shutdown progress reports
    #[serde(default = "default_progress_interval")]
    pub progress_interval_seconds: u64,

    /// Grace period after SIGKILL before giving up on the child
    #[serde(default = "default_kill_grace")]
    pub kill_grace_seconds: u64,

    /// Worker readiness endpoint used to report outstanding work
    #[serde(default)]
    pub status_url: Option<String>,
}

/// Listener used by the demonstration worker
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    /// IP address to bind to
    #[serde(default = "default_server_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl ShutdownConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_seconds)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_seconds)
    }

    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_interval_ms.max(1))
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_seconds.max(1))
    }

    /// Drain plus cleanup, the longest the coordinator can take
    pub fn committed_budget(&self) -> Duration {
        self.drain_timeout().saturating_add(self.cleanup_timeout())
    }

    /// Validate the coordinator budget on its own
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SHUTDOWN_TIMEOUT_RANGE.contains(&self.timeout_seconds) {
            return Err(ConfigError::Message(format!(
                "Shutdown timeout must be between {} and {} seconds, got {}",
                SHUTDOWN_TIMEOUT_RANGE.start(),
                SHUTDOWN_TIMEOUT_RANGE.end(),
                self.timeout_seconds
            )));
        }

        if self.drain_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "Drain timeout must be greater than 0".to_string(),
            ));
        }

        if self.cleanup_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "Cleanup timeout must be greater than 0".to_string(),
            ));
        }

        let committed = self
            .drain_timeout_seconds
            .checked_add(self.cleanup_timeout_seconds);
        if committed.map_or(true, |committed| committed > self.timeout_seconds) {
            return Err(ConfigError::Message(format!(
                "Drain timeout ({}s) plus cleanup timeout ({}s) exceeds shutdown timeout ({}s)",
                self.drain_timeout_seconds, self.cleanup_timeout_seconds, self.timeout_seconds
            )));
        }

        if self.step_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "Cleanup step timeout must be greater than 0".to_string(),
            ));
        }

        if self.step_timeout_seconds > self.cleanup_timeout_seconds {
            return Err(ConfigError::Message(format!(
                "Cleanup step timeout ({}s) exceeds cleanup timeout ({}s)",
                self.step_timeout_seconds, self.cleanup_timeout_seconds
            )));
        }

        if self.drain_poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Drain poll interval must be greater than 0".to_string(),
            ));
        }

        if self.progress_interval_seconds == 0 {
            return Err(ConfigError::Message(
                "Shutdown progress interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl SupervisorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_seconds.max(1))
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_seconds)
    }

    /// Validate the supervisor window against the coordinator budget it backs up
    pub fn validate_against(&self, shutdown: &ShutdownConfig) -> Result<(), ConfigError> {
        let required = shutdown
            .drain_timeout_seconds
            .checked_add(shutdown.cleanup_timeout_seconds)
            .and_then(|budget| budget.checked_add(self.safety_margin_seconds))
            .ok_or_else(|| {
                ConfigError::Message(format!(
                    "Drain ({}s) + cleanup ({}s) + margin ({}s) overflows",
                    shutdown.drain_timeout_seconds,
                    shutdown.cleanup_timeout_seconds,
                    self.safety_margin_seconds
                ))
            })?;

        if self.timeout_seconds < required {
            return Err(ConfigError::Message(format!(
                "Supervisor timeout ({}s) must be at least drain ({}s) + cleanup ({}s) + margin ({}s) = {}s",
                self.timeout_seconds,
                shutdown.drain_timeout_seconds,
                shutdown.cleanup_timeout_seconds,
                self.safety_margin_seconds,
                required
            )));
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Supervisor poll interval must be greater than 0".to_string(),
            ));
        }

        if self.progress_interval_seconds == 0 {
            return Err(ConfigError::Message(
                "Supervisor progress interval must be greater than 0".to_string(),
            ));
        }

        if self.kill_grace_seconds == 0 {
            return Err(ConfigError::Message(
                "Kill grace period must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl LameduckConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default("shutdown.timeout_seconds", default_shutdown_timeout())?
            .set_default("shutdown.drain_timeout_seconds", default_drain_timeout())?
            .set_default("shutdown.cleanup_timeout_seconds", default_cleanup_timeout())?
            .set_default("shutdown.step_timeout_seconds", default_step_timeout())?
            .set_default(
                "shutdown.wait_for_connections",
                default_wait_for_connections(),
            )?
            .set_default(
                "shutdown.drain_poll_interval_ms",
                default_drain_poll_interval(),
            )?
            .set_default(
                "shutdown.progress_interval_seconds",
                default_progress_interval(),
            )?
            .set_default("supervisor.timeout_seconds", default_supervisor_timeout())?
            .set_default("supervisor.safety_margin_seconds", default_safety_margin())?
            .set_default("supervisor.force_kill", default_force_kill())?
            .set_default("supervisor.poll_interval_ms", default_poll_interval())?
            .set_default(
                "supervisor.progress_interval_seconds",
                default_progress_interval(),
            )?
            .set_default("supervisor.kill_grace_seconds", default_kill_grace())?
            .set_default("server.ip", default_server_ip())?
            .set_default("server.port", default_server_port())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // LAMEDUCK_SHUTDOWN__TIMEOUT_SECONDS=45 style overrides
            .add_source(
                Environment::with_prefix("LAMEDUCK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: LameduckConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values, including the cross-layer timing invariant
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shutdown.validate()?;
        self.supervisor.validate_against(&self.shutdown)?;

        if self.server.ip.is_empty() {
            return Err(ConfigError::Message(
                "Server ip must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_shutdown_timeout(),
            drain_timeout_seconds: default_drain_timeout(),
            cleanup_timeout_seconds: default_cleanup_timeout(),
            step_timeout_seconds: default_step_timeout(),
            wait_for_connections: default_wait_for_connections(),
            drain_poll_interval_ms: default_drain_poll_interval(),
            progress_interval_seconds: default_progress_interval(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_supervisor_timeout(),
            safety_margin_seconds: default_safety_margin(),
            force_kill: default_force_kill(),
            poll_interval_ms: default_poll_interval(),
            progress_interval_seconds: default_progress_interval(),
            kill_grace_seconds: default_kill_grace(),
            status_url: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ip: default_server_ip(),
            port: default_server_port(),
        }
    }
}

impl Default for LameduckConfig {
    fn default() -> Self {
        Self {
            shutdown: ShutdownConfig::default(),
            supervisor: SupervisorConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

// Default value functions
fn default_shutdown_timeout() -> u64 {
    30
}
fn default_drain_timeout() -> u64 {
    20
}
fn default_cleanup_timeout() -> u64 {
    10
}
fn default_step_timeout() -> u64 {
    5
}
fn default_wait_for_connections() -> bool {
    true
}
fn default_drain_poll_interval() -> u64 {
    100
}
fn default_progress_interval() -> u64 {
    5
}

fn default_supervisor_timeout() -> u64 {
    35
}
fn default_safety_margin() -> u64 {
    2
}
fn default_force_kill() -> bool {
    true
}
fn default_poll_interval() -> u64 {
    1000
}
fn default_kill_grace() -> u64 {
    2
}

fn default_server_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_server_port() -> u16 {
    8080
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = LameduckConfig::default();

        assert_eq!(config.shutdown.timeout_seconds, 30);
        assert!(config.shutdown.wait_for_connections);
        assert!(config.supervisor.force_kill);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_budget_must_fit_shutdown_timeout() {
        let mut config = LameduckConfig::default();
        config.shutdown.drain_timeout_seconds = 25;
        config.shutdown.cleanup_timeout_seconds = 10;

        assert!(config.validate().is_err());

        config.shutdown.drain_timeout_seconds = 20;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_supervisor_window_must_cover_coordinator() {
        let mut config = LameduckConfig::default();

        // 20 + 10 + 2 = 32
        config.supervisor.timeout_seconds = 31;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Supervisor timeout"));

        config.supervisor.timeout_seconds = 32;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_huge_budgets_rejected_without_overflow() {
        let mut config = LameduckConfig::default();
        config.shutdown.drain_timeout_seconds = u64::MAX;
        config.shutdown.cleanup_timeout_seconds = 1;
        assert!(config.shutdown.validate().is_err());
        assert!(config.validate().is_err());

        let config = LameduckConfig::default();
        let supervisor = SupervisorConfig {
            safety_margin_seconds: u64::MAX,
            ..config.supervisor.clone()
        };
        let err = supervisor.validate_against(&config.shutdown).unwrap_err();
        assert!(err.to_string().contains("overflows"));

        let shutdown = ShutdownConfig {
            drain_timeout_seconds: u64::MAX,
            ..config.shutdown.clone()
        };
        assert!(config.supervisor.validate_against(&shutdown).is_err());
    }

    #[test]
    fn test_shutdown_timeout_range() {
        let mut config = LameduckConfig::default();

        config.shutdown.timeout_seconds = 4;
        assert!(config.shutdown.validate().is_err());

        config.shutdown.timeout_seconds = 301;
        assert!(config.shutdown.validate().is_err());
    }

    #[test]
    fn test_step_timeout_bounded_by_cleanup_budget() {
        let mut config = ShutdownConfig::default();
        config.step_timeout_seconds = 11;
        assert!(config.validate().is_err());

        config.step_timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_intervals_rejected() {
        let mut config = LameduckConfig::default();
        config.supervisor.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = LameduckConfig::default();
        config.shutdown.drain_poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = LameduckConfig::default();
        config.supervisor.kill_grace_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "[shutdown]\ntimeout_seconds = 60\ndrain_timeout_seconds = 40\n\n[supervisor]\ntimeout_seconds = 60\nforce_kill = false\n"
        )
        .unwrap();

        let config = LameduckConfig::load_from_file(file.path()).unwrap();

        assert_eq!(config.shutdown.timeout_seconds, 60);
        assert_eq!(config.shutdown.drain_timeout_seconds, 40);
        assert_eq!(config.shutdown.cleanup_timeout_seconds, 10);
        assert!(!config.supervisor.force_kill);
        assert_eq!(config.server.port, 8080);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = LameduckConfig::load_from_file("/nonexistent/lameduck.toml").unwrap();
        assert_eq!(config.shutdown, ShutdownConfig::default());
        assert_eq!(config.supervisor.status_url, None);
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = LameduckConfig::default();
        let rendered = config.to_toml().unwrap();
        let parsed: LameduckConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
