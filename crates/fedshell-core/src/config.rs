//! Configuration resolution for the fedshell console.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`$XDG_CONFIG_HOME/fedshell/console.json`)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables (`FEDSHELL_*`)
//! 5. CLI arguments (applied by the binary, highest priority)
//!
//! Files are merged key by key, so an overlay only needs the fields it
//! changes.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Complete console configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub targets: TargetsConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP/WebSocket listener for browser terminals.
    pub listen_addr: SocketAddr,
    /// gRPC listener for the session admin service.
    pub admin_addr: SocketAddr,
    /// Upper bound on concurrently registered sessions.
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            admin_addr: SocketAddr::from(([127, 0, 0, 1], 50070)),
            max_sessions: 256,
        }
    }
}

/// Per-session bridge tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Outbound bytes that may be queued for one client before the shell
    /// stream stops being drained.
    pub watermark_bytes: usize,
    /// Capacity of the outbound frame queue.
    pub outbound_frames: usize,
    /// Sessions with no traffic for this long are force-closed.
    pub idle_timeout_secs: u64,
    /// Time allowed for the shell stream to open.
    pub open_timeout_secs: u64,
    /// Time allowed for flushing and releasing handles while closing.
    pub close_timeout_secs: u64,
    /// Interval between WebSocket pings.
    pub heartbeat_interval_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            watermark_bytes: 256 * 1024,
            outbound_frames: 64,
            idle_timeout_secs: 30 * 60,
            open_timeout_secs: 10,
            close_timeout_secs: 5,
            heartbeat_interval_secs: 30,
        }
    }
}

impl BridgeConfig {
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub const fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    pub const fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }

    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// Token validation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret shared with the console's login service.
    pub jwt_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dev-secret-change-me".to_string(),
        }
    }
}

/// Target resolution and shell-stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetsConfig {
    /// JSON file describing reachable pods and their agent endpoints.
    pub targets_file: Option<PathBuf>,
    /// Command used when the client does not ask for one.
    pub default_shell: Vec<String>,
    /// Bearer token presented to pod agents.
    pub agent_token: Option<String>,
    /// TCP/HTTP2 connect timeout towards an agent.
    pub connect_timeout_secs: u64,
    /// Extra attempts when an agent is unreachable.
    pub open_retries: u32,
}

impl Default for TargetsConfig {
    fn default() -> Self {
        Self {
            targets_file: None,
            default_shell: vec!["/bin/sh".to_string()],
            agent_token: None,
            connect_timeout_secs: 5,
            open_retries: 2,
        }
    }
}

/// Load configuration with hierarchical resolution.
///
/// `explicit` is a config file passed on the command line; unlike the
/// global file it must exist.
pub fn load_config(explicit: Option<&Path>) -> Result<ConsoleConfig> {
    let mut merged = serde_json::to_value(ConsoleConfig::default())?;

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        merge_values(&mut merged, read_config_value(&global_path)?);
    }

    if let Some(path) = explicit {
        merge_values(&mut merged, read_config_value(path)?);
    }

    let mut config: ConsoleConfig = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
        .map(|p| p.join("fedshell").join("console.json"))
}

fn read_config_value(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Recursively overlay `overlay` onto `base`. Objects merge per key, any
/// other value replaces the base value.
fn merge_values(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Apply `FEDSHELL_*` overrides read through `lookup`.
pub fn apply_env_overrides(config: &mut ConsoleConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(addr) = lookup("FEDSHELL_LISTEN_ADDR").and_then(|v| v.parse().ok()) {
        config.server.listen_addr = addr;
    }
    if let Some(addr) = lookup("FEDSHELL_ADMIN_ADDR").and_then(|v| v.parse().ok()) {
        config.server.admin_addr = addr;
    }
    if let Some(secret) = lookup("FEDSHELL_JWT_SECRET") {
        config.auth.jwt_secret = secret;
    }
    if let Some(path) = lookup("FEDSHELL_TARGETS_FILE") {
        config.targets.targets_file = Some(PathBuf::from(path));
    }
    if let Some(token) = lookup("FEDSHELL_AGENT_TOKEN") {
        config.targets.agent_token = Some(token);
    }
    if let Some(n) = lookup("FEDSHELL_IDLE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.bridge.idle_timeout_secs = n;
    }
    if let Some(n) = lookup("FEDSHELL_WATERMARK_BYTES").and_then(|v| v.parse().ok()) {
        config.bridge.watermark_bytes = n;
    }
}

/// Reject settings the bridge cannot run with.
pub fn validate(config: &ConsoleConfig) -> Result<()> {
    if config.bridge.watermark_bytes == 0 {
        return Err(Error::Config("bridge.watermark_bytes must be > 0".into()));
    }
    if u32::try_from(config.bridge.watermark_bytes).is_err() {
        return Err(Error::Config(
            "bridge.watermark_bytes must fit in 32 bits".into(),
        ));
    }
    if config.bridge.outbound_frames == 0 {
        return Err(Error::Config("bridge.outbound_frames must be > 0".into()));
    }
    if config.bridge.idle_timeout_secs == 0 {
        return Err(Error::Config("bridge.idle_timeout_secs must be > 0".into()));
    }
    if config.targets.default_shell.is_empty() {
        return Err(Error::Config("targets.default_shell must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ConsoleConfig::default();
        assert!(validate(&config).is_ok());
        assert_eq!(config.bridge.watermark_bytes, 256 * 1024);
        assert_eq!(config.bridge.idle_timeout(), Duration::from_secs(1800));
        assert_eq!(config.targets.default_shell, vec!["/bin/sh"]);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"bridge": {{"idle_timeout_secs": 60}}, "server": {{"max_sessions": 8}}}}"#
        )
        .unwrap();

        let mut merged = serde_json::to_value(ConsoleConfig::default()).unwrap();
        merge_values(&mut merged, read_config_value(file.path()).unwrap());
        let config: ConsoleConfig = serde_json::from_value(merged).unwrap();

        assert_eq!(config.bridge.idle_timeout_secs, 60);
        assert_eq!(config.bridge.watermark_bytes, 256 * 1024);
        assert_eq!(config.server.max_sessions, 8);
        assert_eq!(config.server.listen_addr, ServerConfig::default().listen_addr);
    }

    #[test]
    fn unreadable_file_is_config_error() {
        let err = read_config_value(Path::new("/nonexistent/fedshell.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn malformed_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = read_config_value(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("FEDSHELL_LISTEN_ADDR", "127.0.0.1:9000"),
            ("FEDSHELL_JWT_SECRET", "s3cret"),
            ("FEDSHELL_IDLE_TIMEOUT_SECS", "42"),
            ("FEDSHELL_WATERMARK_BYTES", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = ConsoleConfig::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| (*v).to_string()));

        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.auth.jwt_secret, "s3cret");
        assert_eq!(config.bridge.idle_timeout_secs, 42);
        // Unparseable values leave the previous setting alone.
        assert_eq!(config.bridge.watermark_bytes, 256 * 1024);
    }

    #[test]
    fn zero_watermark_rejected() {
        let mut config = ConsoleConfig::default();
        config.bridge.watermark_bytes = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn explicit_missing_file_fails_load() {
        assert!(load_config(Some(Path::new("/nonexistent/console.json"))).is_err());
    }
}
