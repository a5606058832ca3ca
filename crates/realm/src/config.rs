//! Application configuration loaded from TOML.
//!
//! Every field has a serde default, so a partial file is valid and a missing
//! file is replaced by a freshly written default one.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use realm_protocol::DEFAULT_MAX_FRAME;
use realm_server::{SecurityConfig, ServerConfig};
use realm_world::{CharacterDefaults, ZoneConfig, ZoneId};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_bind_address() -> String {
    "127.0.0.1:7777".to_string()
}
fn default_max_connections() -> usize {
    1000
}
fn default_handshake_timeout_ms() -> u64 {
    10_000
}
fn default_whisper_timeout_ms() -> u64 {
    500
}
fn default_outbound_queue_depth() -> usize {
    256
}
fn default_max_frame_size() -> u32 {
    DEFAULT_MAX_FRAME
}
fn default_max_chat_length() -> usize {
    255
}
fn default_zone() -> ZoneId {
    1
}

fn default_token_secret() -> String {
    "change-me".to_string()
}
fn default_token_ttl_ms() -> u64 {
    5 * 60 * 1000
}
fn default_token_recheck_interval_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}
fn default_max_commands_per_second() -> u32 {
    20
}
fn default_max_rate_violations() -> u32 {
    100
}
fn default_max_connections_per_ip() -> u32 {
    10
}

fn default_max_health() -> u32 {
    100
}
fn default_attack_power() -> u32 {
    10
}
fn default_attack_range() -> f32 {
    5.0
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_interval_secs() -> u64 {
    60
}
fn default_event_buffer() -> usize {
    4096
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub world: ZoneConfig,
    #[serde(default)]
    pub content: ContentSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub monitoring: MonitoringSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Sessions allowed in the world at once
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_whisper_timeout_ms")]
    pub whisper_timeout_ms: u64,
    #[serde(default = "default_outbound_queue_depth")]
    pub outbound_queue_depth: usize,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: u32,
    #[serde(default = "default_max_chat_length")]
    pub max_chat_length: usize,
    /// Fallback zone for characters whose saved zone is gone
    #[serde(default = "default_zone")]
    pub default_zone: ZoneId,
}

/// Session token validation, shared with the login service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default = "default_token_secret")]
    pub token_secret: String,
    #[serde(default = "default_token_ttl_ms")]
    pub token_ttl_ms: u64,
    #[serde(default = "default_token_recheck_interval_ms")]
    pub token_recheck_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySettings {
    #[serde(default = "default_true")]
    pub enable_rate_limiting: bool,
    #[serde(default = "default_max_commands_per_second")]
    pub max_commands_per_second: u32,
    #[serde(default = "default_max_rate_violations")]
    pub max_rate_violations: u32,
    #[serde(default = "default_true")]
    pub enable_connection_limits: bool,
    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: u32,
    #[serde(default)]
    pub banned_ips: Vec<IpAddr>,
}

/// Static content and first-login character defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentSettings {
    /// JSON content file; the built-in starter content is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Create a character on first login instead of refusing unknown ids
    #[serde(default = "default_true")]
    pub auto_create_characters: bool,
    #[serde(default = "default_zone")]
    pub starting_zone: ZoneId,
    #[serde(default = "default_max_health")]
    pub max_health: u32,
    #[serde(default = "default_attack_power")]
    pub attack_power: u32,
    #[serde(default = "default_attack_range")]
    pub attack_range: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json_format: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSettings {
    /// Seconds between health summaries in the log
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
    /// Game events buffered for the event log consumer
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            max_connections: default_max_connections(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            whisper_timeout_ms: default_whisper_timeout_ms(),
            outbound_queue_depth: default_outbound_queue_depth(),
            max_frame_size: default_max_frame_size(),
            max_chat_length: default_max_chat_length(),
            default_zone: default_zone(),
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            token_secret: default_token_secret(),
            token_ttl_ms: default_token_ttl_ms(),
            token_recheck_interval_ms: default_token_recheck_interval_ms(),
        }
    }
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            enable_rate_limiting: true,
            max_commands_per_second: default_max_commands_per_second(),
            max_rate_violations: default_max_rate_violations(),
            enable_connection_limits: true,
            max_connections_per_ip: default_max_connections_per_ip(),
            banned_ips: Vec::new(),
        }
    }
}

impl Default for ContentSettings {
    fn default() -> Self {
        Self {
            path: None,
            auto_create_characters: true,
            starting_zone: default_zone(),
            max_health: default_max_health(),
            attack_power: default_attack_power(),
            attack_range: default_attack_range(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            stats_interval_secs: default_stats_interval_secs(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            auth: AuthSettings::default(),
            security: SecuritySettings::default(),
            world: ZoneConfig::default(),
            content: ContentSettings::default(),
            logging: LoggingSettings::default(),
            monitoring: MonitoringSettings::default(),
        }
    }
}

impl ContentSettings {
    pub fn character_defaults(&self) -> CharacterDefaults {
        CharacterDefaults {
            zone_id: self.starting_zone,
            max_health: self.max_health,
            attack_power: self.attack_power,
            attack_range: self.attack_range,
        }
    }
}

impl AppConfig {
    /// Reads `path`, or writes the default configuration there when it does
    /// not exist yet.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn content_path(&self) -> Option<PathBuf> {
        self.content.path.as_ref().map(PathBuf::from)
    }

    pub fn to_server_config(&self) -> Result<ServerConfig, String> {
        let bind_address: SocketAddr = self
            .server
            .bind_address
            .parse()
            .map_err(|e| format!("Invalid bind address '{}': {e}", self.server.bind_address))?;

        Ok(ServerConfig {
            bind_address,
            max_connections: self.server.max_connections,
            handshake_timeout_ms: self.server.handshake_timeout_ms,
            token_secret: self.auth.token_secret.clone(),
            token_ttl_ms: self.auth.token_ttl_ms,
            token_recheck_interval_ms: self.auth.token_recheck_interval_ms,
            whisper_timeout_ms: self.server.whisper_timeout_ms,
            outbound_queue_depth: self.server.outbound_queue_depth,
            max_frame_size: self.server.max_frame_size,
            max_chat_length: self.server.max_chat_length,
            default_zone: self.server.default_zone,
            security: SecurityConfig {
                enable_rate_limiting: self.security.enable_rate_limiting,
                max_commands_per_second: self.security.max_commands_per_second,
                max_rate_violations: self.security.max_rate_violations,
                enable_connection_limits: self.security.enable_connection_limits,
                banned_ips: self.security.banned_ips.clone(),
                max_connections_per_ip: self.security.max_connections_per_ip,
            },
            zone: self.world.clone(),
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", &self.server.bind_address));
        }
        if self.server.max_connections == 0 {
            return Err("server.max_connections must be greater than 0".to_string());
        }
        if self.server.outbound_queue_depth == 0 {
            return Err("server.outbound_queue_depth must be greater than 0".to_string());
        }
        if self.server.max_frame_size < 2 {
            return Err("server.max_frame_size must leave room for an opcode".to_string());
        }

        if self.auth.token_secret.is_empty() {
            return Err("auth.token_secret cannot be empty".to_string());
        }
        if self.auth.token_recheck_interval_ms == 0 {
            return Err("auth.token_recheck_interval_ms must be greater than 0".to_string());
        }

        if self.security.enable_rate_limiting && self.security.max_commands_per_second == 0 {
            return Err("security.max_commands_per_second must be greater than 0".to_string());
        }

        self.world.validate().map_err(|e| format!("world: {e}"))?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        if self.monitoring.stats_interval_secs == 0 {
            return Err("monitoring.stats_interval_secs must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realm_protocol::Vec3;
    use tempfile::tempdir;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());

        let server = config.to_server_config().unwrap();
        assert_eq!(server.bind_address, "127.0.0.1:7777".parse::<SocketAddr>().unwrap());
        assert_eq!(server.default_zone, 1);
        assert_eq!(server.zone.tick_interval_ms, 100);
        assert!(server.security.enable_rate_limiting);
    }

    #[test]
    fn invalid_bind_address_is_rejected() {
        let mut config = AppConfig::default();
        config.server.bind_address = "not-an-address".to_string();
        assert!(config.validate().unwrap_err().contains("bind address"));
        assert!(config.to_server_config().is_err());
    }

    #[test]
    fn inverted_region_is_rejected() {
        let mut config = AppConfig::default();
        config.world.region.min = Vec3::new(10.0, 0.0, 0.0);
        config.world.region.max = Vec3::new(-10.0, 5.0, 5.0);
        assert!(config.validate().unwrap_err().starts_with("world:"));
    }

    #[test]
    fn zero_tick_and_zero_cell_are_rejected() {
        let mut config = AppConfig::default();
        config.world.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.world.cell_size = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_secret_and_unknown_level_are_rejected() {
        let mut config = AppConfig::default();
        config.auth.token_secret.clear();
        assert!(config.validate().unwrap_err().contains("token_secret"));

        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().unwrap_err().contains("Invalid log level"));
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            bind_address = "0.0.0.0:9000"

            [world]
            tick_interval_ms = 50
            persistent_zones = [1, 2]

            [security]
            banned_ips = ["10.0.0.1"]
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind_address, "0.0.0.0:9000");
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.world.tick_interval_ms, 50);
        assert_eq!(config.world.persistent_zones, vec![1, 2]);
        assert_eq!(config.world.cell_size, 32.0);
        assert_eq!(config.security.banned_ips.len(), 1);
        assert_eq!(config.auth.token_secret, "change-me");
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("realm.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(config.server.bind_address, default_bind_address());

        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.server.bind_address, config.server.bind_address);
        assert_eq!(reloaded.world.max_players_per_instance, config.world.max_players_per_instance);
        assert!(reloaded.validate().is_ok());
    }

    #[tokio::test]
    async fn existing_file_is_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        tokio::fs::write(
            &path,
            "[logging]\nlevel = \"debug\"\njson_format = true\n\n[content]\npath = \"world.json\"\n",
        )
        .await
        .unwrap();

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
        assert_eq!(config.content_path(), Some(PathBuf::from("world.json")));
    }

    #[test]
    fn content_settings_map_to_character_defaults() {
        let settings = ContentSettings {
            starting_zone: 3,
            max_health: 250,
            ..ContentSettings::default()
        };
        let defaults = settings.character_defaults();
        assert_eq!(defaults.zone_id, 3);
        assert_eq!(defaults.max_health, 250);
        assert_eq!(defaults.attack_power, 10);
    }
}
