use crate::error::{AppError, AppResult};
use serde::Deserialize;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub database_min_connections: u32,
    #[serde(default = "default_connection_timeout")]
    pub database_connection_timeout: u64,

    #[serde(default = "default_host")]
    pub server_host: String,
    #[serde(default = "default_port")]
    pub server_port: u16,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_access_token_expires")]
    pub jwt_access_token_expires_in: u64,
    #[serde(default = "default_refresh_token_expires")]
    pub jwt_refresh_token_expires_in: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,

    #[serde(default = "default_assets_url")]
    pub assets_url: String,

    #[serde(default = "default_handler_timeout_seconds")]
    pub handler_timeout_seconds: u64,
    #[serde(default = "default_publish_batch_max")]
    pub publish_batch_max: usize,
    #[serde(default = "default_publish_retry_max")]
    pub publish_retry_max: u32,
    #[serde(default = "default_publish_backoff_initial_ms")]
    pub publish_backoff_initial_ms: u64,
    #[serde(default = "default_publish_remote_endpoint")]
    pub publish_remote_endpoint: String,
    #[serde(default = "default_publish_remote_source")]
    pub publish_remote_source: String,

    #[serde(default = "default_hub_channel_size")]
    pub hub_channel_size: usize,
    #[serde(default = "default_hub_send_buffer")]
    pub hub_send_buffer: usize,
    #[serde(default = "default_hub_ping_period_seconds")]
    pub hub_ping_period_seconds: u64,
    #[serde(default = "default_hub_pong_wait_seconds")]
    pub hub_pong_wait_seconds: u64,
    #[serde(default = "default_hub_max_connections_per_user")]
    pub hub_max_connections_per_user: usize,

    #[serde(default = "default_perf_command_threshold_ms")]
    pub perf_command_threshold_ms: u64,
    #[serde(default = "default_perf_query_threshold_ms")]
    pub perf_query_threshold_ms: u64,
}

// 为了向后兼容，创建嵌套结构的访问器
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub access_token_expires_in: u64,
    pub refresh_token_expires_in: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

#[derive(Clone, Debug)]
pub struct AssetsConfig {
    pub base_url: String,
}

/// Configuration surface consumed by the event-propagation core (handler registry,
/// publisher, hub, mediator performance thresholds).
#[derive(Clone, Debug)]
pub struct EventingConfig {
    pub handler_timeout: std::time::Duration,
    pub publish_batch_max: usize,
    pub publish_retry_max: u32,
    pub publish_backoff_initial: std::time::Duration,
    pub publish_remote_endpoint: String,
    pub publish_remote_source: String,
    pub hub_channel_size: usize,
    pub hub_send_buffer: usize,
    pub hub_ping_period: std::time::Duration,
    pub hub_pong_wait: std::time::Duration,
    pub hub_max_connections_per_user: usize,
    pub perf_command_threshold: std::time::Duration,
    pub perf_query_threshold: std::time::Duration,
}

// Default value functions
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    5
}
fn default_connection_timeout() -> u64 {
    30
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_jwt_secret() -> String {
    "your-secret-key".to_string()
}
fn default_access_token_expires() -> u64 {
    3600
} // 1 hour
fn default_refresh_token_expires() -> u64 {
    604800
} // 7 days
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_assets_url() -> String {
    "http://localhost:8000/assets".to_string()
}

fn default_handler_timeout_seconds() -> u64 {
    30
}
fn default_publish_batch_max() -> usize {
    10
}
fn default_publish_retry_max() -> u32 {
    3
}
fn default_publish_backoff_initial_ms() -> u64 {
    100
}
fn default_publish_remote_endpoint() -> String {
    "http://localhost:9000/events".to_string()
}
fn default_publish_remote_source() -> String {
    "knowledge-graph.core".to_string()
}
fn default_hub_channel_size() -> usize {
    1000
}
fn default_hub_send_buffer() -> usize {
    256
}
fn default_hub_ping_period_seconds() -> u64 {
    54
}
fn default_hub_pong_wait_seconds() -> u64 {
    60
}
fn default_hub_max_connections_per_user() -> usize {
    10
}
fn default_perf_command_threshold_ms() -> u64 {
    500
}
fn default_perf_query_threshold_ms() -> u64 {
    200
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();

        let config = envy::from_env::<Config>()
            .map_err(|e| AppError::Config(format!("Failed to load config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.database_max_connections == 0 {
            return Err(AppError::Config(
                "DATABASE_MAX_CONNECTIONS must be > 0".to_string(),
            ));
        }

        if self.database_min_connections > self.database_max_connections {
            return Err(AppError::Config(
                "DATABASE_MIN_CONNECTIONS cannot be greater than DATABASE_MAX_CONNECTIONS"
                    .to_string(),
            ));
        }

        if self.jwt_secret == "your-secret-key" {
            return Err(AppError::Config(
                "JWT_SECRET must be set to a secure value".to_string(),
            ));
        }

        if self.jwt_access_token_expires_in == 0 {
            return Err(AppError::Config(
                "JWT_ACCESS_TOKEN_EXPIRES_IN must be > 0".to_string(),
            ));
        }

        if self.handler_timeout_seconds == 0 {
            return Err(AppError::Config(
                "HANDLER_TIMEOUT_SECONDS must be > 0".to_string(),
            ));
        }

        if self.publish_batch_max == 0 {
            return Err(AppError::Config(
                "PUBLISH_BATCH_MAX must be > 0".to_string(),
            ));
        }

        if self.hub_channel_size == 0 || self.hub_send_buffer == 0 {
            return Err(AppError::Config(
                "HUB_CHANNEL_SIZE and HUB_SEND_BUFFER must be > 0".to_string(),
            ));
        }

        if self.hub_max_connections_per_user == 0 {
            return Err(AppError::Config(
                "HUB_MAX_CONNECTIONS_PER_USER must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    // 提供嵌套结构的访问器
    pub fn database(&self) -> DatabaseConfig {
        DatabaseConfig {
            url: self.database_url.clone(),
            max_connections: self.database_max_connections,
            min_connections: self.database_min_connections,
            connection_timeout: self.database_connection_timeout,
        }
    }

    pub fn server(&self) -> ServerConfig {
        ServerConfig {
            host: self.server_host.clone(),
            port: self.server_port,
            cors_origins: self.cors_origins.clone(),
        }
    }

    pub fn auth(&self) -> AuthConfig {
        AuthConfig {
            jwt_secret: self.jwt_secret.clone(),
            access_token_expires_in: self.jwt_access_token_expires_in,
            refresh_token_expires_in: self.jwt_refresh_token_expires_in,
        }
    }

    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level.clone(),
            format: self.log_format.clone(),
        }
    }

    pub fn assets(&self) -> AssetsConfig {
        AssetsConfig {
            base_url: self.assets_url.clone(),
        }
    }

    pub fn eventing(&self) -> EventingConfig {
        use std::time::Duration;
        EventingConfig {
            handler_timeout: Duration::from_secs(self.handler_timeout_seconds),
            publish_batch_max: self.publish_batch_max,
            publish_retry_max: self.publish_retry_max,
            publish_backoff_initial: Duration::from_millis(self.publish_backoff_initial_ms),
            publish_remote_endpoint: self.publish_remote_endpoint.clone(),
            publish_remote_source: self.publish_remote_source.clone(),
            hub_channel_size: self.hub_channel_size,
            hub_send_buffer: self.hub_send_buffer,
            hub_ping_period: Duration::from_secs(self.hub_ping_period_seconds),
            hub_pong_wait: Duration::from_secs(self.hub_pong_wait_seconds),
            hub_max_connections_per_user: self.hub_max_connections_per_user,
            perf_command_threshold: Duration::from_millis(self.perf_command_threshold_ms),
            perf_query_threshold: Duration::from_millis(self.perf_query_threshold_ms),
        }
    }
}

impl Config {
    pub fn db_url(&self) -> &str {
        &self.database_url
    }
}
