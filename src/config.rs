use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub activation: ActivationConfig,
    #[serde(default)]
    pub feed: FeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// 自动激活任务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    /// 提交后多久自动激活 (秒)
    pub delay_secs: i64,
    /// 轮询间隔 (秒)
    pub poll_interval_secs: u64,
    /// 单个任务最多尝试次数，超过后放弃，交由操作员手动激活
    pub max_attempts: i32,
    /// 失败后重试的退避时间 (秒)
    pub retry_backoff_secs: i64,
    /// 每次轮询最多处理的任务数
    pub batch_size: u64,
    /// 认领超过该时长未完成的任务可被重新认领 (秒)
    pub claim_ttl_secs: i64,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            delay_secs: 240,
            poll_interval_secs: 5,
            max_attempts: 5,
            retry_backoff_secs: 30,
            batch_size: 50,
            claim_ttl_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// broadcast 缓冲区大小，落后超过该数量的订阅者需要重新同步
    pub channel_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    pub fn from_toml() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        use std::io::ErrorKind;

        let mut config: Config = match std::fs::read_to_string(&config_path) {
            Ok(config_str) => toml::from_str(&config_str)
                .map_err(|e| format!("Failed to parse config file {config_path}: {e}"))?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // 无配置文件：使用环境变量与默认值构建
                let database_url = env::var("DATABASE_URL").map_err(|_| {
                    "DATABASE_URL is not set and no config.toml was found".to_string()
                })?;

                Config {
                    server: ServerConfig {
                        host: "0.0.0.0".to_string(),
                        port: 8080,
                    },
                    database: DatabaseConfig {
                        url: database_url,
                        max_connections: 10,
                    },
                    activation: ActivationConfig::default(),
                    feed: FeedConfig::default(),
                }
            }
            Err(e) => {
                return Err(format!("Failed to read config file {config_path}: {e}").into());
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// 环境变量覆盖（即便文件存在时也覆盖）
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("SERVER_HOST") {
            self.server.host = v;
        }
        if let Some(p) = env_parse("SERVER_PORT") {
            self.server.port = p;
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(mc) = env_parse("DB_MAX_CONNECTIONS") {
            self.database.max_connections = mc;
        }

        if let Some(n) = env_parse("ACTIVATION_DELAY_SECS") {
            self.activation.delay_secs = n;
        }
        if let Some(n) = env_parse("ACTIVATION_POLL_INTERVAL_SECS") {
            self.activation.poll_interval_secs = n;
        }
        if let Some(n) = env_parse("ACTIVATION_MAX_ATTEMPTS") {
            self.activation.max_attempts = n;
        }
        if let Some(n) = env_parse("ACTIVATION_RETRY_BACKOFF_SECS") {
            self.activation.retry_backoff_secs = n;
        }
        if let Some(n) = env_parse("ACTIVATION_BATCH_SIZE") {
            self.activation.batch_size = n;
        }
        if let Some(n) = env_parse("ACTIVATION_CLAIM_TTL_SECS") {
            self.activation.claim_ttl_secs = n;
        }

        if let Some(n) = env_parse("FEED_CHANNEL_CAPACITY") {
            self.feed.channel_capacity = n;
        }
    }
}
