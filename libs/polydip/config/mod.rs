//! Engine configuration: YAML file plus `.env` secrets.

use crate::bus::UserAuth;
use crate::domain::{MarketDuration, Underlying};
use crate::oms::{OrderManagerSettings, WatchMode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarMissing(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// How positions are settled when a market ends mid-round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettleStrategy {
    /// Queue for post-resolution redemption
    Redeem,
    /// Sell both legs at market immediately
    Sell,
}

/// WebSocket / API endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    pub market_ws_url: String,
    pub user_ws_url: String,
    pub oracle_ws_url: String,
    pub candles_api_url: String,
}

/// Order manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderManagerConfig {
    #[serde(default = "default_watch_mode")]
    pub mode: WatchMode,
    #[serde(default = "default_polling_interval_secs")]
    pub polling_interval_secs: f64,
    #[serde(default)]
    pub polygon_rpc_url: Option<String>,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
}

fn default_watch_mode() -> WatchMode {
    WatchMode::Hybrid
}

fn default_polling_interval_secs() -> f64 {
    5.0
}

fn default_chain_id() -> u64 {
    137
}

impl Default for OrderManagerConfig {
    fn default() -> Self {
        Self {
            mode: default_watch_mode(),
            polling_interval_secs: default_polling_interval_secs(),
            polygon_rpc_url: None,
            chain_id: default_chain_id(),
        }
    }
}

impl OrderManagerConfig {
    pub fn settings(&self) -> OrderManagerSettings {
        OrderManagerSettings {
            mode: self.mode,
            polling_interval: Duration::from_secs_f64(self.polling_interval_secs),
            polygon_rpc_url: self.polygon_rpc_url.clone(),
            chain_id: self.chain_id,
        }
    }
}

/// Dip arbitrage strategy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DipArbConfig {
    /// Relative drop that triggers a leg-1 buy
    #[serde(default = "default_dip_threshold")]
    pub dip_threshold: f64,
    /// Relative rise on the opposite side that triggers a leg-1 buy of the
    /// untouched side; disabled when None
    #[serde(default)]
    pub surge_threshold: Option<f64>,
    #[serde(default = "default_sliding_window_ms")]
    pub sliding_window_ms: i64,
    /// Minutes after round start during which leg-1 may fire
    #[serde(default = "default_window_minutes")]
    pub window_minutes: f64,
    #[serde(default = "default_max_slippage")]
    pub max_slippage: f64,
    /// Sequential child orders leg-1 is split across
    #[serde(default = "default_split_orders")]
    pub split_orders: u32,
    #[serde(default = "default_order_interval_ms")]
    pub order_interval_ms: u64,
    /// Target position size in shares
    #[serde(default = "default_shares")]
    pub shares: f64,
    #[serde(default = "default_execution_cooldown_ms")]
    pub execution_cooldown_ms: i64,
    #[serde(default = "default_leg2_timeout_seconds")]
    pub leg2_timeout_seconds: i64,
    /// Fire leg 2 when leg1.avg_price + opposite ask (slippage-adjusted)
    /// is at or below this
    #[serde(default = "default_sum_target")]
    pub sum_target: f64,
    #[serde(default = "default_auto_merge")]
    pub auto_merge: bool,
    #[serde(default)]
    pub debug: bool,
}

fn default_dip_threshold() -> f64 {
    0.02
}

fn default_sliding_window_ms() -> i64 {
    3000
}

fn default_window_minutes() -> f64 {
    3.0
}

fn default_max_slippage() -> f64 {
    0.02
}

fn default_split_orders() -> u32 {
    1
}

fn default_order_interval_ms() -> u64 {
    500
}

fn default_shares() -> f64 {
    20.0
}

fn default_execution_cooldown_ms() -> i64 {
    3000
}

fn default_leg2_timeout_seconds() -> i64 {
    60
}

fn default_sum_target() -> f64 {
    1.0
}

fn default_auto_merge() -> bool {
    true
}

impl Default for DipArbConfig {
    fn default() -> Self {
        Self {
            dip_threshold: default_dip_threshold(),
            surge_threshold: None,
            sliding_window_ms: default_sliding_window_ms(),
            window_minutes: default_window_minutes(),
            max_slippage: default_max_slippage(),
            split_orders: default_split_orders(),
            order_interval_ms: default_order_interval_ms(),
            shares: default_shares(),
            execution_cooldown_ms: default_execution_cooldown_ms(),
            leg2_timeout_seconds: default_leg2_timeout_seconds(),
            sum_target: default_sum_target(),
            auto_merge: default_auto_merge(),
            debug: false,
        }
    }
}

/// Market rotation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRotateConfig {
    pub underlyings: Vec<Underlying>,
    #[serde(default = "default_duration")]
    pub duration: MarketDuration,
    #[serde(default = "default_auto_settle")]
    pub auto_settle: bool,
    #[serde(default = "default_settle_strategy")]
    pub settle_strategy: SettleStrategy,
    #[serde(default = "default_preload_minutes")]
    pub preload_minutes: f64,
    #[serde(default = "default_redeem_wait_minutes")]
    pub redeem_wait_minutes: f64,
    #[serde(default = "default_redeem_retry_interval_seconds")]
    pub redeem_retry_interval_seconds: u64,
}

fn default_duration() -> MarketDuration {
    MarketDuration::FiveMinutes
}

fn default_auto_settle() -> bool {
    true
}

fn default_settle_strategy() -> SettleStrategy {
    SettleStrategy::Redeem
}

fn default_preload_minutes() -> f64 {
    2.0
}

fn default_redeem_wait_minutes() -> f64 {
    5.0
}

fn default_redeem_retry_interval_seconds() -> u64 {
    30
}

impl Default for AutoRotateConfig {
    fn default() -> Self {
        Self {
            underlyings: vec![Underlying::Btc],
            duration: default_duration(),
            auto_settle: default_auto_settle(),
            settle_strategy: default_settle_strategy(),
            preload_minutes: default_preload_minutes(),
            redeem_wait_minutes: default_redeem_wait_minutes(),
            redeem_retry_interval_seconds: default_redeem_retry_interval_seconds(),
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub order_manager: OrderManagerConfig,
    #[serde(default)]
    pub diparb: DipArbConfig,
    #[serde(default)]
    pub auto_rotate: AutoRotateConfig,
}

impl EngineConfig {
    /// Load configuration from a YAML file; `.env` is loaded for secrets.
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let yaml_content = std::fs::read_to_string(config_path)?;
        let config: EngineConfig = serde_yaml::from_str(&yaml_content)?;

        dotenv::dotenv().ok();

        config.validate()?;
        Ok(config)
    }

    /// User-channel credentials from the environment.
    pub fn user_auth_from_env() -> Result<UserAuth> {
        let api_key = std::env::var("API_KEY")
            .map_err(|_| ConfigError::EnvVarMissing("API_KEY".to_string()))?;
        let secret = std::env::var("API_SECRET")
            .map_err(|_| ConfigError::EnvVarMissing("API_SECRET".to_string()))?;
        let passphrase = std::env::var("API_PASSPHRASE")
            .map_err(|_| ConfigError::EnvVarMissing("API_PASSPHRASE".to_string()))?;
        Ok(UserAuth {
            api_key,
            secret,
            passphrase,
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let d = &self.diparb;
        if d.dip_threshold <= 0.0 || d.dip_threshold >= 1.0 {
            return Err(ConfigError::ValidationError(
                "dip_threshold must be between 0 and 1".to_string(),
            ));
        }
        if let Some(surge) = d.surge_threshold {
            if surge <= 0.0 || surge >= 1.0 {
                return Err(ConfigError::ValidationError(
                    "surge_threshold must be between 0 and 1".to_string(),
                ));
            }
        }
        if d.sliding_window_ms <= 0 {
            return Err(ConfigError::ValidationError(
                "sliding_window_ms must be greater than 0".to_string(),
            ));
        }
        if d.window_minutes <= 0.0 {
            return Err(ConfigError::ValidationError(
                "window_minutes must be greater than 0".to_string(),
            ));
        }
        if d.max_slippage < 0.0 || d.max_slippage >= 1.0 {
            return Err(ConfigError::ValidationError(
                "max_slippage must be within [0, 1)".to_string(),
            ));
        }
        if d.split_orders == 0 {
            return Err(ConfigError::ValidationError(
                "split_orders must be at least 1".to_string(),
            ));
        }
        if d.shares <= 0.0 {
            return Err(ConfigError::ValidationError(
                "shares must be positive".to_string(),
            ));
        }
        if d.leg2_timeout_seconds <= 0 {
            return Err(ConfigError::ValidationError(
                "leg2_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if d.sum_target <= 0.0 || d.sum_target > 2.0 {
            return Err(ConfigError::ValidationError(
                "sum_target must be within (0, 2]".to_string(),
            ));
        }

        if self.order_manager.polling_interval_secs <= 0.0 {
            return Err(ConfigError::ValidationError(
                "polling_interval_secs must be greater than 0".to_string(),
            ));
        }

        let r = &self.auto_rotate;
        if r.underlyings.is_empty() {
            return Err(ConfigError::ValidationError(
                "underlyings must not be empty".to_string(),
            ));
        }
        if r.preload_minutes < 0.0 {
            return Err(ConfigError::ValidationError(
                "preload_minutes must not be negative".to_string(),
            ));
        }
        if r.redeem_retry_interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "redeem_retry_interval_seconds must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
