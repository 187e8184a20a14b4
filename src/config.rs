use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub const CONFIG_FILE: &str = "config/market.toml";
pub const ENV_PREFIX: &str = "AGRI_MARKET";

/// Whether bulk payment runs notify each farmer.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BulkNotificationPolicy {
    /// No notifications for bulk runs, only single processing notifies.
    #[default]
    Silent,
    /// One notification per settled payment.
    PerPayment,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct MarketConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
    #[serde(default = "default_flush_every_ms")]
    pub flush_every_ms: u64,
    #[serde(default = "default_platform_fee_bps")]
    pub platform_fee_bps: u32,
    #[serde(default = "default_true")]
    pub enforce_order_transitions: bool,
    #[serde(default = "default_true")]
    pub restock_on_cancel: bool,
    #[serde(default)]
    pub notify_on_order_placed: bool,
    #[serde(default = "default_true")]
    pub notify_on_order_status: bool,
    #[serde(default)]
    pub bulk_payment_notifications: BulkNotificationPolicy,
    #[serde(default = "default_max_dispatch_attempts")]
    pub max_dispatch_attempts: u32,
}

fn default_db_path() -> String {
    "data/market.db".to_string()
}

fn default_cache_capacity() -> u64 {
    64 * 1024 * 1024
}

fn default_flush_every_ms() -> u64 {
    500
}

fn default_platform_fee_bps() -> u32 {
    500 // 5%
}

fn default_true() -> bool {
    true
}

fn default_max_dispatch_attempts() -> u32 {
    5
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            cache_capacity: default_cache_capacity(),
            flush_every_ms: default_flush_every_ms(),
            platform_fee_bps: default_platform_fee_bps(),
            enforce_order_transitions: true,
            restock_on_cancel: true,
            notify_on_order_placed: false,
            notify_on_order_status: true,
            bulk_payment_notifications: BulkNotificationPolicy::default(),
            max_dispatch_attempts: default_max_dispatch_attempts(),
        }
    }
}

impl MarketConfig {
    /// Load the `[market]` table from `config/market.toml`, overlaid with
    /// `AGRI_MARKET__*` environment variables. Missing settings take defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(CONFIG_FILE)
    }

    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let market = match settings.get::<MarketConfig>("market") {
            Ok(market) => market,
            Err(ConfigError::NotFound(_)) => {
                log::debug!("no [market] settings found, using defaults");
                MarketConfig::default()
            }
            Err(err) => {
                return Err(ConfigError::Message(format!(
                    "Market configuration could not be loaded from {path} or environment: {err}"
                )));
            }
        };

        market.validate()?;
        Ok(market)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.platform_fee_bps > crate::payment::BASIS_POINTS_DIVISOR {
            return Err(ConfigError::Message(format!(
                "platform_fee_bps must be at most 10000, got {}",
                self.platform_fee_bps
            )));
        }
        Ok(())
    }

    /// Open the sled database these settings describe.
    pub fn open_db(&self) -> sled::Result<sled::Db> {
        sled::Config::new()
            .path(&self.db_path)
            .cache_capacity(self.cache_capacity)
            .flush_every_ms(Some(self.flush_every_ms))
            .open()
    }
}
