//! Runtime settings, read from an optional `settings` file and `LEDGER_*`
//! environment variables.

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::Amount;
use crate::wallet::Currency;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Balance seeded into every new user or agent wallet.
    pub initial_wallet_balance: Amount,
    pub currency: Currency,
    /// Smallest amount accepted by the peer-to-peer transfer kinds.
    pub min_transfer_amount: Amount,
    /// Admin top-ups must be strictly above this.
    pub admin_topup_min: Amount,
    /// Admin top-ups may not exceed this.
    pub admin_topup_max: Amount,
    /// How long a transfer waits to open its unit of work.
    pub lock_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            initial_wallet_balance: Amount::units(50),
            currency: Currency::Bdt,
            min_transfer_amount: Amount::units(5),
            admin_topup_min: Amount::units(10),
            admin_topup_max: Amount::units(100_000),
            lock_timeout_ms: 5_000,
        }
    }
}

impl Settings {
    /// Load from `settings.{toml,yaml,json}` in the working directory, if any.
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("settings").required(false),
        };
        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix("LEDGER").try_parsing(true))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_wallet_balance.is_negative() {
            return Err(ConfigError::Message(
                "initial_wallet_balance must not be negative".to_string(),
            ));
        }
        if !self.min_transfer_amount.is_positive() {
            return Err(ConfigError::Message(
                "min_transfer_amount must be positive".to_string(),
            ));
        }
        if self.admin_topup_min.is_negative() || self.admin_topup_max <= self.admin_topup_min {
            return Err(ConfigError::Message(format!(
                "admin top-up range ({}, {}] is empty",
                self.admin_topup_min, self.admin_topup_max
            )));
        }
        Ok(())
    }
}
