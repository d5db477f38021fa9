use std::env;

use chrono::Duration;

use super::{api::RATES_API_URL_DEFAULT, redis::REDIS_URL_DEFAULT};

/* Config is read from the environment once at start-up, after .env is loaded.
 * The bot token itself is read by teloxide (TELOXIDE_TOKEN).
 */

const STORE_URL: &str = "STORE_URL";
const RATES_API_URL: &str = "RATES_API_URL";
const RATES_BASE_CURRENCY: &str = "RATES_BASE_CURRENCY";
const RATES_TTL_HOURS: &str = "RATES_TTL_HOURS";

const RATES_BASE_CURRENCY_DEFAULT: &str = "usd";
const RATES_TTL_HOURS_DEFAULT: i64 = 12;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RatesConfig {
    pub api_url: String,
    pub base_currency: String,
    pub ttl: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub store_url: String,
    pub rates: RatesConfig,
}

impl Default for RatesConfig {
    fn default() -> Self {
        RatesConfig {
            api_url: RATES_API_URL_DEFAULT.to_string(),
            base_currency: RATES_BASE_CURRENCY_DEFAULT.to_string(),
            ttl: Duration::hours(RATES_TTL_HOURS_DEFAULT),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            store_url: REDIS_URL_DEFAULT.to_string(),
            rates: RatesConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|key| env::var(key).ok())
    }

    // Builds the config from any key lookup, unset keys fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
        let defaults = Config::default();

        let ttl = match lookup(RATES_TTL_HOURS) {
            Some(value) => parse_hours(RATES_TTL_HOURS, &value)?,
            None => defaults.rates.ttl,
        };

        let base_currency = match lookup(RATES_BASE_CURRENCY) {
            Some(value) if value.trim().is_empty() => {
                return Err(ConfigError::InvalidValue {
                    key: RATES_BASE_CURRENCY.to_string(),
                    value,
                })
            }
            Some(value) => value.trim().to_lowercase(),
            None => defaults.rates.base_currency,
        };

        Ok(Config {
            store_url: lookup(STORE_URL).unwrap_or(defaults.store_url),
            rates: RatesConfig {
                api_url: lookup(RATES_API_URL).unwrap_or(defaults.rates.api_url),
                base_currency,
                ttl,
            },
        })
    }
}

fn parse_hours(key: &str, value: &str) -> Result<Duration, ConfigError> {
    match value.trim().parse::<i64>() {
        Ok(hours) if hours >= 0 => Ok(Duration::hours(hours)),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
