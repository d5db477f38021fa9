use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use teloxide::prelude::*;

use crate::bot::{
    api::fetch_rates,
    config::RatesConfig,
    parser::Invocation,
    store::{is_empty, run_blocking, KeyValueStore, StoreError},
    BotError, HandlerResult,
};

use super::utils::{parse_amount, send_bot_message, HandlerContext};

/* Exchange rate commands.
 * Rates are cached in the "rates" namespace as currency code -> rate against the base currency.
 * The "rates_meta" namespace records which base the cache holds and when it was fetched.
 * The cache is refreshed on demand once it is empty, for another base, or older than the TTL.
 * A refresh replaces the whole "rates" namespace, so codes the new response lacks are gone.
 * Two handlers refreshing at once is harmless, the last write wins.
 * Handlers reach the store through run_blocking, never from a runtime worker directly.
 */

pub const RATES_NAMESPACE: &str = "rates";
pub const RATES_META_NAMESPACE: &str = "rates_meta";

const FETCHED_AT_KEY: &str = "fetched_at";
const BASE_KEY: &str = "base";

const XCHG_USAGE: &str = "Usage: /xchg <amount> <from> <to>, e.g. /xchg 100 sgd usd";

#[derive(Debug, PartialEq)]
pub enum Conversion {
    Converted(f64),
    UnknownCurrency(String),
}

#[derive(Debug, PartialEq)]
pub struct RatesSummary {
    pub count: usize,
    pub base: Option<String>,
    pub fetched_at: Option<String>,
}

/* Exchange command.
 * Converts an amount between two currencies using the cached rates.
 */
pub async fn action_exchange(ctx: HandlerContext, invocation: Invocation<Message>) -> HandlerResult {
    let msg = &invocation.raw;
    let [amount, from, to] = match invocation.args.as_slice() {
        [amount, from, to, ..] => [amount, from, to],
        _ => {
            send_bot_message(&ctx.bot, msg, XCHG_USAGE.to_string()).await?;
            return Ok(());
        }
    };

    let amount = parse_amount(amount)?;
    ensure_rates(Arc::clone(&ctx.store), &ctx.rates).await?;

    let (from_code, to_code) = (from.clone(), to.clone());
    let conversion = run_blocking(Arc::clone(&ctx.store), move |store| {
        convert(store, amount, &from_code, &to_code)
    })
    .await?;

    let reply = match conversion {
        Conversion::Converted(result) => format!(
            "{amount} {} = {result:.2} {}",
            from.to_uppercase(),
            to.to_uppercase()
        ),
        Conversion::UnknownCurrency(code) => format!("Unknown currency: {code}"),
    };

    send_bot_message(&ctx.bot, msg, reply).await
}

/* Retrieve command.
 * Makes sure the cache is filled, then walks every cached rate and reports a summary.
 */
pub async fn action_retrieve(ctx: HandlerContext, invocation: Invocation<Message>) -> HandlerResult {
    ensure_rates(Arc::clone(&ctx.store), &ctx.rates).await?;

    let summary = run_blocking(Arc::clone(&ctx.store), summarize_rates).await?;
    let base = summary
        .base
        .map(|base| base.to_uppercase())
        .unwrap_or_else(|| "an unknown base".to_string());
    let fetched_at = summary.fetched_at.unwrap_or_else(|| "an unknown time".to_string());

    send_bot_message(
        &ctx.bot,
        &invocation.raw,
        format!(
            "Cached {} exchange rates against {base}, fetched at {fetched_at}.",
            summary.count
        ),
    )
    .await
}

/* Utilities */

// Checks if the cached rates need to be fetched again.
pub fn rates_are_stale(
    store: &dyn KeyValueStore,
    config: &RatesConfig,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    if is_empty(store, RATES_NAMESPACE)? {
        return Ok(true);
    }

    match store.get(RATES_META_NAMESPACE, BASE_KEY)? {
        Some(base) if base == config.base_currency => {}
        _ => return Ok(true),
    }

    let fetched_at = match store.get(RATES_META_NAMESPACE, FETCHED_AT_KEY)? {
        Some(fetched_at) => fetched_at,
        None => return Ok(true),
    };

    match DateTime::parse_from_rfc3339(&fetched_at) {
        Ok(fetched_at) => Ok(now.signed_duration_since(fetched_at) > config.ttl),
        Err(_) => Ok(true),
    }
}

// Replaces the cached rates and their metadata with a fresh fetch.
pub fn save_rates(
    store: &dyn KeyValueStore,
    base_currency: &str,
    rates: &HashMap<String, f64>,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    store.clear(RATES_NAMESPACE)?;
    for (currency, rate) in rates {
        store.put(RATES_NAMESPACE, currency, &rate.to_string())?;
    }
    store.put(RATES_META_NAMESPACE, BASE_KEY, base_currency)?;
    store.put(RATES_META_NAMESPACE, FETCHED_AT_KEY, &now.to_rfc3339())?;
    Ok(())
}

// Fetches and saves rates if the cache is stale.
pub async fn ensure_rates(store: Arc<dyn KeyValueStore>, config: &RatesConfig) -> HandlerResult {
    let stale_config = config.clone();
    let stale = run_blocking(Arc::clone(&store), move |store| {
        rates_are_stale(store, &stale_config, Utc::now())
    })
    .await?;
    if !stale {
        return Ok(());
    }

    log::info!(
        "Exchange - Refreshing rates for base currency {}",
        config.base_currency
    );
    let rates = fetch_rates(&config.api_url, &config.base_currency).await?;
    let count = rates.len();
    let base_currency = config.base_currency.clone();
    run_blocking(store, move |store| {
        save_rates(store, &base_currency, &rates, Utc::now())
    })
    .await?;
    log::info!("Exchange - Saved {} rates", count);

    Ok(())
}

// Reads one cached rate. A value that is not a number is an error.
fn lookup_rate(store: &dyn KeyValueStore, currency: &str) -> Result<Option<f64>, BotError> {
    match store.get(RATES_NAMESPACE, currency)? {
        Some(value) => Ok(Some(value.parse::<f64>()?)),
        None => Ok(None),
    }
}

// Converts an amount between two currencies through the base currency.
pub fn convert(
    store: &dyn KeyValueStore,
    amount: f64,
    from: &str,
    to: &str,
) -> Result<Conversion, BotError> {
    let from = from.to_lowercase();
    let to = to.to_lowercase();

    let from_rate = match lookup_rate(store, &from)? {
        Some(rate) if rate > 0.0 => rate,
        _ => return Ok(Conversion::UnknownCurrency(from.to_uppercase())),
    };
    let to_rate = match lookup_rate(store, &to)? {
        Some(rate) => rate,
        None => return Ok(Conversion::UnknownCurrency(to.to_uppercase())),
    };

    Ok(Conversion::Converted(amount / from_rate * to_rate))
}

// Walks all cached rates, logging each one. Fails on the first corrupt value.
pub fn summarize_rates(store: &dyn KeyValueStore) -> Result<RatesSummary, BotError> {
    let mut entries: Vec<(String, String)> = Vec::new();
    store.for_each(RATES_NAMESPACE, &mut |key, value| {
        entries.push((key.to_string(), value.to_string()))
    })?;

    for (currency, value) in &entries {
        let rate = value.parse::<f64>()?;
        log::info!("Exchange - Cached rate {}={}", currency, rate);
    }

    Ok(RatesSummary {
        count: entries.len(),
        base: store.get(RATES_META_NAMESPACE, BASE_KEY)?,
        fetched_at: store.get(RATES_META_NAMESPACE, FETCHED_AT_KEY)?,
    })
}

// Tests
#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use chrono::{Duration, TimeZone, Utc};

    use super::{
        convert, ensure_rates, rates_are_stale, save_rates, summarize_rates, Conversion, RatesSummary,
        RATES_META_NAMESPACE, RATES_NAMESPACE,
    };
    use crate::bot::{
        config::RatesConfig,
        store::{ensure_namespaces, KeyValueStore, MemoryStore},
        BotError,
    };

    fn new_store() -> MemoryStore {
        let store = MemoryStore::new();
        ensure_namespaces(&store, &[RATES_NAMESPACE, RATES_META_NAMESPACE]).unwrap();
        store
    }

    fn sample_rates() -> HashMap<String, f64> {
        HashMap::from([
            ("usd".to_string(), 1.0),
            ("sgd".to_string(), 1.25),
            ("eur".to_string(), 0.5),
        ])
    }

    #[test]
    fn test_rates_are_stale() {
        let store = new_store();
        let config = RatesConfig::default();
        let fetched = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();

        // Empty cache
        assert!(rates_are_stale(&store, &config, fetched).unwrap());

        save_rates(&store, "usd", &sample_rates(), fetched).unwrap();
        assert!(!rates_are_stale(&store, &config, fetched + Duration::hours(1)).unwrap());
        assert!(rates_are_stale(&store, &config, fetched + Duration::hours(13)).unwrap());

        // Cache holds another base currency
        let sgd_config = RatesConfig {
            base_currency: "sgd".to_string(),
            ..RatesConfig::default()
        };
        assert!(rates_are_stale(&store, &sgd_config, fetched).unwrap());

        // Unreadable timestamp
        store
            .put(RATES_META_NAMESPACE, "fetched_at", "yesterday")
            .unwrap();
        assert!(rates_are_stale(&store, &config, fetched).unwrap());
    }

    #[tokio::test]
    async fn test_ensure_rates_keeps_fresh_cache() {
        let store = Arc::new(new_store());
        save_rates(store.as_ref(), "usd", &sample_rates(), Utc::now()).unwrap();

        // Fresh rates for the configured base, so nothing is fetched
        let config = RatesConfig {
            api_url: "http://127.0.0.1:9/{base}.json".to_string(),
            ..RatesConfig::default()
        };
        assert!(ensure_rates(store.clone(), &config).await.is_ok());
        assert_eq!(summarize_rates(store.as_ref()).unwrap().count, 3);
    }

    #[test]
    fn test_convert() {
        let store = new_store();
        save_rates(&store, "usd", &sample_rates(), Utc::now()).unwrap();

        assert_eq!(
            convert(&store, 100.0, "SGD", "eur").unwrap(),
            Conversion::Converted(40.0)
        );
        assert_eq!(
            convert(&store, 10.0, "usd", "usd").unwrap(),
            Conversion::Converted(10.0)
        );
        assert_eq!(
            convert(&store, 10.0, "xyz", "usd").unwrap(),
            Conversion::UnknownCurrency("XYZ".to_string())
        );
        assert_eq!(
            convert(&store, 10.0, "usd", "").unwrap(),
            Conversion::UnknownCurrency("".to_string())
        );
    }

    #[test]
    fn test_save_rates_replaces_old_base() {
        let store = new_store();
        let fetched = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let usd_rates = HashMap::from([
            ("usd".to_string(), 1.0),
            ("sgd".to_string(), 1.35),
            ("xyz".to_string(), 100.0),
        ]);
        save_rates(&store, "usd", &usd_rates, fetched).unwrap();
        assert_eq!(
            convert(&store, 1.0, "usd", "xyz").unwrap(),
            Conversion::Converted(100.0)
        );

        // The sgd response no longer lists xyz
        let sgd_rates = HashMap::from([("sgd".to_string(), 1.0), ("usd".to_string(), 0.74)]);
        save_rates(&store, "sgd", &sgd_rates, fetched + Duration::hours(1)).unwrap();

        assert_eq!(
            convert(&store, 1.0, "sgd", "xyz").unwrap(),
            Conversion::UnknownCurrency("XYZ".to_string())
        );
        assert_eq!(
            convert(&store, 1.0, "sgd", "usd").unwrap(),
            Conversion::Converted(0.74)
        );
        assert_eq!(
            summarize_rates(&store).unwrap(),
            RatesSummary {
                count: 2,
                base: Some("sgd".to_string()),
                fetched_at: Some((fetched + Duration::hours(1)).to_rfc3339()),
            }
        );
    }

    #[test]
    fn test_convert_corrupt_rate() {
        let store = new_store();
        store.put(RATES_NAMESPACE, "usd", "1").unwrap();
        store.put(RATES_NAMESPACE, "sgd", "one point three").unwrap();

        assert!(matches!(
            convert(&store, 10.0, "usd", "sgd"),
            Err(BotError::ParseError(_))
        ));
    }

    #[test]
    fn test_summarize_rates() {
        let store = new_store();
        let fetched = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        save_rates(&store, "usd", &sample_rates(), fetched).unwrap();

        assert_eq!(
            summarize_rates(&store).unwrap(),
            RatesSummary {
                count: 3,
                base: Some("usd".to_string()),
                fetched_at: Some(fetched.to_rfc3339()),
            }
        );

        store.put(RATES_NAMESPACE, "jpy", "NaN-ish").unwrap();
        assert!(matches!(
            summarize_rates(&store),
            Err(BotError::ParseError(_))
        ));
    }
}
