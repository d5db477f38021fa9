use std::collections::HashMap;

use reqwest::header;
use serde_json::Value;

/* API contains the logic for calling external APIs.
 * Links the bot's logic with anything it needs from the internet.
 * Called by the exchange rate handlers only.
 */

pub const RATES_API_URL_DEFAULT: &str =
    "https://cdn.jsdelivr.net/npm/@fawazahmed0/currency-api@latest/v1/currencies/{base}.json";

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("Request error: {0}")]
    RequestError(reqwest::Error),
    #[error("Rates for base currency {0} not found")]
    MissingBase(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(request_error: reqwest::Error) -> ApiError {
        ApiError::RequestError(request_error)
    }
}

// Fills in the base currency in the API URL template.
pub fn rates_url(api_url: &str, base_currency: &str) -> String {
    api_url.replace("{base}", &base_currency.to_lowercase())
}

/* Extracts all numeric rates for the base currency from an API response.
 * Non-numeric entries are skipped. Currency codes are lowercased.
 */
pub fn extract_rates(response: &Value, base_currency: &str) -> Result<HashMap<String, f64>, ApiError> {
    let base_currency = base_currency.to_lowercase();
    let conversions = response
        .get(&base_currency)
        .and_then(Value::as_object)
        .ok_or_else(|| ApiError::MissingBase(base_currency.clone()))?;

    let mut rates = HashMap::new();
    for (currency, value) in conversions {
        let Some(rate) = value.as_f64() else {
            continue;
        };
        rates.insert(currency.to_lowercase(), rate);
    }

    Ok(rates)
}

// Fetches all exchange rates relative to the base currency.
pub async fn fetch_rates(
    api_url: &str,
    base_currency: &str,
) -> Result<HashMap<String, f64>, ApiError> {
    let url = rates_url(api_url, base_currency);

    let mut h = header::HeaderMap::new();
    h.insert(
        "Accept",
        header::HeaderValue::from_static("application/json"),
    );

    let client = reqwest::Client::builder().default_headers(h).build()?;

    let response: Value = client.get(url).send().await?.json().await?;
    extract_rates(&response, base_currency)
}
