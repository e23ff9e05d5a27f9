//! Best-effort model pricing lookup.
//!
//! Pricing is strictly optional decoration on the `done` frame: a
//! failed or slow lookup degrades to "no pricing data", never an error.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Budget for the lookup, applied by the encoder.
pub const PRICING_LOOKUP_TIMEOUT_MS: u64 = 250;

/// USD rates per million tokens for one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRates {
    pub model_key: String,
    pub input_per_million: Option<f64>,
    pub output_per_million: Option<f64>,
    pub reasoning_per_million: Option<f64>,
}

impl ModelRates {
    pub fn has_any_rate(&self) -> bool {
        self.input_per_million.is_some()
            || self.output_per_million.is_some()
            || self.reasoning_per_million.is_some()
    }
}

/// External pricing catalog.
#[async_trait]
pub trait PricingSource: Send + Sync {
    /// `None` on any failure; this call must never error.
    async fn lookup(&self, provider_id: &str, model_id: &str) -> Option<ModelRates>;
}

/// Default catalog endpoint (models.dev-style JSON).
pub const DEFAULT_CATALOG_URL: &str = "https://models.dev/api.json";

/// HTTP-backed pricing source with a process-lifetime catalog cache.
pub struct CatalogPricingSource {
    client: reqwest::Client,
    catalog_url: String,
    catalog: tokio::sync::OnceCell<Option<Value>>,
}

impl CatalogPricingSource {
    pub fn new(catalog_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            catalog_url: catalog_url.into(),
            catalog: tokio::sync::OnceCell::new(),
        }
    }

    async fn fetch_catalog(&self) -> Option<Value> {
        let response = self
            .client
            .get(&self.catalog_url)
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?;
        let catalog = response.json::<Value>().await.ok()?;
        debug!("Pricing catalog loaded from {}", self.catalog_url);
        Some(catalog)
    }
}

impl Default for CatalogPricingSource {
    fn default() -> Self {
        Self::new(DEFAULT_CATALOG_URL)
    }
}

/// Extract the rates for `provider/model` from a catalog document of
/// the shape `{provider: {models: {model: {cost: {input, output,
/// reasoning}}}}}`.
pub(crate) fn rates_from_catalog(
    catalog: &Value,
    provider_id: &str,
    model_id: &str,
) -> Option<ModelRates> {
    let cost = catalog
        .get(provider_id)?
        .get("models")?
        .get(model_id)?
        .get("cost")?;
    let rates = ModelRates {
        model_key: format!("{}/{}", provider_id, model_id),
        input_per_million: cost.get("input").and_then(Value::as_f64),
        output_per_million: cost.get("output").and_then(Value::as_f64),
        reasoning_per_million: cost.get("reasoning").and_then(Value::as_f64),
    };
    if rates.has_any_rate() {
        Some(rates)
    } else {
        None
    }
}

#[async_trait]
impl PricingSource for CatalogPricingSource {
    async fn lookup(&self, provider_id: &str, model_id: &str) -> Option<ModelRates> {
        let catalog = self
            .catalog
            .get_or_init(|| self.fetch_catalog())
            .await
            .as_ref()?;
        rates_from_catalog(catalog, provider_id, model_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> Value {
        json!({
            "openai": {
                "models": {
                    "gpt-4o": { "cost": { "input": 2.5, "output": 10.0 } },
                    "o3": { "cost": { "input": 2.0, "output": 8.0, "reasoning": 8.0 } },
                    "free-model": { "cost": {} }
                }
            }
        })
    }

    #[test]
    fn test_rates_from_catalog() {
        let rates = rates_from_catalog(&catalog(), "openai", "gpt-4o").unwrap();
        assert_eq!(rates.model_key, "openai/gpt-4o");
        assert_eq!(rates.input_per_million, Some(2.5));
        assert_eq!(rates.output_per_million, Some(10.0));
        assert_eq!(rates.reasoning_per_million, None);
    }

    #[test]
    fn test_unknown_model_or_provider_is_none() {
        assert!(rates_from_catalog(&catalog(), "openai", "nope").is_none());
        assert!(rates_from_catalog(&catalog(), "missing", "gpt-4o").is_none());
    }

    #[test]
    fn test_costless_entry_is_none() {
        assert!(rates_from_catalog(&catalog(), "openai", "free-model").is_none());
    }
}
