use async_trait::async_trait;

use crate::errors::FeedError;

/// External collaborator supplying the fiat spot price of the reference
/// asset. Implementations should not silently degrade to zero; failures
/// surface as [`FeedError`] and become `ReferencePriceUnavailable` upstream.
#[async_trait]
pub trait SpotPriceFeed: Send + Sync {
    async fn usd_price(&self) -> Result<f64, FeedError>;
}

/// CoinGecko-backed spot price feed for the reference asset.
#[derive(Debug, Clone)]
pub struct CoinGeckoFeed {
    client: reqwest::Client,
    base_url: String,
    asset_id: String,
}

impl CoinGeckoFeed {
    pub fn new(asset_id: impl Into<String>) -> CoinGeckoFeed {
        CoinGeckoFeed {
            client: reqwest::Client::new(),
            base_url: "https://api.coingecko.com".to_string(),
            asset_id: asset_id.into(),
        }
    }

    /// Points the feed at a different endpoint, e.g. a mock server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> CoinGeckoFeed {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl SpotPriceFeed for CoinGeckoFeed {
    async fn usd_price(&self) -> Result<f64, FeedError> {
        let url = format!(
            "{}/api/v3/simple/price?ids={}&vs_currencies=usd",
            self.base_url, self.asset_id
        );

        let response = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await?;

        response
            .get(&self.asset_id)
            .and_then(|asset| asset.get("usd"))
            .and_then(serde_json::Value::as_f64)
            .ok_or(FeedError::MalformedResponse)
    }
}

/// Constant-rate feed for tests and offline use.
#[derive(Debug, Clone, Copy)]
pub struct FixedSpotPriceFeed(pub f64);

#[async_trait]
impl SpotPriceFeed for FixedSpotPriceFeed {
    async fn usd_price(&self) -> Result<f64, FeedError> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_fixed_feed() {
        let feed = FixedSpotPriceFeed(3100.25);
        assert_eq!(feed.usd_price().await.unwrap(), 3100.25);
    }
}
