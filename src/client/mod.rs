//! Rate-limited client for the upstream price API.
//!
//! Every price call goes through [`MarketClient::get_throttled`], which feeds
//! the shared [`Backoff`]: a 429 extends it, a fully decoded 2xx clears it,
//! and transport/status/decode failures leave it alone. Callers are expected
//! to `backoff().wait(..)` before each call.

pub mod backoff;
pub mod responses;

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::types::HistoryPeriod;

pub use backoff::Backoff;
pub use responses::{CatalogEntry, HistoryPoint, LatestPrice};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct MarketClient {
    http: reqwest::Client,
    price_api_url: String,
    catalog_url: String,
    backoff: Arc<Backoff>,
}

impl MarketClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.http_timeout)
            .build()?;

        Ok(Self {
            http,
            price_api_url: cfg.price_api_url.trim_end_matches('/').to_string(),
            catalog_url: cfg.catalog_url.clone(),
            backoff: Arc::new(Backoff::new()),
        })
    }

    pub fn backoff(&self) -> &Arc<Backoff> {
        &self.backoff
    }

    /// Current prices for the whole catalog in one call.
    pub async fn fetch_latest_prices(&self) -> std::result::Result<Vec<LatestPrice>, FetchError> {
        let url = format!("{}/prices/latest", self.price_api_url);
        self.get_throttled(&url).await
    }

    pub async fn fetch_item_price(&self, item_id: i64) -> std::result::Result<LatestPrice, FetchError> {
        let url = format!("{}/prices/latest/{}", self.price_api_url, item_id);
        self.get_throttled(&url).await
    }

    pub async fn fetch_history(
        &self,
        item_id: i64,
        period: HistoryPeriod,
    ) -> std::result::Result<Vec<HistoryPoint>, FetchError> {
        let url = format!(
            "{}/prices/history/{}?period={}",
            self.price_api_url,
            item_id,
            period.as_str()
        );
        self.get_throttled(&url).await
    }

    /// Full tradeable-item list. The catalog API sits outside the price API's
    /// rate budget, so this never touches the backoff.
    pub async fn fetch_catalog(&self) -> std::result::Result<Vec<CatalogEntry>, FetchError> {
        let resp = self.http.get(&self.catalog_url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn get_throttled<T: DeserializeOwned>(&self, url: &str) -> std::result::Result<T, FetchError> {
        debug!(url, "upstream GET");
        let resp = self.http.get(url).send().await?;
        let status = resp.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            self.backoff.on_rate_limited(retry_after);
            return Err(FetchError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = resp.text().await?;
        let parsed = serde_json::from_str(&body)?;
        self.backoff.on_success();
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> MarketClient {
        MarketClient::new(&Config::for_tests(&server.uri())).unwrap()
    }

    #[tokio::test]
    async fn bulk_prices_decode_and_clear_backoff() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prices/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"item_id": 1001, "sell_price": 100, "sell_volume": 4, "buy_price": 90, "buy_volume": 2},
                    {"item_id": 1002}]"#,
            ))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client.backoff().on_rate_limited(None);

        let prices = client.fetch_latest_prices().await.unwrap();
        assert_eq!(prices.len(), 2);
        assert_eq!(prices[0].sell_price, 100);
        assert_eq!(prices[1].buy_price, 0);
        assert_eq!(client.backoff().current_duration(), Duration::ZERO);
    }

    #[tokio::test]
    async fn throttle_without_hint_sets_and_doubles_backoff() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prices/latest/7"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.fetch_item_price(7).await.unwrap_err();
        assert!(matches!(err, FetchError::RateLimited { retry_after: None }));
        assert_eq!(client.backoff().current_duration(), Duration::from_secs(30));

        let _ = client.fetch_item_price(7).await;
        assert_eq!(client.backoff().current_duration(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn throttle_hint_is_honoured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prices/history/7"))
            .and(query_param("period", "30d"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "12"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.fetch_history(7, HistoryPeriod::Month).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(12)
        ));
        assert_eq!(client.backoff().current_duration(), Duration::from_secs(12));
    }

    #[tokio::test]
    async fn malformed_and_failed_responses_leave_backoff_alone() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prices/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/prices/latest/9"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client.backoff().on_rate_limited(None);

        let err = client.fetch_latest_prices().await.unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
        let err = client.fetch_item_price(9).await.unwrap_err();
        assert!(matches!(err, FetchError::Status(s) if s == StatusCode::SERVICE_UNAVAILABLE));

        assert_eq!(client.backoff().current_duration(), Duration::from_secs(30));
    }
}
