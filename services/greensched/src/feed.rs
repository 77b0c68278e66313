//! Carbon intensity feed client.
//!
//! The feed answers a plain GET with a JSON object mapping region to a
//! numeric intensity:
//!
//! ```json
//! {"eu": 50, "us": 10, "asia": 90}
//! ```
//!
//! Only the relative order of the values matters.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use greensched_carbon::CarbonIntensityTable;
use tracing::{debug, error};

use crate::error::FetchError;

/// Source of per-region carbon intensity.
#[async_trait]
pub trait CarbonIntensitySource: Send + Sync {
    /// Fetch the current table. Called once per labeling pass.
    async fn fetch(&self) -> Result<CarbonIntensityTable, FetchError>;
}

/// HTTP feed client.
pub struct HttpCarbonFeed {
    client: reqwest::Client,
    url: String,
}

impl HttpCarbonFeed {
    /// Create a new feed client. Requests only time out if `timeout` is set.
    pub fn new(url: impl Into<String>, timeout: Option<Duration>) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CarbonIntensitySource for HttpCarbonFeed {
    async fn fetch(&self) -> Result<CarbonIntensityTable, FetchError> {
        debug!(url = %self.url, "Fetching carbon intensity");

        let response = self.client.get(&self.url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Carbon intensity feed rejected request");
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        let table: CarbonIntensityTable = serde_json::from_slice(&bytes)?;
        debug!(regions = table.len(), "Fetched carbon intensity");

        Ok(table)
    }
}

/// In-memory feed for testing and development.
pub struct MockCarbonFeed {
    table: Mutex<Option<CarbonIntensityTable>>,
}

impl MockCarbonFeed {
    /// A feed that always returns `table`.
    pub fn new(table: CarbonIntensityTable) -> Self {
        Self {
            table: Mutex::new(Some(table)),
        }
    }

    /// A feed that is always unavailable.
    pub fn unavailable() -> Self {
        Self {
            table: Mutex::new(None),
        }
    }

    /// Replace the table served by later fetches.
    pub fn set(&self, table: CarbonIntensityTable) {
        *self.table.lock().unwrap_or_else(|e| e.into_inner()) = Some(table);
    }
}

#[async_trait]
impl CarbonIntensitySource for MockCarbonFeed {
    async fn fetch(&self) -> Result<CarbonIntensityTable, FetchError> {
        self.table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| FetchError::Status {
                status: 503,
                body: "mock feed unavailable".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn feed_for(server: &MockServer) -> HttpCarbonFeed {
        HttpCarbonFeed::new(format!("{}/Prod/row", server.uri()), None).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_table() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Prod/row"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"{"eu": 50, "us": 10, "asia": 90}"#, "application/json"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let table = feed_for(&server).await.fetch().await.unwrap();

        let regions: Vec<&str> = table.entries().map(|(r, _)| r).collect();
        assert_eq!(regions, vec!["eu", "us", "asia"]);
        assert_eq!(table.intensity("us"), Some(10.0));
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = feed_for(&server).await.fetch().await.unwrap_err();
        match err {
            FetchError::Status { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body, "bad gateway");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_undecodable_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"eu": "low"}"#))
            .mount(&server)
            .await;

        let err = feed_for(&server).await.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[tokio::test]
    async fn test_fetch_unreachable() {
        // Nothing listens on port 9 (discard) in the test environment.
        let feed = HttpCarbonFeed::new("http://127.0.0.1:9/row", Some(Duration::from_secs(2)))
            .unwrap();

        let err = feed.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Request(_)));
    }

    #[tokio::test]
    async fn test_mock_feed() {
        let feed = MockCarbonFeed::unavailable();
        assert!(feed.fetch().await.is_err());

        feed.set([("eu", 1.0)].into_iter().collect());
        assert_eq!(feed.fetch().await.unwrap().len(), 1);
    }
}
