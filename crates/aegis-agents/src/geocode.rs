//! Free-text geocoding over HTTP: `GET <url>?q=<address>` answering
//! `{lat, lng}` or `null`.

use std::time::Duration;

use async_trait::async_trait;
use coordination::geo::GeoPoint;
use coordination::intake::Geocoder;

#[derive(Debug, Clone)]
pub struct HttpGeocoder {
    url: String,
    client: reqwest::Client,
}

impl HttpGeocoder {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    async fn lookup(&self, address: &str) -> Result<Option<GeoPoint>, reqwest::Error> {
        self.client
            .get(&self.url)
            .query(&[("q", address)])
            .send()
            .await?
            .error_for_status()?
            .json::<Option<GeoPoint>>()
            .await
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    /// Lookup failures are logged and treated as "not found".
    async fn geocode(&self, address: &str) -> Option<GeoPoint> {
        match self.lookup(address).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(%address, error = %e, "Geocoder request failed");
                None
            }
        }
    }
}
