use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use crate::submission::carrier::CarrierGateway;
use crate::submission::carrier::errors::CarrierHttpError;
use crate::submission::types::{CarrierRequest, CarrierResponse};

/// JSON-over-HTTP carrier gateway.
#[derive(Clone)]
pub struct HttpCarrierGateway {
    http: Client,
    url: String,
}

impl HttpCarrierGateway {
    pub fn new(url: String, timeout: Duration) -> Result<Self, CarrierHttpError> {
        if url.trim().is_empty() {
            return Err(CarrierHttpError::MissingEndpoint);
        }

        let http = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self { http, url })
    }

    #[instrument(
        skip(self, request),
        fields(waybill = %request.waybill, reference = %request.reference),
        level = "debug"
    )]
    pub async fn post_manifest(
        &self,
        request: &CarrierRequest,
    ) -> Result<CarrierResponse, CarrierHttpError> {
        let resp = self
            .http
            .post(&self.url)
            .json(request)
            .send()
            .await?
            .error_for_status()?;

        let body = resp.bytes().await?;
        let parsed: CarrierResponse = serde_json::from_slice(&body)?;

        debug!(
            has_error = parsed.has_error,
            carrier_message = %parsed.message,
            booking = ?parsed.booking_reference,
            "carrier response received"
        );

        Ok(parsed)
    }
}

#[async_trait]
impl CarrierGateway for HttpCarrierGateway {
    async fn submit(&self, request: &CarrierRequest) -> anyhow::Result<CarrierResponse> {
        Ok(self.post_manifest(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_endpoint_is_rejected() {
        let err = HttpCarrierGateway::new("  ".into(), Duration::from_secs(1))
            .err()
            .expect("empty endpoint must fail");
        assert!(matches!(err, CarrierHttpError::MissingEndpoint));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let gw = HttpCarrierGateway::new(
            "http://127.0.0.1:9/manifest".into(),
            Duration::from_millis(500),
        )
        .unwrap();

        let req = CarrierRequest {
            waybill: "1".into(),
            reference: "R".into(),
            shipment: serde_json::Value::Null,
        };

        let err = gw.submit(&req).await.unwrap_err();
        assert!(err.downcast_ref::<CarrierHttpError>().is_some());
    }
}
