pub mod errors;
pub mod http;

use async_trait::async_trait;

use crate::submission::types::{CarrierRequest, CarrierResponse};

pub use errors::CarrierHttpError;
pub use http::HttpCarrierGateway;

/// Abstraction over the carrier's manifest endpoint.
///
/// `Ok` means the carrier answered, whether or not it accepted the waybill;
/// the answer is interpreted by `classify`. `Err` means no usable answer was
/// received (connect/timeout/status/decode) and says nothing about whether the
/// carrier registered the waybill.
#[async_trait]
pub trait CarrierGateway: Send + Sync + 'static {
    async fn submit(&self, request: &CarrierRequest) -> anyhow::Result<CarrierResponse>;
}
