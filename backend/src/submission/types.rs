use serde::{Deserialize, Deserializer, Serialize};

use crate::pool::model::Allocation;

/// Shipment manifest as handed over by the (external) request layer.
///
/// The body is opaque to the allocation protocol; it is forwarded to the
/// carrier alongside the chosen waybill.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Client-side reference of the shipment (export reference).
    pub reference: String,
    #[serde(default)]
    pub shipment: serde_json::Value,
}

impl Manifest {
    pub fn new(reference: impl Into<String>, shipment: serde_json::Value) -> Self {
        Self {
            reference: reference.into(),
            shipment,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Submit with this waybill instead of allocating one from the pool.
    pub custom_waybill: Option<String>,
}

impl SubmitOptions {
    pub fn custom(waybill: impl Into<String>) -> Self {
        Self {
            custom_waybill: Some(waybill.into()),
        }
    }
}

/// What the carrier receives for one attempt.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CarrierRequest {
    #[serde(rename = "WaybillNo")]
    pub waybill: String,
    #[serde(rename = "RefNo")]
    pub reference: String,
    #[serde(rename = "ManifestShipmentDetails")]
    pub shipment: serde_json::Value,
}

impl CarrierRequest {
    pub fn new(waybill: &str, manifest: &Manifest) -> Self {
        Self {
            waybill: waybill.to_string(),
            reference: manifest.reference.clone(),
            shipment: manifest.shipment.clone(),
        }
    }
}

/// Structured carrier result for one attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct CarrierResponse {
    #[serde(rename = "WaybillNo", default)]
    pub identifier_echo: Option<String>,
    #[serde(rename = "BookingRefNo", default)]
    pub booking_reference: Option<String>,
    #[serde(rename = "HasError", default, deserialize_with = "de_flag")]
    pub has_error: bool,
    #[serde(rename = "Message", default)]
    pub message: String,
}

impl CarrierResponse {
    pub fn accepted(echo: &str, booking: &str) -> Self {
        Self {
            identifier_echo: Some(echo.to_string()),
            booking_reference: Some(booking.to_string()),
            has_error: false,
            message: String::new(),
        }
    }

    pub fn rejected(message: &str) -> Self {
        Self {
            has_error: true,
            message: message.to_string(),
            ..Self::default()
        }
    }
}

/// The carrier reports `HasError` either as a JSON bool or as the string "true"/"false".
fn de_flag<'de, D>(d: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Flag::deserialize(d)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => s.trim().eq_ignore_ascii_case("true"),
    })
}

/// Successful submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubmissionReceipt {
    pub trace_id: String,
    /// Waybill the carrier accepted.
    pub waybill: String,
    /// Pool record backing the waybill; `None` for custom waybills.
    pub allocation: Option<Allocation>,
    pub carrier_waybill: Option<String>,
    pub booking_reference: Option<String>,
    pub message: String,
    /// Carrier submissions made, including the accepted one.
    pub attempts: u32,
    /// Codes the carrier already knew; reconciled as consumed.
    pub conflicted: Vec<String>,
    /// Codes abandoned after the carrier's transient save defect.
    pub skipped: Vec<String>,
}
