use serde::Serialize;
use thiserror::Error;

use crate::submission::classify::CarrierVerdict;

/// Allocation-layer failures. Exhaustion and misconfiguration carry enough
/// structure for a caller to tell "add more waybills" apart from "store is down".
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("WAYBILL_LIMIT_REACHED: all {total} waybills are used for vendor {vendor}, series {series}")]
    Exhausted {
        vendor: String,
        series: String,
        total: u64,
        used: u64,
    },

    #[error("no waybill numbers configured for vendor {vendor}, series {series}")]
    NotConfigured { vendor: String, series: String },

    #[error("waybill store unavailable: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// Terminal outcomes of a submission.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("no waybills available: all {total} waybills are used for {vendor}/{series}")]
    PoolExhausted {
        vendor: String,
        series: String,
        total: u64,
        used: u64,
        attempts: u32,
    },

    #[error("no waybills available: pool {vendor}/{series} is not configured")]
    PoolNotConfigured {
        vendor: String,
        series: String,
        attempts: u32,
    },

    #[error("waybill store unavailable after {store_attempts} tries: {reason}")]
    StoreUnavailable {
        /// Takes tried against the store for the failing allocation.
        store_attempts: u32,
        attempts: u32,
        reason: String,
    },

    #[error("carrier rejected waybill {waybill}: {message}")]
    CarrierTerminal {
        waybill: String,
        message: String,
        /// Whether the waybill went back to the pool.
        released: bool,
        attempts: u32,
    },

    #[error("custom waybill {waybill} rejected by carrier ({verdict}): {message}")]
    CustomIdentifierRejected {
        waybill: String,
        verdict: CarrierVerdict,
        message: String,
    },

    #[error("retry safety limit reached after {attempts} attempts (limit {limit}, last verdict {last_verdict})")]
    RetrySafetyLimitExceeded {
        attempts: u32,
        limit: u32,
        last_verdict: CarrierVerdict,
    },

    #[error("carrier unreachable for waybill {waybill} after {transport_attempts} tries: {reason}")]
    TransportFailure {
        waybill: String,
        attempts: u32,
        /// Deliveries tried for the last waybill.
        transport_attempts: u32,
        reason: String,
        released: bool,
    },
}

impl SubmitError {
    /// Stable machine-readable code for callers and the journal.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PoolExhausted { .. } => "POOL_EXHAUSTED",
            Self::PoolNotConfigured { .. } => "POOL_NOT_CONFIGURED",
            Self::StoreUnavailable { .. } => "STORE_UNAVAILABLE",
            Self::CarrierTerminal { .. } => "CARRIER_ERROR",
            Self::CustomIdentifierRejected { .. } => "CUSTOM_WAYBILL_REJECTED",
            Self::RetrySafetyLimitExceeded { .. } => "RETRY_SAFETY_LIMIT",
            Self::TransportFailure { .. } => "TRANSPORT_FAILURE",
        }
    }

    /// Carrier submissions made for the request before it failed.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::PoolExhausted { attempts, .. }
            | Self::PoolNotConfigured { attempts, .. }
            | Self::StoreUnavailable { attempts, .. }
            | Self::CarrierTerminal { attempts, .. }
            | Self::RetrySafetyLimitExceeded { attempts, .. }
            | Self::TransportFailure { attempts, .. } => *attempts,
            Self::CustomIdentifierRejected { .. } => 1,
        }
    }

    pub fn waybill(&self) -> Option<&str> {
        match self {
            Self::CarrierTerminal { waybill, .. }
            | Self::CustomIdentifierRejected { waybill, .. }
            | Self::TransportFailure { waybill, .. } => Some(waybill.as_str()),
            _ => None,
        }
    }

    pub fn payload(&self) -> FailurePayload {
        FailurePayload::from(self)
    }
}

/// Caller-facing failure body. Never carries a backtrace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailurePayload {
    pub success: bool,
    pub error: &'static str,
    pub message: String,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waybill: Option<String>,
}

impl From<&SubmitError> for FailurePayload {
    fn from(e: &SubmitError) -> Self {
        let safety_limit = match e {
            SubmitError::RetrySafetyLimitExceeded { limit, .. } => Some(*limit),
            _ => None,
        };

        // Carrier messages are surfaced verbatim.
        let message = match e {
            SubmitError::CarrierTerminal { message, .. } => message.clone(),
            other => other.to_string(),
        };

        Self {
            success: false,
            error: e.kind(),
            message,
            attempts: e.attempts(),
            safety_limit,
            waybill: e.waybill().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carrier_message_is_surfaced_verbatim() {
        let e = SubmitError::CarrierTerminal {
            waybill: "1000".into(),
            message: "Invalid consignee phone".into(),
            released: true,
            attempts: 1,
        };

        let p = e.payload();
        assert_eq!(p.error, "CARRIER_ERROR");
        assert_eq!(p.message, "Invalid consignee phone");
        assert_eq!(p.waybill.as_deref(), Some("1000"));
        assert!(!p.success);
    }

    #[test]
    fn safety_limit_payload_reports_counts() {
        let e = SubmitError::RetrySafetyLimitExceeded {
            attempts: 50,
            limit: 50,
            last_verdict: CarrierVerdict::Conflict,
        };

        let json = serde_json::to_value(e.payload()).unwrap();
        assert_eq!(json["error"], "RETRY_SAFETY_LIMIT");
        assert_eq!(json["attempts"], 50);
        assert_eq!(json["safety_limit"], 50);
        assert!(json.get("waybill").is_none());
    }

    #[test]
    fn exhaustion_is_distinct_from_store_outage() {
        let exhausted = SubmitError::PoolExhausted {
            vendor: "NAQUEL".into(),
            series: "PRIME".into(),
            total: 3,
            used: 3,
            attempts: 0,
        };
        let outage = SubmitError::StoreUnavailable {
            store_attempts: 10,
            attempts: 2,
            reason: "connection refused".into(),
        };

        assert_ne!(exhausted.kind(), outage.kind());
        assert_eq!(exhausted.attempts(), 0);
        // Store retries are not carrier submissions.
        assert_eq!(outage.attempts(), 2);
        assert!(outage.to_string().contains("after 10 tries"));
    }

    #[test]
    fn transport_failure_keeps_both_counts() {
        let e = SubmitError::TransportFailure {
            waybill: "W9".into(),
            attempts: 3,
            transport_attempts: 10,
            reason: "connection refused".into(),
            released: true,
        };

        let json = serde_json::to_value(e.payload()).unwrap();
        assert_eq!(json["attempts"], 3);
        assert!(json["message"].as_str().unwrap().contains("after 10 tries"));
    }
}
