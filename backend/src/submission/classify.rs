use std::fmt;

use serde::Serialize;

use crate::submission::types::CarrierResponse;

/// Carrier phrase for a waybill it already has on record.
pub const CONFLICT_PHRASE: &str = "waybill already exists";

/// Carrier phrase for its known save defect (code 120). The waybill is not
/// registered and is not reusable either.
pub const TRANSIENT_DEFECT_PHRASE: &str =
    "an error happen when saving the waybill details code : 120";

/// How the orchestrator must react to a carrier response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CarrierVerdict {
    Accepted,
    /// Carrier-side duplicate: reconcile the waybill and try a fresh one.
    Conflict,
    /// Known carrier defect: abandon the waybill and try a fresh one.
    TransientDefect,
    /// Anything else the carrier rejects.
    Terminal,
}

impl CarrierVerdict {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Conflict | Self::TransientDefect)
    }
}

impl fmt::Display for CarrierVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Accepted => "accepted",
            Self::Conflict => "conflict",
            Self::TransientDefect => "transient_defect",
            Self::Terminal => "terminal",
        })
    }
}

pub fn classify(resp: &CarrierResponse) -> CarrierVerdict {
    if !resp.has_error {
        return CarrierVerdict::Accepted;
    }

    let message = resp.message.to_lowercase();
    if message.contains(CONFLICT_PHRASE) {
        CarrierVerdict::Conflict
    } else if message.contains(TRANSIENT_DEFECT_PHRASE) {
        CarrierVerdict::TransientDefect
    } else {
        CarrierVerdict::Terminal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_error_is_accepted_whatever_the_message() {
        let mut r = CarrierResponse::accepted("1", "B");
        r.message = "Waybill already exists".into();
        assert_eq!(classify(&r), CarrierVerdict::Accepted);
    }

    #[test]
    fn known_phrases_are_recognised() {
        assert_eq!(
            classify(&CarrierResponse::rejected("Waybill Already Exists for client 123")),
            CarrierVerdict::Conflict
        );
        assert_eq!(
            classify(&CarrierResponse::rejected(
                "An error happen when saving the waybill details Code : 120"
            )),
            CarrierVerdict::TransientDefect
        );
    }

    #[test]
    fn other_errors_are_terminal() {
        assert_eq!(
            classify(&CarrierResponse::rejected("Invalid City Code")),
            CarrierVerdict::Terminal
        );
        assert_eq!(
            classify(&CarrierResponse::rejected("")),
            CarrierVerdict::Terminal
        );
        assert!(!CarrierVerdict::Terminal.is_retryable());
        assert!(CarrierVerdict::TransientDefect.is_retryable());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn flip_case(s: &str, mask: &[bool]) -> String {
        s.chars()
            .zip(mask.iter().cycle())
            .map(|(c, up)| if *up { c.to_ascii_uppercase() } else { c })
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]
        #[test]
        fn conflict_detection_ignores_case_and_surroundings(
            prefix in "[a-zA-Z0-9 .:]{0,24}",
            suffix in "[a-zA-Z0-9 .:]{0,24}",
            mask in prop::collection::vec(any::<bool>(), 1..16),
        ) {
            let msg = format!("{prefix}{}{suffix}", flip_case(CONFLICT_PHRASE, &mask));
            prop_assert_eq!(classify(&CarrierResponse::rejected(&msg)), CarrierVerdict::Conflict);
        }

        #[test]
        fn accepted_never_depends_on_message(msg in ".{0,64}") {
            let mut r = CarrierResponse::accepted("1", "B");
            r.message = msg;
            prop_assert_eq!(classify(&r), CarrierVerdict::Accepted);
        }

        #[test]
        fn errors_without_known_phrases_are_terminal(msg in "[a-z0-9 ]{0,64}") {
            prop_assume!(!msg.contains(CONFLICT_PHRASE));
            prop_assume!(!msg.contains(TRANSIENT_DEFECT_PHRASE));
            prop_assert_eq!(classify(&CarrierResponse::rejected(&msg)), CarrierVerdict::Terminal);
        }
    }
}
