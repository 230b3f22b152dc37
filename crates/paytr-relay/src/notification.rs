//! Notification data model: the gateway's POST fields, their normalized form,
//! and the amount conversions shared by the resolver and the notifier.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::RelayError;
use crate::signature;

/// Final result of a payment attempt, normalized from the gateway status token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    /// Normalize a gateway status token. Anything not recognised as success
    /// is a failure.
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_lowercase().as_str() {
            "success" | "successful" | "1" | "true" | "basarili" | "başarılı" => Outcome::Success,
            _ => Outcome::Failure,
        }
    }

    /// Status string used by the downstream order system.
    pub fn order_status(self) -> &'static str {
        match self {
            Outcome::Success => "completed",
            Outcome::Failure => "failed",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Convert minor currency units (kuruş) to major units, rounding half up.
pub fn minor_to_major(minor: u64) -> u64 {
    minor.saturating_add(50) / 100
}

/// Parse an amount in minor units as the gateway sends it.
pub fn parse_minor_units(token: &str) -> Option<u64> {
    token.trim().parse().ok()
}

/// Notification fields exactly as posted by the gateway, form- or JSON-encoded.
///
/// Every field is optional here; [`CallbackNotification::try_from`] decides
/// what is required.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawNotification {
    #[serde(default)]
    pub merchant_oid: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub total_amount: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub fail_message: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub failed_reason_code: Option<String>,
}

/// JSON senders sometimes encode numeric fields as numbers; keep them as the
/// literal text so the signature is computed over what was sent.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|s| match s {
        Scalar::Text(t) => t,
        Scalar::Number(n) => n.to_string(),
    }))
}

/// One asynchronous payment notification from the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackNotification {
    pub order_reference: String,
    pub outcome: Outcome,
    /// Status token as received, used for signature verification.
    pub status_token: String,
    pub amount_minor_units: u64,
    /// Amount as received, used for signature verification.
    pub amount_token: String,
    pub signature: String,
    pub failure_detail: Option<String>,
}

fn required(field: Option<String>, name: &str) -> Result<String, RelayError> {
    field
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| RelayError::MalformedInput(format!("missing {name}")))
}

impl TryFrom<RawNotification> for CallbackNotification {
    type Error = RelayError;

    fn try_from(raw: RawNotification) -> Result<Self, Self::Error> {
        let order_reference = required(raw.merchant_oid, "merchant_oid")?.trim().to_string();
        let status_token = required(raw.status, "status")?;
        let amount_token = required(raw.total_amount, "total_amount")?;
        let signature = required(raw.hash, "hash")?;

        let amount_minor_units = parse_minor_units(&amount_token).ok_or_else(|| {
            RelayError::MalformedInput(format!("total_amount is not an integer: {amount_token}"))
        })?;

        let message = raw.fail_message.filter(|m| !m.trim().is_empty());
        let failure_detail = match (raw.failed_reason_code, message) {
            (Some(code), Some(msg)) if !code.is_empty() => Some(format!("{code}: {msg}")),
            (_, Some(msg)) => Some(msg),
            (Some(code), None) if !code.is_empty() => Some(code),
            _ => None,
        };

        Ok(Self {
            order_reference,
            outcome: Outcome::from_token(&status_token),
            status_token,
            amount_minor_units,
            amount_token,
            signature,
            failure_detail,
        })
    }
}

impl CallbackNotification {
    /// Check the signature and wrap the result. A mismatch is recorded, not
    /// rejected; the caller decides what to do with an unverified outcome.
    pub fn verify(self, key: &[u8], salt: &str) -> VerifiedOutcome {
        let verified = signature::verify(
            &self.order_reference,
            &self.status_token,
            &self.amount_token,
            &self.signature,
            key,
            salt,
        );
        VerifiedOutcome {
            notification: self,
            verified,
        }
    }

    pub fn amount_major_units(&self) -> u64 {
        minor_to_major(self.amount_minor_units)
    }
}

/// A notification whose signature has been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedOutcome {
    pub notification: CallbackNotification,
    pub verified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(status: &str, amount: &str) -> RawNotification {
        RawNotification {
            merchant_oid: Some("ORD1".to_string()),
            status: Some(status.to_string()),
            total_amount: Some(amount.to_string()),
            hash: Some("c2ln".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_outcome_tokens() {
        assert_eq!(Outcome::from_token("success"), Outcome::Success);
        assert_eq!(Outcome::from_token(" Success "), Outcome::Success);
        assert_eq!(Outcome::from_token("1"), Outcome::Success);
        assert_eq!(Outcome::from_token("Başarılı"), Outcome::Success);
        assert_eq!(Outcome::from_token("failed"), Outcome::Failure);
        assert_eq!(Outcome::from_token("0"), Outcome::Failure);
        assert_eq!(Outcome::from_token(""), Outcome::Failure);
    }

    #[test]
    fn test_minor_to_major_rounds() {
        assert_eq!(minor_to_major(29900), 299);
        assert_eq!(minor_to_major(10000), 100);
        assert_eq!(minor_to_major(10049), 100);
        assert_eq!(minor_to_major(10050), 101);
        assert_eq!(minor_to_major(0), 0);
    }

    #[test]
    fn test_try_from_keeps_raw_tokens() {
        let n = CallbackNotification::try_from(raw("success", "29900")).unwrap();
        assert_eq!(n.order_reference, "ORD1");
        assert_eq!(n.outcome, Outcome::Success);
        assert_eq!(n.status_token, "success");
        assert_eq!(n.amount_token, "29900");
        assert_eq!(n.amount_minor_units, 29900);
        assert_eq!(n.amount_major_units(), 299);
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let mut r = raw("success", "29900");
        r.hash = None;
        assert!(matches!(
            CallbackNotification::try_from(r),
            Err(RelayError::MalformedInput(_))
        ));

        let mut r = raw("success", "29900");
        r.merchant_oid = Some("   ".to_string());
        assert!(matches!(
            CallbackNotification::try_from(r),
            Err(RelayError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_non_numeric_amount_is_malformed() {
        assert!(matches!(
            CallbackNotification::try_from(raw("success", "12.5")),
            Err(RelayError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_failure_detail_joins_code_and_message() {
        let mut r = raw("failed", "100");
        r.failed_reason_code = Some("6".to_string());
        r.fail_message = Some("payment already in progress".to_string());
        let n = CallbackNotification::try_from(r).unwrap();
        assert_eq!(
            n.failure_detail.as_deref(),
            Some("6: payment already in progress")
        );
    }

    #[test]
    fn test_json_numbers_accepted() {
        let r: RawNotification = serde_json::from_str(
            r#"{"merchant_oid":"ORD9","status":"success","total_amount":29900,"hash":"x"}"#,
        )
        .unwrap();
        assert_eq!(r.total_amount.as_deref(), Some("29900"));
    }

    #[test]
    fn test_verify_flags_mismatch_without_rejecting() {
        let key = b"test-merchant-key";
        let salt = "test-salt";
        let mut r = raw("success", "29900");
        r.hash = Some(signature::compute_signature(key, salt, "ORD1", "success", "29900"));
        let n = CallbackNotification::try_from(r).unwrap();

        assert!(n.clone().verify(key, salt).verified);
        let unverified = n.verify(b"wrong-key", salt);
        assert!(!unverified.verified);
        assert_eq!(unverified.notification.outcome, Outcome::Success);
    }
}
