//! Inbound gateway notifications: signature verification and event parsing.
//!
//! Signature header: `t=<unix seconds>,v1=<hex hmac>[,v1=...]`, where the
//! MAC is HMAC-SHA256 over `"{t}.{raw body}"` keyed by the shared secret.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Payment-Signature";

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: &str, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            tolerance_secs,
        }
    }

    /// Rejects anything not signed with the shared secret within the
    /// tolerance window. Runs before the body is parsed.
    pub fn verify(&self, header: &str, body: &[u8], now_secs: i64) -> Result<(), AppError> {
        if self.secret.is_empty() {
            return Err(reject("webhook secret is not configured"));
        }

        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", v)) => timestamp = v.parse::<i64>().ok(),
                Some(("v1", v)) => candidates.push(v),
                _ => {}
            }
        }

        let t = timestamp.ok_or_else(|| reject("signature timestamp missing"))?;
        if now_secs.abs_diff(t) > self.tolerance_secs.unsigned_abs() {
            return Err(reject("signature timestamp outside tolerance"));
        }

        for candidate in candidates {
            let Ok(expected) = hex::decode(candidate) else {
                continue;
            };
            // verify_slice compares in constant time.
            if self.mac(t, body)?.verify_slice(&expected).is_ok() {
                return Ok(());
            }
        }
        Err(reject("signature mismatch"))
    }

    /// Hex signature for `body` at `t`, in the header's `v1` format.
    pub fn sign(&self, t: i64, body: &[u8]) -> Result<String, AppError> {
        Ok(hex::encode(self.mac(t, body)?.finalize().into_bytes()))
    }

    fn mac(&self, t: i64, body: &[u8]) -> Result<HmacSha256, AppError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AppError::ExternalGateway(format!("invalid webhook key: {e}")))?;
        mac.update(t.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(mac)
    }
}

fn reject(why: &str) -> AppError {
    AppError::ExternalGateway(format!("webhook rejected: {why}"))
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: EventObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventObject {
    pub id: String,
    /// Present on charge objects; points at the owning intent.
    #[serde(default)]
    pub payment_intent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Succeeded,
    Failed,
    Canceled,
    Refunded,
}

impl GatewayEvent {
    pub fn parse(body: &[u8]) -> Result<Self, AppError> {
        serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("malformed gateway event: {e}")))
    }

    /// `None` for event types reconciliation does not act on.
    pub fn kind(&self) -> Option<EventKind> {
        match self.event_type.as_str() {
            "payment_intent.succeeded" => Some(EventKind::Succeeded),
            "payment_intent.payment_failed" => Some(EventKind::Failed),
            "payment_intent.canceled" => Some(EventKind::Canceled),
            "charge.refunded" => Some(EventKind::Refunded),
            _ => None,
        }
    }

    /// Intent the event is about. Refunds arrive on the charge object.
    pub fn intent_ref(&self) -> &str {
        self.data
            .object
            .payment_intent
            .as_deref()
            .unwrap_or(self.data.object.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_1"}}}"#;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new("whsec_test", 300)
    }

    #[test]
    fn accepts_a_fresh_valid_signature() {
        let v = verifier();
        let sig = v.sign(1_000, BODY).unwrap();

        v.verify(&format!("t=1000,v1={sig}"), BODY, 1_010).unwrap();
    }

    #[test]
    fn accepts_when_any_listed_signature_matches() {
        let v = verifier();
        let sig = v.sign(1_000, BODY).unwrap();

        v.verify(&format!("t=1000,v1=deadbeef,v1={sig}"), BODY, 1_000)
            .unwrap();
    }

    #[test]
    fn rejects_tampered_body_wrong_secret_and_stale_timestamp() {
        let v = verifier();
        let sig = v.sign(1_000, BODY).unwrap();
        let header = format!("t=1000,v1={sig}");

        assert!(v.verify(&header, b"{}", 1_000).is_err());
        assert!(
            WebhookVerifier::new("other", 300)
                .verify(&header, BODY, 1_000)
                .is_err()
        );
        assert!(v.verify(&header, BODY, 1_000 + 301).is_err());
        assert!(v.verify(&format!("v1={sig}"), BODY, 1_000).is_err());
        assert!(
            v.verify("t=-9223372036854775808,v1=00", b"{}", 1_700_000_000)
                .is_err()
        );
        assert!(v.verify(&format!("t={},v1=00", i64::MAX), b"{}", -1).is_err());
    }

    #[test]
    fn empty_secret_rejects_everything() {
        let v = WebhookVerifier::new("", 300);
        assert!(matches!(
            v.verify("t=1,v1=00", BODY, 1),
            Err(AppError::ExternalGateway(_))
        ));
    }

    #[test]
    fn parses_intent_and_charge_events() {
        let ev = GatewayEvent::parse(BODY).unwrap();
        assert_eq!(ev.kind(), Some(EventKind::Succeeded));
        assert_eq!(ev.intent_ref(), "pi_1");

        let refund = GatewayEvent::parse(
            br#"{"id":"evt_2","type":"charge.refunded","data":{"object":{"id":"ch_9","payment_intent":"pi_1"}}}"#,
        )
        .unwrap();
        assert_eq!(refund.kind(), Some(EventKind::Refunded));
        assert_eq!(refund.intent_ref(), "pi_1");

        let other = GatewayEvent::parse(
            br#"{"id":"evt_3","type":"customer.created","data":{"object":{"id":"cus_1"}}}"#,
        )
        .unwrap();
        assert_eq!(other.kind(), None);
    }
}
