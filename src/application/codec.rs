//! Session state codec
//!
//! A session travels between calls as an opaque string:
//! `base64url(envelope) "." hmac-sha256-hex(envelope)`, where the envelope is
//! `{"format": "hstree-session", "version": 1, "session": {...}}`. The MAC key
//! never leaves the installation, so a blob edited outside hstree cannot be
//! re-sealed.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::instrument;

use crate::application::{ApplicationError, ApplicationResult};
use crate::domain::{DomainError, TraversalSession};

pub const SESSION_FORMAT: &str = "hstree-session";
/// Bumped whenever the session layout changes; older blobs are rejected.
pub const SESSION_VERSION: u32 = 1;

type HmacSha256 = Hmac<Sha256>;

#[derive(Serialize)]
struct Envelope<'a> {
    format: &'a str,
    version: u32,
    session: &'a TraversalSession,
}

#[derive(Deserialize)]
struct OwnedEnvelope {
    format: String,
    version: u32,
    session: serde_json::Value,
}

/// Seals and opens session blobs under one secret key.
#[derive(Clone)]
pub struct SessionCodec {
    mac: HmacSha256,
}

impl std::fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCodec").finish_non_exhaustive()
    }
}

impl SessionCodec {
    pub fn new(key: impl AsRef<[u8]>) -> ApplicationResult<Self> {
        let mac = HmacSha256::new_from_slice(key.as_ref()).map_err(|e| ApplicationError::Config {
            message: format!("unusable session key: {e}"),
        })?;
        Ok(Self { mac })
    }

    /// Hex MAC of `bytes`; what a blob carries after the dot.
    pub fn seal(&self, bytes: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(bytes);
        hex::encode(mac.finalize().into_bytes())
    }

    fn verify(&self, bytes: &[u8], tag: &str) -> bool {
        let Ok(tag) = hex::decode(tag) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(bytes);
        mac.verify_slice(&tag).is_ok()
    }

    /// Encode `session` into a blob that can cross a process boundary.
    #[instrument(level = "debug", skip_all, fields(session_id = %session.session_id))]
    pub fn encode(&self, session: &TraversalSession) -> ApplicationResult<String> {
        let envelope = Envelope {
            format: SESSION_FORMAT,
            version: SESSION_VERSION,
            session,
        };
        let bytes = serde_json::to_vec(&envelope).map_err(|e| ApplicationError::OperationFailed {
            context: "encode session".to_string(),
            source: Box::new(e),
        })?;
        Ok(format!("{}.{}", URL_SAFE_NO_PAD.encode(&bytes), self.seal(&bytes)))
    }

    /// Decode a blob produced by [`SessionCodec::encode`] under the same key.
    ///
    /// Any failure means the session is expired or invalid; callers start over
    /// instead of retrying.
    #[instrument(level = "debug", skip_all, fields(len = blob.len()))]
    pub fn decode(&self, blob: &str) -> Result<TraversalSession, DomainError> {
        let (body, tag) = blob
            .trim()
            .rsplit_once('.')
            .ok_or_else(|| DomainError::session_decode("missing integrity tag"))?;

        let bytes = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|e| DomainError::session_decode(format!("invalid encoding: {e}")))?;

        if !self.verify(&bytes, tag) {
            return Err(DomainError::session_decode("integrity check failed"));
        }

        let envelope: OwnedEnvelope = serde_json::from_slice(&bytes)
            .map_err(|e| DomainError::session_decode(format!("unreadable envelope: {e}")))?;
        if envelope.format != SESSION_FORMAT {
            return Err(DomainError::session_decode(format!(
                "unexpected format tag {:?}",
                envelope.format
            )));
        }
        if envelope.version != SESSION_VERSION {
            return Err(DomainError::session_decode(format!(
                "session version {} is not supported (expected {})",
                envelope.version, SESSION_VERSION
            )));
        }

        let session: TraversalSession = serde_json::from_value(envelope.session)
            .map_err(|e| DomainError::session_decode(format!("unreadable session: {e}")))?;
        session.validate().map_err(DomainError::session_decode)?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CandidateOption, DutyRates, TerminalReason, TraversalState};

    fn codec() -> SessionCodec {
        SessionCodec::new("unit-test-key").unwrap()
    }

    fn sample_session() -> TraversalSession {
        let mut session = TraversalSession::new("cordless drill");
        session.record_step(
            "84".into(),
            vec![CandidateOption {
                code: "84".into(),
                description: "Machinery".into(),
                duty_rates: DutyRates::default(),
            }],
            Some("1".into()),
            TraversalState::AwaitingChildChoice,
        );
        session.record_step(
            "84".into(),
            vec![],
            Some("FINAL: 84".into()),
            TraversalState::Terminal(TerminalReason::DeclaredFinal),
        );
        session
    }

    #[test]
    fn given_session_when_round_tripping_then_identical() {
        let session = sample_session();
        let blob = codec().encode(&session).unwrap();
        assert_eq!(codec().decode(&blob).unwrap(), session);
    }

    #[test]
    fn given_truncated_blob_when_decoding_then_session_decode_error() {
        let blob = codec().encode(&sample_session()).unwrap();
        let truncated = &blob[..blob.len() / 2];
        assert!(matches!(
            codec().decode(truncated),
            Err(DomainError::SessionDecode { .. })
        ));
    }

    #[test]
    fn given_tampered_body_when_decoding_then_integrity_check_fails() {
        let blob = codec().encode(&sample_session()).unwrap();
        let (body, tag) = blob.rsplit_once('.').unwrap();
        let bytes = URL_SAFE_NO_PAD.decode(body).unwrap();
        let text = String::from_utf8(bytes).unwrap().replace("cordless", "corded!!");
        let forged = format!("{}.{}", URL_SAFE_NO_PAD.encode(text.as_bytes()), tag);

        let err = codec().decode(&forged).unwrap_err();
        assert!(err.to_string().contains("integrity"));
    }

    #[test]
    fn given_blob_sealed_under_other_key_when_decoding_then_integrity_check_fails() {
        let blob = SessionCodec::new("someone-elses-key")
            .unwrap()
            .encode(&sample_session())
            .unwrap();

        let err = codec().decode(&blob).unwrap_err();
        assert!(err.to_string().contains("integrity"));
    }

    #[test]
    fn given_non_hex_tag_when_decoding_then_integrity_check_fails() {
        let blob = codec().encode(&sample_session()).unwrap();
        let (body, _) = blob.rsplit_once('.').unwrap();

        let err = codec().decode(&format!("{body}.zz")).unwrap_err();
        assert!(err.to_string().contains("integrity"));
    }

    #[test]
    fn given_other_version_when_decoding_then_rejected() {
        let session = sample_session();
        let bytes = serde_json::to_vec(&serde_json::json!({
            "format": SESSION_FORMAT,
            "version": SESSION_VERSION + 1,
            "session": session,
        }))
        .unwrap();
        let blob = format!("{}.{}", URL_SAFE_NO_PAD.encode(&bytes), codec().seal(&bytes));

        let err = codec().decode(&blob).unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn given_inconsistent_step_count_when_decoding_then_rejected() {
        let mut session = sample_session();
        session.step_count = 7;
        let blob = codec().encode(&session).unwrap();
        assert!(matches!(
            codec().decode(&blob),
            Err(DomainError::SessionDecode { .. })
        ));
    }
}
