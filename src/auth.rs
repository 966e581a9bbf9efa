//! Authentication orchestration: challenge, proof, submit, poll, redeem.
//!
//! Both credential kinds run the same six-step flow; only the proof step
//! differs. A timed-out poll is never resumed — the caller restarts from a
//! fresh challenge.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use zeroize::Zeroizing;

use crate::api::{ContextIdentifier, ExchangeApi, TokenProofRequest};
use crate::clock::Clock;
use crate::crypto::keystore::AtRestCipher;
use crate::crypto::public_key_cache::PublicKeyCache;
use crate::crypto::token::encrypt_auth_token;
use crate::crypto::xmldsig::sign_auth_request;
use crate::environment::Environment;
use crate::error::KsefError;

const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);
const POLL_TIMEOUT_SECS: i64 = 120;
const FALLBACK_TOKEN_TTL_MINUTES: i64 = 15;

const PROCESSING_IN_PROGRESS: i32 = 100;
const PROCESSING_DONE: i32 = 200;

/// Exchange credential for one counterparty. Exactly one is active at a
/// time; the certificate variant keeps its private key encrypted at rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum Credential {
    /// Long-lived exchange API token.
    Token { token: String },
    /// Qualified certificate with an at-rest encrypted private key
    /// (see [`AtRestCipher`]).
    Certificate {
        certificate_pem: String,
        private_key_pem_encrypted: String,
    },
}

/// Short-lived token pair from one successful authentication. Never
/// persisted; discarded with the operation that produced it.
#[derive(Debug, Clone)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub access_token_expires_at: DateTime<Utc>,
}

/// Drive the full authentication flow against the exchange.
pub(crate) async fn run_auth_flow(
    api: &dyn ExchangeApi,
    cache: &PublicKeyCache,
    clock: &dyn Clock,
    environment: Environment,
    tax_id: &str,
    credential: &Credential,
    at_rest: Option<&AtRestCipher>,
) -> Result<AuthTokens, KsefError> {
    // Step 1: challenge.
    let challenge_resp = api.auth_challenge(tax_id).await?;
    let challenge = challenge_resp
        .challenge
        .ok_or_else(|| KsefError::Protocol("challenge response without challenge".into()))?;
    let timestamp = challenge_resp
        .timestamp
        .ok_or_else(|| KsefError::Protocol("challenge response without timestamp".into()))?;
    let timestamp_ms = challenge_timestamp_ms(&timestamp)?;

    // Steps 2-3: proof, per credential kind.
    let submitted = match credential {
        Credential::Token { token } => {
            let public_key = cache
                .get_public_key(environment, || api.certificate_list())
                .await?;
            let encrypted_token = encrypt_auth_token(token, timestamp_ms, &public_key)?;
            api.submit_token_proof(&TokenProofRequest {
                challenge: challenge.clone(),
                context_identifier: ContextIdentifier::nip(tax_id),
                encrypted_token,
            })
            .await?
        }
        Credential::Certificate {
            certificate_pem,
            private_key_pem_encrypted,
        } => {
            let cipher = at_rest.ok_or_else(|| {
                KsefError::MissingEncryptionKey(
                    "certificate credential requires the at-rest cipher".into(),
                )
            })?;
            // Key material lives only for this signing call.
            let private_key_pem = Zeroizing::new(cipher.decrypt(private_key_pem_encrypted)?);
            let request_xml = build_auth_request_xml(&challenge, tax_id)?;
            let signed = sign_auth_request(&request_xml, certificate_pem, &private_key_pem)?;
            api.submit_signature_proof(signed.as_bytes()).await?
        }
    };
    let reference_number = submitted
        .reference_number
        .ok_or_else(|| KsefError::Protocol("proof submission returned no reference number".into()))?;

    // Step 4: poll until terminal, 1s spacing, 2 minute wall-clock budget.
    let poll_started = clock.now();
    loop {
        let status = api.auth_status(&reference_number).await?;
        match status.processing_code {
            Some(PROCESSING_DONE) => break,
            Some(PROCESSING_IN_PROGRESS) => {}
            Some(code) => {
                return Err(KsefError::Processing {
                    code,
                    description: status.processing_description.unwrap_or_default(),
                });
            }
            None => {
                return Err(KsefError::Protocol(
                    "authentication status without processing code".into(),
                ));
            }
        }

        let elapsed = clock.now() - poll_started;
        if elapsed >= Duration::seconds(POLL_TIMEOUT_SECS) {
            return Err(KsefError::Timeout {
                elapsed_secs: elapsed.num_seconds(),
            });
        }
        clock.sleep(POLL_INTERVAL).await;
    }

    // Step 5: redeem, exactly once — the exchange rejects a second redeem.
    let redeemed = api.redeem_tokens(&reference_number).await?;
    let access_token = redeemed
        .access_token
        .ok_or_else(|| KsefError::Protocol("token redemption returned no access token".into()))?;
    let refresh_token = redeemed
        .refresh_token
        .ok_or_else(|| KsefError::Protocol("token redemption returned no refresh token".into()))?;

    // Step 6: expiry from the token's own claim, with a fixed fallback.
    let access_token_expires_at = derive_expiry(&access_token, clock.now());

    tracing::debug!(environment = %environment, "authentication completed");
    Ok(AuthTokens {
        access_token,
        refresh_token,
        access_token_expires_at,
    })
}

/// Normalize the challenge timestamp: epoch milliseconds or RFC 3339.
fn challenge_timestamp_ms(value: &serde_json::Value) -> Result<i64, KsefError> {
    if let Some(ms) = value.as_i64() {
        return Ok(ms);
    }
    if let Some(text) = value.as_str() {
        return DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.timestamp_millis())
            .map_err(|e| KsefError::Protocol(format!("unparseable challenge timestamp: {e}")));
    }
    Err(KsefError::Protocol(format!(
        "challenge timestamp has unexpected type: {value}"
    )))
}

/// Expiry from the access token's JWT `exp` claim (seconds since epoch),
/// falling back to a fixed TTL when the token is opaque or malformed.
fn derive_expiry(access_token: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let claims = access_token.split('.').nth(1);
    let exp = claims
        .and_then(|segment| URL_SAFE_NO_PAD.decode(segment).ok())
        .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok())
        .and_then(|json| json.get("exp").and_then(serde_json::Value::as_i64))
        .and_then(|secs| DateTime::from_timestamp(secs, 0));
    exp.unwrap_or_else(|| now + Duration::minutes(FALLBACK_TOKEN_TTL_MINUTES))
}

/// The XML assertion signed for certificate-based authentication: the
/// server challenge echoed together with the caller's identifier.
fn build_auth_request_xml(challenge: &str, tax_id: &str) -> Result<String, KsefError> {
    let mut w = Writer::new(Cursor::new(Vec::new()));
    let mut root = BytesStart::new("AuthTokenRequest");
    root.push_attribute(("xmlns", "http://ksef.mf.gov.pl/auth/token/2.0"));

    let wio = |e: std::io::Error| KsefError::Xml(format!("XML write error: {e}"));

    w.write_event(Event::Start(root)).map_err(wio)?;
    w.write_event(Event::Start(BytesStart::new("Challenge"))).map_err(wio)?;
    w.write_event(Event::Text(BytesText::new(challenge))).map_err(wio)?;
    w.write_event(Event::End(BytesEnd::new("Challenge"))).map_err(wio)?;
    w.write_event(Event::Start(BytesStart::new("ContextIdentifier")))
        .map_err(wio)?;
    w.write_event(Event::Start(BytesStart::new("Nip"))).map_err(wio)?;
    w.write_event(Event::Text(BytesText::new(tax_id))).map_err(wio)?;
    w.write_event(Event::End(BytesEnd::new("Nip"))).map_err(wio)?;
    w.write_event(Event::End(BytesEnd::new("ContextIdentifier")))
        .map_err(wio)?;
    w.write_event(Event::End(BytesEnd::new("AuthTokenRequest")))
        .map_err(wio)?;

    String::from_utf8(w.into_inner().into_inner())
        .map_err(|e| KsefError::Xml(format!("XML UTF-8 error: {e}")))
}
