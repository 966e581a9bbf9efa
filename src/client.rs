//! Stateful exchange client: one authentication and one online session
//! lifecycle per instance, invoked in dependency order.
//!
//! The client is not internally concurrent. Callers needing parallelism
//! run one instance per counterparty; the only shared state is the
//! process-wide public-key cache.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::api::{ExchangeApi, HttpExchangeApi, InvoiceQueryRequest};
use crate::auth::{AuthTokens, Credential, run_auth_flow};
use crate::clock::{Clock, SystemClock};
use crate::crypto::keystore::AtRestCipher;
use crate::crypto::public_key_cache::PublicKeyCache;
use crate::environment::Environment;
use crate::error::KsefError;

/// Which side of the invoice the caller is querying as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectRole {
    /// The caller issued the invoices.
    Issuer,
    /// The caller received the invoices.
    Recipient,
}

impl SubjectRole {
    fn wire_code(self) -> &'static str {
        match self {
            Self::Issuer => "subject1",
            Self::Recipient => "subject2",
        }
    }
}

/// Result of submitting one invoice into an open session.
#[derive(Debug, Clone)]
pub struct SendInvoiceResult {
    /// Reference for polling this invoice's processing status.
    pub invoice_reference: String,
    pub processing_code: Option<i32>,
    pub processing_description: Option<String>,
}

/// Per-invoice processing status, queryable across sessions.
#[derive(Debug, Clone)]
pub struct InvoiceStatus {
    pub processing_code: Option<i32>,
    pub processing_description: Option<String>,
    /// Authority-assigned number, present once the invoice is accepted.
    pub ksef_number: Option<String>,
    pub acquired_at: Option<String>,
}

/// Lightweight invoice reference from a metadata query.
#[derive(Debug, Clone)]
pub struct InvoiceSummary {
    pub ksef_number: String,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub counterparty_name: Option<String>,
    pub counterparty_tax_id: Option<String>,
    pub gross_amount: Option<Decimal>,
}

/// Exchange client bound to one environment, tax id and credential.
pub struct KsefClient {
    environment: Environment,
    tax_id: String,
    credential: Credential,
    at_rest: Option<AtRestCipher>,
    api: Arc<dyn ExchangeApi>,
    cache: &'static PublicKeyCache,
    clock: Arc<dyn Clock>,
    tokens: Option<AuthTokens>,
    session_ref: Option<String>,
}

impl KsefClient {
    /// Client over the production HTTP transport and shared key cache.
    pub fn new(
        environment: Environment,
        tax_id: impl Into<String>,
        credential: Credential,
    ) -> Result<Self, KsefError> {
        Ok(Self::with_transport(
            environment,
            tax_id,
            credential,
            Arc::new(HttpExchangeApi::new(environment)?),
            Arc::new(SystemClock),
            PublicKeyCache::shared(),
        ))
    }

    /// Client over an explicit transport, clock and cache. This is the
    /// seam tests and custom transports plug into.
    pub fn with_transport(
        environment: Environment,
        tax_id: impl Into<String>,
        credential: Credential,
        api: Arc<dyn ExchangeApi>,
        clock: Arc<dyn Clock>,
        cache: &'static PublicKeyCache,
    ) -> Self {
        Self {
            environment,
            tax_id: tax_id.into(),
            credential,
            at_rest: None,
            api,
            cache,
            clock,
            tokens: None,
            session_ref: None,
        }
    }

    /// Supply the at-rest cipher needed by certificate credentials.
    pub fn with_at_rest_cipher(mut self, cipher: AtRestCipher) -> Self {
        self.at_rest = Some(cipher);
        self
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// True once `authenticate` has produced a token pair.
    pub fn is_authenticated(&self) -> bool {
        self.tokens.is_some()
    }

    /// Expiry of the current access token, if authenticated.
    pub fn access_token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.tokens.as_ref().map(|t| t.access_token_expires_at)
    }

    fn bearer(&self) -> Result<&str, KsefError> {
        self.tokens
            .as_ref()
            .map(|t| t.access_token.as_str())
            .ok_or(KsefError::AuthRequired)
    }

    /// Run the full authentication flow for this client's credential.
    pub async fn authenticate(&mut self) -> Result<(), KsefError> {
        let tokens = run_auth_flow(
            self.api.as_ref(),
            self.cache,
            self.clock.as_ref(),
            self.environment,
            &self.tax_id,
            &self.credential,
            self.at_rest.as_ref(),
        )
        .await?;
        self.tokens = Some(tokens);
        Ok(())
    }

    /// Open an online session. At most one session is open per client.
    pub async fn open_session(&mut self) -> Result<String, KsefError> {
        let bearer = self.bearer()?;
        let response = self.api.open_session(bearer).await?;
        let reference = response
            .reference_number
            .ok_or(KsefError::SessionRequired)?;
        tracing::debug!(environment = %self.environment, "session opened");
        self.session_ref = Some(reference.clone());
        Ok(reference)
    }

    /// Close the open session, best effort.
    ///
    /// The local reference is cleared unconditionally once the close has
    /// been attempted, so a failed close never wedges the client. Intended
    /// to be callable from cleanup paths; the exchange expires abandoned
    /// sessions server-side.
    pub async fn close_session(&mut self) -> Result<(), KsefError> {
        let Some(reference) = self.session_ref.take() else {
            return Ok(());
        };
        let bearer = self.bearer()?;
        let result = self.api.close_session(bearer, &reference).await;
        if let Err(ref e) = result {
            tracing::warn!(environment = %self.environment, error = %e, "session close failed");
        }
        result
    }

    /// Submit one invoice document (raw XML bytes) into the open session.
    pub async fn send_invoice(&self, invoice_xml: &[u8]) -> Result<SendInvoiceResult, KsefError> {
        let bearer = self.bearer()?;
        let session = self.session_ref.as_deref().ok_or(KsefError::SessionRequired)?;
        let response = self.api.send_invoice(bearer, session, invoice_xml).await?;
        let invoice_reference = response
            .element_reference_number
            .or(response.reference_number)
            .ok_or_else(|| {
                KsefError::Protocol("invoice submission returned no reference number".into())
            })?;
        Ok(SendInvoiceResult {
            invoice_reference,
            processing_code: response.processing_code,
            processing_description: response.processing_description,
        })
    }

    /// Processing status of a submitted invoice. Only authentication is
    /// required — the session reference may belong to a past session.
    pub async fn invoice_status(
        &self,
        session_ref: &str,
        invoice_ref: &str,
    ) -> Result<InvoiceStatus, KsefError> {
        let bearer = self.bearer()?;
        let response = self.api.invoice_status(bearer, session_ref, invoice_ref).await?;
        Ok(InvoiceStatus {
            processing_code: response.processing_code,
            processing_description: response.processing_description,
            ksef_number: response.ksef_reference_number,
            acquired_at: response.acquisition_timestamp,
        })
    }

    /// Session-free metadata query over an inclusive date range, with the
    /// caller as issuer or recipient.
    pub async fn query_invoices(
        &self,
        role: SubjectRole,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<InvoiceSummary>, KsefError> {
        let bearer = self.bearer()?;
        let from = Utc.from_utc_datetime(&date_from.and_time(NaiveTime::MIN));
        let to = Utc.from_utc_datetime(&date_to.and_time(NaiveTime::MIN)) + Duration::seconds(86_399);
        let query = InvoiceQueryRequest {
            subject_type: role.wire_code().into(),
            acquisition_timestamp_from: from.to_rfc3339(),
            acquisition_timestamp_to: to.to_rfc3339(),
        };
        let rows = self.api.query_invoices(bearer, &query).await?;
        rows.into_iter()
            .map(|row| {
                let ksef_number = row.ksef_reference_number.ok_or_else(|| {
                    KsefError::Protocol("invoice summary without ksef reference number".into())
                })?;
                Ok(InvoiceSummary {
                    ksef_number,
                    invoice_number: row.invoice_reference_number,
                    invoice_date: row.invoice_date,
                    counterparty_name: row.subject_name,
                    counterparty_tax_id: row.subject_tax_id,
                    gross_amount: row.gross_amount,
                })
            })
            .collect()
    }

    /// Session-free retrieval of a full invoice document by its
    /// authority-assigned number. Returns the raw XML body.
    pub async fn fetch_invoice_xml(&self, ksef_number: &str) -> Result<String, KsefError> {
        let bearer = self.bearer()?;
        self.api.fetch_invoice(bearer, ksef_number).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_roles_map_to_wire_codes() {
        assert_eq!(SubjectRole::Issuer.wire_code(), "subject1");
        assert_eq!(SubjectRole::Recipient.wire_code(), "subject2");
    }
}
