//! Session lifecycle and retrieval operations through the client facade.

mod common;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use ksef::api::{
    AuthStatusResponse, ChallengeResponse, ExchangeApi, ExchangeCertificate,
    InvoiceQueryRequest, InvoiceStatusResponse, InvoiceSummaryWire, OpenSessionResponse,
    RedeemResponse, SendInvoiceResponse, SubmitProofResponse, TokenProofRequest,
};
use ksef::clock::SystemClock;
use ksef::crypto::PublicKeyCache;
use ksef::error::KsefError;
use ksef::{Credential, Environment, KsefClient, SubjectRole};

/// Fake exchange where authentication always succeeds on the first poll
/// and the session operations are scripted per test.
struct SessionApi {
    certificates: Vec<ExchangeCertificate>,
    open_returns_no_reference: AtomicBool,
    close_fails: AtomicBool,
    close_calls: AtomicUsize,
    sent_invoices: Mutex<Vec<Vec<u8>>>,
    last_query: Mutex<Option<InvoiceQueryRequest>>,
}

impl SessionApi {
    fn new() -> Self {
        let (entry, _key) = common::token_encryption_entry(365);
        Self {
            certificates: vec![entry],
            open_returns_no_reference: AtomicBool::new(false),
            close_fails: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            sent_invoices: Mutex::new(Vec::new()),
            last_query: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ExchangeApi for SessionApi {
    fn environment(&self) -> Environment {
        Environment::Test
    }

    async fn auth_challenge(&self, _tax_id: &str) -> Result<ChallengeResponse, KsefError> {
        Ok(ChallengeResponse {
            challenge: Some("challenge".into()),
            timestamp: Some(serde_json::json!("2024-06-01T08:00:00Z")),
        })
    }

    async fn submit_token_proof(
        &self,
        _request: &TokenProofRequest,
    ) -> Result<SubmitProofResponse, KsefError> {
        Ok(SubmitProofResponse {
            reference_number: Some("AUTH-REF".into()),
        })
    }

    async fn submit_signature_proof(
        &self,
        _signed_xml: &[u8],
    ) -> Result<SubmitProofResponse, KsefError> {
        Ok(SubmitProofResponse {
            reference_number: Some("AUTH-REF".into()),
        })
    }

    async fn auth_status(&self, _reference: &str) -> Result<AuthStatusResponse, KsefError> {
        Ok(AuthStatusResponse {
            processing_code: Some(200),
            processing_description: None,
        })
    }

    async fn redeem_tokens(&self, _reference: &str) -> Result<RedeemResponse, KsefError> {
        Ok(RedeemResponse {
            access_token: Some("opaque-access-token".into()),
            refresh_token: Some("refresh".into()),
        })
    }

    async fn certificate_list(&self) -> Result<Vec<ExchangeCertificate>, KsefError> {
        Ok(self.certificates.clone())
    }

    async fn open_session(&self, bearer: &str) -> Result<OpenSessionResponse, KsefError> {
        assert_eq!(bearer, "opaque-access-token");
        if self.open_returns_no_reference.load(Ordering::SeqCst) {
            return Ok(OpenSessionResponse::default());
        }
        Ok(OpenSessionResponse {
            reference_number: Some("SESSION-1".into()),
        })
    }

    async fn close_session(&self, _bearer: &str, session: &str) -> Result<(), KsefError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(session, "SESSION-1");
        if self.close_fails.load(Ordering::SeqCst) {
            return Err(KsefError::Http {
                status: 500,
                body: "close failed".into(),
            });
        }
        Ok(())
    }

    async fn send_invoice(
        &self,
        _bearer: &str,
        session: &str,
        invoice_xml: &[u8],
    ) -> Result<SendInvoiceResponse, KsefError> {
        assert_eq!(session, "SESSION-1");
        self.sent_invoices.lock().unwrap().push(invoice_xml.to_vec());
        Ok(SendInvoiceResponse {
            reference_number: Some("SESSION-1".into()),
            element_reference_number: Some("INV-REF-1".into()),
            processing_code: Some(100),
            processing_description: Some("Przyjęto do przetwarzania".into()),
        })
    }

    async fn invoice_status(
        &self,
        _bearer: &str,
        _session: &str,
        invoice_ref: &str,
    ) -> Result<InvoiceStatusResponse, KsefError> {
        assert_eq!(invoice_ref, "INV-REF-1");
        Ok(InvoiceStatusResponse {
            processing_code: Some(200),
            processing_description: None,
            ksef_reference_number: Some("KSEF-NUM-001".into()),
            acquisition_timestamp: Some("2024-06-01T08:01:00Z".into()),
        })
    }

    async fn query_invoices(
        &self,
        _bearer: &str,
        query: &InvoiceQueryRequest,
    ) -> Result<Vec<InvoiceSummaryWire>, KsefError> {
        *self.last_query.lock().unwrap() = Some(query.clone());
        Ok(vec![InvoiceSummaryWire {
            ksef_reference_number: Some("KSEF-NUM-001".into()),
            invoice_reference_number: Some("FV/1/2024".into()),
            invoice_date: Some("2024-06-01".into()),
            subject_name: Some("Nabywca SA".into()),
            subject_tax_id: Some("2222222222".into()),
            gross_amount: Some(dec!(246.00)),
        }])
    }

    async fn fetch_invoice(&self, _bearer: &str, ksef_number: &str) -> Result<String, KsefError> {
        assert_eq!(ksef_number, "KSEF-NUM-001");
        Ok("<Faktura><Fa><P_2>FV/1/2024</P_2></Fa></Faktura>".into())
    }
}

fn client_with(api: Arc<SessionApi>) -> KsefClient {
    let cache = Box::leak(Box::new(PublicKeyCache::with_clock_and_jitter(
        Arc::new(SystemClock),
        Box::new(|| 0),
    )));
    KsefClient::with_transport(
        Environment::Test,
        "1234567890",
        Credential::Token {
            token: "ksef-token".into(),
        },
        api,
        Arc::new(SystemClock),
        cache,
    )
}

#[tokio::test]
async fn operations_require_authentication_first() {
    let client = client_with(Arc::new(SessionApi::new()));
    let err = client.send_invoice(b"<Faktura/>").await.unwrap_err();
    assert!(matches!(err, KsefError::AuthRequired));
    let err = client.fetch_invoice_xml("KSEF-NUM-001").await.unwrap_err();
    assert!(matches!(err, KsefError::AuthRequired));
}

#[tokio::test]
async fn send_requires_an_open_session() {
    let mut client = client_with(Arc::new(SessionApi::new()));
    client.authenticate().await.unwrap();
    let err = client.send_invoice(b"<Faktura/>").await.unwrap_err();
    assert!(matches!(err, KsefError::SessionRequired));
}

#[tokio::test]
async fn open_without_a_returned_reference_leaves_no_session() {
    let api = Arc::new(SessionApi::new());
    api.open_returns_no_reference.store(true, Ordering::SeqCst);
    let mut client = client_with(api.clone());
    client.authenticate().await.unwrap();

    let err = client.open_session().await.unwrap_err();
    assert!(matches!(err, KsefError::SessionRequired));

    // No reference was stored, so sends still hit the session guard.
    let err = client.send_invoice(b"<Faktura/>").await.unwrap_err();
    assert!(matches!(err, KsefError::SessionRequired));
}

#[tokio::test]
async fn session_lifecycle_submit_and_status() {
    let api = Arc::new(SessionApi::new());
    let mut client = client_with(api.clone());
    client.authenticate().await.unwrap();

    let session = client.open_session().await.unwrap();
    assert_eq!(session, "SESSION-1");

    let result = client.send_invoice(b"<Faktura>...</Faktura>").await.unwrap();
    assert_eq!(result.invoice_reference, "INV-REF-1");
    assert_eq!(result.processing_code, Some(100));

    let status = client.invoice_status(&session, &result.invoice_reference).await.unwrap();
    assert_eq!(status.ksef_number.as_deref(), Some("KSEF-NUM-001"));

    client.close_session().await.unwrap();
    assert_eq!(api.close_calls.load(Ordering::SeqCst), 1);

    // The session is gone; a second close is a no-op.
    client.close_session().await.unwrap();
    assert_eq!(api.close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_close_still_clears_the_session() {
    let api = Arc::new(SessionApi::new());
    let mut client = client_with(api.clone());
    client.authenticate().await.unwrap();
    client.open_session().await.unwrap();

    api.close_fails.store(true, Ordering::SeqCst);
    let err = client.close_session().await.unwrap_err();
    assert!(matches!(err, KsefError::Http { status: 500, .. }));

    // The reference was dropped despite the failure, so sends now fail
    // with the session guard, not a stale reference.
    let err = client.send_invoice(b"<Faktura/>").await.unwrap_err();
    assert!(matches!(err, KsefError::SessionRequired));
}

#[tokio::test]
async fn query_maps_role_and_inclusive_date_range() {
    let api = Arc::new(SessionApi::new());
    let mut client = client_with(api.clone());
    client.authenticate().await.unwrap();

    let from = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    let to = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
    let rows = client.query_invoices(SubjectRole::Issuer, from, to).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].ksef_number, "KSEF-NUM-001");
    assert_eq!(rows[0].gross_amount, Some(dec!(246.00)));

    let query = api.last_query.lock().unwrap().clone().unwrap();
    assert_eq!(query.subject_type, "subject1");
    assert!(query.acquisition_timestamp_from.starts_with("2024-06-01T00:00:00"));
    assert!(query.acquisition_timestamp_to.starts_with("2024-06-30T23:59:59"));
}

#[tokio::test]
async fn fetch_returns_the_raw_document() {
    let mut client = client_with(Arc::new(SessionApi::new()));
    client.authenticate().await.unwrap();
    let xml = client.fetch_invoice_xml("KSEF-NUM-001").await.unwrap();
    assert!(xml.contains("<P_2>FV/1/2024</P_2>"));
}
