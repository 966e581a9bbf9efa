//! Wire-level exchange API: request/response shapes and the HTTP transport.
//!
//! Every network call funnels through [`HttpExchangeApi::request`], which
//! attaches the bearer token, serializes structured bodies as JSON, passes
//! raw bytes through untouched, and wraps transport failures uniformly with
//! the environment name attached.

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::CONTENT_TYPE;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::environment::Environment;
use crate::error::KsefError;

/// Tax-identifier context sent with authentication requests.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextIdentifier {
    #[serde(rename = "type")]
    pub identifier_type: String,
    pub value: String,
}

impl ContextIdentifier {
    pub fn nip(value: &str) -> Self {
        Self {
            identifier_type: "Nip".into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChallengeRequest {
    context_identifier: ContextIdentifier,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub challenge: Option<String>,
    /// Epoch milliseconds or an RFC 3339 string, depending on endpoint
    /// version; the orchestrator normalizes it.
    pub timestamp: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenProofRequest {
    pub challenge: String,
    pub context_identifier: ContextIdentifier,
    pub encrypted_token: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubmitProofResponse {
    pub reference_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatusResponse {
    pub processing_code: Option<i32>,
    pub processing_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RedeemResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CertificateListResponse {
    #[serde(default)]
    certificates: Vec<ExchangeCertificate>,
}

/// One entry of the exchange's published certificate list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeCertificate {
    /// Base64 DER.
    pub certificate: String,
    /// Declared usages, e.g. "KsefTokenEncryption".
    #[serde(default)]
    pub usage: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OpenSessionResponse {
    pub reference_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SendInvoiceResponse {
    pub reference_number: Option<String>,
    pub element_reference_number: Option<String>,
    pub processing_code: Option<i32>,
    pub processing_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceStatusResponse {
    pub processing_code: Option<i32>,
    pub processing_description: Option<String>,
    pub ksef_reference_number: Option<String>,
    pub acquisition_timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceQueryRequest {
    /// "subject1" (caller is issuer) or "subject2" (caller is recipient).
    pub subject_type: String,
    pub acquisition_timestamp_from: String,
    pub acquisition_timestamp_to: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryInvoicesResponse {
    #[serde(default)]
    invoices: Vec<InvoiceSummaryWire>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceSummaryWire {
    pub ksef_reference_number: Option<String>,
    pub invoice_reference_number: Option<String>,
    pub invoice_date: Option<String>,
    pub subject_name: Option<String>,
    pub subject_tax_id: Option<String>,
    pub gross_amount: Option<Decimal>,
}

/// The exchange's wire operations, one method per endpoint.
///
/// The production implementation is [`HttpExchangeApi`]; tests drive the
/// orchestrator and session client through deterministic fakes.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    fn environment(&self) -> Environment;

    async fn auth_challenge(&self, tax_id: &str) -> Result<ChallengeResponse, KsefError>;

    async fn submit_token_proof(
        &self,
        request: &TokenProofRequest,
    ) -> Result<SubmitProofResponse, KsefError>;

    async fn submit_signature_proof(
        &self,
        signed_xml: &[u8],
    ) -> Result<SubmitProofResponse, KsefError>;

    async fn auth_status(&self, reference_number: &str) -> Result<AuthStatusResponse, KsefError>;

    async fn redeem_tokens(&self, reference_number: &str) -> Result<RedeemResponse, KsefError>;

    async fn certificate_list(&self) -> Result<Vec<ExchangeCertificate>, KsefError>;

    async fn open_session(&self, bearer: &str) -> Result<OpenSessionResponse, KsefError>;

    async fn close_session(&self, bearer: &str, session_ref: &str) -> Result<(), KsefError>;

    async fn send_invoice(
        &self,
        bearer: &str,
        session_ref: &str,
        invoice_xml: &[u8],
    ) -> Result<SendInvoiceResponse, KsefError>;

    async fn invoice_status(
        &self,
        bearer: &str,
        session_ref: &str,
        invoice_ref: &str,
    ) -> Result<InvoiceStatusResponse, KsefError>;

    async fn query_invoices(
        &self,
        bearer: &str,
        query: &InvoiceQueryRequest,
    ) -> Result<Vec<InvoiceSummaryWire>, KsefError>;

    async fn fetch_invoice(&self, bearer: &str, ksef_number: &str) -> Result<String, KsefError>;
}

enum RequestBody<'a> {
    Empty,
    Json(serde_json::Value),
    Bytes(&'a [u8]),
}

/// Production transport over `reqwest`.
pub struct HttpExchangeApi {
    environment: Environment,
    http: reqwest::Client,
}

impl HttpExchangeApi {
    pub fn new(environment: Environment) -> Result<Self, KsefError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| KsefError::Connection {
                environment: environment.name(),
                message: e.to_string(),
            })?;
        Ok(Self { environment, http })
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: RequestBody<'_>,
        bearer: Option<&str>,
    ) -> Result<String, KsefError> {
        let url = format!("{}{}", self.environment.base_url(), path);
        let mut req = self.http.request(method, &url);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        req = match body {
            RequestBody::Empty => req,
            RequestBody::Json(value) => req.json(&value),
            RequestBody::Bytes(bytes) => req
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(bytes.to_vec()),
        };

        let response = req.send().await.map_err(|e| KsefError::Connection {
            environment: self.environment.name(),
            message: e.to_string(),
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|e| KsefError::Connection {
            environment: self.environment.name(),
            message: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(KsefError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }

    fn parse<T: DeserializeOwned>(body: &str) -> Result<T, KsefError> {
        serde_json::from_str(body)
            .map_err(|e| KsefError::Protocol(format!("unexpected response shape: {e}")))
    }

    fn json<T: Serialize>(value: &T) -> Result<RequestBody<'static>, KsefError> {
        serde_json::to_value(value)
            .map(RequestBody::Json)
            .map_err(|e| KsefError::Protocol(format!("request serialization failed: {e}")))
    }
}

#[async_trait]
impl ExchangeApi for HttpExchangeApi {
    fn environment(&self) -> Environment {
        self.environment
    }

    async fn auth_challenge(&self, tax_id: &str) -> Result<ChallengeResponse, KsefError> {
        let body = Self::json(&ChallengeRequest {
            context_identifier: ContextIdentifier::nip(tax_id),
        })?;
        let text = self.request(Method::POST, "/auth/challenge", body, None).await?;
        Self::parse(&text)
    }

    async fn submit_token_proof(
        &self,
        request: &TokenProofRequest,
    ) -> Result<SubmitProofResponse, KsefError> {
        let body = Self::json(request)?;
        let text = self.request(Method::POST, "/auth/ksef-token", body, None).await?;
        Self::parse(&text)
    }

    async fn submit_signature_proof(
        &self,
        signed_xml: &[u8],
    ) -> Result<SubmitProofResponse, KsefError> {
        let text = self
            .request(
                Method::POST,
                "/auth/xades-signature",
                RequestBody::Bytes(signed_xml),
                None,
            )
            .await?;
        Self::parse(&text)
    }

    async fn auth_status(&self, reference_number: &str) -> Result<AuthStatusResponse, KsefError> {
        let path = format!("/auth/{reference_number}");
        let text = self.request(Method::GET, &path, RequestBody::Empty, None).await?;
        Self::parse(&text)
    }

    async fn redeem_tokens(&self, reference_number: &str) -> Result<RedeemResponse, KsefError> {
        let body = RequestBody::Json(serde_json::json!({
            "referenceNumber": reference_number,
        }));
        let text = self.request(Method::POST, "/auth/token/redeem", body, None).await?;
        Self::parse(&text)
    }

    async fn certificate_list(&self) -> Result<Vec<ExchangeCertificate>, KsefError> {
        let text = self
            .request(
                Method::GET,
                "/security/public-key-certificates",
                RequestBody::Empty,
                None,
            )
            .await?;
        let parsed: CertificateListResponse = Self::parse(&text)?;
        Ok(parsed.certificates)
    }

    async fn open_session(&self, bearer: &str) -> Result<OpenSessionResponse, KsefError> {
        let text = self
            .request(
                Method::POST,
                "/online/session/open",
                RequestBody::Empty,
                Some(bearer),
            )
            .await?;
        Self::parse(&text)
    }

    async fn close_session(&self, bearer: &str, session_ref: &str) -> Result<(), KsefError> {
        let body = RequestBody::Json(serde_json::json!({
            "referenceNumber": session_ref,
        }));
        self.request(Method::POST, "/online/session/close", body, Some(bearer))
            .await?;
        Ok(())
    }

    async fn send_invoice(
        &self,
        bearer: &str,
        session_ref: &str,
        invoice_xml: &[u8],
    ) -> Result<SendInvoiceResponse, KsefError> {
        let path = format!("/online/session/{session_ref}/invoice");
        let text = self
            .request(
                Method::PUT,
                &path,
                RequestBody::Bytes(invoice_xml),
                Some(bearer),
            )
            .await?;
        Self::parse(&text)
    }

    async fn invoice_status(
        &self,
        bearer: &str,
        session_ref: &str,
        invoice_ref: &str,
    ) -> Result<InvoiceStatusResponse, KsefError> {
        let path = format!("/online/session/{session_ref}/invoice/{invoice_ref}/status");
        let text = self
            .request(Method::GET, &path, RequestBody::Empty, Some(bearer))
            .await?;
        Self::parse(&text)
    }

    async fn query_invoices(
        &self,
        bearer: &str,
        query: &InvoiceQueryRequest,
    ) -> Result<Vec<InvoiceSummaryWire>, KsefError> {
        let body = Self::json(query)?;
        let text = self
            .request(Method::POST, "/invoice/query", body, Some(bearer))
            .await?;
        let parsed: QueryInvoicesResponse = Self::parse(&text)?;
        Ok(parsed.invoices)
    }

    async fn fetch_invoice(&self, bearer: &str, ksef_number: &str) -> Result<String, KsefError> {
        let path = format!("/invoice/{ksef_number}");
        self.request(Method::GET, &path, RequestBody::Empty, Some(bearer))
            .await
    }
}
