//! # Transaction Protocol Orchestrator
//!
//! The state machine that drives a payment flow end to end:
//!
//! ```text
//! CREATED -> KEYS_EXCHANGED -> TOKEN_ISSUED -> OTP_ISSUED -> CONFIRMED
//! ```
//!
//! Two clear-text operations start the flow (`create`, `exchange_keys`).
//! Five authenticated operations follow, and all five share one shape:
//! resolve the key record by identifier, reveal both keys, open the
//! inbound envelope with the server private key, verify the embedded
//! `pageId` matches the one on the outside, validate business fields,
//! call the upstream processor, seal its JSON answer with the client
//! public key, and return with the upstream's status.
//!
//! ## Sealed-error discipline
//!
//! Any failure *before* a client public key is known (unknown identifier,
//! keys not yet exchanged) returns a plain JSON error. Any failure
//! *after* the keys are resolved (bad envelope, mismatched id, invalid
//! field, upstream rejection) returns a sealed envelope, so no plaintext
//! diagnostic ever crosses the boundary once encryption is established.
//!
//! The orchestrator is request-scoped and stateless between calls; all
//! session state lives in the two stores. The one suspension point is the
//! upstream call, which holds no lock while it waits.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::PHONE_PAGE_PATH;
use crate::crypto::envelope::{self, Envelope};
use crate::crypto::keys::{public_key_from_pem, SessionKeyPair};
use crate::crypto::KeyProtector;
use crate::error::SessionError;
use crate::store::{GatewayDb, KeyStore, PublicIds, SessionKeys, TransactionRecord, TransactionStore};
use crate::upstream::{
    GetTokenCall, GetUrlCall, PaymentConfirmationCall, PaymentRequestCall, ResendOtpCall,
    UpstreamClient, UpstreamError, UpstreamReply,
};
use crate::validate;

// ---------------------------------------------------------------------------
// Wire Types
// ---------------------------------------------------------------------------

/// `POST /api/clients/get-url`: transaction creation (clear).
///
/// Missing fields deserialize to empty strings and fail validation with a
/// field-specific message, rather than failing JSON parsing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    #[serde(default)]
    pub company_name: String,
    #[serde(default)]
    pub program_name: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub merchant_msisdn: String,
    #[serde(default)]
    pub amount: String,
}

/// Answer to creation: the customer-facing URL bound to the fresh
/// `phonePageId`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateResponse {
    pub url: String,
}

/// `POST /api/clients/exchange-keys` (clear both ways).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeKeysRequest {
    #[serde(default)]
    pub client_public_key: String,
    #[serde(default)]
    pub phone_page_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeKeysResponse {
    pub server_public_key: String,
}

/// Body shape of every authenticated operation: a clear `pageId` for
/// store lookup, plus the envelope fields alongside it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedRequest {
    #[serde(default)]
    pub page_id: String,
    #[serde(flatten)]
    pub envelope: Envelope,
}

/// Non-sensitive transaction fields for rendering the customer pages.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    pub company_name: String,
    pub program_name: String,
    pub amount: String,
    pub merchant_msisdn: String,
    pub payment_success: bool,
}

/// What an authenticated operation hands back to the HTTP layer.
#[derive(Debug)]
pub enum Reply {
    /// Plain JSON. Only legitimate before a client public key is known.
    Clear { status: u16, body: Value },
    /// A sealed envelope, decryptable only by the client.
    Sealed { status: u16, envelope: Envelope },
}

impl Reply {
    pub fn status(&self) -> u16 {
        match self {
            Reply::Clear { status, .. } | Reply::Sealed { status, .. } => *status,
        }
    }

    fn clear_message(status: u16, message: &str) -> Self {
        Reply::Clear {
            status,
            body: json!({ "message": message }),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Ties the stores, the crypto, and the upstream client into the
/// transaction protocol. One instance serves the whole process; it holds
/// no per-request state.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    transactions: TransactionStore,
    keys: KeyStore,
    upstream: UpstreamClient,
    public_base_url: String,
}

impl Orchestrator {
    pub fn new(
        db: &GatewayDb,
        protector: KeyProtector,
        upstream: UpstreamClient,
        public_base_url: &str,
    ) -> Self {
        Self {
            transactions: TransactionStore::new(db),
            keys: KeyStore::new(db, protector),
            upstream,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    // -- Create -------------------------------------------------------------

    /// Create a transaction: validate the business fields, mint the two
    /// public identifiers, persist the transaction and the key stub, and
    /// return the customer-facing URL.
    pub fn create(&self, req: CreateRequest) -> Result<CreateResponse, SessionError> {
        if !validate::is_valid_name(&req.company_name) {
            return Err(SessionError::Validation("Invalid companyName".into()));
        }
        if !validate::is_valid_name(&req.program_name) {
            return Err(SessionError::Validation("Invalid programName".into()));
        }
        if !validate::is_valid_code(&req.code) {
            return Err(SessionError::Validation("Invalid code".into()));
        }
        if !validate::is_valid_msisdn(&req.merchant_msisdn) {
            return Err(SessionError::Validation("Invalid merchant phone number".into()));
        }
        if !validate::is_valid_amount(&req.amount) {
            return Err(SessionError::Validation("Invalid amount".into()));
        }

        let public_ids = PublicIds::mint();
        let record = self.transactions.create(
            crate::store::NewTransaction {
                company_name: req.company_name,
                program_name: req.program_name,
                code: req.code,
                merchant_msisdn: req.merchant_msisdn,
                amount: req.amount,
            },
            public_ids.clone(),
        )?;
        self.keys.create_stub(&public_ids)?;

        tracing::info!(
            transaction_id = %record.transaction_id,
            program = %record.program_name,
            "transaction created"
        );

        Ok(CreateResponse {
            url: format!(
                "{}{}/{}",
                self.public_base_url, PHONE_PAGE_PATH, public_ids.phone_page
            ),
        })
    }

    // -- ExchangeKeys -------------------------------------------------------

    /// Key exchange: store the client's public key, generate a fresh RSA
    /// pair for the transaction, install both through the protector, and
    /// hand the server public key back in the clear.
    ///
    /// Re-exchange on the same identifier overwrites the previous session
    /// (last writer wins; see DESIGN.md).
    pub fn exchange_keys(
        &self,
        req: ExchangeKeysRequest,
    ) -> Result<ExchangeKeysResponse, SessionError> {
        if req.client_public_key.is_empty() || req.phone_page_id.is_empty() {
            return Err(SessionError::Validation(
                "Missing client public key or phonePageId".into(),
            ));
        }
        if public_key_from_pem(&req.client_public_key).is_err() {
            return Err(SessionError::Validation("Invalid client public key".into()));
        }

        let pair = SessionKeyPair::generate()?;
        let server_public_key = pair.public_key_pem()?;
        let server_private_key = pair.private_key_pem()?;

        self.keys
            .install_keys(&req.phone_page_id, &req.client_public_key, &server_private_key)?;

        tracing::info!(page_id = %req.phone_page_id, "session keys installed");
        Ok(ExchangeKeysResponse { server_public_key })
    }

    // -- Authenticated operations --------------------------------------------

    /// GetToken: validate the sealed business fields and fetch a payment
    /// token from the processor.
    pub async fn get_token(&self, req: &SealedRequest) -> Reply {
        let keys = match self.resolve_session(&req.page_id) {
            Ok(keys) => keys,
            Err(reply) => return reply,
        };
        let payload = match self.open_payload(&keys, req) {
            Ok(payload) => payload,
            Err(reply) => return reply,
        };

        let company_name = field(&payload, "companyName");
        let program_name = field(&payload, "programName");
        let merchant_msisdn = field(&payload, "merchantMsisdn");
        let code = field(&payload, "code");

        if !validate::is_valid_name(company_name) {
            return self.sealed_error(&keys, 400, "Invalid companyName");
        }
        if !validate::is_valid_name(program_name) {
            return self.sealed_error(&keys, 400, "Invalid programName");
        }
        if !validate::is_valid_msisdn(merchant_msisdn) {
            return self.sealed_error(&keys, 400, "Invalid merchant phone number");
        }
        if !validate::is_valid_code(code) {
            return self.sealed_error(&keys, 400, "Invalid code");
        }

        let result = self
            .upstream
            .get_token(&GetTokenCall {
                program_name,
                company_name,
                merchant_msisdn,
                code,
            })
            .await;
        self.relay(&keys, result)
    }

    /// PaymentRequest: forward the payment to the processor; when the
    /// payload named a transaction and the answer carries an OTP,
    /// persist it with the customer number.
    ///
    /// OTP persistence is best-effort relative to the sealed response:
    /// the customer's success must not depend on the audit write, so a
    /// failed write is logged and the response still goes out.
    pub async fn payment_request(&self, req: &SealedRequest) -> Reply {
        let keys = match self.resolve_session(&req.page_id) {
            Ok(keys) => keys,
            Err(reply) => return reply,
        };
        let payload = match self.open_payload(&keys, req) {
            Ok(payload) => payload,
            Err(reply) => return reply,
        };

        let code = field(&payload, "code");
        let customer_msisdn = field(&payload, "customerMsisdn");
        let merchant_msisdn = field(&payload, "merchantMsisdn");
        let amount = field(&payload, "amount");
        let token = field(&payload, "token");
        let transaction_id = field(&payload, "transactionId");

        if !validate::is_valid_code(code) {
            return self.sealed_error(&keys, 400, "Invalid code");
        }
        if !validate::is_valid_msisdn(merchant_msisdn) {
            return self.sealed_error(&keys, 400, "Invalid merchant phone number");
        }
        if !validate::is_valid_msisdn(customer_msisdn) {
            return self.sealed_error(&keys, 400, "Invalid customer phone number");
        }
        if !validate::is_valid_amount(amount) {
            return self.sealed_error(&keys, 400, "Invalid amount");
        }

        let result = self
            .upstream
            .payment_request(&PaymentRequestCall {
                code,
                customer_msisdn,
                merchant_msisdn,
                transaction_id,
                amount,
                token,
            })
            .await;

        // Only payloads that named a transaction get the audit write.
        if let Ok(reply) = &result {
            if !transaction_id.is_empty() {
                if let Some(otp) = reply.body.pointer("/details/otp").and_then(Value::as_str) {
                    self.persist_otp(&req.page_id, otp, customer_msisdn);
                }
            }
        }

        self.relay(&keys, result)
    }

    /// PaymentConfirmation: forward the OTP; on upstream success, mark
    /// the transaction confirmed.
    pub async fn payment_confirmation(&self, req: &SealedRequest) -> Reply {
        let keys = match self.resolve_session(&req.page_id) {
            Ok(keys) => keys,
            Err(reply) => return reply,
        };
        let payload = match self.open_payload(&keys, req) {
            Ok(payload) => payload,
            Err(reply) => return reply,
        };

        let code = field(&payload, "code");
        let merchant_msisdn = field(&payload, "merchantMsisdn");
        let otp = field(&payload, "otp");
        let token = field(&payload, "token");
        let transaction_id = field(&payload, "transactionId");

        if transaction_id.is_empty() {
            return self.sealed_error(&keys, 400, "Missing transaction ID");
        }
        if !validate::is_valid_code(code) {
            return self.sealed_error(&keys, 400, "Invalid code");
        }
        if !validate::is_valid_msisdn(merchant_msisdn) {
            return self.sealed_error(&keys, 400, "Invalid merchant phone number");
        }
        if !validate::is_valid_otp(otp) {
            return self.sealed_error(&keys, 400, "Invalid OTP");
        }

        let result = self
            .upstream
            .payment_confirmation(&PaymentConfirmationCall {
                code,
                transaction_id,
                merchant_msisdn,
                otp,
                token,
            })
            .await;

        if result.is_ok() {
            match self.transactions.find_by_either_id(&req.page_id) {
                Ok(Some(record)) => {
                    if let Err(e) = self.transactions.mark_confirmed(&record.row_id) {
                        tracing::error!(row_id = %record.row_id, error = %e, "failed to mark confirmed");
                        return self.sealed_error(&keys, 500, "Internal server error");
                    }
                }
                Ok(None) => {
                    tracing::error!(page_id = %req.page_id, "confirmed payment has no transaction record");
                    return self.sealed_error(&keys, 500, "Internal server error");
                }
                Err(e) => {
                    tracing::error!(error = %e, "storage error after confirmation");
                    return self.sealed_error(&keys, 500, "Internal server error");
                }
            }
        }

        self.relay(&keys, result)
    }

    /// ResendOtp: ask the processor to resend the passcode. Does not
    /// mutate the stored OTP.
    pub async fn resend_otp(&self, req: &SealedRequest) -> Reply {
        let keys = match self.resolve_session(&req.page_id) {
            Ok(keys) => keys,
            Err(reply) => return reply,
        };
        let payload = match self.open_payload(&keys, req) {
            Ok(payload) => payload,
            Err(reply) => return reply,
        };

        let code = field(&payload, "code");
        let merchant_msisdn = field(&payload, "merchantMsisdn");
        let token = field(&payload, "token");
        let transaction_id = field(&payload, "transactionId");

        if transaction_id.is_empty() {
            return self.sealed_error(&keys, 400, "Missing transaction ID");
        }
        if !validate::is_valid_code(code) {
            return self.sealed_error(&keys, 400, "Invalid code");
        }
        if !validate::is_valid_msisdn(merchant_msisdn) {
            return self.sealed_error(&keys, 400, "Invalid merchant phone number");
        }

        let result = self
            .upstream
            .resend_otp(&ResendOtpCall {
                code,
                transaction_id,
                merchant_msisdn,
                token,
            })
            .await;
        self.relay(&keys, result)
    }

    /// GetRedirectUrl: fetch the post-payment redirect target from the
    /// processor.
    pub async fn get_redirect_url(&self, req: &SealedRequest) -> Reply {
        let keys = match self.resolve_session(&req.page_id) {
            Ok(keys) => keys,
            Err(reply) => return reply,
        };
        let payload = match self.open_payload(&keys, req) {
            Ok(payload) => payload,
            Err(reply) => return reply,
        };

        let company_name = field(&payload, "companyName");
        let program_name = field(&payload, "programName");
        let code = field(&payload, "code");

        if !validate::is_valid_name(company_name) {
            return self.sealed_error(&keys, 400, "Invalid companyName");
        }
        if !validate::is_valid_name(program_name) {
            return self.sealed_error(&keys, 400, "Invalid programName");
        }
        if !validate::is_valid_code(code) {
            return self.sealed_error(&keys, 400, "Invalid code");
        }

        let result = self
            .upstream
            .get_url(&GetUrlCall {
                company_name,
                program_name,
                code,
            })
            .await;
        self.relay(&keys, result)
    }

    // -- Read-only collaborator surface ---------------------------------------

    /// Display fields for the customer pages, looked up by either id.
    pub fn page_summary(&self, page_id: &str) -> Result<PageSummary, SessionError> {
        let record = self
            .transactions
            .find_by_either_id(page_id)?
            .ok_or_else(|| SessionError::NotFound(page_id.to_string()))?;
        Ok(PageSummary {
            company_name: record.company_name,
            program_name: record.program_name,
            amount: record.amount,
            merchant_msisdn: record.merchant_msisdn,
            payment_success: record.payment_success,
        })
    }

    /// Operator listing, optionally filtered by program name.
    pub fn list_transactions(
        &self,
        program_name: Option<&str>,
    ) -> Result<Vec<TransactionRecord>, SessionError> {
        let list = match program_name {
            Some(name) => self.transactions.list_by_program(name)?,
            None => self.transactions.list()?,
        };
        Ok(list)
    }

    // -- Shared request shape --------------------------------------------------

    /// Resolve and reveal the key session for an identifier. Failures here
    /// predate any known client key, so they map to clear replies.
    fn resolve_session(&self, page_id: &str) -> Result<SessionKeys, Reply> {
        if page_id.is_empty() {
            return Err(Reply::clear_message(400, "Missing page ID"));
        }
        self.keys.reveal_keys(page_id).map_err(|e| {
            let err = SessionError::from(e);
            Reply::clear_message(err.http_status(), &err.public_message())
        })
    }

    /// Open the inbound envelope and verify the embedded `pageId` matches
    /// the clear-text one. From here on every failure is sealed.
    fn open_payload(&self, keys: &SessionKeys, req: &SealedRequest) -> Result<Value, Reply> {
        let plaintext = match envelope::open(&req.envelope, &keys.server_private) {
            Ok(bytes) => bytes,
            Err(_) => return Err(self.sealed_error(keys, 400, "Invalid encrypted payload")),
        };
        let payload: Value = match serde_json::from_slice(&plaintext) {
            Ok(v) => v,
            Err(_) => return Err(self.sealed_error(keys, 400, "Invalid encrypted payload")),
        };
        if field(&payload, "pageId") != req.page_id {
            return Err(self.sealed_error(keys, 400, "Mismatched page ID"));
        }
        Ok(payload)
    }

    /// Seal a JSON body for the client. If sealing itself fails there is
    /// nothing meaningful left to protect, so the caller gets a generic
    /// clear 500.
    fn sealed(&self, keys: &SessionKeys, status: u16, body: &Value) -> Reply {
        let bytes = match serde_json::to_vec(body) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize sealed body");
                return Reply::clear_message(500, "Internal server error");
            }
        };
        match envelope::seal(&bytes, &keys.client_public) {
            Ok(envelope) => Reply::Sealed { status, envelope },
            Err(e) => {
                tracing::error!(error = %e, "failed to seal response");
                Reply::clear_message(500, "Internal server error")
            }
        }
    }

    fn sealed_error(&self, keys: &SessionKeys, status: u16, message: &str) -> Reply {
        self.sealed(keys, status, &json!({ "message": message }))
    }

    /// Map an upstream result into a sealed reply mirroring the
    /// processor's status.
    fn relay(&self, keys: &SessionKeys, result: Result<UpstreamReply, UpstreamError>) -> Reply {
        match result {
            Ok(reply) => self.sealed(keys, reply.status, &reply.body),
            Err(UpstreamError::Status { status, message }) => {
                self.sealed_error(keys, status, &message)
            }
            Err(UpstreamError::Transport(e)) => {
                tracing::error!(error = %e, "upstream transport failure");
                self.sealed_error(keys, 502, "Upstream unreachable")
            }
        }
    }

    fn persist_otp(&self, page_id: &str, otp: &str, customer_msisdn: &str) {
        match self.transactions.find_by_either_id(page_id) {
            Ok(Some(record)) => {
                if let Err(e) =
                    self.transactions
                        .record_otp_and_customer(&record.row_id, otp, customer_msisdn)
                {
                    tracing::warn!(row_id = %record.row_id, error = %e, "failed to persist OTP");
                }
            }
            Ok(None) => {
                tracing::warn!(page_id = %page_id, "no transaction record for OTP persistence");
            }
            Err(e) => {
                tracing::warn!(error = %e, "storage error during OTP persistence");
            }
        }
    }
}

/// Read a string field out of a decrypted payload; absent or non-string
/// fields read as empty and fail the relevant validation with a
/// field-specific message.
fn field<'a>(payload: &'a Value, name: &str) -> &'a str {
    payload.get(name).and_then(Value::as_str).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MASTER_KEY_LENGTH;
    use crate::crypto::keys::private_key_from_pem;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn orchestrator(upstream_url: &str) -> Orchestrator {
        let db = GatewayDb::open_temporary().unwrap();
        Orchestrator::new(
            &db,
            KeyProtector::new([9u8; MASTER_KEY_LENGTH]),
            UpstreamClient::new(upstream_url).unwrap(),
            "https://pay.example.com",
        )
    }

    fn create_request() -> CreateRequest {
        CreateRequest {
            company_name: "Acme".into(),
            program_name: "P1".into(),
            code: "123".into(),
            merchant_msisdn: "0999000000".into(),
            amount: "100".into(),
        }
    }

    /// Runs create + exchange and returns the phone page id, the client's
    /// key pair, and the server public key for sealing requests.
    fn established_session(orch: &Orchestrator) -> (String, SessionKeyPair, rsa::RsaPublicKey) {
        let created = orch.create(create_request()).unwrap();
        let page_id = created.url.rsplit('/').next().unwrap().to_string();

        let client_pair = SessionKeyPair::generate().unwrap();
        let exchanged = orch
            .exchange_keys(ExchangeKeysRequest {
                client_public_key: client_pair.public_key_pem().unwrap(),
                phone_page_id: page_id.clone(),
            })
            .unwrap();
        let server_public = public_key_from_pem(&exchanged.server_public_key).unwrap();
        (page_id, client_pair, server_public)
    }

    fn seal_request(page_id: &str, payload: Value, server_public: &rsa::RsaPublicKey) -> SealedRequest {
        let envelope = envelope::seal(&serde_json::to_vec(&payload).unwrap(), server_public).unwrap();
        SealedRequest {
            page_id: page_id.to_string(),
            envelope,
        }
    }

    fn open_reply(reply: &Reply, client: &SessionKeyPair) -> (u16, Value) {
        match reply {
            Reply::Sealed { status, envelope } => {
                let bytes = envelope::open(envelope, client.private_key()).unwrap();
                (*status, serde_json::from_slice(&bytes).unwrap())
            }
            Reply::Clear { status, body } => panic!("expected sealed, got clear {status}: {body}"),
        }
    }

    // -- 1. Creation mints a URL and a stub ------------------------------------

    #[test]
    fn create_returns_url_with_fresh_page_id() {
        let orch = orchestrator("http://127.0.0.1:1");
        let resp = orch.create(create_request()).unwrap();
        assert!(resp
            .url
            .starts_with("https://pay.example.com/api/clients/customer-phone/"));

        let page_id = resp.url.rsplit('/').next().unwrap();
        let record = orch.transactions.find_by_either_id(page_id).unwrap().unwrap();
        assert_eq!(record.company_name, "Acme");

        // Key stub exists with both fields empty.
        let stub = orch.keys.find_by_either_id(page_id).unwrap().unwrap();
        assert!(stub.client_public_key.is_none());
        assert!(stub.server_private_key.is_none());
    }

    // -- 2. Creation validates fields ------------------------------------------

    #[test]
    fn create_rejects_invalid_fields_with_specific_messages() {
        let orch = orchestrator("http://127.0.0.1:1");

        let mut req = create_request();
        req.merchant_msisdn = "12345".into();
        match orch.create(req) {
            Err(SessionError::Validation(msg)) => assert_eq!(msg, "Invalid merchant phone number"),
            other => panic!("expected validation error, got {:?}", other.map(|r| r.url)),
        }

        let mut req = create_request();
        req.amount = "".into();
        assert!(matches!(orch.create(req), Err(SessionError::Validation(_))));
    }

    // -- 3. Exchange on unknown identifier fails --------------------------------

    #[test]
    fn exchange_keys_requires_existing_stub() {
        let orch = orchestrator("http://127.0.0.1:1");
        let client_pair = SessionKeyPair::generate().unwrap();
        let result = orch.exchange_keys(ExchangeKeysRequest {
            client_public_key: client_pair.public_key_pem().unwrap(),
            phone_page_id: "no-such-id".into(),
        });
        assert!(matches!(result, Err(SessionError::Custody(_))));
    }

    // -- 4. Authenticated op before key exchange fails closed -------------------

    #[tokio::test]
    async fn operations_fail_closed_without_keys() {
        let orch = orchestrator("http://127.0.0.1:1");
        let created = orch.create(create_request()).unwrap();
        let page_id = created.url.rsplit('/').next().unwrap().to_string();

        // A syntactically plausible envelope that must never be opened.
        let req = SealedRequest {
            page_id,
            envelope: Envelope {
                encrypted_key: "AAAA".into(),
                nonce: "AAAA".into(),
                tag: "AAAA".into(),
                ciphertext: "AAAA".into(),
            },
        };
        match orch.get_token(&req).await {
            Reply::Clear { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body["message"], "Missing encryption keys");
            }
            other => panic!("expected clear reply, got {:?}", other),
        }
    }

    // -- 5. Unknown identifier answers clear 404 --------------------------------

    #[tokio::test]
    async fn unknown_identifier_is_clear_404() {
        let orch = orchestrator("http://127.0.0.1:1");
        let req = SealedRequest {
            page_id: "ghost".into(),
            envelope: Envelope {
                encrypted_key: String::new(),
                nonce: String::new(),
                tag: String::new(),
                ciphertext: String::new(),
            },
        };
        match orch.resend_otp(&req).await {
            Reply::Clear { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body["message"], "Transaction not found");
            }
            other => panic!("expected clear reply, got {:?}", other),
        }
    }

    // -- 6. Full get-token round trip -------------------------------------------

    #[tokio::test]
    async fn get_token_seals_upstream_body_with_upstream_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/clients/get-token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"token": "tok-99"})),
            )
            .mount(&server)
            .await;

        let orch = orchestrator(&server.uri());
        let (page_id, client_pair, server_public) = established_session(&orch);

        let req = seal_request(
            &page_id,
            json!({
                "pageId": page_id,
                "companyName": "Acme",
                "programName": "P1",
                "merchantMsisdn": "0999000000",
                "code": "123",
            }),
            &server_public,
        );
        let reply = orch.get_token(&req).await;
        let (status, body) = open_reply(&reply, &client_pair);
        assert_eq!(status, 200);
        assert_eq!(body["token"], "tok-99");
    }

    // -- 7. Mismatched embedded pageId is sealed and never reaches upstream -----

    #[tokio::test]
    async fn mismatched_page_id_is_sealed_400() {
        // No mock mounted: an upstream call would be a transport error,
        // so a "Mismatched page ID" answer proves upstream was not hit.
        let orch = orchestrator("http://127.0.0.1:1");
        let (page_id, client_pair, server_public) = established_session(&orch);

        let req = seal_request(
            &page_id,
            json!({
                "pageId": "someone-elses-id",
                "companyName": "Acme",
                "programName": "P1",
                "merchantMsisdn": "0999000000",
                "code": "123",
            }),
            &server_public,
        );
        let reply = orch.get_token(&req).await;
        let (status, body) = open_reply(&reply, &client_pair);
        assert_eq!(status, 400);
        assert_eq!(body["message"], "Mismatched page ID");
    }

    // -- 8. Garbage envelope is a sealed error ----------------------------------

    #[tokio::test]
    async fn undecryptable_envelope_is_sealed_400() {
        let orch = orchestrator("http://127.0.0.1:1");
        let (page_id, client_pair, server_public) = established_session(&orch);

        // Sealed for the wrong recipient: the client's own key instead of
        // the server's.
        let _ = server_public;
        let envelope =
            envelope::seal(br#"{"pageId":"x"}"#, client_pair.public_key()).unwrap();
        let reply = orch
            .get_token(&SealedRequest { page_id, envelope })
            .await;
        let (status, body) = open_reply(&reply, &client_pair);
        assert_eq!(status, 400);
        assert_eq!(body["message"], "Invalid encrypted payload");
    }

    // -- 9. Payment request persists OTP and customer number ---------------------

    #[tokio::test]
    async fn payment_request_persists_otp_best_effort() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/clients/payment-request"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "pending",
                "details": { "otp": "654321" },
            })))
            .mount(&server)
            .await;

        let orch = orchestrator(&server.uri());
        let (page_id, client_pair, server_public) = established_session(&orch);

        let req = seal_request(
            &page_id,
            json!({
                "pageId": page_id,
                "code": "123",
                "customerMsisdn": "0988111222",
                "merchantMsisdn": "0999000000",
                "amount": "100",
                "token": "tok-99",
                "transactionId": "t-1",
            }),
            &server_public,
        );
        let reply = orch.payment_request(&req).await;
        let (status, body) = open_reply(&reply, &client_pair);
        assert_eq!(status, 200);
        assert_eq!(body["details"]["otp"], "654321");

        let record = orch.transactions.find_by_either_id(&page_id).unwrap().unwrap();
        assert_eq!(record.otp.as_deref(), Some("654321"));
        assert_eq!(record.customer_msisdn.as_deref(), Some("0988111222"));
        assert!(!record.payment_success);
    }

    // -- 9b. No transactionId in the payload, no audit write ----------------------

    #[tokio::test]
    async fn payment_request_without_transaction_id_skips_otp_write() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/clients/payment-request"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "pending",
                "details": { "otp": "654321" },
            })))
            .mount(&server)
            .await;

        let orch = orchestrator(&server.uri());
        let (page_id, client_pair, server_public) = established_session(&orch);

        let req = seal_request(
            &page_id,
            json!({
                "pageId": page_id,
                "code": "123",
                "customerMsisdn": "0988111222",
                "merchantMsisdn": "0999000000",
                "amount": "100",
                "token": "tok-99",
            }),
            &server_public,
        );
        let reply = orch.payment_request(&req).await;

        // The sealed answer still carries the processor's OTP.
        let (status, body) = open_reply(&reply, &client_pair);
        assert_eq!(status, 200);
        assert_eq!(body["details"]["otp"], "654321");

        // Nothing was written without a transaction id to tie it to.
        let record = orch.transactions.find_by_either_id(&page_id).unwrap().unwrap();
        assert!(record.otp.is_none());
        assert!(record.customer_msisdn.is_none());
    }

    // -- 10. Upstream failure on confirmation: sealed, status mirrored, no state --

    #[tokio::test]
    async fn confirmation_upstream_500_leaves_payment_unconfirmed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/clients/payment-confirmation"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({"message": "processor exploded"})),
            )
            .mount(&server)
            .await;

        let orch = orchestrator(&server.uri());
        let (page_id, client_pair, server_public) = established_session(&orch);

        let req = seal_request(
            &page_id,
            json!({
                "pageId": page_id,
                "code": "123",
                "merchantMsisdn": "0999000000",
                "otp": "654321",
                "token": "tok-99",
                "transactionId": "t-1",
            }),
            &server_public,
        );
        let reply = orch.payment_confirmation(&req).await;
        let (status, body) = open_reply(&reply, &client_pair);
        assert_eq!(status, 500);
        assert_eq!(body["message"], "processor exploded");

        let record = orch.transactions.find_by_either_id(&page_id).unwrap().unwrap();
        assert!(!record.payment_success);
    }

    // -- 11. Successful confirmation marks the payment ---------------------------

    #[tokio::test]
    async fn confirmation_success_marks_payment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/clients/payment-confirmation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .mount(&server)
            .await;

        let orch = orchestrator(&server.uri());
        let (page_id, client_pair, server_public) = established_session(&orch);

        let req = seal_request(
            &page_id,
            json!({
                "pageId": page_id,
                "code": "123",
                "merchantMsisdn": "0999000000",
                "otp": "654321",
                "token": "tok-99",
                "transactionId": "t-1",
            }),
            &server_public,
        );
        let reply = orch.payment_confirmation(&req).await;
        let (status, _) = open_reply(&reply, &client_pair);
        assert_eq!(status, 200);

        let record = orch.transactions.find_by_either_id(&page_id).unwrap().unwrap();
        assert!(record.payment_success);
        assert_eq!(record.stage(true), crate::store::LifecycleStage::Confirmed);
    }

    // -- 12. Resend does not touch the stored OTP ---------------------------------

    #[tokio::test]
    async fn resend_otp_does_not_mutate_state() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/clients/resend-otp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "resent"})))
            .mount(&server)
            .await;

        let orch = orchestrator(&server.uri());
        let (page_id, client_pair, server_public) = established_session(&orch);

        let req = seal_request(
            &page_id,
            json!({
                "pageId": page_id,
                "code": "123",
                "merchantMsisdn": "0999000000",
                "token": "tok-99",
                "transactionId": "t-1",
            }),
            &server_public,
        );
        let reply = orch.resend_otp(&req).await;
        let (status, _) = open_reply(&reply, &client_pair);
        assert_eq!(status, 200);

        let record = orch.transactions.find_by_either_id(&page_id).unwrap().unwrap();
        assert!(record.otp.is_none());
    }

    // -- 13. Sealed validation errors carry field-specific messages ---------------

    #[tokio::test]
    async fn sealed_validation_error_names_the_field() {
        let orch = orchestrator("http://127.0.0.1:1");
        let (page_id, client_pair, server_public) = established_session(&orch);

        let req = seal_request(
            &page_id,
            json!({
                "pageId": page_id,
                "code": "123",
                "customerMsisdn": "not-a-number",
                "merchantMsisdn": "0999000000",
                "amount": "100",
            }),
            &server_public,
        );
        let reply = orch.payment_request(&req).await;
        let (status, body) = open_reply(&reply, &client_pair);
        assert_eq!(status, 400);
        assert_eq!(body["message"], "Invalid customer phone number");
    }

    // -- 14. Page summary and listing ---------------------------------------------

    #[test]
    fn page_summary_and_listing() {
        let orch = orchestrator("http://127.0.0.1:1");
        let created = orch.create(create_request()).unwrap();
        let page_id = created.url.rsplit('/').next().unwrap();

        let summary = orch.page_summary(page_id).unwrap();
        assert_eq!(summary.company_name, "Acme");
        assert_eq!(summary.amount, "100");
        assert!(!summary.payment_success);

        assert!(matches!(
            orch.page_summary("ghost"),
            Err(SessionError::NotFound(_))
        ));

        assert_eq!(orch.list_transactions(None).unwrap().len(), 1);
        assert_eq!(orch.list_transactions(Some("P1")).unwrap().len(), 1);
        assert!(orch.list_transactions(Some("P9")).unwrap().is_empty());
    }

    // -- 15. Re-exchange invalidates the previous session -------------------------

    #[tokio::test]
    async fn reexchange_last_write_wins() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/clients/get-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "t"})))
            .mount(&server)
            .await;

        let orch = orchestrator(&server.uri());
        let (page_id, first_client, first_server_public) = established_session(&orch);

        // Second exchange on the same identifier.
        let second_client = SessionKeyPair::generate().unwrap();
        let exchanged = orch
            .exchange_keys(ExchangeKeysRequest {
                client_public_key: second_client.public_key_pem().unwrap(),
                phone_page_id: page_id.clone(),
            })
            .unwrap();
        let second_server_public = public_key_from_pem(&exchanged.server_public_key).unwrap();

        // A request sealed for the *old* server key no longer opens.
        let stale = seal_request(&page_id, json!({"pageId": page_id}), &first_server_public);
        let reply = orch.get_token(&stale).await;
        // The error comes back sealed for the new client key.
        match &reply {
            Reply::Sealed { status, envelope } => {
                assert_eq!(*status, 400);
                assert!(envelope::open(envelope, first_client.private_key()).is_err());
                let bytes = envelope::open(envelope, second_client.private_key()).unwrap();
                let body: Value = serde_json::from_slice(&bytes).unwrap();
                assert_eq!(body["message"], "Invalid encrypted payload");
            }
            other => panic!("expected sealed reply, got {:?}", other),
        }

        // The new session works end to end.
        let fresh = seal_request(
            &page_id,
            json!({
                "pageId": page_id,
                "companyName": "Acme",
                "programName": "P1",
                "merchantMsisdn": "0999000000",
                "code": "123",
            }),
            &second_server_public,
        );
        let reply = orch.get_token(&fresh).await;
        let (status, _) = open_reply(&reply, &second_client);
        assert_eq!(status, 200);
    }
}
