//! # Transaction Store
//!
//! Persistent record of every payment transaction the gateway brokers:
//! the immutable business fields set at creation, plus the lifecycle
//! fields (`otp`, `customerMsisdn`, `paymentSuccess`) that get set, never
//! cleared, as the flow advances.
//!
//! Lookups accept *either* of the transaction's two public identifiers.
//! Mutations target the store's own internal row id, never the public
//! identifiers.
//!
//! Lifecycle stage is not stored. It is derived from which optional
//! fields are populated (see [`TransactionRecord::stage`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::Tree;
use uuid::Uuid;

use super::{decode, encode, DbError, DbResult, GatewayDb};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// The pair of opaque public identifiers minted for each transaction.
///
/// Both address the same transaction and the same key session; the client
/// uses one per customer-facing page. Unguessable (UUIDv4) and never
/// reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicIds {
    /// Identifier addressing the customer phone-entry page.
    pub phone_page: String,
    /// Identifier addressing the OTP-entry page.
    pub otp_page: String,
}

impl PublicIds {
    /// Mint a fresh pair of identifiers.
    pub fn mint() -> Self {
        Self {
            phone_page: Uuid::new_v4().to_string(),
            otp_page: Uuid::new_v4().to_string(),
        }
    }

    /// Whether `id` is either member of the pair.
    pub fn matches(&self, id: &str) -> bool {
        self.phone_page == id || self.otp_page == id
    }
}

/// Immutable business fields supplied at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTransaction {
    pub company_name: String,
    pub program_name: String,
    pub code: String,
    pub merchant_msisdn: String,
    pub amount: String,
}

/// A stored transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    /// Internal row identity. Mutations address this, not the public ids.
    pub row_id: String,
    /// Globally unique transaction token, immutable after creation.
    pub transaction_id: String,
    /// The dual public identifiers; join key with the key custody store.
    pub public_ids: PublicIds,
    pub company_name: String,
    pub program_name: String,
    pub code: String,
    pub merchant_msisdn: String,
    pub amount: String,
    /// Set the first time a payment request succeeds.
    pub customer_msisdn: Option<String>,
    /// Set when the processor returns a one-time passcode.
    pub otp: Option<String>,
    /// Set true only after a successful confirmation.
    pub payment_success: bool,
    /// Creation timestamp, never mutated.
    pub created_at: DateTime<Utc>,
}

/// Lifecycle stage derived from populated fields.
///
/// Token issuance leaves no persistent trace (the token only exists inside
/// the sealed channel), so there is no `TokenIssued` variant to derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleStage {
    Created,
    KeysExchanged,
    OtpIssued,
    Confirmed,
}

impl TransactionRecord {
    /// Derive the lifecycle stage. Key presence lives in the custody
    /// store, so the caller passes it in.
    pub fn stage(&self, keys_installed: bool) -> LifecycleStage {
        if self.payment_success {
            LifecycleStage::Confirmed
        } else if self.otp.is_some() {
            LifecycleStage::OtpIssued
        } else if keys_installed {
            LifecycleStage::KeysExchanged
        } else {
            LifecycleStage::Created
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Typed access to the `transactions` and `transaction_ids` trees.
#[derive(Debug, Clone)]
pub struct TransactionStore {
    records: Tree,
    ids: Tree,
}

impl TransactionStore {
    pub fn new(db: &GatewayDb) -> Self {
        Self {
            records: db.transactions_tree().clone(),
            ids: db.transaction_ids_tree().clone(),
        }
    }

    /// Create a transaction with freshly minted identifiers.
    ///
    /// Inserts the record and both index entries. The identifiers are
    /// UUIDv4, so they are unique across all transactions.
    pub fn create(&self, fields: NewTransaction, public_ids: PublicIds) -> DbResult<TransactionRecord> {
        let record = TransactionRecord {
            row_id: Uuid::new_v4().to_string(),
            transaction_id: Uuid::new_v4().to_string(),
            public_ids,
            company_name: fields.company_name,
            program_name: fields.program_name,
            code: fields.code,
            merchant_msisdn: fields.merchant_msisdn,
            amount: fields.amount,
            customer_msisdn: None,
            otp: None,
            payment_success: false,
            created_at: Utc::now(),
        };

        self.records
            .insert(record.row_id.as_bytes(), encode(&record)?)?;
        self.ids
            .insert(record.public_ids.phone_page.as_bytes(), record.row_id.as_bytes())?;
        self.ids
            .insert(record.public_ids.otp_page.as_bytes(), record.row_id.as_bytes())?;

        Ok(record)
    }

    /// Look up a transaction by either of its public identifiers.
    pub fn find_by_either_id(&self, id: &str) -> DbResult<Option<TransactionRecord>> {
        let Some(row_id) = self.ids.get(id.as_bytes())? else {
            return Ok(None);
        };
        match self.records.get(&row_id)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Record the OTP and customer number returned by a successful
    /// payment request. Set-only: neither field is ever cleared.
    pub fn record_otp_and_customer(
        &self,
        row_id: &str,
        otp: &str,
        customer_msisdn: &str,
    ) -> DbResult<()> {
        let mut record = self.get(row_id)?;
        record.otp = Some(otp.to_string());
        record.customer_msisdn = Some(customer_msisdn.to_string());
        self.records.insert(row_id.as_bytes(), encode(&record)?)?;
        Ok(())
    }

    /// Mark the payment confirmed.
    pub fn mark_confirmed(&self, row_id: &str) -> DbResult<()> {
        let mut record = self.get(row_id)?;
        record.payment_success = true;
        self.records.insert(row_id.as_bytes(), encode(&record)?)?;
        Ok(())
    }

    /// All transactions, in no particular order. Operator listing only.
    pub fn list(&self) -> DbResult<Vec<TransactionRecord>> {
        let mut out = Vec::new();
        for entry in self.records.iter() {
            let (_, bytes) = entry?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    /// Transactions belonging to the given program.
    pub fn list_by_program(&self, program_name: &str) -> DbResult<Vec<TransactionRecord>> {
        let mut out = self.list()?;
        out.retain(|t| t.program_name == program_name);
        Ok(out)
    }

    fn get(&self, row_id: &str) -> DbResult<TransactionRecord> {
        match self.records.get(row_id.as_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Err(DbError::NotFound(row_id.to_string())),
        }
    }
}
