//! # Key Custody Store
//!
//! Server-side custody of each transaction's asymmetric key session: the
//! client's RSA public key and the server's RSA private key, both
//! protected at rest by the [`KeyProtector`].
//!
//! This is the narrowest code path in the gateway. Nothing else reads or
//! writes key material, and nothing leaves this module unprotected except
//! through [`KeyStore::reveal_keys`], whose output is request-scoped.
//!
//! A stub record (both keys `None`) is created alongside the transaction.
//! Key exchange populates both fields in one write; re-exchange overwrites
//! both in one write (last writer wins, see DESIGN.md). Every operation
//! that needs the keys fails closed while either field is `None`.

use serde::{Deserialize, Serialize};
use sled::Tree;
use thiserror::Error;
use uuid::Uuid;

use super::transactions::PublicIds;
use super::{decode, encode, DbError, DbResult, GatewayDb};
use crate::crypto::keys::{private_key_from_pem, public_key_from_pem, KeyError};
use crate::crypto::{KeyProtectionError, KeyProtector};

/// Errors from the key custody store.
#[derive(Debug, Error)]
pub enum CustodyError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Protection(#[from] KeyProtectionError),

    /// No key record matches the presented identifier.
    #[error("no key record for identifier {0}")]
    NotFound(String),

    /// The record exists but key exchange has not happened (or only half
    /// happened, which would be a bug, not a state).
    #[error("missing encryption keys")]
    MissingKeys,

    /// Stored material revealed fine but did not parse as a key. Either
    /// the store was corrupted below the authentication layer or the
    /// wrong master key verified by coincidence; both are fatal.
    #[error("stored key material failed to parse")]
    Malformed(#[from] KeyError),
}

/// A stored key record. Key fields hold *protected* blobs, never PEM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRecord {
    /// Internal row identity, independent of the transaction store's.
    pub row_id: String,
    /// Join key with the transaction store.
    pub public_ids: PublicIds,
    /// The client's RSA public key, protected at rest.
    pub client_public_key: Option<String>,
    /// The server's RSA private key for this transaction, protected at rest.
    pub server_private_key: Option<String>,
}

impl KeyRecord {
    /// Both halves present. The only state in which cryptographic
    /// operations are allowed to proceed.
    pub fn keys_installed(&self) -> bool {
        self.client_public_key.is_some() && self.server_private_key.is_some()
    }
}

/// The revealed, parsed key session for a single request.
///
/// Do not cache this beyond the request it was fetched for.
pub struct SessionKeys {
    pub client_public: rsa::RsaPublicKey,
    pub server_private: rsa::RsaPrivateKey,
}

/// Typed access to the `key_records` and `key_ids` trees, with the
/// protector baked in so callers cannot skip it.
#[derive(Debug, Clone)]
pub struct KeyStore {
    records: Tree,
    ids: Tree,
    protector: KeyProtector,
}

impl KeyStore {
    pub fn new(db: &GatewayDb, protector: KeyProtector) -> Self {
        Self {
            records: db.key_records_tree().clone(),
            ids: db.key_ids_tree().clone(),
            protector,
        }
    }

    /// Create the stub record for a new transaction: identifiers present,
    /// both key fields empty.
    pub fn create_stub(&self, public_ids: &PublicIds) -> DbResult<()> {
        let record = KeyRecord {
            row_id: Uuid::new_v4().to_string(),
            public_ids: public_ids.clone(),
            client_public_key: None,
            server_private_key: None,
        };
        self.records
            .insert(record.row_id.as_bytes(), encode(&record)?)?;
        self.ids
            .insert(record.public_ids.phone_page.as_bytes(), record.row_id.as_bytes())?;
        self.ids
            .insert(record.public_ids.otp_page.as_bytes(), record.row_id.as_bytes())?;
        Ok(())
    }

    /// Look up a key record by either public identifier.
    pub fn find_by_either_id(&self, id: &str) -> DbResult<Option<KeyRecord>> {
        let Some(row_id) = self.ids.get(id.as_bytes())? else {
            return Ok(None);
        };
        match self.records.get(&row_id)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Install (or overwrite) both keys for the record matching `id`.
    ///
    /// Both PEMs pass through the protector before touching the tree, and
    /// both fields land in a single record write, so a reader never
    /// observes one installed key. Fails with [`CustodyError::NotFound`]
    /// if no stub exists for the identifier.
    pub fn install_keys(
        &self,
        id: &str,
        client_public_key_pem: &str,
        server_private_key_pem: &str,
    ) -> Result<(), CustodyError> {
        let mut record = self
            .find_by_either_id(id)?
            .ok_or_else(|| CustodyError::NotFound(id.to_string()))?;

        record.client_public_key = Some(self.protector.protect(client_public_key_pem)?);
        record.server_private_key = Some(self.protector.protect(server_private_key_pem)?);

        self.records
            .insert(record.row_id.as_bytes(), encode(&record)?)
            .map_err(DbError::from)?;
        Ok(())
    }

    /// Reveal and parse both keys for the record matching `id`.
    ///
    /// Fails closed with [`CustodyError::MissingKeys`] while key exchange
    /// has not completed.
    pub fn reveal_keys(&self, id: &str) -> Result<SessionKeys, CustodyError> {
        let record = self
            .find_by_either_id(id)?
            .ok_or_else(|| CustodyError::NotFound(id.to_string()))?;

        let (client_blob, server_blob) = match (&record.client_public_key, &record.server_private_key)
        {
            (Some(c), Some(s)) => (c, s),
            _ => return Err(CustodyError::MissingKeys),
        };

        let client_pem = self.protector.reveal(client_blob)?;
        let server_pem = self.protector.reveal(server_blob)?;

        Ok(SessionKeys {
            client_public: public_key_from_pem(&client_pem)?,
            server_private: private_key_from_pem(&server_pem)?,
        })
    }
}
