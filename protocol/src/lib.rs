// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # VELA Protocol: Core Library
//!
//! VELA brokers payment transactions between an end-customer client and an
//! upstream mobile-money processor. After a one-time key exchange, every
//! message on the channel travels inside a per-transaction hybrid-encryption
//! envelope, so intermediaries between the customer's device and this
//! gateway never see a payment payload in the clear.
//!
//! ## Architecture
//!
//! The crate is split into modules that mirror the actual concerns of the
//! gateway:
//!
//! - **crypto**: Key material protection, RSA session key pairs, and the
//!   hybrid envelope codec. The security boundary of the whole system.
//! - **store**: Persistent custody of transactions and key records, keyed
//!   by a pair of opaque public identifiers.
//! - **validate**: Business-field validation (names, MSISDNs, amounts, OTPs).
//! - **upstream**: HTTP client for the remote payment processor.
//! - **session**: The transaction lifecycle orchestrator tying it together.
//! - **config**: Protocol constants and operational parameters.
//! - **error**: The gateway-level error taxonomy.
//!
//! ## Design Philosophy
//!
//! 1. Key material never rests in a store in plaintext.
//! 2. Once a client public key is known, even errors go back sealed.
//! 3. Cryptographic failures are opaque. No oracle tells an attacker
//!    whether the key or the ciphertext was wrong.
//! 4. If it touches money, it has tests. Plural.

pub mod config;
pub mod crypto;
pub mod error;
pub mod session;
pub mod store;
pub mod upstream;
pub mod validate;
