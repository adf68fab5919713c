//! # Cryptography Module
//!
//! Every cryptographic operation in VELA lives here:
//!
//! - [`protect`]: at-rest protection of key material under the process
//!   master key (AES-256-GCM).
//! - [`keys`]: per-transaction RSA-2048 session key pairs with
//!   SPKI / PKCS#8 PEM serialization.
//! - [`envelope`]: the hybrid envelope codec: a fresh AES-256-GCM key per
//!   message, wrapped with RSA-OAEP(SHA-256).
//!
//! No module outside this one touches a cipher directly.

pub mod envelope;
pub mod keys;
pub mod protect;

pub use envelope::{open, seal, Envelope, EnvelopeError};
pub use keys::{KeyError, SessionKeyPair};
pub use protect::{KeyProtectionError, KeyProtector};
