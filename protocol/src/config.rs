//! # Protocol Configuration & Constants
//!
//! Every magic number in VELA lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! Most of these values participate in the wire contract with deployed
//! clients (envelope sizes, identifier formats), so changing them after a
//! client SDK ships is somewhere between "difficult" and "career-ending".

use std::time::Duration;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// AES-256-GCM for symmetric encryption. 256-bit keys, 96-bit nonces,
/// 128-bit authentication tags. Used both for the envelope payload cipher
/// and for at-rest protection of key material.
pub const SYMMETRIC_ALGORITHM: &str = "AES-256-GCM";

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length in bytes. 96 bits is the standard and the only
/// length you should use. 12 bytes. Not 16. Not 8. Twelve.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// The process-wide master key protecting key material at rest is a raw
/// AES-256 key, provisioned as 64 hex characters.
pub const MASTER_KEY_LENGTH: usize = 32;

/// RSA modulus size for per-transaction session key pairs.
///
/// 2048 bits keeps key generation fast enough to do once per transaction
/// while the key only ever wraps a single 32-byte AES key per message.
/// The key pair lives for one payment flow, not for years.
pub const RSA_KEY_BITS: usize = 2048;

/// Asymmetric padding scheme for the wrapped envelope key. OAEP with
/// SHA-256; chosen-ciphertext resistance is not optional here.
pub const RSA_PADDING_SCHEME: &str = "RSA-OAEP-SHA256";

// ---------------------------------------------------------------------------
// Upstream Processor
// ---------------------------------------------------------------------------

/// Hard ceiling on a single upstream processor call.
///
/// Mobile-money providers can sit on a payment request for a long time
/// while the customer finds their phone. Five minutes tolerates that
/// without letting a request hang forever.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for establishing the TCP/TLS connection to the upstream.
/// Distinct from [`UPSTREAM_TIMEOUT`]: a provider that won't even accept
/// a connection in 10 seconds is down, not slow.
pub const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Business Field Limits
// ---------------------------------------------------------------------------

/// Maximum length for free-text business fields (company, program names).
pub const MAX_NAME_LENGTH: usize = 64;

/// Maximum digits in a merchant code.
pub const MAX_CODE_LENGTH: usize = 12;

/// Maximum digits in an amount field. Amounts travel as decimal strings
/// in the smallest currency unit; the protocol never does arithmetic
/// on them.
pub const MAX_AMOUNT_LENGTH: usize = 12;

/// Subscriber numbers are ten digits starting with the mobile prefix.
pub const MSISDN_LENGTH: usize = 10;

/// National mobile prefix for both merchant and customer numbers.
pub const MSISDN_PREFIX: &str = "09";

/// One-time passcodes from the processor are six decimal digits.
pub const OTP_LENGTH: usize = 6;

// ---------------------------------------------------------------------------
// Network Parameters
// ---------------------------------------------------------------------------

/// Default HTTP API port for the gateway.
pub const DEFAULT_HTTP_PORT: u16 = 8740;

/// Default metrics (Prometheus) port.
pub const DEFAULT_METRICS_PORT: u16 = 8742;

/// The crate version string, for the gateway's version reporting.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Path template for the customer-facing phone page, addressed by the
/// transaction's `phonePageId`. Appended to the configured public base URL.
pub const PHONE_PAGE_PATH: &str = "/api/clients/customer-phone";
