//! # Business-Field Validation
//!
//! Small predicates over the fields clients send. These run before
//! anything is persisted and before anything is forwarded upstream; a
//! field that fails here stops the request with a `ValidationError`.
//!
//! All fields arrive as strings (amounts and codes included). The
//! protocol never does arithmetic on amounts; it only checks shape.

use crate::config::{
    MAX_AMOUNT_LENGTH, MAX_CODE_LENGTH, MAX_NAME_LENGTH, MSISDN_LENGTH, MSISDN_PREFIX, OTP_LENGTH,
};

/// Free-text name fields: non-empty, bounded, no control characters.
pub fn is_valid_name(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty()
        && trimmed.len() <= MAX_NAME_LENGTH
        && !trimmed.chars().any(char::is_control)
}

/// Merchant codes: all digits, bounded length.
pub fn is_valid_code(value: &str) -> bool {
    !value.is_empty() && value.len() <= MAX_CODE_LENGTH && value.chars().all(|c| c.is_ascii_digit())
}

/// Subscriber numbers: exactly ten digits with the national mobile prefix.
/// Merchants and customers share the same numbering plan.
pub fn is_valid_msisdn(value: &str) -> bool {
    value.len() == MSISDN_LENGTH
        && value.starts_with(MSISDN_PREFIX)
        && value.chars().all(|c| c.is_ascii_digit())
}

/// Amounts: decimal digits in the smallest currency unit, non-zero,
/// bounded length. No sign, no separators, no decimals.
pub fn is_valid_amount(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_AMOUNT_LENGTH
        && value.chars().all(|c| c.is_ascii_digit())
        && value.chars().any(|c| c != '0')
}

/// One-time passcodes: exactly six digits.
pub fn is_valid_otp(value: &str) -> bool {
    value.len() == OTP_LENGTH && value.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert!(is_valid_name("Acme"));
        assert!(is_valid_name("Acme Retail Co."));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("   "));
        assert!(!is_valid_name("line\nbreak"));
        assert!(!is_valid_name(&"x".repeat(MAX_NAME_LENGTH + 1)));
    }

    #[test]
    fn test_codes() {
        assert!(is_valid_code("123"));
        assert!(is_valid_code("000042"));
        assert!(!is_valid_code(""));
        assert!(!is_valid_code("12a"));
        assert!(!is_valid_code("12 3"));
        assert!(!is_valid_code(&"9".repeat(MAX_CODE_LENGTH + 1)));
    }

    #[test]
    fn test_msisdns() {
        assert!(is_valid_msisdn("0999000000"));
        assert!(is_valid_msisdn("0988111222"));
        assert!(!is_valid_msisdn("099900000")); // nine digits
        assert!(!is_valid_msisdn("09990000001")); // eleven digits
        assert!(!is_valid_msisdn("0899000000")); // wrong prefix
        assert!(!is_valid_msisdn("+999000000"));
        assert!(!is_valid_msisdn("099900000a"));
    }

    #[test]
    fn test_amounts() {
        assert!(is_valid_amount("100"));
        assert!(is_valid_amount("000100")); // leading zeros are shape, not value
        assert!(!is_valid_amount(""));
        assert!(!is_valid_amount("0"));
        assert!(!is_valid_amount("000"));
        assert!(!is_valid_amount("10.5"));
        assert!(!is_valid_amount("-100"));
        assert!(!is_valid_amount(&"1".repeat(MAX_AMOUNT_LENGTH + 1)));
    }

    #[test]
    fn test_otps() {
        assert!(is_valid_otp("123456"));
        assert!(is_valid_otp("000000"));
        assert!(!is_valid_otp("12345"));
        assert!(!is_valid_otp("1234567"));
        assert!(!is_valid_otp("12345a"));
    }
}
