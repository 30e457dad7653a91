//! ZKI (zastitni kod izdavatelja): the issuer security code that binds an
//! invoice to the signing key.
use chrono::NaiveDateTime;
use md5::Md5;
use rsa::Pkcs1v15Sign;
use rust_decimal::Decimal;
use sha1::{Digest, Sha1};
use std::fmt;
use std::fmt::Write;
use thiserror::Error;

use crate::invoice::{format_datetime, format_total, InvoiceNumber, Oib};
use crate::keys::KeyMaterial;

/// Error raised when the signing primitive rejects the payload.
#[derive(Debug, Error)]
pub enum ZkiError {
    #[error("failed to sign ZKI payload: {0}")]
    Signing(String),
    #[error("incorrect ZKI format: {0}")]
    Format(String),
}

/// A computed ZKI: exactly 32 lowercase hexadecimal characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zki(String);

impl Zki {
    /// Accept an externally supplied ZKI (e.g. printed on an existing
    /// receipt), validating the format.
    pub fn parse(value: &str) -> Result<Zki, ZkiError> {
        let well_formed = value.len() == 32
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(ZkiError::Format(value.to_string()));
        }
        Ok(Zki(value.to_string()))
    }

    /// Compute the ZKI for an invoice or document.
    ///
    /// The algorithm is fixed by the fiscalization technical specification
    /// (section 12) and must match the authority bit for bit:
    /// concatenate OIB, issue date-and-time (`dd.MM.yyyyTHH:mm:ss`), the
    /// three invoice-number components, and the total (two decimals, comma
    /// separator) with no separators; sign with RSA PKCS#1 v1.5 over SHA-1;
    /// MD5 the signature; hex-encode the digest.
    ///
    /// Deterministic: identical inputs and key always yield the same code,
    /// so receipts can be reproduced offline.
    pub fn calculate(
        oib: &Oib,
        issued_at: NaiveDateTime,
        number: &InvoiceNumber,
        total: Decimal,
        keys: &KeyMaterial,
    ) -> Result<Zki, ZkiError> {
        let payload = format!(
            "{}{}{}{}{}{}",
            oib,
            format_datetime(issued_at),
            number.sequence_number(),
            number.location_code(),
            number.device_number(),
            format_total(total),
        );

        let digest = Sha1::digest(payload.as_bytes());
        let signature = keys
            .private_key()
            .sign(Pkcs1v15Sign::new::<Sha1>(), &digest)
            .map_err(|e| ZkiError::Signing(e.to_string()))?;

        let mut hex = String::with_capacity(32);
        for byte in Md5::digest(&signature) {
            let _ = write!(&mut hex, "{:02x}", byte);
        }
        Ok(Zki(hex))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Zki {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_lowercase_hex() {
        let raw = "abcd".repeat(8);
        assert_eq!(Zki::parse(&raw).unwrap().as_str(), raw);
    }

    #[test]
    fn parse_rejects_short_and_non_hex() {
        assert!(Zki::parse("123").is_err());
        assert!(Zki::parse(&"xywz".repeat(8)).is_err());
        assert!(Zki::parse(&"ABCD".repeat(8)).is_err());
    }
}
