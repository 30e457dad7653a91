//! Rust toolkit for Croatian fiscalization (fiskalizacija): ZKI security
//! codes, XML-DSig signing/verification, and the CIS SOAP protocol client.
//!
//! # Examples
//! ```rust,no_run
//! use fiskal_core::keys::KeyMaterial;
//!
//! let keys = KeyMaterial::from_files("client.pem", None, Some("lozinka"))?;
//! # let _ = keys;
//! # Ok::<(), fiskal_core::keys::KeyLoadError>(())
//! ```
pub mod config;
pub mod invoice;
pub mod keys;
pub mod trust;
pub mod ws;
pub mod xmldsig;

use thiserror::Error;

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    KeyLoad(#[from] keys::KeyLoadError),
    #[error(transparent)]
    Trust(#[from] trust::TrustError),
    #[error(transparent)]
    Invoice(#[from] invoice::InvoiceError),
    #[error(transparent)]
    Zki(#[from] invoice::zki::ZkiError),
    #[error(transparent)]
    Sign(#[from] xmldsig::sign::SignError),
    #[error(transparent)]
    Verify(#[from] xmldsig::verify::VerifyError),
    #[error(transparent)]
    Response(#[from] ws::ResponseError),
    #[error(transparent)]
    Ws(#[from] ws::WsError),
}

#[cfg(test)]
mod tests {
    use super::Error;
    use crate::invoice::InvoiceError;
    use crate::keys::KeyLoadError;
    use crate::trust::TrustError;
    use crate::ws::{ResponseError, WsError};
    use crate::xmldsig::verify::VerifyError;

    #[test]
    fn error_conversions_cover_variants() {
        let err: Error = KeyLoadError::MissingPrivateKey.into();
        assert!(matches!(err, Error::KeyLoad(_)));

        let err: Error = TrustError::UntrustedCertificate.into();
        assert!(matches!(err, Error::Trust(_)));

        let err: Error = InvoiceError::NegativeTotal.into();
        assert!(matches!(err, Error::Invoice(_)));

        let err: Error = VerifyError::SignatureMismatch("bad digest".into()).into();
        assert!(matches!(err, Error::Verify(_)));

        let err: Error = ResponseError::empty().into();
        assert!(matches!(err, Error::Response(_)));

        let err: Error = WsError::EchoMismatch {
            sent: "ping".into(),
            received: "pong".into(),
        }
        .into();
        assert!(matches!(err, Error::Ws(_)));
    }
}
