//! Trust anchors and certificate chain validation.
use const_oid::db::rfc5912::{
    SHA_1_WITH_RSA_ENCRYPTION, SHA_256_WITH_RSA_ENCRYPTION, SHA_384_WITH_RSA_ENCRYPTION,
    SHA_512_WITH_RSA_ENCRYPTION,
};
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::path::Path;
use std::time::SystemTime;
use thiserror::Error;
use x509_cert::der::{DecodePem, Encode};
use x509_cert::Certificate;

use crate::keys::certificate_public_key;

/// Trust validation errors. None of these may be downgraded: a chain that
/// does not close on an anchor, or that contains an expired link, aborts the
/// call.
#[derive(Debug, Error)]
pub enum TrustError {
    #[error("failed to read trust anchor: {0}")]
    Io(#[from] std::io::Error),
    #[error("trust anchor parse error: {0}")]
    AnchorParse(String),
    #[error("no trust anchors supplied")]
    NoAnchors,
    #[error("certificate does not chain to any configured trust anchor")]
    UntrustedCertificate,
    #[error("certificate chain contains an expired or not-yet-valid link")]
    ExpiredCertificate,
    #[error("unsupported signature algorithm on certificate: {oid}")]
    UnsupportedAlgorithm { oid: String },
}

/// Immutable, ordered set of trust-anchor certificates.
///
/// Multiple anchors may be supplied (intermediate + root); any anchor that
/// closes a valid chain is sufficient and the first one wins.
#[derive(Debug)]
pub struct TrustStore {
    anchors: Vec<Certificate>,
}

impl TrustStore {
    /// Build a store from PEM anchor sources, in the given order.
    pub fn from_pem_anchors<'a>(
        anchor_pems: impl IntoIterator<Item = &'a str>,
    ) -> Result<TrustStore, TrustError> {
        let mut anchors = Vec::new();
        for pem in anchor_pems {
            let cert = Certificate::from_pem(pem.as_bytes())
                .map_err(|e| TrustError::AnchorParse(e.to_string()))?;
            anchors.push(cert);
        }
        if anchors.is_empty() {
            return Err(TrustError::NoAnchors);
        }
        Ok(TrustStore { anchors })
    }

    /// Build a store from PEM files on disk.
    pub fn from_files(
        paths: impl IntoIterator<Item = impl AsRef<Path>>,
    ) -> Result<TrustStore, TrustError> {
        let mut pems = Vec::new();
        for path in paths {
            pems.push(std::fs::read_to_string(path)?);
        }
        TrustStore::from_pem_anchors(pems.iter().map(String::as_str))
    }

    pub fn anchors(&self) -> &[Certificate] {
        &self.anchors
    }

    /// Validate `leaf` against the configured anchors at the current time.
    pub fn validate_chain(&self, leaf: &Certificate) -> Result<(), TrustError> {
        self.validate_chain_at(leaf, SystemTime::now())
    }

    /// Validate `leaf` at an explicit verification time. Checks, in order:
    /// issuer/subject linkage and signature correctness of the link, then
    /// validity-period coverage of every certificate in the closed chain.
    /// A linked anchor whose leaf carries an unknown signature algorithm
    /// surfaces `UnsupportedAlgorithm` rather than a generic trust failure.
    pub fn validate_chain_at(
        &self,
        leaf: &Certificate,
        at: SystemTime,
    ) -> Result<(), TrustError> {
        let mut matched = None;
        for candidate in &self.anchors {
            if candidate.tbs_certificate.subject != leaf.tbs_certificate.issuer {
                continue;
            }
            if verify_certificate_signature(leaf, candidate)? {
                matched = Some(candidate);
                break;
            }
        }
        let anchor = matched.ok_or(TrustError::UntrustedCertificate)?;

        for cert in [leaf, anchor] {
            if !validity_covers(cert, at) {
                return Err(TrustError::ExpiredCertificate);
            }
        }
        Ok(())
    }
}

fn validity_covers(cert: &Certificate, at: SystemTime) -> bool {
    let validity = &cert.tbs_certificate.validity;
    let not_before = validity.not_before.to_system_time();
    let not_after = validity.not_after.to_system_time();
    at >= not_before && at <= not_after
}

/// Verify that `issuer` signed `cert`. Returns `Ok(false)` on a bad
/// signature and `Err` for malformed input or an unknown algorithm.
fn verify_certificate_signature(
    cert: &Certificate,
    issuer: &Certificate,
) -> Result<bool, TrustError> {
    let public_key = certificate_public_key(issuer).map_err(TrustError::AnchorParse)?;
    let tbs_der = cert
        .tbs_certificate
        .to_der()
        .map_err(|e| TrustError::AnchorParse(e.to_string()))?;
    let signature = cert
        .signature
        .as_bytes()
        .ok_or_else(|| TrustError::AnchorParse("non-octet-aligned signature".into()))?;

    let oid = cert.signature_algorithm.oid;
    let verified = if oid == SHA_256_WITH_RSA_ENCRYPTION {
        verify_rsa::<Sha256>(&public_key, &tbs_der, signature)
    } else if oid == SHA_1_WITH_RSA_ENCRYPTION {
        verify_rsa::<Sha1>(&public_key, &tbs_der, signature)
    } else if oid == SHA_384_WITH_RSA_ENCRYPTION {
        verify_rsa::<Sha384>(&public_key, &tbs_der, signature)
    } else if oid == SHA_512_WITH_RSA_ENCRYPTION {
        verify_rsa::<Sha512>(&public_key, &tbs_der, signature)
    } else {
        return Err(TrustError::UnsupportedAlgorithm {
            oid: oid.to_string(),
        });
    };
    Ok(verified)
}

fn verify_rsa<D>(public_key: &RsaPublicKey, message: &[u8], signature: &[u8]) -> bool
where
    D: Digest + const_oid::AssociatedOid,
{
    let digest = D::digest(message);
    public_key
        .verify(Pkcs1v15Sign::new::<D>(), &digest, signature)
        .is_ok()
}
