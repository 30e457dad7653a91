//! Verification of signed SOAP documents against the trust store.
use base64ct::{Base64, Encoding};
use libxml::parser::Parser;
use rsa::Pkcs1v15Sign;
use sha1::{Digest, Sha1};
use std::sync::Arc;
use thiserror::Error;

use crate::keys::{certificate_from_der, certificate_public_key};
use crate::trust::{TrustError, TrustStore};
use crate::xmldsig::{
    canonicalize_subtree, find_nodes, find_one_node, node_text, xpath_context,
};

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("XML error: {0}")]
    Xml(String),
    #[error("document carries no signature")]
    MissingSignature,
    #[error("document carries {count} signatures, expected exactly one")]
    MultipleSignatures { count: usize },
    #[error("signature reference '{id}' resolves to {count} elements, expected exactly one")]
    AmbiguousReference { id: String, count: usize },
    #[error("embedded certificate error: {0}")]
    Certificate(String),
    #[error("signature mismatch: {0}")]
    SignatureMismatch(String),
    #[error(transparent)]
    Trust(#[from] TrustError),
}

/// Verifies enveloped signatures on received documents.
///
/// All three checks must pass before any content is surfaced: digest over
/// the canonical referenced content, the RSA signature over SignedInfo, and
/// chain validation of the embedded certificate. A failure at any step
/// aborts the call; nothing is downgraded.
#[derive(Debug, Clone)]
pub struct XmlVerifier {
    trust: Arc<TrustStore>,
}

impl XmlVerifier {
    pub fn new(trust: Arc<TrustStore>) -> XmlVerifier {
        XmlVerifier { trust }
    }

    /// Verify `envelope_xml` and return the canonical form of the signed
    /// content (the referenced element with the signature subtree removed).
    pub fn verify(&self, envelope_xml: &str) -> Result<String, VerifyError> {
        let doc = Parser::default()
            .parse_string(envelope_xml)
            .map_err(|e| VerifyError::Xml(format!("XML parse error: {e:?}")))?;
        let ctx = xpath_context(&doc).map_err(VerifyError::Xml)?;

        let signatures = find_nodes(&ctx, "//ds:Signature").map_err(VerifyError::Xml)?;
        match signatures.len() {
            0 => return Err(VerifyError::MissingSignature),
            1 => {}
            count => return Err(VerifyError::MultipleSignatures { count }),
        }

        let reference = find_one_node(&ctx, "//ds:Signature/ds:SignedInfo/ds:Reference")
            .map_err(VerifyError::Xml)?;
        let uri = reference.get_attribute("URI").unwrap_or_default();
        let id = uri
            .strip_prefix('#')
            .ok_or_else(|| VerifyError::Xml(format!("unsupported reference URI '{uri}'")))?
            .to_string();

        let referenced = find_nodes(&ctx, &format!("//*[@Id='{id}']")).map_err(VerifyError::Xml)?;
        if referenced.len() != 1 {
            return Err(VerifyError::AmbiguousReference {
                id,
                count: referenced.len(),
            });
        }

        // Step 1: recompute the content digest with the signature subtree
        // removed (enveloped-signature transform) and compare.
        let canonical_content = self.canonical_referenced_content(&doc, &id)?;
        let expected_digest_b64 =
            Base64::encode_string(&Sha1::digest(canonical_content.as_bytes()));
        let embedded_digest_b64 = node_text(
            &ctx,
            "//ds:Signature/ds:SignedInfo/ds:Reference/ds:DigestValue",
        )
        .map_err(VerifyError::Xml)?;
        if embedded_digest_b64 != expected_digest_b64 {
            return Err(VerifyError::SignatureMismatch(
                "content digest does not match DigestValue".into(),
            ));
        }

        // Step 2: verify the signature value over canonical SignedInfo
        // against the embedded certificate's public key.
        let cert_b64 = node_text(
            &ctx,
            "//ds:Signature/ds:KeyInfo/ds:X509Data/ds:X509Certificate",
        )
        .map_err(VerifyError::Xml)?;
        let cert_der = Base64::decode_vec(&cert_b64.split_whitespace().collect::<String>())
            .map_err(|e| VerifyError::Certificate(e.to_string()))?;
        let certificate = certificate_from_der(&cert_der).map_err(VerifyError::Certificate)?;
        let public_key =
            certificate_public_key(&certificate).map_err(VerifyError::Certificate)?;

        let signed_info =
            find_one_node(&ctx, "//ds:Signature/ds:SignedInfo").map_err(VerifyError::Xml)?;
        let canonical_signed_info =
            canonicalize_subtree(&doc, &signed_info).map_err(VerifyError::Xml)?;
        let signature_b64 = node_text(&ctx, "//ds:Signature/ds:SignatureValue")
            .map_err(VerifyError::Xml)?;
        let signature = Base64::decode_vec(&signature_b64.split_whitespace().collect::<String>())
            .map_err(|e| VerifyError::SignatureMismatch(e.to_string()))?;

        let digest = Sha1::digest(canonical_signed_info.as_bytes());
        public_key
            .verify(Pkcs1v15Sign::new::<Sha1>(), &digest, &signature)
            .map_err(|_| {
                VerifyError::SignatureMismatch(
                    "signature value does not verify against embedded certificate".into(),
                )
            })?;

        // Step 3: the embedded certificate must chain to a trust anchor.
        self.trust.validate_chain(&certificate)?;

        Ok(canonical_content)
    }

    fn canonical_referenced_content(
        &self,
        doc: &libxml::tree::Document,
        id: &str,
    ) -> Result<String, VerifyError> {
        let stripped = doc
            .dup()
            .map_err(|e| VerifyError::Xml(format!("failed to duplicate document: {e:?}")))?;
        let ctx = xpath_context(&stripped).map_err(VerifyError::Xml)?;
        for mut node in find_nodes(&ctx, "//ds:Signature").map_err(VerifyError::Xml)? {
            node.unlink();
        }
        let referenced = find_one_node(&ctx, &format!("//*[@Id='{id}']"))
            .map_err(VerifyError::Xml)?;
        canonicalize_subtree(&stripped, &referenced).map_err(VerifyError::Xml)
    }
}
