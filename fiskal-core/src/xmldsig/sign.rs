//! Enveloped XML signing of SOAP request elements.
use base64ct::{Base64, Encoding};
use libxml::parser::Parser;
use libxml::tree::{Document, Node};
use rsa::Pkcs1v15Sign;
use sha1::{Digest, Sha1};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::keys::KeyMaterial;
use crate::xmldsig::{
    body_request_node, canonicalize_subtree, find_one_node, serial_bytes_to_decimal_string,
    set_node_text, xpath_context, SIGNATURE_TEMPLATE,
};

#[derive(Debug, Error)]
pub enum SignError {
    #[error("XML error: {0}")]
    Xml(String),
    #[error("signing error: {0}")]
    Signing(String),
    #[error("certificate encoding error: {0}")]
    Certificate(String),
}

/// A signed SOAP document: the serialized envelope plus the `Id` the
/// embedded signature references, making the envelope self-contained.
#[derive(Debug, Clone)]
pub struct SignedEnvelope {
    xml: String,
    reference_id: String,
}

impl SignedEnvelope {
    pub fn xml(&self) -> &str {
        &self.xml
    }

    pub fn reference_id(&self) -> &str {
        &self.reference_id
    }
}

/// Signs serialized SOAP envelopes with the client key material.
#[derive(Debug, Clone)]
pub struct XmlSigner {
    keys: Arc<KeyMaterial>,
}

impl XmlSigner {
    pub fn new(keys: Arc<KeyMaterial>) -> XmlSigner {
        XmlSigner { keys }
    }

    /// Wrap the request element inside the envelope's Body with an enveloped
    /// XML-DSig signature. The input string is left untouched; a new
    /// serialized document is returned.
    pub fn sign(&self, envelope_xml: &str) -> Result<SignedEnvelope, SignError> {
        let mut doc = Parser::default()
            .parse_string(envelope_xml)
            .map_err(|e| SignError::Xml(format!("XML parse error: {e:?}")))?;

        let ctx = xpath_context(&doc).map_err(SignError::Xml)?;
        let mut request = body_request_node(&ctx).map_err(SignError::Xml)?;

        // The request node carries a fresh Id so the Reference can point at
        // it without external context.
        let reference_id = Uuid::new_v4().to_string();
        request
            .set_attribute("Id", &reference_id)
            .map_err(|e| SignError::Xml(e.to_string()))?;

        // Digest of the referenced content before the signature subtree is
        // attached; this matches the enveloped-signature transform applied
        // by the verifier.
        let canonical = canonicalize_subtree(&doc, &request).map_err(SignError::Xml)?;
        let digest_b64 = Base64::encode_string(&Sha1::digest(canonical.as_bytes()));

        let mut signature = import_fragment(&mut doc, SIGNATURE_TEMPLATE)?;
        request
            .add_child(&mut signature)
            .map_err(|e| SignError::Xml(e.to_string()))?;

        let ctx = xpath_context(&doc).map_err(SignError::Xml)?;
        let mut reference = find_one_node(&ctx, "//ds:Signature/ds:SignedInfo/ds:Reference")
            .map_err(SignError::Xml)?;
        reference
            .set_attribute("URI", &format!("#{reference_id}"))
            .map_err(|e| SignError::Xml(e.to_string()))?;
        set_node_text(
            &ctx,
            "//ds:Signature/ds:SignedInfo/ds:Reference/ds:DigestValue",
            &digest_b64,
        )
        .map_err(SignError::Xml)?;

        self.apply_key_info(&ctx)?;

        let signed_info =
            find_one_node(&ctx, "//ds:Signature/ds:SignedInfo").map_err(SignError::Xml)?;
        let canonical_signed_info =
            canonicalize_subtree(&doc, &signed_info).map_err(SignError::Xml)?;
        let signature_b64 = self.sign_bytes(canonical_signed_info.as_bytes())?;
        set_node_text(&ctx, "//ds:Signature/ds:SignatureValue", &signature_b64)
            .map_err(SignError::Xml)?;

        Ok(SignedEnvelope {
            xml: doc.to_string(),
            reference_id,
        })
    }

    pub fn certificate(&self) -> &x509_cert::Certificate {
        self.keys.certificate()
    }

    fn sign_bytes(&self, data: &[u8]) -> Result<String, SignError> {
        let digest = Sha1::digest(data);
        let signature = self
            .keys
            .private_key()
            .sign(Pkcs1v15Sign::new::<Sha1>(), &digest)
            .map_err(|e| SignError::Signing(e.to_string()))?;
        Ok(Base64::encode_string(&signature))
    }

    fn apply_key_info(&self, ctx: &libxml::xpath::Context) -> Result<(), SignError> {
        let cert = self.keys.certificate();
        let issuer = cert
            .tbs_certificate
            .issuer
            .to_string()
            .split(',')
            .map(|part| part.trim())
            .collect::<Vec<_>>()
            .join(", ");
        let serial =
            serial_bytes_to_decimal_string(cert.tbs_certificate.serial_number.as_bytes());
        let cert_b64 = Base64::encode_string(
            &self
                .keys
                .certificate_der()
                .map_err(|e| SignError::Certificate(e.to_string()))?,
        );

        set_node_text(
            ctx,
            "//ds:Signature/ds:KeyInfo/ds:X509Data/ds:X509IssuerSerial/ds:X509IssuerName",
            &issuer,
        )
        .map_err(SignError::Xml)?;
        set_node_text(
            ctx,
            "//ds:Signature/ds:KeyInfo/ds:X509Data/ds:X509IssuerSerial/ds:X509SerialNumber",
            &serial,
        )
        .map_err(SignError::Xml)?;
        set_node_text(
            ctx,
            "//ds:Signature/ds:KeyInfo/ds:X509Data/ds:X509Certificate",
            &cert_b64,
        )
        .map_err(SignError::Xml)?;
        Ok(())
    }
}

pub(crate) fn import_fragment(doc: &mut Document, xml: &str) -> Result<Node, SignError> {
    let fragment = Parser::default()
        .parse_string(xml)
        .map_err(|e| SignError::Xml(format!("XML parse error: {e:?}")))?;
    let mut node = fragment
        .get_root_element()
        .ok_or_else(|| SignError::Xml("missing fragment root".into()))?;
    node.unlink();
    doc.import_node(&mut node)
        .map_err(|_| SignError::Xml("failed to import fragment".into()))
}
