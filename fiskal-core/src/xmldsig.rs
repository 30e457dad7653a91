//! Fixed-profile XML-DSig support: exclusive canonicalization, SHA-1
//! digests, RSA-SHA1 signatures, enveloped within the signed element.
pub mod sign;
pub mod verify;

pub use sign::{SignedEnvelope, XmlSigner};
pub use verify::XmlVerifier;

use libxml::tree::{c14n, Document, Node};
use libxml::xpath;

pub(crate) const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub(crate) const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

pub(crate) const SIGNATURE_TEMPLATE: &str =
    include_str!("../assets/templates/signature.xml");

/// Exclusive C14N of a single subtree, as fixed by the service's signature
/// profile.
pub(crate) fn canonicalize_subtree(doc: &Document, node: &Node) -> Result<String, String> {
    let opts = c14n::CanonicalizationOptions {
        mode: c14n::CanonicalizationMode::ExclusiveCanonical1_0,
        inclusive_ns_prefixes: vec![],
        with_comments: false,
    };
    node.clone()
        .canonicalize(opts)
        .map_err(|e| format!("canonicalization failed: {e:?}"))
}

pub(crate) fn xpath_context(doc: &Document) -> Result<xpath::Context, String> {
    let ctx = xpath::Context::new(doc).map_err(|e| format!("XPath context error: {e:?}"))?;
    ctx.register_namespace("ds", DS_NS)
        .map_err(|e| format!("XPath context error: {e:?}"))?;
    ctx.register_namespace("soapenv", SOAP_ENV_NS)
        .map_err(|e| format!("XPath context error: {e:?}"))?;
    Ok(ctx)
}

pub(crate) fn find_nodes(ctx: &xpath::Context, expr: &str) -> Result<Vec<Node>, String> {
    Ok(ctx
        .evaluate(expr)
        .map_err(|e| format!("XPath error for {expr}: {e:?}"))?
        .get_nodes_as_vec())
}

pub(crate) fn find_one_node(ctx: &xpath::Context, expr: &str) -> Result<Node, String> {
    find_nodes(ctx, expr)?
        .into_iter()
        .next()
        .ok_or_else(|| format!("missing element at {expr}"))
}

pub(crate) fn node_text(ctx: &xpath::Context, expr: &str) -> Result<String, String> {
    let node = find_one_node(ctx, expr)?;
    let value = node.get_content().trim().to_string();
    if value.is_empty() {
        return Err(format!("empty element at {expr}"));
    }
    Ok(value)
}

pub(crate) fn set_node_text(ctx: &xpath::Context, expr: &str, value: &str) -> Result<(), String> {
    let mut node = find_one_node(ctx, expr)?;
    node.set_content(value)
        .map_err(|e| format!("failed to set {expr}: {e}"))
}

/// The request element carried inside the SOAP Body, i.e. the signed content.
pub(crate) fn body_request_node(ctx: &xpath::Context) -> Result<Node, String> {
    find_one_node(ctx, "/soapenv:Envelope/soapenv:Body/*[1]")
}

/// Decimal rendering of a certificate serial number for X509SerialNumber.
pub(crate) fn serial_bytes_to_decimal_string(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "0".to_string();
    }

    let mut digits: Vec<u8> = vec![0];
    for &byte in bytes {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            let value = (*digit as u32) * 256 + carry;
            *digit = (value % 10) as u8;
            carry = value / 10;
        }
        while carry > 0 {
            digits.push((carry % 10) as u8);
            carry /= 10;
        }
    }

    while digits.len() > 1 && matches!(digits.last(), Some(0)) {
        digits.pop();
    }

    digits.iter().rev().map(|d| (b'0' + *d) as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use libxml::parser::Parser;

    #[test]
    fn serial_bytes_to_decimal_handles_large_values() {
        assert_eq!(serial_bytes_to_decimal_string(&[0x01]), "1");
        assert_eq!(serial_bytes_to_decimal_string(&[0x01, 0x00]), "256");
        assert_eq!(serial_bytes_to_decimal_string(&[0x00, 0x01]), "1");
        assert_eq!(serial_bytes_to_decimal_string(&[0xFF, 0xFF]), "65535");
    }

    #[test]
    fn canonical_subtree_drops_xml_declaration_and_outer_elements() {
        let xml = r#"<?xml version="1.0"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/">
  <soapenv:Body><tns:Zahtjev xmlns:tns="urn:test">x</tns:Zahtjev></soapenv:Body>
</soapenv:Envelope>"#;
        let doc = Parser::default().parse_string(xml).expect("parse");
        let ctx = xpath_context(&doc).expect("ctx");
        let node = body_request_node(&ctx).expect("request node");
        let canonical = canonicalize_subtree(&doc, &node).expect("c14n");
        assert!(canonical.starts_with("<tns:Zahtjev"));
        assert!(!canonical.contains("<?xml"));
        assert!(!canonical.contains("Envelope"));
    }
}
