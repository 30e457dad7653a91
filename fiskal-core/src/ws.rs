//! CIS SOAP protocol client: envelope assembly, signing, verification, and
//! fault decoding. Transport is an injected collaborator.
use libxml::parser::Parser;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::config::Config;
use crate::invoice::zki::{Zki, ZkiError};
use crate::invoice::{format_datetime, Document, Invoice};
use crate::keys::KeyMaterial;
use crate::trust::TrustStore;
use crate::xmldsig::sign::SignError;
use crate::xmldsig::verify::VerifyError;
use crate::xmldsig::{find_nodes, node_text, xpath_context, XmlSigner, XmlVerifier};

pub(crate) const TNS: &str = "http://www.apis-it.hr/fin/2012/types/f73";

/// Opaque transport-level failure; never reinterpreted by this crate.
#[derive(Debug, Error)]
#[error("transport failure: {message}")]
pub struct TransportError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> TransportError {
        TransportError {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> TransportError {
        TransportError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Exchanges one signed request document for one raw response document.
/// SOAP framing beyond the envelope shape built here, connection handling,
/// and timeout policy all belong to the implementation.
pub trait SoapTransport {
    fn exchange(&self, operation: &str, envelope_xml: &str) -> Result<String, TransportError>;
}

/// HTTPS transport for the CIS service endpoints.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<HttpTransport, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| TransportError::with_source("failed to build HTTP client", e))?;
        Ok(HttpTransport {
            client,
            endpoint: config.endpoint_url().to_string(),
        })
    }
}

impl SoapTransport for HttpTransport {
    fn exchange(&self, operation: &str, envelope_xml: &str) -> Result<String, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", operation)
            .body(envelope_xml.to_string())
            .send()
            .map_err(|e| TransportError::with_source("request failed", e))?;
        response
            .text()
            .map_err(|e| TransportError::with_source("failed to read response body", e))
    }
}

/// Opt-in observer for raw request/response bodies. The client never routes
/// message content through global logging; inject a sink to capture it.
pub trait RawMessageSink: Send + Sync {
    fn on_request(&self, operation: &str, xml: &str);
    fn on_response(&self, operation: &str, xml: &str);
}

/// One code/message pair from a service error list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseErrorDetail {
    code: String,
    message: String,
}

impl ResponseErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> ResponseErrorDetail {
        ResponseErrorDetail {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Business rejection by the authority. The only error kind callers are
/// expected to branch on; everything else in the taxonomy means a broken or
/// compromised integration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("service rejected the request: {}", format_codes(.details))]
pub struct ResponseError {
    details: Vec<ResponseErrorDetail>,
}

fn format_codes(details: &[ResponseErrorDetail]) -> String {
    if details.is_empty() {
        return "no error details".to_string();
    }
    details
        .iter()
        .map(ResponseErrorDetail::code)
        .collect::<Vec<_>>()
        .join(", ")
}

impl ResponseError {
    pub fn new(details: Vec<ResponseErrorDetail>) -> ResponseError {
        ResponseError { details }
    }

    pub fn empty() -> ResponseError {
        ResponseError {
            details: Vec::new(),
        }
    }

    pub fn details(&self) -> &[ResponseErrorDetail] {
        &self.details
    }
}

/// Protocol client errors.
#[derive(Debug, Error)]
pub enum WsError {
    #[error(transparent)]
    Zki(#[from] ZkiError),
    #[error(transparent)]
    Sign(#[from] SignError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Response(#[from] ResponseError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("payload serialization error: {0}")]
    Payload(#[from] quick_xml::se::SeError),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("echo service returned '{received}', expected '{sent}'")]
    EchoMismatch { sent: String, received: String },
}

// Message header (tns:Zaglavlje) attached to every request.
#[derive(Serialize)]
struct ZaglavljeXml {
    #[serde(rename = "tns:IdPoruke")]
    id_poruke: String,
    #[serde(rename = "tns:DatumVrijeme")]
    datum_vrijeme: String,
}

#[derive(Serialize)]
struct BrojRacunaXml {
    #[serde(rename = "tns:BrOznRac")]
    sequence: u32,
    #[serde(rename = "tns:OznPosPr")]
    location: String,
    #[serde(rename = "tns:OznNapUr")]
    device: u32,
}

#[derive(Serialize)]
struct RacunXml {
    #[serde(rename = "tns:Oib")]
    oib: String,
    #[serde(rename = "tns:USustPdv")]
    vat_registered: bool,
    #[serde(rename = "tns:DatVrijeme")]
    issued_at: String,
    #[serde(rename = "tns:OznSlijed")]
    sequence_scope: &'static str,
    #[serde(rename = "tns:BrRac")]
    number: BrojRacunaXml,
    #[serde(rename = "tns:IznosUkupno")]
    total: String,
    #[serde(rename = "tns:NacinPlac")]
    payment_method: &'static str,
    #[serde(rename = "tns:OibOper")]
    operator_oib: String,
    #[serde(rename = "tns:ZastKod")]
    zki: String,
    #[serde(rename = "tns:NakDost")]
    late_registration: bool,
    #[serde(rename = "tns:ParagonBrRac", skip_serializing_if = "Option::is_none")]
    paragon_number: Option<String>,
}

#[derive(Serialize)]
#[serde(rename = "tns:RacunZahtjev")]
struct RacunZahtjevXml {
    #[serde(rename = "@xmlns:tns")]
    xmlns: &'static str,
    #[serde(rename = "tns:Zaglavlje")]
    zaglavlje: ZaglavljeXml,
    #[serde(rename = "tns:Racun")]
    racun: RacunXml,
}

#[derive(Serialize)]
struct BrojPdXml {
    #[serde(rename = "tns:BrOznPD")]
    sequence: u32,
    #[serde(rename = "tns:OznPosPr")]
    location: String,
    #[serde(rename = "tns:OznNapUr")]
    device: u32,
}

#[derive(Serialize)]
struct PrateciDokumentXml {
    #[serde(rename = "tns:Oib")]
    oib: String,
    #[serde(rename = "tns:DatVrijeme")]
    issued_at: String,
    #[serde(rename = "tns:BrPratecegDokumenta")]
    number: BrojPdXml,
    #[serde(rename = "tns:IznosUkupno")]
    total: String,
    #[serde(rename = "tns:ZastKodPD")]
    zki: String,
    #[serde(rename = "tns:NakDost")]
    late_registration: bool,
}

#[derive(Serialize)]
#[serde(rename = "tns:PrateciDokumentZahtjev")]
struct PrateciDokumentZahtjevXml {
    #[serde(rename = "@xmlns:tns")]
    xmlns: &'static str,
    #[serde(rename = "tns:Zaglavlje")]
    zaglavlje: ZaglavljeXml,
    #[serde(rename = "tns:PrateciDokument")]
    dokument: PrateciDokumentXml,
}

#[derive(Serialize)]
#[serde(rename = "tns:EchoRequest")]
struct EchoRequestXml<'a> {
    #[serde(rename = "@xmlns:tns")]
    xmlns: &'static str,
    #[serde(rename = "$text")]
    text: &'a str,
}

/// Client for the fiscalization SOAP service.
///
/// KeyMaterial and TrustStore are shared read-only; one client instance may
/// be used concurrently from multiple threads. Each call runs the linear
/// pipeline built -> signed -> sent -> received -> verified and ends either
/// decoded or faulted; retries are the caller's responsibility.
pub struct FiskalClient<T> {
    config: Config,
    keys: Arc<KeyMaterial>,
    signer: XmlSigner,
    verifier: XmlVerifier,
    transport: T,
    sink: Option<Box<dyn RawMessageSink>>,
}

impl<T: SoapTransport> FiskalClient<T> {
    pub fn new(
        config: Config,
        keys: Arc<KeyMaterial>,
        trust: Arc<TrustStore>,
        transport: T,
    ) -> FiskalClient<T> {
        FiskalClient {
            config,
            signer: XmlSigner::new(Arc::clone(&keys)),
            verifier: XmlVerifier::new(trust),
            keys,
            transport,
            sink: None,
        }
    }

    /// Attach an observer for raw request/response bodies.
    pub fn with_sink(mut self, sink: Box<dyn RawMessageSink>) -> FiskalClient<T> {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Connectivity check. No security code is involved, but the exchange is
    /// still signed and the response verified like any other call.
    pub fn echo(&self, message: &str) -> Result<String, WsError> {
        let body = quick_xml::se::to_string(&EchoRequestXml {
            xmlns: TNS,
            text: message,
        })?;
        let content = self.call("echo", &body)?;
        let received = decode_echo(&content)?;
        if received != message {
            return Err(WsError::EchoMismatch {
                sent: message.to_string(),
                received,
            });
        }
        debug!(operation = "echo", stage = "decoded");
        Ok(received)
    }

    /// Submit an invoice (`racuni`). Computes the ZKI, embeds it into the
    /// request, and returns the JIR assigned by the authority.
    pub fn submit_invoice(&self, invoice: &Invoice) -> Result<String, WsError> {
        let zki = Zki::calculate(
            invoice.oib(),
            invoice.issued_at(),
            invoice.invoice_number(),
            invoice.total(),
            &self.keys,
        )?;

        let number = invoice.invoice_number();
        let body = quick_xml::se::to_string(&RacunZahtjevXml {
            xmlns: TNS,
            zaglavlje: self.request_header(),
            racun: RacunXml {
                oib: invoice.oib().to_string(),
                vat_registered: invoice.vat_registered(),
                issued_at: format_datetime(invoice.issued_at()),
                sequence_scope: invoice.sequence_scope().code(),
                number: BrojRacunaXml {
                    sequence: number.sequence_number(),
                    location: number.location_code().to_string(),
                    device: number.device_number(),
                },
                total: format!("{:.2}", invoice.total()),
                payment_method: invoice.payment_method().code(),
                operator_oib: invoice.operator_oib().to_string(),
                zki: zki.to_string(),
                late_registration: invoice.late_registration(),
                paragon_number: invoice.paragon_number().map(str::to_string),
            },
        })?;

        let content = self.call("racuni", &body)?;
        let jir = decode_jir(&content)?;
        debug!(operation = "racuni", stage = "decoded");
        Ok(jir)
    }

    /// Submit an accompanying document (`prateciDokumenti`); returns its JIR.
    pub fn submit_document(&self, document: &Document) -> Result<String, WsError> {
        let zki = Zki::calculate(
            document.oib(),
            document.issued_at(),
            document.document_number(),
            document.total(),
            &self.keys,
        )?;

        let number = document.document_number();
        let body = quick_xml::se::to_string(&PrateciDokumentZahtjevXml {
            xmlns: TNS,
            zaglavlje: self.request_header(),
            dokument: PrateciDokumentXml {
                oib: document.oib().to_string(),
                issued_at: format_datetime(document.issued_at()),
                number: BrojPdXml {
                    sequence: number.sequence_number(),
                    location: number.location_code().to_string(),
                    device: number.device_number(),
                },
                total: format!("{:.2}", document.total()),
                zki: zki.to_string(),
                late_registration: document.late_registration(),
            },
        })?;

        let content = self.call("prateciDokumenti", &body)?;
        let jir = decode_jir(&content)?;
        debug!(operation = "prateciDokumenti", stage = "decoded");
        Ok(jir)
    }

    fn request_header(&self) -> ZaglavljeXml {
        ZaglavljeXml {
            id_poruke: Uuid::new_v4().to_string(),
            datum_vrijeme: format_datetime(chrono::Local::now().naive_local()),
        }
    }

    /// Shared call pipeline; returns the verified canonical response content.
    fn call(&self, operation: &str, body_xml: &str) -> Result<String, WsError> {
        let envelope = wrap_envelope(body_xml);
        debug!(operation, stage = "built");

        let signed = self.signer.sign(&envelope)?;
        debug!(operation, stage = "signed", reference = signed.reference_id());
        if let Some(sink) = &self.sink {
            sink.on_request(operation, signed.xml());
        }

        debug!(operation, stage = "sent");
        let raw = self.transport.exchange(operation, signed.xml())?;
        debug!(operation, stage = "received");
        if let Some(sink) = &self.sink {
            sink.on_response(operation, &raw);
        }

        if let Some(fault) = decode_fault(&raw)? {
            debug!(operation, stage = "faulted");
            return Err(fault.into());
        }

        let content = self.verifier.verify(&raw)?;
        debug!(operation, stage = "verified");
        Ok(content)
    }
}

fn wrap_envelope(body_xml: &str) -> String {
    format!(
        r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/"><soapenv:Body>{body_xml}</soapenv:Body></soapenv:Envelope>"#
    )
}

/// SOAP faults arrive unsigned; decode them before verification. Returns
/// `None` when the body carries a regular response element.
fn decode_fault(envelope_xml: &str) -> Result<Option<ResponseError>, WsError> {
    let doc = Parser::default()
        .parse_string(envelope_xml)
        .map_err(|e| WsError::Decode(format!("XML parse error: {e:?}")))?;
    let ctx = xpath_context(&doc).map_err(WsError::Decode)?;
    let faults = find_nodes(&ctx, "//soapenv:Body/*[local-name()='Fault']")
        .map_err(WsError::Decode)?;
    if faults.is_empty() {
        return Ok(None);
    }
    Ok(Some(ResponseError::new(collect_error_details(&ctx)?)))
}

/// Extract the JIR from a verified response, or surface its error list.
fn decode_jir(content_xml: &str) -> Result<String, WsError> {
    let doc = Parser::default()
        .parse_string(content_xml)
        .map_err(|e| WsError::Decode(format!("XML parse error: {e:?}")))?;
    let ctx = xpath_context(&doc).map_err(WsError::Decode)?;

    let details = collect_error_details(&ctx)?;
    if !details.is_empty() {
        return Err(ResponseError::new(details).into());
    }

    node_text(&ctx, "//*[local-name()='Jir']")
        .map_err(|_| WsError::Decode("response carries neither Jir nor errors".into()))
}

fn decode_echo(content_xml: &str) -> Result<String, WsError> {
    let doc = Parser::default()
        .parse_string(content_xml)
        .map_err(|e| WsError::Decode(format!("XML parse error: {e:?}")))?;
    let root = doc
        .get_root_element()
        .ok_or_else(|| WsError::Decode("empty echo response".into()))?;
    Ok(root.get_content().trim().to_string())
}

// "v100" marks the no-error entry in otherwise error-shaped lists.
const NO_ERROR_CODE: &str = "v100";

fn collect_error_details(
    ctx: &libxml::xpath::Context,
) -> Result<Vec<ResponseErrorDetail>, WsError> {
    let mut details = Vec::new();
    for node in find_nodes(ctx, "//*[local-name()='Greska']").map_err(WsError::Decode)? {
        let mut code = String::new();
        let mut message = String::new();
        for child in node.get_child_elements() {
            match child.get_name().as_str() {
                "SifraGreske" => code = child.get_content().trim().to_string(),
                "PorukaGreske" => message = child.get_content().trim().to_string(),
                _ => {}
            }
        }
        if code != NO_ERROR_CODE {
            details.push(ResponseErrorDetail::new(code, message));
        }
    }
    Ok(details)
}
