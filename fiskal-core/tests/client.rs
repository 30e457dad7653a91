mod common;

use fiskal_core::config::{Config, EnvironmentType};
use fiskal_core::trust::TrustError;
use fiskal_core::ws::{FiskalClient, RawMessageSink, SoapTransport, TransportError, WsError};
use fiskal_core::xmldsig::verify::VerifyError;
use fiskal_core::xmldsig::XmlSigner;
use std::sync::{Arc, Mutex};

const TNS: &str = "http://www.apis-it.hr/fin/2012/types/f73";
const JIR: &str = "9d6f5bb6-da47-4fd9-9d54-e447a5ab26b6";

struct StubTransport<F> {
    handler: F,
}

impl<F> SoapTransport for StubTransport<F>
where
    F: Fn(&str, &str) -> Result<String, TransportError>,
{
    fn exchange(&self, operation: &str, envelope_xml: &str) -> Result<String, TransportError> {
        (self.handler)(operation, envelope_xml)
    }
}

fn client_with<F>(handler: F) -> FiskalClient<StubTransport<F>>
where
    F: Fn(&str, &str) -> Result<String, TransportError>,
{
    FiskalClient::new(
        Config::new(EnvironmentType::Demo),
        common::client_keys(),
        common::trust_store(),
        StubTransport { handler },
    )
}

fn wrap(body: &str) -> String {
    format!(
        r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/"><soapenv:Body>{body}</soapenv:Body></soapenv:Envelope>"#
    )
}

/// Response signed the way the live service signs, with key material that
/// chains to the fixture root CA.
fn service_signed(body: &str) -> String {
    let signer = XmlSigner::new(common::service_keys());
    signer.sign(&wrap(body)).expect("sign response").xml().to_string()
}

fn jir_response() -> String {
    service_signed(&format!(
        r#"<tns:RacunOdgovor xmlns:tns="{TNS}"><tns:Jir>{JIR}</tns:Jir></tns:RacunOdgovor>"#
    ))
}

#[test]
fn echo_round_trips_through_signing_and_verification() {
    let requests = Arc::new(Mutex::new(Vec::<String>::new()));
    let seen = Arc::clone(&requests);
    let client = client_with(move |operation, envelope| {
        assert_eq!(operation, "echo");
        seen.lock().unwrap().push(envelope.to_string());
        Ok(service_signed(&format!(
            r#"<tns:EchoResponse xmlns:tns="{TNS}">ping</tns:EchoResponse>"#
        )))
    });

    let reply = client.echo("ping").expect("echo");
    assert_eq!(reply, "ping");

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].contains("ds:SignatureValue"));
    assert!(requests[0].contains("<tns:EchoRequest"));
}

#[test]
fn echo_mismatch_is_an_error() {
    let client = client_with(|_, _| {
        Ok(service_signed(&format!(
            r#"<tns:EchoResponse xmlns:tns="{TNS}">pong</tns:EchoResponse>"#
        )))
    });

    let err = client.echo("ping").unwrap_err();
    match err {
        WsError::EchoMismatch { sent, received } => {
            assert_eq!(sent, "ping");
            assert_eq!(received, "pong");
        }
        other => panic!("expected EchoMismatch, got {other:?}"),
    }
}

#[test]
fn submit_invoice_returns_the_jir() {
    let requests = Arc::new(Mutex::new(Vec::<String>::new()));
    let seen = Arc::clone(&requests);
    let client = client_with(move |operation, envelope| {
        assert_eq!(operation, "racuni");
        seen.lock().unwrap().push(envelope.to_string());
        Ok(jir_response())
    });

    let jir = client.submit_invoice(&common::sample_invoice()).expect("jir");
    assert_eq!(jir, JIR);

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    // The ZKI for the sample invoice and the fixture client key is fixed.
    assert!(requests[0].contains("<tns:ZastKod>f44dfd099929f8b215af24d25eb84e16</tns:ZastKod>"));
    assert!(requests[0].contains("<tns:IznosUkupno>100.00</tns:IznosUkupno>"));
    assert!(requests[0].contains("ds:SignatureValue"));
}

#[test]
fn service_error_list_becomes_a_response_error() {
    let client = client_with(|_, _| {
        Ok(service_signed(&format!(
            r#"<tns:RacunOdgovor xmlns:tns="{TNS}"><tns:Greske><tns:Greska><tns:SifraGreske>s004</tns:SifraGreske><tns:PorukaGreske>Neispravan digitalni potpis.</tns:PorukaGreske></tns:Greska></tns:Greske></tns:RacunOdgovor>"#
        )))
    });

    let err = client.submit_invoice(&common::sample_invoice()).unwrap_err();
    match err {
        WsError::Response(response) => {
            assert_eq!(response.details().len(), 1);
            assert_eq!(response.details()[0].code(), "s004");
        }
        other => panic!("expected ResponseError, got {other:?}"),
    }
}

#[test]
fn soap_fault_is_surfaced_before_verification() {
    let client = client_with(|_, _| {
        Ok(wrap(&format!(
            r#"<soapenv:Fault><faultcode>soapenv:Client</faultcode><faultstring>rejected</faultstring><detail><tns:Greske xmlns:tns="{TNS}"><tns:Greska><tns:SifraGreske>s005</tns:SifraGreske><tns:PorukaGreske>OIB iz poruke nije jednak OIB-u iz certifikata.</tns:PorukaGreske></tns:Greska></tns:Greske></detail></soapenv:Fault>"#
        )))
    });

    let err = client.submit_invoice(&common::sample_invoice()).unwrap_err();
    match err {
        WsError::Response(response) => {
            assert_eq!(response.details()[0].code(), "s005");
        }
        other => panic!("expected ResponseError, got {other:?}"),
    }
}

#[test]
fn unsigned_response_is_rejected() {
    let client = client_with(|_, _| {
        Ok(wrap(&format!(
            r#"<tns:RacunOdgovor xmlns:tns="{TNS}"><tns:Jir>{JIR}</tns:Jir></tns:RacunOdgovor>"#
        )))
    });

    let err = client.submit_invoice(&common::sample_invoice()).unwrap_err();
    assert!(
        matches!(err, WsError::Verify(VerifyError::MissingSignature)),
        "got {err:?}"
    );
}

#[test]
fn response_signed_by_untrusted_certificate_is_rejected() {
    let untrusted = fiskal_core::keys::KeyMaterial::from_pem(
        &common::read_fixture("certs/untrusted.pem"),
        Some(&common::read_fixture("keys/untrusted_plain.pem")),
        None,
    )
    .expect("untrusted key material");
    let forger = XmlSigner::new(Arc::new(untrusted));
    let client = client_with(move |_, _| {
        let body = format!(
            r#"<tns:RacunOdgovor xmlns:tns="{TNS}"><tns:Jir>{JIR}</tns:Jir></tns:RacunOdgovor>"#
        );
        Ok(forger.sign(&wrap(&body)).expect("forge").xml().to_string())
    });

    let err = client.submit_invoice(&common::sample_invoice()).unwrap_err();
    assert!(
        matches!(
            err,
            WsError::Verify(VerifyError::Trust(TrustError::UntrustedCertificate))
        ),
        "got {err:?}"
    );
}

#[test]
fn transport_failures_are_propagated() {
    let client = client_with(|_, _| Err(TransportError::new("connection refused")));
    let err = client.echo("ping").unwrap_err();
    assert!(matches!(err, WsError::Transport(_)), "got {err:?}");
}

#[test]
fn submit_document_returns_the_jir() {
    let client = client_with(|operation, envelope| {
        assert_eq!(operation, "prateciDokumenti");
        assert!(envelope.contains("<tns:PrateciDokumentZahtjev"));
        assert!(envelope.contains("<tns:ZastKodPD>"));
        Ok(service_signed(&format!(
            r#"<tns:PrateciDokumentOdgovor xmlns:tns="{TNS}"><tns:Jir>{JIR}</tns:Jir></tns:PrateciDokumentOdgovor>"#
        )))
    });

    let oib = fiskal_core::invoice::Oib::parse(common::OIB).expect("oib");
    let number = fiskal_core::invoice::InvoiceNumber::new(7, "X", 1).expect("number");
    let document = fiskal_core::invoice::Document::new(
        oib,
        common::issued_at(),
        number,
        rust_decimal_macros::dec!(25.50),
    )
    .expect("document");

    let jir = client.submit_document(&document).expect("jir");
    assert_eq!(jir, JIR);
}

struct RecordingSink {
    requests: Mutex<Vec<(String, usize)>>,
    responses: Mutex<Vec<(String, usize)>>,
}

impl RawMessageSink for RecordingSink {
    fn on_request(&self, operation: &str, xml: &str) {
        self.requests
            .lock()
            .unwrap()
            .push((operation.to_string(), xml.len()));
    }

    fn on_response(&self, operation: &str, xml: &str) {
        self.responses
            .lock()
            .unwrap()
            .push((operation.to_string(), xml.len()));
    }
}

#[test]
fn raw_message_sink_observes_both_directions() {
    let sink = Arc::new(RecordingSink {
        requests: Mutex::new(Vec::new()),
        responses: Mutex::new(Vec::new()),
    });

    struct SharedSink(Arc<RecordingSink>);
    impl RawMessageSink for SharedSink {
        fn on_request(&self, operation: &str, xml: &str) {
            self.0.on_request(operation, xml);
        }
        fn on_response(&self, operation: &str, xml: &str) {
            self.0.on_response(operation, xml);
        }
    }

    let client = client_with(|_, _| {
        Ok(service_signed(&format!(
            r#"<tns:EchoResponse xmlns:tns="{TNS}">ping</tns:EchoResponse>"#
        )))
    })
    .with_sink(Box::new(SharedSink(Arc::clone(&sink))));

    client.echo("ping").expect("echo");

    let requests = sink.requests.lock().unwrap();
    let responses = sink.responses.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(responses.len(), 1);
    assert_eq!(requests[0].0, "echo");
    assert_eq!(responses[0].0, "echo");
}
