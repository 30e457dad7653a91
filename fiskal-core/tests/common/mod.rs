use chrono::NaiveDateTime;
use fiskal_core::invoice::{Invoice, InvoiceNumber, Oib};
use fiskal_core::keys::KeyMaterial;
use fiskal_core::trust::TrustStore;
use rust_decimal_macros::dec;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const OIB: &str = "12345678903";
pub const PASSPHRASE: &str = "lozinka";

#[allow(dead_code)]
pub fn fixture_path(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(relative)
}

#[allow(dead_code)]
pub fn read_fixture(relative: &str) -> String {
    std::fs::read_to_string(fixture_path(relative)).expect("read fixture")
}

#[allow(dead_code)]
pub fn client_keys() -> Arc<KeyMaterial> {
    let material = KeyMaterial::from_pem(
        &read_fixture("certs/client.pem"),
        Some(&read_fixture("keys/client_plain.pem")),
        None,
    )
    .expect("client key material");
    Arc::new(material)
}

#[allow(dead_code)]
pub fn service_keys() -> Arc<KeyMaterial> {
    let material = KeyMaterial::from_pem(
        &read_fixture("certs/service.pem"),
        Some(&read_fixture("keys/service_plain.pem")),
        None,
    )
    .expect("service key material");
    Arc::new(material)
}

#[allow(dead_code)]
pub fn trust_store() -> Arc<TrustStore> {
    let store = TrustStore::from_pem_anchors([read_fixture("certs/root_ca.pem").as_str()])
        .expect("trust store");
    Arc::new(store)
}

#[allow(dead_code)]
pub fn issued_at() -> NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

#[allow(dead_code)]
pub fn sample_invoice() -> Invoice {
    let oib = Oib::parse(OIB).expect("oib");
    let number = InvoiceNumber::new(1, "X", 1).expect("invoice number");
    Invoice::new(oib, issued_at(), number, dec!(100.00)).expect("invoice")
}
