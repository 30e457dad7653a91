//! Invoice and accompanying-document domain types.
pub mod zki;
pub use zki::Zki;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Invoice-related validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvoiceError {
    #[error("OIB must have exactly 11 digits")]
    OibFormat,
    #[error("incorrect OIB control digit (got {got}, expected {expected})")]
    OibChecksum { got: char, expected: char },
    #[error("invoice number must be in the form seq/location/device")]
    InvoiceNumberFormat,
    #[error("invoice sequence number must be between 1 and 999999")]
    SequenceOutOfRange,
    #[error("invoice location code must be non-empty alphanumeric")]
    LocationCodeFormat,
    #[error("invoice device number must be at least 1")]
    DeviceOutOfRange,
    #[error("invoice total must not be negative")]
    NegativeTotal,
}

/// OIB, the 11-digit tax-payer identifier, with its mod-11,10 control digit
/// verified on construction.
///
/// # Examples
/// ```rust
/// use fiskal_core::invoice::Oib;
///
/// let oib: Oib = "12345678903".parse()?;
/// assert_eq!(oib.as_str(), "12345678903");
/// # Ok::<(), fiskal_core::invoice::InvoiceError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Oib(String);

impl Oib {
    pub fn parse(value: &str) -> Result<Oib, InvoiceError> {
        if value.len() != 11 || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvoiceError::OibFormat);
        }
        let expected = Oib::control_digit(value);
        let got = value.as_bytes()[10] - b'0';
        if got != expected {
            return Err(InvoiceError::OibChecksum {
                got: (got + b'0') as char,
                expected: (expected + b'0') as char,
            });
        }
        Ok(Oib(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    // ISO 7064 mod 11,10 over the first ten digits.
    fn control_digit(value: &str) -> u8 {
        let mut csum: u32 = 10;
        for b in value.as_bytes()[..10].iter() {
            csum = ((*b - b'0') as u32 + csum) % 10;
            if csum == 0 {
                csum = 10;
            }
            csum = (csum * 2) % 11;
        }
        ((11 - csum) % 10) as u8
    }
}

impl FromStr for Oib {
    type Err = InvoiceError;
    fn from_str(s: &str) -> Result<Oib, InvoiceError> {
        Oib::parse(s)
    }
}

impl TryFrom<String> for Oib {
    type Error = InvoiceError;
    fn try_from(value: String) -> Result<Oib, InvoiceError> {
        Oib::parse(&value)
    }
}

impl From<Oib> for String {
    fn from(oib: Oib) -> String {
        oib.0
    }
}

impl fmt::Display for Oib {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Invoice number: sequence number, location code, and device number, with
/// the canonical text form `seq/location/device`.
///
/// # Examples
/// ```rust
/// use fiskal_core::invoice::InvoiceNumber;
///
/// let number: InvoiceNumber = "12/POS1/3".parse()?;
/// assert_eq!(number.sequence_number(), 12);
/// assert_eq!(number.location_code(), "POS1");
/// assert_eq!(number.device_number(), 3);
/// assert_eq!(number.to_string(), "12/POS1/3");
/// # Ok::<(), fiskal_core::invoice::InvoiceError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceNumber {
    sequence_number: u32,
    location_code: String,
    device_number: u32,
}

impl InvoiceNumber {
    pub fn new(
        sequence_number: u32,
        location_code: impl Into<String>,
        device_number: u32,
    ) -> Result<InvoiceNumber, InvoiceError> {
        if sequence_number == 0 || sequence_number > 999_999 {
            return Err(InvoiceError::SequenceOutOfRange);
        }
        let location_code = location_code.into();
        if location_code.is_empty()
            || location_code.len() > 20
            || !location_code.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return Err(InvoiceError::LocationCodeFormat);
        }
        if device_number == 0 {
            return Err(InvoiceError::DeviceOutOfRange);
        }
        Ok(InvoiceNumber {
            sequence_number,
            location_code,
            device_number,
        })
    }

    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    pub fn location_code(&self) -> &str {
        &self.location_code
    }

    pub fn device_number(&self) -> u32 {
        self.device_number
    }
}

impl FromStr for InvoiceNumber {
    type Err = InvoiceError;
    fn from_str(s: &str) -> Result<InvoiceNumber, InvoiceError> {
        let mut parts = s.split('/');
        let (seq, loc, dev) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(seq), Some(loc), Some(dev), None) => (seq, loc, dev),
            _ => return Err(InvoiceError::InvoiceNumberFormat),
        };
        let sequence_number: u32 = seq
            .parse()
            .map_err(|_| InvoiceError::InvoiceNumberFormat)?;
        let device_number: u32 = dev
            .parse()
            .map_err(|_| InvoiceError::InvoiceNumberFormat)?;
        InvoiceNumber::new(sequence_number, loc, device_number)
    }
}

impl fmt::Display for InvoiceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.sequence_number, self.location_code, self.device_number
        )
    }
}

/// Payment method codes from the fiscalization schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Card,
    Check,
    Wire,
    Other,
}

impl PaymentMethod {
    pub fn code(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "G",
            PaymentMethod::Card => "K",
            PaymentMethod::Check => "C",
            PaymentMethod::Wire => "T",
            PaymentMethod::Other => "O",
        }
    }
}

/// Whether invoice sequence numbers run per location or per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceScope {
    Location,
    Device,
}

impl SequenceScope {
    pub fn code(&self) -> &'static str {
        match self {
            SequenceScope::Location => "P",
            SequenceScope::Device => "N",
        }
    }
}

/// Invoice data for the `racuni` operation.
///
/// Constructed by the caller; the ZKI is derived from this data plus the
/// signing key at submission time and is never user-supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    oib: Oib,
    issued_at: NaiveDateTime,
    invoice_number: InvoiceNumber,
    total: Decimal,
    payment_method: PaymentMethod,
    sequence_scope: SequenceScope,
    vat_registered: bool,
    operator_oib: Option<Oib>,
    late_registration: bool,
    paragon_number: Option<String>,
}

impl Invoice {
    pub fn new(
        oib: Oib,
        issued_at: NaiveDateTime,
        invoice_number: InvoiceNumber,
        total: Decimal,
    ) -> Result<Invoice, InvoiceError> {
        if total.is_sign_negative() {
            return Err(InvoiceError::NegativeTotal);
        }
        Ok(Invoice {
            oib,
            issued_at,
            invoice_number,
            total: total.round_dp(2),
            payment_method: PaymentMethod::Other,
            sequence_scope: SequenceScope::Location,
            vat_registered: false,
            operator_oib: None,
            late_registration: false,
            paragon_number: None,
        })
    }

    pub fn with_payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = method;
        self
    }

    pub fn with_sequence_scope(mut self, scope: SequenceScope) -> Self {
        self.sequence_scope = scope;
        self
    }

    pub fn with_vat_registered(mut self, registered: bool) -> Self {
        self.vat_registered = registered;
        self
    }

    pub fn with_operator_oib(mut self, oib: Oib) -> Self {
        self.operator_oib = Some(oib);
        self
    }

    pub fn with_late_registration(mut self, late: bool) -> Self {
        self.late_registration = late;
        self
    }

    pub fn with_paragon_number(mut self, number: impl Into<String>) -> Self {
        self.paragon_number = Some(number.into());
        self
    }

    pub fn oib(&self) -> &Oib {
        &self.oib
    }

    pub fn issued_at(&self) -> NaiveDateTime {
        self.issued_at
    }

    pub fn invoice_number(&self) -> &InvoiceNumber {
        &self.invoice_number
    }

    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn sequence_scope(&self) -> SequenceScope {
        self.sequence_scope
    }

    pub fn vat_registered(&self) -> bool {
        self.vat_registered
    }

    /// Operator OIB defaults to the issuer OIB when not set.
    pub fn operator_oib(&self) -> &Oib {
        self.operator_oib.as_ref().unwrap_or(&self.oib)
    }

    pub fn late_registration(&self) -> bool {
        self.late_registration
    }

    pub fn paragon_number(&self) -> Option<&str> {
        self.paragon_number.as_deref()
    }
}

/// Accompanying document (prateci dokument) for the `prateciDokumenti`
/// operation. Shares the ZKI derivation with [`Invoice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    oib: Oib,
    issued_at: NaiveDateTime,
    document_number: InvoiceNumber,
    total: Decimal,
    late_registration: bool,
}

impl Document {
    pub fn new(
        oib: Oib,
        issued_at: NaiveDateTime,
        document_number: InvoiceNumber,
        total: Decimal,
    ) -> Result<Document, InvoiceError> {
        if total.is_sign_negative() {
            return Err(InvoiceError::NegativeTotal);
        }
        Ok(Document {
            oib,
            issued_at,
            document_number,
            total: total.round_dp(2),
            late_registration: false,
        })
    }

    pub fn with_late_registration(mut self, late: bool) -> Self {
        self.late_registration = late;
        self
    }

    pub fn oib(&self) -> &Oib {
        &self.oib
    }

    pub fn issued_at(&self) -> NaiveDateTime {
        self.issued_at
    }

    pub fn document_number(&self) -> &InvoiceNumber {
        &self.document_number
    }

    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn late_registration(&self) -> bool {
        self.late_registration
    }
}

/// Date-and-time in the wire format shared by headers, payloads, and the ZKI
/// input string.
pub(crate) fn format_datetime(dt: NaiveDateTime) -> String {
    dt.format("%d.%m.%YT%H:%M:%S").to_string()
}

/// Amount with exactly two fractional digits and a comma decimal separator,
/// as fixed by the ZKI input contract.
pub(crate) fn format_total(total: Decimal) -> String {
    format!("{:.2}", total).replace('.', ",")
}
