use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header fields every document type carries.
pub const COMMON_FIELDS: &[&str] = &[
    "number",
    "date",
    "currency",
    "supplier_gln",
    "buyer_gln",
    "supplier_name",
    "buyer_name",
];

/// Fields every line item carries.
pub const POSITION_FIELDS: &[&str] = &[
    "line",
    "position_number",
    "ean",
    "item_code",
    "item_name",
    "quantity",
    "unit",
    "unit_price",
    "vat",
    "amount",
    "amount_with_vat",
];

/// The document types exchanged with the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocumentType {
    #[serde(rename = "ORDER")]
    Order,
    #[serde(rename = "ORDRSP")]
    OrderResponse,
    #[serde(rename = "DESADV")]
    DispatchAdvice,
    #[serde(rename = "INVOICE")]
    Invoice,
    #[serde(rename = "PRICAT")]
    PriceCatalog,
}

impl DocumentType {
    pub const ALL: [DocumentType; 5] = [
        DocumentType::Order,
        DocumentType::OrderResponse,
        DocumentType::DispatchAdvice,
        DocumentType::Invoice,
        DocumentType::PriceCatalog,
    ];

    /// The provider's code for this type, also used as the storage key.
    pub fn code(&self) -> &'static str {
        match self {
            DocumentType::Order => "ORDER",
            DocumentType::OrderResponse => "ORDRSP",
            DocumentType::DispatchAdvice => "DESADV",
            DocumentType::Invoice => "INVOICE",
            DocumentType::PriceCatalog => "PRICAT",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.code().eq_ignore_ascii_case(code.trim()))
    }

    /// Header fields specific to this type, on top of [`COMMON_FIELDS`].
    pub fn specific_fields(&self) -> &'static [&'static str] {
        match self {
            DocumentType::Order => &["delivery_date", "delivery_address"],
            DocumentType::OrderResponse => &["order_number", "confirmation_status"],
            DocumentType::DispatchAdvice => &["order_number", "shipment_date", "transport_doc"],
            DocumentType::Invoice => &[
                "order_number",
                "total_amount",
                "total_vat",
                "total_with_vat",
            ],
            DocumentType::PriceCatalog => &["valid_from", "valid_to"],
        }
    }

    /// Human-readable name for messages.
    pub fn label(&self) -> &'static str {
        match self {
            DocumentType::Order => "Order",
            DocumentType::OrderResponse => "Order response",
            DocumentType::DispatchAdvice => "Dispatch advice",
            DocumentType::Invoice => "Invoice",
            DocumentType::PriceCatalog => "Price catalog",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s).ok_or_else(|| format!("unknown document type '{}'", s))
    }
}

/// A document as fetched from the provider, before extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    /// Provider-assigned identifier.
    pub provider_id: String,
    pub doc_type: DocumentType,
    /// The full document body as returned by the provider.
    pub payload: serde_json::Value,
}

/// One line item of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub position_number: String,
    pub ean: String,
    pub item_code: String,
    pub item_name: String,
    pub quantity: String,
    pub unit: String,
    pub unit_price: String,
    pub vat: String,
    pub amount: String,
    pub amount_with_vat: String,
}

impl Position {
    /// Looks up a line-item field by placeholder name.
    pub fn field(&self, name: &str) -> Option<String> {
        let value = match name {
            "line" => return Some(self.line.to_string()),
            "position_number" => &self.position_number,
            "ean" => &self.ean,
            "item_code" => &self.item_code,
            "item_name" => &self.item_name,
            "quantity" => &self.quantity,
            "unit" => &self.unit,
            "unit_price" => &self.unit_price,
            "vat" => &self.vat,
            "amount" => &self.amount,
            "amount_with_vat" => &self.amount_with_vat,
            _ => return None,
        };
        Some(value.clone())
    }
}

/// Structured fields extracted from a provider payload.
///
/// `header` holds exactly the fields the document type defines, some of
/// which may be empty strings. Names outside that set do not resolve.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub header: BTreeMap<String, String>,
    pub positions: Vec<Position>,
}

impl ExtractedFields {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.header.get(name).map(String::as_str)
    }

    /// The document number, or an empty string if the payload had none.
    pub fn number(&self) -> &str {
        self.get("number").unwrap_or_default()
    }
}

/// A stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: i64,
    pub provider_id: String,
    pub doc_type: DocumentType,
    pub number: String,
    pub fields: ExtractedFields,
    pub raw: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl Document {
    /// Key the ERP can use to recognise a resent document.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.doc_type.code(), self.provider_id)
    }
}
