//! Field extraction from provider payloads.
//!
//! The provider wraps each document body as base64 in a `content` field.
//! Decoded, it is JSON shaped like
//! `{"ORDER": {"NUMBER": .., "DATE": .., "HEAD": {"SUPPLIER": .., "POSITION": [..]}}}`.

use std::collections::BTreeMap;

use base64::Engine;
use serde_json::{Map, Value};
use thiserror::Error;

use super::types::{DocumentType, ExtractedFields, Position, COMMON_FIELDS};

const DEFAULT_CURRENCY: &str = "KZT";
const DEFAULT_UNIT: &str = "шт";
const DEFAULT_CONFIRMATION_STATUS: &str = "29";

/// Reasons a payload cannot be turned into fields.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("document {provider_id} has no content")]
    MissingContent { provider_id: String },

    #[error("document {provider_id} content is not valid base64: {reason}")]
    InvalidEncoding { provider_id: String, reason: String },

    #[error("document {provider_id} content is not valid JSON: {reason}")]
    InvalidJson { provider_id: String, reason: String },
}

/// Extracts the structured fields for `doc_type` from a provider payload.
///
/// Every field the type defines ends up in the header, empty when the
/// payload does not carry it.
pub fn extract_fields(
    provider_id: &str,
    doc_type: DocumentType,
    payload: &Value,
) -> Result<ExtractedFields, ExtractError> {
    let content = decode_content(provider_id, payload)?;

    let empty = Map::new();
    let body = match content.get(doc_type.code()) {
        Some(Value::Object(inner)) => inner,
        _ => content.as_object().unwrap_or(&empty),
    };
    let head = body
        .get("HEAD")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let mut header = BTreeMap::new();
    header.insert("number".to_string(), scalar(body.get("NUMBER")));
    header.insert("date".to_string(), scalar(body.get("DATE")));
    header.insert(
        "currency".to_string(),
        scalar_or(body.get("CURRENCY"), DEFAULT_CURRENCY),
    );
    header.insert("supplier_gln".to_string(), scalar(head.get("SUPPLIER")));
    header.insert("buyer_gln".to_string(), scalar(head.get("BUYER")));
    header.insert(
        "supplier_name".to_string(),
        party_name(head.get("SUPPLIER_INFO")),
    );
    header.insert("buyer_name".to_string(), party_name(head.get("BUYER_INFO")));

    let specific: Vec<(&str, String)> = match doc_type {
        DocumentType::Order => vec![
            ("delivery_date", scalar(body.get("DELIVERYDATE"))),
            (
                "delivery_address",
                scalar(
                    head.get("DELIVERYPLACE_INFO")
                        .and_then(|info| info.get("Адрес")),
                ),
            ),
        ],
        DocumentType::OrderResponse => vec![
            ("order_number", scalar(body.get("ORDERNUMBER"))),
            (
                "confirmation_status",
                scalar_or(body.get("ACTION"), DEFAULT_CONFIRMATION_STATUS),
            ),
        ],
        DocumentType::DispatchAdvice => vec![
            ("order_number", scalar(body.get("ORDERNUMBER"))),
            ("shipment_date", scalar(body.get("SHIPMENTDATE"))),
            ("transport_doc", scalar(body.get("WAYBILLNUMBER"))),
        ],
        DocumentType::Invoice => vec![
            ("order_number", scalar(body.get("ORDERNUMBER"))),
            ("total_amount", scalar_or(body.get("AMOUNT"), "0")),
            ("total_vat", scalar_or(body.get("VATAMOUNT"), "0")),
            ("total_with_vat", scalar_or(body.get("AMOUNTWITHVAT"), "0")),
        ],
        DocumentType::PriceCatalog => vec![
            ("valid_from", scalar(body.get("VALIDFROM"))),
            ("valid_to", scalar(body.get("VALIDTO"))),
        ],
    };
    for (name, value) in specific {
        header.insert(name.to_string(), value);
    }

    debug_assert!(COMMON_FIELDS.iter().all(|f| header.contains_key(*f)));

    Ok(ExtractedFields {
        header,
        positions: positions(head.get("POSITION")),
    })
}

fn decode_content(provider_id: &str, payload: &Value) -> Result<Value, ExtractError> {
    let encoded = payload
        .get("content")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ExtractError::MissingContent {
            provider_id: provider_id.to_string(),
        })?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| ExtractError::InvalidEncoding {
            provider_id: provider_id.to_string(),
            reason: e.to_string(),
        })?;

    serde_json::from_slice(&bytes).map_err(|e| ExtractError::InvalidJson {
        provider_id: provider_id.to_string(),
        reason: e.to_string(),
    })
}

fn positions(raw: Option<&Value>) -> Vec<Position> {
    let items: Vec<&Value> = match raw {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(item @ Value::Object(_)) => vec![item],
        _ => Vec::new(),
    };

    items
        .into_iter()
        .filter_map(Value::as_object)
        .enumerate()
        .map(|(index, p)| {
            let line = index as u32 + 1;
            let product = scalar(p.get("PRODUCT"));
            Position {
                line,
                position_number: scalar_or(p.get("POSITIONNUMBER"), &line.to_string()),
                item_code: first_present(p, &["PRODUCTIDBUYER", "PRODUCT"]),
                ean: product,
                item_name: scalar(
                    p.get("CHARACTERISTIC")
                        .and_then(|c| c.get("DESCRIPTION")),
                ),
                quantity: non_empty_or(
                    first_present(
                        p,
                        &["ORDEREDQUANTITY", "DELIVEREDQUANTITY", "INVOICEDQUANTITY"],
                    ),
                    "0",
                ),
                unit: scalar_or(p.get("ORDERUNIT"), DEFAULT_UNIT),
                unit_price: non_empty_or(first_present(p, &["ORDERPRICE", "PRICEWITHVAT"]), "0"),
                vat: scalar_or(p.get("VAT"), "0"),
                amount: scalar_or(p.get("AMOUNT"), "0"),
                amount_with_vat: scalar_or(p.get("AMOUNTWITHVAT"), "0"),
            }
        })
        .collect()
}

fn party_name(info: Option<&Value>) -> String {
    let Some(info) = info else {
        return String::new();
    };
    non_empty_or(
        scalar(info.get("полноеНазвание")),
        &scalar(info.get("краткоеНазвание")),
    )
}

fn first_present(object: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .map(|k| scalar(object.get(*k)))
        .find(|v| !v.is_empty())
        .unwrap_or_default()
}

/// Renders a JSON scalar as text. Missing values, null and containers are empty.
fn scalar(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn scalar_or(value: Option<&Value>, default: &str) -> String {
    non_empty_or(scalar(value), default)
}

fn non_empty_or(value: String, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}
