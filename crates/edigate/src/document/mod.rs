//! EDI business documents: the fixed set of document types, the fields
//! extracted from provider payloads, and the stored document record.

pub mod extract;
pub mod types;

pub use extract::{extract_fields, ExtractError};
pub use types::{Document, DocumentType, ExtractedFields, Position, RawDocument};
