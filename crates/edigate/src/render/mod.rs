//! Template Renderer.
//!
//! Turns a stored document into the XML the ERP expects, using the
//! current template for its type. Rendering is pure: the template is an
//! explicit argument, so edits take effect on the next render.

pub mod defaults;
mod engine;

use thiserror::Error;

use crate::document::DocumentType;

pub use defaults::default_template;
pub use engine::{parse, render, Segment};

pub const DEFAULT_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// A per-type rendering rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlTemplate {
    pub doc_type: DocumentType,
    pub name: String,
    /// Document body with `{{name}}` placeholders.
    pub body: String,
    /// Expanded once per line item wherever the body says `{{positions}}`.
    pub position_template: String,
    /// Sent as the `Content-Type` of the ERP request.
    pub content_type: String,
    pub version: u32,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("template syntax error at byte {offset}: {reason}")]
    Syntax { offset: usize, reason: String },

    #[error("placeholder '{name}' does not resolve for {doc_type} documents")]
    UnresolvedPlaceholder { name: String, doc_type: DocumentType },

    #[error("template is for {template} but the document is {document}")]
    TypeMismatch {
        template: DocumentType,
        document: DocumentType,
    },

    #[error("no active template for {0}")]
    NoActiveTemplate(DocumentType),

    #[error("rendered output is not well-formed XML: {0}")]
    MalformedXml(String),

    #[error("failed to serialise document data: {0}")]
    Serialize(String),
}
