use std::borrow::Cow;

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

use super::{RenderError, XmlTemplate};
use crate::document::{Document, Position};

/// A piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Placeholder { name: &'a str, offset: usize },
}

/// Splits a template into literal text and `{{name}}` placeholders.
pub fn parse(template: &str) -> Result<Vec<Segment<'_>>, RenderError> {
    let mut segments = Vec::new();
    let mut rest = template;
    let mut offset = 0;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            segments.push(Segment::Text(&rest[..start]));
        }
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| RenderError::Syntax {
            offset: offset + start,
            reason: "unterminated '{{'".to_string(),
        })?;

        let inner = &after[..end];
        let name = inner.trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(RenderError::Syntax {
                offset: offset + start,
                reason: format!("invalid placeholder name '{}'", inner),
            });
        }
        segments.push(Segment::Placeholder {
            name,
            offset: offset + start,
        });

        let consumed = start + 2 + end + 2;
        rest = &rest[consumed..];
        offset += consumed;
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest));
    }
    Ok(segments)
}

/// Renders `document` with `template`.
///
/// Every placeholder must resolve, including those in the position
/// template when the document has no line items, and the result must be
/// well-formed XML. On failure nothing is returned.
pub fn render(document: &Document, template: &XmlTemplate) -> Result<String, RenderError> {
    if template.doc_type != document.doc_type {
        return Err(RenderError::TypeMismatch {
            template: template.doc_type,
            document: document.doc_type,
        });
    }

    let body = parse(&template.body)?;
    let line = parse(&template.position_template)?;

    let probe = Position::default();
    for segment in &line {
        if let Segment::Placeholder { name, .. } = segment {
            resolve(document, Some(&probe), name)?;
        }
    }

    let mut out = String::with_capacity(template.body.len() * 2);
    for segment in &body {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Placeholder { name: "positions", .. } => {
                let lines = document
                    .fields
                    .positions
                    .iter()
                    .map(|position| expand(document, Some(position), &line))
                    .collect::<Result<Vec<_>, _>>()?;
                out.push_str(&lines.join("\n"));
            }
            Segment::Placeholder { name, .. } => out.push_str(&resolve(document, None, name)?),
        }
    }

    check_well_formed(&out)?;
    Ok(out)
}

fn expand(
    document: &Document,
    position: Option<&Position>,
    segments: &[Segment<'_>],
) -> Result<String, RenderError> {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Placeholder { name, .. } => out.push_str(&resolve(document, position, name)?),
        }
    }
    Ok(out)
}

/// Resolves a scalar placeholder to its escaped value. Line-item fields
/// shadow header fields inside the position template.
fn resolve(
    document: &Document,
    position: Option<&Position>,
    name: &str,
) -> Result<String, RenderError> {
    if let Some(value) = position.and_then(|p| p.field(name)) {
        return Ok(escape(value.as_str()).into_owned());
    }

    let value: Cow<'_, str> = match name {
        "doc_type" => Cow::Borrowed(document.doc_type.code()),
        "provider_id" => Cow::Borrowed(document.provider_id.as_str()),
        "idempotency_key" => Cow::Owned(document.idempotency_key()),
        "raw_json" => Cow::Owned(to_json(&document.raw)?),
        "positions_json" => Cow::Owned(to_json(&document.fields.positions)?),
        _ => match document.fields.get(name) {
            Some(value) => Cow::Borrowed(value),
            None => {
                return Err(RenderError::UnresolvedPlaceholder {
                    name: name.to_string(),
                    doc_type: document.doc_type,
                })
            }
        },
    };
    Ok(escape(&*value).into_owned())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RenderError> {
    serde_json::to_string(value).map_err(|e| RenderError::Serialize(e.to_string()))
}

fn check_well_formed(xml: &str) -> Result<(), RenderError> {
    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;
    let mut roots = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => {
                if depth == 0 {
                    roots += 1;
                }
                depth += 1;
            }
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Empty(_)) if depth == 0 => roots += 1,
            Ok(Event::Text(text)) if depth == 0 => {
                if !text.iter().all(u8::is_ascii_whitespace) {
                    return Err(RenderError::MalformedXml(
                        "text outside the root element".to_string(),
                    ));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(RenderError::MalformedXml(format!(
                    "{} (near byte {})",
                    e,
                    reader.buffer_position()
                )))
            }
        }
    }

    if depth != 0 {
        return Err(RenderError::MalformedXml(format!(
            "{} element(s) left open",
            depth
        )));
    }
    if roots != 1 {
        return Err(RenderError::MalformedXml(format!(
            "expected one root element, found {}",
            roots
        )));
    }
    Ok(())
}
