//! Typed adapters for the JSON shapes returned by upstream media APIs.
//!
//! Providers disagree on where the useful value lives. Instead of nesting
//! conditionals per provider, each recognized layout is one [`ResponseShape`]
//! and callers try an ordered list of them.

use serde_json::Value;

/// How the value found by a shape should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// A URL pointing at the content.
    Url,
    /// Inline base64 content, optionally prefixed as a data URI.
    Base64,
}

/// Value extracted from a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    Url(String),
    /// Raw base64 payload with any data-URI prefix already stripped.
    Base64(String),
}

/// One recognized response layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// `{"<key>": "<value>"}`
    Field { key: &'static str, encoding: Encoding },
    /// `{"<list>": [{"<field>": "<value>"}, ...]}`, first usable element wins.
    NestedList {
        list: &'static str,
        field: &'static str,
        encoding: Encoding,
    },
}

impl ResponseShape {
    pub const fn url(key: &'static str) -> Self {
        Self::Field {
            key,
            encoding: Encoding::Url,
        }
    }

    pub const fn base64(key: &'static str) -> Self {
        Self::Field {
            key,
            encoding: Encoding::Base64,
        }
    }

    pub const fn nested(list: &'static str, field: &'static str, encoding: Encoding) -> Self {
        Self::NestedList {
            list,
            field,
            encoding,
        }
    }

    /// Human readable key path, for logs.
    pub fn keys(&self) -> String {
        match self {
            Self::Field { key, .. } => (*key).to_string(),
            Self::NestedList { list, field, .. } => format!("{list}[].{field}"),
        }
    }

    /// Try to pull a value out of `body` using this shape.
    pub fn extract(&self, body: &Value) -> Option<Extracted> {
        match *self {
            Self::Field { key, encoding } => body
                .get(key)
                .and_then(Value::as_str)
                .and_then(|raw| interpret(raw, encoding)),
            Self::NestedList {
                list,
                field,
                encoding,
            } => body.get(list)?.as_array()?.iter().find_map(|item| {
                item.get(field)
                    .and_then(Value::as_str)
                    .and_then(|raw| interpret(raw, encoding))
            }),
        }
    }
}

fn interpret(raw: &str, encoding: Encoding) -> Option<Extracted> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match encoding {
        Encoding::Url => Some(Extracted::Url(raw.to_string())),
        Encoding::Base64 => {
            let payload = match raw.find("base64,") {
                Some(idx) => &raw[idx + "base64,".len()..],
                None => raw,
            };
            (!payload.is_empty()).then(|| Extracted::Base64(payload.to_string()))
        }
    }
}

/// Layouts returned by download resolvers, most specific first.
pub fn download_url_shapes() -> &'static [ResponseShape] {
    const SHAPES: &[ResponseShape] = &[
        ResponseShape::url("link"),
        ResponseShape::url("url"),
        ResponseShape::url("download_url"),
        ResponseShape::nested("formats", "url", Encoding::Url),
    ];
    SHAPES
}

/// Layouts returned by image generators.
pub fn image_shapes() -> &'static [ResponseShape] {
    const SHAPES: &[ResponseShape] = &[
        ResponseShape::url("generated_image"),
        ResponseShape::url("url"),
        ResponseShape::base64("b64_json"),
        ResponseShape::base64("data"),
        ResponseShape::nested("data", "url", Encoding::Url),
        ResponseShape::nested("data", "b64_json", Encoding::Base64),
    ];
    SHAPES
}

/// First value any of `shapes` can extract from `body`.
pub fn first_match(shapes: &[ResponseShape], body: &Value) -> Option<Extracted> {
    shapes.iter().find_map(|shape| shape.extract(body))
}

/// Comma separated list of the keys `shapes` recognize.
pub fn describe(shapes: &[ResponseShape]) -> String {
    shapes
        .iter()
        .map(ResponseShape::keys)
        .collect::<Vec<_>>()
        .join(", ")
}
