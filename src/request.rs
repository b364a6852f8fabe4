//! The caller-owned request description
//!
//! A [`RequestDescription`] is the logical request submitted to the
//! [`Dispatcher`](crate::Dispatcher). It is immutable once submitted; the
//! identifier is chosen by the caller and must be unique among requests
//! currently in flight.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Describes one logical HTTP request.
///
/// Only `id` and `url` are required. The header block is raw text with one
/// `name: value` pair per line; literal `\n` sequences are normalized to
/// newlines before parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDescription {
    /// Caller-chosen identifier, unique among in-flight requests.
    pub id: String,

    /// Request URL.
    pub url: String,

    /// HTTP method. Defaults to `GET`.
    #[serde(default = "default_method")]
    pub method: String,

    /// Raw request header block, `"name: value"` per line.
    #[serde(default)]
    pub headers: Option<String>,

    /// Request body.
    #[serde(default)]
    pub payload: Option<Payload>,

    /// Whether the exchange should carry ambient credentials.
    ///
    /// Carried through to the outcome for callers that need it, but not
    /// mapped onto the underlying client: its cookie policy is client-wide,
    /// not per request.
    #[serde(default)]
    pub with_credentials: bool,

    /// Per-request timeout delegated to the underlying exchange.
    #[serde(default)]
    pub timeout: Option<Duration>,

    /// Negotiated response body handling. Defaults to [`ResponseKind::Text`].
    #[serde(default)]
    pub response_kind: ResponseKind,
}

fn default_method() -> String {
    "GET".to_string()
}

impl RequestDescription {
    /// Create a description with the required fields and defaults elsewhere.
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            method: default_method(),
            headers: None,
            payload: None,
            with_credentials: false,
            timeout: None,
            response_kind: ResponseKind::default(),
        }
    }

    /// Set the HTTP method.
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Set the raw header block.
    pub fn headers(mut self, headers: impl Into<String>) -> Self {
        self.headers = Some(headers.into());
        self
    }

    /// Set the request body.
    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Set the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the negotiated response kind.
    pub fn response_kind(mut self, kind: ResponseKind) -> Self {
        self.response_kind = kind;
        self
    }
}

/// Request body variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Plain text body.
    Text {
        /// Body content.
        value: String,
    },
    /// Raw binary body.
    Binary {
        /// Body bytes.
        value: Vec<u8>,
    },
    /// Multipart form data. The environment sets the multipart boundary, so
    /// any caller-supplied `content-type` header is dropped for this variant.
    Form {
        /// Form parts in submission order.
        parts: Vec<FormPart>,
    },
}

impl Payload {
    /// Plain text body.
    pub fn text(value: impl Into<String>) -> Self {
        Payload::Text {
            value: value.into(),
        }
    }

    /// Raw binary body.
    pub fn binary(value: impl Into<Vec<u8>>) -> Self {
        Payload::Binary {
            value: value.into(),
        }
    }

    /// Multipart form body.
    pub fn form(parts: Vec<FormPart>) -> Self {
        Payload::Form { parts }
    }

    /// True for multipart form payloads.
    pub fn is_form(&self) -> bool {
        matches!(self, Payload::Form { .. })
    }
}

/// One named part of a multipart form payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormPart {
    /// Field name.
    pub name: String,
    /// Field value.
    pub value: FormValue,
}

impl FormPart {
    /// A text form field.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: FormValue::Text {
                value: value.into(),
            },
        }
    }

    /// A file form field.
    pub fn file(
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: Option<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            value: FormValue::File {
                filename: filename.into(),
                content_type,
                data: data.into(),
            },
        }
    }
}

/// Value of a form part.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FormValue {
    /// Text field.
    Text {
        /// Field content.
        value: String,
    },
    /// File field.
    File {
        /// File name reported to the server.
        filename: String,
        /// Optional content type of the file part.
        #[serde(default)]
        content_type: Option<String>,
        /// File bytes.
        data: Vec<u8>,
    },
}

/// Negotiated response body handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// Decode the body as text. The default.
    #[default]
    Text,
    /// Parse the body as JSON, falling back to a null value when malformed.
    Json,
    /// XML markup, carried as decoded text.
    Xml,
    /// Document markup, carried as decoded text.
    Document,
    /// Opaque binary value, passed through unchanged.
    Blob,
    /// Raw bytes, passed through unchanged.
    Binary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_applies_defaults() {
        let description = RequestDescription::new("r1", "http://localhost/");
        assert_eq!(description.method, "GET");
        assert_eq!(description.response_kind, ResponseKind::Text);
        assert!(description.headers.is_none());
        assert!(description.payload.is_none());
        assert!(!description.with_credentials);
    }

    #[test]
    fn test_deserialize_minimal_description() {
        let description: RequestDescription =
            serde_json::from_value(serde_json::json!({
                "id": "r1",
                "url": "http://domain.com/"
            }))
            .unwrap();

        assert_eq!(description.id, "r1");
        assert_eq!(description.method, "GET");
        assert_eq!(description.response_kind, ResponseKind::Text);
        assert!(description.timeout.is_none());
    }

    #[test]
    fn test_deserialize_response_kind_names() {
        let description: RequestDescription =
            serde_json::from_value(serde_json::json!({
                "id": "r1",
                "url": "http://domain.com/",
                "method": "POST",
                "response_kind": "json"
            }))
            .unwrap();

        assert_eq!(description.method, "POST");
        assert_eq!(description.response_kind, ResponseKind::Json);
    }

    #[test]
    fn test_payload_form_detection() {
        assert!(Payload::form(vec![FormPart::text("a", "1")]).is_form());
        assert!(!Payload::text("body").is_form());
        assert!(!Payload::binary(vec![1u8, 2, 3]).is_form());
    }
}
