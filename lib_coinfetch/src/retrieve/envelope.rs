//! # Response Envelope
//!
//! Every JSON request made through the `RequestClient` ends up as an
//! [`Envelope`], whatever the server answered. Callers branch on
//! [`Envelope::is_error`] instead of wrapping each call site in error handling.
//!
//! ## Shapes
//! - **`Object`**: the body was a JSON object. Keys are kept untouched.
//! - **`List`**: the body was a JSON array.
//! - **`Failure`**: the server answered 4xx/5xx (after transport retries).
//!
//! [`Envelope::to_value`] renders the flat form the tools print and export:
//! the body with a `status` field merged in, arrays wrapped as
//! `{"result": [...]}`, and failures marked `"status": "error"` together with
//! an `error` message and an empty `prices` series.

use reqwest::StatusCode;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::warn;

/// Field carrying the HTTP status code (or the error marker).
pub const STATUS_FIELD: &str = "status";
/// Field wrapping array bodies and scalar bodies.
pub const RESULT_FIELD: &str = "result";
/// Field carrying the error message of a failed request.
pub const ERROR_FIELD: &str = "error";
/// Value of [`STATUS_FIELD`] for failed requests.
pub const ERROR_MARKER: &str = "error";
/// Price series seeded on failures so price consumers find the key.
pub const PRICES_FIELD: &str = "prices";

/// Normalized outcome of a JSON request.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Successful response with an object body.
    Object {
        /// HTTP status code.
        status: StatusCode,
        /// Decoded body.
        body: Map<String, Value>,
    },
    /// Successful response with an array body.
    List {
        /// HTTP status code.
        status: StatusCode,
        /// Decoded array elements.
        items: Vec<Value>,
    },
    /// The server answered with an error status.
    Failure {
        /// HTTP status code of the error response.
        status: StatusCode,
        /// Human readable error, e.g. `HTTP status client error (404 Not Found) for url (...)`.
        message: String,
        /// Whatever object the server sent along with the error.
        body: Map<String, Value>,
    },
}

impl Envelope {
    /// Builds an envelope from an already decoded response.
    ///
    /// `http_error` is the message of the status check; when present the
    /// envelope is a `Failure` regardless of the body shape.
    pub fn from_parts(status: StatusCode, http_error: Option<String>, body: Value) -> Self {
        match http_error {
            Some(message) => Envelope::Failure {
                status,
                message,
                body: into_object(body),
            },
            None => match body {
                Value::Array(items) => Envelope::List { status, items },
                other => Envelope::Object {
                    status,
                    body: into_object(other),
                },
            },
        }
    }

    /// Decodes raw response bytes, falling back to an empty object when the
    /// payload is not JSON.
    pub fn decode_body(bytes: &[u8]) -> Value {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Value::Object(Map::new());
        }
        match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, bytes = bytes.len(), "response body is not valid JSON; continuing with an empty body");
                Value::Object(Map::new())
            }
        }
    }

    /// `true` for [`Envelope::Failure`].
    pub fn is_error(&self) -> bool {
        matches!(self, Envelope::Failure { .. })
    }

    /// The HTTP status code the envelope was built from.
    pub fn status(&self) -> StatusCode {
        match self {
            Envelope::Object { status, .. }
            | Envelope::List { status, .. }
            | Envelope::Failure { status, .. } => *status,
        }
    }

    /// The error message of a failed request.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Envelope::Failure { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Flat JSON rendering (see module docs).
    pub fn to_value(&self) -> Value {
        let mut out = match self {
            Envelope::Object { body, .. } | Envelope::Failure { body, .. } => body.clone(),
            Envelope::List { items, .. } => {
                let mut wrapped = Map::new();
                wrapped.insert(RESULT_FIELD.to_string(), Value::Array(items.clone()));
                wrapped
            }
        };

        match self {
            Envelope::Object { status, .. } | Envelope::List { status, .. } => {
                out.insert(STATUS_FIELD.to_string(), Value::from(status.as_u16()));
            }
            Envelope::Failure { message, .. } => {
                out.insert(STATUS_FIELD.to_string(), Value::from(ERROR_MARKER));
                out.insert(ERROR_FIELD.to_string(), Value::from(message.as_str()));
                out.insert(PRICES_FIELD.to_string(), Value::Array(Vec::new()));
            }
        }

        Value::Object(out)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

fn into_object(body: Value) -> Map<String, Value> {
    match body {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut wrapped = Map::new();
            wrapped.insert(RESULT_FIELD.to_string(), other);
            wrapped
        }
    }
}
