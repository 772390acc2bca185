//! Request and response shapes exchanged with the backend.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of every backend call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
  pub action: String,
  pub params: Value,
}

impl CallRequest {
  /// Build a request. `null` params become an empty object.
  pub fn new(action: impl Into<String>, params: Value) -> Self {
    let params = match params {
      Value::Null => Value::Object(Map::new()),
      other => other,
    };
    Self {
      action: action.into(),
      params,
    }
  }
}

/// Outcome of decoding a response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBody {
  Parsed(Value),
  /// Empty, malformed or non-JSON body
  ParseFailed,
}

impl ParsedBody {
  pub fn parse(body: &[u8]) -> Self {
    match serde_json::from_slice(body) {
      Ok(value) => ParsedBody::Parsed(value),
      Err(_) => ParsedBody::ParseFailed,
    }
  }

  /// The value screens see. A body that didn't parse reads as `{}`.
  pub fn into_data(self) -> Value {
    match self {
      ParsedBody::Parsed(value) => value,
      ParsedBody::ParseFailed => Value::Object(Map::new()),
    }
  }
}

/// What every backend call resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResponse {
  pub ok: bool,
  pub status: u16,
  pub data: Value,
}

impl CallResponse {
  pub fn from_parts(status: u16, body: &[u8]) -> Self {
    Self {
      ok: (200..300).contains(&status),
      status,
      data: ParsedBody::parse(body).into_data(),
    }
  }

  /// `data.result`, when present.
  pub fn result(&self) -> Option<&Value> {
    self.data.get("result")
  }

  /// `data.description`, the backend's human-readable message.
  pub fn description(&self) -> Option<&str> {
    self.data.get("description").and_then(Value::as_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_null_params_become_empty_object() {
    let request = CallRequest::new("ping", Value::Null);
    assert_eq!(
      serde_json::to_value(&request).unwrap(),
      json!({"action": "ping", "params": {}})
    );
  }

  #[test]
  fn test_parse_failures_read_as_empty_object() {
    assert_eq!(ParsedBody::parse(b""), ParsedBody::ParseFailed);
    assert_eq!(ParsedBody::parse(b"<html>"), ParsedBody::ParseFailed);
    assert_eq!(ParsedBody::parse(b"{\"result\":").into_data(), json!({}));
  }

  #[test]
  fn test_response_accessors() {
    let response = CallResponse::from_parts(
      500,
      br#"{"result": false, "description": "Document is locked"}"#,
    );
    assert!(!response.ok);
    assert_eq!(response.result(), Some(&json!(false)));
    assert_eq!(response.description(), Some("Document is locked"));
  }

  #[test]
  fn test_accessors_on_empty_data() {
    let response = CallResponse::from_parts(204, b"");
    assert!(response.ok);
    assert_eq!(response.result(), None);
    assert_eq!(response.description(), None);
  }
}
