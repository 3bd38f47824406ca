//! Request and response types exchanged with the network collaborator.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

/// Status used for the synthesized offline response.
pub const OFFLINE_STATUS: u16 = 503;

/// Body of the synthesized offline response.
pub const OFFLINE_BODY: &str = "Offline";

/// An outbound request as issued by the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
  #[serde(default = "default_method")]
  pub method: String,
  pub url: Url,
  #[serde(default)]
  pub headers: Vec<(String, String)>,
  #[serde(default, with = "text_body")]
  pub body: Vec<u8>,
}

fn default_method() -> String {
  "GET".to_string()
}

impl Request {
  /// Build a bodyless GET request.
  pub fn get(url: Url) -> Self {
    Self {
      method: default_method(),
      url,
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  /// Build a request with an arbitrary method and body.
  pub fn new(method: &str, url: Url, body: impl Into<Vec<u8>>) -> Self {
    Self {
      method: method.to_ascii_uppercase(),
      url,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// A captured response: status, headers and the full body snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  #[serde(default)]
  pub headers: Vec<(String, String)>,
  #[serde(default, with = "text_body")]
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  /// The synthesized response returned when neither network nor cache can serve a request.
  pub fn offline() -> Self {
    Self {
      status: OFFLINE_STATUS,
      headers: vec![("content-type".to_string(), "text/plain".to_string())],
      body: OFFLINE_BODY.as_bytes().to_vec(),
    }
  }

  /// Whether the status is in the 2xx range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn is_offline(&self) -> bool {
    self.status == OFFLINE_STATUS && self.body == OFFLINE_BODY.as_bytes()
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// Bodies travel as text in the JSON event protocol.
mod text_body {
  use super::*;

  pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(body))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let text = String::deserialize(deserializer)?;
    Ok(text.into_bytes())
  }
}
