//! Request identity used to address cache entries.

use sha2::{Digest, Sha256};
use url::Url;

use crate::net::Request;

/// Normalized identity of a request.
///
/// Two requests share an identity when they have the same method, the same absolute URL
/// (fragment ignored), the same values for the configured key headers and, for requests that
/// carry one, the same body. The captured request travels with the key so that stored keys can
/// be listed and replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKey {
  request: Request,
  hash: String,
}

impl RequestKey {
  /// Derive the identity of `request`, taking `key_headers` (lowercase names) into account.
  pub fn new(request: &Request, key_headers: &[String]) -> Self {
    let mut request = request.clone();
    request.method = request.method.to_ascii_uppercase();
    request.url.set_fragment(None);

    let hash = identity_hash(&request, key_headers);
    Self { request, hash }
  }

  /// Rebuild a key read back from storage.
  pub(crate) fn from_parts(request: Request, hash: String) -> Self {
    Self { request, hash }
  }

  /// Stable, fixed-length storage key
  pub fn hash(&self) -> &str {
    &self.hash
  }

  pub fn request(&self) -> &Request {
    &self.request
  }

  pub fn method(&self) -> &str {
    &self.request.method
  }

  pub fn url(&self) -> &Url {
    &self.request.url
  }
}

fn identity_hash(request: &Request, key_headers: &[String]) -> String {
  let mut input = format!("{} {}", request.method, request.url);

  let mut headers: Vec<(String, &str)> = key_headers
    .iter()
    .map(|name| {
      let name = name.to_ascii_lowercase();
      let value = request.header(&name).unwrap_or("");
      (name, value)
    })
    .collect();
  headers.sort();
  headers.dedup();
  for (name, value) in headers {
    input.push_str(&format!("\n{}:{}", name, value.trim()));
  }

  if !request.body.is_empty() {
    input.push_str("\nbody:");
    input.push_str(&hex::encode(Sha256::digest(&request.body)));
  }

  // SHA256 hash for stable, fixed-length keys
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  hex::encode(hasher.finalize())
}
