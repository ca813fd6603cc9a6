//! Pre-request hooks: attach auth and context before a request leaves.

use super::types::{ApiRequest, Auth};

/// Runs on every outbound request, replays included.
pub trait RequestHook: Send + Sync {
  fn before_request(&self, request: &mut ApiRequest);
}

/// Attaches credentials.
pub struct AuthHook {
  auth: Auth,
}

impl AuthHook {
  pub fn new(auth: Auth) -> Self {
    Self { auth }
  }
}

impl RequestHook for AuthHook {
  fn before_request(&self, request: &mut ApiRequest) {
    request.auth = Some(self.auth.clone());
  }
}

/// Attaches fixed context headers (tenant id, client version, ...).
pub struct StaticHeaders {
  headers: Vec<(String, String)>,
}

impl StaticHeaders {
  pub fn new(headers: impl IntoIterator<Item = (String, String)>) -> Self {
    Self {
      headers: headers.into_iter().collect(),
    }
  }
}

impl RequestHook for StaticHeaders {
  fn before_request(&self, request: &mut ApiRequest) {
    for (name, value) in &self.headers {
      request.set_header(name, value);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::Method;

  #[test]
  fn test_static_headers_replace_existing_values() {
    let hook = StaticHeaders::new([("X-Tenant".to_string(), "acme".to_string())]);
    let mut request = ApiRequest::new(Method::GET, "/x", None);
    request.set_header("x-tenant", "other");

    hook.before_request(&mut request);

    assert_eq!(request.header("X-TENANT"), Some("acme"));
    assert_eq!(request.headers.len(), 1);
  }

  #[test]
  fn test_auth_hook_sets_credentials() {
    let hook = AuthHook::new(Auth::Bearer("secret".to_string()));
    let mut request = ApiRequest::new(Method::POST, "/x", None);
    hook.before_request(&mut request);
    assert_eq!(request.auth, Some(Auth::Bearer("secret".to_string())));
  }
}
