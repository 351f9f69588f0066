//! Request sessions and pluggable session managers.
//!
//! A [`SessionManager`] is selected with the `session.manager` setting. It
//! loads a [`Session`] after the request is parsed and stores it back before
//! the response is built.

use std::fmt;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};

use crate::error::{RpcError, RpcResult};
use crate::request::Request;
use crate::response::Response;

/// A key/value session with change tracking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    values: Map<String, Value>,
    changed: bool,
}

impl Session {
    /// Creates an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Stores a value and marks the session changed.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
        self.changed = true;
    }

    /// Removes a value, marking the session changed if it existed.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.values.remove(key);
        if removed.is_some() {
            self.changed = true;
        }
        removed
    }

    /// Returns `true` if the session was modified since it was loaded.
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Encodes the session as base64 JSON.
    pub fn encode(&self) -> String {
        STANDARD.encode(Value::Object(self.values.clone()).to_string())
    }

    /// Decodes a session produced by [`Session::encode`].
    pub fn decode(encoded: &str) -> RpcResult<Self> {
        let invalid = |reason: String| RpcError::bad_request(reason);
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| invalid(format!("invalid session encoding: {e}")))?;
        match serde_json::from_slice(&bytes) {
            Ok(Value::Object(values)) => Ok(Self {
                values,
                changed: false,
            }),
            Ok(_) => Err(invalid("session is not an object".to_string())),
            Err(e) => Err(invalid(format!("invalid session payload: {e}"))),
        }
    }
}

/// Loads and stores sessions for a transport.
#[async_trait]
pub trait SessionManager: Send + Sync + fmt::Debug {
    /// Loads the session carried by `request`, if any.
    async fn load(&self, request: &Request) -> RpcResult<Option<Session>>;

    /// Writes `session` into `response`.
    async fn store(&self, session: &Session, response: &mut Response) -> RpcResult<()>;
}

/// Carries the session as base64 JSON in a header.
#[derive(Debug, Clone)]
pub struct HeaderSessionManager {
    header: String,
}

impl HeaderSessionManager {
    /// Default header name.
    pub const DEFAULT_HEADER: &'static str = "x-session";

    /// Creates a manager using `header`.
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into().to_ascii_lowercase(),
        }
    }
}

impl Default for HeaderSessionManager {
    fn default() -> Self {
        Self::new(Self::DEFAULT_HEADER)
    }
}

#[async_trait]
impl SessionManager for HeaderSessionManager {
    async fn load(&self, request: &Request) -> RpcResult<Option<Session>> {
        match request.header(&self.header) {
            Some(encoded) if !encoded.trim().is_empty() => Session::decode(encoded).map(Some),
            _ => Ok(Some(Session::new())),
        }
    }

    async fn store(&self, session: &Session, response: &mut Response) -> RpcResult<()> {
        if session.is_changed() {
            response.set_header(self.header.clone(), session.encode());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_change_tracking() {
        let mut session = Session::new();
        assert!(!session.is_changed());
        assert!(session.remove("missing").is_none());
        assert!(!session.is_changed());
        session.set("user", "ada");
        assert!(session.is_changed());
        assert_eq!(session.get("user"), Some(&json!("ada")));
    }

    #[test]
    fn test_encode_decode() {
        let mut session = Session::new();
        session.set("n", 3);
        let decoded = Session::decode(&session.encode()).unwrap();
        assert_eq!(decoded.get("n"), Some(&json!(3)));
        assert!(!decoded.is_changed());
        assert!(Session::decode("not base64!").is_err());
    }

    #[tokio::test]
    async fn test_header_manager() {
        let manager = HeaderSessionManager::default();
        let mut request = Request::new();
        let loaded = manager.load(&request).await.unwrap().unwrap();
        assert!(loaded.get("n").is_none());

        let mut session = Session::new();
        session.set("n", 1);
        request.headers.insert(
            HeaderSessionManager::DEFAULT_HEADER,
            http::HeaderValue::from_str(&session.encode()).unwrap(),
        );
        let loaded = manager.load(&request).await.unwrap().unwrap();
        assert_eq!(loaded.get("n"), Some(&json!(1)));

        let mut response = Response::new();
        manager.store(&loaded, &mut response).await.unwrap();
        assert!(response.headers.is_empty());
        manager.store(&session, &mut response).await.unwrap();
        assert!(response.headers.contains_key("x-session"));
    }
}
