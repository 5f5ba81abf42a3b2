//! Request descriptors and storage key derivation.

use std::net::IpAddr;

use super::rules::Scope;

/// Identifier used when no address information is available at all.
const UNKNOWN_CLIENT: &str = "unknown";
/// Constant identifier for globally scoped rules.
const GLOBAL_IDENTIFIER: &str = "global";

/// What the limiter needs to know about an inbound request.
///
/// Built by the web layer; the limiter only ever reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub path: String,
    pub method: Option<String>,
    /// Transport-level peer address
    pub peer_addr: Option<IpAddr>,
    /// Raw `X-Forwarded-For` header value
    pub forwarded_for: Option<String>,
    /// Raw `X-Real-IP` header value
    pub real_ip: Option<String>,
    /// Authenticated user id, if any
    pub user_id: Option<String>,
}

impl RequestDescriptor {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_peer_addr(mut self, addr: IpAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    pub fn with_forwarded_for(mut self, value: impl Into<String>) -> Self {
        self.forwarded_for = Some(value.into());
        self
    }

    pub fn with_real_ip(mut self, value: impl Into<String>) -> Self {
        self.real_ip = Some(value.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer.
    pub fn client_ip(&self) -> String {
        let forwarded = self
            .forwarded_for
            .as_deref()
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }

        if let Some(ip) = self.real_ip.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            return ip.to_string();
        }

        self.peer_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }

    /// The identifier a quota is tracked against for the given scope.
    ///
    /// User-scoped rules fall back to the client address for anonymous requests.
    pub fn identifier(&self, scope: Scope) -> String {
        match scope {
            Scope::Ip => self.client_ip(),
            Scope::User => match self.user_id.as_deref().filter(|u| !u.is_empty()) {
                Some(user) => user.to_string(),
                None => self.client_ip(),
            },
            Scope::Endpoint => self.path.clone(),
            Scope::Global => GLOBAL_IDENTIFIER.to_string(),
        }
    }
}

/// Storage key for one quota: `{scope}:{identifier}:{path}`, without the path
/// component for globally scoped rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn new(scope: Scope, identifier: &str, path: &str) -> Self {
        match scope {
            Scope::Global => Self(format!("{}:{}", scope.tag(), identifier)),
            _ => Self(format!("{}:{}:{}", scope.tag(), identifier, path)),
        }
    }

    /// Derive the key for a request under a rule's scope.
    pub fn for_request(scope: Scope, request: &RequestDescriptor) -> Self {
        Self::new(scope, &request.identifier(scope), &request.path)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The store key for one algorithm's state. Rules sharing a key but not
    /// an algorithm keep their differently typed values apart.
    pub fn storage_key(&self, tag: &str) -> String {
        format!("{}:{}", self.0, tag)
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RateLimitKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
