//! Transport-neutral view of the calling client

use std::collections::BTreeMap;
use std::net::IpAddr;

/// What the abuse gate can see about a caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    /// Source address
    pub ip: Option<IpAddr>,
    /// Request headers, keys lowercased
    pub headers: BTreeMap<String, String>,
    /// Client session identifier
    pub session_id: Option<String>,
}

impl ClientInfo {
    /// Create empty client info
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With source address
    #[inline]
    #[must_use]
    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    /// With header (name is lowercased)
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// With session identifier
    #[inline]
    #[must_use]
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session_id = Some(session.into());
        self
    }

    /// Header lookup (case-insensitive)
    #[inline]
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// User-Agent header
    #[inline]
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.header("user-agent")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let info = ClientInfo::new().with_header("User-Agent", "curl/8.0");
        assert_eq!(info.header("user-agent"), Some("curl/8.0"));
        assert_eq!(info.user_agent(), Some("curl/8.0"));
    }
}
