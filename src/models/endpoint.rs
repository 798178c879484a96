use serde::{Deserialize, Serialize};
use std::fmt;

/// A remote TCP destination, identified by host literal and port.
///
/// `host` is never resolved locally once it leaves the CLI/config layer — the
/// SSH transport forwards it verbatim to the remote server so DNS stays on
/// the far side of the tunnel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        let ep = Endpoint::new("example.com", 443);
        assert_eq!(ep.to_string(), "example.com:443");
    }

    #[test]
    fn test_endpoint_serialization() {
        let ep = Endpoint::new("10.0.0.1", 22);
        let json = serde_json::to_string(&ep).unwrap();
        assert_eq!(json, r#"{"host":"10.0.0.1","port":22}"#);

        let back: Endpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ep);
    }
}
