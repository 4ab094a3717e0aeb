use url::Url;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum MembershipError {
    #[error("invalid node address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
}

/// A collector process on the ring. Identity is `hash_value`, the `host:port`
/// form of the discovered address.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Node {
    pub hash_value: String,
    pub address: String,
}

impl Node {
    pub fn from_address(address: &str) -> Result<Self, MembershipError> {
        let invalid = |reason: String| MembershipError::InvalidAddress {
            address: address.to_string(),
            reason,
        };

        let trimmed = address.trim();
        // Discovery may hand out bare host:port pairs.
        let url = if trimmed.contains("://") {
            Url::parse(trimmed)
        } else {
            Url::parse(&format!("http://{trimmed}"))
        }
        .map_err(|e| invalid(e.to_string()))?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host".into()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port".into()))?;

        Ok(Node {
            hash_value: format!("{host}:{port}"),
            address: address.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_value_from_url() {
        let node = Node::from_address("http://10.0.0.1:12140").unwrap();
        assert_eq!(node.hash_value, "10.0.0.1:12140");
        assert_eq!(node.address, "http://10.0.0.1:12140");
    }

    #[test]
    fn hash_value_uses_scheme_default_port() {
        assert_eq!(
            Node::from_address("https://collector.internal").unwrap().hash_value,
            "collector.internal:443"
        );
        assert_eq!(
            Node::from_address("http://collector.internal/").unwrap().hash_value,
            "collector.internal:80"
        );
    }

    #[test]
    fn bare_host_port() {
        assert_eq!(
            Node::from_address("10.0.0.2:8080").unwrap().hash_value,
            "10.0.0.2:8080"
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(Node::from_address("http://").is_err());
        assert!(Node::from_address("http://[::1").is_err());
    }
}
