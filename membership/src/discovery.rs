use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(thiserror::Error, Debug)]
pub enum DiscoveryError {
    #[error("discovery request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("discovery returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("discovery unavailable: {0}")]
    Unavailable(String),
}

/// Source of the addresses of every running collector process, including this one.
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    async fn get_servers(&self) -> Result<Vec<String>, DiscoveryError>;
}

/// Fixed server list, typically from config.
pub struct StaticDiscovery {
    servers: Vec<String>,
}

impl StaticDiscovery {
    pub fn new(servers: Vec<String>) -> Self {
        StaticDiscovery { servers }
    }
}

#[async_trait]
impl ServiceDiscovery for StaticDiscovery {
    async fn get_servers(&self) -> Result<Vec<String>, DiscoveryError> {
        Ok(self.servers.clone())
    }
}

#[derive(Deserialize)]
struct ServersResponse {
    servers: Vec<String>,
}

/// Polls an HTTP endpoint that answers `{"servers": ["http://host:port", ...]}`.
pub struct HttpDiscovery {
    client: reqwest::Client,
    url: String,
}

impl HttpDiscovery {
    pub fn new(url: String) -> Self {
        HttpDiscovery {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl ServiceDiscovery for HttpDiscovery {
    async fn get_servers(&self) -> Result<Vec<String>, DiscoveryError> {
        let response = self
            .client
            .get(&self.url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DiscoveryError::Status(response.status()));
        }

        let body = response.json::<ServersResponse>().await?;
        Ok(body.servers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn static_returns_configured_list() {
        let discovery = StaticDiscovery::new(vec!["http://10.0.0.1:1".into()]);
        assert_eq!(
            discovery.get_servers().await.unwrap(),
            vec!["http://10.0.0.1:1".to_string()]
        );
    }

    #[tokio::test]
    async fn http_discovery_parses_servers() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/servers"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"servers": ["http://10.0.0.1:12140", "http://10.0.0.2:12140"]}"#,
            ))
            .mount(&mock_server)
            .await;

        let discovery = HttpDiscovery::new(format!("{}/servers", mock_server.uri()));
        let servers = discovery.get_servers().await.unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[1], "http://10.0.0.2:12140");
    }

    #[tokio::test]
    async fn http_discovery_surfaces_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let discovery = HttpDiscovery::new(mock_server.uri());
        let err = discovery.get_servers().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Status(s) if s.as_u16() == 503));
    }
}
