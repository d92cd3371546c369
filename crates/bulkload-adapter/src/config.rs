use std::env;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Connection settings for the Flight endpoint of the target system.
#[derive(Clone, Debug)]
pub struct FlightConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub connect_timeout: Duration,
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8491,
            user: "neo4j".to_string(),
            password: env::var("NEO4J_PASSWORD").unwrap_or_default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl FlightConfig {
    pub fn uri(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Value of the `authorization` header sent on every call.
    pub fn basic_auth(&self) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", self.user, self.password))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_uri_and_auth_header() {
        let cfg = FlightConfig {
            host: "graph.internal".into(),
            port: 8491,
            user: "neo4j".into(),
            password: "secret".into(),
            connect_timeout: Duration::from_secs(1),
        };
        assert_eq!(cfg.uri(), "http://graph.internal:8491");
        assert_eq!(cfg.basic_auth(), "Basic bmVvNGo6c2VjcmV0");
    }
}
