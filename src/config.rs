use std::time::Duration;

use crate::error::{KpipeError, Result};

pub const DEFAULT_BROKERS: &str = "localhost:9092";
pub const DEFAULT_CLIENT_ID: &str = "kpipe";

/// Connection settings shared by every Kafka command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub brokers: Vec<String>,
    pub client_id: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            brokers: vec![DEFAULT_BROKERS.to_string()],
            client_id: DEFAULT_CLIENT_ID.to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Parse a comma separated `host:port` list.
    pub fn from_broker_list(list: &str) -> Result<Self> {
        let brokers = list
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(|broker| {
                let (host, port) = broker.rsplit_once(':').ok_or_else(|| {
                    KpipeError::Config(format!("broker '{broker}' is not host:port"))
                })?;
                if host.is_empty() || port.parse::<u16>().is_err() {
                    return Err(KpipeError::Config(format!(
                        "broker '{broker}' is not host:port"
                    )));
                }
                Ok(broker.to_string())
            })
            .collect::<Result<Vec<_>>>()?;

        if brokers.is_empty() {
            return Err(KpipeError::Config("no brokers given".to_string()));
        }

        Ok(Self {
            brokers,
            ..Default::default()
        })
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }
}
