use super::{Subscriber, Subscription, TransportError};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const REQUEST_CHANNEL_CAPACITY: usize = 64;

fn default_port() -> u16 {
    1883
}

fn default_client_id_prefix() -> String {
    "cmdb-collector".into()
}

fn default_keep_alive_secs() -> u64 {
    15
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

/// Broker-backed subscriber. Each subscription opens its own connection so a
/// failed stream can be torn down and replaced independently.
pub struct MqttSubscriber {
    config: MqttConfig,
    connections: AtomicU64,
}

impl MqttSubscriber {
    pub fn new(config: MqttConfig) -> Self {
        MqttSubscriber {
            config,
            connections: AtomicU64::new(0),
        }
    }

    fn options(&self) -> MqttOptions {
        let n = self.connections.fetch_add(1, Ordering::Relaxed);
        let client_id = format!("{}-{}-{n}", self.config.client_id_prefix, std::process::id());
        let mut opts = MqttOptions::new(client_id, self.config.host.clone(), self.config.port);
        opts.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));
        opts
    }
}

#[async_trait]
impl Subscriber for MqttSubscriber {
    async fn subscribe(&self, topics: &[String]) -> Result<Box<dyn Subscription>, TransportError> {
        let (client, eventloop) = AsyncClient::new(self.options(), REQUEST_CHANNEL_CAPACITY);
        for topic in topics {
            client
                .subscribe(topic.as_str(), QoS::AtMostOnce)
                .await
                .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        }

        Ok(Box::new(MqttSubscription {
            client,
            eventloop,
            topics: topics.to_vec(),
        }))
    }
}

struct MqttSubscription {
    client: AsyncClient,
    eventloop: EventLoop,
    topics: Vec<String>,
}

#[async_trait]
impl Subscription for MqttSubscription {
    async fn receive(&mut self) -> Result<String, TransportError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    return Ok(String::from_utf8_lossy(&publish.payload).into_owned());
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => {
                    return Err(TransportError::Connection("broker sent disconnect".into()));
                }
                Ok(_) => {}
                Err(e) => return Err(TransportError::Connection(e.to_string())),
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        for topic in &self.topics {
            self.client
                .unsubscribe(topic.as_str())
                .await
                .map_err(|e| TransportError::Connection(e.to_string()))?;
        }
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!(error = %e, "mqtt disconnect failed");
        }
    }
}
