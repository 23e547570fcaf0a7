// region:    --- Imports
use crate::live_sync::{ChangeEvent, ChangeFilter, LiveSync};
use futures::StreamExt;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

// endregion: --- Imports

// region:    --- Kafka Producer
#[derive(Clone)]
pub struct KafkaProducer {
    producer: Arc<FutureProducer>,
}

impl KafkaProducer {
    pub fn new(brokers: &str) -> Result<Self, KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(KafkaProducer {
            producer: Arc::new(producer),
        })
    }

    pub async fn send_message(&self, topic: &str, key: &str, value: &str) -> Result<(), String> {
        debug!(
            "{:<12} --> send topic={}, key={}",
            "Producer", topic, key
        );
        let record = FutureRecord::to(topic).key(key).payload(value);

        self.producer
            .send(record, Duration::from_secs(0))
            .await
            .map_err(|(e, _)| format!("Error sending message: {:?}", e))?;

        Ok(())
    }
}

// endregion: --- Kafka Producer

// region:    --- Kafka Manager
pub struct KafkaManager {
    producer: Arc<KafkaProducer>,
    brokers: String,
}

impl KafkaManager {
    pub fn new(brokers: &str) -> Result<Self, KafkaError> {
        let producer = Arc::new(KafkaProducer::new(brokers)?);
        Ok(KafkaManager {
            producer,
            brokers: brokers.to_string(),
        })
    }

    pub fn get_producer(&self) -> Arc<KafkaProducer> {
        Arc::clone(&self.producer)
    }

    /// Creates the topic; an already existing topic is reported by the broker
    /// per topic and is not an error here.
    pub async fn create_topic(
        &self,
        topic_name: &str,
        num_partitions: i32,
        replication_factor: i32,
    ) -> Result<(), String> {
        info!("{:<12} --> creating topic {}", "Manager", topic_name);

        let admin_client: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .create()
            .map_err(|e| format!("AdminClient creation failed: {:?}", e))?;

        let new_topic = NewTopic::new(
            topic_name,
            num_partitions,
            TopicReplication::Fixed(replication_factor),
        );

        match admin_client
            .create_topics(&[new_topic], &AdminOptions::new())
            .await
        {
            Ok(results) => {
                for result in results {
                    match result {
                        Ok(topic) => info!("{:<12} --> topic {} ready", "Manager", topic),
                        Err((topic, code)) => {
                            debug!("{:<12} --> topic {}: {:?}", "Manager", topic, code)
                        }
                    }
                }
                Ok(())
            }
            Err(e) => {
                error!("{:<12} --> topic creation failed: {:?}", "Manager", e);
                Err(format!("topic creation failed: {:?}", e))
            }
        }
    }
}

// endregion: --- Kafka Manager

// region:    --- Kafka Relay

/// Forwards every LiveSync change to a Kafka topic, keyed by entity id.
pub struct KafkaRelay {
    producer: Arc<KafkaProducer>,
    topic: String,
}

impl KafkaRelay {
    pub fn new(producer: Arc<KafkaProducer>, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }

    pub fn spawn(self, live_sync: &dyn LiveSync) -> JoinHandle<()> {
        let mut changes = live_sync.subscribe(ChangeFilter::all());
        tokio::spawn(async move {
            info!("{:<12} --> relaying changes to {}", "Relay", self.topic);
            while let Some(event) = changes.next().await {
                if let Err(e) = self.forward(&event).await {
                    error!(
                        "{:<12} --> {:?} {} not relayed: {}",
                        "Relay", event.entity_type, event.entity_id, e
                    );
                }
            }
        })
    }

    async fn forward(&self, event: &ChangeEvent) -> Result<(), String> {
        let value = serde_json::to_string(event).map_err(|e| e.to_string())?;
        self.producer
            .send_message(&self.topic, &event.entity_id, &value)
            .await
    }
}

// endregion: --- Kafka Relay
