//! Kafka-backed broker. Manual offset commits, one consumer group.

use std::time::Duration;

use async_trait::async_trait;
use eventid_common::{Config, EventEnvelope, EventIdError};
use eventid_engine::EventPublisher;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use tracing::info;

use crate::broker::{Delivery, MessageSource};

const PRODUCE_TIMEOUT: Duration = Duration::from_secs(10);

fn transient(e: KafkaError) -> EventIdError {
    EventIdError::TransientStorage(format!("kafka: {e}"))
}

pub struct KafkaBroker {
    topic: String,
    consumer: StreamConsumer,
    producer: FutureProducer,
}

impl KafkaBroker {
    pub fn connect(config: &Config) -> Result<Self, EventIdError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_brokers)
            .set("group.id", &config.kafka_group_id)
            .set("auto.offset.reset", &config.kafka_auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| EventIdError::Config(format!("kafka consumer: {e}")))?;

        consumer
            .subscribe(&[config.kafka_topic.as_str()])
            .map_err(|e| EventIdError::Config(format!("kafka subscribe: {e}")))?;

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_brokers)
            .set("message.timeout.ms", "10000")
            .create()
            .map_err(|e| EventIdError::Config(format!("kafka producer: {e}")))?;

        info!(
            brokers = config.kafka_brokers.as_str(),
            topic = config.kafka_topic.as_str(),
            group_id = config.kafka_group_id.as_str(),
            "Kafka consumer subscribed"
        );

        Ok(Self {
            topic: config.kafka_topic.clone(),
            consumer,
            producer,
        })
    }
}

#[async_trait]
impl MessageSource for KafkaBroker {
    async fn next(&self) -> Result<Option<Delivery>, EventIdError> {
        let message = self.consumer.recv().await.map_err(transient)?;
        Ok(Some(Delivery {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message.payload().unwrap_or_default().to_vec(),
        }))
    }

    async fn commit(&self, delivery: &Delivery) -> Result<(), EventIdError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &delivery.topic,
                delivery.partition,
                Offset::Offset(delivery.offset + 1),
            )
            .map_err(transient)?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(transient)
    }
}

#[async_trait]
impl EventPublisher for KafkaBroker {
    async fn publish(&self, event: &EventEnvelope) -> Result<(), EventIdError> {
        let payload = event.encode()?;
        let record = FutureRecord::to(&self.topic)
            .key(event.partition_key())
            .payload(&payload);
        self.producer
            .send(record, PRODUCE_TIMEOUT)
            .await
            .map(|_| ())
            .map_err(|(e, _)| transient(e))
    }
}
