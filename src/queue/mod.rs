//! Reliable queue between the bookmark write path and the index worker.
//!
//! Producers push `[op, bookmark_id]` JSON messages onto the incoming list.
//! The worker atomically moves each message onto the processing list before
//! handling it and removes it only once handled, so work in flight survives a
//! crash.

mod broker;
mod worker;

pub use broker::{open_broker, Broker, MemoryBroker, SqliteBroker};
pub use worker::{IndexWorker, WorkOutcome};

use crate::config::QueueConfig;
use crate::error::{Result, TagmarkError};
use std::fmt;
use std::sync::Arc;

/// Default name of the incoming list
pub const QUEUE_INDEX: &str = "index_in";
/// Default name of the processing list
pub const QUEUE_WORK: &str = "index_work";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexOp {
    Index = 0,
    Update = 1,
    Delete = 2,
}

impl IndexOp {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(IndexOp::Index),
            1 => Some(IndexOp::Update),
            2 => Some(IndexOp::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for IndexOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexOp::Index => write!(f, "index"),
            IndexOp::Update => write!(f, "update"),
            IndexOp::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueMessage {
    pub op: IndexOp,
    pub bookmark_id: i64,
}

/// A payload read back from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Message(QueueMessage),
    /// Well formed but with an operation code nobody handles
    UnknownOp { code: i64, bookmark_id: i64 },
}

impl QueueMessage {
    pub fn new(op: IndexOp, bookmark_id: i64) -> Self {
        Self { op, bookmark_id }
    }

    pub fn encode(&self) -> String {
        serde_json::json!([self.op.code(), self.bookmark_id]).to_string()
    }

    pub fn decode(payload: &str) -> Result<Decoded> {
        let (code, bookmark_id): (i64, i64) = serde_json::from_str(payload)?;
        Ok(match IndexOp::from_code(code) {
            Some(op) => Decoded::Message(QueueMessage { op, bookmark_id }),
            None => Decoded::UnknownOp { code, bookmark_id },
        })
    }
}

/// Producer side of the index queue plus list maintenance
#[derive(Clone)]
pub struct IndexQueue {
    broker: Arc<dyn Broker>,
    incoming: String,
    processing: String,
}

impl IndexQueue {
    pub fn new(broker: Arc<dyn Broker>, incoming: impl Into<String>, processing: impl Into<String>) -> Self {
        Self {
            broker,
            incoming: incoming.into(),
            processing: processing.into(),
        }
    }

    /// Queue on the broker described by `config`
    pub fn from_config(config: &QueueConfig) -> Result<Self> {
        if config.incoming == config.processing {
            return Err(TagmarkError::Config(
                "incoming and processing queues must differ".into(),
            ));
        }
        Ok(Self::new(
            open_broker(config)?,
            config.incoming.clone(),
            config.processing.clone(),
        ))
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn incoming(&self) -> &str {
        &self.incoming
    }

    pub fn processing(&self) -> &str {
        &self.processing
    }

    pub fn push(&self, op: IndexOp, bookmark_id: i64) -> Result<()> {
        let message = QueueMessage::new(op, bookmark_id);
        self.broker.push(&self.incoming, &message.encode())?;
        log::debug!("Queued {} of bookmark {}", op, bookmark_id);
        Ok(())
    }

    pub fn push_index(&self, bookmark_id: i64) -> Result<()> {
        self.push(IndexOp::Index, bookmark_id)
    }

    pub fn push_update(&self, bookmark_id: i64) -> Result<()> {
        self.push(IndexOp::Update, bookmark_id)
    }

    pub fn push_delete(&self, bookmark_id: i64) -> Result<()> {
        self.push(IndexOp::Delete, bookmark_id)
    }

    /// Messages waiting to be picked up
    pub fn pending(&self) -> Result<usize> {
        self.broker.len(&self.incoming)
    }

    /// Messages picked up but not yet handled
    pub fn in_flight(&self) -> Result<usize> {
        self.broker.len(&self.processing)
    }

    /// Move everything left on the processing list back to the incoming one,
    /// e.g. after a worker crash. Returns the number of messages moved.
    pub fn requeue_in_flight(&self) -> Result<usize> {
        let mut moved = 0;
        while self
            .broker
            .move_next(&self.processing, &self.incoming, std::time::Duration::ZERO)?
            .is_some()
        {
            moved += 1;
        }
        if moved > 0 {
            log::info!("Requeued {} in-flight messages", moved);
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn memory_queue() -> IndexQueue {
        IndexQueue::new(Arc::new(MemoryBroker::new()), QUEUE_INDEX, QUEUE_WORK)
    }

    #[rstest]
    #[case(IndexOp::Index, 5, "[0,5]")]
    #[case(IndexOp::Update, 12, "[1,12]")]
    #[case(IndexOp::Delete, 7, "[2,7]")]
    fn test_encode(#[case] op: IndexOp, #[case] id: i64, #[case] expected: &str) {
        let message = QueueMessage::new(op, id);
        assert_eq!(message.encode(), expected);
        assert_eq!(
            QueueMessage::decode(expected).unwrap(),
            Decoded::Message(message)
        );
    }

    #[test]
    fn test_decode_unknown_op() {
        assert_eq!(
            QueueMessage::decode("[9, 3]").unwrap(),
            Decoded::UnknownOp {
                code: 9,
                bookmark_id: 3
            }
        );
    }

    #[rstest]
    #[case("")]
    #[case("garbage")]
    #[case("[0]")]
    #[case("[\"index\", 1]")]
    #[case("{\"op\": 0, \"id\": 1}")]
    fn test_decode_malformed(#[case] payload: &str) {
        assert!(matches!(
            QueueMessage::decode(payload),
            Err(TagmarkError::Json(_))
        ));
    }

    #[test]
    fn test_push_and_requeue() {
        let queue = memory_queue();
        queue.push_index(1).unwrap();
        queue.push_update(1).unwrap();
        queue.push_delete(2).unwrap();
        assert_eq!(queue.pending().unwrap(), 3);

        let broker = queue.broker();
        let first = broker
            .move_next(QUEUE_INDEX, QUEUE_WORK, std::time::Duration::ZERO)
            .unwrap();
        assert_eq!(first.as_deref(), Some("[0,1]"));
        assert_eq!(queue.in_flight().unwrap(), 1);

        assert_eq!(queue.requeue_in_flight().unwrap(), 1);
        assert_eq!(queue.in_flight().unwrap(), 0);
        assert_eq!(queue.pending().unwrap(), 3);
    }

    #[test]
    fn test_from_config_rejects_same_lists() {
        let config = QueueConfig {
            broker: crate::config::BrokerKind::Memory,
            incoming: "same".into(),
            processing: "same".into(),
            ..Default::default()
        };
        assert!(matches!(
            IndexQueue::from_config(&config),
            Err(TagmarkError::Config(_))
        ));
    }
}
