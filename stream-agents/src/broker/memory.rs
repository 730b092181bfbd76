use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use common_kafka::config::OffsetReset;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::debug;

use crate::broker::{Broker, Received, Record, Subscription, TopicSpec};
use crate::error::BrokerError;

/// A single-partition, in-process broker. Topics are append-only logs kept
/// for the lifetime of the broker. Members of one consumer group share a
/// read position, so each record goes to exactly one of them, and the group
/// resumes from its committed cursor once every member has left.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    topics: Arc<Mutex<HashMap<String, Arc<TopicLog>>>>,
    offset_reset: OffsetReset,
}

struct StoredRecord {
    key: Option<Bytes>,
    payload: Bytes,
    timestamp_ms: i64,
}

#[derive(Default)]
struct GroupState {
    // Next offset handed out to any member
    claimed: i64,
    committed: Option<i64>,
    members: usize,
}

struct TopicLog {
    name: String,
    records: RwLock<Vec<Arc<StoredRecord>>>,
    // Carries the log length, subscribers wait on it
    appended: watch::Sender<usize>,
    groups: Mutex<HashMap<String, GroupState>>,
}

impl TopicLog {
    fn new(name: &str) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            name: name.to_owned(),
            records: RwLock::new(Vec::new()),
            appended,
            groups: Mutex::new(HashMap::new()),
        }
    }

    fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn get(&self, offset: i64) -> Option<Arc<StoredRecord>> {
        let index = usize::try_from(offset).ok()?;
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }

    fn append(&self, record: Record) -> i64 {
        let stored = Arc::new(StoredRecord {
            key: record.key,
            payload: record.payload,
            timestamp_ms: now_ms(),
        });
        let len = {
            let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
            records.push(stored);
            records.len()
        };
        self.appended.send_replace(len);
        len as i64 - 1
    }

    /// The first member of a group starts at the committed cursor, or where
    /// the reset policy says when nothing was committed yet.
    fn join(&self, group: &str, offset_reset: OffsetReset) {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        let state = groups.entry(group.to_owned()).or_default();
        if state.members == 0 {
            state.claimed = match (state.committed, offset_reset) {
                (Some(committed), _) => committed,
                (None, OffsetReset::Earliest) => 0,
                (None, OffsetReset::Latest) => self.len() as i64,
            };
        }
        state.members += 1;
    }

    fn leave(&self, group: &str) {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = groups.get_mut(group) {
            state.members = state.members.saturating_sub(1);
        }
    }

    /// Hands the next unclaimed record of the group to the caller.
    fn claim(&self, group: &str) -> Option<(i64, Arc<StoredRecord>)> {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        let state = groups.get_mut(group)?;
        let record = self.get(state.claimed)?;
        let offset = state.claimed;
        state.claimed += 1;
        Some((offset, record))
    }

    fn committed(&self, group: &str) -> Option<i64> {
        self.groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(group)
            .and_then(|state| state.committed)
    }

    /// Cursors only move forward.
    fn commit(&self, group: &str, next: i64) {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        let state = groups.entry(group.to_owned()).or_default();
        state.committed = Some(state.committed.map_or(next, |c| c.max(next)));
    }
}

fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

impl MemoryBroker {
    pub fn new(offset_reset: OffsetReset) -> Self {
        Self {
            topics: Default::default(),
            offset_reset,
        }
    }

    fn log(&self, topic: &str) -> Option<Arc<TopicLog>> {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .cloned()
    }

    fn log_or_create(&self, topic: &str) -> Arc<TopicLog> {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_owned())
            .or_insert_with(|| {
                debug!(topic, "created in-memory topic");
                Arc::new(TopicLog::new(topic))
            })
            .clone()
    }

    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Number of records appended to the topic so far.
    pub fn record_count(&self, topic: &str) -> usize {
        self.log(topic).map(|l| l.len()).unwrap_or_default()
    }

    /// Offset of the next record `group` will read from `topic`, if it ever
    /// committed one.
    pub fn committed(&self, topic: &str, group: &str) -> Option<i64> {
        self.log(topic)?.committed(group)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn ensure_topic(&self, topic: &TopicSpec) -> Result<(), BrokerError> {
        self.log_or_create(&topic.name);
        Ok(())
    }

    async fn publish(&self, topic: &str, record: Record) -> Result<(), BrokerError> {
        let log = self
            .log(topic)
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_owned()))?;
        let offset = log.append(record);
        debug!(topic, offset, "appended to in-memory topic");
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        let log = self.log_or_create(topic);

        // Subscribe to appends before joining so none is missed
        let appended = log.appended.subscribe();
        log.join(group, self.offset_reset);

        Ok(Box::new(MemorySubscription {
            log,
            group: group.to_owned(),
            last: None,
            appended,
        }))
    }
}

struct MemorySubscription {
    log: Arc<TopicLog>,
    group: String,
    last: Option<i64>,
    appended: watch::Receiver<usize>,
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.log.leave(&self.group);
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn recv(&mut self) -> Result<Received, BrokerError> {
        loop {
            if let Some((offset, record)) = self.log.claim(&self.group) {
                self.last = Some(offset);
                return Ok(Received {
                    topic: self.log.name.clone(),
                    partition: 0,
                    offset,
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                    timestamp_ms: Some(record.timestamp_ms),
                });
            }
            // The sender lives in the log we hold, so this cannot fail
            if self.appended.changed().await.is_err() {
                return Err(BrokerError::UnknownTopic(self.log.name.clone()));
            }
        }
    }

    fn commit(&mut self) -> Result<(), BrokerError> {
        let offset = self.last.take().ok_or(BrokerError::NothingToCommit)?;
        self.log.commit(&self.group, offset + 1);
        Ok(())
    }
}
