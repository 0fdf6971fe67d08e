//! In-process message bus.
//!
//! Topics are lazily created bounded ring logs; readers resume from a cursor
//! and long-poll for new traffic. Readers never observe partial state: a send
//! appends under the store lock, then wakes every registered waiter, and a
//! waiter always re-reads the store after waking.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::futures::Notified;
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{BusError, MessageBus, MessageResult, Result};
use crate::config::LocalBusConfig;
use crate::cursor::{format_cursors, parse_cursors, Cursor};
use crate::message::Message;
use crate::store::TopicStore;

struct Topic {
    store: TopicStore,
    notify: Notify,
}

/// In-process bus with per-topic bounded logs and long-poll retrieval.
pub struct LocalBus {
    config: LocalBusConfig,
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    /// Woken when a topic is created, so waiters on not-yet-existing topics
    /// pick it up.
    created: Notify,
}

impl LocalBus {
    pub fn new(config: LocalBusConfig) -> Self {
        Self {
            config,
            topics: RwLock::new(HashMap::new()),
            created: Notify::new(),
        }
    }

    async fn topic(&self, source: &str) -> Arc<Topic> {
        if let Some(topic) = self.topics.read().await.get(source) {
            return topic.clone();
        }
        let mut topics = self.topics.write().await;
        if let Some(topic) = topics.get(source) {
            return topic.clone();
        }
        let topic = Arc::new(Topic {
            store: TopicStore::new(source, self.config.topic_capacity),
            notify: Notify::new(),
        });
        topics.insert(source.to_string(), topic.clone());
        drop(topics);
        debug!(topic = source, "Created topic");
        self.created.notify_waiters();
        topic
    }

    async fn lookup(&self, sources: &[String]) -> Vec<Option<Arc<Topic>>> {
        let topics = self.topics.read().await;
        sources.iter().map(|s| topics.get(s).cloned()).collect()
    }

    /// Number of live topics.
    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }

    /// Drop topics that have not been written to within `ttl`. Returns how
    /// many were removed. Waiters on a purged topic keep waiting; a later
    /// send recreates the topic and wakes them.
    pub async fn purge_idle(&self, ttl: Duration) -> usize {
        let mut topics = self.topics.write().await;
        let before = topics.len();
        topics.retain(|_, topic| topic.store.idle_for() < ttl);
        let removed = before - topics.len();
        if removed > 0 {
            debug!(removed, "Purged idle topics");
        }
        removed
    }

    /// Messages on `topic` newer than `position`. `None` means everything
    /// retained. A position past the newest id is stale (the caller's state
    /// predates this log) and also yields everything retained.
    fn newer_than(topic: &Topic, position: Option<u64>) -> Vec<Arc<Message>> {
        match position {
            None => topic.store.all(),
            Some(last) => match topic.store.last_id() {
                Some(max) if last > max => topic.store.all(),
                _ => topic.store.since(last),
            },
        }
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn send(&self, source: &str, key: &str, value: Bytes) -> Result<u64> {
        let topic = self.topic(source).await;
        let id = topic.store.save(key, value);
        topic.notify.notify_waiters();
        Ok(id)
    }

    async fn get_messages(
        &self,
        topics: &[String],
        cursor: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<MessageResult> {
        if topics.is_empty() {
            return Ok(MessageResult {
                cursor: cursor.to_string(),
                ..Default::default()
            });
        }
        if cancel.is_cancelled() {
            return Err(BusError::Cancelled);
        }

        let deadline = Instant::now() + timeout;
        let cursors = parse_cursors(cursor);

        // Effective position per requested topic. A cursor whose key names a
        // requested topic binds to that topic; the rest align positionally,
        // except that a cursor keyed to a different requested topic is never
        // reused positionally. `None` reads the full retained backlog. Topics
        // with no cursor at all start from their current tail.
        let mut positions: Vec<Option<u64>> = Vec::with_capacity(topics.len());
        {
            let known = self.lookup(topics).await;
            for (i, (name, topic)) in topics.iter().zip(known.iter()).enumerate() {
                let matched = cursors
                    .iter()
                    .find(|c| c.key == *name)
                    .or_else(|| {
                        cursors
                            .get(i)
                            .filter(|c| !topics.iter().any(|t| *t == c.key))
                    });
                let position = match matched {
                    Some(c) => c.id.parse::<u64>().ok(),
                    None => topic.as_ref().and_then(|t| t.store.last_id()),
                };
                positions.push(position);
            }
        }

        loop {
            // Arm all waiters before reading the stores, so a send landing
            // between the read and the await still wakes us.
            let created = self.created.notified();
            tokio::pin!(created);
            created.as_mut().enable();

            let known = self.lookup(topics).await;
            let mut waiters: Vec<Pin<Box<Notified<'_>>>> = Vec::new();
            for topic in known.iter().flatten() {
                let mut notified = Box::pin(topic.notify.notified());
                notified.as_mut().enable();
                waiters.push(notified);
            }

            let mut messages: Vec<Arc<Message>> = Vec::new();
            for (i, topic) in known.iter().enumerate() {
                if let Some(topic) = topic {
                    let fresh = Self::newer_than(topic, positions[i]);
                    if let Some(last) = fresh.last() {
                        positions[i] = Some(last.id);
                    }
                    messages.extend(fresh);
                }
            }

            if !messages.is_empty() {
                return Ok(MessageResult {
                    messages,
                    cursor: encode_positions(topics, &positions),
                    timed_out: false,
                });
            }

            // select_all rejects an empty set; with no live topics the
            // creation signal alone drives the wakeup.
            let topic_wake = async {
                if waiters.is_empty() {
                    futures::future::pending::<()>().await;
                } else {
                    futures::future::select_all(waiters).await;
                }
            };

            tokio::select! {
                _ = topic_wake => {}
                _ = created.as_mut() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return Ok(MessageResult {
                        messages: Vec::new(),
                        cursor: encode_positions(topics, &positions),
                        timed_out: true,
                    });
                }
                _ = cancel.cancelled() => return Err(BusError::Cancelled),
            }
        }
    }
}

fn encode_positions(topics: &[String], positions: &[Option<u64>]) -> String {
    let cursors: Vec<Cursor> = topics
        .iter()
        .zip(positions)
        .map(|(topic, position)| {
            Cursor::new(
                position.map(|id| id.to_string()).unwrap_or_default(),
                topic.clone(),
            )
        })
        .collect();
    format_cursors(&cursors)
}
