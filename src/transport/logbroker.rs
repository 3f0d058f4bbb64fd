//! Log-broker (Kafka-style) transport: topic-partitioned, consumer-group
//! based, offset-committed (`spec.md` §4.6).
//!
//! `rdkafka` is not used by any repo in the retrieved pack; it is picked
//! deliberately as the idiomatic async Kafka client for Tokio (see
//! `DESIGN.md`). Everything else here — grouping tasks by pool identity into
//! one consumer activity per group, polling one record at a time, committing
//! a decoded-and-dispatched or poison record and only skipping the commit
//! (and exiting the loop) when the pool itself has closed — mirrors
//! `examples/original_source/oxalis/kafka.py` (`_start_consumer`,
//! `_run_worker`) one for one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message as _;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::RuntimeSettings;
use crate::core::{
    ConcurrencyPool, JsonCodec, Registry, RegistryError, ResolveError, TaskBody, TaskCodec,
    TaskDescriptor,
};
use crate::runtime::{PoolRegistry, WorkerApp, WorkerState};

/// Per-task log-broker policy: just the topic it produces/consumes on.
/// Unlike AMQP there is no ack/reject table — success or failure both leave
/// the message "handled" once it reaches the pool (`spec.md` §7).
#[derive(Debug, Clone)]
pub struct LogBrokerPolicy {
    pub topic: String,
    /// Distinguishes one pool from another when grouping tasks into
    /// consumer activities; two tasks with the same `pool_id` share one
    /// consumer subscribing to the union of their topics.
    pub pool_id: u64,
    pub auto_commit: bool,
}

/// The log-broker transport driver.
pub struct LogBrokerDriver {
    bootstrap_servers: String,
    group_id: String,
    poll_timeout: Duration,
    topics: std::collections::HashSet<String>,
    producer: FutureProducer,
    codec: Arc<dyn TaskCodec>,
}

impl LogBrokerDriver {
    /// Start the producer and seed the topic set with `default_topic` plus
    /// every topic declared at registration (`spec.md` §4.6 "Topology").
    pub fn connect(
        bootstrap_servers: &str,
        group_id: &str,
        poll_timeout: Duration,
        default_topic: &str,
        declared_topics: impl IntoIterator<Item = String>,
    ) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("message.timeout.ms", poll_timeout.as_millis().to_string())
            .create()?;

        let mut topics: std::collections::HashSet<String> = declared_topics.into_iter().collect();
        topics.insert(default_topic.to_string());

        Ok(Self {
            bootstrap_servers: bootstrap_servers.to_string(),
            group_id: group_id.to_string(),
            poll_timeout,
            topics,
            producer,
            codec: Arc::new(JsonCodec),
        })
    }

    /// Every topic this runtime knows about.
    pub fn topics(&self) -> &std::collections::HashSet<String> {
        &self.topics
    }

    /// Publish a task invocation to `topic` (`spec.md` §4.6 "Publish").
    pub async fn send_task(
        &self,
        topic: &str,
        name: &str,
        args: &[Value],
        kwargs: &serde_json::Map<String, Value>,
    ) -> Result<(), String> {
        let payload = self
            .codec
            .encode(name, args, kwargs)
            .map_err(|e| e.to_string())?;
        self.producer
            .send(
                FutureRecord::<(), _>::to(topic).payload(&payload),
                Duration::from_secs(0),
            )
            .await
            .map_err(|(error, _)| error.to_string())?;
        Ok(())
    }

    /// Group `registry`'s tasks by pool identity and start one consumer
    /// activity per group, each subscribed to the union of that group's
    /// topics (`spec.md` §4.6 "Consume"; mirrors `kafka.py::_run_worker`).
    pub fn start_consumers(
        &self,
        registry: Arc<Registry<LogBrokerPolicy>>,
        pool_by_id: HashMap<u64, Arc<ConcurrencyPool>>,
        consuming_count: Arc<AtomicUsize>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Result<(), rdkafka::error::KafkaError> {
        let mut topics_by_pool: HashMap<u64, std::collections::HashSet<String>> = HashMap::new();
        for descriptor in registry.iter() {
            topics_by_pool
                .entry(descriptor.policy.pool_id)
                .or_default()
                .insert(descriptor.policy.topic.clone());
        }

        for (pool_id, topics) in topics_by_pool {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &self.bootstrap_servers)
                .set("group.id", &self.group_id)
                .set("enable.auto.commit", "false")
                .create()?;
            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer.subscribe(&topic_refs)?;

            let registry = Arc::clone(&registry);
            let pool = pool_by_id
                .get(&pool_id)
                .cloned()
                .expect("every grouped pool_id has a matching pool");
            let codec = Arc::clone(&self.codec);
            let poll_timeout = self.poll_timeout;
            let consuming_count = Arc::clone(&consuming_count);
            let mut shutdown = shutdown.clone();

            consuming_count.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                        message = tokio::time::timeout(poll_timeout, consumer.recv()) => {
                            let Ok(message) = message else { continue };
                            let Ok(message) = message else { continue };
                            let Some(bytes) = message.payload() else { continue };

                            let disposition = match crate::core::resolve(&registry, codec.as_ref(), bytes) {
                                Err(ResolveError::Decode(msg)) => {
                                    warn!(%msg, "decode error; commit-and-drop");
                                    Disposition::CommitAndDrop
                                }
                                Err(ResolveError::UnknownTask(name)) => {
                                    warn!(task = %name, "unknown task; commit-and-drop");
                                    Disposition::CommitAndDrop
                                }
                                Ok((descriptor, args, kwargs)) => {
                                    dispatch_record(descriptor, args, kwargs, &pool).await
                                }
                            };

                            // Every consumer here is created with enable.auto.commit=false,
                            // so every disposition other than PoolClosed needs an explicit commit.
                            match disposition {
                                Disposition::CommitAndDrop | Disposition::Dispatched => {
                                    if let Err(error) = consumer.commit_message(&message, rdkafka::consumer::CommitMode::Async) {
                                        warn!(%error, "offset commit failed");
                                    }
                                }
                                Disposition::PoolClosed => {
                                    warn!(pool_id, "pool closed; leaving offset uncommitted and stopping consumer");
                                    break;
                                }
                            }
                        }
                    }
                }
                consuming_count.fetch_sub(1, Ordering::SeqCst);
                info!(pool_id, "log-broker consumer activity stopped");
            });
        }
        Ok(())
    }
}

/// Commit disposition for a consumed record (`spec.md` §7): a decoded and
/// dispatched record or a poison message are both committed and dropped; a
/// closed pool leaves the offset uncommitted so the record is redelivered
/// after the consumer loop exits.
enum Disposition {
    Dispatched,
    CommitAndDrop,
    PoolClosed,
}

/// Hand the record to the pool via `wait_spawn`. Commits unless the pool is
/// closed (`spec.md` §4.6, §7: `PoolClosed` skips the commit and exits the
/// consumer loop).
async fn dispatch_record<Policy>(
    descriptor: Arc<TaskDescriptor<Policy>>,
    args: Vec<Value>,
    kwargs: serde_json::Map<String, Value>,
    pool: &ConcurrencyPool,
) -> Disposition
where
    Policy: Send + Sync + 'static,
{
    let timeout = descriptor.timeout;
    match pool
        .wait_spawn(timeout, async move { descriptor.body.call(args, kwargs).await })
        .await
    {
        Ok(()) => Disposition::Dispatched,
        Err(_) => Disposition::PoolClosed,
    }
}

/// Builds a [`LogBrokerApp`] by registering tasks before the worker starts.
/// `pool_id` is derived from each task's pool pointer identity
/// (`examples/original_source/oxalis/kafka.py`'s `id(task.pool)`), so tasks
/// sharing a pool automatically share a consumer activity.
pub struct LogBrokerAppBuilder {
    bootstrap_servers: String,
    settings: RuntimeSettings,
    group_id: String,
    default_topic: String,
    registry: Registry<LogBrokerPolicy>,
    default_pool: Arc<ConcurrencyPool>,
    pools_by_id: HashMap<u64, Arc<ConcurrencyPool>>,
}

impl LogBrokerAppBuilder {
    pub fn new(
        bootstrap_servers: impl Into<String>,
        group_id: impl Into<String>,
        default_topic: impl Into<String>,
        settings: RuntimeSettings,
    ) -> Self {
        let default_pool = Arc::new(ConcurrencyPool::new(settings.concurrency, settings.default_timeout()));
        let mut pools_by_id = HashMap::new();
        pools_by_id.insert(pool_identity(&default_pool), Arc::clone(&default_pool));
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            settings,
            group_id: group_id.into(),
            default_topic: default_topic.into(),
            registry: Registry::new(),
            default_pool,
            pools_by_id,
        }
    }

    pub fn default_pool(&self) -> Arc<ConcurrencyPool> {
        Arc::clone(&self.default_pool)
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        topic: Option<String>,
        timeout: Option<Duration>,
        pool: Option<Arc<ConcurrencyPool>>,
        body: TaskBody,
    ) -> Result<(), RegistryError> {
        let pool = pool.unwrap_or_else(|| Arc::clone(&self.default_pool));
        let pool_id = pool_identity(&pool);
        self.pools_by_id.entry(pool_id).or_insert_with(|| Arc::clone(&pool));
        self.registry.register(TaskDescriptor {
            name: name.into(),
            body,
            timeout,
            pool,
            policy: LogBrokerPolicy {
                topic: topic.unwrap_or_else(|| self.default_topic.clone()),
                pool_id,
                auto_commit: false,
            },
        })
    }

    pub fn build(self, state: Arc<WorkerState>) -> LogBrokerApp {
        LogBrokerApp {
            bootstrap_servers: self.bootstrap_servers,
            settings: self.settings,
            group_id: self.group_id,
            default_topic: self.default_topic,
            registry: Arc::new(self.registry),
            pools_by_id: self.pools_by_id,
            state,
            driver: tokio::sync::OnceCell::new(),
        }
    }
}

fn pool_identity(pool: &Arc<ConcurrencyPool>) -> u64 {
    Arc::as_ptr(pool) as u64
}

/// The producer+worker surface for the log-broker transport.
pub struct LogBrokerApp {
    bootstrap_servers: String,
    settings: RuntimeSettings,
    group_id: String,
    default_topic: String,
    registry: Arc<Registry<LogBrokerPolicy>>,
    pools_by_id: HashMap<u64, Arc<ConcurrencyPool>>,
    state: Arc<WorkerState>,
    driver: tokio::sync::OnceCell<LogBrokerDriver>,
}

impl LogBrokerApp {
    fn driver(&self) -> &LogBrokerDriver {
        self.driver
            .get()
            .expect("connect() must run before send_task/run_worker")
    }

    /// Enqueue a task invocation; inline execution in `test=true` mode
    /// (`spec.md` §4.3 "Test mode").
    pub async fn delay(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: serde_json::Map<String, Value>,
    ) -> Result<(), anyhow::Error> {
        let descriptor = self
            .registry
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("task {name} not registered"))?;

        if self.settings.test {
            descriptor
                .body
                .call(args, kwargs)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            return Ok(());
        }

        self.driver()
            .send_task(&descriptor.policy.topic, name, &args, &kwargs)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl WorkerApp for LogBrokerApp {
    async fn connect(&self) -> Result<(), anyhow::Error> {
        let declared_topics = self.registry.iter().map(|d| d.policy.topic.clone());
        let driver = LogBrokerDriver::connect(
            &self.bootstrap_servers,
            &self.group_id,
            self.settings.default_timeout(),
            &self.default_topic,
            declared_topics,
        )?;
        self.driver
            .set(driver)
            .map_err(|_| anyhow::anyhow!("connect() called twice"))?;
        Ok(())
    }

    async fn run_worker(&self) -> Result<(), anyhow::Error> {
        self.driver().start_consumers(
            Arc::clone(&self.registry),
            self.pools_by_id.clone(),
            self.state.consuming_count(),
            self.state.subscribe_shutdown(),
        )?;
        Ok(())
    }

    async fn stop_intake(&self) {
        // Consumer loops exit on their own `shutdown` watch channel; there is
        // no separate cancel call for log-broker consumers.
    }

    async fn drain_pools(&self) {
        let mut registry = PoolRegistry::new();
        for pool in self.pools_by_id.values() {
            registry.add(Arc::clone(pool));
        }
        registry.wait_close_all().await;
    }

    async fn disconnect(&self) {
        // The producer is dropped with the driver; rdkafka flushes on drop.
    }

    async fn force_close_pools(&self) {
        let mut registry = PoolRegistry::new();
        for pool in self.pools_by_id.values() {
            registry.add(Arc::clone(pool));
        }
        registry.force_close_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_on_distinct_pools_group_into_distinct_topic_sets() {
        let mut groups: HashMap<u64, std::collections::HashSet<String>> = HashMap::new();
        let tasks = [
            LogBrokerPolicy { topic: "t1".into(), pool_id: 1, auto_commit: false },
            LogBrokerPolicy { topic: "t2".into(), pool_id: 2, auto_commit: false },
            LogBrokerPolicy { topic: "t1b".into(), pool_id: 1, auto_commit: false },
        ];
        for task in &tasks {
            groups.entry(task.pool_id).or_default().insert(task.topic.clone());
        }
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&1].len(), 2);
        assert_eq!(groups[&2].len(), 1);
    }

    #[test]
    fn default_topic_is_always_seeded() {
        let mut topics: std::collections::HashSet<String> = ["custom".to_string()].into();
        topics.insert("default_topic".into());
        assert!(topics.contains("default_topic"));
        assert!(topics.contains("custom"));
    }
}
