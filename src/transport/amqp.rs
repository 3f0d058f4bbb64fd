//! AMQP-style transport: exchanges, queues, bindings, and the per-message
//! ack/reject state machine (`spec.md` §4.5).
//!
//! The publish/consume plumbing follows the shape of
//! `other_examples/6cb9def2_issuu-kanin__kanin-src-app-task.rs.rs` (one
//! channel per consumer, a consumer-tag retained for cancellation, ack on
//! success / reject-with-requeue on handler failure) and
//! `other_examples/6bda03c4_paritytech-substrate-archive__work-queue-sa-work-queue-src-runner.rs.rs`
//! (QoS set once per consumer channel before `basic_consume`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::RuntimeSettings;
use crate::core::{
    ConcurrencyPool, JsonCodec, Registry, RegistryError, ResolveError, TaskBody, TaskCodec,
    TaskDescriptor, TransportError,
};
use crate::runtime::{PoolRegistry, WorkerApp, WorkerState};

/// Exchange and queue names are prefixed with these fixed literals; the
/// prefix is part of the name as seen by the broker (`spec.md` §6).
pub const EXCHANGE_PREFIX: &str = "oxalis_exchange_";
pub const QUEUE_PREFIX: &str = "oxalis_queue_";

/// A declared exchange.
#[derive(Debug, Clone)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: lapin::ExchangeKind,
    pub durable: bool,
}

impl ExchangeSpec {
    pub fn new(name: impl Into<String>, kind: lapin::ExchangeKind) -> Self {
        Self {
            name: format!("{EXCHANGE_PREFIX}{}", name.into()),
            kind,
            durable: true,
        }
    }
}

/// A declared queue with its consumer QoS.
#[derive(Debug, Clone)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub prefetch_count: u16,
    pub prefetch_size: u32,
    pub global_qos: bool,
}

impl QueueSpec {
    /// `prefetch_count` defaults to 4, matching
    /// `examples/original_source/oxalis/amqp.py`'s `Queue.consumer_prefetch_count`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: format!("{QUEUE_PREFIX}{}", name.into()),
            durable: true,
            prefetch_count: 4,
            prefetch_size: 0,
            global_qos: false,
        }
    }
}

/// `(queue, exchange, routing_key)` binding.
#[derive(Debug, Clone)]
pub struct Binding {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

/// Per-task AMQP delivery policy. Default matches the authoritative revision
/// named in `spec.md` §9 ("open question"): `ack_later=true, reject=true`.
#[derive(Debug, Clone, Copy)]
pub struct AmqpPolicy {
    pub ack_later: bool,
    pub ack_always: bool,
    pub reject: bool,
    pub reject_requeue: bool,
}

impl Default for AmqpPolicy {
    fn default() -> Self {
        Self {
            ack_later: true,
            ack_always: false,
            reject: true,
            reject_requeue: true,
        }
    }
}

/// Raised when an `AmqpPolicy` combination is invalid (`spec.md` §4.5).
#[derive(Debug, thiserror::Error)]
pub enum PolicyConfigError {
    #[error("ack_always and reject cannot both be true")]
    AckAlwaysWithReject,
    #[error("reject requires ack_later")]
    RejectWithoutAckLater,
    #[error("ack_always requires ack_later")]
    AckAlwaysWithoutAckLater,
    #[error("reject_requeue requires reject")]
    RequeueWithoutReject,
}

impl AmqpPolicy {
    /// Validate the four combination rules from `spec.md` §4.5.
    pub fn validate(&self) -> Result<(), PolicyConfigError> {
        if self.ack_always && self.reject {
            return Err(PolicyConfigError::AckAlwaysWithReject);
        }
        if self.reject && !self.ack_later {
            return Err(PolicyConfigError::RejectWithoutAckLater);
        }
        if self.ack_always && !self.ack_later {
            return Err(PolicyConfigError::AckAlwaysWithoutAckLater);
        }
        if self.reject_requeue && !self.reject {
            return Err(PolicyConfigError::RequeueWithoutReject);
        }
        Ok(())
    }
}

/// The outcome of running a task body, as fed into the ack state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// The terminal disposition of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckAction {
    /// Ack the delivery.
    Ack,
    /// Reject the delivery, optionally requeuing it.
    Reject { requeue: bool },
    /// Neither ack nor reject; the delivery redelivers when the channel closes.
    NoAction,
}

/// Compute the ack/reject disposition for a delivery whose task has
/// `ack_later=true`, per the table in `spec.md` §4.5. Deliveries whose task
/// has `ack_later=false` are acked immediately on entry by the caller and
/// never reach this function.
pub fn ack_action(policy: &AmqpPolicy, outcome: Outcome) -> AckAction {
    debug_assert!(policy.ack_later, "ack_action is only defined for ack_later=true tasks");
    match outcome {
        Outcome::Success => AckAction::Ack,
        Outcome::Failure => {
            if policy.reject {
                AckAction::Reject {
                    requeue: policy.reject_requeue,
                }
            } else if policy.ack_always {
                AckAction::Ack
            } else {
                AckAction::NoAction
            }
        }
    }
}

/// Per-call publish options (`priority`, `headers`), passed explicitly
/// instead of mutated onto the task descriptor and cleared afterward — see
/// the "per-call mutable task config" redesign note in `spec.md` §9.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub priority: Option<u8>,
    pub headers: Map<String, Value>,
}

/// The AMQP transport driver: topology, connection, and the consumer
/// activities that feed dispatch.
pub struct AmqpDriver {
    connection: Connection,
    shared_channel: Channel,
    exchanges: Vec<ExchangeSpec>,
    queues: Vec<QueueSpec>,
    bindings: Vec<Binding>,
    consumer_tags: tokio::sync::Mutex<HashMap<String, (Channel, String)>>,
    codec: Arc<dyn TaskCodec>,
}

impl AmqpDriver {
    /// Connect and declare every exchange, queue, and binding on one shared
    /// channel (`spec.md` §4.5 "Topology").
    pub async fn connect(
        amqp_url: &str,
        exchanges: Vec<ExchangeSpec>,
        queues: Vec<QueueSpec>,
        bindings: Vec<Binding>,
    ) -> Result<Self, lapin::Error> {
        let connection = Connection::connect(amqp_url, ConnectionProperties::default()).await?;
        let shared_channel = connection.create_channel().await?;

        for exchange in &exchanges {
            shared_channel
                .exchange_declare(
                    &exchange.name,
                    exchange.kind.clone(),
                    ExchangeDeclareOptions {
                        durable: exchange.durable,
                        ..ExchangeDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await?;
        }
        for queue in &queues {
            shared_channel
                .queue_declare(
                    &queue.name,
                    QueueDeclareOptions {
                        durable: queue.durable,
                        ..QueueDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await?;
        }
        for binding in &bindings {
            shared_channel
                .queue_bind(
                    &binding.queue,
                    &binding.exchange,
                    &binding.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        Ok(Self {
            connection,
            shared_channel,
            exchanges,
            queues,
            bindings,
            consumer_tags: tokio::sync::Mutex::new(HashMap::new()),
            codec: Arc::new(JsonCodec),
        })
    }

    /// Declared exchanges (read-only after `connect`).
    pub fn exchanges(&self) -> &[ExchangeSpec] {
        &self.exchanges
    }

    /// Declared queues (read-only after `connect`).
    pub fn queues(&self) -> &[QueueSpec] {
        &self.queues
    }

    /// Declared bindings (read-only after `connect`).
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Publish a task invocation to `exchange` with `routing_key`
    /// (`spec.md` §4.5 "Publish").
    pub async fn send_task(
        &self,
        exchange: &str,
        routing_key: &str,
        name: &str,
        args: &[Value],
        kwargs: &Map<String, Value>,
        options: &PublishOptions,
    ) -> Result<(), TransportError> {
        let payload = self
            .codec
            .encode(name, args, kwargs)
            .map_err(|e| TransportError::Backend(e.to_string()))?;

        let mut properties = BasicProperties::default().with_content_type("text/plain".into());
        if let Some(priority) = options.priority {
            properties = properties.with_priority(priority);
        }
        if !options.headers.is_empty() {
            let mut table = FieldTable::default();
            for (key, value) in &options.headers {
                table.insert(key.as_str().into(), json_to_amqp_value(value));
            }
            properties = properties.with_headers(table);
        }

        self.shared_channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(|e| TransportError::Backend(e.to_string()))?
            .await
            .map_err(|e| TransportError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Open a per-queue channel, set QoS, and start consuming, storing the
    /// consumer tag for later cancellation (`spec.md` §4.5 "Consume").
    pub async fn start_consumer<Policy>(
        &self,
        queue: &QueueSpec,
        registry: Arc<Registry<Policy>>,
        pool: Arc<ConcurrencyPool>,
        consuming_count: Arc<std::sync::atomic::AtomicUsize>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Result<(), lapin::Error>
    where
        Policy: Into<AmqpPolicy> + Clone + Send + Sync + 'static,
    {
        let channel = self.connection.create_channel().await?;
        channel
            .basic_qos(
                queue.prefetch_count,
                BasicQosOptions {
                    global: queue.global_qos,
                },
            )
            .await?;
        let mut consumer = channel
            .basic_consume(
                &queue.name,
                "oxalis-consumer",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        let tag = consumer.tag().to_string();
        self.consumer_tags
            .lock()
            .await
            .insert(queue.name.clone(), (channel.clone(), tag));

        let codec = Arc::clone(&self.codec);
        let queue_name = queue.name.clone();
        consuming_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    delivery = consumer.next() => {
                        let Some(delivery) = delivery else { break };
                        let Ok(delivery) = delivery else { continue };
                        let delivery_tag = delivery.delivery_tag;
                        let channel = channel.clone();

                        match crate::core::resolve(&registry, codec.as_ref(), &delivery.data) {
                            Err(ResolveError::Decode(msg)) => {
                                warn!(queue = %queue_name, %msg, "decode error; rejecting with requeue");
                                let _ = channel.basic_reject(delivery_tag, BasicRejectOptions { requeue: true }).await;
                            }
                            Err(ResolveError::UnknownTask(name)) => {
                                warn!(queue = %queue_name, task = %name, "unknown task; rejecting with requeue");
                                let _ = channel.basic_reject(delivery_tag, BasicRejectOptions { requeue: true }).await;
                            }
                            Ok((descriptor, args, kwargs)) => {
                                dispatch_delivery(descriptor, args, kwargs, channel, delivery_tag, &pool).await;
                            }
                        }
                    }
                }
            }
            consuming_count.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            info!(queue = %queue_name, "consumer activity stopped");
        });
        Ok(())
    }

    /// Cancel every tracked consumer tag (`spec.md` §4.4 shutdown step a).
    pub async fn cancel_all_consumers(&self) {
        let tags = self.consumer_tags.lock().await;
        for (queue, (channel, tag)) in tags.iter() {
            if let Err(error) = channel.basic_cancel(tag, BasicCancelOptions::default()).await {
                warn!(%queue, %error, "failed to cancel consumer");
            }
        }
    }

    /// Close the connection (`spec.md` §4.4 shutdown step d).
    pub async fn disconnect(&self) -> Result<(), lapin::Error> {
        self.connection
            .close(200, "graceful shutdown")
            .await
    }
}

async fn dispatch_delivery<Policy>(
    descriptor: Arc<TaskDescriptor<Policy>>,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    channel: Channel,
    delivery_tag: lapin::types::LongLongUInt,
    pool: &ConcurrencyPool,
) where
    Policy: Into<AmqpPolicy> + Clone + Send + Sync + 'static,
{
    let policy: AmqpPolicy = descriptor.policy.clone().into();
    let timeout = descriptor.timeout;

    if !policy.ack_later {
        if let Err(error) = channel.basic_ack(delivery_tag, BasicAckOptions::default()).await {
            warn!(%error, "failed to ack on entry");
        }
        let descriptor = Arc::clone(&descriptor);
        let _ = pool
            .spawn(timeout, async move {
                descriptor.body.call(args, kwargs).await
            })
            .await;
        return;
    }

    let descriptor_for_task = Arc::clone(&descriptor);
    let channel_for_task = channel.clone();
    let outcome_policy = policy;
    let spawned = pool
        .wait_spawn(timeout, async move {
            let result = descriptor_for_task.body.call(args, kwargs).await;
            let outcome = if result.is_ok() {
                Outcome::Success
            } else {
                Outcome::Failure
            };
            match ack_action(&outcome_policy, outcome) {
                AckAction::Ack => {
                    let _ = channel_for_task
                        .basic_ack(delivery_tag, BasicAckOptions::default())
                        .await;
                }
                AckAction::Reject { requeue } => {
                    let _ = channel_for_task
                        .basic_reject(delivery_tag, BasicRejectOptions { requeue })
                        .await;
                }
                AckAction::NoAction => {}
            }
            result
        })
        .await;

    if spawned.is_err() {
        warn!("pool closed or full; rejecting with requeue");
        let _ = channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue: true })
            .await;
    }
}

fn json_to_amqp_value(value: &Value) -> lapin::types::AMQPValue {
    use lapin::types::AMQPValue;
    match value {
        Value::Null => AMQPValue::Void,
        Value::Bool(b) => AMQPValue::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                AMQPValue::LongLongInt(i)
            } else {
                AMQPValue::Double(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => AMQPValue::LongString(s.as_str().into()),
        other => AMQPValue::LongString(other.to_string().into()),
    }
}

/// A registered task's route plus its ack/reject policy. The raw short
/// names are what callers pass to `register`; the `oxalis_exchange_` /
/// `oxalis_queue_` prefixes (`spec.md` §6) are applied when topology is
/// declared and when messages are published.
#[derive(Debug, Clone)]
pub struct AmqpTaskConfig {
    pub policy: AmqpPolicy,
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

impl AmqpTaskConfig {
    pub fn exchange_name(&self) -> String {
        format!("{EXCHANGE_PREFIX}{}", self.exchange)
    }

    pub fn queue_name(&self) -> String {
        format!("{QUEUE_PREFIX}{}", self.queue)
    }
}

impl From<AmqpTaskConfig> for AmqpPolicy {
    fn from(config: AmqpTaskConfig) -> Self {
        config.policy
    }
}

/// Builds an [`AmqpApp`] by registering tasks into a mutable registry before
/// the worker starts; the registry becomes read-only once `build` hands it
/// to the app (`spec.md` §3 "Registry").
pub struct AmqpAppBuilder {
    amqp_url: String,
    settings: RuntimeSettings,
    registry: Registry<AmqpTaskConfig>,
    default_pool: Arc<ConcurrencyPool>,
}

impl AmqpAppBuilder {
    pub fn new(amqp_url: impl Into<String>, settings: RuntimeSettings) -> Self {
        let default_pool = Arc::new(ConcurrencyPool::new(settings.concurrency, settings.default_timeout()));
        Self {
            amqp_url: amqp_url.into(),
            settings,
            registry: Registry::new(),
            default_pool,
        }
    }

    /// The pool every task uses unless it is registered with an explicit
    /// alternate pool.
    pub fn default_pool(&self) -> Arc<ConcurrencyPool> {
        Arc::clone(&self.default_pool)
    }

    /// Register a task. Fails with `RegistryError::Config` if `policy` is an
    /// invalid ack/reject combination, or `RegistryError::DuplicateTask` if
    /// `name` is already registered.
    #[allow(clippy::too_many_arguments)]
    pub fn register(
        &mut self,
        name: impl Into<String>,
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
        policy: AmqpPolicy,
        timeout: Option<Duration>,
        pool: Option<Arc<ConcurrencyPool>>,
        body: TaskBody,
    ) -> Result<(), RegistryError> {
        policy
            .validate()
            .map_err(|e| RegistryError::Config(e.to_string()))?;
        self.registry.register(TaskDescriptor {
            name: name.into(),
            body,
            timeout,
            pool: pool.unwrap_or_else(|| Arc::clone(&self.default_pool)),
            policy: AmqpTaskConfig {
                policy,
                exchange: exchange.into(),
                queue: queue.into(),
                routing_key: routing_key.into(),
            },
        })
    }

    pub fn build(self, state: Arc<WorkerState>) -> AmqpApp {
        AmqpApp {
            amqp_url: self.amqp_url,
            settings: self.settings,
            registry: Arc::new(self.registry),
            state,
            driver: tokio::sync::OnceCell::new(),
            pools: std::sync::Mutex::new(PoolRegistry::new()),
        }
    }
}

/// The producer+worker surface for the AMQP transport: registration happens
/// through [`AmqpAppBuilder`] before this is constructed; from here on the
/// registry is read-only (`spec.md` §4.4).
pub struct AmqpApp {
    amqp_url: String,
    settings: RuntimeSettings,
    registry: Arc<Registry<AmqpTaskConfig>>,
    state: Arc<WorkerState>,
    driver: tokio::sync::OnceCell<AmqpDriver>,
    pools: std::sync::Mutex<PoolRegistry>,
}

impl AmqpApp {
    fn driver(&self) -> &AmqpDriver {
        self.driver
            .get()
            .expect("connect() must run before send_task/run_worker")
    }

    /// Enqueue a task invocation. In `test=true` mode the callable runs
    /// inline on the caller and the transport is never touched
    /// (`spec.md` §4.3 "Test mode"; scenario A).
    pub async fn delay(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        options: PublishOptions,
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
            .send_task(
                &descriptor.policy.exchange_name(),
                &descriptor.policy.routing_key,
                name,
                &args,
                &kwargs,
                &options,
            )
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl WorkerApp for AmqpApp {
    async fn connect(&self) -> Result<(), anyhow::Error> {
        let mut exchanges_by_name = HashMap::new();
        let mut queues_by_name = HashMap::new();
        let mut bindings = Vec::new();
        for descriptor in self.registry.iter() {
            let exchange = ExchangeSpec::new(descriptor.policy.exchange.clone(), lapin::ExchangeKind::Direct);
            let queue = QueueSpec::new(descriptor.policy.queue.clone());
            bindings.push(Binding {
                queue: queue.name.clone(),
                exchange: exchange.name.clone(),
                routing_key: descriptor.policy.routing_key.clone(),
            });
            exchanges_by_name.insert(exchange.name.clone(), exchange);
            queues_by_name.insert(queue.name.clone(), queue);
        }

        let driver = AmqpDriver::connect(
            &self.amqp_url,
            exchanges_by_name.into_values().collect(),
            queues_by_name.into_values().collect(),
            bindings,
        )
        .await?;
        self.driver
            .set(driver)
            .map_err(|_| anyhow::anyhow!("connect() called twice"))?;

        let mut pools = self.pools.lock().unwrap();
        for descriptor in self.registry.iter() {
            pools.add(Arc::clone(&descriptor.pool));
        }
        Ok(())
    }

    async fn run_worker(&self) -> Result<(), anyhow::Error> {
        let driver = self.driver();
        let queues: HashMap<String, QueueSpec> = self
            .registry
            .iter()
            .map(|d| (d.policy.queue_name(), QueueSpec::new(d.policy.queue.clone())))
            .collect();
        for queue in queues.values() {
            let pool = self
                .registry
                .iter()
                .find(|d| d.policy.queue_name() == queue.name)
                .map(|d| Arc::clone(&d.pool))
                .expect("queue derived from a registered task's pool");
            driver
                .start_consumer(
                    queue,
                    Arc::clone(&self.registry),
                    pool,
                    self.state.consuming_count(),
                    self.state.subscribe_shutdown(),
                )
                .await?;
        }
        Ok(())
    }

    async fn stop_intake(&self) {
        self.driver().cancel_all_consumers().await;
    }

    async fn drain_pools(&self) {
        let pools = self.pools.lock().unwrap().clone();
        pools.wait_close_all().await;
    }

    async fn disconnect(&self) {
        if let Err(error) = self.driver().disconnect().await {
            warn!(%error, "error closing AMQP connection");
        }
    }

    async fn force_close_pools(&self) {
        let pools = self.pools.lock().unwrap().clone();
        pools.force_close_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_later_false_is_always_immediate_elsewhere() {
        // ack_action is undefined for ack_later=false; the caller acks on entry.
        let policy = AmqpPolicy {
            ack_later: false,
            ..AmqpPolicy::default()
        };
        assert!(!policy.ack_later);
    }

    #[test]
    fn success_always_acks() {
        let policy = AmqpPolicy::default();
        assert_eq!(ack_action(&policy, Outcome::Success), AckAction::Ack);
    }

    #[test]
    fn failure_with_reject_rejects_with_configured_requeue() {
        let policy = AmqpPolicy {
            ack_later: true,
            ack_always: false,
            reject: true,
            reject_requeue: true,
        };
        assert_eq!(
            ack_action(&policy, Outcome::Failure),
            AckAction::Reject { requeue: true }
        );
    }

    #[test]
    fn failure_with_ack_always_acks() {
        let policy = AmqpPolicy {
            ack_later: true,
            ack_always: true,
            reject: false,
            reject_requeue: false,
        };
        assert_eq!(ack_action(&policy, Outcome::Failure), AckAction::Ack);
    }

    #[test]
    fn failure_with_neither_flag_takes_no_action() {
        let policy = AmqpPolicy {
            ack_later: true,
            ack_always: false,
            reject: false,
            reject_requeue: false,
        };
        assert_eq!(ack_action(&policy, Outcome::Failure), AckAction::NoAction);
    }

    #[test]
    fn ack_always_with_reject_is_invalid() {
        let policy = AmqpPolicy {
            ack_later: true,
            ack_always: true,
            reject: true,
            reject_requeue: false,
        };
        assert!(matches!(
            policy.validate(),
            Err(PolicyConfigError::AckAlwaysWithReject)
        ));
    }

    #[test]
    fn reject_without_ack_later_is_invalid() {
        let policy = AmqpPolicy {
            ack_later: false,
            ack_always: false,
            reject: true,
            reject_requeue: false,
        };
        assert!(matches!(
            policy.validate(),
            Err(PolicyConfigError::RejectWithoutAckLater)
        ));
    }

    #[test]
    fn ack_always_without_ack_later_is_invalid() {
        let policy = AmqpPolicy {
            ack_later: false,
            ack_always: true,
            reject: false,
            reject_requeue: false,
        };
        assert!(matches!(
            policy.validate(),
            Err(PolicyConfigError::AckAlwaysWithoutAckLater)
        ));
    }

    #[test]
    fn requeue_without_reject_is_invalid() {
        let policy = AmqpPolicy {
            ack_later: true,
            ack_always: false,
            reject: false,
            reject_requeue: true,
        };
        assert!(matches!(
            policy.validate(),
            Err(PolicyConfigError::RequeueWithoutReject)
        ));
    }

    #[test]
    fn default_policy_is_valid() {
        assert!(AmqpPolicy::default().validate().is_ok());
    }

    #[test]
    fn exchange_and_queue_names_carry_fixed_prefixes() {
        let exchange = ExchangeSpec::new("tasks", lapin::ExchangeKind::Direct);
        let queue = QueueSpec::new("tasks");
        assert_eq!(exchange.name, "oxalis_exchange_tasks");
        assert_eq!(queue.name, "oxalis_queue_tasks");
    }
}
