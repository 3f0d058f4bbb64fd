//! Task registration: building the name -> descriptor map at setup time.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use super::error::{RegistryError, TaskError};
use super::pool::ConcurrencyPool;

/// A boxed future returned by an async task body.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Two registration shapes rather than one runtime-inspected return value,
/// per the "Dynamic dispatch of user callables" redesign note: the dispatch
/// path branches on this tag instead of probing the callable's return type.
#[derive(Clone)]
pub enum TaskBody {
    /// A synchronous callable, invoked directly on the pool's executor.
    Sync(Arc<dyn Fn(Vec<Value>, Map<String, Value>) -> Result<(), TaskError> + Send + Sync>),
    /// A callable returning a deferred computation, cooperatively awaited.
    Async(
        Arc<
            dyn Fn(Vec<Value>, Map<String, Value>) -> BoxFuture<Result<(), TaskError>>
                + Send
                + Sync,
        >,
    ),
}

impl std::fmt::Debug for TaskBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskBody::Sync(_) => f.write_str("TaskBody::Sync(..)"),
            TaskBody::Async(_) => f.write_str("TaskBody::Async(..)"),
        }
    }
}

impl TaskBody {
    /// Run the body to completion, awaiting it if it is async.
    pub async fn call(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<(), TaskError> {
        match self {
            TaskBody::Sync(f) => f(args, kwargs),
            TaskBody::Async(f) => f(args, kwargs).await,
        }
    }
}

/// A registered, immutable task. Generic over `Policy`, the transport-specific
/// configuration (`AmqpPolicy` or `LogBrokerPolicy`); the AMQP and log-broker
/// drivers each keep their own `Registry<Policy>` rather than sharing one,
/// mirroring how the original splits `amqp.Task`/`kafka.Task` from a common
/// base.
#[derive(Debug)]
pub struct TaskDescriptor<Policy> {
    /// Unique name, defaulting to `"<module>.<function>"` at the call site.
    pub name: String,
    /// The callable (or deferred-computation factory) to invoke on dispatch.
    pub body: TaskBody,
    /// Per-task timeout; `None` inherits the pool default.
    pub timeout: Option<Duration>,
    /// The concurrency pool this task executes on.
    pub pool: Arc<ConcurrencyPool>,
    /// Transport-specific delivery policy.
    pub policy: Policy,
}

/// Build-time, then read-only, map from task name to descriptor.
pub struct Registry<Policy> {
    tasks: HashMap<String, Arc<TaskDescriptor<Policy>>>,
}

impl<Policy> Default for Registry<Policy> {
    fn default() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }
}

impl<Policy> Registry<Policy> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task descriptor, failing if the name is already registered.
    pub fn register(&mut self, descriptor: TaskDescriptor<Policy>) -> Result<(), RegistryError> {
        if self.tasks.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateTask(descriptor.name));
        }
        self.tasks.insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(())
    }

    /// Look up a task by name.
    pub fn get(&self, name: &str) -> Option<Arc<TaskDescriptor<Policy>>> {
        self.tasks.get(name).cloned()
    }

    /// Iterate over every registered descriptor.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<TaskDescriptor<Policy>>> {
        self.tasks.values()
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the registry holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn descriptor(name: &str, pool: &Arc<ConcurrencyPool>) -> TaskDescriptor<()> {
        TaskDescriptor {
            name: name.to_string(),
            body: TaskBody::Sync(Arc::new(|_args, _kwargs| Ok(()))),
            timeout: None,
            pool: Arc::clone(pool),
            policy: (),
        }
    }

    #[test]
    fn duplicate_registration_is_rejected_and_registry_unchanged() {
        let pool = Arc::new(ConcurrencyPool::new(Some(4), StdDuration::from_secs(5)));
        let mut registry = Registry::new();
        registry.register(descriptor("t.add", &pool)).unwrap();

        let err = registry.register(descriptor("t.add", &pool)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTask(name) if name == "t.add"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn sync_and_async_bodies_both_run() {
        let ran_sync = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_sync2 = Arc::clone(&ran_sync);
        let sync_body = TaskBody::Sync(Arc::new(move |_args, _kwargs| {
            ran_sync2.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }));
        sync_body.call(vec![], Map::new()).await.unwrap();
        assert!(ran_sync.load(std::sync::atomic::Ordering::SeqCst));

        let async_body = TaskBody::Async(Arc::new(|_args, _kwargs| {
            Box::pin(async move {
                tokio::time::sleep(StdDuration::from_millis(1)).await;
                Ok(())
            })
        }));
        async_body.call(vec![], Map::new()).await.unwrap();
    }
}
