//! Shared decode-then-lookup step of the dispatch path (`spec.md` §4.3 steps 1-2).
//!
//! Steps 3-5 (hand to pool, execute, translate outcome into an ack/commit
//! action) are transport-specific and live in `transport::amqp` and
//! `transport::logbroker`, since only those drivers know how to terminate a
//! delivery.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::codec::TaskCodec;
use super::registry::{Registry, TaskDescriptor};

/// Why dispatch could not proceed to execution.
#[derive(Debug)]
pub enum ResolveError {
    /// The payload did not decode to a valid `[name, args, kwargs]` message.
    Decode(String),
    /// The decoded name is not in the registry.
    UnknownTask(String),
}

/// Decode `bytes` and look the task up in `registry`.
pub fn resolve<Policy>(
    registry: &Registry<Policy>,
    codec: &dyn TaskCodec,
    bytes: &[u8],
) -> Result<(Arc<TaskDescriptor<Policy>>, Vec<Value>, Map<String, Value>), ResolveError> {
    let (name, args, kwargs) = codec
        .decode(bytes)
        .map_err(|e| ResolveError::Decode(e.to_string()))?;
    let descriptor = registry
        .get(&name)
        .ok_or(ResolveError::UnknownTask(name))?;
    Ok((descriptor, args, kwargs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::JsonCodec;
    use crate::core::pool::ConcurrencyPool;
    use crate::core::registry::TaskBody;
    use std::time::Duration;

    fn registry_with_one_task() -> Registry<()> {
        let pool = Arc::new(ConcurrencyPool::new(Some(1), Duration::from_secs(1)));
        let mut registry = Registry::new();
        registry
            .register(TaskDescriptor {
                name: "t.noop".into(),
                body: TaskBody::Sync(Arc::new(|_, _| Ok(()))),
                timeout: None,
                pool,
                policy: (),
            })
            .unwrap();
        registry
    }

    #[test]
    fn resolves_known_task() {
        let registry = registry_with_one_task();
        let codec = JsonCodec;
        let bytes = codec.encode("t.noop", &[], &Map::new()).unwrap();
        let (descriptor, args, kwargs) = resolve(&registry, &codec, &bytes).unwrap();
        assert_eq!(descriptor.name, "t.noop");
        assert!(args.is_empty());
        assert!(kwargs.is_empty());
    }

    #[test]
    fn unknown_task_is_reported() {
        let registry = registry_with_one_task();
        let codec = JsonCodec;
        let bytes = codec.encode("t.missing", &[], &Map::new()).unwrap();
        let err = resolve(&registry, &codec, &bytes).unwrap_err();
        assert!(matches!(err, ResolveError::UnknownTask(name) if name == "t.missing"));
    }

    #[test]
    fn malformed_payload_is_reported() {
        let registry = registry_with_one_task();
        let codec = JsonCodec;
        let err = resolve(&registry, &codec, b"not json").unwrap_err();
        assert!(matches!(err, ResolveError::Decode(_)));
    }
}
