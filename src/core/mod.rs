//! Core scheduling abstractions shared by every transport driver.

pub mod codec;
pub mod dispatch;
pub mod error;
pub mod pool;
pub mod registry;

pub use codec::{JsonCodec, Message, TaskCodec};
pub use dispatch::{resolve, ResolveError};
pub use error::{AppResult, CodecError, PoolError, RegistryError, TaskError, TransportError};
pub use pool::ConcurrencyPool;
pub use registry::{BoxFuture, Registry, TaskBody, TaskDescriptor};
