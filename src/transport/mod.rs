//! Transport drivers: AMQP (§4.5) and log-broker (§4.6).

#[cfg(feature = "amqp")]
pub mod amqp;
#[cfg(feature = "logbroker")]
pub mod logbroker;
