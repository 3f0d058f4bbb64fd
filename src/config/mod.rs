//! Runtime configuration models.

pub mod settings;

pub use settings::{
    RuntimeSettings, DEFAULT_HEARTBEAT_FILE_PATH, DEFAULT_READY_FILE_PATH,
};
