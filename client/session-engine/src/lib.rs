pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use engine::{EngineCommand, EngineEvent, SessionEngine};
pub use error::{ClientError, FinalizeError, LoadError, SessionError};
pub use services::AppState;
