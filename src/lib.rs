pub mod builder;
pub mod catalog;
pub mod config;
pub mod correction;
pub mod error;
pub mod executor;
pub mod intent;
pub mod pipeline;
pub mod providers;
pub mod schema_context;
pub mod synthesizer;
pub mod telemetry;
pub mod validator;

pub use error::{PipelineError, Result};
pub use pipeline::{QueryPipeline, QueryResponse};
