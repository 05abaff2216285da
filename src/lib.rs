pub mod build;
pub mod commands;
pub mod config;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod process;
pub mod retry;
pub mod telemetry;
pub mod trigger;
pub mod vcs;

pub use config::{parse, ParseOptions, RunConfig};
pub use error::{Error, Result};
pub use pipeline::{Pipeline, RunReport, RunStatus};
