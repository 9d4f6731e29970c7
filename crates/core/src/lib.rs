// crates/core/src/lib.rs
pub mod cell;
pub mod command;
pub mod config;
pub mod error;
pub mod job;
pub mod manager;
pub mod metrics;
pub mod progress;
pub mod store;
pub mod types;

pub use cell::*;
pub use command::*;
pub use config::*;
pub use error::*;
pub use job::*;
pub use manager::*;
pub use metrics::*;
pub use progress::*;
pub use store::*;
pub use types::*;
