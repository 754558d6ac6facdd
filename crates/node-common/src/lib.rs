#![doc = "Common types shared across the fieldnode workspace."]

pub mod config;
pub mod error;
pub mod metrics;
pub mod node;
pub mod state;

pub use config::*;
pub use error::*;
pub use metrics::*;
pub use node::*;
pub use state::*;
