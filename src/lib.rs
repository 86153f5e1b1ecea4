pub mod core;
pub mod engine;
pub mod error;
pub mod modules;
pub mod observability;
pub mod resilience;

pub use error::{Error, Result};
