//! Concrete modules: a data source, a closure-driven module, and (with the
//! `foreign` feature) modules backed by an embedded script engine.

#[cfg(feature = "foreign")]
pub mod foreign;
pub mod initializer;
pub mod stateless;

#[cfg(feature = "foreign")]
pub use foreign::{ForeignEngine, ForeignModule, RhaiEngine};
pub use initializer::Initializer;
pub use stateless::Stateless;
