pub mod policy;

pub use policy::ErrorPolicy;
