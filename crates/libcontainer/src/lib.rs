pub mod channel;
pub mod configs;
pub mod container;
pub mod error;
pub mod factory;
pub mod list;
pub mod process;
pub mod rootless;
pub mod signal;
pub mod specconv;
pub mod validate;
pub mod workload;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

// Re-export of the libraries the public API is written against
pub use libcgroups;
pub use oci_spec;
