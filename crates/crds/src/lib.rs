//! Kinecraft CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the Kinecraft controllers.

pub mod server;

pub use server::*;
