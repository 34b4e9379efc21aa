//! Open5GS topology reconciliation
//!
//! Keeps the network functions declared by an `Open5GS` object converged
//! against the cluster:
//!
//! - **normalize**: fills every unset flag, image and network parameter
//! - **component**: the catalogue of network functions and their endpoints
//! - **compiler**: turns one component into its desired resources
//! - **engine**: diffs desired against observed and issues the minimal calls
//! - **ownership** / **fingerprint**: mutation gating and config-driven restarts
//! - **controller**: the reconcile loop tying it all together

#![deny(missing_docs)]

pub mod client;
pub mod compiler;
pub mod component;
pub mod controller;
pub mod engine;
pub mod fingerprint;
pub mod normalize;
pub mod ownership;
pub mod probe;
pub mod resources;

#[cfg(test)]
mod testing;

pub use client::{ControlPlane, KubeControlPlane};
pub use compiler::{DesiredStateCompiler, Open5GSCompiler};
pub use controller::{error_policy, reconcile, Open5GSContext};
pub use probe::{CapabilityProbe, KubeCapabilityProbe};
