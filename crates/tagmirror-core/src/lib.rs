//! # tagmirror-core
//!
//! Core library for tagmirror providing:
//! - Tag selection patterns (glob, regex, semver ranges)
//! - Set algebra over image tags
//! - The reconciliation engine that copies missing tags between registries
//! - The convergence driver that keeps many policies converged
//! - Configuration file parsing (tagmirror.yaml) and credential resolution
//!
//! The engine talks to registries only through [`RegistryCapability`];
//! the HTTP implementation lives in the tagmirror-registry crate.

pub mod backoff;
pub mod cancel;
pub mod config;
pub mod credentials;
pub mod driver;
pub mod error;
pub mod pattern;
pub mod policy;
pub mod reconcile;
pub mod reference;
pub mod registry;
pub mod status;
pub mod tagset;

pub use cancel::{CancelHandle, CancelSignal};
pub use config::{DeclaredPolicies, MirrorConfig};
pub use credentials::{Credentials, Keychain};
pub use driver::{ConvergenceDriver, DriverOptions, DriverState};
pub use error::{Error, PassFailure, RegistryError, RegistryErrorKind, Result, Side};
pub use pattern::{TagMatcher, TagPattern};
pub use policy::MirrorPolicy;
pub use reconcile::{
    EngineOptions, PassOutcome, ReconciliationEngine, ReconciliationPlan, ReconciliationResult,
    TagFailure,
};
pub use reference::{ImageReference, RepositoryName};
pub use registry::RegistryCapability;
pub use status::{FileStatusSink, MemoryStatusSink, MirrorStatus, StatusSink};
pub use tagset::TagSet;

/// Version of the tagmirror-core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
