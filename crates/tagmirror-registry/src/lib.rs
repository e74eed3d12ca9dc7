//! OCI registry adapter for tagmirror
//!
//! This crate provides functionality for:
//! - Listing repository tags across paginated responses
//! - Fetching single-platform images (manifest, config and layers) with
//!   sha256 verification
//! - Pushing images blob by blob, skipping blobs the destination has
//! - Bearer token exchange and basic auth against `WWW-Authenticate`
//!   challenges
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tagmirror_core::{Keychain, RegistryCapability, RepositoryName};
//! use tagmirror_registry::OciRegistry;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let keychain = Arc::new(Keychain::load_default(None)?);
//!     let registry = OciRegistry::new(keychain)?;
//!
//!     let repository = RepositoryName::parse("docker.io/library/centos")?;
//!     let tags = registry.list_tags(&repository, None).await?;
//!     println!("{}", tags);
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod oci;
pub mod types;

pub use client::RegistryClient;
pub use error::{Error, Result};
pub use oci::{OciRegistry, OciRegistryBuilder};
pub use types::{Blob, Descriptor, ImageManifest, OciImage};
