//! The registry capability the engine consumes
//!
//! This abstracts the registry transport so that tagmirror-core does not
//! depend on an HTTP client. The OCI implementation lives in
//! tagmirror-registry; tests provide an in-memory fake.

use crate::credentials::Credentials;
use crate::error::RegistryError;
use crate::reference::{ImageReference, RepositoryName};
use crate::tagset::TagSet;
use async_trait::async_trait;

/// List, fetch and push against named repositories
///
/// `credentials` is `None` when the policy declares none for that side;
/// implementations then fall back to their default keychain.
#[async_trait]
pub trait RegistryCapability: Send + Sync {
    /// Opaque transferable image
    type Image: Send + Sync;

    /// List every tag in a repository
    ///
    /// # Errors
    /// Must return [`RegistryError::NotFound`] when the repository does not
    /// exist, so the engine can treat it as empty.
    async fn list_tags(
        &self,
        repository: &RepositoryName,
        credentials: Option<&Credentials>,
    ) -> Result<TagSet, RegistryError>;

    /// Fetch the image a tag points to
    async fn fetch_image(
        &self,
        reference: &ImageReference,
        credentials: Option<&Credentials>,
    ) -> Result<Self::Image, RegistryError>;

    /// Push an image under a tag
    async fn push_image(
        &self,
        reference: &ImageReference,
        image: &Self::Image,
        credentials: Option<&Credentials>,
    ) -> Result<(), RegistryError>;
}
