//! The OCI Distribution implementation of the registry capability

use crate::auth::TokenCache;
use crate::client::{api_repository, RegistryClient};
use crate::error::Result;
use crate::types::{Blob, ImageManifest, OciImage};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tagmirror_core::{
    Credentials, ImageReference, Keychain, RegistryCapability, RegistryError, RepositoryName,
    TagSet,
};
use tracing::{debug, info};

/// User agent sent with every request
const USER_AGENT: &str = concat!("tagmirror/", env!("CARGO_PKG_VERSION"));

/// Default TCP connect timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Registry capability over the OCI Distribution HTTP API
///
/// Credentials are resolved per call: explicit policy credentials first,
/// then the keychain entry for the registry host, then anonymous.
pub struct OciRegistry {
    http: reqwest::Client,
    keychain: Arc<Keychain>,
    insecure: HashSet<String>,
    tokens: Arc<TokenCache>,
}

/// Builder for [`OciRegistry`]
pub struct OciRegistryBuilder {
    keychain: Arc<Keychain>,
    insecure: HashSet<String>,
    connect_timeout: Duration,
    user_agent: String,
}

impl OciRegistryBuilder {
    /// Reach these hosts over plain HTTP
    pub fn insecure<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insecure.extend(hosts.into_iter().map(Into::into));
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> Result<OciRegistry> {
        let http = reqwest::Client::builder()
            .user_agent(self.user_agent)
            .connect_timeout(self.connect_timeout)
            .build()?;

        Ok(OciRegistry {
            http,
            keychain: self.keychain,
            insecure: self.insecure,
            tokens: Arc::new(TokenCache::new()),
        })
    }
}

impl OciRegistry {
    pub fn builder(keychain: Arc<Keychain>) -> OciRegistryBuilder {
        OciRegistryBuilder {
            keychain,
            insecure: HashSet::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: USER_AGENT.to_string(),
        }
    }

    /// Adapter with default settings
    pub fn new(keychain: Arc<Keychain>) -> Result<Self> {
        Self::builder(keychain).build()
    }

    /// Whether a host is reached over plain HTTP
    pub fn is_insecure(&self, registry: &str) -> bool {
        self.insecure.contains(registry)
    }

    fn client_for(
        &self,
        registry: &str,
        explicit: Option<&Credentials>,
    ) -> std::result::Result<RegistryClient, RegistryError> {
        let credentials = explicit
            .or_else(|| self.keychain.lookup(registry))
            .cloned();
        RegistryClient::new(
            self.http.clone(),
            registry,
            self.is_insecure(registry),
            credentials,
            Arc::clone(&self.tokens),
        )
    }
}

#[async_trait]
impl RegistryCapability for OciRegistry {
    type Image = OciImage;

    async fn list_tags(
        &self,
        repository: &RepositoryName,
        credentials: Option<&Credentials>,
    ) -> std::result::Result<TagSet, RegistryError> {
        let client = self.client_for(&repository.registry, credentials)?;
        let path = api_repository(&repository.registry, &repository.repository);
        client
            .list_tags(&path)
            .await
            .map_err(|e| retarget(e, &repository.to_string()))
    }

    async fn fetch_image(
        &self,
        reference: &ImageReference,
        credentials: Option<&Credentials>,
    ) -> std::result::Result<OciImage, RegistryError> {
        let target = reference.to_string();
        let registry = reference.registry();
        let client = self.client_for(registry, credentials)?;
        let path = api_repository(registry, &reference.repository.repository);

        let (manifest_bytes, media_type) = client
            .get_manifest(&path, &reference.tag)
            .await
            .map_err(|e| retarget(e, &target))?;
        let manifest: ImageManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| RegistryError::rejected(&target, format!("malformed manifest: {}", e)))?;

        let config = Blob {
            data: client.get_blob(&path, &manifest.config).await?,
            descriptor: manifest.config,
        };

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for descriptor in manifest.layers {
            let data = client.get_blob(&path, &descriptor).await?;
            layers.push(Blob { descriptor, data });
        }

        let image = OciImage {
            media_type,
            manifest: manifest_bytes,
            config,
            layers,
        };
        debug!(
            "Fetched {} ({} layers, {} bytes)",
            target,
            image.layers.len(),
            image.size()
        );
        Ok(image)
    }

    async fn push_image(
        &self,
        reference: &ImageReference,
        image: &OciImage,
        credentials: Option<&Credentials>,
    ) -> std::result::Result<(), RegistryError> {
        let target = reference.to_string();
        let registry = reference.registry();
        let client = self.client_for(registry, credentials)?;
        let path = api_repository(registry, &reference.repository.repository);

        let mut uploaded = 0usize;
        for blob in image.blobs() {
            if client.blob_exists(&path, &blob.descriptor.digest).await? {
                debug!("Blob {} already present at {}", blob.descriptor.digest, registry);
                continue;
            }
            client.upload_blob(&path, blob).await?;
            uploaded += 1;
        }

        client
            .put_manifest(&path, &reference.tag, &image.media_type, image.manifest.clone())
            .await
            .map_err(|e| retarget(e, &target))?;

        info!(
            "Pushed {} ({} blobs uploaded, digest {})",
            target,
            uploaded,
            image.digest()
        );
        Ok(())
    }
}

/// Name errors after the user-facing reference rather than the API path
fn retarget(err: RegistryError, target: &str) -> RegistryError {
    let target = target.to_string();
    match err {
        RegistryError::NotFound { .. } => RegistryError::NotFound { target },
        RegistryError::Unauthorized { message, .. } => {
            RegistryError::Unauthorized { target, message }
        }
        RegistryError::Transient { message, .. } => RegistryError::Transient { target, message },
        RegistryError::Rejected { message, .. } => RegistryError::Rejected { target, message },
        RegistryError::Unsupported { message, .. } => {
            RegistryError::Unsupported { target, message }
        }
        RegistryError::Timeout { secs, .. } => RegistryError::Timeout { target, secs },
        RegistryError::Cancelled { .. } => RegistryError::Cancelled { target },
    }
}
