use crate::auth::{parse_challenge, repository_scope, Challenge, TokenCache};
use crate::error::{error_for, transport_error};
use crate::types::{
    sha256_digest, Blob, Descriptor, ManifestProbe, TagsResponse, TokenResponse, DOCKER_MANIFEST,
    MANIFEST_ACCEPT, OCI_MANIFEST,
};
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LINK, LOCATION, WWW_AUTHENTICATE};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use tagmirror_core::{Credentials, RegistryError, TagSet};
use tracing::{debug, trace};
use url::Url;

/// Docker Hub's logical name
const DOCKER_HUB: &str = "docker.io";

/// Docker Hub's API endpoint
const DOCKER_HUB_API: &str = "registry-1.docker.io";

/// Page size requested when listing tags
const TAGS_PAGE_SIZE: u32 = 1000;

/// Host that serves the API for a registry name
pub fn api_host(registry: &str) -> &str {
    if registry == DOCKER_HUB {
        DOCKER_HUB_API
    } else {
        registry
    }
}

/// Repository path as the API expects it
///
/// Official Docker Hub images live under `library/`.
pub fn api_repository(registry: &str, repository: &str) -> String {
    if registry == DOCKER_HUB && !repository.contains('/') {
        format!("library/{}", repository)
    } else {
        repository.to_string()
    }
}

/// How a request is authorized
#[derive(Clone)]
enum Authorization {
    Basic { username: String, password: String },
    Bearer(String),
}

impl Authorization {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Authorization::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            Authorization::Bearer(token) => request.bearer_auth(token),
        }
    }
}

/// Client for one OCI-compatible registry host
pub struct RegistryClient {
    client: reqwest::Client,
    registry: String,
    base_url: Url,
    credentials: Option<Credentials>,
    tokens: Arc<TokenCache>,
}

impl RegistryClient {
    /// Create a client for `registry`, over plain HTTP when `insecure`
    pub fn new(
        client: reqwest::Client,
        registry: &str,
        insecure: bool,
        credentials: Option<Credentials>,
        tokens: Arc<TokenCache>,
    ) -> Result<Self, RegistryError> {
        let scheme = if insecure { "http" } else { "https" };
        let base_url = Url::parse(&format!("{}://{}/", scheme, api_host(registry)))
            .map_err(|e| {
                RegistryError::rejected(registry, format!("invalid registry host: {}", e))
            })?;

        Ok(Self {
            client,
            registry: registry.to_string(),
            base_url,
            credentials,
            tokens,
        })
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// List all tags for a repository (handles pagination)
    pub async fn list_tags(&self, repository: &str) -> Result<TagSet, RegistryError> {
        let target = format!("{}/{}", self.registry, repository);
        let scope = repository_scope(repository, false);
        let mut url = self.url(
            &format!("v2/{}/tags/list?n={}", repository, TAGS_PAGE_SIZE),
            &target,
        )?;
        let mut all_tags = TagSet::new();

        loop {
            debug!("Listing tags from: {}", url);

            let response = self
                .send(&scope, &target, |client| client.get(url.clone()))
                .await?;
            if !response.status().is_success() {
                return Err(error_for(response, &target).await);
            }

            // Check for Link header for pagination
            let next_url = response
                .headers()
                .get(LINK)
                .and_then(|h| h.to_str().ok())
                .and_then(|link| parse_link_header(link, &self.base_url));

            let tags_response: TagsResponse = response
                .json()
                .await
                .map_err(|e| {
                    RegistryError::transient(
                        &target,
                        format!("failed to parse tags response: {}", e),
                    )
                })?;

            all_tags.extend(tags_response.tags.unwrap_or_default());

            match next_url {
                Some(next) if next != url => url = next,
                _ => break,
            }
        }

        trace!("Found {} tags total", all_tags.len());
        Ok(all_tags)
    }

    /// Fetch a manifest, returning its raw bytes and media type
    ///
    /// Indexes and manifest lists are reported as
    /// [`RegistryError::Unsupported`].
    pub async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<(Bytes, String), RegistryError> {
        let target = format!("{}/{}:{}", self.registry, repository, reference);
        let scope = repository_scope(repository, false);
        let url = self.url(&format!("v2/{}/manifests/{}", repository, reference), &target)?;

        debug!("Fetching manifest from: {}", url);

        let response = self
            .send(&scope, &target, |client| {
                client.get(url.clone()).header(ACCEPT, MANIFEST_ACCEPT)
            })
            .await?;
        if !response.status().is_success() {
            return Err(error_for(response, &target).await);
        }

        let header_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string());
        let expected_digest = response
            .headers()
            .get("docker-content-digest")
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(&target, e))?;

        let probe: ManifestProbe = serde_json::from_slice(&body)
            .map_err(|e| RegistryError::rejected(&target, format!("malformed manifest: {}", e)))?;
        let is_index = probe.is_index()
            || header_type.as_deref().is_some_and(crate::types::is_index);
        if is_index {
            return Err(RegistryError::unsupported(
                &target,
                "multi-platform image index; only single-platform images can be mirrored",
            ));
        }

        if let Some(expected) = expected_digest.filter(|d| d.starts_with("sha256:")) {
            let actual = sha256_digest(&body);
            if actual != expected {
                return Err(RegistryError::transient(
                    &target,
                    format!("manifest digest mismatch: expected {}, got {}", expected, actual),
                ));
            }
        }

        let media_type = header_type
            .filter(|t| t == OCI_MANIFEST || t == DOCKER_MANIFEST)
            .or(probe.media_type)
            .unwrap_or_else(|| OCI_MANIFEST.to_string());

        Ok((body, media_type))
    }

    /// Download a blob and verify it against its descriptor
    pub async fn get_blob(
        &self,
        repository: &str,
        descriptor: &Descriptor,
    ) -> Result<Bytes, RegistryError> {
        let target = format!("{}/{}@{}", self.registry, repository, descriptor.digest);
        let scope = repository_scope(repository, false);
        let url = self.url(&format!("v2/{}/blobs/{}", repository, descriptor.digest), &target)?;

        trace!("Fetching blob from: {}", url);

        let response = self
            .send(&scope, &target, |client| client.get(url.clone()))
            .await?;
        if !response.status().is_success() {
            return Err(error_for(response, &target).await);
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| transport_error(&target, e))?;
        verify_blob(descriptor, &data, &target)?;
        Ok(data)
    }

    /// Check whether a blob already exists
    pub async fn blob_exists(&self, repository: &str, digest: &str) -> Result<bool, RegistryError> {
        let target = format!("{}/{}@{}", self.registry, repository, digest);
        let scope = repository_scope(repository, true);
        let url = self.url(&format!("v2/{}/blobs/{}", repository, digest), &target)?;

        let response = self
            .send(&scope, &target, |client| client.head(url.clone()))
            .await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(error_for(response, &target).await),
        }
    }

    /// Upload a blob in one request (POST then PUT `?digest=`)
    pub async fn upload_blob(&self, repository: &str, blob: &Blob) -> Result<(), RegistryError> {
        let digest = &blob.descriptor.digest;
        let target = format!("{}/{}@{}", self.registry, repository, digest);
        let scope = repository_scope(repository, true);
        let start = self.url(&format!("v2/{}/blobs/uploads/", repository), &target)?;

        let response = self
            .send(&scope, &target, |client| client.post(start.clone()))
            .await?;
        if response.status() != StatusCode::ACCEPTED && !response.status().is_success() {
            return Err(error_for(response, &target).await);
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| RegistryError::rejected(&target, "upload response has no Location"))?;
        let mut upload_url = self
            .base_url
            .join(location)
            .map_err(|e| {
                RegistryError::rejected(&target, format!("invalid upload location: {}", e))
            })?;
        upload_url.query_pairs_mut().append_pair("digest", digest);

        debug!("Uploading {} bytes to {}", blob.data.len(), self.registry);

        let response = self
            .send(&scope, &target, |client| {
                client
                    .put(upload_url.clone())
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(blob.data.clone())
            })
            .await?;
        if !response.status().is_success() {
            return Err(error_for(response, &target).await);
        }
        Ok(())
    }

    /// Publish a manifest under a tag
    pub async fn put_manifest(
        &self,
        repository: &str,
        reference: &str,
        media_type: &str,
        manifest: Bytes,
    ) -> Result<(), RegistryError> {
        let target = format!("{}/{}:{}", self.registry, repository, reference);
        let scope = repository_scope(repository, true);
        let url = self.url(&format!("v2/{}/manifests/{}", repository, reference), &target)?;

        debug!("Putting manifest to: {}", url);

        let response = self
            .send(&scope, &target, |client| {
                client
                    .put(url.clone())
                    .header(CONTENT_TYPE, media_type)
                    .body(manifest.clone())
            })
            .await?;
        if !response.status().is_success() {
            return Err(error_for(response, &target).await);
        }
        Ok(())
    }

    fn url(&self, path: &str, target: &str) -> Result<Url, RegistryError> {
        self.base_url
            .join(path)
            .map_err(|e| RegistryError::rejected(target, format!("invalid URL: {}", e)))
    }

    fn identity(&self) -> String {
        match &self.credentials {
            None => "anonymous".to_string(),
            Some(Credentials::Basic { username, .. }) => format!("basic:{}", username),
            Some(Credentials::Bearer { .. }) => "bearer".to_string(),
        }
    }

    /// Authorization to send before any challenge is seen
    fn initial_authorization(&self, scope: &str) -> Option<Authorization> {
        if let Some(Credentials::Bearer { token }) = &self.credentials {
            return Some(Authorization::Bearer(token.clone()));
        }
        self.tokens
            .get(&self.registry, scope, &self.identity())
            .map(Authorization::Bearer)
    }

    /// Send a request, answering one authentication challenge if needed
    async fn send<F>(&self, scope: &str, target: &str, build: F) -> Result<Response, RegistryError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let initial = self.initial_authorization(scope);
        let mut request = build(&self.client);
        if let Some(auth) = &initial {
            request = auth.apply(request);
        }
        let response = request.send().await.map_err(|e| transport_error(target, e))?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        if matches!(self.credentials, Some(Credentials::Bearer { .. })) {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|h| h.to_str().ok())
            .and_then(parse_challenge);
        let challenge = match challenge {
            Some(challenge) => challenge,
            None => return Ok(response),
        };

        if initial.is_some() {
            // The cached token expired or lacks the scope
            self.tokens.invalidate(&self.registry, scope, &self.identity());
        }

        let auth = self.authorize(&challenge, scope, target).await?;
        debug!(registry = %self.registry, scope = %scope, "Retrying request with credentials");
        auth.apply(build(&self.client))
            .send()
            .await
            .map_err(|e| transport_error(target, e))
    }

    async fn authorize(
        &self,
        challenge: &Challenge,
        scope: &str,
        target: &str,
    ) -> Result<Authorization, RegistryError> {
        match challenge {
            Challenge::Basic => match &self.credentials {
                Some(Credentials::Basic { username, password }) => Ok(Authorization::Basic {
                    username: username.clone(),
                    password: password.clone(),
                }),
                _ => Err(RegistryError::unauthorized(
                    target,
                    "registry requires basic credentials",
                )),
            },
            Challenge::Bearer {
                realm,
                service,
                scope: challenge_scope,
            } => {
                let token = self
                    .fetch_token(
                        realm,
                        service.as_deref(),
                        challenge_scope.as_deref().unwrap_or(scope),
                        target,
                    )
                    .await?;
                self.tokens
                    .insert(&self.registry, scope, &self.identity(), token.clone());
                Ok(Authorization::Bearer(token))
            }
        }
    }

    /// Exchange credentials (or nothing) for a bearer token at `realm`
    async fn fetch_token(
        &self,
        realm: &str,
        service: Option<&str>,
        scope: &str,
        target: &str,
    ) -> Result<String, RegistryError> {
        let mut token_url = Url::parse(realm)
            .map_err(|e| RegistryError::rejected(target, format!("invalid token realm: {}", e)))?;
        {
            let mut query = token_url.query_pairs_mut();
            if let Some(service) = service {
                query.append_pair("service", service);
            }
            query.append_pair("scope", scope);
        }

        debug!("Requesting token from: {}", token_url);

        let mut request = self.client.get(token_url);
        if let Some(Credentials::Basic { username, password }) = &self.credentials {
            debug!("Using authenticated request for registry token");
            request = request.basic_auth(username, Some(password));
        } else {
            debug!("Using anonymous request for registry token");
        }

        let response = request.send().await.map_err(|e| transport_error(target, e))?;
        if !response.status().is_success() {
            return Err(match error_for(response, target).await {
                // A token endpoint 404 means bad credentials or scope, not a missing repository
                RegistryError::NotFound { target } => {
                    RegistryError::unauthorized(target, "token endpoint refused the request")
                }
                other => other,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| {
                RegistryError::transient(target, format!("failed to parse token response: {}", e))
            })?;
        token
            .into_token()
            .ok_or_else(|| RegistryError::unauthorized(target, "token response carried no token"))
    }
}

/// Check a blob's size and sha256 digest
fn verify_blob(descriptor: &Descriptor, data: &[u8], target: &str) -> Result<(), RegistryError> {
    if !descriptor.digest.starts_with("sha256:") {
        return Err(RegistryError::unsupported(
            target,
            format!("unsupported digest algorithm in {}", descriptor.digest),
        ));
    }
    if data.len() as u64 != descriptor.size {
        return Err(RegistryError::transient(
            target,
            format!("size mismatch: expected {}, got {}", descriptor.size, data.len()),
        ));
    }
    let actual = sha256_digest(data);
    if actual != descriptor.digest {
        return Err(RegistryError::transient(
            target,
            format!("digest mismatch: got {}", actual),
        ));
    }
    Ok(())
}

/// Parse Link header for pagination
/// Format: <https://ghcr.io/v2/repo/tags/list?n=100&last=tag>; rel="next"
fn parse_link_header(link: &str, base_url: &Url) -> Option<Url> {
    for part in link.split(',') {
        let part = part.trim();
        if part.contains("rel=\"next\"") || part.contains("rel=next") {
            let start = part.find('<')?;
            let end = part.find('>')?;
            // URL might be relative, resolve against the registry
            return base_url.join(&part[start + 1..end]).ok();
        }
    }
    None
}
