//! Mock registry helpers
//!
//! Mounts OCI Distribution endpoints on a wiremock server so the adapter
//! can be exercised without a real registry.

#![allow(dead_code)]

use std::sync::Arc;
use tagmirror_core::Keychain;
use tagmirror_registry::types::{sha256_digest, DOCKER_MANIFEST};
use tagmirror_registry::OciRegistry;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// `host:port` of a mock server, usable as a registry name
pub fn registry_host(server: &MockServer) -> String {
    server.address().to_string()
}

/// Adapter that reaches every given server over plain HTTP
pub fn registry_for(servers: &[&MockServer], keychain: Keychain) -> OciRegistry {
    OciRegistry::builder(Arc::new(keychain))
        .insecure(servers.iter().map(|s| registry_host(s)))
        .build()
        .unwrap()
}

/// One single-layer image with consistent digests
pub struct ImageFixture {
    pub manifest: Vec<u8>,
    pub manifest_digest: String,
    pub config: Vec<u8>,
    pub config_digest: String,
    pub layer: Vec<u8>,
    pub layer_digest: String,
}

impl ImageFixture {
    pub fn new(tag: &str) -> Self {
        let config = format!(r#"{{"architecture":"amd64","os":"linux","tag":"{}"}}"#, tag).into_bytes();
        let layer = format!("layer contents for {}", tag).into_bytes();
        let config_digest = sha256_digest(&config);
        let layer_digest = sha256_digest(&layer);

        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": DOCKER_MANIFEST,
            "config": {
                "mediaType": "application/vnd.docker.container.image.v1+json",
                "size": config.len(),
                "digest": config_digest,
            },
            "layers": [{
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "size": layer.len(),
                "digest": layer_digest,
            }],
        });
        let manifest = serde_json::to_vec(&manifest).unwrap();
        let manifest_digest = sha256_digest(&manifest);

        Self {
            manifest,
            manifest_digest,
            config,
            config_digest,
            layer,
            layer_digest,
        }
    }
}

/// Serve a complete tag list in one page
pub async fn mock_tags(server: &MockServer, repository: &str, tags: &[&str]) {
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/tags/list", repository)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": repository,
            "tags": tags,
        })))
        .mount(server)
        .await;
}

/// Serve a tag list split over two pages linked by a relative `Link`
pub async fn mock_paginated_tags(
    server: &MockServer,
    repository: &str,
    first: &[&str],
    second: &[&str],
) {
    let list_path = format!("/v2/{}/tags/list", repository);
    let last = first.last().copied().unwrap_or_default();

    Mock::given(method("GET"))
        .and(path(list_path.clone()))
        .and(query_param("last", last))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": repository,
            "tags": second,
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(list_path.clone()))
        .and(query_param_is_missing("last"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "Link",
                    format!(r#"<{}?n=1000&last={}>; rel="next""#, list_path, last).as_str(),
                )
                .set_body_json(serde_json::json!({
                    "name": repository,
                    "tags": first,
                })),
        )
        .mount(server)
        .await;
}

/// Answer with a distribution error body
pub async fn mock_error(
    server: &MockServer,
    http_method: &str,
    route: &str,
    status: u16,
    code: &str,
) {
    Mock::given(method(http_method))
        .and(path(route.to_string()))
        .respond_with(ResponseTemplate::new(status).set_body_json(serde_json::json!({
            "errors": [{ "code": code, "message": format!("{} error", code.to_lowercase()) }]
        })))
        .mount(server)
        .await;
}

/// Serve an image's manifest and blobs for pulling
pub async fn mock_image(server: &MockServer, repository: &str, tag: &str, image: &ImageFixture) {
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/manifests/{}", repository, tag)))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", DOCKER_MANIFEST)
                .insert_header("Docker-Content-Digest", image.manifest_digest.as_str())
                .set_body_bytes(image.manifest.clone()),
        )
        .mount(server)
        .await;

    for (digest, data) in [
        (&image.config_digest, &image.config),
        (&image.layer_digest, &image.layer),
    ] {
        Mock::given(method("GET"))
            .and(path(format!("/v2/{}/blobs/{}", repository, digest)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
            .mount(server)
            .await;
    }
}

/// Accept blob uploads and manifest pushes for a repository
pub async fn mock_push_target(server: &MockServer, repository: &str) {
    Mock::given(method("HEAD"))
        .and(path_regex_for(&format!("/v2/{}/blobs/", repository)))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;

    let upload_path = format!("/v2/{}/blobs/uploads/session-1", repository);
    Mock::given(method("POST"))
        .and(path(format!("/v2/{}/blobs/uploads/", repository)))
        .respond_with(ResponseTemplate::new(202).insert_header("Location", upload_path.as_str()))
        .mount(server)
        .await;

    Mock::given(method("PUT"))
        .and(path(upload_path))
        .respond_with(ResponseTemplate::new(201))
        .mount(server)
        .await;

    Mock::given(method("PUT"))
        .and(path_regex_for(&format!("/v2/{}/manifests/", repository)))
        .respond_with(ResponseTemplate::new(201))
        .mount(server)
        .await;
}

/// Matches one path segment under `prefix`, which must be regex-safe
fn path_regex_for(prefix: &str) -> wiremock::matchers::PathRegexMatcher {
    wiremock::matchers::path_regex(format!("^{}[^/]+$", prefix))
}
