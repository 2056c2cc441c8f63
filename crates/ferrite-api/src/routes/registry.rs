//! Distribution API (v2) routes

use std::net::IpAddr;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post, put},
};
use bytes::Bytes;
use ferrite_auth::{Access, Credentials};
use ferrite_core::{
    Descriptor, DistributionError, MEDIA_TYPE_OCTET_STREAM, ManifestVariant, Repository,
};
use ferrite_reference::{Digest, Name, Tag};
use ferrite_storage::{ByteStream, UrlOptions};
use futures::StreamExt;
use serde::Deserialize;
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

/// Query parameters for upload start and completion
#[derive(Deserialize)]
pub struct UploadQuery {
    digest: Option<String>,
    mount: Option<String>,
    from: Option<String>,
}

/// Pagination for catalog and tag listings
#[derive(Deserialize)]
pub struct Pagination {
    n: Option<usize>,
    last: Option<String>,
}

/// Create registry routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v2/", get(version_check))
        .route("/v2/_catalog", get(get_catalog))
        // Wildcards capture multi-segment repository names like team/app.
        .route("/v2/{*path}", get(handle_get_request))
        .route("/v2/{*path}", put(handle_put_request))
        .route("/v2/{*path}", post(handle_post_request))
        .route("/v2/{*path}", patch(handle_patch_request))
        .route("/v2/{*path}", delete(handle_delete_request))
}

// ==================== Path dispatch ====================

enum RegistryRequest {
    Manifest { name: Name, reference: String },
    Blob { name: Name, digest: Digest },
    StartUpload { name: Name },
    Upload { name: Name, id: String },
    TagsList { name: Name },
}

fn parse_name(raw: &str) -> Result<Name, ApiError> {
    Name::parse(raw).map_err(|e| ApiError::Distribution(DistributionError::Reference(e)))
}

fn parse_digest(raw: &str) -> Result<Digest, ApiError> {
    Digest::parse(raw).map_err(|e| ApiError::Distribution(DistributionError::Digest(e)))
}

/// Split a wildcard path into repository name and operation.
fn parse_registry_path(path: &str) -> Result<RegistryRequest, ApiError> {
    if let Some(name) = path.strip_suffix("/tags/list") {
        return Ok(RegistryRequest::TagsList {
            name: parse_name(name)?,
        });
    }

    if let Some(idx) = path.rfind("/blobs/uploads/") {
        let name = parse_name(&path[..idx])?;
        let id = &path[idx + "/blobs/uploads/".len()..];
        return Ok(if id.is_empty() {
            RegistryRequest::StartUpload { name }
        } else {
            RegistryRequest::Upload {
                name,
                id: id.to_string(),
            }
        });
    }

    if let Some(idx) = path.rfind("/blobs/uploads") {
        // POST targets may arrive without the trailing slash.
        if path.len() == idx + "/blobs/uploads".len() {
            return Ok(RegistryRequest::StartUpload {
                name: parse_name(&path[..idx])?,
            });
        }
    }

    if let Some(idx) = path.rfind("/manifests/") {
        let name = parse_name(&path[..idx])?;
        let reference = &path[idx + "/manifests/".len()..];
        if reference.is_empty() {
            return Err(ApiError::NotFound(path.to_string()));
        }
        return Ok(RegistryRequest::Manifest {
            name,
            reference: reference.to_string(),
        });
    }

    if let Some(idx) = path.rfind("/blobs/") {
        let name = parse_name(&path[..idx])?;
        let digest = parse_digest(&path[idx + "/blobs/".len()..])?;
        return Ok(RegistryRequest::Blob { name, digest });
    }

    Err(ApiError::NotFound(path.to_string()))
}

enum ManifestRef {
    Tag(Tag),
    Digest(Digest),
}

fn parse_manifest_ref(reference: &str) -> Result<ManifestRef, ApiError> {
    if reference.contains(':') {
        Ok(ManifestRef::Digest(parse_digest(reference)?))
    } else {
        let tag = reference
            .parse::<Tag>()
            .map_err(|e| ApiError::Distribution(DistributionError::Reference(e)))?;
        Ok(ManifestRef::Tag(tag))
    }
}

// ==================== Helpers ====================

async fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    accesses: &[Access],
) -> Result<(), ApiError> {
    if let Some(controller) = &state.auth {
        let credentials = Credentials {
            authorization: headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        };
        controller.authorized(&credentials, accesses).await?;
    }
    Ok(())
}

fn repository(state: &AppState, name: &Name) -> Result<Repository, ApiError> {
    Ok(state.registry.repository(name)?)
}

fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Render the upload progress range as `0-<last byte>`.
fn upload_range(offset: u64) -> String {
    if offset == 0 {
        "0-0".to_string()
    } else {
        format!("0-{}", offset - 1)
    }
}

fn paginate(items: Vec<String>, pagination: &Pagination) -> Vec<String> {
    let skipped: Vec<String> = match &pagination.last {
        Some(last) => items.into_iter().filter(|item| item > last).collect(),
        None => items,
    };
    match pagination.n {
        Some(n) => skipped.into_iter().take(n).collect(),
        None => skipped,
    }
}

/// Single-range parse for blob GETs: `bytes=<start>-[<end>]`.
fn parse_byte_range(headers: &HeaderMap, size: u64) -> Result<Option<(u64, u64)>, ApiError> {
    let Some(raw) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };
    let spec = raw
        .strip_prefix("bytes=")
        .ok_or(ApiError::Distribution(DistributionError::InvalidRange))?;
    let (start, end) = spec
        .split_once('-')
        .ok_or(ApiError::Distribution(DistributionError::InvalidRange))?;
    let start: u64 = start
        .parse()
        .map_err(|_| ApiError::Distribution(DistributionError::InvalidRange))?;
    let end: u64 = match end {
        "" => size.saturating_sub(1),
        end => end
            .parse()
            .map_err(|_| ApiError::Distribution(DistributionError::InvalidRange))?,
    };
    if start > end || end >= size {
        return Err(ApiError::Distribution(DistributionError::InvalidRange));
    }
    Ok(Some((start, end)))
}

/// Truncate a stream to `limit` bytes.
fn clip_stream(stream: ByteStream, limit: u64) -> ByteStream {
    Box::pin(stream.scan(limit, |remaining, chunk| {
        let item = match chunk {
            Ok(bytes) => {
                if *remaining == 0 {
                    None
                } else {
                    let take = (*remaining).min(bytes.len() as u64) as usize;
                    *remaining -= take as u64;
                    Some(Ok(bytes.slice(..take)))
                }
            }
            Err(err) => Some(Err(err)),
        };
        std::future::ready(item)
    }))
}

// ==================== Version check and catalog ====================

/// GET /v2/ - API version probe
async fn version_check(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(err) = authorize(&state, &headers, &[]).await {
        return err.into_response();
    }
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/json"),
            (
                header::HeaderName::from_static("docker-distribution-api-version"),
                "registry/2.0",
            ),
        ],
        "{}",
    )
        .into_response()
}

/// GET /v2/_catalog - repository listing
async fn get_catalog(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    authorize(
        &state,
        &headers,
        &[Access {
            resource: ferrite_auth::Resource {
                kind: "registry".to_string(),
                name: "catalog".to_string(),
            },
            action: "*".to_string(),
        }],
    )
    .await?;

    let repositories = paginate(state.registry.catalog().await?, &pagination);
    Ok((
        StatusCode::OK,
        axum::Json(serde_json::json!({ "repositories": repositories })),
    )
        .into_response())
}

// ==================== GET / HEAD ====================

async fn handle_get_request(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(pagination): Query<Pagination>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    match parse_registry_path(&path)? {
        RegistryRequest::Manifest { name, reference } => {
            authorize(&state, &headers, &[Access::repository(name.to_string(), "pull")]).await?;
            get_manifest(&state, &name, &reference).await
        }
        RegistryRequest::Blob { name, digest } => {
            authorize(&state, &headers, &[Access::repository(name.to_string(), "pull")]).await?;
            get_blob(&state, &name, &digest, &method, &headers).await
        }
        RegistryRequest::Upload { name, id } => {
            authorize(&state, &headers, &[Access::repository(name.to_string(), "pull")]).await?;
            let repo = repository(&state, &name)?;
            let offset = repo.blobs().upload_status(&id).await?;

            let mut response = StatusCode::NO_CONTENT.into_response();
            let headers = response.headers_mut();
            headers.insert(
                header::LOCATION,
                header_value(&format!("/v2/{name}/blobs/uploads/{id}")),
            );
            headers.insert("Docker-Upload-UUID", header_value(&id));
            headers.insert(header::RANGE, header_value(&upload_range(offset)));
            Ok(response)
        }
        RegistryRequest::TagsList { name } => {
            authorize(&state, &headers, &[Access::repository(name.to_string(), "pull")]).await?;
            let repo = repository(&state, &name)?;
            let tags = paginate(repo.tags().all().await?, &pagination);
            Ok((
                StatusCode::OK,
                axum::Json(serde_json::json!({ "name": name.to_string(), "tags": tags })),
            )
                .into_response())
        }
        RegistryRequest::StartUpload { .. } => Err(ApiError::MethodNotAllowed),
    }
}

async fn get_manifest(
    state: &AppState,
    name: &Name,
    reference: &str,
) -> Result<Response, ApiError> {
    let repo = repository(state, name)?;
    let digest = match parse_manifest_ref(reference)? {
        ManifestRef::Digest(digest) => digest,
        ManifestRef::Tag(tag) => repo.tags().resolve(tag.as_str()).await?,
    };
    let manifest = repo.manifests().get(&digest).await?;

    debug!("serving manifest {digest} for {name}");
    let raw = manifest.raw().clone();
    let mut response = (StatusCode::OK, raw).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, header_value(manifest.media_type()));
    headers.insert("Docker-Content-Digest", header_value(&digest.to_string()));
    Ok(response)
}

async fn get_blob(
    state: &AppState,
    name: &Name,
    digest: &Digest,
    method: &Method,
    headers: &HeaderMap,
) -> Result<Response, ApiError> {
    let repo = repository(state, name)?;
    let blobs = repo.blobs();
    let desc = blobs.stat(digest).await?;
    let size = desc.size.max(0) as u64;

    if method == Method::HEAD {
        let mut response = StatusCode::OK.into_response();
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, header_value(&desc.media_type));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
        headers.insert("Docker-Content-Digest", header_value(&digest.to_string()));
        return Ok(response);
    }

    // Offloaded download: hand out a URL when the driver stack supports it.
    if !state.disable_redirect {
        let options = UrlOptions {
            method: "GET".to_string(),
            expiry: None,
            client_ip: client_ip(headers),
        };
        if let Some(url) = blobs.url_for(digest, &options).await? {
            debug!("redirecting blob {digest} to {url}");
            let mut response = StatusCode::TEMPORARY_REDIRECT.into_response();
            let headers = response.headers_mut();
            headers.insert(header::LOCATION, header_value(&url));
            headers.insert("Docker-Content-Digest", header_value(&digest.to_string()));
            return Ok(response);
        }
    }

    let range = parse_byte_range(headers, size)?;
    let (status, stream, length, content_range) = match range {
        Some((start, end)) => {
            let stream = clip_stream(blobs.reader(digest, start).await?, end - start + 1);
            (
                StatusCode::PARTIAL_CONTENT,
                stream,
                end - start + 1,
                Some(format!("bytes {start}-{end}/{size}")),
            )
        }
        None => (StatusCode::OK, blobs.open(digest).await?, size, None),
    };

    let body = axum::body::Body::from_stream(stream);
    let mut response = (status, body).into_response();
    let resp_headers = response.headers_mut();
    resp_headers.insert(header::CONTENT_TYPE, header_value(&desc.media_type));
    resp_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    resp_headers.insert("Docker-Content-Digest", header_value(&digest.to_string()));
    if let Some(content_range) = content_range {
        resp_headers.insert(header::CONTENT_RANGE, header_value(&content_range));
    }
    Ok(response)
}

// ==================== PUT ====================

async fn handle_put_request(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    match parse_registry_path(&path)? {
        RegistryRequest::Manifest { name, reference } => {
            authorize(&state, &headers, &[Access::repository(name.to_string(), "push")]).await?;
            put_manifest(&state, &name, &reference, &headers, body).await
        }
        RegistryRequest::Upload { name, id } => {
            authorize(&state, &headers, &[Access::repository(name.to_string(), "push")]).await?;
            let digest = query
                .digest
                .as_deref()
                .ok_or_else(|| ApiError::BadRequest("digest parameter is required".to_string()))?;
            let digest = parse_digest(digest)?;

            let repo = repository(&state, &name)?;
            let blobs = repo.blobs();
            let mut writer = blobs.resume_upload(&id).await?;
            if !body.is_empty() {
                writer.write_chunk(&body).await?;
            }
            let desc = blobs
                .commit_upload(
                    &mut writer,
                    Descriptor::new(MEDIA_TYPE_OCTET_STREAM, digest, 0),
                )
                .await?;
            Ok(created_blob_response(&name, &desc.digest))
        }
        _ => Err(ApiError::MethodNotAllowed),
    }
}

async fn put_manifest(
    state: &AppState,
    name: &Name,
    reference: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let media_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let manifest = ManifestVariant::from_bytes(media_type, body)?;

    let repo = repository(state, name)?;
    let manifest_ref = parse_manifest_ref(reference)?;

    // A digest-addressed push must agree with the body before anything is
    // stored.
    if let ManifestRef::Digest(requested) = &manifest_ref {
        let actual = manifest.digest();
        if *requested != actual {
            return Err(ApiError::Distribution(DistributionError::DigestMismatch {
                expected: requested.clone(),
                actual,
            }));
        }
    }
    let tag_hint = match &manifest_ref {
        ManifestRef::Tag(tag) => Some(tag.as_str()),
        ManifestRef::Digest(_) => None,
    };

    let digest = repo.manifests().put(&manifest, tag_hint).await?;
    if let ManifestRef::Tag(tag) = manifest_ref {
        repo.tags().tag(tag.as_str(), &digest).await?;
    }

    let mut response = StatusCode::CREATED.into_response();
    let resp_headers = response.headers_mut();
    resp_headers.insert(
        header::LOCATION,
        header_value(&format!("/v2/{name}/manifests/{digest}")),
    );
    resp_headers.insert("Docker-Content-Digest", header_value(&digest.to_string()));
    Ok(response)
}

// ==================== POST ====================

async fn handle_post_request(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let RegistryRequest::StartUpload { name } = parse_registry_path(&path)? else {
        return Err(ApiError::MethodNotAllowed);
    };
    authorize(&state, &headers, &[Access::repository(name.to_string(), "push")]).await?;

    let repo = repository(&state, &name)?;
    let blobs = repo.blobs();

    // Cross-repository mount: link the existing blob, no bytes transferred.
    // A failed mount falls back to a regular upload session.
    if let Some(mount) = &query.mount {
        let digest = parse_digest(mount)?;
        let from = query
            .from
            .as_deref()
            .map(parse_name)
            .transpose()?;
        match blobs.mount(from.as_ref(), &digest).await {
            Ok(desc) => return Ok(created_blob_response(&name, &desc.digest)),
            Err(err) if err.is_not_found() => {
                debug!("mount of {digest} failed, falling back to upload");
            }
            Err(err) => return Err(err.into()),
        }
    }

    // Monolithic push: the whole blob rides along with the POST.
    if let Some(digest) = &query.digest {
        let digest = parse_digest(digest)?;
        let mut writer = blobs.create_upload().await?;
        writer.write_chunk(&body).await?;
        let desc = blobs
            .commit_upload(
                &mut writer,
                Descriptor::new(MEDIA_TYPE_OCTET_STREAM, digest, body.len() as i64),
            )
            .await?;
        return Ok(created_blob_response(&name, &desc.digest));
    }

    let writer = blobs.create_upload().await?;
    let id = writer.id().to_string();
    debug!("started upload {id} for {name}");

    let mut response = StatusCode::ACCEPTED.into_response();
    let resp_headers = response.headers_mut();
    resp_headers.insert(
        header::LOCATION,
        header_value(&format!("/v2/{name}/blobs/uploads/{id}")),
    );
    resp_headers.insert("Docker-Upload-UUID", header_value(&id));
    resp_headers.insert(header::RANGE, HeaderValue::from_static("0-0"));
    Ok(response)
}

fn created_blob_response(name: &Name, digest: &Digest) -> Response {
    let mut response = StatusCode::CREATED.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::LOCATION,
        header_value(&format!("/v2/{name}/blobs/{digest}")),
    );
    headers.insert("Docker-Content-Digest", header_value(&digest.to_string()));
    response
}

// ==================== PATCH ====================

async fn handle_patch_request(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let RegistryRequest::Upload { name, id } = parse_registry_path(&path)? else {
        return Err(ApiError::MethodNotAllowed);
    };
    authorize(&state, &headers, &[Access::repository(name.to_string(), "push")]).await?;

    let repo = repository(&state, &name)?;
    let mut writer = repo.blobs().resume_upload(&id).await?;

    // An out-of-order chunk is rejected with the current progress so the
    // client can requery and resume.
    if let Some(range) = headers.get(header::CONTENT_RANGE).and_then(|v| v.to_str().ok()) {
        let start = range
            .trim_start_matches("bytes ")
            .split('-')
            .next()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or(ApiError::Distribution(DistributionError::InvalidRange))?;
        if start != writer.size() {
            return Err(ApiError::Distribution(DistributionError::InvalidRange));
        }
    }

    let offset = writer.write_chunk(&body).await?;
    writer.checkpoint().await?;
    writer.close().await?;
    debug!("upload {id} now at offset {offset}");

    let mut response = StatusCode::ACCEPTED.into_response();
    let resp_headers = response.headers_mut();
    resp_headers.insert(
        header::LOCATION,
        header_value(&format!("/v2/{name}/blobs/uploads/{id}")),
    );
    resp_headers.insert("Docker-Upload-UUID", header_value(&id));
    resp_headers.insert(header::RANGE, header_value(&upload_range(offset)));
    Ok(response)
}

// ==================== DELETE ====================

async fn handle_delete_request(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    match parse_registry_path(&path)? {
        RegistryRequest::Manifest { name, reference } => {
            if !state.delete_enabled {
                return Err(ApiError::MethodNotAllowed);
            }
            authorize(&state, &headers, &[Access::repository(name.to_string(), "delete")])
                .await?;
            let repo = repository(&state, &name)?;
            // Deletion is digest-addressed only; a tag here is a client bug,
            // not a request to drop the tag pointer.
            let digest = parse_digest(&reference)?;
            idempotent_delete(repo.manifests().delete(&digest).await, StatusCode::ACCEPTED)
        }
        RegistryRequest::Blob { name, digest } => {
            if !state.delete_enabled {
                return Err(ApiError::MethodNotAllowed);
            }
            authorize(&state, &headers, &[Access::repository(name.to_string(), "delete")])
                .await?;
            let repo = repository(&state, &name)?;
            idempotent_delete(repo.blobs().delete(&digest).await, StatusCode::ACCEPTED)
        }
        RegistryRequest::Upload { name, id } => {
            authorize(&state, &headers, &[Access::repository(name.to_string(), "push")]).await?;
            let repo = repository(&state, &name)?;
            idempotent_delete(
                repo.blobs().cancel_upload(&id).await,
                StatusCode::NO_CONTENT,
            )
        }
        _ => Err(ApiError::MethodNotAllowed),
    }
}

/// Deleting something already gone is success.
fn idempotent_delete(
    result: Result<(), DistributionError>,
    status: StatusCode,
) -> Result<Response, ApiError> {
    match result {
        Ok(()) => Ok(status.into_response()),
        Err(err) if err.is_not_found() => Ok(status.into_response()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod protocol_tests {
    use super::routes;
    use crate::state::AppState;
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use bytes::Bytes;
    use ferrite_core::Registry;
    use ferrite_reference::{Algorithm, Digest};
    use ferrite_storage::InMemoryDriver;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let registry = Arc::new(Registry::new(Arc::new(InMemoryDriver::new()), None));
        routes().with_state(AppState::new(registry, None, false))
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: Bytes,
    ) -> (StatusCode, axum::http::HeaderMap, Bytes) {
        let mut request = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = app
            .clone()
            .oneshot(request.body(Body::from(body)).unwrap())
            .await
            .unwrap();
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        (parts.status, parts.headers, bytes)
    }

    fn location(headers: &axum::http::HeaderMap) -> String {
        headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    #[tokio::test]
    async fn test_version_probe() {
        let app = app();
        let (status, headers, body) = send(&app, "GET", "/v2/", &[], Bytes::new()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            headers.get("docker-distribution-api-version").unwrap(),
            "registry/2.0"
        );
        assert_eq!(&body[..], b"{}");
    }

    #[tokio::test]
    async fn test_monolithic_push_then_pull() {
        let app = app();
        let payload = Bytes::from(vec![0x5au8; 1024]);
        let digest = Digest::from_bytes(Algorithm::Sha256, &payload);

        let (status, headers, _) = send(
            &app,
            "POST",
            &format!("/v2/foo/bar/blobs/uploads/?digest={digest}"),
            &[],
            payload.clone(),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(location(&headers), format!("/v2/foo/bar/blobs/{digest}"));

        let (status, headers, body) = send(
            &app,
            "GET",
            &format!("/v2/foo/bar/blobs/{digest}"),
            &[],
            Bytes::new(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            headers.get("docker-content-digest").unwrap().to_str().unwrap(),
            digest.to_string()
        );
        assert_eq!(body, payload);
    }

    #[tokio::test]
    async fn test_chunked_push_with_resume() {
        let app = app();
        let first = vec![1u8; 512];
        let second = vec![2u8; 512];
        let mut payload = first.clone();
        payload.extend_from_slice(&second);
        let digest = Digest::from_bytes(Algorithm::Sha256, &payload);

        let (status, headers, _) =
            send(&app, "POST", "/v2/foo/bar/blobs/uploads/", &[], Bytes::new()).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let upload_url = location(&headers);

        let (status, headers, _) =
            send(&app, "PATCH", &upload_url, &[], Bytes::from(first)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(headers.get(header::RANGE).unwrap(), "0-511");

        // Client disconnects; the status endpoint reports progress.
        let (status, headers, _) = send(&app, "GET", &upload_url, &[], Bytes::new()).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(headers.get(header::RANGE).unwrap(), "0-511");

        let (status, _, _) = send(
            &app,
            "PATCH",
            &upload_url,
            &[("content-range", "512-1023")],
            Bytes::from(second),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, headers, _) = send(
            &app,
            "PUT",
            &format!("{upload_url}?digest={digest}"),
            &[],
            Bytes::new(),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(location(&headers), format!("/v2/foo/bar/blobs/{digest}"));
    }

    #[tokio::test]
    async fn test_out_of_order_chunk_rejected() {
        let app = app();
        let (_, headers, _) =
            send(&app, "POST", "/v2/foo/bar/blobs/uploads/", &[], Bytes::new()).await;
        let upload_url = location(&headers);

        let (status, _, _) = send(
            &app,
            "PATCH",
            &upload_url,
            &[("content-range", "100-131")],
            Bytes::from(vec![0u8; 32]),
        )
        .await;
        assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
    }

    #[tokio::test]
    async fn test_digest_mismatch_keeps_session_open() {
        let app = app();
        let (_, headers, _) =
            send(&app, "POST", "/v2/foo/bar/blobs/uploads/", &[], Bytes::new()).await;
        let upload_url = location(&headers);

        let (status, _, _) =
            send(&app, "PATCH", &upload_url, &[], Bytes::from_static(b"hello")).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let wrong = format!("sha256:{}", "0".repeat(64));
        let (status, _, body) = send(
            &app,
            "PUT",
            &format!("{upload_url}?digest={wrong}"),
            &[],
            Bytes::new(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let errors: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(errors["errors"][0]["code"], "DIGEST_INVALID");

        // Session is still OPEN with its offset intact.
        let (status, headers, _) = send(&app, "GET", &upload_url, &[], Bytes::new()).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(headers.get(header::RANGE).unwrap(), "0-4");
    }

    #[tokio::test]
    async fn test_cross_repository_mount() {
        let app = app();
        let payload = Bytes::from_static(b"shared layer bytes");
        let digest = Digest::from_bytes(Algorithm::Sha256, &payload);

        let (status, _, _) = send(
            &app,
            "POST",
            &format!("/v2/alice/app/blobs/uploads/?digest={digest}"),
            &[],
            payload,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, headers, _) = send(
            &app,
            "POST",
            &format!("/v2/bob/app/blobs/uploads/?mount={digest}&from=alice/app"),
            &[],
            Bytes::new(),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(location(&headers), format!("/v2/bob/app/blobs/{digest}"));

        let (status, _, _) = send(
            &app,
            "HEAD",
            &format!("/v2/bob/app/blobs/{digest}"),
            &[],
            Bytes::new(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_tag_overwrite_keeps_history() {
        let app = app();

        // Push config and layer blobs, then two manifests under one tag.
        let config = Bytes::from_static(b"{}");
        let config_digest = Digest::from_bytes(Algorithm::Sha256, &config);
        send(
            &app,
            "POST",
            &format!("/v2/x/y/blobs/uploads/?digest={config_digest}"),
            &[],
            config,
        )
        .await;

        let mut digests = Vec::new();
        for layer_content in [&b"layer one"[..], &b"layer two"[..]] {
            let layer_digest = Digest::from_bytes(Algorithm::Sha256, layer_content);
            send(
                &app,
                "POST",
                &format!("/v2/x/y/blobs/uploads/?digest={layer_digest}"),
                &[],
                Bytes::copy_from_slice(layer_content),
            )
            .await;

            let manifest = format!(
                r#"{{"schemaVersion":2,"mediaType":"application/vnd.oci.image.manifest.v1+json","config":{{"mediaType":"application/vnd.oci.image.config.v1+json","digest":"{config_digest}","size":2}},"layers":[{{"mediaType":"application/vnd.oci.image.layer.v1.tar","digest":"{layer_digest}","size":9}}]}}"#
            );
            let (status, headers, _) = send(
                &app,
                "PUT",
                "/v2/x/y/manifests/latest",
                &[("content-type", "application/vnd.oci.image.manifest.v1+json")],
                Bytes::from(manifest),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
            digests.push(
                headers
                    .get("docker-content-digest")
                    .unwrap()
                    .to_str()
                    .unwrap()
                    .to_string(),
            );
        }

        let (status, _, body) = send(&app, "GET", "/v2/x/y/tags/list", &[], Bytes::new()).await;
        assert_eq!(status, StatusCode::OK);
        let listing: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(listing["tags"], serde_json::json!(["latest"]));

        // The tag resolves to the second manifest.
        let (_, headers, _) =
            send(&app, "GET", "/v2/x/y/manifests/latest", &[], Bytes::new()).await;
        assert_eq!(
            headers.get("docker-content-digest").unwrap().to_str().unwrap(),
            digests[1]
        );

        // The first revision is still fetchable by digest.
        let (status, _, _) = send(
            &app,
            "GET",
            &format!("/v2/x/y/manifests/{}", digests[0]),
            &[],
            Bytes::new(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_manifest_with_missing_blob_rejected() {
        let app = app();
        let missing = Digest::from_bytes(Algorithm::Sha256, b"never pushed");
        let manifest = format!(
            r#"{{"schemaVersion":2,"mediaType":"application/vnd.oci.image.manifest.v1+json","config":{{"mediaType":"application/vnd.oci.image.config.v1+json","digest":"{missing}","size":1}},"layers":[]}}"#
        );
        let (status, _, body) = send(
            &app,
            "PUT",
            "/v2/x/y/manifests/latest",
            &[("content-type", "application/vnd.oci.image.manifest.v1+json")],
            Bytes::from(manifest),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let errors: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(errors["errors"][0]["code"], "MANIFEST_BLOB_UNKNOWN");
    }

    #[tokio::test]
    async fn test_catalog_lists_repositories() {
        let app = app();
        let payload = Bytes::from_static(b"seed");
        let digest = Digest::from_bytes(Algorithm::Sha256, &payload);
        for name in ["alpha/app", "beta/app"] {
            send(
                &app,
                "POST",
                &format!("/v2/{name}/blobs/uploads/?digest={digest}"),
                &[],
                payload.clone(),
            )
            .await;
        }

        let (status, _, body) = send(&app, "GET", "/v2/_catalog", &[], Bytes::new()).await;
        assert_eq!(status, StatusCode::OK);
        let listing: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            listing["repositories"],
            serde_json::json!(["alpha/app", "beta/app"])
        );
    }

    #[tokio::test]
    async fn test_unknown_blob_is_404() {
        let app = app();
        let digest = Digest::from_bytes(Algorithm::Sha256, b"ghost");
        let (status, _, body) = send(
            &app,
            "GET",
            &format!("/v2/foo/bar/blobs/{digest}"),
            &[],
            Bytes::new(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let errors: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(errors["errors"][0]["code"], "BLOB_UNKNOWN");
    }

    #[tokio::test]
    async fn test_upload_cancel() {
        let app = app();
        let (_, headers, _) =
            send(&app, "POST", "/v2/foo/bar/blobs/uploads/", &[], Bytes::new()).await;
        let upload_url = location(&headers);

        let (status, _, _) = send(&app, "DELETE", &upload_url, &[], Bytes::new()).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _, _) = send(&app, "GET", &upload_url, &[], Bytes::new()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    /// Push a config blob, a layer blob, and a manifest tagged `latest`
    /// into `x/y`, returning the manifest digest.
    async fn seed_manifest(app: &Router) -> String {
        let config = Bytes::from_static(b"{}");
        let config_digest = Digest::from_bytes(Algorithm::Sha256, &config);
        send(
            app,
            "POST",
            &format!("/v2/x/y/blobs/uploads/?digest={config_digest}"),
            &[],
            config,
        )
        .await;

        let layer = Bytes::from_static(b"layer bytes");
        let layer_digest = Digest::from_bytes(Algorithm::Sha256, &layer);
        send(
            app,
            "POST",
            &format!("/v2/x/y/blobs/uploads/?digest={layer_digest}"),
            &[],
            layer,
        )
        .await;

        let manifest = format!(
            r#"{{"schemaVersion":2,"mediaType":"application/vnd.oci.image.manifest.v1+json","config":{{"mediaType":"application/vnd.oci.image.config.v1+json","digest":"{config_digest}","size":2}},"layers":[{{"mediaType":"application/vnd.oci.image.layer.v1.tar","digest":"{layer_digest}","size":11}}]}}"#
        );
        let (status, headers, _) = send(
            app,
            "PUT",
            "/v2/x/y/manifests/latest",
            &[("content-type", "application/vnd.oci.image.manifest.v1+json")],
            Bytes::from(manifest),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        headers
            .get("docker-content-digest")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_delete_manifest_by_digest() {
        let app = app();
        let digest = seed_manifest(&app).await;

        let (status, _, _) = send(
            &app,
            "DELETE",
            &format!("/v2/x/y/manifests/{digest}"),
            &[],
            Bytes::new(),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, _, _) = send(
            &app,
            "GET",
            &format!("/v2/x/y/manifests/{digest}"),
            &[],
            Bytes::new(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Deleting an already-deleted revision is still success.
        let (status, _, _) = send(
            &app,
            "DELETE",
            &format!("/v2/x/y/manifests/{digest}"),
            &[],
            Bytes::new(),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_delete_manifest_rejects_tag_reference() {
        let app = app();
        seed_manifest(&app).await;

        let (status, _, body) =
            send(&app, "DELETE", "/v2/x/y/manifests/latest", &[], Bytes::new()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let errors: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(errors["errors"][0]["code"], "DIGEST_INVALID");

        // The tag is untouched.
        let (status, _, _) =
            send(&app, "GET", "/v2/x/y/manifests/latest", &[], Bytes::new()).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_delete_blob_link() {
        let app = app();
        let payload = Bytes::from_static(b"deletable layer");
        let digest = Digest::from_bytes(Algorithm::Sha256, &payload);
        send(
            &app,
            "POST",
            &format!("/v2/foo/bar/blobs/uploads/?digest={digest}"),
            &[],
            payload,
        )
        .await;

        let (status, _, _) = send(
            &app,
            "DELETE",
            &format!("/v2/foo/bar/blobs/{digest}"),
            &[],
            Bytes::new(),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, _, body) = send(
            &app,
            "GET",
            &format!("/v2/foo/bar/blobs/{digest}"),
            &[],
            Bytes::new(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let errors: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(errors["errors"][0]["code"], "BLOB_UNKNOWN");

        // Idempotent: the link is already gone.
        let (status, _, _) = send(
            &app,
            "DELETE",
            &format!("/v2/foo/bar/blobs/{digest}"),
            &[],
            Bytes::new(),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_delete_disabled() {
        let registry = Arc::new(Registry::new(Arc::new(InMemoryDriver::new()), None));
        let app = routes().with_state(
            AppState::new(registry, None, false).with_delete_enabled(false),
        );

        let digest = seed_manifest(&app).await;
        let (status, _, _) = send(
            &app,
            "DELETE",
            &format!("/v2/x/y/manifests/{digest}"),
            &[],
            Bytes::new(),
        )
        .await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let blob_digest = Digest::from_bytes(Algorithm::Sha256, b"{}");
        let (status, _, _) = send(
            &app,
            "DELETE",
            &format!("/v2/x/y/blobs/{blob_digest}"),
            &[],
            Bytes::new(),
        )
        .await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        // Upload cancellation is session cleanup, not content deletion, and
        // stays available.
        let (_, headers, _) =
            send(&app, "POST", "/v2/x/y/blobs/uploads/", &[], Bytes::new()).await;
        let (status, _, _) = send(&app, "DELETE", &location(&headers), &[], Bytes::new()).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_reference::Algorithm;

    #[test]
    fn test_parse_registry_paths() {
        let digest = Digest::from_bytes(Algorithm::Sha256, b"x");

        match parse_registry_path("library/app/manifests/latest").unwrap() {
            RegistryRequest::Manifest { name, reference } => {
                assert_eq!(name.to_string(), "library/app");
                assert_eq!(reference, "latest");
            }
            _ => panic!("expected manifest request"),
        }

        match parse_registry_path(&format!("a/b/blobs/{digest}")).unwrap() {
            RegistryRequest::Blob { name, digest: d } => {
                assert_eq!(name.to_string(), "a/b");
                assert_eq!(d, digest);
            }
            _ => panic!("expected blob request"),
        }

        assert!(matches!(
            parse_registry_path("a/b/blobs/uploads/").unwrap(),
            RegistryRequest::StartUpload { .. }
        ));
        assert!(matches!(
            parse_registry_path("a/b/blobs/uploads").unwrap(),
            RegistryRequest::StartUpload { .. }
        ));

        match parse_registry_path("a/b/blobs/uploads/some-uuid").unwrap() {
            RegistryRequest::Upload { id, .. } => assert_eq!(id, "some-uuid"),
            _ => panic!("expected upload request"),
        }

        assert!(matches!(
            parse_registry_path("team/app/tags/list").unwrap(),
            RegistryRequest::TagsList { .. }
        ));

        assert!(parse_registry_path("justaname").is_err());
        assert!(parse_registry_path("UPPER/case/manifests/latest").is_err());
    }

    #[test]
    fn test_parse_manifest_ref() {
        let digest = Digest::from_bytes(Algorithm::Sha256, b"m");
        assert!(matches!(
            parse_manifest_ref(&digest.to_string()).unwrap(),
            ManifestRef::Digest(_)
        ));
        assert!(matches!(
            parse_manifest_ref("v1.2").unwrap(),
            ManifestRef::Tag(_)
        ));
        assert!(parse_manifest_ref("sha256:zzz").is_err());
        assert!(parse_manifest_ref(".bad").is_err());
    }

    #[test]
    fn test_upload_range_rendering() {
        assert_eq!(upload_range(0), "0-0");
        assert_eq!(upload_range(512), "0-511");
        assert_eq!(upload_range(1024), "0-1023");
    }

    #[test]
    fn test_pagination() {
        let items = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let all = paginate(
            items.clone(),
            &Pagination {
                n: None,
                last: None,
            },
        );
        assert_eq!(all.len(), 3);

        let after_a = paginate(
            items.clone(),
            &Pagination {
                n: Some(1),
                last: Some("a".to_string()),
            },
        );
        assert_eq!(after_a, vec!["b"]);
    }

    #[test]
    fn test_parse_byte_range() {
        let mut headers = HeaderMap::new();
        assert!(parse_byte_range(&headers, 10).unwrap().is_none());

        headers.insert(header::RANGE, HeaderValue::from_static("bytes=2-5"));
        assert_eq!(parse_byte_range(&headers, 10).unwrap(), Some((2, 5)));

        headers.insert(header::RANGE, HeaderValue::from_static("bytes=4-"));
        assert_eq!(parse_byte_range(&headers, 10).unwrap(), Some((4, 9)));

        headers.insert(header::RANGE, HeaderValue::from_static("bytes=9-20"));
        assert!(parse_byte_range(&headers, 10).is_err());
    }
}
