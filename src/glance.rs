//! # Image registry client (Glance v2)
//!
//! Bridges the core [`RegistryClient`] trait to the OpenStack image service
//! REST API. Everything registry-specific lives here: endpoint layout, the
//! JSON-patch dialect used for updates, and the mapping of free-form image
//! attributes onto [`EntryProperties`].
//!
//! ## Client Usage
//! - Construct with [`GlanceClient::new_from_env`] (`OS_IMAGE_URL`,
//!   `OS_AUTH_TOKEN`, or their deprecated names).
//! - Image data is streamed from disk, never buffered whole.

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::Path;

use tripleo_ctl_core::contract::{EntryProperties, EntryUpdate, NewEntry, RegistryClient, RegistryEntry};
use tripleo_ctl_core::env::env_var;
use tripleo_ctl_core::error::{RegistryError, UploadError};

const PATCH_CONTENT_TYPE: &str = "application/openstack-images-v2.1-json-patch";

/// Image attributes owned by the registry itself; everything else is a
/// user property.
const CORE_ATTRIBUTES: &[&str] = &[
    "id",
    "name",
    "status",
    "created_at",
    "updated_at",
    "checksum",
    "os_hash_algo",
    "os_hash_value",
    "os_hidden",
    "container_format",
    "disk_format",
    "visibility",
    "protected",
    "owner",
    "size",
    "virtual_size",
    "min_disk",
    "min_ram",
    "tags",
    "self",
    "file",
    "schema",
    "direct_url",
    "locations",
    "stores",
];

#[derive(Debug, Deserialize)]
struct GlanceImage {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    checksum: Option<String>,
    #[serde(default)]
    os_hash_algo: Option<String>,
    #[serde(default)]
    os_hash_value: Option<String>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ImageList {
    images: Vec<GlanceImage>,
}

impl From<GlanceImage> for RegistryEntry {
    fn from(image: GlanceImage) -> Self {
        let user: Map<String, Value> = image
            .rest
            .into_iter()
            .filter(|(key, _)| !CORE_ATTRIBUTES.contains(&key.as_str()))
            .collect();
        let properties = serde_json::from_value(Value::Object(user)).unwrap_or_else(|e| {
            tracing::warn!(error = %e, image = %image.id, "Unreadable image properties, ignoring them");
            EntryProperties::default()
        });
        RegistryEntry {
            id: image.id,
            name: image.name.unwrap_or_default(),
            status: image.status,
            created_at: image.created_at.unwrap_or_default(),
            checksum: image.checksum,
            os_hash_algo: image.os_hash_algo,
            os_hash_value: image.os_hash_value,
            properties,
        }
    }
}

/// JSON-patch document for `update`. Glance stores properties as strings.
fn patch_document(update: &EntryUpdate) -> Value {
    let mut ops = Vec::new();
    if let Some(name) = &update.name {
        ops.push(json!({ "op": "replace", "path": "/name", "value": name }));
    }
    for (key, value) in update.properties.pairs() {
        let value = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        ops.push(json!({ "op": "add", "path": format!("/{key}"), "value": value }));
    }
    Value::Array(ops)
}

pub struct GlanceClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl GlanceClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        let base_url = base_url.trim_end_matches('/');
        let base_url = base_url.strip_suffix("/v2").unwrap_or(base_url);
        GlanceClient {
            http: reqwest::Client::new(),
            base_url: base_url.to_owned(),
            token: token.to_owned(),
        }
    }

    /// Reads the endpoint and token from the environment. Missing values are
    /// a configuration error, raised before any request is made.
    pub fn new_from_env() -> Result<Self, UploadError> {
        let url = env_var("OS_IMAGE_URL", "", &["GLANCE_URL"]);
        let token = env_var("OS_AUTH_TOKEN", "", &["OS_TOKEN"]);
        Self::from_settings(&url, &token)
    }

    fn from_settings(url: &str, token: &str) -> Result<Self, UploadError> {
        if url.is_empty() {
            tracing::error!("OS_IMAGE_URL missing in environment");
            return Err(UploadError::Configuration(
                "no image registry endpoint, set OS_IMAGE_URL".to_owned(),
            ));
        }
        if token.is_empty() {
            tracing::error!("OS_AUTH_TOKEN missing in environment");
            return Err(UploadError::Configuration(
                "no auth token for the image registry, set OS_AUTH_TOKEN".to_owned(),
            ));
        }
        tracing::info!(url = %url, token_set = !token.is_empty(), "Initialized GlanceClient from environment");
        Ok(GlanceClient::new(url, token))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2/{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("X-Auth-Token", &self.token)
    }

    async fn send(&self, builder: reqwest::RequestBuilder, id: Option<&str>) -> Result<Response, RegistryError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| RegistryError::Transport(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::NOT_FOUND {
            if let Some(id) = id {
                return Err(RegistryError::NotFound { id: id.to_owned() });
            }
        }
        let detail = resp.text().await.unwrap_or_default();
        tracing::error!(status = %status, detail = %detail, "Image registry rejected request");
        Err(RegistryError::Api {
            status: status.as_u16(),
            detail,
        })
    }

    async fn image(&self, resp: Response) -> Result<RegistryEntry, RegistryError> {
        resp.json::<GlanceImage>()
            .await
            .map(RegistryEntry::from)
            .map_err(|e| RegistryError::Transport(format!("unreadable image response: {e}")))
    }
}

#[async_trait]
impl RegistryClient for GlanceClient {
    async fn find_by_name(&self, name: &str) -> Result<Option<RegistryEntry>, RegistryError> {
        let builder = self
            .request(reqwest::Method::GET, "images")
            .query(&[("name", name)]);
        let list: ImageList = self
            .send(builder, None)
            .await?
            .json()
            .await
            .map_err(|e| RegistryError::Transport(format!("unreadable image list: {e}")))?;
        let mut images = list.images.into_iter();
        match (images.next(), images.next()) {
            (None, _) => Ok(None),
            (Some(image), None) => Ok(Some(image.into())),
            (Some(_), Some(_)) => Err(RegistryError::Ambiguous { name: name.to_owned() }),
        }
    }

    async fn create(&self, req: NewEntry) -> Result<RegistryEntry, RegistryError> {
        let body = json!({
            "name": req.name,
            "disk_format": req.disk_format,
            "container_format": req.container_format,
            "visibility": req.visibility,
        });
        let builder = self.request(reqwest::Method::POST, "images").json(&body);
        let resp = self.send(builder, None).await?;
        self.image(resp).await
    }

    async fn upload_data(&self, id: &str, path: &Path) -> Result<(), RegistryError> {
        let file = tokio::fs::File::open(path).await.map_err(|source| RegistryError::Data {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(id = %id, path = %path.display(), "Uploading image data");
        let builder = self
            .request(reqwest::Method::PUT, &format!("images/{id}/file"))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(reqwest::Body::from(file));
        self.send(builder, Some(id)).await?;
        Ok(())
    }

    async fn update(&self, id: &str, req: EntryUpdate) -> Result<RegistryEntry, RegistryError> {
        let builder = self
            .request(reqwest::Method::PATCH, &format!("images/{id}"))
            .header(reqwest::header::CONTENT_TYPE, PATCH_CONTENT_TYPE)
            .body(patch_document(&req).to_string());
        let resp = self.send(builder, Some(id)).await?;
        self.image(resp).await
    }

    async fn get(&self, id: &str) -> Result<RegistryEntry, RegistryError> {
        let resp = self
            .send(self.request(reqwest::Method::GET, &format!("images/{id}")), Some(id))
            .await?;
        self.image(resp).await
    }

    async fn delete(&self, id: &str) -> Result<(), RegistryError> {
        self.send(self.request(reqwest::Method::DELETE, &format!("images/{id}")), Some(id))
            .await?;
        Ok(())
    }
}
