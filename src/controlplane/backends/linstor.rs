//! LINSTOR Controller Adapter
//!
//! Talks to the LINSTOR controller REST API (`/v1/...`) over HTTP or HTTPS.
//! Supports basic authentication, client certificates and a custom CA.

use crate::domain::ports::{
    AutoPlaceRequest, ControllerClient, Resource, ResourceDefinition, ResourceWithVolumes,
    Snapshot, Volume, VolumeDefinition,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

/// Plain HTTP port of the controller
pub const DEFAULT_HTTP_PORT: u16 = 3370;

/// HTTPS port of the controller
pub const DEFAULT_HTTPS_PORT: u16 = 3371;

/// Controller used when none is configured
pub const DEFAULT_CONTROLLER: &str = "localhost:3370";

// =============================================================================
// Configuration
// =============================================================================

/// Connection settings for the LINSTOR controller
#[derive(Clone, Default)]
pub struct ConnectionConfig {
    /// Comma separated controller list; only the first entry is used
    pub controllers: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// PEM client certificate
    pub cert_file: Option<PathBuf>,
    /// PEM client key
    pub key_file: Option<PathBuf>,
    /// PEM CA bundle; without it server certificates are not verified
    pub ca_file: Option<PathBuf>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("controllers", &self.controllers)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("cert_file", &self.cert_file)
            .field("key_file", &self.key_file)
            .field("ca_file", &self.ca_file)
            .finish()
    }
}

impl ConnectionConfig {
    /// Base URL of the controller, e.g. `https://ctrl:3371`
    pub fn base_url(&self) -> Result<String> {
        let controller = self
            .controllers
            .split(',')
            .map(str::trim)
            .find(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CONTROLLER);

        let (tls, host) = match controller.split_once("://") {
            Some((scheme, rest)) => match scheme.to_lowercase().as_str() {
                "linstor+ssl" | "https" => (true, rest),
                "linstor" | "http" => (false, rest),
                other => {
                    return Err(Error::Configuration(format!(
                        "unsupported controller scheme '{}' in '{}'",
                        other, controller
                    )))
                }
            },
            None => (false, controller),
        };

        let host = host.trim_end_matches('/');
        if host.is_empty() {
            return Err(Error::Configuration(format!(
                "controller '{}' has no host",
                controller
            )));
        }

        let scheme = if tls { "https" } else { "http" };
        if has_port(host) {
            Ok(format!("{}://{}", scheme, host))
        } else {
            let port = if tls { DEFAULT_HTTPS_PORT } else { DEFAULT_HTTP_PORT };
            Ok(format!("{}://{}:{}", scheme, host, port))
        }
    }
}

fn has_port(host: &str) -> bool {
    match host.rsplit_once(']') {
        // bracketed IPv6 literal
        Some((_, rest)) => rest.starts_with(':'),
        None => host.contains(':'),
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Serialize)]
struct VolumeDefinitionCreate<'a> {
    volume_definition: &'a VolumeDefinition,
}

#[derive(Serialize)]
struct ResourceDefinitionCreate<'a> {
    resource_definition: &'a ResourceDefinition,
}

#[derive(Serialize)]
struct ResourceCreate<'a> {
    resource: &'a Resource,
}

/// Status entry returned by the controller for every write
#[derive(Debug, Deserialize)]
struct ApiCallRc {
    #[serde(default)]
    message: String,
}

/// Join the messages of an `ApiCallRc` list, falling back to the raw body
fn api_call_messages(body: &str) -> String {
    match serde_json::from_str::<Vec<ApiCallRc>>(body) {
        Ok(rcs) if !rcs.is_empty() => rcs
            .into_iter()
            .map(|rc| rc.message)
            .filter(|m| !m.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        _ => body.trim().to_string(),
    }
}

fn definition_path(name: &str) -> String {
    format!("/v1/resource-definitions/{}", urlencoding::encode(name))
}

fn resource_path(name: &str, node: &str) -> String {
    format!(
        "{}/resources/{}",
        definition_path(name),
        urlencoding::encode(node)
    )
}

// =============================================================================
// LINSTOR Client
// =============================================================================

/// REST client for the LINSTOR controller
#[cfg_attr(test, derive(Debug))]
pub struct LinstorClient {
    http: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl LinstorClient {
    /// Build a client from connection settings
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        let base_url = config.base_url()?;

        let mut builder = reqwest::Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));

        if base_url.starts_with("https://") {
            builder = builder.use_rustls_tls();

            if let (Some(cert), Some(key)) = (&config.cert_file, &config.key_file) {
                let mut pem = std::fs::read(cert)?;
                pem.push(b'\n');
                pem.extend(std::fs::read(key)?);
                builder = builder.identity(reqwest::Identity::from_pem(&pem)?);
            }

            match &config.ca_file {
                Some(ca) => {
                    let pem = std::fs::read(ca)?;
                    builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
                }
                None => {
                    builder = builder.danger_accept_invalid_certs(true);
                }
            }
        }

        info!(controller = %base_url, "Using LINSTOR controller");

        Ok(Self {
            http: builder.build()?,
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_ref()),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let path = response.url().path().to_string();
        let body = response.text().await.unwrap_or_default();
        debug!(path = %path, status = status.as_u16(), "Controller request failed");

        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(path));
        }
        Err(Error::Controller {
            status: status.as_u16(),
            message: api_call_messages(&body),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(self.request(Method::GET, path)).await?;
        Ok(response.json().await?)
    }

    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        self.send(self.request(Method::POST, path).json(body)).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, path)).await?;
        Ok(())
    }
}

#[async_trait]
impl ControllerClient for LinstorClient {
    async fn create_volume_definition(
        &self,
        resource: &str,
        definition: VolumeDefinition,
    ) -> Result<()> {
        let path = format!("{}/volume-definitions", definition_path(resource));
        self.post_json(
            &path,
            &VolumeDefinitionCreate {
                volume_definition: &definition,
            },
        )
        .await
    }

    async fn delete_volume_definition(&self, resource: &str, volume_number: i32) -> Result<()> {
        let path = format!(
            "{}/volume-definitions/{}",
            definition_path(resource),
            volume_number
        );
        self.delete(&path).await
    }

    async fn create_resource_definition(&self, definition: ResourceDefinition) -> Result<()> {
        self.post_json(
            "/v1/resource-definitions",
            &ResourceDefinitionCreate {
                resource_definition: &definition,
            },
        )
        .await
    }

    async fn get_resource_definition(&self, name: &str) -> Result<ResourceDefinition> {
        self.get_json(&definition_path(name)).await
    }

    async fn list_resource_definitions(&self) -> Result<Vec<ResourceDefinition>> {
        self.get_json("/v1/resource-definitions").await
    }

    async fn delete_resource_definition(&self, name: &str) -> Result<()> {
        self.delete(&definition_path(name)).await
    }

    async fn create_resource(&self, resource: Resource) -> Result<()> {
        let path = resource_path(&resource.name, &resource.node_name);
        self.post_json(
            &path,
            &ResourceCreate {
                resource: &resource,
            },
        )
        .await
    }

    async fn get_resource(&self, name: &str, node: &str) -> Result<Resource> {
        self.get_json(&resource_path(name, node)).await
    }

    async fn delete_resource(&self, name: &str, node: &str) -> Result<()> {
        self.delete(&resource_path(name, node)).await
    }

    async fn get_volume(&self, name: &str, node: &str, volume_number: i32) -> Result<Volume> {
        let path = format!("{}/volumes/{}", resource_path(name, node), volume_number);
        self.get_json(&path).await
    }

    async fn resource_view(&self, name: &str, node: &str) -> Result<Vec<ResourceWithVolumes>> {
        let builder = self
            .request(Method::GET, "/v1/view/resources")
            .query(&[("resources", name), ("nodes", node)]);
        let response = self.send(builder).await?;
        Ok(response.json().await?)
    }

    async fn list_snapshots(&self, name: &str) -> Result<Vec<Snapshot>> {
        self.get_json(&format!("{}/snapshots", definition_path(name)))
            .await
    }

    async fn delete_snapshot(&self, name: &str, snapshot: &str) -> Result<()> {
        let path = format!(
            "{}/snapshots/{}",
            definition_path(name),
            urlencoding::encode(snapshot)
        );
        self.delete(&path).await
    }

    async fn autoplace(&self, name: &str, request: AutoPlaceRequest) -> Result<()> {
        let path = format!("{}/autoplace", definition_path(name));
        self.post_json(&path, &request).await
    }
}
