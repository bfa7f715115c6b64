//! Docker Hub repository descriptions.
//!
//! After a successful job the destination repository on Docker Hub gets a
//! short description pointing at its source. Uses the Hub web API, which
//! is separate from the registry API and needs its own JWT login.

use async_trait::async_trait;
use regmirror_core::error::{MirrorError, Result};
use regmirror_core::reference::ImageReference;
use regmirror_core::registry::DescriptionPublisher;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::credentials::{is_docker_hub, Credential, CredentialStore, DOCKER_HUB};

/// Docker Hub web API base URL.
const HUB_API_BASE_URL: &str = "https://hub.docker.com";

/// Hub rejects short descriptions longer than this.
const MAX_SHORT_DESCRIPTION: usize = 100;

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

/// Publishes "mirror of" descriptions to Docker Hub repositories.
pub struct DockerHubDescriber {
    http: reqwest::Client,
    base_url: String,
    credential: Option<Credential>,
    token: Mutex<Option<String>>,
}

impl DockerHubDescriber {
    pub fn new(credential: Option<Credential>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: HUB_API_BASE_URL.to_string(),
            credential,
            token: Mutex::new(None),
        }
    }

    /// `DOCKERHUB_USERNAME` / `DOCKERHUB_TOKEN`, else the stored Docker Hub login.
    pub fn from_env_or_store() -> Self {
        let from_env = match (
            std::env::var("DOCKERHUB_USERNAME").ok(),
            std::env::var("DOCKERHUB_TOKEN").ok(),
        ) {
            (Some(username), Some(password)) => Some(Credential { username, password }),
            _ => None,
        };
        let credential = from_env.or_else(|| {
            CredentialStore::default_path()
                .and_then(|store| store.get(DOCKER_HUB))
                .ok()
                .flatten()
        });
        Self::new(credential)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    async fn token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let credential = self
            .credential
            .as_ref()
            .ok_or_else(|| MirrorError::ConfigError("No Docker Hub credential configured".to_string()))?;

        let url = format!("{}/v2/users/login", self.base_url);
        tracing::debug!(url = %url, username = %credential.username, "Logging in to Docker Hub");
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "username": credential.username,
                "password": credential.password,
            }))
            .send()
            .await
            .map_err(|e| hub_error(format!("Login request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(hub_error(format!("Login returned {}", response.status())));
        }
        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| hub_error(format!("Invalid login response: {}", e)))?;

        *cached = Some(login.token.clone());
        Ok(login.token)
    }
}

#[async_trait]
impl DescriptionPublisher for DockerHubDescriber {
    fn applies_to(&self, dest: &ImageReference) -> bool {
        self.credential.is_some() && is_docker_hub(&dest.registry)
    }

    async fn publish_description(
        &self,
        source: &ImageReference,
        dest: &ImageReference,
    ) -> Result<()> {
        let token = self.token().await?;
        let url = format!(
            "{}/v2/repositories/{}/",
            self.base_url,
            hub_repository(&dest.repository)
        );
        let response = self
            .http
            .patch(&url)
            .header("Authorization", format!("JWT {}", token))
            .json(&serde_json::json!({
                "description": short_description(source),
                "full_description": full_description(source, dest),
            }))
            .send()
            .await
            .map_err(|e| hub_error(format!("Description update failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(hub_error(format!(
                "Description update for {} returned {}",
                dest,
                response.status()
            )));
        }
        Ok(())
    }
}

fn hub_error(message: String) -> MirrorError {
    MirrorError::registry("hub.docker.com", message)
}

/// Hub API path of a repository; official images live under `library/`.
fn hub_repository(repository: &str) -> String {
    if repository.contains('/') {
        repository.to_string()
    } else {
        format!("library/{}", repository)
    }
}

fn short_description(source: &ImageReference) -> String {
    let text = format!("Mirror of {}", source.repository_path());
    if text.chars().count() <= MAX_SHORT_DESCRIPTION {
        return text;
    }
    let mut truncated: String = text.chars().take(MAX_SHORT_DESCRIPTION - 3).collect();
    truncated.push_str("...");
    truncated
}

fn full_description(source: &ImageReference, dest: &ImageReference) -> String {
    format!(
        "# {}\n\nThis repository is an automated mirror of `{}`.\n\n\
         Every tag is published as a multi-architecture manifest list, with one \
         `TAG-ARCH` tag per architecture (and `TAG-ARCH-VARIANT` for non-default \
         variants).\n",
        dest.repository,
        source.repository_path()
    )
}
