//! regmirror registry transport.
//!
//! Real implementations of the collaborator traits in
//! `regmirror_core::registry`: an OCI distribution client, the schema-1
//! upconverter it uses, the login store, and the Docker Hub description
//! publisher.

pub mod client;
pub mod credentials;
pub mod description;
pub mod schema1;

pub use client::{OciRegistry, RegistryAuth};
pub use credentials::{is_docker_hub, Credential, CredentialStore};
pub use description::DockerHubDescriber;
