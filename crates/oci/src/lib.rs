//! OCI registry transport for dirpack.
//!
//! This crate provides:
//! - [`OciRegistry`], a [`RegistryTransport`](dirpack_engine::RegistryTransport)
//!   that speaks the OCI distribution protocol
//! - [`RegistryConfig`], plain-HTTP registries and credential resolution
//!
//! # Example
//!
//! ```ignore
//! use dirpack_engine::ArtifactClient;
//! use dirpack_oci::{OciRegistry, RegistryConfig};
//!
//! let client = ArtifactClient::new(OciRegistry::new(RegistryConfig::default()));
//! let tags = client.list_tags(&token, "ghcr.io/org/configs").await?;
//! ```

#![warn(missing_docs)]

mod config;
mod registry;

pub use config::{PASSWORD_ENV, RegistryAuth, RegistryConfig, USERNAME_ENV};
pub use registry::OciRegistry;
