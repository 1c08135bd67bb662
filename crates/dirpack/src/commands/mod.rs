//! Subcommand execution.

mod pull;
mod push;
mod tags;

use crate::cli::{Cli, Commands};
use dirpack_engine::{ArtifactClient, ClientOptions};
use dirpack_oci::{OciRegistry, RegistryConfig};
use tokio_util::sync::CancellationToken;

/// Settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Context {
    pub default_tag: String,
    pub registry: RegistryConfig,
}

impl Context {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            default_tag: cli.default_tag.clone(),
            registry: RegistryConfig {
                insecure_registries: cli.insecure_registries.clone(),
                auth: None,
            },
        }
    }

    /// Options every client starts from; subcommands adjust their own fields.
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            default_tag: self.default_tag.clone(),
            ..ClientOptions::default()
        }
    }

    pub fn client(&self, options: ClientOptions) -> ArtifactClient<OciRegistry> {
        ArtifactClient::with_options(OciRegistry::new(self.registry.clone()), options)
    }
}

pub async fn execute(cli: Cli, token: CancellationToken) -> miette::Result<()> {
    let context = Context::from_cli(&cli);
    match cli.command {
        Commands::Push(args) => push::run(&context, &token, args).await,
        Commands::Pull(args) => pull::run(&context, &token, args).await,
        Commands::Tags(args) => tags::run(&context, &token, args).await,
    }
}
