//! Registry connection settings and credential resolution.

use std::fmt;

/// Environment variable holding the registry user name.
pub const USERNAME_ENV: &str = "DIRPACK_REGISTRY_USERNAME";

/// Environment variable holding the registry password or token.
pub const PASSWORD_ENV: &str = "DIRPACK_REGISTRY_PASSWORD";

const GHCR: &str = "ghcr.io";
const GITHUB_TOKEN_ENVS: [&str; 2] = ["GITHUB_TOKEN", "GH_TOKEN"];

/// Credentials presented to a registry.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum RegistryAuth {
    /// No credentials.
    #[default]
    Anonymous,
    /// HTTP basic credentials.
    Basic {
        /// User name (may be empty for token-only registries).
        username: String,
        /// Password or access token.
        password: String,
    },
}

impl RegistryAuth {
    /// Basic credentials.
    #[must_use]
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// How to reach registries.
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Registries (host[:port]) spoken to over plain HTTP.
    pub insecure_registries: Vec<String>,
    /// Explicit credentials; when unset they are resolved from the environment.
    pub auth: Option<RegistryAuth>,
}

impl RegistryConfig {
    /// Credentials for `registry`, resolved from the process environment.
    #[must_use]
    pub fn resolve_auth(&self, registry: &str) -> RegistryAuth {
        self.resolve_auth_with(registry, |name| std::env::var(name).ok())
    }

    /// Credentials for `registry`, resolved through `lookup`.
    ///
    /// Order: explicit credentials, then `DIRPACK_REGISTRY_USERNAME` /
    /// `DIRPACK_REGISTRY_PASSWORD`, then `GITHUB_TOKEN` / `GH_TOKEN` for
    /// ghcr.io, else anonymous.
    pub fn resolve_auth_with<F>(&self, registry: &str, lookup: F) -> RegistryAuth
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(auth) = &self.auth {
            return auth.clone();
        }

        let lookup = |name: &str| lookup(name).filter(|value| !value.is_empty());
        if let Some(password) = lookup(PASSWORD_ENV) {
            let username = lookup(USERNAME_ENV).unwrap_or_default();
            return RegistryAuth::basic(username, password);
        }

        if registry == GHCR {
            if let Some(token) = GITHUB_TOKEN_ENVS.iter().copied().find_map(&lookup) {
                return RegistryAuth::basic("", token);
            }
        }

        RegistryAuth::Anonymous
    }

    /// Whether `registry` is reached over plain HTTP.
    #[must_use]
    pub fn is_insecure(&self, registry: &str) -> bool {
        self.insecure_registries.iter().any(|r| r == registry)
    }
}
