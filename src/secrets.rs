// VMBENCH SECRET PROVIDER
// GUEST AND CONTROL-PLANE CREDENTIALS ARE INJECTED, NEVER EMBEDDED.
// ADAPTERS ASK FOR THEM AT CALL TIME AND HAND THEM TO THE CONTROL TOOL;
// NOTHING HERE IS EVER LOGGED.

use std::collections::HashMap;
use std::env::{self, VarError};
use std::fmt;

use crate::adapter::Backend;
use crate::error::SecretError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretScope {
    // LOGIN INSIDE THE GUEST OS (runProgramInGuest, guestcontrol, PowerShell Direct)
    Guest,
    // LOGIN TO THE HYPERVISOR'S OWN API (ESXi / vCenter)
    Host,
}

impl SecretScope {
    fn env_part(self) -> &'static str {
        match self {
            SecretScope::Guest => "GUEST",
            SecretScope::Host => "HOST",
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub trait SecretProvider: Send + Sync {
    fn credentials(&self, backend: Backend, scope: SecretScope) -> Result<Credentials, SecretError>;
}

/// Reads `VMBENCH_<BACKEND>_<SCOPE>_USER` and `VMBENCH_<BACKEND>_<SCOPE>_PASSWORD`,
/// e.g. `VMBENCH_VIRTUALBOX_GUEST_USER`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecrets;

impl EnvSecrets {
    pub fn var_names(backend: Backend, scope: SecretScope) -> (String, String) {
        let prefix = format!("VMBENCH_{}_{}", backend.id().to_uppercase(), scope.env_part());
        (format!("{}_USER", prefix), format!("{}_PASSWORD", prefix))
    }
}

fn env_var(backend: Backend, var: String) -> Result<String, SecretError> {
    match env::var(&var) {
        Ok(v) => Ok(v),
        Err(VarError::NotPresent) => Err(SecretError::Missing { backend, var }),
        Err(VarError::NotUnicode(_)) => Err(SecretError::NotUnicode { backend, var }),
    }
}

impl SecretProvider for EnvSecrets {
    fn credentials(&self, backend: Backend, scope: SecretScope) -> Result<Credentials, SecretError> {
        let (user_var, password_var) = Self::var_names(backend, scope);
        let username = env_var(backend, user_var)?;
        let password = env_var(backend, password_var)?;
        Ok(Credentials::new(username, password))
    }
}

// FIXED CREDENTIAL TABLE FOR EMBEDDING AND TESTS
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    entries: HashMap<(Backend, SecretScope), Credentials>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, backend: Backend, scope: SecretScope, creds: Credentials) -> Self {
        self.entries.insert((backend, scope), creds);
        self
    }
}

impl SecretProvider for StaticSecrets {
    fn credentials(&self, backend: Backend, scope: SecretScope) -> Result<Credentials, SecretError> {
        self.entries
            .get(&(backend, scope))
            .cloned()
            .ok_or_else(|| SecretError::Missing {
                backend,
                var: EnvSecrets::var_names(backend, scope).0,
            })
    }
}
