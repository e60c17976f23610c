pub mod callback;
pub mod encounter;
pub mod enums;
pub mod submission;

pub use callback::*;
pub use encounter::*;
pub use submission::*;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Current time at the precision the store persists (microseconds), so a
/// loaded entity compares equal to the one that was saved.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Opaque provider identity handed over by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authenticated caller of a provider-side operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderContext {
    pub provider_id: ProviderId,
    pub role: enums::ProviderRole,
}

impl ProviderContext {
    pub fn new(provider_id: impl Into<String>, role: enums::ProviderRole) -> Self {
        Self {
            provider_id: ProviderId::new(provider_id),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == enums::ProviderRole::Admin
    }
}
