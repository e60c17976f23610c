//! Shared types for the HTTP layer.

use std::str::FromStr;
use std::sync::Arc;

use uuid::Uuid;

use crate::api::error::ApiError;
use crate::dispatch::DispatchService;

pub use crate::models::ProviderContext;

/// Provider identity header set by the upstream auth collaborator.
pub const PROVIDER_ID_HEADER: &str = "X-Provider-Id";
/// Optional provider role header. Absent means `nurse`.
pub const PROVIDER_ROLE_HEADER: &str = "X-Provider-Role";

/// Shared context for all API routes and middleware.
#[derive(Clone)]
pub struct ApiContext {
    pub service: Arc<DispatchService>,
}

impl ApiContext {
    pub fn new(service: Arc<DispatchService>) -> Self {
        Self { service }
    }
}

/// Parse a path id, rejecting malformed values with a 400.
pub fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::from_str(raw).map_err(|_| ApiError::BadRequest(format!("Invalid id: {raw}")))
}

/// Parse an optional query value into an enum.
pub fn parse_query<T: FromStr>(name: &str, raw: Option<&str>) -> Result<Option<T>, ApiError> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => T::from_str(value)
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("Invalid {name}: {value}"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::CallbackStatus;

    #[test]
    fn parse_id_rejects_garbage() {
        assert!(parse_id("not-a-uuid").is_err());
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn parse_query_treats_blank_as_absent() {
        assert_eq!(parse_query::<CallbackStatus>("status", Some(" ")).unwrap(), None);
        assert_eq!(
            parse_query::<CallbackStatus>("status", Some("queued")).unwrap(),
            Some(CallbackStatus::Queued)
        );
        assert!(parse_query::<CallbackStatus>("status", Some("lost")).is_err());
    }
}
