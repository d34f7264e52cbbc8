//! Request-scoped correlation identity.
//!
//! # Responsibilities
//! - Mint one InstrumenterId per top-level request (UUID v4)
//! - Scope it to that request's future via a tokio task-local
//! - Expose it to handlers as an axum extractor
//!
//! # Design Decisions
//! - Scope is strictly per request; concurrent requests never share it
//! - Spawned tasks do not inherit the scope; use [`InstrumenterId::scope`]
//!   to carry it across explicitly

use std::fmt;
use std::future::Future;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

tokio::task_local! {
    static CURRENT: InstrumenterId;
}

/// Correlation token shared by all events of one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumenterId(Uuid);

impl InstrumenterId {
    /// Generate a fresh identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The identity of the request currently being handled, if any.
    pub fn current() -> Option<Self> {
        CURRENT.try_with(|id| *id).ok()
    }

    /// The current identity, or a fresh one outside any request scope.
    pub fn current_or_new() -> Self {
        Self::current().unwrap_or_default()
    }

    /// Run `fut` with this identity as the current one.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT.scope(self, fut).await
    }

    /// Run `f` synchronously with this identity as the current one.
    pub fn sync_scope<F, R>(self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        CURRENT.sync_scope(self, f)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for InstrumenterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstrumenterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for InstrumenterId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Handlers behind the instrumentation layer can take the request's
/// identity as an argument.
impl<S> FromRequestParts<S> for InstrumenterId
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<InstrumenterId>()
            .copied()
            .ok_or((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Request is not instrumented",
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_ids() {
        assert_ne!(InstrumenterId::new(), InstrumenterId::new());
    }

    #[test]
    fn test_no_current_outside_scope() {
        assert!(InstrumenterId::current().is_none());
    }

    #[test]
    fn test_sync_scope() {
        let id = InstrumenterId::new();
        let seen = id.sync_scope(InstrumenterId::current);
        assert_eq!(seen, Some(id));
        assert!(InstrumenterId::current().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_scopes_are_isolated() {
        let a = InstrumenterId::new();
        let b = InstrumenterId::new();

        let task_a = tokio::spawn(a.scope(async {
            tokio::task::yield_now().await;
            InstrumenterId::current()
        }));
        let task_b = tokio::spawn(b.scope(async {
            tokio::task::yield_now().await;
            InstrumenterId::current()
        }));

        assert_eq!(task_a.await.unwrap(), Some(a));
        assert_eq!(task_b.await.unwrap(), Some(b));
    }

    #[tokio::test]
    async fn test_extractor() {
        let id = InstrumenterId::new();
        let mut req = axum::http::Request::builder().body(()).unwrap();
        req.extensions_mut().insert(id);
        let (mut parts, _) = req.into_parts();

        let extracted = InstrumenterId::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(extracted, id);

        let (mut bare, _) = axum::http::Request::builder().body(()).unwrap().into_parts();
        let rejected = InstrumenterId::from_request_parts(&mut bare, &()).await;
        assert_eq!(rejected.unwrap_err().0, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
