//! Filter policy definitions.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::notifications::{BoxError, Payload};

/// Payload rewrite function used by [`FilterSpec::Transform`].
pub type TransformFn = Arc<dyn Fn(&Payload) -> Result<Payload, BoxError> + Send + Sync>;

/// Policy describing which fields of an event's payload are retained.
#[derive(Clone, Default)]
pub enum FilterSpec {
    /// Keep the payload as is.
    #[default]
    All,
    /// Keep only these fields; missing ones are simply omitted.
    Whitelist(BTreeSet<String>),
    /// Drop these fields, keep everything else.
    Exclude(BTreeSet<String>),
    /// Replace the payload with the function's output.
    Transform(TransformFn),
}

impl FilterSpec {
    pub fn whitelist<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilterSpec::Whitelist(fields.into_iter().map(Into::into).collect())
    }

    pub fn exclude<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilterSpec::Exclude(fields.into_iter().map(Into::into).collect())
    }

    /// A fallible transform. Errors are reported per event type.
    pub fn transform<F>(f: F) -> Self
    where
        F: Fn(&Payload) -> Result<Payload, BoxError> + Send + Sync + 'static,
    {
        FilterSpec::Transform(Arc::new(f))
    }

    /// An infallible transform.
    pub fn map<F>(f: F) -> Self
    where
        F: Fn(&Payload) -> Payload + Send + Sync + 'static,
    {
        FilterSpec::transform(move |p| Ok(f(p)))
    }

    /// Produce the filtered copy of `payload`.
    pub fn apply(&self, payload: &Payload) -> Result<Payload, BoxError> {
        match self {
            FilterSpec::All => Ok(payload.clone()),
            FilterSpec::Whitelist(fields) => Ok(fields
                .iter()
                .filter_map(|f| payload.get(f).map(|v| (f.clone(), v.clone())))
                .collect()),
            FilterSpec::Exclude(fields) => Ok(payload
                .iter()
                .filter(|(k, _)| !fields.contains(k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()),
            FilterSpec::Transform(f) => f(payload),
        }
    }
}

/// A bare field list is a whitelist.
impl From<Vec<&str>> for FilterSpec {
    fn from(fields: Vec<&str>) -> Self {
        FilterSpec::whitelist(fields)
    }
}

impl fmt::Debug for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterSpec::All => write!(f, "All"),
            FilterSpec::Whitelist(fields) => f.debug_tuple("Whitelist").field(fields).finish(),
            FilterSpec::Exclude(fields) => f.debug_tuple("Exclude").field(fields).finish(),
            FilterSpec::Transform(_) => write!(f, "Transform(..)"),
        }
    }
}
