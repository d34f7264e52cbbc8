//! Event name → filter policy registry.
//!
//! # Responsibilities
//! - Hold exactly one FilterSpec per event name (last write wins)
//! - Apply the policy for an event, producing a new payload
//! - Isolate and report failing transforms
//!
//! # Design Decisions
//! - Copy-on-write snapshot (ArcSwap): readers never see a half-applied
//!   update and never block on writers
//! - Writes are expected at startup; each one clones the map
//! - Missing entry is an explicit branch yielding an empty payload

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use arc_swap::ArcSwap;
use thiserror::Error;

use crate::filters::spec::FilterSpec;
use crate::notifications::{BoxError, Failure, Payload};
use crate::observability::metrics;

/// Errors raised while applying a filter policy.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The transform returned an error.
    #[error("transform for '{name}' failed: {source}")]
    Transform {
        name: String,
        #[source]
        source: BoxError,
    },

    /// The transform panicked.
    #[error("transform for '{name}' panicked: {message}")]
    TransformPanicked { name: String, message: String },
}

type Policies = HashMap<String, FilterSpec>;

/// Live mapping from event name to [`FilterSpec`].
///
/// Built at startup and shared via `Arc<PayloadFilterRegistry>`.
#[derive(Default)]
pub struct PayloadFilterRegistry {
    policies: ArcSwap<Policies>,
}

impl std::fmt::Debug for PayloadFilterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadFilterRegistry")
            .field("policies", &**self.policies.load())
            .finish()
    }
}

impl PayloadFilterRegistry {
    /// Create an empty registry: every event filters to `{}`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `spec` for `name`, replacing any previous policy.
    pub fn register(&self, name: impl Into<String>, spec: impl Into<FilterSpec>) {
        let name = name.into();
        let spec = spec.into();
        tracing::debug!(event = %name, spec = ?spec, "Registering payload filter");
        self.policies.rcu(|current| {
            let mut next = Policies::clone(current);
            next.insert(name.clone(), spec.clone());
            next
        });
    }

    /// Store one `spec` for every name in `names`, in a single update.
    pub fn register_many<I, S>(&self, names: I, spec: impl Into<FilterSpec>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let spec = spec.into();
        tracing::debug!(events = ?names, spec = ?spec, "Registering payload filter");
        self.policies.rcu(|current| {
            let mut next = Policies::clone(current);
            for name in &names {
                next.insert(name.clone(), spec.clone());
            }
            next
        });
    }

    /// Register several names with [`FilterSpec::All`].
    pub fn register_all<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.register_many(names, FilterSpec::All);
    }

    /// Store `spec` for `name` only if no policy exists yet.
    /// Returns true if it was stored.
    pub fn register_if_absent(&self, name: impl Into<String>, spec: impl Into<FilterSpec>) -> bool {
        let name = name.into();
        let spec = spec.into();
        let mut inserted = false;
        self.policies.rcu(|current| {
            let mut next = Policies::clone(current);
            inserted = !next.contains_key(&name);
            if inserted {
                next.insert(name.clone(), spec.clone());
            }
            next
        });
        if inserted {
            tracing::debug!(event = %name, spec = ?spec, "Registering payload filter");
        }
        inserted
    }

    /// Keep only `fields` for `name`.
    pub fn whitelist<I, S>(&self, name: impl Into<String>, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.register(name, FilterSpec::whitelist(fields));
    }

    /// Drop `fields` for `name`.
    pub fn exclude<I, S>(&self, name: impl Into<String>, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.register(name, FilterSpec::exclude(fields));
    }

    /// Rewrite payloads for `name` with `f`.
    pub fn transform<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&Payload) -> Result<Payload, BoxError> + Send + Sync + 'static,
    {
        self.register(name, FilterSpec::transform(f));
    }

    /// Remove the policy for `name`. Returns false if there was none.
    pub fn unregister(&self, name: &str) -> bool {
        let mut removed = false;
        self.policies.rcu(|current| {
            let mut next = Policies::clone(current);
            removed = next.remove(name).is_some();
            next
        });
        removed
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.policies.load().contains_key(name)
    }

    /// Policy currently registered for `name`.
    pub fn get(&self, name: &str) -> Option<FilterSpec> {
        self.policies.load().get(name).cloned()
    }

    /// Registered event names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.policies.load().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.policies.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.load().is_empty()
    }

    /// Apply the policy for `name`, surfacing transform failures.
    pub fn try_filter(&self, name: &str, payload: &Payload) -> Result<Payload, FilterError> {
        let policies = self.policies.load();
        let spec = match policies.get(name) {
            Some(spec) => spec,
            None => return Ok(Payload::new()),
        };

        match panic::catch_unwind(AssertUnwindSafe(|| spec.apply(payload))) {
            Ok(Ok(filtered)) => Ok(filtered),
            Ok(Err(source)) => Err(FilterError::Transform {
                name: name.to_string(),
                source,
            }),
            Err(panic) => Err(FilterError::TransformPanicked {
                name: name.to_string(),
                message: Failure::from_panic(panic.as_ref()).message,
            }),
        }
    }

    /// Apply the policy for `name`.
    ///
    /// A failing transform is logged and yields an empty payload for this
    /// event only.
    pub fn filter(&self, name: &str, payload: &Payload) -> Payload {
        match self.try_filter(name, payload) {
            Ok(filtered) => filtered,
            Err(e) => {
                tracing::error!(event = %name, error = %e, "Payload filter failed, dropping payload");
                metrics::record_filter_failure(name);
                Payload::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn obj(v: serde_json::Value) -> Payload {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_orders_charge_whitelist() {
        let registry = PayloadFilterRegistry::new();
        registry.whitelist("orders.charge", ["amount", "currency"]);

        let out = registry.filter(
            "orders.charge",
            &obj(json!({"amount": 10, "currency": "USD", "cardNumber": "4111..."})),
        );
        assert_eq!(out, obj(json!({"amount": 10, "currency": "USD"})));
    }

    #[test]
    fn test_unregistered_is_empty() {
        let registry = PayloadFilterRegistry::new();
        assert!(registry.filter("cache.read", &obj(json!({"key": "x"}))).is_empty());
    }

    #[test]
    fn test_mail_transform() {
        let registry = PayloadFilterRegistry::new();
        registry.transform("mail.deliver", |p| {
            let mail = p.get("mail").ok_or("missing mail")?;
            Ok(obj(json!({
                "from": mail["from"],
                "to": mail["to"],
                "subject": mail["subject"],
            })))
        });

        let out = registry.filter(
            "mail.deliver",
            &obj(json!({"mail": {"from": "a@x", "to": "b@x", "subject": "hi"}})),
        );
        assert_eq!(out, obj(json!({"from": "a@x", "to": "b@x", "subject": "hi"})));
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = PayloadFilterRegistry::new();
        registry.whitelist("sql.query", ["sql"]);
        registry.exclude("sql.query", ["binds"]);

        let out = registry.filter("sql.query", &obj(json!({"sql": "SELECT 1", "binds": [1], "name": "Load"})));
        assert_eq!(out, obj(json!({"sql": "SELECT 1", "name": "Load"})));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_affects_filter() {
        let registry = PayloadFilterRegistry::new();
        registry.register("sql.query", FilterSpec::All);
        assert!(registry.is_registered("sql.query"));

        assert!(registry.unregister("sql.query"));
        assert!(!registry.unregister("sql.query"));
        assert!(registry.filter("sql.query", &obj(json!({"sql": "x"}))).is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_all_and_field_list() {
        let registry = PayloadFilterRegistry::new();
        registry.register_all(["a", "b"]);
        registry.register("c", vec!["keep"]);

        assert_eq!(registry.names(), vec!["a", "b", "c"]);
        let p = obj(json!({"keep": 1, "drop": 2}));
        assert_eq!(registry.filter("a", &p), p);
        assert_eq!(registry.filter("c", &p), obj(json!({"keep": 1})));
    }

    #[test]
    fn test_failing_transform_is_isolated() {
        let registry = PayloadFilterRegistry::new();
        registry.transform("broken", |_| Err("no controller".into()));
        registry.register("panicky", FilterSpec::map(|_| panic!("bad policy")));
        registry.register("fine", FilterSpec::All);
        let p = obj(json!({"k": "v"}));

        let err = registry.try_filter("broken", &p).unwrap_err();
        assert!(matches!(err, FilterError::Transform { ref name, .. } if name == "broken"));
        assert!(err.to_string().contains("no controller"));

        let err = registry.try_filter("panicky", &p).unwrap_err();
        assert!(matches!(err, FilterError::TransformPanicked { ref message, .. } if message == "bad policy"));

        assert!(registry.filter("broken", &p).is_empty());
        assert!(registry.filter("panicky", &p).is_empty());
        assert_eq!(registry.filter("fine", &p), p);
    }

    #[test]
    fn test_filter_does_not_mutate_input() {
        let registry = PayloadFilterRegistry::new();
        registry.exclude("e", ["secret"]);
        let p = obj(json!({"secret": 1, "open": 2}));
        let before = p.clone();

        let _ = registry.filter("e", &p);
        assert_eq!(p, before);
    }

    #[test]
    fn test_concurrent_reads_during_writes() {
        let registry = Arc::new(PayloadFilterRegistry::new());
        let p = obj(json!({"a": 1, "b": 2}));

        let writer = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    if i % 2 == 0 {
                        registry.whitelist("ev", ["a"]);
                    } else {
                        registry.exclude("ev", ["a"]);
                    }
                }
            })
        };

        for _ in 0..200 {
            let out = registry.filter("ev", &p);
            // Either no policy yet, the whitelist, or the exclusion.
            assert!(out.is_empty() || out == obj(json!({"a": 1})) || out == obj(json!({"b": 2})));
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_register_many_shares_one_policy() {
        let registry = PayloadFilterRegistry::new();
        registry.register_many(["orders.charge", "orders.refund"], FilterSpec::exclude(["cardNumber"]));

        let p = obj(json!({"amount": 10, "cardNumber": "4111"}));
        assert_eq!(registry.filter("orders.charge", &p), obj(json!({"amount": 10})));
        assert_eq!(registry.filter("orders.refund", &p), obj(json!({"amount": 10})));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_register_if_absent_keeps_existing() {
        let registry = PayloadFilterRegistry::new();
        registry.whitelist("request", ["path"]);

        assert!(!registry.register_if_absent("request", FilterSpec::All));
        assert!(registry.register_if_absent("rack.request", FilterSpec::All));

        let p = obj(json!({"path": "/", "method": "GET"}));
        assert_eq!(registry.filter("request", &p), obj(json!({"path": "/"})));
        assert_eq!(registry.filter("rack.request", &p), p);
    }
}
