//! Built-in filter policies installed at startup.
//!
//! # Policies
//! - Low-volume, already-compact events keep their whole payload
//! - `template.render` has the application root scrubbed from every string
//! - `controller.process_action` is reduced to controller, action, method
//!   and formats; the controller context itself is discarded
//! - `mail.deliver` is reduced to from, to and subject

use std::path::Path;

use serde_json::Value;

use crate::filters::registry::PayloadFilterRegistry;
use crate::filters::spec::FilterSpec;
use crate::notifications::{BoxError, Payload};

/// Replaces the application root in rendered template paths.
pub const ROOT_PLACEHOLDER: &str = "APP_ROOT";

/// Events stored with their full payload.
pub const PASSTHROUGH_EVENTS: &[&str] = &[
    "request",
    "sql.query",
    "fragment.write",
    "fragment.read",
    "fragment.exist",
    "fragment.expire",
    "page.expire",
    "page.cache",
];

pub const RENDER_TEMPLATE: &str = "template.render";
pub const PROCESS_ACTION: &str = "controller.process_action";
pub const MAIL_DELIVER: &str = "mail.deliver";

impl PayloadFilterRegistry {
    /// A registry seeded with the built-in policies.
    pub fn with_defaults(app_root: Option<&Path>) -> Self {
        let registry = Self::new();
        install(&registry, app_root);
        registry
    }
}

/// Register the built-in policies on `registry`.
///
/// Without an application root there is nothing to scrub, so rendered
/// template payloads are kept whole.
pub fn install(registry: &PayloadFilterRegistry, app_root: Option<&Path>) {
    registry.register_all(PASSTHROUGH_EVENTS.iter().copied());

    match app_root.map(|p| p.to_string_lossy().into_owned()) {
        Some(root) if !root.is_empty() => {
            registry.register(RENDER_TEMPLATE, FilterSpec::map(move |p| scrub_root(p, &root)));
        }
        _ => registry.register(RENDER_TEMPLATE, FilterSpec::All),
    }

    registry.transform(PROCESS_ACTION, process_action);
    registry.transform(MAIL_DELIVER, mail_summary);

    tracing::debug!(policies = registry.len(), "Installed default payload filters");
}

fn scrub_root(payload: &Payload, root: &str) -> Payload {
    payload
        .iter()
        .map(|(k, v)| (k.clone(), scrub_value(v, root)))
        .collect()
}

fn scrub_value(value: &Value, root: &str) -> Value {
    match value {
        Value::String(s) => Value::String(s.replace(root, ROOT_PLACEHOLDER)),
        Value::Array(items) => Value::Array(items.iter().map(|v| scrub_value(v, root)).collect()),
        Value::Object(map) => Value::Object(scrub_root(map, root)),
        other => other.clone(),
    }
}

fn process_action(payload: &Payload) -> Result<Payload, BoxError> {
    let controller = payload
        .get("controller")
        .and_then(Value::as_object)
        .ok_or("payload has no controller context")?;
    let request = controller.get("request");
    let field = |v: Option<&Value>| v.cloned().unwrap_or(Value::Null);

    let mut out = Payload::new();
    out.insert("controller".into(), field(controller.get("name")));
    out.insert("action".into(), field(payload.get("action")));
    out.insert("method".into(), field(request.and_then(|r| r.get("method"))));
    out.insert("formats".into(), field(request.and_then(|r| r.get("formats"))));
    Ok(out)
}

fn mail_summary(payload: &Payload) -> Result<Payload, BoxError> {
    let mail = payload
        .get("mail")
        .and_then(Value::as_object)
        .ok_or("payload has no mail message")?;

    Ok(["from", "to", "subject"]
        .into_iter()
        .map(|k| (k.to_string(), mail.get(k).cloned().unwrap_or(Value::Null)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Payload {
        v.as_object().cloned().unwrap()
    }

    fn registry() -> PayloadFilterRegistry {
        PayloadFilterRegistry::with_defaults(Some(Path::new("/srv/shop")))
    }

    #[test]
    fn test_passthrough_events() {
        let registry = registry();
        let p = obj(json!({"sql": "SELECT * FROM orders", "name": "Order Load"}));
        assert_eq!(registry.filter("sql.query", &p), p);
        for name in PASSTHROUGH_EVENTS {
            assert!(registry.is_registered(name));
        }
    }

    #[test]
    fn test_render_template_scrubs_root() {
        let registry = registry();
        let p = obj(json!({
            "identifier": "/srv/shop/app/views/orders/index.html",
            "layout": "layouts/application",
            "partials": ["/srv/shop/app/views/orders/_row.html"],
            "count": 3,
        }));

        let out = registry.filter(RENDER_TEMPLATE, &p);
        assert_eq!(out["identifier"], "APP_ROOT/app/views/orders/index.html");
        assert_eq!(out["layout"], "layouts/application");
        assert_eq!(out["partials"][0], "APP_ROOT/app/views/orders/_row.html");
        assert_eq!(out["count"], 3);
        assert_eq!(p["identifier"], "/srv/shop/app/views/orders/index.html");
    }

    #[test]
    fn test_render_template_without_root() {
        let registry = PayloadFilterRegistry::with_defaults(None);
        let p = obj(json!({"identifier": "/srv/shop/app/views/x.html"}));
        assert_eq!(registry.filter(RENDER_TEMPLATE, &p), p);
    }

    #[test]
    fn test_process_action_reduced() {
        let registry = registry();
        let p = obj(json!({
            "controller": {
                "name": "OrdersController",
                "request": {"method": "POST", "formats": ["html", "json"], "headers": {"cookie": "s=1"}},
            },
            "action": "create",
            "params": {"card": "4111"},
        }));

        let out = registry.filter(PROCESS_ACTION, &p);
        assert_eq!(
            out,
            obj(json!({
                "controller": "OrdersController",
                "action": "create",
                "method": "POST",
                "formats": ["html", "json"],
            }))
        );
    }

    #[test]
    fn test_process_action_without_context() {
        let registry = registry();
        let p = obj(json!({"action": "create"}));
        assert!(registry.try_filter(PROCESS_ACTION, &p).is_err());
        assert!(registry.filter(PROCESS_ACTION, &p).is_empty());
    }

    #[test]
    fn test_mail_deliver_reduced() {
        let registry = registry();
        let p = obj(json!({
            "mail": {"from": "a@x", "to": "b@x", "subject": "hi", "body": "secret"},
            "mailer": "OrderMailer",
        }));
        assert_eq!(
            registry.filter(MAIL_DELIVER, &p),
            obj(json!({"from": "a@x", "to": "b@x", "subject": "hi"}))
        );
    }

    #[test]
    fn test_unknown_event_still_empty() {
        let registry = registry();
        assert!(registry.filter("cache.read", &obj(json!({"key": "x"}))).is_empty());
    }
}
