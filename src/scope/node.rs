//! Deployment target scopes
//!
//! A node is a plain scope pre-filled with connection settings. The derived
//! settings are templates evaluated against the node itself, so overriding
//! `user` or `port` changes `url` and `sshOptions` accordingly.

use crate::error::Result;
use crate::runner::Context;
use crate::scope::{Role, ScopeId, Value, ValueMap};
use std::rc::Rc;

/// Default settings every node starts with
pub fn node_defaults() -> ValueMap {
    let mut defaults = ValueMap::new();
    defaults.insert("user".into(), Value::from(""));
    defaults.insert("pass".into(), Value::from(""));
    defaults.insert("port".into(), Value::from(""));
    defaults.insert(
        "url".into(),
        Value::from(r#"{(this.user ? this.user ~ "@" : "") ~ this.host}"#),
    );
    defaults.insert(
        "sshOptions".into(),
        Value::from(
            r#" -A{this.port ? " -p " ~ this.port : ""}{this.pass ? " -o PubkeyAuthentication=no" : ""}"#,
        ),
    );
    defaults.insert(
        "scpOptions".into(),
        Value::from(
            r#"{this.port ? " -P " ~ this.port : ""}{this.pass ? " -o PubkeyAuthentication=no" : ""}"#,
        ),
    );
    defaults.insert("webRoot".into(), Value::from("{this.deployPath}/current"));
    defaults
}

impl Context {
    /// Create a node under `parent` and apply `options` on top of the defaults
    pub fn create_node(&mut self, parent: ScopeId, options: Value) -> Result<ScopeId> {
        let node = self.scopes.create(Some(parent), Rc::default(), Role::Node);
        for (key, value) in node_defaults() {
            self.scopes.insert_local(node, &key, value);
        }
        if let Value::Map(options) = options {
            self.set_from_map(node, options)?;
        }
        tracing::trace!(node = %node, "created node");
        Ok(node)
    }

    /// Connection url of a node (`user@host`, or just the host)
    pub fn node_url(&mut self, node: ScopeId) -> Result<String> {
        let url = self.get(node, "url")?;
        self.stringify(&url, node)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{ConfigError, KiteError};
    use crate::runner::Context;
    use crate::scope::{Role, Value, ValueMap};
    use std::rc::Rc;

    fn options(pairs: &[(&str, &str)]) -> Value {
        let mut map = ValueMap::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), Value::from(*v));
        }
        Value::Map(map)
    }

    #[test]
    fn test_node_derived_settings() {
        let mut ctx = Context::new();
        let root = ctx.scopes.create(None, Rc::default(), Role::Plain);
        let node = ctx
            .create_node(
                root,
                options(&[("host", "example.com"), ("user", "deploy"), ("port", "2222")]),
            )
            .unwrap();

        assert_eq!(ctx.node_url(node).unwrap(), "deploy@example.com");
        assert_eq!(
            ctx.get(node, "sshOptions").unwrap(),
            Value::from(" -A -p 2222")
        );
        assert_eq!(ctx.get(node, "scpOptions").unwrap(), Value::from(" -P 2222"));
    }

    #[test]
    fn test_node_without_user_or_port() {
        let mut ctx = Context::new();
        let root = ctx.scopes.create(None, Rc::default(), Role::Plain);
        let node = ctx
            .create_node(
                root,
                options(&[("host", "10.0.0.1"), ("pass", "s3cret"), ("deployPath", "/srv/app")]),
            )
            .unwrap();

        assert_eq!(ctx.node_url(node).unwrap(), "10.0.0.1");
        assert_eq!(
            ctx.get(node, "sshOptions").unwrap(),
            Value::from(" -A -o PubkeyAuthentication=no")
        );
        assert_eq!(ctx.get(node, "webRoot").unwrap(), Value::from("/srv/app/current"));
    }

    #[test]
    fn test_node_shorthand_becomes_nodes() {
        let mut ctx = Context::new();
        let root = ctx.scopes.create(None, Rc::default(), Role::Plain);
        ctx.set(root, "node", options(&[("host", "web1")])).unwrap();

        assert!(!ctx.has(root, "node").unwrap());
        let nodes = ctx.get(root, "nodes").unwrap();
        let Value::Map(nodes) = nodes else {
            panic!("nodes should be a map");
        };
        let Some(Value::Scope(node)) = nodes.get("0") else {
            panic!("node 0 should be a scope");
        };
        assert_eq!(ctx.get(*node, "id").unwrap(), Value::from("0"));
        assert_eq!(ctx.get(root, "nodes.0.url").unwrap(), Value::from("web1"));
    }

    #[test]
    fn test_node_list_is_wrapped_and_checked() {
        let mut ctx = Context::new();
        let root = ctx.scopes.create(None, Rc::default(), Role::Plain);
        let err = ctx
            .set(root, "node", Value::List(vec![Value::from("web1")]))
            .unwrap_err();

        assert!(matches!(err, KiteError::Config(ConfigError::Invalid(_))));
        assert!(!ctx.has(root, "node").unwrap());
    }

    #[test]
    fn test_nodes_map_keeps_ids() {
        let mut ctx = Context::new();
        let root = ctx.scopes.create(None, Rc::default(), Role::Plain);
        let mut nodes = ValueMap::new();
        nodes.insert("web".into(), options(&[("host", "web.example.com")]));
        nodes.insert("db".into(), options(&[("host", "db.example.com"), ("user", "admin")]));
        ctx.set(root, "nodes", Value::Map(nodes)).unwrap();

        assert_eq!(ctx.get(root, "nodes.web.id").unwrap(), Value::from("web"));
        assert_eq!(
            ctx.get(root, "nodes.db.url").unwrap(),
            Value::from("admin@db.example.com")
        );
    }
}
