//! Dot-path access on scopes
//!
//! Paths are split on `.`. The first segment picks the scope the walk starts
//! in (see [`Context::find_context`]), the remaining segments descend into
//! scope variables, map keys and list indexes. Intermediate values are
//! expanded against the scope the access was made from, so templates stored
//! higher up the tree see the variables of the reader.

use crate::error::{ConfigError, Result, ScopeError};
use crate::runner::Context;
use crate::scope::{ScopeId, Value, ValueMap};

/// Where resolution of a path continues after its first segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    /// Walk locally in the scope, starting at the given segment index
    Local(ScopeId, usize),
    /// Resolve the rest of the path (from the index) on the parent scope
    Parent(ScopeId, usize),
}

fn join_path(parts: &[&str], last: &str) -> String {
    let mut path = parts.join(".");
    if !path.is_empty() {
        path.push('.');
    }
    path.push_str(last);
    path
}

impl Context {
    fn find_context(&self, scope: ScopeId, parts: &[&str]) -> Result<Anchor> {
        let Some(first) = parts.first() else {
            return Ok(Anchor::Local(scope, 0));
        };

        // Declared variables never inherit from ancestors
        if self.scopes.is_declared(scope, first) {
            return Ok(Anchor::Local(scope, 0));
        }

        match *first {
            "this" => Ok(Anchor::Local(scope, 1)),
            "parent" => self
                .scopes
                .parent(scope)
                .map(|parent| Anchor::Parent(parent, 1))
                .ok_or_else(|| ScopeError::NoParent.into()),
            name => Ok(Anchor::Local(
                self.scopes.find_holder(scope, name).unwrap_or(scope),
                0,
            )),
        }
    }

    /// Resolve `path` from `scope`, failing with a missing variable error
    pub fn get(&mut self, scope: ScopeId, path: &str) -> Result<Value> {
        self.lookup(scope, path)?
            .ok_or_else(|| ScopeError::MissingVariable(path.to_string()).into())
    }

    /// Resolve `path` from `scope`, falling back to `default` when missing
    pub fn get_or(&mut self, scope: ScopeId, path: &str, default: Value) -> Result<Value> {
        Ok(self.lookup(scope, path)?.unwrap_or(default))
    }

    pub fn has(&mut self, scope: ScopeId, path: &str) -> Result<bool> {
        Ok(self.lookup(scope, path)?.is_some())
    }

    fn lookup(&mut self, scope: ScopeId, path: &str) -> Result<Option<Value>> {
        let parts: Vec<&str> = path.split('.').collect();

        let (mut value, mut index) = match self.find_context(scope, &parts)? {
            Anchor::Parent(parent, next) => {
                if next == parts.len() {
                    return Ok(Some(Value::Scope(parent)));
                }
                return self.lookup(parent, &parts[next..].join("."));
            }
            Anchor::Local(context, next) => (Value::Scope(context), next),
        };

        while index < parts.len() {
            let part = parts[index];
            index += 1;

            let raw = match &value {
                Value::Scope(id) => self.scopes.local(*id, part).cloned(),
                Value::Map(map) => map.get(part).cloned(),
                Value::List(items) => part
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned()),
                _ => None,
            };
            let Some(raw) = raw else {
                return Ok(None);
            };

            value = self.evaluate(raw, scope)?;

            if index < parts.len() {
                if let Value::Scope(id) = value {
                    if id != scope {
                        return self.lookup(id, &parts[index..].join("."));
                    }
                }
            }
        }

        Ok(Some(value))
    }

    /// Assign `value` at `path`, creating intermediate maps as needed
    pub fn set(&mut self, scope: ScopeId, path: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if path == "this" || path == "parent" {
            return Err(ScopeError::ReservedName(path.to_string()).into());
        }

        let mut parts: Vec<&str> = path.split('.').collect();
        let Some(last) = parts.pop() else {
            return Ok(());
        };
        let (last, value) = self.filter_special_names(scope, last, value)?;

        match self.find_context(scope, &parts)? {
            Anchor::Parent(parent, next) => self.set(parent, &join_path(&parts[next..], &last), value),
            Anchor::Local(context, next) => {
                self.set_within(scope, context, &parts[next..], &last, value, path)
            }
        }
    }

    fn set_within(
        &mut self,
        scope: ScopeId,
        context: ScopeId,
        prefix: &[&str],
        last: &str,
        value: Value,
        path: &str,
    ) -> Result<()> {
        let Some((head, rest)) = prefix.split_first() else {
            return self.assign(context, last, value);
        };

        let mut current = self
            .scopes
            .local(context, head)
            .cloned()
            .unwrap_or(Value::Null);

        if let Value::Scope(id) = current {
            return if id == scope {
                self.set_within(scope, id, rest, last, value, path)
            } else {
                self.set(id, &join_path(rest, last), value)
            };
        }

        self.place_value(scope, &mut current, rest, last, value, path)?;
        self.scopes.insert_local(context, head, current);
        Ok(())
    }

    /// Write into a nested map/list value, handing over to `set` when the
    /// walk runs into a scope reference.
    fn place_value(
        &mut self,
        scope: ScopeId,
        target: &mut Value,
        keys: &[&str],
        last: &str,
        value: Value,
        path: &str,
    ) -> Result<()> {
        if matches!(target, Value::String(s) if crate::expression::is_template(s)) {
            *target = self.evaluate(target.clone(), scope)?;
        }
        if target.is_null() {
            *target = Value::Map(ValueMap::new());
        }
        if let Value::Scope(id) = target {
            let id = *id;
            return self.set(id, &join_path(keys, last), value);
        }

        match keys.split_first() {
            None => insert_into(target, last, value, path),
            Some((key, rest)) => {
                let child = child_slot(target, key, path)?;
                self.place_value(scope, child, rest, last, value, path)
            }
        }
    }

    /// Remove the variable at `path`; missing paths are ignored
    pub fn remove(&mut self, scope: ScopeId, path: &str) -> Result<()> {
        if path == "this" || path == "parent" {
            return Err(ScopeError::ReservedName(path.to_string()).into());
        }

        let mut parts: Vec<&str> = path.split('.').collect();
        let Some(last) = parts.pop() else {
            return Ok(());
        };

        let (context, next) = match self.find_context(scope, &parts)? {
            Anchor::Parent(parent, next) => {
                return self.remove(parent, &join_path(&parts[next..], last));
            }
            Anchor::Local(context, next) => (context, next),
        };

        let prefix = &parts[next..];
        let Some((head, rest)) = prefix.split_first() else {
            self.scopes.remove_local(context, last);
            return Ok(());
        };

        let Some(mut current) = self.scopes.local(context, head).cloned() else {
            return Ok(());
        };
        if let Value::Scope(id) = current {
            return self.remove(id, &join_path(rest, last));
        }

        match remove_nested(&mut current, rest, last) {
            Removal::Delegate(id, remaining) => self.remove(id, &remaining),
            Removal::Removed => {
                self.scopes.insert_local(context, head, current);
                Ok(())
            }
            Removal::Missing => Ok(()),
        }
    }

    /// Set every entry of `values` on `scope`, in order
    pub fn set_from_map(&mut self, scope: ScopeId, values: ValueMap) -> Result<()> {
        for (key, value) in values {
            self.set(scope, &key, value)?;
        }
        Ok(())
    }

    /// `node: {...}` (or a list) becomes `nodes: [{...}]`, and `nodes`
    /// entries become node scopes tagged with their key as `id`.
    fn filter_special_names(
        &mut self,
        scope: ScopeId,
        key: &str,
        value: Value,
    ) -> Result<(String, Value)> {
        let (key, value) = match (key, value) {
            ("node", node @ (Value::Map(_) | Value::List(_))) => {
                ("nodes", Value::List(vec![node]))
            }
            (key, value) => (key, value),
        };

        if key != "nodes" {
            return Ok((key.to_string(), value));
        }

        let Some(entries) = value.entries() else {
            return Ok((key.to_string(), value));
        };

        let mut nodes = ValueMap::new();
        for (id, entry) in entries {
            let id = id.to_string();
            let node = match entry {
                Value::Scope(node) if self.scopes.is_node(node) => node,
                options @ Value::Map(_) => self.create_node(scope, options)?,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "Node '{}' must be a map of node settings, got {}",
                        id,
                        other.type_name()
                    ))
                    .into())
                }
            };
            self.scopes.insert_local(node, "id", Value::String(id.clone()));
            nodes.insert(id, Value::Scope(node));
        }

        Ok((key.to_string(), Value::Map(nodes)))
    }
}

fn child_slot<'a>(target: &'a mut Value, key: &str, path: &str) -> Result<&'a mut Value> {
    match target {
        Value::Map(map) => Ok(map.entry(key.to_string()).or_insert(Value::Null)),
        Value::List(items) => {
            let index = key
                .parse::<usize>()
                .map_err(|_| ScopeError::InvalidTarget(path.to_string()))?;
            if index == items.len() {
                items.push(Value::Null);
            }
            items
                .get_mut(index)
                .ok_or_else(|| ScopeError::InvalidTarget(path.to_string()).into())
        }
        _ => Err(ScopeError::InvalidTarget(path.to_string()).into()),
    }
}

fn insert_into(target: &mut Value, key: &str, value: Value, path: &str) -> Result<()> {
    let slot = child_slot(target, key, path)?;
    *slot = value;
    Ok(())
}

enum Removal {
    Removed,
    Missing,
    Delegate(ScopeId, String),
}

fn remove_nested(target: &mut Value, keys: &[&str], last: &str) -> Removal {
    match keys.split_first() {
        Some((key, rest)) => {
            let child = match target {
                Value::Map(map) => map.get_mut(*key),
                Value::List(items) => key.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
                _ => None,
            };
            match child {
                Some(Value::Scope(id)) => Removal::Delegate(*id, join_path(rest, last)),
                Some(child) => remove_nested(child, rest, last),
                None => Removal::Missing,
            }
        }
        None => match target {
            Value::Map(map) => match map.shift_remove(last) {
                Some(_) => Removal::Removed,
                None => Removal::Missing,
            },
            Value::List(items) => match last.parse::<usize>() {
                Ok(i) if i < items.len() => {
                    items.remove(i);
                    Removal::Removed
                }
                _ => Removal::Missing,
            },
            _ => Removal::Missing,
        },
    }
}
