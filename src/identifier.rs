//! Identifiers and Namespace Ownership
//!
//! A rewrite only looks at the `namespace:name` shape of a string. Semantics
//! are never consulted.

use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::LazyLock;

static IDENTIFIER_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9_.\-]+):([A-Za-z0-9_.\-/]+)$").expect("static identifier pattern")
});

/// Strings that look like identifiers to a naive scan but never are.
const VERSION_LITERALS: &[&str] = &["1.21.0", "1.20.0", "1.12.0"];

/// A parsed `<namespace>:<name>` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    pub namespace: String,
    pub name: String,
}

impl Identifier {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse a string with identifier shape. Returns `None` for anything else.
    pub fn parse(s: &str) -> Option<Self> {
        let caps = IDENTIFIER_SHAPE.captures(s)?;
        Some(Self::new(&caps[1], &caps[2]))
    }

    /// The part after the namespace, or the whole string if there is none.
    pub fn short_name(s: &str) -> &str {
        match s.split_once(':') {
            Some((_, name)) => name,
            None => s,
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

/// Rewrites foreign namespaces onto the owned one.
#[derive(Debug, Clone)]
pub struct NamespaceRewriter {
    owned: String,
    reserved: String,
}

impl NamespaceRewriter {
    pub fn new(owned: impl Into<String>, reserved: impl Into<String>) -> Self {
        Self {
            owned: owned.into(),
            reserved: reserved.into(),
        }
    }

    pub fn owned(&self) -> &str {
        &self.owned
    }

    pub fn reserved(&self) -> &str {
        &self.reserved
    }

    /// `<owned>:<name>`
    pub fn own(&self, name: &str) -> String {
        Identifier::new(self.owned.as_str(), name).to_string()
    }

    /// Rewrite a single token. Returns `None` when the token is left alone.
    pub fn rewrite_token(&self, s: &str) -> Option<String> {
        if VERSION_LITERALS.contains(&s) || s.starts_with("textures/") {
            return None;
        }
        let id = Identifier::parse(s)?;
        if id.namespace == self.reserved || id.namespace == self.owned {
            return None;
        }
        if id.namespace.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return None;
        }
        Some(self.own(&id.name))
    }

    /// Walk the tree bottom-up, rewriting every key and every string leaf.
    ///
    /// Returns the transformed copy and whether anything changed.
    pub fn rewrite(&self, value: &Value) -> (Value, bool) {
        let (out, changed, _) = self.rewrite_reporting(value);
        (out, changed)
    }

    /// Like [`rewrite`](Self::rewrite), but also returns the object keys that
    /// two siblings rewrote onto. The later sibling's value is kept.
    pub fn rewrite_reporting(&self, value: &Value) -> (Value, bool, Vec<String>) {
        let mut collisions = Vec::new();
        let (out, changed) = self.walk(value, &mut collisions);
        (out, changed, collisions)
    }

    fn walk(&self, value: &Value, collisions: &mut Vec<String>) -> (Value, bool) {
        match value {
            Value::Object(map) => {
                let mut changed = false;
                let mut out = Map::with_capacity(map.len());
                for (key, child) in map {
                    let new_key = match self.rewrite_token(key) {
                        Some(k) => {
                            changed = true;
                            k
                        }
                        None => key.clone(),
                    };
                    let (new_child, child_changed) = self.walk(child, collisions);
                    changed |= child_changed;
                    if out.insert(new_key.clone(), new_child).is_some() {
                        collisions.push(new_key);
                    }
                }
                (Value::Object(out), changed)
            }
            Value::Array(items) => {
                let mut changed = false;
                let out = items
                    .iter()
                    .map(|item| {
                        let (new_item, item_changed) = self.walk(item, collisions);
                        changed |= item_changed;
                        new_item
                    })
                    .collect();
                (Value::Array(out), changed)
            }
            Value::String(s) => match self.rewrite_token(s) {
                Some(new) => (Value::String(new), true),
                None => (value.clone(), false),
            },
            _ => (value.clone(), false),
        }
    }
}
