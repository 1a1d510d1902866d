// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::fmt;

/// Path components that may never appear inside an instance name. They act
/// as markers in ByteStream resource names (`blobs`, `uploads`) and in
/// rewritten operation names (`operations`), so allowing them inside an
/// instance name would make those grammars ambiguous.
const RESERVED_COMPONENTS: [&str; 3] = ["blobs", "uploads", "operations"];

/// The namespace half of a blob or operation key: a slash-separated path,
/// possibly empty. Distinct tenants sharing one backend use distinct
/// instance names; the instance name is not part of content identity.
#[derive(Clone, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct InstanceName(String);

impl InstanceName {
    pub const EMPTY: InstanceName = InstanceName(String::new());

    pub fn new(value: impl Into<String>) -> Result<Self, String> {
        let value = value.into();
        if !value.is_empty() {
            for component in value.split('/') {
                if component.is_empty() {
                    return Err(format!(
                        "Instance name {value:?} contains a redundant slash"
                    ));
                }
                if RESERVED_COMPONENTS.contains(&component) {
                    return Err(format!(
                        "Instance name {value:?} contains reserved keyword {component:?}"
                    ));
                }
            }
        }
        Ok(InstanceName(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Prepend this instance name to a path, omitting the separator when the
    /// instance name is empty. Used to construct resource and operation
    /// names.
    pub fn join_path(&self, suffix: &str) -> String {
        if self.0.is_empty() {
            suffix.to_owned()
        } else if suffix.is_empty() {
            self.0.clone()
        } else {
            format!("{}/{}", self.0, suffix)
        }
    }
}

impl fmt::Debug for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceName({:?})", self.0)
    }
}

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct TrieNode<T> {
    value: Option<T>,
    children: HashMap<String, TrieNode<T>>,
}

impl<T> TrieNode<T> {
    fn new() -> Self {
        TrieNode {
            value: None,
            children: HashMap::new(),
        }
    }
}

/// Longest-prefix map from instance name prefixes to values. Prefixes match
/// on whole path components: `"foo"` is a prefix of `"foo/bar"` but not of
/// `"foobar"`. Immutable after construction in all current uses.
pub struct InstanceNameTrie<T> {
    root: TrieNode<T>,
}

impl<T> InstanceNameTrie<T> {
    pub fn new() -> Self {
        InstanceNameTrie {
            root: TrieNode::new(),
        }
    }

    /// Insert `value` under `prefix`, replacing any previous value there.
    pub fn set(&mut self, prefix: &InstanceName, value: T) {
        let mut node = &mut self.root;
        if !prefix.is_empty() {
            for component in prefix.as_str().split('/') {
                node = node
                    .children
                    .entry(component.to_owned())
                    .or_insert_with(TrieNode::new);
            }
        }
        node.value = Some(value);
    }

    /// Look up the entry with the longest matching prefix of `name`.
    /// Returns the value, the matched prefix and the remainder of the name
    /// (without the separating slash).
    pub fn get_longest_prefix<'a, 'b>(
        &'a self,
        name: &'b str,
    ) -> Option<(&'a T, &'b str, &'b str)> {
        let mut node = &self.root;
        let mut best: Option<(&'a T, usize)> = node.value.as_ref().map(|v| (v, 0));
        if !name.is_empty() {
            let mut start = 0usize;
            for component in name.split('/') {
                node = match node.children.get(component) {
                    Some(child) => child,
                    None => break,
                };
                let end = start + component.len();
                if let Some(v) = node.value.as_ref() {
                    best = Some((v, end));
                }
                start = end + 1;
            }
        }

        let (value, end) = best?;
        let remainder = if end == name.len() {
            ""
        } else if end == 0 {
            name
        } else {
            &name[end + 1..]
        };
        Some((value, &name[..end], remainder))
    }
}

impl<T> Default for InstanceNameTrie<T> {
    fn default() -> Self {
        Self::new()
    }
}
