//! Group definition for the rossh inventory.

use indexmap::IndexMap;

/// A named collection of hosts with shared variables.
///
/// Membership is transitive through `children`; `vars` provide defaults
/// consumed by member hosts that do not override them.
#[derive(Debug, Clone, Default)]
pub struct Group {
    /// Group name
    pub name: String,

    /// Member host aliases, in declaration order
    pub hosts: Vec<String>,

    /// Child group names, in declaration order
    pub children: Vec<String>,

    /// Group-wide variable defaults
    pub vars: IndexMap<String, String>,
}

impl Group {
    /// Create a new empty group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a member host, ignoring duplicates.
    pub fn add_host(&mut self, alias: impl Into<String>) {
        let alias = alias.into();
        if !self.hosts.contains(&alias) {
            self.hosts.push(alias);
        }
    }

    /// Add a child group, ignoring duplicates.
    pub fn add_child(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.children.contains(&name) {
            self.children.push(name);
        }
    }

    /// Set a group variable.
    pub fn set_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_members_deduplicate() {
        let mut group = Group::new("web");
        group.add_host("h1");
        group.add_host("h2");
        group.add_host("h1");
        assert_eq!(group.hosts, vec!["h1", "h2"]);
    }

    #[test]
    fn test_children_keep_order() {
        let mut group = Group::new("dc");
        group.add_child("web");
        group.add_child("db");
        assert_eq!(group.children, vec!["web", "db"]);
    }
}
