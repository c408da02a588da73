//! Inventory management for rossh.
//!
//! Parses the declarative host file and resolves command-line selections
//! into concrete host lists. The grammar supports:
//!
//! - bare host lines: `alias[:port] [k=v ...]`
//! - group sections: `[name]` followed by host lines
//! - group-of-groups: `[name:children]` listing sub-group names
//! - group-wide vars: `[name:vars]` with `k=v` lines
//!
//! Comments start with `#` or `;`. Hosts declared before any section land
//! in the implicit `ungrouped` group.

pub mod group;
pub mod host;
pub mod pattern;

pub use group::Group;
pub use host::{Host, HostParseError};
pub use pattern::{expand, PatternError};

use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// Name of the implicit group for hosts declared outside any section.
const UNGROUPED: &str = "ungrouped";

/// The parsed inventory: hosts and groups, both in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    hosts: IndexMap<String, Host>,
    groups: IndexMap<String, Group>,
    source: PathBuf,
}

enum Section {
    Hosts(String),
    Children(String),
    Vars(String),
}

impl Inventory {
    /// Parse an inventory file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::inventory_parse(path, e.to_string()))?;
        Self::parse(&content, path)
    }

    /// Parse inventory text; `source` is used for diagnostics only.
    pub fn parse(content: &str, source: &Path) -> Result<Self> {
        let mut inventory = Self {
            source: source.to_path_buf(),
            ..Default::default()
        };

        let mut section = Section::Hosts(UNGROUPED.to_string());

        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') {
                section = inventory.parse_section_header(line, source, lineno + 1)?;
                continue;
            }

            match &section {
                Section::Hosts(group) => {
                    let parsed = Host::parse(line).map_err(|e| {
                        Error::inventory_parse(source, format!("line {}: {}", lineno + 1, e))
                    })?;
                    // a host line may itself be a bracket pattern
                    let names = pattern::expand(&parsed.alias).map_err(|e| {
                        Error::inventory_parse(source, format!("line {}: {}", lineno + 1, e))
                    })?;
                    for name in names {
                        let mut host = parsed.clone();
                        if host.address == host.alias {
                            host.address = name.clone();
                        }
                        host.alias = name;
                        inventory.add_host_to_group(host, group.clone());
                    }
                }
                Section::Children(group) => {
                    let child = line.to_string();
                    inventory.ensure_group(&child);
                    if let Some(g) = inventory.groups.get_mut(group.as_str()) {
                        g.add_child(child);
                    }
                }
                Section::Vars(group) => {
                    let (key, value) = line.split_once('=').ok_or_else(|| {
                        Error::inventory_parse(
                            source,
                            format!("line {}: expected k=v in vars section", lineno + 1),
                        )
                    })?;
                    if let Some(g) = inventory.groups.get_mut(group.as_str()) {
                        g.set_var(key.trim(), value.trim());
                    }
                }
            }
        }

        inventory.check_children_cycles()?;

        debug!(
            hosts = inventory.hosts.len(),
            groups = inventory.groups.len(),
            source = %source.display(),
            "inventory parsed"
        );

        Ok(inventory)
    }

    fn parse_section_header(
        &mut self,
        line: &str,
        source: &Path,
        lineno: usize,
    ) -> Result<Section> {
        let inner = line
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(|| {
                Error::inventory_parse(source, format!("line {}: malformed section header", lineno))
            })?;

        if inner.is_empty() {
            return Err(Error::inventory_parse(
                source,
                format!("line {}: empty section name", lineno),
            ));
        }

        match inner.rsplit_once(':') {
            Some((name, "children")) => {
                self.ensure_group(name);
                Ok(Section::Children(name.to_string()))
            }
            Some((name, "vars")) => {
                self.ensure_group(name);
                Ok(Section::Vars(name.to_string()))
            }
            Some((_, suffix)) => Err(Error::inventory_parse(
                source,
                format!("line {}: unknown section suffix ':{}'", lineno, suffix),
            )),
            None => {
                self.ensure_group(inner);
                Ok(Section::Hosts(inner.to_string()))
            }
        }
    }

    fn ensure_group(&mut self, name: &str) {
        if !self.groups.contains_key(name) {
            self.groups.insert(name.to_string(), Group::new(name));
        }
    }

    fn add_host_to_group(&mut self, mut host: Host, group: String) {
        self.ensure_group(&group);
        if let Some(g) = self.groups.get_mut(&group) {
            g.add_host(host.alias.clone());
        }

        match self.hosts.get_mut(&host.alias) {
            Some(existing) => {
                // later lines refine the same host
                existing.add_to_group(group);
                if host.address != host.alias {
                    existing.address = host.address;
                }
                if host.port.is_some() {
                    existing.port = host.port;
                }
                if host.user.is_some() {
                    existing.user = host.user;
                }
                if host.password.is_some() {
                    existing.password = host.password;
                }
                if !host.keys.is_empty() {
                    existing.keys = host.keys;
                }
                if host.passphrase.is_some() {
                    existing.passphrase = host.passphrase;
                }
                for (k, v) in host.vars {
                    existing.vars.insert(k, v);
                }
            }
            None => {
                host.add_to_group(group);
                self.hosts.insert(host.alias.clone(), host);
            }
        }
    }

    /// Fail when the `:children` graph contains a cycle.
    fn check_children_cycles(&self) -> Result<()> {
        let mut done: HashSet<&str> = HashSet::new();

        for name in self.groups.keys() {
            let mut trail: Vec<&str> = Vec::new();
            self.visit_group(name, &mut trail, &mut done)?;
        }

        Ok(())
    }

    fn visit_group<'a>(
        &'a self,
        name: &'a str,
        trail: &mut Vec<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Result<()> {
        if done.contains(name) {
            return Ok(());
        }
        if let Some(pos) = trail.iter().position(|g| *g == name) {
            let cycle = trail[pos..].join(" -> ");
            return Err(Error::inventory_parse(
                &self.source,
                format!("cyclic group children: {} -> {}", cycle, name),
            ));
        }

        trail.push(name);
        if let Some(group) = self.groups.get(name) {
            for child in &group.children {
                self.visit_group(child, trail, done)?;
            }
        }
        trail.pop();
        done.insert(name);

        Ok(())
    }

    /// Get a host by alias.
    pub fn get_host(&self, alias: &str) -> Option<&Host> {
        self.hosts.get(alias)
    }

    /// Get a group by name.
    pub fn get_group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// All hosts in first-seen order.
    pub fn all_hosts(&self) -> Vec<&Host> {
        self.hosts.values().collect()
    }

    /// Transitive members of a group, first-seen order, deduplicated.
    /// Returns `None` when no such group exists.
    pub fn hosts_in_group(&self, name: &str) -> Option<Vec<&Host>> {
        let group = self.groups.get(name)?;

        let mut seen: HashSet<&str> = HashSet::new();
        let mut out: Vec<&Host> = Vec::new();
        self.collect_group_hosts(group, &mut seen, &mut out);
        Some(out)
    }

    fn collect_group_hosts<'a>(
        &'a self,
        group: &'a Group,
        seen: &mut HashSet<&'a str>,
        out: &mut Vec<&'a Host>,
    ) {
        for alias in &group.hosts {
            if let Some(host) = self.hosts.get(alias) {
                if seen.insert(alias) {
                    out.push(host);
                }
            }
        }
        for child in &group.children {
            if let Some(child_group) = self.groups.get(child) {
                self.collect_group_hosts(child_group, seen, out);
            }
        }
    }

    /// Look up a group-provided default for `key`, nearest declaring group
    /// first: the host's direct groups in declaration order, then their
    /// parents breadth-first.
    pub fn group_var(&self, host: &Host, key: &str) -> Option<&str> {
        let mut queue: Vec<&str> = host.groups.iter().map(String::as_str).collect();
        let mut visited: HashSet<&str> = queue.iter().copied().collect();
        let mut index = 0;

        while index < queue.len() {
            let name = queue[index];
            index += 1;

            if let Some(group) = self.groups.get(name) {
                if let Some(value) = group.vars.get(key) {
                    return Some(value);
                }
            }

            // walk up: every group that lists this one as a child
            for (parent_name, parent) in &self.groups {
                if parent.children.iter().any(|c| c == name)
                    && visited.insert(parent_name.as_str())
                {
                    queue.push(parent_name);
                }
            }
        }

        None
    }

    /// Produce a copy of `host` with group-provided defaults filled into
    /// fields the host itself does not set.
    pub fn merged_host(&self, host: &Host) -> Host {
        let mut merged = host.clone();

        if merged.port.is_none() {
            merged.port = self
                .group_var(host, "port")
                .and_then(|v| v.parse::<u16>().ok());
        }
        if merged.user.is_none() {
            merged.user = self.group_var(host, "user").map(String::from);
        }
        if merged.password.is_none() {
            merged.password = self.group_var(host, "password").map(String::from);
        }
        if merged.keys.is_empty() {
            if let Some(keys) = self.group_var(host, "keys") {
                merged.keys = keys
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
            }
        }
        if merged.passphrase.is_none() {
            merged.passphrase = self.group_var(host, "passphrase").map(String::from);
        }

        merged
    }

    /// Resolve command-line host selections against the inventory.
    ///
    /// Rules, per argument after bracket expansion:
    /// 1. a group name expands to its transitive members;
    /// 2. a host alias selects that host;
    /// 3. anything else becomes an anonymous host whose address equals the
    ///    name.
    ///
    /// No arguments selects every inventoried host. The result is
    /// deduplicated by alias, preserving first-seen order, with group
    /// defaults merged in.
    pub fn select(&self, args: &[String]) -> Result<Vec<Host>> {
        let mut out: Vec<Host> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        let mut push = |host: Host, out: &mut Vec<Host>, seen: &mut HashSet<String>| {
            if seen.insert(host.alias.clone()) {
                out.push(host);
            }
        };

        if args.is_empty() {
            for host in self.hosts.values() {
                push(self.merged_host(host), &mut out, &mut seen);
            }
            return Ok(out);
        }

        for arg in args {
            let arg = arg.trim();
            if arg.is_empty() {
                continue;
            }

            let names =
                pattern::expand(arg).map_err(|e| Error::InvalidHostPattern(e.to_string()))?;

            for name in names {
                if let Some(members) = self.hosts_in_group(&name) {
                    for host in members {
                        push(self.merged_host(host), &mut out, &mut seen);
                    }
                } else if let Some(host) = self.hosts.get(&name) {
                    push(self.merged_host(host), &mut out, &mut seen);
                } else {
                    push(Host::new(name), &mut out, &mut seen);
                }
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# edge hosts
gateway host=203.0.113.7 port=2222

[web]
web1 host=10.0.0.1
web2 host=10.0.0.2 user=deploy

[db]
db[1-2] user=postgres

[db:vars]
port=5433
password=dbsecret

[site:children]
web
db

[site:vars]
user=admin
"#;

    fn sample() -> Inventory {
        Inventory::parse(SAMPLE, Path::new("sample.ini")).unwrap()
    }

    #[test]
    fn test_parse_hosts_and_groups() {
        let inv = sample();
        assert_eq!(inv.all_hosts().len(), 5);
        assert!(inv.get_host("gateway").is_some());
        assert!(inv.get_group("web").is_some());
        assert_eq!(inv.get_group("site").unwrap().children, vec!["web", "db"]);
    }

    #[test]
    fn test_host_line_pattern_expands() {
        let inv = sample();
        assert!(inv.get_host("db1").is_some());
        assert!(inv.get_host("db2").is_some());
    }

    #[test]
    fn test_ungrouped_host() {
        let inv = sample();
        let gateway = inv.get_host("gateway").unwrap();
        assert_eq!(gateway.groups, vec!["ungrouped"]);
        assert_eq!(gateway.port, Some(2222));
        assert_eq!(gateway.address, "203.0.113.7");
    }

    #[test]
    fn test_group_membership_is_transitive() {
        let inv = sample();
        let aliases: Vec<&str> = inv
            .hosts_in_group("site")
            .unwrap()
            .iter()
            .map(|h| h.alias.as_str())
            .collect();
        assert_eq!(aliases, vec!["web1", "web2", "db1", "db2"]);
    }

    #[test]
    fn test_group_vars_nearest_wins() {
        let inv = sample();
        let db1 = inv.merged_host(inv.get_host("db1").unwrap());
        // direct group `db` declares user=postgres on the host line and
        // password/port in vars; parent `site` declares user=admin
        assert_eq!(db1.user.as_deref(), Some("postgres"));
        assert_eq!(db1.port, Some(5433));
        assert_eq!(db1.password.as_deref(), Some("dbsecret"));

        let web1 = inv.merged_host(inv.get_host("web1").unwrap());
        // no user anywhere closer than the parent group
        assert_eq!(web1.user.as_deref(), Some("admin"));
        assert_eq!(web1.port, None);
    }

    #[test]
    fn test_select_group_alias_anonymous() {
        let inv = sample();

        let by_group = inv.select(&["web".into()]).unwrap();
        assert_eq!(by_group.len(), 2);

        let by_alias = inv.select(&["db2".into()]).unwrap();
        assert_eq!(by_alias.len(), 1);
        assert_eq!(by_alias[0].alias, "db2");

        let anonymous = inv.select(&["198.51.100.9".into()]).unwrap();
        assert_eq!(anonymous[0].alias, "198.51.100.9");
        assert_eq!(anonymous[0].address, "198.51.100.9");
    }

    #[test]
    fn test_select_pattern_reapplies_rules() {
        let inv = sample();
        let hosts = inv.select(&["db[1-2]".into()]).unwrap();
        let aliases: Vec<&str> = hosts.iter().map(|h| h.alias.as_str()).collect();
        assert_eq!(aliases, vec!["db1", "db2"]);
        // inventory entries were matched, so group vars flowed in
        assert_eq!(hosts[0].port, Some(5433));
    }

    #[test]
    fn test_select_dedups_preserving_order() {
        let inv = sample();
        let hosts = inv
            .select(&["db2".into(), "site".into(), "db2".into()])
            .unwrap();
        let aliases: Vec<&str> = hosts.iter().map(|h| h.alias.as_str()).collect();
        assert_eq!(aliases, vec!["db2", "web1", "web2", "db1"]);
    }

    #[test]
    fn test_select_no_args_returns_all() {
        let inv = sample();
        assert_eq!(inv.select(&[]).unwrap().len(), 5);
    }

    #[test]
    fn test_children_cycle_detected() {
        let cyclic = r#"
[a:children]
b

[b:children]
a
"#;
        let err = Inventory::parse(cyclic, Path::new("cyclic.ini")).unwrap_err();
        assert!(err.to_string().contains("cyclic"));
    }

    #[test]
    fn test_self_cycle_detected() {
        let cyclic = "[a:children]\na\n";
        assert!(Inventory::parse(cyclic, Path::new("c.ini")).is_err());
    }

    #[test]
    fn test_vars_section_requires_kv() {
        let bad = "[g:vars]\nnot-an-assignment\n";
        assert!(Inventory::parse(bad, Path::new("bad.ini")).is_err());
    }

    #[test]
    fn test_unknown_section_suffix_rejected() {
        let bad = "[g:weird]\n";
        assert!(Inventory::parse(bad, Path::new("bad.ini")).is_err());
    }
}
