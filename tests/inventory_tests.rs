//! Inventory resolution integration tests.

use std::io::Write;

use rossh::inventory::{expand, Inventory};

fn write_inventory(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

const FLEET: &str = r#"
bastion host=203.0.113.1

[web]
web[01-03] host=10.1.0.1 user=www

[db]
db1:5022
db2

[db:vars]
user=postgres
password=pgpass

[dc1:children]
web
db

[dc1:vars]
port=2222
user=operator
"#;

#[test]
fn loads_from_disk_and_resolves_groups() {
    let file = write_inventory(FLEET);
    let inventory = Inventory::load(file.path()).unwrap();

    assert_eq!(inventory.all_hosts().len(), 6);

    let dc1: Vec<&str> = inventory
        .hosts_in_group("dc1")
        .unwrap()
        .iter()
        .map(|h| h.alias.as_str())
        .collect();
    assert_eq!(dc1, vec!["web01", "web02", "web03", "db1", "db2"]);
}

#[test]
fn merge_precedence_host_then_nearest_group() {
    let file = write_inventory(FLEET);
    let inventory = Inventory::load(file.path()).unwrap();

    // host-local beats every group
    let web01 = inventory
        .merged_host(inventory.get_host("web01").unwrap());
    assert_eq!(web01.user.as_deref(), Some("www"));
    // nothing closer than dc1 declares a port
    assert_eq!(web01.port, Some(2222));

    // the direct group beats the parent
    let db2 = inventory.merged_host(inventory.get_host("db2").unwrap());
    assert_eq!(db2.user.as_deref(), Some("postgres"));
    assert_eq!(db2.password.as_deref(), Some("pgpass"));
    // port on the host line beats the group var
    let db1 = inventory.merged_host(inventory.get_host("db1").unwrap());
    assert_eq!(db1.port, Some(5022));
}

#[test]
fn selection_follows_group_alias_anonymous_order() {
    let file = write_inventory(FLEET);
    let inventory = Inventory::load(file.path()).unwrap();

    // group name
    assert_eq!(inventory.select(&["web".into()]).unwrap().len(), 3);

    // host alias
    let one = inventory.select(&["db1".into()]).unwrap();
    assert_eq!(one[0].alias, "db1");

    // pattern whose expansions are aliases
    let expanded = inventory.select(&["web[01-02]".into()]).unwrap();
    assert_eq!(expanded.len(), 2);
    assert_eq!(expanded[0].user.as_deref(), Some("www"));

    // unknown name becomes an anonymous host
    let anon = inventory.select(&["10.9.9.9".into()]).unwrap();
    assert_eq!(anon[0].alias, "10.9.9.9");
    assert_eq!(anon[0].address, "10.9.9.9");
    assert_eq!(anon[0].port, None);
}

#[test]
fn selection_deduplicates_preserving_first_seen_order() {
    let file = write_inventory(FLEET);
    let inventory = Inventory::load(file.path()).unwrap();

    let hosts = inventory
        .select(&["db2".into(), "dc1".into(), "web01".into()])
        .unwrap();
    let aliases: Vec<&str> = hosts.iter().map(|h| h.alias.as_str()).collect();
    assert_eq!(aliases, vec!["db2", "web01", "web02", "web03", "db1"]);
}

#[test]
fn pattern_expansion_is_deterministic() {
    assert_eq!(expand("h[01-03]").unwrap(), vec!["h01", "h02", "h03"]);
    assert_eq!(expand("h[01-03]").unwrap(), expand("h[01-03]").unwrap());
}

#[test]
fn cyclic_children_fail_to_parse() {
    let file = write_inventory(
        r#"
[a:children]
b

[b:children]
c

[c:children]
a
"#,
    );
    let err = Inventory::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("cyclic"), "got: {}", err);
}

#[test]
fn unknown_keys_are_kept_as_vars() {
    let file = write_inventory("h1 rack=r12 host=10.0.0.9\n");
    let inventory = Inventory::load(file.path()).unwrap();
    let host = inventory.get_host("h1").unwrap();
    assert_eq!(host.vars.get("rack").map(String::as_str), Some("r12"));
    assert_eq!(host.address, "10.0.0.9");
}
