//! Assembly from persisted records.

use wing::assembly::assemble;
use wing::runtime::{ProfileCompiler, TomlCompiler};
use wing::store::{MemoryStore, ProfileKind, Repository};

const ROUTING: &str = r#"
fallback = "hk"

[[rules]]
condition = "domain(geosite:netflix)"
outbound = "us"

[[rules]]
condition = "dport(22)"
outbound = "block"
"#;

fn store() -> MemoryStore {
    let store = MemoryStore::new();
    let routing = store.create_profile(ProfileKind::Routing, "r", ROUTING).unwrap();
    store.select_profile(ProfileKind::Routing, Some(routing.id)).unwrap();

    let us = store.add_group("us", "random", Vec::new()).unwrap();
    let hk = store.add_group("hk", "min_moving_avg", Vec::new()).unwrap();

    let (sub, _) = store
        .add_subscription(
            "https://sub.example.com/list",
            None,
            vec![
                ("edge".to_string(), "trojan://a.example.com:443".to_string()),
                ("edge".to_string(), "trojan://b.example.com:443".to_string()),
            ],
        )
        .unwrap();
    // Same link as the first subscription node, added by hand
    let shared = store.add_node("manual", "trojan://a.example.com:443", None).unwrap();
    let solo = store.add_node("edge", "vmess://c.example.com:443", None).unwrap();

    store.attach_subscription(us.id, sub.id).unwrap();
    store.attach_node(hk.id, shared.id).unwrap();
    store.attach_node(hk.id, solo.id).unwrap();
    store
}

#[test]
fn test_shared_link_belongs_to_both_groups() {
    let store = store();
    let snapshot = store.snapshot().unwrap();
    let profiles = TomlCompiler.compile(None, None, Some(ROUTING)).unwrap();
    let assembly = assemble(profiles, &snapshot).unwrap();
    let config = &assembly.config;

    // Routing reference order: us, then the fallback hk; block is a preset
    let names: Vec<_> = config.groups.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, ["us", "hk"]);

    let links: Vec<_> = config.nodes.iter().map(|n| n.link.as_str()).collect();
    assert_eq!(
        links,
        [
            "trojan://a.example.com:443",
            "trojan://b.example.com:443",
            "vmess://c.example.com:443"
        ]
    );

    let shared = &config.nodes[0].name;
    assert!(config.group("us").unwrap().filter.matches(shared));
    assert!(config.group("hk").unwrap().filter.matches(shared));
    assert_eq!(config.group("hk").unwrap().filter.to_string(), format!("name({}, edge)", shared));
}

#[test]
fn test_assembly_is_deterministic() {
    let store = store();
    let snapshot = store.snapshot().unwrap();
    let build = || {
        let profiles = TomlCompiler.compile(None, None, Some(ROUTING)).unwrap();
        assemble(profiles, &snapshot).unwrap().config
    };

    let first = build();
    for _ in 0..10 {
        assert_eq!(build(), first);
    }

    let names: Vec<_> = first.nodes.iter().map(|n| n.name.clone()).collect();
    let mut unique = names.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), names.len());
}
