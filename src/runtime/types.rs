//! Runtime configuration value types.
//!
//! All types derive Serde traits so an assembled configuration can be
//! printed for operators and logged at debug level.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Outbounds that always exist and never need a persisted group.
pub const PRESET_OUTBOUNDS: [&str; 3] = ["direct", "block", "must_direct"];

/// Fully assembled configuration handed to the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub global: GlobalSettings,
    pub dns: DnsSettings,
    pub routing: RoutingRules,
    pub groups: Vec<GroupSpec>,
    pub nodes: Vec<NodeEntry>,
}

impl RuntimeConfig {
    /// The "stop serving but stay alive" configuration: default global
    /// settings, no DNS policy, no rules and everything falling back to `direct`.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true if this is the empty configuration.
    pub fn is_empty(&self) -> bool {
        *self == Self::empty()
    }

    /// Find a group by name.
    pub fn group(&self, name: &str) -> Option<&GroupSpec> {
        self.groups.iter().find(|g| g.name == name)
    }
}

/// Global section of the configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GlobalSettings {
    /// Port the transparent proxy listener binds.
    pub tproxy_port: u16,

    /// Log level applied on every reload (trace, debug, info, warn, error).
    pub log_level: String,

    /// Everything else, passed through to the engine verbatim.
    #[serde(flatten)]
    pub options: BTreeMap<String, toml::Value>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            tproxy_port: 12345,
            log_level: "info".to_string(),
            options: BTreeMap::new(),
        }
    }
}

/// DNS section of the configuration.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DnsSettings {
    /// Preferred IP version for answers: 0 (none), 4 or 6.
    pub ip_version_prefer: u8,

    /// Named upstream resolvers.
    pub upstream: BTreeMap<String, String>,

    #[serde(flatten)]
    pub options: BTreeMap<String, toml::Value>,
}

/// Ordered routing rules plus the fallback outbound.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingRules {
    pub rules: Vec<RoutingRule>,
    pub fallback: String,
}

impl Default for RoutingRules {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            fallback: "direct".to_string(),
        }
    }
}

impl RoutingRules {
    /// Outbound names referenced by the rule set, in first-reference order,
    /// fallback last. Duplicates are removed.
    pub fn necessary_outbounds(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let referenced = self
            .rules
            .iter()
            .map(|r| r.outbound.as_str())
            .chain(std::iter::once(self.fallback.as_str()));
        for name in referenced {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }
}

/// A single routing rule. The condition is opaque to this crate.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RoutingRule {
    pub condition: String,
    pub outbound: String,
}

/// Outbound group handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    pub policy: Policy,
    pub filter: NodeFilter,
}

/// Node selection policy of a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Policy {
    /// Plain policy token, e.g. `min_moving_avg`.
    Plain(String),
    /// Parameterised selection function, e.g. `fixed(0)`.
    Function {
        name: String,
        params: Vec<PolicyParam>,
    },
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Plain(name) => write!(f, "{}", name),
            Policy::Function { name, params } => {
                write!(f, "{}(", name)?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Policy parameter, optionally keyed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyParam {
    pub key: Option<String>,
    pub val: String,
}

impl fmt::Display for PolicyParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}: {}", key, self.val),
            None => write!(f, "{}", self.val),
        }
    }
}

/// Member filter of a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeFilter {
    /// Logical OR over exact node-name matches.
    Name(Vec<String>),
}

impl NodeFilter {
    /// Returns true if the node name is selected by this filter.
    pub fn matches(&self, node_name: &str) -> bool {
        match self {
            NodeFilter::Name(names) => names.iter().any(|n| n == node_name),
        }
    }
}

impl fmt::Display for NodeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeFilter::Name(names) => write!(f, "name({})", names.join(", ")),
        }
    }
}

/// Named node entry, rendered as `uniqueName:connectionLink`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub name: String,
    pub link: String,
}

impl fmt::Display for NodeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(condition: &str, outbound: &str) -> RoutingRule {
        RoutingRule {
            condition: condition.into(),
            outbound: outbound.into(),
        }
    }

    #[test]
    fn test_necessary_outbounds_order_and_dedup() {
        let routing = RoutingRules {
            rules: vec![
                rule("domain(geosite:cn)", "direct"),
                rule("dport(443)", "proxy"),
                rule("l4proto(udp)", "proxy"),
                rule("ip(8.8.8.8)", "dns_out"),
            ],
            fallback: "proxy".into(),
        };
        assert_eq!(routing.necessary_outbounds(), vec!["direct", "proxy", "dns_out"]);
    }

    #[test]
    fn test_empty_config() {
        let empty = RuntimeConfig::empty();
        assert!(empty.is_empty());
        assert_eq!(empty.routing.necessary_outbounds(), vec!["direct"]);
        assert!(empty.groups.is_empty());
        assert!(empty.nodes.is_empty());
    }

    #[test]
    fn test_display() {
        let policy = Policy::Function {
            name: "fixed".into(),
            params: vec![PolicyParam { key: None, val: "0".into() }],
        };
        assert_eq!(policy.to_string(), "fixed(0)");

        let filter = NodeFilter::Name(vec!["a".into(), "1.b".into()]);
        assert_eq!(filter.to_string(), "name(a, 1.b)");
        assert!(filter.matches("1.b"));
        assert!(!filter.matches("b"));

        let node = NodeEntry { name: "hk".into(), link: "socks5://127.0.0.1:1080".into() };
        assert_eq!(node.to_string(), "hk:socks5://127.0.0.1:1080");
    }
}
