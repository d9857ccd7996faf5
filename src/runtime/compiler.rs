//! Profile text compilation.
//!
//! # Responsibilities
//! - Turn stored profile text into structured settings
//! - Reject malformed text with a diagnostic naming the section
//! - Provide the default TOML grammar used by the bundled store and CLI
//!
//! # Design Decisions
//! - Compilation is behind a trait; the grammar is not this crate's concern
//! - A missing section compiles to its defaults
//! - Semantic checks (value ranges) run after deserialization

use thiserror::Error;

use crate::runtime::types::{DnsSettings, GlobalSettings, RoutingRules};

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Errors produced while compiling profile text.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("bad global section: {0}")]
    Global(String),

    #[error("bad dns section: {0}")]
    Dns(String),

    #[error("bad routing section: {0}")]
    Routing(String),
}

/// Structured output of a compile.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledProfiles {
    pub global: GlobalSettings,
    pub dns: DnsSettings,
    pub routing: RoutingRules,
}

/// Compiles profile text into structured settings.
pub trait ProfileCompiler: Send + Sync + 'static {
    /// Compile the given sections. `None` compiles to the section defaults.
    fn compile(
        &self,
        global: Option<&str>,
        dns: Option<&str>,
        routing: Option<&str>,
    ) -> Result<CompiledProfiles, CompileError>;
}

/// Compiler for profiles written as TOML documents, one per section.
///
/// ```toml
/// # routing profile
/// fallback = "proxy"
///
/// [[rules]]
/// condition = "domain(geosite:cn)"
/// outbound = "direct"
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlCompiler;

impl ProfileCompiler for TomlCompiler {
    fn compile(
        &self,
        global: Option<&str>,
        dns: Option<&str>,
        routing: Option<&str>,
    ) -> Result<CompiledProfiles, CompileError> {
        let global = match global {
            Some(text) => compile_global(text)?,
            None => GlobalSettings::default(),
        };
        let dns = match dns {
            Some(text) => compile_dns(text)?,
            None => DnsSettings::default(),
        };
        let routing = match routing {
            Some(text) => compile_routing(text)?,
            None => RoutingRules::default(),
        };
        Ok(CompiledProfiles { global, dns, routing })
    }
}

fn compile_global(text: &str) -> Result<GlobalSettings, CompileError> {
    let global: GlobalSettings =
        toml::from_str(text).map_err(|e| CompileError::Global(e.to_string()))?;
    if global.tproxy_port == 0 {
        return Err(CompileError::Global("tproxy_port must not be 0".into()));
    }
    if !LOG_LEVELS.contains(&global.log_level.as_str()) {
        return Err(CompileError::Global(format!(
            "unknown log_level '{}'",
            global.log_level
        )));
    }
    Ok(global)
}

fn compile_dns(text: &str) -> Result<DnsSettings, CompileError> {
    let dns: DnsSettings =
        toml::from_str(text).map_err(|e| CompileError::Dns(e.to_string()))?;
    if !matches!(dns.ip_version_prefer, 0 | 4 | 6) {
        return Err(CompileError::Dns(format!(
            "ip_version_prefer must be 0, 4 or 6, got {}",
            dns.ip_version_prefer
        )));
    }
    Ok(dns)
}

fn compile_routing(text: &str) -> Result<RoutingRules, CompileError> {
    let routing: RoutingRules =
        toml::from_str(text).map_err(|e| CompileError::Routing(e.to_string()))?;
    if routing.fallback.trim().is_empty() {
        return Err(CompileError::Routing("fallback must not be empty".into()));
    }
    for (i, rule) in routing.rules.iter().enumerate() {
        if rule.outbound.trim().is_empty() {
            return Err(CompileError::Routing(format!("rule {} has no outbound", i)));
        }
        if rule.condition.trim().is_empty() {
            return Err(CompileError::Routing(format!("rule {} has no condition", i)));
        }
    }
    Ok(routing)
}
