use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::plugin_system::registry::PluginRegistry;
use crate::plugin_system::version::{VersionRange, parse_lenient};

/// Represents a dependency on another plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginDependency {
    /// Key of the required plugin
    pub plugin_key: String,

    /// The version range that is acceptable
    #[serde(serialize_with = "serialize_range")]
    pub version_range: Option<VersionRange>,

    /// Whether this is a hard requirement or optional dependency
    pub required: bool,
}

fn serialize_range<S: serde::Serializer>(range: &Option<VersionRange>, s: S) -> Result<S::Ok, S::Error> {
    match range {
        Some(r) => s.serialize_some(r.constraint_string()),
        None => s.serialize_none(),
    }
}

/// Error that can occur when resolving dependencies
#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("Plugin '{plugin_key}' requires missing plugin '{dependency}'")]
    MissingPlugin { plugin_key: String, dependency: String },

    #[error("Plugin version mismatch: '{plugin_key}' requires version '{required_range}' but found '{actual_version}'")]
    IncompatibleVersion {
        plugin_key: String,
        required_range: VersionRange,
        actual_version: String,
    },

    /// Dependency is present but can never be enabled
    #[error("Plugin '{plugin_key}' requires '{dependency}', which is unloadable")]
    UnusableDependency { plugin_key: String, dependency: String },

    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),
}

impl PluginDependency {
    pub fn required(plugin_key: &str, version_range: VersionRange) -> Self {
        Self {
            plugin_key: plugin_key.to_string(),
            version_range: Some(version_range),
            required: true,
        }
    }

    pub fn required_any(plugin_key: &str) -> Self {
        Self {
            plugin_key: plugin_key.to_string(),
            version_range: None,
            required: true,
        }
    }

    pub fn optional_any(plugin_key: &str) -> Self {
        Self {
            plugin_key: plugin_key.to_string(),
            version_range: None,
            required: false,
        }
    }

    /// Check if this dependency accepts the given plugin version string
    pub fn is_compatible_with(&self, version_str: &str) -> bool {
        match &self.version_range {
            Some(range) => parse_lenient(version_str)
                .map(|v| range.includes(&v))
                .unwrap_or(false),
            None => true,
        }
    }
}

impl fmt::Display for PluginDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let requirement_type = if self.required { "Requires" } else { "Optional" };
        match &self.version_range {
            Some(range) => write!(f, "{} plugin: {} (version: {})", requirement_type, self.plugin_key, range),
            None => write!(f, "{} plugin: {} (any version)", requirement_type, self.plugin_key),
        }
    }
}

/// Outcome of computing an enable order.
#[derive(Debug, Default)]
pub struct EnableOrder {
    /// Keys to enable, every plugin after the plugins it requires
    pub order: Vec<String>,
    /// Requested keys that cannot be enabled, with the reason
    pub failures: Vec<(String, DependencyError)>,
}

/// Computes the dependency closure of `requested` in enable order.
///
/// Required dependencies must be present, loadable and version compatible.
/// Optional dependencies are pulled in when present. A requested key whose
/// closure cannot be satisfied is reported in `failures` and contributes
/// nothing to `order`.
pub fn resolve_enable_order(registry: &PluginRegistry, requested: &[String]) -> EnableOrder {
    let mut result = EnableOrder::default();
    let mut placed: HashSet<String> = HashSet::new();

    for key in requested {
        if placed.contains(key) {
            continue;
        }
        let mut pending = Vec::new();
        let mut stack = Vec::new();
        match visit(registry, key, &placed, &mut stack, &mut pending) {
            Ok(()) => {
                for k in pending {
                    if placed.insert(k.clone()) {
                        result.order.push(k);
                    }
                }
            }
            Err(e) => result.failures.push((key.clone(), e)),
        }
    }
    result
}

fn visit(
    registry: &PluginRegistry,
    key: &str,
    placed: &HashSet<String>,
    stack: &mut Vec<String>,
    pending: &mut Vec<String>,
) -> Result<(), DependencyError> {
    if placed.contains(key) || pending.iter().any(|k| k == key) {
        return Ok(());
    }
    if let Some(pos) = stack.iter().position(|k| k == key) {
        let mut cycle = stack[pos..].to_vec();
        cycle.push(key.to_string());
        return Err(DependencyError::CyclicDependency(cycle));
    }
    let Some(plugin) = registry.get(key) else {
        // Callers only request registered keys; missing deps are caught below
        return Ok(());
    };

    stack.push(key.to_string());
    for dep in plugin.dependencies() {
        match registry.get(&dep.plugin_key) {
            None if dep.required => {
                return Err(DependencyError::MissingPlugin {
                    plugin_key: key.to_string(),
                    dependency: dep.plugin_key.clone(),
                });
            }
            None => continue,
            Some(target) => {
                if let Some(range) = &dep.version_range {
                    if !dep.is_compatible_with(target.version()) {
                        if dep.required {
                            return Err(DependencyError::IncompatibleVersion {
                                plugin_key: key.to_string(),
                                required_range: range.clone(),
                                actual_version: target.version().to_string(),
                            });
                        }
                        continue;
                    }
                }
                if target.is_unloadable() {
                    if dep.required {
                        return Err(DependencyError::UnusableDependency {
                            plugin_key: key.to_string(),
                            dependency: dep.plugin_key.clone(),
                        });
                    }
                    continue;
                }
                visit(registry, &dep.plugin_key, placed, stack, pending)?;
            }
        }
    }
    stack.pop();
    pending.push(key.to_string());
    Ok(())
}

/// Enabled plugins that require `key`, directly or transitively, in the
/// order they should be disabled (dependents of dependents first).
pub fn enabled_dependents(registry: &PluginRegistry, key: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut seen = HashSet::from([key.to_string()]);
    collect_dependents(registry, key, &mut seen, &mut result);
    result
}

fn collect_dependents(
    registry: &PluginRegistry,
    key: &str,
    seen: &mut HashSet<String>,
    acc: &mut Vec<String>,
) {
    for plugin in registry.plugins_in_order() {
        let depends = plugin
            .dependencies()
            .iter()
            .any(|d| d.required && d.plugin_key == key);
        if depends && plugin.is_enabled() && seen.insert(plugin.key().to_string()) {
            collect_dependents(registry, plugin.key(), seen, acc);
            acc.push(plugin.key().to_string());
        }
    }
}
