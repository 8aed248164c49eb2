//! Dependency resolution (§4.7, §6): order plugins so every dependency loads
//! before its dependents, detect cycles, and check declared version
//! constraints against what's actually discovered.

use std::collections::{HashMap, HashSet};

use ncatbot_common::{Error, Result};
use semver::{Version, VersionReq};

use crate::manifest::DiscoveredPlugin;

/// Topologically sort `plugins` by their `dependencies` table so that every
/// dependency appears before its dependent (§4.7 "load order respects
/// dependency edges"). Errors on an unsatisfied dependency (name not found,
/// or found but failing its version constraint) or on a cycle.
pub fn resolve_order(plugins: &[DiscoveredPlugin]) -> Result<Vec<String>> {
    let by_name: HashMap<&str, &DiscoveredPlugin> =
        plugins.iter().map(|p| (p.manifest.name.as_str(), p)).collect();

    for plugin in plugins {
        for (dep_name, constraint) in &plugin.manifest.dependencies {
            let dep = by_name.get(dep_name.as_str()).ok_or_else(|| Error::UnsatisfiedDependency {
                plugin: plugin.manifest.name.clone(),
                dependency: dep_name.clone(),
                constraint: constraint.clone(),
            })?;
            if !constraint_satisfied(constraint, &dep.manifest.version) {
                return Err(Error::UnsatisfiedDependency {
                    plugin: plugin.manifest.name.clone(),
                    dependency: dep_name.clone(),
                    constraint: format!("{constraint} (found {})", dep.manifest.version),
                });
            }
        }
    }

    let mut order = Vec::with_capacity(plugins.len());
    let mut visited: HashSet<&str> = HashSet::new();
    let mut in_progress: HashSet<&str> = HashSet::new();

    for plugin in plugins {
        visit(plugin.manifest.name.as_str(), &by_name, &mut visited, &mut in_progress, &mut order)?;
    }

    Ok(order)
}

fn visit<'a>(
    name: &'a str,
    by_name: &HashMap<&'a str, &'a DiscoveredPlugin>,
    visited: &mut HashSet<&'a str>,
    in_progress: &mut HashSet<&'a str>,
    order: &mut Vec<String>,
) -> Result<()> {
    if visited.contains(name) {
        return Ok(());
    }
    if !in_progress.insert(name) {
        return Err(Error::DependencyCycle(
            in_progress.iter().map(ToString::to_string).collect(),
        ));
    }

    if let Some(plugin) = by_name.get(name) {
        for dep_name in plugin.manifest.dependencies.keys() {
            visit(dep_name.as_str(), by_name, visited, in_progress, order)?;
        }
    }

    in_progress.remove(name);
    visited.insert(name);
    order.push(name.to_string());
    Ok(())
}

/// Check `found_version` against a constraint string. Tolerant of bare
/// version strings (treated as `=version`) alongside full semver
/// requirement syntax (`>=1.0.0, <2.0.0`).
fn constraint_satisfied(constraint: &str, found_version: &str) -> bool {
    let Ok(version) = Version::parse(found_version) else {
        return false;
    };
    let normalized = if constraint.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        format!("={constraint}")
    } else {
        constraint.to_string()
    };
    VersionReq::parse(&normalized).is_ok_and(|req| req.matches(&version))
}
