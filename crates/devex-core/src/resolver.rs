//! Dependency resolver (§4.H): turns a requested set of apps and the full
//! catalog into a deterministic install order, or a structured error.
//!
//! The graph is built over integer indices into the catalog slice, never a
//! pointer graph, so the resolver borrows nothing beyond the slice itself.

use std::collections::{HashMap, HashSet};

use devex_schema::{AppDescriptor, AppName};

use crate::error::{CoreError, CoreResult};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// One entry of the resolved install order.
#[derive(Debug, Clone)]
pub struct ResolvedApp {
    /// The app's normalized name.
    pub name: AppName,
    /// Index into the catalog slice this entry was resolved from.
    pub index: usize,
    /// Already installed: kept in the order so dependents still see the
    /// edge, but the pipeline runner performs no work for it (§4.H).
    pub skip: bool,
}

fn build_adjacency(catalog: &[AppDescriptor], name_to_index: &HashMap<&str, usize>) -> CoreResult<Vec<Vec<usize>>> {
    let mut adjacency = Vec::with_capacity(catalog.len());
    for descriptor in catalog {
        let mut deps = Vec::with_capacity(descriptor.dependencies.len());
        for dep_name in &descriptor.dependencies {
            let idx = *name_to_index.get(dep_name.as_str()).ok_or_else(|| {
                CoreError::NotFound(format!(
                    "'{}' depends on unknown app '{dep_name}'",
                    descriptor.name
                ))
            })?;
            deps.push(idx);
        }
        deps.sort_by(|&a, &b| catalog[a].name.cmp(&catalog[b].name));
        adjacency.push(deps);
    }
    Ok(adjacency)
}

/// Resolves `requested` against `catalog`, producing a dependency-first
/// install order. `installed` marks apps already recorded in the state
/// store; they still appear (so dependents resolve correctly) but carry
/// `skip = true` (§4.H).
///
/// # Errors
///
/// Returns [`CoreError::NotFound`] if a requested name or a transitive
/// dependency is absent from the catalog, or [`CoreError::ValidationFailed`]
/// carrying the full cycle if one is detected.
pub fn resolve(requested: &[AppName], catalog: &[AppDescriptor], installed: &HashSet<AppName>) -> CoreResult<Vec<ResolvedApp>> {
    let name_to_index: HashMap<&str, usize> = catalog
        .iter()
        .enumerate()
        .map(|(i, d)| (d.name.as_str(), i))
        .collect();

    let mut roots = Vec::with_capacity(requested.len());
    for name in requested {
        let idx = *name_to_index
            .get(name.as_str())
            .ok_or_else(|| CoreError::NotFound(format!("requested app '{name}' is not in the catalog")))?;
        roots.push(idx);
    }
    roots.sort_by(|&a, &b| catalog[a].name.cmp(&catalog[b].name));
    roots.dedup();

    let adjacency = build_adjacency(catalog, &name_to_index)?;

    let mut color = vec![Color::White; catalog.len()];
    let mut order = Vec::new();
    for root in roots {
        if color[root] == Color::White {
            visit(root, catalog, &adjacency, &mut color, &mut order)?;
        }
    }

    Ok(order
        .into_iter()
        .map(|idx| {
            let name = catalog[idx].name.clone();
            let skip = installed.contains(&name);
            ResolvedApp { name, index: idx, skip }
        })
        .collect())
}

/// Iterative DFS with a 3-color visited/visiting/done marking, emitting
/// nodes in post-order (dependencies before dependents) so the result is a
/// valid install order directly.
fn visit(start: usize, catalog: &[AppDescriptor], adjacency: &[Vec<usize>], color: &mut [Color], order: &mut Vec<usize>) -> CoreResult<()> {
    let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
    color[start] = Color::Gray;

    while let Some(&(node, cursor)) = stack.last() {
        if cursor < adjacency[node].len() {
            let next = adjacency[node][cursor];
            stack.last_mut().expect("non-empty stack").1 += 1;
            match color[next] {
                Color::White => {
                    color[next] = Color::Gray;
                    stack.push((next, 0));
                }
                Color::Gray => {
                    let pos = stack.iter().position(|&(n, _)| n == next).unwrap_or(0);
                    let mut cycle: Vec<String> = stack[pos..].iter().map(|&(n, _)| catalog[n].name.to_string()).collect();
                    cycle.push(catalog[next].name.to_string());
                    return Err(CoreError::ValidationFailed(format!("Cycle: {}", cycle.join(" -> "))));
                }
                Color::Black => {}
            }
        } else {
            color[node] = Color::Black;
            order.push(node);
            stack.pop();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, deps: &[&str]) -> AppDescriptor {
        AppDescriptor {
            name: AppName::new(name),
            category: "tools".into(),
            default: false,
            dependencies: deps.iter().map(|d| AppName::new(*d)).collect(),
            conflicts: Vec::new(),
            variants: Vec::new(),
        }
    }

    #[test]
    fn linear_dependency_resolves_deps_first() {
        let catalog = vec![descriptor("a", &["b"]), descriptor("b", &["c"]), descriptor("c", &[])];
        let resolved = resolve(&[AppName::new("a")], &catalog, &HashSet::new()).unwrap();
        let names: Vec<String> = resolved.iter().map(|r| r.name.to_string()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[test]
    fn unknown_dependency_is_not_found() {
        let catalog = vec![descriptor("a", &["missing"])];
        let err = resolve(&[AppName::new("a")], &catalog, &HashSet::new()).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn unknown_requested_app_is_not_found() {
        let catalog = vec![descriptor("a", &[])];
        let err = resolve(&[AppName::new("nope")], &catalog, &HashSet::new()).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn cycle_is_reported_with_full_path() {
        let catalog = vec![descriptor("a", &["b"]), descriptor("b", &["c"]), descriptor("c", &["a"])];
        let err = resolve(&[AppName::new("a")], &catalog, &HashSet::new()).unwrap_err();
        match err {
            CoreError::ValidationFailed(msg) => {
                assert!(msg.starts_with("Cycle: "), "unexpected cycle message: {msg}");
                assert!(msg.contains("a -> b -> c -> a"), "unexpected cycle message: {msg}");
            }
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn two_node_cycle_matches_scenario_6_message_shape() {
        let catalog = vec![descriptor("a", &["b"]), descriptor("b", &["a"])];
        let err = resolve(&[AppName::new("a")], &catalog, &HashSet::new()).unwrap_err();
        match err {
            CoreError::ValidationFailed(msg) => assert_eq!(msg, "Cycle: a -> b -> a"),
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn already_installed_apps_are_kept_but_skipped() {
        let catalog = vec![descriptor("a", &["b"]), descriptor("b", &[])];
        let mut installed = HashSet::new();
        installed.insert(AppName::new("b"));
        let resolved = resolve(&[AppName::new("a")], &catalog, &installed).unwrap();
        assert_eq!(resolved.len(), 2);
        assert!(resolved.iter().find(|r| r.name == "b").unwrap().skip);
        assert!(!resolved.iter().find(|r| r.name == "a").unwrap().skip);
    }

    #[test]
    fn shared_dependency_is_visited_once() {
        let catalog = vec![
            descriptor("a", &["c"]),
            descriptor("b", &["c"]),
            descriptor("c", &[]),
        ];
        let resolved = resolve(&[AppName::new("a"), AppName::new("b")], &catalog, &HashSet::new()).unwrap();
        let names: Vec<String> = resolved.iter().map(|r| r.name.to_string()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn requested_roots_break_ties_by_ascending_name() {
        let catalog = vec![descriptor("zeta", &[]), descriptor("alpha", &[])];
        let resolved = resolve(&[AppName::new("zeta"), AppName::new("alpha")], &catalog, &HashSet::new()).unwrap();
        let names: Vec<String> = resolved.iter().map(|r| r.name.to_string()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
