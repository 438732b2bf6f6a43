//! Dependency resolution and build scheduling.
//!
//! Resolution selects the libraries matching a set of glob filters plus
//! their transitive dependencies, then orders them so every library comes
//! after everything it depends on. Ordering is Kahn's algorithm over an
//! index arena: names are interned once, adjacency and in-degree tables are
//! built immutably, and the ready queue drains in name order so the
//! schedule is deterministic for a given manifest.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use slake_schema::Manifest;

/// Errors raised while resolving the dependency graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A dependency cycle involving the named library.
    #[error("dependency cycle involving {0}")]
    Cycle(String),

    /// A declared dependency that is not in the manifest.
    #[error("{library} depends on {dependency}, which is not in the manifest")]
    UnknownDependency {
        /// The library declaring the dependency.
        library: String,
        /// The missing dependency name.
        dependency: String,
    },
}

/// Select and order the libraries to build.
///
/// With no filters every library is selected; otherwise a library is
/// seeded when any filter matches its name. Dependencies of selected
/// libraries are always pulled in, matched or not. The result is in build
/// order.
///
/// # Errors
///
/// [`GraphError::UnknownDependency`] for a dependency absent from the
/// manifest and [`GraphError::Cycle`] when no valid order exists.
pub fn resolve(manifest: &Manifest, filters: &[glob::Pattern]) -> Result<Vec<String>, GraphError> {
    let mut selected = BTreeSet::new();
    let mut frontier: VecDeque<&str> = manifest
        .libraries
        .keys()
        .filter(|name| filters.is_empty() || filters.iter().any(|f| f.matches(name)))
        .map(String::as_str)
        .collect();

    while let Some(name) = frontier.pop_front() {
        if !selected.insert(name) {
            continue;
        }
        let Some(entry) = manifest.libraries.get(name) else {
            continue;
        };
        for dependency in entry.dependency_names() {
            match manifest.libraries.get_key_value(dependency.as_str()) {
                Some((key, _)) => frontier.push_back(key),
                None => {
                    return Err(GraphError::UnknownDependency {
                        library: name.to_string(),
                        dependency,
                    });
                }
            }
        }
    }

    schedule(manifest, &selected)
}

/// Kahn's algorithm over the selected subgraph.
fn schedule(manifest: &Manifest, selected: &BTreeSet<&str>) -> Result<Vec<String>, GraphError> {
    let index: BTreeMap<&str, usize> = selected
        .iter()
        .enumerate()
        .map(|(i, name)| (*name, i))
        .collect();
    let names: Vec<&str> = selected.iter().copied().collect();

    // dependents[i] holds the nodes that must wait for i.
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); names.len()];
    let mut degree: Vec<usize> = vec![0; names.len()];
    for (&name, &node) in &index {
        let Some(entry) = manifest.libraries.get(name) else {
            continue;
        };
        for dependency in entry.dependency_names() {
            if let Some(&upstream) = index.get(dependency.as_str()) {
                dependents[upstream].push(node);
                degree[node] += 1;
            }
        }
    }

    // Ready nodes drain in name order; names is sorted, so pushing in
    // index order keeps the schedule deterministic.
    let mut ready: VecDeque<usize> = (0..names.len()).filter(|&n| degree[n] == 0).collect();
    let mut order = Vec::with_capacity(names.len());
    while let Some(node) = ready.pop_front() {
        order.push(names[node].to_string());
        for &downstream in &dependents[node] {
            degree[downstream] -= 1;
            if degree[downstream] == 0 {
                ready.push_back(downstream);
            }
        }
    }

    if order.len() < names.len() {
        let stuck = (0..names.len())
            .find(|&n| degree[n] > 0)
            .map_or_else(String::new, |n| names[n].to_string());
        return Err(GraphError::Cycle(stuck));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(text: &str) -> Manifest {
        Manifest::parse(text, None).unwrap()
    }

    fn patterns(filters: &[&str]) -> Vec<glob::Pattern> {
        filters.iter().map(|f| glob::Pattern::new(f).unwrap()).collect()
    }

    #[test]
    fn orders_dependencies_first() {
        let manifest = manifest(
            r#"{"libraries": {
                "curl": {"dependencies": ["openssl", "zlib"]},
                "openssl": {"dependencies": "zlib"},
                "zlib": {}
            }}"#,
        );
        let order = resolve(&manifest, &[]).unwrap();
        assert_eq!(order, ["zlib", "openssl", "curl"]);
    }

    #[test]
    fn filters_seed_but_dependencies_follow() {
        let manifest = manifest(
            r#"{"libraries": {
                "curl": {"dependencies": "zlib"},
                "zlib": {},
                "unrelated": {}
            }}"#,
        );
        let order = resolve(&manifest, &patterns(&["curl"])).unwrap();
        assert_eq!(order, ["zlib", "curl"]);

        let order = resolve(&manifest, &patterns(&["c*"])).unwrap();
        assert_eq!(order, ["zlib", "curl"]);
    }

    #[test]
    fn independent_libraries_come_out_in_name_order() {
        let manifest = manifest(r#"{"libraries": {"b": {}, "c": {}, "a": {}}}"#);
        assert_eq!(resolve(&manifest, &[]).unwrap(), ["a", "b", "c"]);
    }

    #[test]
    fn cycles_are_rejected() {
        let manifest = manifest(
            r#"{"libraries": {
                "a": {"dependencies": "b"},
                "b": {"dependencies": "a"}
            }}"#,
        );
        assert!(matches!(resolve(&manifest, &[]), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let manifest = manifest(r#"{"libraries": {"a": {"dependencies": "a"}}}"#);
        assert!(matches!(resolve(&manifest, &[]), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn unknown_dependencies_are_rejected() {
        let manifest = manifest(r#"{"libraries": {"a": {"dependencies": "ghost"}}}"#);
        match resolve(&manifest, &[]).unwrap_err() {
            GraphError::UnknownDependency {
                library,
                dependency,
            } => {
                assert_eq!(library, "a");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
