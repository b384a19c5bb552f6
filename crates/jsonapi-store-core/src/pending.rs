//! Pending-change collection and commit ordering

use crate::resource::{ResourceIdentifier, ResourceState, StoreResource};
use crate::store::StoreData;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Separator between the relationship names of a pending-change path
const PATH_SEPARATOR: char = '.';

fn is_candidate(resource: &StoreResource, include_new: bool) -> bool {
    resource.is_pending() && (include_new || resource.state != ResourceState::Created)
}

/// Collect uncommitted local changes
///
/// Without `roots` every pending resource in the store is returned. With
/// `roots` only the roots themselves and resources reached from them through
/// `relationship_paths` (e.g. `author.country`, every resource along the way)
/// are considered. `CREATED` resources are only included with `include_new`.
/// Results are deduplicated and in discovery order.
pub fn get_pending_changes(
    data: &StoreData,
    roots: Option<&[ResourceIdentifier]>,
    relationship_paths: &[String],
    include_new: bool,
) -> Vec<Arc<StoreResource>> {
    let Some(roots) = roots else {
        return data
            .iter()
            .filter(|r| is_candidate(r, include_new))
            .cloned()
            .collect();
    };

    let mut seen = HashSet::new();
    let mut changes = Vec::new();
    let mut collect = |resource: &Arc<StoreResource>| {
        if is_candidate(resource, include_new) && seen.insert(resource.identifier()) {
            changes.push(Arc::clone(resource));
        }
    };

    for root in roots {
        let Some(root) = data.get(root) else {
            continue;
        };
        collect(root);

        for path in relationship_paths {
            let mut frontier = vec![Arc::clone(root)];
            for name in path.split(PATH_SEPARATOR) {
                let next: Vec<Arc<StoreResource>> = frontier
                    .iter()
                    .filter_map(|r| r.resource.relationship(name))
                    .flat_map(|rel| rel.identifiers())
                    .filter_map(|id| data.get(id))
                    .cloned()
                    .collect();
                for resource in &next {
                    collect(resource);
                }
                frontier = next;
            }
        }
    }

    changes
}

/// Order pending changes for commit
///
/// A `CREATED` resource referenced by another pending resource is placed
/// before its referrer. Unrelated resources keep their input order. A
/// reference cycle is broken at its earliest resource.
pub fn sort_pending_changes(changes: &[Arc<StoreResource>]) -> Vec<Arc<StoreResource>> {
    let count = changes.len();
    let index: HashMap<ResourceIdentifier, usize> = changes
        .iter()
        .enumerate()
        .map(|(i, r)| (r.identifier(), i))
        .collect();

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut in_degree = vec![0usize; count];
    for (referrer, resource) in changes.iter().enumerate() {
        let mut targets = HashSet::new();
        for (_, relationship) in resource.resource.relationships_iter() {
            for id in relationship.identifiers() {
                let Some(&target) = index.get(id) else {
                    continue;
                };
                if target != referrer
                    && changes[target].state == ResourceState::Created
                    && targets.insert(target)
                {
                    dependents[target].push(referrer);
                    in_degree[referrer] += 1;
                }
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
    let mut emitted = vec![false; count];
    let mut order = Vec::with_capacity(count);

    while order.len() < count {
        let next = match ready.pop_first() {
            Some(next) => next,
            None => {
                let Some(next) = (0..count).find(|&i| !emitted[i]) else {
                    break;
                };
                tracing::warn!(
                    "Reference cycle among pending changes, committing {} first",
                    changes[next].identifier()
                );
                next
            }
        };
        emitted[next] = true;
        order.push(Arc::clone(&changes[next]));

        for &dependent in &dependents[next] {
            in_degree[dependent] = in_degree[dependent].saturating_sub(1);
            if in_degree[dependent] == 0 && !emitted[dependent] {
                ready.insert(dependent);
            }
        }
    }

    tracing::debug!("Ordered {} pending changes", order.len());
    order
}
