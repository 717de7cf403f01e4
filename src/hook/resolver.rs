//! Topological ordering of a hook list's dependency DAG. See `spec.md` §4.4.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{codes, KernelError};

use super::HookDescriptor;

/// Required kind skipped during kernel bootstrap, when kernel-provided
/// services aren't registered as ordinary hook-produced facets yet.
const KERNEL_SERVICES_KIND: &str = "kernelServices";

/// Resolve `hooks` into an execution order: a topological sort of the
/// dependency DAG, tie-broken by original registration index, honoring
/// R1 (overwrite-after-every-prior-same-kind) and R2 (an overwrite hook may
/// require its own kind).
pub fn resolve(hooks: &[HookDescriptor]) -> Result<Vec<usize>, KernelError> {
    let mut adjacency: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); hooks.len()];
    let mut producers_by_kind: BTreeMap<&str, Vec<usize>> = BTreeMap::new();

    for (i, hook) in hooks.iter().enumerate() {
        let last_same_kind = producers_by_kind.get(hook.kind.as_ref()).and_then(|v| v.last().copied());

        if hook.overwrite {
            match last_same_kind {
                Some(prev) => {
                    adjacency[prev].insert(i);
                }
                None => {
                    return Err(KernelError::dependency(
                        codes::HOOK_OVERWRITE_WITHOUT_BASE,
                        format!("hook '{}' is marked overwrite but is the first hook of its kind", hook.kind),
                    ));
                }
            }
        }

        for required_kind in &hook.required {
            if required_kind.as_ref() == KERNEL_SERVICES_KIND {
                continue;
            }
            let producer = if required_kind.as_ref() == hook.kind.as_ref() {
                last_same_kind
            } else {
                producers_by_kind.get(required_kind.as_ref()).and_then(|v| v.last().copied())
            };
            match producer {
                Some(p) => {
                    adjacency[p].insert(i);
                }
                None => {
                    return Err(KernelError::dependency(
                        codes::HOOK_MISSING_DEPENDENCY,
                        format!("hook '{}' requires kind '{}' with no producer", hook.kind, required_kind),
                    ));
                }
            }
        }

        producers_by_kind.entry(hook.kind.as_ref()).or_default().push(i);
    }

    kahn(&adjacency, hooks)
}

/// Kahn's algorithm with a `BTreeSet` frontier so ties (nodes simultaneously
/// ready) resolve in original-index order, giving a deterministic plan.
fn kahn(adjacency: &[BTreeSet<usize>], hooks: &[HookDescriptor]) -> Result<Vec<usize>, KernelError> {
    let n = adjacency.len();
    let mut in_degree = vec![0usize; n];
    for edges in adjacency {
        for &to in edges {
            in_degree[to] += 1;
        }
    }

    let mut frontier: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(&next) = frontier.iter().next() {
        frontier.remove(&next);
        order.push(next);
        for &to in &adjacency[next] {
            in_degree[to] -= 1;
            if in_degree[to] == 0 {
                frontier.insert(to);
            }
        }
    }

    if order.len() != n {
        let remaining: Vec<&str> =
            (0..n).filter(|i| !order.contains(i)).map(|i| hooks[i].kind.as_ref()).collect();
        return Err(KernelError::dependency(
            codes::HOOK_CYCLIC_DEPENDENCY,
            format!("cyclic dependency among kinds: {}", remaining.join(", ")),
        ));
    }

    Ok(order)
}
