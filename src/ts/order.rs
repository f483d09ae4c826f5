// src/ts/order.rs

//! Element ordering
//!
//! Installs run first, providers before the packages that require them.
//! Erases run last, dependents before the packages they depend on.
//! Dependency cycles are broken by insertion order.

use super::ElementKind;
use crate::header::Header;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    New,
    Visiting,
    Done,
}

/// Depth-first topological sort over `group`
///
/// `depends(a, b)` is true when `a` must come after `b`. The walk keeps its
/// own stack of `(position, next candidate)` frames, so long dependency
/// chains don't grow the call stack.
fn sort_group(group: &[usize], depends: &dyn Fn(usize, usize) -> bool) -> Vec<usize> {
    let mut marks = vec![Mark::New; group.len()];
    let mut out = Vec::with_capacity(group.len());
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for start in 0..group.len() {
        if marks[start] != Mark::New {
            continue;
        }
        marks[start] = Mark::Visiting;
        stack.push((start, 0));

        while let Some((pos, next)) = stack.last_mut() {
            let pos = *pos;
            let candidate = (*next..group.len())
                .find(|&other| other != pos && marks[other] == Mark::New && depends(group[pos], group[other]));

            match candidate {
                Some(other) => {
                    *next = other + 1;
                    marks[other] = Mark::Visiting;
                    stack.push((other, 0));
                }
                None => {
                    stack.pop();
                    marks[pos] = Mark::Done;
                    out.push(group[pos]);
                }
            }
        }
    }
    out
}

fn requires_from(dependent: &Header, provider: &Header) -> bool {
    dependent
        .requires
        .iter()
        .filter(|r| !r.is_rpmlib())
        .any(|r| provider.satisfies(r))
}

/// Execution order as indices into `elements`
pub(crate) fn order(elements: &[(&Header, ElementKind)]) -> Vec<usize> {
    let (installs, erases): (Vec<usize>, Vec<usize>) =
        (0..elements.len()).partition(|&i| elements[i].1.is_install());

    let mut sequence = sort_group(&installs, &|a, b| requires_from(elements[a].0, elements[b].0));
    sequence.extend(sort_group(&erases, &|a, b| {
        requires_from(elements[b].0, elements[a].0)
    }));
    sequence
}
