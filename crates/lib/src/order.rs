//! Dependency ordering for services.
//!
//! Produces an order in which every node appears after all of its
//! dependencies. Depth-first traversal with three-color marking on an
//! explicit stack; roots are visited in lexicographic order so the
//! output is deterministic across runs.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

/// Errors raised while resolving the dependency order.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
  /// The graph contains a cycle through the named node.
  #[error("dependency cycle detected through '{0}'")]
  CycleDetected(String),

  /// A node references a dependency that is not in the mapping.
  #[error("'{referrer}' depends on unknown service '{target}'")]
  UnknownDependency { referrer: String, target: String },
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
  Visiting,
  Visited,
}

enum Step<'a> {
  Descend(&'a str, &'a str),
  Finish(&'a str),
}

/// Resolve a dependency order over `deps`.
///
/// Each key maps to the nodes it depends on; the result places every
/// node after all of its dependencies (post-order append).
pub fn resolve_order(deps: &BTreeMap<String, Vec<String>>) -> Result<Vec<String>, OrderError> {
  let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(deps.len());
  let mut order = Vec::with_capacity(deps.len());

  for root in deps.keys() {
    if marks.contains_key(root.as_str()) {
      continue;
    }
    marks.insert(root, Mark::Visiting);

    // Each frame is (node, index of the next dependency to inspect).
    let mut stack: Vec<(&str, usize)> = vec![(root, 0)];

    while !stack.is_empty() {
      let step = {
        let Some(frame) = stack.last_mut() else { break };
        let node = frame.0;
        let node_deps = deps.get(node).map(Vec::as_slice).unwrap_or_default();
        if frame.1 < node_deps.len() {
          let target = node_deps[frame.1].as_str();
          frame.1 += 1;
          Step::Descend(node, target)
        } else {
          Step::Finish(node)
        }
      };

      match step {
        Step::Descend(node, target) => match marks.get(target) {
          Some(Mark::Visiting) => {
            return Err(OrderError::CycleDetected(target.to_string()));
          }
          Some(Mark::Visited) => {}
          None => {
            if !deps.contains_key(target) {
              return Err(OrderError::UnknownDependency {
                referrer: node.to_string(),
                target: target.to_string(),
              });
            }
            marks.insert(target, Mark::Visiting);
            stack.push((target, 0));
          }
        },
        Step::Finish(node) => {
          marks.insert(node, Mark::Visited);
          order.push(node.to_string());
          stack.pop();
        }
      }
    }
  }

  Ok(order)
}
