//! Template resolution and stage ordering.
//!
//! Resolves `{{params.key}}` and `{{environment}}` templates, and
//! computes the topological execution order of the stage graph using
//! Kahn's algorithm with deterministic (alphabetical) tie-breaking.

use super::types::*;
use std::collections::{HashMap, HashSet, VecDeque};

/// Resolve all template variables in a string.
pub fn resolve_template(
    template: &str,
    params: &HashMap<String, serde_yaml_ng::Value>,
    environment: &str,
) -> Result<String, String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        let value = if let Some(param_key) = key.strip_prefix("params.") {
            params
                .get(param_key)
                .map(yaml_value_to_string)
                .ok_or_else(|| format!("unknown param: {}", param_key))?
        } else if key == "environment" {
            environment.to_string()
        } else {
            return Err(format!("unknown template variable: {}", key));
        };

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

/// Compute the execution order of the stage graph.
pub fn build_stage_order(with_database: bool) -> Result<Vec<StageId>, String> {
    let nodes: Vec<(String, Vec<String>)> = StageId::all(with_database)
        .iter()
        .map(|stage| {
            (
                stage.to_string(),
                stage
                    .needs(with_database)
                    .iter()
                    .map(|need| need.to_string())
                    .collect(),
            )
        })
        .collect();

    let order = toposort(&nodes)?;
    Ok(order
        .iter()
        .filter_map(|id| StageId::from_str_id(id))
        .collect())
}

/// Topologically order nodes given `(id, prerequisites)` pairs.
/// Kahn's algorithm with sorted tie-breaking.
pub fn toposort(nodes: &[(String, Vec<String>)]) -> Result<Vec<String>, String> {
    let ids: Vec<String> = nodes.iter().map(|(id, _)| id.clone()).collect();
    let mut in_degree: HashMap<String, usize> = HashMap::new();
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for id in &ids {
        in_degree.insert(id.clone(), 0);
        adjacency.insert(id.clone(), Vec::new());
    }

    for (id, needs) in nodes {
        for need in needs {
            let dependents = adjacency
                .get_mut(need)
                .ok_or_else(|| format!("stage '{}' needs unknown '{}'", id, need))?;
            dependents.push(id.clone());
            *in_degree.get_mut(id).ok_or_else(|| format!("unknown stage '{}'", id))? += 1;
        }
    }

    let mut queue: VecDeque<String> = VecDeque::new();
    let mut zero_degree: Vec<String> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| id.clone())
        .collect();
    zero_degree.sort();
    for id in zero_degree {
        queue.push_back(id);
    }

    let mut order = Vec::new();
    while let Some(current) = queue.pop_front() {
        order.push(current.clone());

        let mut next_ready: Vec<String> = Vec::new();
        if let Some(dependents) = adjacency.get(&current) {
            for dependent in dependents {
                let degree = in_degree
                    .get_mut(dependent)
                    .ok_or_else(|| format!("unknown stage '{}'", dependent))?;
                *degree -= 1;
                if *degree == 0 {
                    next_ready.push(dependent.clone());
                }
            }
        }
        next_ready.sort();
        for id in next_ready {
            queue.push_back(id);
        }
    }

    if order.len() != ids.len() {
        let remaining: HashSet<_> = ids.iter().collect();
        let ordered: HashSet<_> = order.iter().collect();
        let cycle_members: Vec<_> = remaining.difference(&ordered).collect();
        return Err(format!(
            "dependency cycle detected involving: {}",
            cycle_members
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    Ok(order)
}
