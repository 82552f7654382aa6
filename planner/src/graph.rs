//! Derived dependency graph: topological order, critical path, parallel
//! groups. Nodes are step numbers; edges follow `depends_on`.

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::errors::PlanError;
use crate::model::Step;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DependencyGraph {
    /// A valid topological order of all steps.
    pub execution_order: Vec<u32>,
    /// Longest dependency chain by step count.
    pub critical_path: Vec<u32>,
    /// Kahn layers: each group is a maximal antichain ready together.
    pub parallel_groups: Vec<Vec<u32>>,
}

impl DependencyGraph {
    /// Build the graph from the steps' `depends_on` relation.
    pub fn derive(steps: &[Step]) -> Result<Self, PlanError> {
        let mut graph: DiGraphMap<u32, ()> = DiGraphMap::new();
        for step in steps {
            graph.add_node(step.step_number);
        }
        for step in steps {
            for dep in &step.depends_on {
                graph.add_edge(*dep, step.step_number, ());
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            let node = cycle.node_id();
            PlanError::Cycle(vec![node])
        })?;
        let execution_order: Vec<u32> = order.clone();

        // Longest chain by count: DP over the topological order.
        let mut chain_len: HashMap<u32, usize> = HashMap::new();
        let mut best_pred: HashMap<u32, u32> = HashMap::new();
        for &n in &order {
            let mut best = 1usize;
            for pred in graph.neighbors_directed(n, petgraph::Direction::Incoming) {
                let candidate = chain_len.get(&pred).copied().unwrap_or(1) + 1;
                if candidate > best {
                    best = candidate;
                    best_pred.insert(n, pred);
                }
            }
            chain_len.insert(n, best);
        }
        let critical_path = match chain_len.iter().max_by_key(|(n, len)| (**len, std::cmp::Reverse(**n))) {
            Some((&end, _)) => {
                let mut path = vec![end];
                let mut cur = end;
                while let Some(&p) = best_pred.get(&cur) {
                    path.push(p);
                    cur = p;
                }
                path.reverse();
                path
            }
            None => Vec::new(),
        };

        // Kahn layers.
        let mut indegree: BTreeMap<u32, usize> = steps
            .iter()
            .map(|s| (s.step_number, s.depends_on.len()))
            .collect();
        let mut parallel_groups: Vec<Vec<u32>> = Vec::new();
        while !indegree.is_empty() {
            let mut layer: Vec<u32> = indegree
                .iter()
                .filter_map(|(&n, &d)| (d == 0).then_some(n))
                .collect();
            if layer.is_empty() {
                // Unreachable after toposort succeeded.
                break;
            }
            layer.sort_unstable();
            for n in &layer {
                indegree.remove(n);
                for succ in graph.neighbors_directed(*n, petgraph::Direction::Outgoing) {
                    if let Some(d) = indegree.get_mut(&succ) {
                        *d = d.saturating_sub(1);
                    }
                }
            }
            parallel_groups.push(layer);
        }

        Ok(Self {
            execution_order,
            critical_path,
            parallel_groups,
        })
    }
}
