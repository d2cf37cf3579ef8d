//! Graph layer (§4.8) and execution (§2, §5): a validated DAG of operator
//! node declarations with a declared set of output nodes, a stable
//! topological propagation order, and a `GraphRuntime` that instantiates
//! each node's operator state and drives one flush at a time.
//!
//! `QueryGraph` is the structural description (node declarations + edges +
//! output set); it knows nothing about schemas or providers. `GraphRuntime`
//! is the live instantiation: one `Operator` per node, run single-threaded
//! and cooperatively (§5) — there is no internal locking, only the `&mut
//! GraphRuntime` borrow taken for the duration of `flush`.

use crate::delta::Delta;
use crate::error::{ProviderError, ValidationError};
use crate::operators::{
    ComputeState, DiffState, JoinAtomSpec, JoinState, Operator, ProjectState, RenameState,
    ScanState, UnionState,
};
use crate::provider::Provider;
use crate::value::Tuple;
use std::collections::{HashMap, HashSet, VecDeque};

/// Index of a node within a `QueryGraph`'s node vector. Stable for the
/// lifetime of the graph (nodes are never removed or reordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// One node's structural declaration: which operator kind it is and which
/// other nodes feed its input slots, in slot order.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Scan {
        relation: String,
        maintain_materialized: bool,
    },
    Project {
        input: NodeId,
        indices: Vec<usize>,
    },
    Union {
        inputs: Vec<NodeId>,
    },
    Rename {
        input: NodeId,
    },
    Diff {
        left: NodeId,
        right: NodeId,
        left_key: Vec<usize>,
        right_key: Vec<usize>,
    },
    ComputeEnumerable {
        provider: String,
    },
    ComputePointwise {
        provider: String,
        input: NodeId,
    },
    Join {
        atoms: Vec<(NodeId, JoinAtomSpec)>,
        vo: Vec<String>,
        output_vars: Vec<String>,
    },
}

impl NodeKind {
    /// This node's graph-edge inputs, in the slot order `Operator::process`
    /// expects. Scan and enumerable Compute have none (§3.6, §4.6).
    pub fn input_edges(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Scan { .. } | NodeKind::ComputeEnumerable { .. } => vec![],
            NodeKind::Project { input, .. }
            | NodeKind::Rename { input }
            | NodeKind::ComputePointwise { input, .. } => vec![*input],
            NodeKind::Union { inputs } => inputs.clone(),
            NodeKind::Diff { left, right, .. } => vec![*left, *right],
            NodeKind::Join { atoms, .. } => atoms.iter().map(|(n, _)| *n).collect(),
        }
    }
}

/// A validated DAG of operator declarations plus a named set of output
/// nodes and a stable topological execution order (§4.8).
#[derive(Debug, Clone)]
pub struct QueryGraph {
    nodes: Vec<NodeKind>,
    outputs: Vec<(String, NodeId)>,
    order: Vec<NodeId>,
}

impl QueryGraph {
    /// Validates and builds a graph from its node declarations and output
    /// set: every referenced `NodeId` must exist, Union must have >= 2
    /// inputs, Diff's two key arities must match, at least one output node
    /// must be declared, and the induced edge graph must be acyclic.
    pub fn build(
        nodes: Vec<NodeKind>,
        outputs: Vec<(String, NodeId)>,
    ) -> Result<QueryGraph, ValidationError> {
        if outputs.is_empty() {
            return Err(ValidationError::NoOutputNodes("<query>".to_string()));
        }
        for (name, id) in &outputs {
            if id.0 >= nodes.len() {
                return Err(ValidationError::UnknownNode(format!(
                    "output {name:?} references node#{}",
                    id.0
                )));
            }
        }
        for (i, node) in nodes.iter().enumerate() {
            for input in node.input_edges() {
                if input.0 >= nodes.len() {
                    return Err(ValidationError::UnknownNode(format!("node#{}", input.0)));
                }
            }
            if let NodeKind::Union { inputs } = node {
                if inputs.len() < 2 {
                    return Err(ValidationError::NodeArityMismatch {
                        node: i,
                        expected: 2,
                        actual: inputs.len(),
                    });
                }
            }
            if let NodeKind::Diff {
                left_key,
                right_key,
                ..
            } = node
            {
                if left_key.len() != right_key.len() {
                    return Err(ValidationError::DiffKeyArityMismatch {
                        left: left_key.len(),
                        right: right_key.len(),
                    });
                }
            }
        }
        let order = topological_order(&nodes)?;
        Ok(QueryGraph {
            nodes,
            outputs,
            order,
        })
    }

    pub fn nodes(&self) -> &[NodeKind] {
        &self.nodes
    }

    pub fn outputs(&self) -> &[(String, NodeId)] {
        &self.outputs
    }

    /// A stable topological execution order: every node appears after all
    /// of its inputs (§4.8).
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }
}

/// Kahn's algorithm: a cycle is exactly the case where some node's
/// in-degree never reaches zero (§9 "cyclic graphs... validated acyclic").
fn topological_order(nodes: &[NodeKind]) -> Result<Vec<NodeId>, ValidationError> {
    let n = nodes.len();
    let mut indegree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, node) in nodes.iter().enumerate() {
        for input in node.input_edges() {
            dependents[input.0].push(i);
            indegree[i] += 1;
        }
    }
    let mut queue: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = queue.pop_front() {
        order.push(NodeId(i));
        for &dep in &dependents[i] {
            indegree[dep] -= 1;
            if indegree[dep] == 0 {
                queue.push_back(dep);
            }
        }
    }
    if order.len() != n {
        let stuck = (0..n)
            .find(|&i| indegree[i] > 0)
            .expect("order shorter than node count implies some node is still blocked");
        return Err(ValidationError::Cycle(format!("node#{stuck}")));
    }
    Ok(order)
}

/// Report of one `flush`: the normalized delta emitted by every output
/// node (aggregated for this batch) and basic counters for §6.2's `stats`.
#[derive(Debug, Default, Clone)]
pub struct FlushReport {
    pub output_deltas: HashMap<String, Delta>,
    pub tuples_affected: usize,
    pub outputs_changed: usize,
}

/// The live instantiation of a `QueryGraph`: one `Operator` per node, run
/// single-threaded and cooperatively (§5). Holds the materialized result
/// set for every declared output node so `get_results()` can answer without
/// a flush, and a lookup from relation name to the Scan nodes that expose
/// it (a relation may feed more than one Scan across different subgraphs,
/// and a Join atom may reuse the same Scan's output more than once, as in
/// a self-join — §4.7.3).
pub struct GraphRuntime {
    operators: Vec<Operator>,
    /// `edges[i]` is node `i`'s graph-edge inputs, in slot order — a copy of
    /// `NodeKind::input_edges()` taken at construction, since the
    /// instantiated `Operator` enum no longer carries which nodes feed it.
    edges: Vec<Vec<NodeId>>,
    order: Vec<NodeId>,
    outputs: Vec<(String, NodeId)>,
    output_materialized: HashMap<NodeId, HashSet<Tuple>>,
    scan_nodes_by_relation: HashMap<String, Vec<NodeId>>,
}

impl GraphRuntime {
    /// Instantiates every node's operator state. Providers are resolved by
    /// name and kind-checked against each Compute node's declared flavor;
    /// a missing or mismatched provider is a `ValidationError` here rather
    /// than the `Operator::process` panic path, which exists only to catch
    /// a runtime provider-registry change after registration (an internal
    /// invariant, §7).
    pub fn new(
        graph: &QueryGraph,
        providers: &HashMap<String, Provider>,
    ) -> Result<GraphRuntime, ValidationError> {
        let mut operators = Vec::with_capacity(graph.nodes().len());
        let mut scan_nodes_by_relation: HashMap<String, Vec<NodeId>> = HashMap::new();

        for (i, node) in graph.nodes().iter().enumerate() {
            let op = match node {
                NodeKind::Scan {
                    relation,
                    maintain_materialized,
                } => {
                    scan_nodes_by_relation
                        .entry(relation.clone())
                        .or_default()
                        .push(NodeId(i));
                    Operator::Scan(ScanState::new(relation.clone(), *maintain_materialized))
                }
                NodeKind::Project { indices, .. } => Operator::Project(ProjectState::new(indices.clone())),
                NodeKind::Union { inputs } => Operator::Union(UnionState::new(inputs.len())),
                NodeKind::Rename { .. } => Operator::Rename(RenameState::new()),
                NodeKind::Diff {
                    left_key,
                    right_key,
                    ..
                } => Operator::Diff(DiffState::new(left_key.clone(), right_key.clone())),
                NodeKind::ComputeEnumerable { provider } => {
                    require_provider_kind(providers, provider, "Enumerable")?;
                    Operator::Compute(ComputeState::enumerable(provider.clone()))
                }
                NodeKind::ComputePointwise { provider, .. } => {
                    require_provider_kind(providers, provider, "Pointwise")?;
                    Operator::Compute(ComputeState::pointwise(provider.clone()))
                }
                NodeKind::Join {
                    atoms,
                    vo,
                    output_vars,
                } => {
                    let specs = atoms.iter().map(|(_, spec)| spec.clone()).collect();
                    Operator::Join(JoinState::new(vo.clone(), specs, output_vars.clone())?)
                }
            };
            operators.push(op);
        }

        let edges = graph.nodes().iter().map(NodeKind::input_edges).collect();

        Ok(GraphRuntime {
            operators,
            edges,
            order: graph.order().to_vec(),
            outputs: graph.outputs().to_vec(),
            output_materialized: HashMap::new(),
            scan_nodes_by_relation,
        })
    }

    pub fn get_results(&self) -> HashMap<String, HashSet<Tuple>> {
        self.outputs
            .iter()
            .map(|(name, id)| {
                (
                    name.clone(),
                    self.output_materialized.get(id).cloned().unwrap_or_default(),
                )
            })
            .collect()
    }

    /// Base relation names this graph has at least one Scan node for — used
    /// by `Engine` to assemble the seed batch for cold start (§4.6 "cold
    /// start pulls the full enumeration", generalized from Compute to Scan).
    pub fn scanned_relations(&self) -> impl Iterator<Item = &str> {
        self.scan_nodes_by_relation.keys().map(String::as_str)
    }

    /// Runs one batch: `relation_deltas` carries the normalized, already-
    /// merged delta for every base relation that changed this batch;
    /// `providers` resolves each Compute node's backing provider by name.
    /// Pushes each relation's delta into every Scan node exposing it, walks
    /// `order`, and for every non-Scan, non-enumerable-Compute node skips
    /// the operator call entirely when none of its inputs changed (cheap
    /// early-out; "no input delta" trivially implies "no output delta").
    /// Returns as soon as any Compute node's provider fails, matching §7's
    /// "abort the current flush for the affected graph" — callers are
    /// responsible for discarding the relation-delta batch that produced
    /// the failure (the Batch Manager's rollback path).
    pub fn flush(
        &mut self,
        relation_deltas: &HashMap<String, Delta>,
        providers: &HashMap<String, Provider>,
    ) -> Result<FlushReport, ProviderError> {
        let mut deltas: HashMap<NodeId, Delta> = HashMap::new();

        for (relation, delta) in relation_deltas {
            if let Some(scan_ids) = self.scan_nodes_by_relation.get(relation) {
                for &id in scan_ids {
                    let Operator::Scan(scan) = &mut self.operators[id.0] else {
                        unreachable!("scan_nodes_by_relation only ever indexes Scan nodes")
                    };
                    let out = scan.push_delta(delta.clone());
                    deltas.insert(id, out);
                }
            }
        }

        let mut tuples_affected = 0usize;

        for &id in &self.order {
            if deltas.contains_key(&id) {
                continue; // already seeded as a Scan above
            }
            let node = &self.operators[id.0];
            let inputs: Vec<Delta> = self.edges[id.0]
                .iter()
                .map(|i| deltas.get(i).cloned().unwrap_or_default())
                .collect();

            let is_enumerable_compute = matches!(node, Operator::Compute(ComputeState::Enumerable { .. }));
            if !is_enumerable_compute && inputs.iter().all(Delta::is_empty) {
                deltas.insert(id, Delta::empty());
                continue;
            }

            let provider = match node {
                Operator::Compute(c) => providers.get(c.relation()),
                _ => None,
            };
            let mut out = self.operators[id.0].process(&inputs, provider)?;
            out.normalize();
            tuples_affected += out.len();
            deltas.insert(id, out);
        }

        let mut report = FlushReport::default();
        for (name, id) in &self.outputs {
            let delta = deltas.get(id).cloned().unwrap_or_default();
            if !delta.is_empty() {
                report.outputs_changed += 1;
                let materialized = self.output_materialized.entry(*id).or_default();
                for t in &delta.removes {
                    materialized.remove(t);
                }
                for t in &delta.adds {
                    materialized.insert(t.clone());
                }
            }
            report.output_deltas.insert(name.clone(), delta);
        }
        report.tuples_affected = tuples_affected;
        Ok(report)
    }
}

fn require_provider_kind(
    providers: &HashMap<String, Provider>,
    name: &str,
    required: &'static str,
) -> Result<(), ValidationError> {
    match providers.get(name) {
        None => Err(ValidationError::UnknownProvider(name.to_string())),
        Some(Provider::Enumerable(_)) if required == "Enumerable" => Ok(()),
        Some(Provider::Pointwise(_)) if required == "Pointwise" => Ok(()),
        Some(Provider::Enumerable(_)) => Err(ValidationError::ProviderKindMismatch {
            name: name.to_string(),
            registered: "Enumerable",
            required,
        }),
        Some(Provider::Pointwise(_)) => Err(ValidationError::ProviderKindMismatch {
            name: name.to_string(),
            registered: "Pointwise",
            required,
        }),
    }
}
