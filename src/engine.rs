//! Engine façade (§6): the external interface that ties together relation
//! definitions, registered providers, base-relation state, query graphs,
//! and subscriptions. Every public operation here is what a host
//! application calls; everything upstream (`graph`, `operators`, `trie`)
//! exists only to make this façade's promises hold.
//!
//! Registries are `parking_lot::RwLock`/`Mutex` rather than `std::sync`
//! equivalents for the same reason the session/catalog layers reach for it
//! elsewhere in this codebase: many short, uncontended reads (schema
//! lookups, result reads) against occasional writes (define_relation,
//! register).

use crate::batch::BatchManager;
use crate::config::EngineConfig;
use crate::delta::Delta;
use crate::error::{EngineError, ProviderError, StateError, ValidationError};
use crate::graph::{FlushReport, GraphRuntime, NodeId, NodeKind, QueryGraph};
use crate::operators::JoinAtomSpec;
use crate::provider::{EnumerableProvider, PointwiseProvider, Provider};
use crate::value::{Schema, Tuple};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Statistics reported for one flush, either via `get_statistics` or a
/// subscriber notification (§6.2 expansion).
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    pub batch_size: usize,
    pub tuples_affected: usize,
    pub wall_time: Duration,
    pub outputs_changed: usize,
}

/// What a subscriber callback receives on every flush that touches its
/// query (§6.3). `results` always reflects the post-flush materialized
/// state; `delta` is this flush's contribution, `stats` is populated only
/// when the subscription opted in.
#[derive(Clone)]
pub struct Notification {
    pub results: HashMap<String, HashSet<Tuple>>,
    pub delta: HashMap<String, Delta>,
    pub stats: Option<Statistics>,
    pub error: Option<Arc<ProviderError>>,
}

type NotifyFn = dyn Fn(Notification) + Send + Sync;

struct Subscriber {
    include_deltas: bool,
    include_stats: bool,
    callback: Arc<NotifyFn>,
}

struct QueryEntry {
    graph: QueryGraph,
    runtime: GraphRuntime,
    active: bool,
    subscribers: HashMap<String, Subscriber>,
}

/// Incrementally-maintained engine: relation catalog, base-relation state
/// (the source of truth used to cold-start newly registered queries),
/// provider registry, the set of registered queries, and the batch manager
/// that stages deltas between flushes (§2, §6).
pub struct Engine {
    config: EngineConfig,
    relations: RwLock<HashMap<String, Schema>>,
    base_state: RwLock<HashMap<String, HashSet<Tuple>>>,
    providers: RwLock<HashMap<String, Provider>>,
    queries: RwLock<HashMap<String, QueryEntry>>,
    batch: Mutex<BatchManager>,
}

impl Engine {
    pub fn new() -> Arc<Self> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Arc<Self> {
        Arc::new(Engine {
            config,
            relations: RwLock::new(HashMap::new()),
            base_state: RwLock::new(HashMap::new()),
            providers: RwLock::new(HashMap::new()),
            queries: RwLock::new(HashMap::new()),
            batch: Mutex::new(BatchManager::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Declares a base relation's schema (§4.1). Synchronous, pre-
    /// registration validation — fails rather than mutating engine state
    /// if the name is already taken (§7).
    pub fn define_relation(&self, schema: Schema) -> Result<(), ValidationError> {
        let mut relations = self.relations.write();
        if relations.contains_key(schema.name()) {
            return Err(ValidationError::DuplicateRelation(schema.name().to_string()));
        }
        let name = schema.name().to_string();
        relations.insert(name.clone(), schema);
        self.base_state.write().entry(name.clone()).or_default();
        tracing::debug!(relation = %name, "relation_defined");
        Ok(())
    }

    pub fn schema_of(&self, relation: &str) -> Result<Schema, ValidationError> {
        self.relations
            .read()
            .get(relation)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownRelation(relation.to_string()))
    }

    /// Registers a Compute node's backing provider (§4.6, §6.4). Providers
    /// are resolved by name at `register` time, not at call time, so a
    /// later re-registration under the same name does not retroactively
    /// change an already-running query's kind expectations (an internal
    /// invariant enforced by `GraphRuntime::new`'s kind check instead).
    pub fn register_enumerable_provider(
        &self,
        name: impl Into<String>,
        provider: Arc<dyn EnumerableProvider>,
    ) {
        self.providers
            .write()
            .insert(name.into(), Provider::Enumerable(provider));
    }

    pub fn register_pointwise_provider(
        &self,
        name: impl Into<String>,
        provider: Arc<dyn PointwiseProvider>,
    ) {
        self.providers
            .write()
            .insert(name.into(), Provider::Pointwise(provider));
    }

    /// Opens a `QueryBuilder` for assembling a new query graph (§6.1).
    pub fn build_query(self: &Arc<Self>) -> QueryBuilder {
        QueryBuilder {
            engine: Arc::clone(self),
            nodes: Vec::new(),
            schemas: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Validates and instantiates a query graph under `query_id`, optionally
    /// cold-starting it from current base-relation state (§4.6, §6.1).
    fn register(
        self: &Arc<Self>,
        query_id: String,
        nodes: Vec<NodeKind>,
        outputs: Vec<(String, NodeId)>,
        cold_start: bool,
    ) -> Result<QueryHandle, EngineError> {
        if self.queries.read().contains_key(&query_id) {
            return Err(ValidationError::DuplicateRelation(query_id).into());
        }
        let graph = QueryGraph::build(nodes, outputs)?;
        let providers = self.providers.read();
        let mut runtime = GraphRuntime::new(&graph, &providers)?;
        drop(providers);

        if cold_start {
            let base_state = self.base_state.read();
            let mut seed: HashMap<String, Delta> = HashMap::new();
            for relation in runtime.scanned_relations() {
                if let Some(tuples) = base_state.get(relation) {
                    if !tuples.is_empty() {
                        seed.insert(
                            relation.to_string(),
                            Delta::from_sets(tuples.iter().cloned().collect(), Default::default()),
                        );
                    }
                }
            }
            drop(base_state);
            if !seed.is_empty() {
                let providers = self.providers.read();
                runtime.flush(&seed, &providers)?;
            }
        }

        self.queries.write().insert(
            query_id.clone(),
            QueryEntry {
                graph,
                runtime,
                active: true,
                subscribers: HashMap::new(),
            },
        );
        tracing::info!(query = %query_id, cold_start, "query_registered");
        Ok(QueryHandle {
            engine: Arc::clone(self),
            id: query_id,
        })
    }

    /// Enqueues an add for `relation` in the current batch (§6.1).
    pub fn insert(&self, relation: &str, tuple: Tuple) -> Result<(), ValidationError> {
        self.apply_delta(relation, Delta::add(tuple))
    }

    pub fn delete(&self, relation: &str, tuple: Tuple) -> Result<(), ValidationError> {
        self.apply_delta(relation, Delta::remove(tuple))
    }

    /// Replaces `old` with `new` for `relation` as a single delta — so an
    /// intra-batch cancellation (old == new) is recognized rather than
    /// emitted as a spurious remove+add (S3).
    pub fn update(&self, relation: &str, old: Tuple, new: Tuple) -> Result<(), ValidationError> {
        self.apply_delta(relation, Delta::remove(old).merge(Delta::add(new)))
    }

    /// Validates `delta` against the relation's schema, then enqueues it in
    /// every query graph that scans this relation (§6.1). Validation
    /// failures leave the batch untouched (§7).
    pub fn apply_delta(&self, relation: &str, delta: Delta) -> Result<(), ValidationError> {
        let schema = self.schema_of(relation)?;
        for t in delta.adds.iter().chain(delta.removes.iter()) {
            schema.validate(t)?;
        }

        let query_ids: Vec<String> = self
            .queries
            .read()
            .iter()
            .filter(|(_, q)| q.runtime.scanned_relations().any(|r| r == relation))
            .map(|(id, _)| id.clone())
            .collect();

        let mut batch = self.batch.lock();
        for id in &query_ids {
            batch.enqueue(id, relation, delta.clone());
        }
        drop(batch);

        let mut base_state = self.base_state.write();
        let set = base_state.entry(relation.to_string()).or_default();
        for t in &delta.removes {
            set.remove(t);
        }
        for t in &delta.adds {
            set.insert(t.clone());
        }

        if !batch_in_transaction(self) {
            self.flush_all();
        }
        Ok(())
    }

    pub fn begin_transaction(&self) -> Result<(), StateError> {
        self.batch.lock().begin_transaction()
    }

    /// Ends the transaction and flushes every graph with pending deltas in
    /// one pass, so the bracketed updates propagate as a single batch per
    /// graph (§5, §6.1).
    pub fn end_transaction(&self) -> Result<(), StateError> {
        self.batch.lock().end_transaction()?;
        self.flush_all();
        Ok(())
    }

    /// Runs `f` inside a transaction, committing on `Ok` and rolling back
    /// every pending delta on `Err` (§6.1 `transaction(fn)`).
    pub fn transaction<T, E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<StateError>,
    {
        self.begin_transaction()?;
        match f() {
            Ok(value) => {
                self.end_transaction()?;
                Ok(value)
            }
            Err(err) => {
                self.batch.lock().rollback(None);
                let _ = self.batch.lock().end_transaction();
                Err(err)
            }
        }
    }

    /// Explicit escape hatch: flushes every active query, polling each
    /// Compute(Enumerable) node's provider even when no base relation
    /// changed, so a provider's own `delta_since` is picked up without
    /// requiring an unrelated `insert`/`delete` to trigger propagation
    /// (§4.6 "the next flush emits exactly that delta downstream").
    pub fn flush(&self) {
        if self.batch.lock().in_transaction() {
            return;
        }
        let ids: Vec<String> = self.queries.read().keys().cloned().collect();
        for id in ids {
            let relation_deltas = self.batch.lock().take(&id).unwrap_or_default();
            self.flush_one(&id, relation_deltas);
        }
    }

    /// Flushes every graph with a pending batch — the implicit path taken
    /// after `apply_delta`/`end_transaction`, which only touches graphs a
    /// changed relation actually feeds.
    fn flush_all(&self) {
        if self.batch.lock().in_transaction() {
            return;
        }
        let graph_ids = self.batch.lock().graphs_with_pending();
        for id in graph_ids {
            let Some(relation_deltas) = self.batch.lock().take(&id) else {
                continue;
            };
            self.flush_one(&id, relation_deltas);
        }
    }

    fn flush_one(&self, id: &str, relation_deltas: HashMap<String, Delta>) {
        let started = Instant::now();
        let batch_size: usize = relation_deltas.values().map(Delta::len).sum();
        let providers = self.providers.read();
        let mut queries = self.queries.write();
        let Some(entry) = queries.get_mut(id) else {
            return;
        };
        if !entry.active {
            return;
        }
        match entry.runtime.flush(&relation_deltas, &providers) {
            Ok(report) => {
                let stats = Statistics {
                    batch_size,
                    tuples_affected: report.tuples_affected,
                    wall_time: started.elapsed(),
                    outputs_changed: report.outputs_changed,
                };
                if stats.tuples_affected > self.config.query.max_batch_tuples {
                    tracing::warn!(
                        query = %id,
                        tuples_affected = stats.tuples_affected,
                        threshold = self.config.query.max_batch_tuples,
                        "batch_exceeded_soft_threshold"
                    );
                }
                notify(entry, &report, Some(stats), None);
            }
            Err(err) => {
                tracing::warn!(query = %id, error = %err, "flush_failed");
                let err = Arc::new(err);
                notify(entry, &FlushReport::default(), None, Some(err));
            }
        }
    }
}

fn batch_in_transaction(engine: &Engine) -> bool {
    engine.batch.lock().in_transaction()
}

fn notify(
    entry: &QueryEntry,
    report: &FlushReport,
    stats: Option<Statistics>,
    error: Option<Arc<ProviderError>>,
) {
    if entry.subscribers.is_empty() {
        return;
    }
    let results = entry.runtime.get_results();
    for sub in entry.subscribers.values() {
        let notification = Notification {
            results: results.clone(),
            delta: if sub.include_deltas {
                report.output_deltas.clone()
            } else {
                HashMap::new()
            },
            stats: if sub.include_stats { stats.clone() } else { None },
            error: error.clone(),
        };
        (sub.callback)(notification);
    }
}

/// Builds one query graph node by node, resolving variable names to
/// schema positions so callers never hand-index tuples (§6.1).
pub struct QueryBuilder {
    engine: Arc<Engine>,
    nodes: Vec<NodeKind>,
    schemas: Vec<Schema>,
    outputs: Vec<(String, NodeId)>,
}

impl QueryBuilder {
    fn push(&mut self, kind: NodeKind, schema: Schema) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(kind);
        self.schemas.push(schema);
        id
    }

    fn schema_of(&self, id: NodeId) -> &Schema {
        &self.schemas[id.0]
    }

    /// Scans a base relation (§4.1). `maintain_materialized` mirrors the
    /// scan's own view for diagnostics; it does not affect query results.
    pub fn scan(&mut self, relation: &str) -> Result<NodeId, ValidationError> {
        self.scan_with(relation, false)
    }

    pub fn scan_with(
        &mut self,
        relation: &str,
        maintain_materialized: bool,
    ) -> Result<NodeId, ValidationError> {
        let schema = self.engine.schema_of(relation)?;
        Ok(self.push(
            NodeKind::Scan {
                relation: relation.to_string(),
                maintain_materialized,
            },
            schema,
        ))
    }

    /// Projects `input` onto `names`, which must all be positions of the
    /// input's schema (§4.2).
    pub fn project(&mut self, input: NodeId, names: &[&str]) -> Result<NodeId, ValidationError> {
        let indices = self.schema_of(input).indices_of(names)?;
        let projected = self.schema_of(input).project(names)?;
        Ok(self.push(NodeKind::Project { input, indices }, projected))
    }

    /// Renames `input`'s fields to `names` positionally; arity must match
    /// (§4.4). The underlying tuples and operator are identity — only the
    /// schema presented downstream changes.
    pub fn rename(&mut self, input: NodeId, names: &[&str]) -> Result<NodeId, ValidationError> {
        let current = self.schema_of(input);
        if names.len() != current.arity() {
            return Err(ValidationError::InvalidProjectionIndex(names.len(), current.arity()));
        }
        let fields = current
            .fields()
            .iter()
            .zip(names)
            .map(|(f, &n)| crate::value::Field {
                name: n.to_string(),
                data_type: f.data_type,
            })
            .collect();
        let schema = Schema::new(format!("{}.renamed", current.name()), fields)?;
        Ok(self.push(NodeKind::Rename { input }, schema))
    }

    /// Unions two or more inputs that share a schema (§4.3).
    pub fn union(&mut self, inputs: &[NodeId]) -> Result<NodeId, ValidationError> {
        if inputs.len() < 2 {
            return Err(ValidationError::NodeArityMismatch {
                node: self.nodes.len(),
                expected: 2,
                actual: inputs.len(),
            });
        }
        let first = self.schema_of(inputs[0]).clone();
        for &id in &inputs[1..] {
            if !first.compatible_with(self.schema_of(id)) {
                return Err(ValidationError::IncompatibleUnionInputs);
            }
        }
        Ok(self.push(NodeKind::Union { inputs: inputs.to_vec() }, first))
    }

    /// Anti-joins `left` against `right` on the given key positions —
    /// tuples of `left` that have no matching key in `right` (§4.5).
    pub fn diff(
        &mut self,
        left: NodeId,
        left_key: &[&str],
        right: NodeId,
        right_key: &[&str],
    ) -> Result<NodeId, ValidationError> {
        let left_indices = self.schema_of(left).indices_of(left_key)?;
        let right_indices = self.schema_of(right).indices_of(right_key)?;
        if left_indices.len() != right_indices.len() {
            return Err(ValidationError::DiffKeyArityMismatch {
                left: left_indices.len(),
                right: right_indices.len(),
            });
        }
        let schema = self.schema_of(left).clone();
        Ok(self.push(
            NodeKind::Diff {
                left,
                right,
                left_key: left_indices,
                right_key: right_indices,
            },
            schema,
        ))
    }

    /// A Compute node backed by an `EnumerableProvider`, whose schema is
    /// supplied directly since it has no upstream node to derive one from.
    pub fn compute_enumerable(
        &mut self,
        provider: &str,
        schema: Schema,
    ) -> Result<NodeId, ValidationError> {
        Ok(self.push(
            NodeKind::ComputeEnumerable {
                provider: provider.to_string(),
            },
            schema,
        ))
    }

    /// A Compute node backed by a `PointwiseProvider`, filtering `input`'s
    /// tuples (§4.6). Schema is carried through from `input` unchanged.
    pub fn compute_pointwise(&mut self, provider: &str, input: NodeId) -> Result<NodeId, ValidationError> {
        let schema = self.schema_of(input).clone();
        Ok(self.push(
            NodeKind::ComputePointwise {
                provider: provider.to_string(),
                input,
            },
            schema,
        ))
    }

    /// A worst-case-optimal n-ary join over `atoms`, each labeled (so the
    /// same relation can appear more than once in a self-join) and given
    /// its own variable assignment (§4.7). `vo` is the global Variable
    /// Order; `output_vars` selects and orders the join's output columns.
    pub fn join(
        &mut self,
        atoms: &[(NodeId, &str, &[&str])],
        vo: &[&str],
        output_vars: &[&str],
    ) -> Result<NodeId, ValidationError> {
        let declared: Vec<(NodeId, JoinAtomSpec)> = atoms
            .iter()
            .map(|&(id, label, vars)| {
                (
                    id,
                    JoinAtomSpec::new(label, vars.iter().map(|s| (*s).to_string()).collect()),
                )
            })
            .collect();
        let fields = output_vars
            .iter()
            .map(|&name| crate::value::Field {
                name: name.to_string(),
                data_type: crate::value::DataType::Any,
            })
            .collect();
        let schema = Schema::new("join", fields)?;
        Ok(self.push(
            NodeKind::Join {
                atoms: declared,
                vo: vo.iter().map(|s| (*s).to_string()).collect(),
                output_vars: output_vars.iter().map(|s| (*s).to_string()).collect(),
            },
            schema,
        ))
    }

    /// Declares `node` as a named output of the query under construction.
    pub fn output(&mut self, name: &str, node: NodeId) -> &mut Self {
        self.outputs.push((name.to_string(), node));
        self
    }

    /// Validates and registers the assembled graph under `query_id`,
    /// cold-starting from current base-relation state unless overridden by
    /// `EngineConfig::query::cold_start` or this call (§6.1).
    pub fn register(self, query_id: impl Into<String>) -> Result<QueryHandle, EngineError> {
        let cold_start = self.engine.config.query.cold_start;
        let engine = Arc::clone(&self.engine);
        engine.register(query_id.into(), self.nodes, self.outputs, cold_start)
    }

    pub fn register_without_cold_start(self, query_id: impl Into<String>) -> Result<QueryHandle, EngineError> {
        let engine = Arc::clone(&self.engine);
        engine.register(query_id.into(), self.nodes, self.outputs, false)
    }
}

/// A live handle to a registered query (§6.1). Cheaply cloned — all state
/// lives in the `Engine` it points back to.
#[derive(Clone)]
pub struct QueryHandle {
    engine: Arc<Engine>,
    id: String,
}

impl QueryHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current materialized results of every declared output node.
    pub fn get_results(&self) -> Result<HashMap<String, HashSet<Tuple>>, StateError> {
        let queries = self.engine.queries.read();
        let entry = queries
            .get(&self.id)
            .ok_or_else(|| StateError::UnknownQuery(self.id.clone()))?;
        if !entry.active {
            return Err(StateError::Deactivated(self.id.clone()));
        }
        Ok(entry.runtime.get_results())
    }

    /// Registers `callback` under `subscription_id`, invoked on every flush
    /// that affects this query (§6.3).
    pub fn subscribe(
        &self,
        subscription_id: impl Into<String>,
        include_deltas: bool,
        include_stats: bool,
        callback: impl Fn(Notification) + Send + Sync + 'static,
    ) -> Result<(), StateError> {
        let id = subscription_id.into();
        let mut queries = self.engine.queries.write();
        let entry = queries
            .get_mut(&self.id)
            .ok_or_else(|| StateError::UnknownQuery(self.id.clone()))?;
        if !entry.active {
            return Err(StateError::Deactivated(self.id.clone()));
        }
        if entry.subscribers.contains_key(&id) {
            return Err(StateError::DuplicateSubscription(id));
        }
        entry.subscribers.insert(
            id,
            Subscriber {
                include_deltas,
                include_stats,
                callback: Arc::new(callback),
            },
        );
        Ok(())
    }

    /// Convenience for callers that don't need a stable, caller-chosen
    /// subscription id: generates one and returns it so `unsubscribe` can
    /// still target this specific registration later (§6.3).
    pub fn subscribe_anonymous(
        &self,
        include_deltas: bool,
        include_stats: bool,
        callback: impl Fn(Notification) + Send + Sync + 'static,
    ) -> Result<String, StateError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.subscribe(id.clone(), include_deltas, include_stats, callback)?;
        Ok(id)
    }

    pub fn unsubscribe(&self, subscription_id: &str) -> Result<(), StateError> {
        let mut queries = self.engine.queries.write();
        let entry = queries
            .get_mut(&self.id)
            .ok_or_else(|| StateError::UnknownQuery(self.id.clone()))?;
        entry.subscribers.remove(subscription_id);
        Ok(())
    }

    /// Statistics from this query's most recent flush are not retained
    /// standalone (they're delivered via `Notification`); this re-derives
    /// a point-in-time snapshot suitable for polling hosts that never
    /// subscribed.
    pub fn get_statistics(&self) -> Result<Statistics, StateError> {
        let queries = self.engine.queries.read();
        let entry = queries
            .get(&self.id)
            .ok_or_else(|| StateError::UnknownQuery(self.id.clone()))?;
        if !entry.active {
            return Err(StateError::Deactivated(self.id.clone()));
        }
        let results = entry.runtime.get_results();
        Ok(Statistics {
            batch_size: 0,
            tuples_affected: results.values().map(HashSet::len).sum(),
            wall_time: Duration::ZERO,
            outputs_changed: 0,
        })
    }

    /// Drops this query's runtime and re-instantiates it from scratch,
    /// optionally cold-starting again from current base-relation state.
    pub fn reset(&self, cold_start: bool) -> Result<(), EngineError> {
        let mut queries = self.engine.queries.write();
        let entry = queries
            .get_mut(&self.id)
            .ok_or_else(|| StateError::UnknownQuery(self.id.clone()))?;
        let providers = self.engine.providers.read();
        let mut runtime = GraphRuntime::new(&entry.graph, &providers)?;
        drop(providers);
        if cold_start {
            let base_state = self.engine.base_state.read();
            let mut seed: HashMap<String, Delta> = HashMap::new();
            for relation in runtime.scanned_relations() {
                if let Some(tuples) = base_state.get(relation) {
                    if !tuples.is_empty() {
                        seed.insert(
                            relation.to_string(),
                            Delta::from_sets(tuples.iter().cloned().collect(), Default::default()),
                        );
                    }
                }
            }
            drop(base_state);
            if !seed.is_empty() {
                let providers = self.engine.providers.read();
                runtime.flush(&seed, &providers)?;
            }
        }
        entry.runtime = runtime;
        Ok(())
    }

    /// Deactivates the query: further operations (including `get_results`)
    /// return `StateError::Deactivated` and it stops receiving flushes. The
    /// entry itself is kept, not removed, so `reset` can still revive it.
    pub fn deactivate(&self) -> Result<(), StateError> {
        let mut queries = self.engine.queries.write();
        let entry = queries
            .get_mut(&self.id)
            .ok_or_else(|| StateError::UnknownQuery(self.id.clone()))?;
        entry.active = false;
        tracing::info!(query = %self.id, "query_deactivated");
        Ok(())
    }
}
