//! Worker registry and dependency planning.

use anyhow::{bail, Context, Result};
use common::Config;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use crate::error::RequestError;
use crate::llm::ModelService;
use crate::model::AnalysisKind;
use crate::workers::{PromptWorker, Worker};

/// Static description of one analysis type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerDescriptor {
    pub kind: AnalysisKind,
    /// Types that must succeed before this one is dispatched
    pub depends_on: BTreeSet<AnalysisKind>,
    pub timeout: Duration,
    /// Concurrency permits taken while running
    pub weight: u32,
}

impl WorkerDescriptor {
    pub fn new(kind: AnalysisKind, timeout: Duration) -> Self {
        Self {
            kind,
            depends_on: BTreeSet::new(),
            timeout,
            weight: 1,
        }
    }

    pub fn depends_on<I: IntoIterator<Item = AnalysisKind>>(mut self, deps: I) -> Self {
        self.depends_on = deps.into_iter().collect();
        self
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }
}

/// Built-in dependencies: expert opinion is sought on the fact-checked claims.
pub fn default_dependencies(kind: AnalysisKind) -> BTreeSet<AnalysisKind> {
    match kind {
        AnalysisKind::Expert => BTreeSet::from([AnalysisKind::FactCheck]),
        _ => BTreeSet::new(),
    }
}

struct Registered {
    descriptor: WorkerDescriptor,
    worker: Arc<dyn Worker>,
}

#[derive(Default)]
pub struct WorkerRegistry {
    entries: BTreeMap<AnalysisKind, Registered>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the worker for `descriptor.kind`.
    pub fn register(&mut self, descriptor: WorkerDescriptor, worker: Arc<dyn Worker>) {
        self.entries
            .insert(descriptor.kind, Registered { descriptor, worker });
    }

    pub fn with_worker(mut self, descriptor: WorkerDescriptor, worker: Arc<dyn Worker>) -> Self {
        self.register(descriptor, worker);
        self
    }

    pub fn resolve(&self, type_id: &str) -> Result<&WorkerDescriptor, RequestError> {
        type_id
            .parse::<AnalysisKind>()
            .ok()
            .and_then(|kind| self.descriptor(kind))
            .ok_or_else(|| RequestError::UnknownTypes {
                unknown: vec![type_id.to_string()],
                valid: self.type_ids(),
            })
    }

    pub fn descriptor(&self, kind: AnalysisKind) -> Option<&WorkerDescriptor> {
        self.entries.get(&kind).map(|e| &e.descriptor)
    }

    pub fn worker(&self, kind: AnalysisKind) -> Option<Arc<dyn Worker>> {
        self.entries.get(&kind).map(|e| e.worker.clone())
    }

    pub fn type_ids(&self) -> Vec<String> {
        self.entries.keys().map(|k| k.as_str().to_string()).collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &WorkerDescriptor> {
        self.entries.values().map(|e| &e.descriptor)
    }

    /// Full dependency graph: type -> types it depends on.
    pub fn dependency_graph(&self) -> BTreeMap<AnalysisKind, BTreeSet<AnalysisKind>> {
        self.entries
            .iter()
            .map(|(k, e)| (*k, e.descriptor.depends_on.clone()))
            .collect()
    }

    /// Parse and check requested type ids. Duplicates collapse, first
    /// occurrence order is kept.
    pub fn validate_types(&self, requested: &[String]) -> Result<Vec<AnalysisKind>, RequestError> {
        if requested.iter().all(|t| t.trim().is_empty()) {
            return Err(RequestError::EmptyTypes);
        }

        let mut kinds = Vec::new();
        let mut unknown = Vec::new();
        for type_id in requested.iter().filter(|t| !t.trim().is_empty()) {
            match type_id.parse::<AnalysisKind>() {
                Ok(kind) if self.entries.contains_key(&kind) => {
                    if !kinds.contains(&kind) {
                        kinds.push(kind);
                    }
                }
                _ => unknown.push(type_id.clone()),
            }
        }

        if !unknown.is_empty() {
            return Err(RequestError::UnknownTypes {
                unknown,
                valid: self.type_ids(),
            });
        }
        Ok(kinds)
    }

    /// Dependency-ordered dispatch plan for the requested types.
    /// Dependencies outside the request are treated as already resolved.
    pub fn plan(&self, requested: &[AnalysisKind]) -> Result<DispatchPlan, RequestError> {
        let wanted: BTreeSet<AnalysisKind> = requested
            .iter()
            .copied()
            .filter(|k| self.entries.contains_key(k))
            .collect();

        let mut deps: BTreeMap<AnalysisKind, BTreeSet<AnalysisKind>> = BTreeMap::new();
        let mut dependents: BTreeMap<AnalysisKind, BTreeSet<AnalysisKind>> = BTreeMap::new();
        for kind in &wanted {
            let inside: BTreeSet<AnalysisKind> = self.entries[kind]
                .descriptor
                .depends_on
                .iter()
                .copied()
                .filter(|d| wanted.contains(d))
                .collect();
            for dep in &inside {
                dependents.entry(*dep).or_default().insert(*kind);
            }
            deps.insert(*kind, inside);
        }

        // Kahn's algorithm, layer by layer
        let mut in_degree: BTreeMap<AnalysisKind, usize> =
            deps.iter().map(|(k, d)| (*k, d.len())).collect();
        let mut remaining = wanted.clone();
        let mut layers = Vec::new();
        loop {
            let ready: Vec<AnalysisKind> = remaining
                .iter()
                .copied()
                .filter(|k| in_degree.get(k).copied().unwrap_or(0) == 0)
                .collect();
            if ready.is_empty() {
                break;
            }
            for kind in &ready {
                remaining.remove(kind);
                for dependent in dependents.get(kind).into_iter().flatten() {
                    if let Some(d) = in_degree.get_mut(dependent) {
                        *d = d.saturating_sub(1);
                    }
                }
            }
            layers.push(ready);
        }

        if !remaining.is_empty() {
            return Err(RequestError::DependencyCycle(
                remaining.iter().map(|k| k.as_str().to_string()).collect(),
            ));
        }

        Ok(DispatchPlan {
            layers,
            deps,
            dependents,
        })
    }
}

/// Result of planning one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchPlan {
    /// Types grouped by depth; each layer only depends on earlier ones
    pub layers: Vec<Vec<AnalysisKind>>,
    /// In-request dependencies per type
    pub deps: BTreeMap<AnalysisKind, BTreeSet<AnalysisKind>>,
    pub dependents: BTreeMap<AnalysisKind, BTreeSet<AnalysisKind>>,
}

impl DispatchPlan {
    pub fn order(&self) -> Vec<AnalysisKind> {
        self.layers.iter().flatten().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    pub fn dependencies(&self, kind: AnalysisKind) -> impl Iterator<Item = AnalysisKind> + '_ {
        self.deps.get(&kind).into_iter().flatten().copied()
    }

    /// Every type that directly or indirectly waits on `kind`.
    pub fn transitive_dependents(&self, kind: AnalysisKind) -> BTreeSet<AnalysisKind> {
        let mut found = BTreeSet::new();
        let mut stack = vec![kind];
        while let Some(current) = stack.pop() {
            for next in self.dependents.get(&current).into_iter().flatten() {
                if found.insert(*next) {
                    stack.push(*next);
                }
            }
        }
        found
    }
}

/// Registry with one prompt worker per analysis type, tuned by `[workers.*]`.
pub fn default_registry(model: Arc<dyn ModelService>, config: &Config) -> Result<WorkerRegistry> {
    for type_id in config.workers.keys() {
        if type_id.parse::<AnalysisKind>().is_err() {
            bail!("unknown analysis type in [workers.{type_id}]");
        }
    }

    let mut registry = WorkerRegistry::new();
    for kind in AnalysisKind::ALL {
        let overrides = config.worker(kind.as_str()).cloned().unwrap_or_default();

        let depends_on = match &overrides.depends_on {
            Some(ids) => ids
                .iter()
                .map(|id| {
                    id.parse::<AnalysisKind>()
                        .map_err(|bad| anyhow::anyhow!("[workers.{kind}] depends on unknown type {bad}"))
                })
                .collect::<Result<BTreeSet<_>>>()?,
            None => default_dependencies(kind),
        };
        let timeout = overrides
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or_else(|| config.coordinator.worker_timeout());

        let descriptor = WorkerDescriptor::new(kind, timeout)
            .depends_on(depends_on)
            .weight(overrides.weight.unwrap_or(1));
        let worker = PromptWorker::new(kind, model.clone())
            .with_model(overrides.model.clone())
            .with_search(overrides.search.clone().unwrap_or_default());
        registry.register(descriptor, Arc::new(worker));
    }

    registry
        .plan(&AnalysisKind::ALL)
        .context("invalid worker dependency configuration")?;
    Ok(registry)
}
