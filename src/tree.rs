//! Validation of subscription requests and construction of node graphs.
//!
//! Chains build bottom-up from the caller-supplied terminal. The simple form
//! is `Listener(symbol, field) → terminal`; a `pollMs` request builds
//! `Interval → AtomicAccessor(symbol, field) → terminal` instead, which is
//! how computed keys (`ob.*`, indicator names) are served. Optional pipeline
//! stages slot in between. Nothing registers with the dispatcher until
//! [`BuiltChain::start`], so a failed build only has to drop its nodes.

use crate::dispatch::MarketDispatcher;
use crate::models::{SubscribeRequest, Value};
use crate::nodes::{Aggregate, AtomicAccessor, Interval, Listener, Node, Worker};
use crate::rt::ThreadPool;
use crate::store::{AtomicStore, FunctionRegistry, ProviderRegistry};
use std::sync::Arc;
use thiserror::Error;

pub const MAX_TREE_DEPTH: usize = 32;
pub const MAX_ARRAY_SIZE: usize = 1024;
pub const MIN_POLL_MS: u64 = 10;

const KNOWN_NODE_TYPES: &[&str] = &[
    "Listener",
    "Worker",
    "Aggregate",
    "Interval",
    "AtomicAccessor",
    "SymbolSplit",
    "Chain",
];

#[derive(Debug, Error, PartialEq)]
pub enum TreeError {
    #[error("request id must be a non-empty string or an integer")]
    BadId,
    #[error("request missing '{0}'")]
    MissingField(&'static str),
    #[error("'{0}' has the wrong type")]
    WrongType(&'static str),
    #[error("unknown node type: '{0}'")]
    UnknownNodeType(String),
    #[error("tree exceeds maximum depth of {MAX_TREE_DEPTH}")]
    DepthExceeded,
    #[error("'{0}' array exceeds maximum size of {MAX_ARRAY_SIZE}")]
    ArrayTooLarge(&'static str),
    #[error("pollMs must be >= {MIN_POLL_MS}")]
    PollTooFast,
    #[error("unknown worker function: '{0}'")]
    UnknownFunction(String),
    #[error("node type '{0}' cannot appear in a pipeline")]
    UnsupportedStage(String),
}

/// Everything the builder needs to wire a chain.
#[derive(Clone)]
pub struct Deps {
    pub store: Arc<AtomicStore>,
    pub pool: Arc<ThreadPool>,
    pub dispatcher: Arc<MarketDispatcher>,
    pub providers: Arc<ProviderRegistry>,
    pub functions: Arc<FunctionRegistry>,
    pub listener_queue_cap: usize,
}

/// A constructed chain. `head` owns the rest; `start` activates the nodes
/// that interact with the outside world (dispatcher registration, interval
/// scheduling) and must be called once the chain is owned by a registry.
pub struct BuiltChain {
    pub head: Arc<dyn Node>,
    listeners: Vec<Arc<Listener>>,
    intervals: Vec<Arc<Interval>>,
}

impl std::fmt::Debug for BuiltChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltChain")
            .field("listeners", &self.listeners.len())
            .field("intervals", &self.intervals.len())
            .finish()
    }
}

impl BuiltChain {
    pub fn start(&self) {
        for l in &self.listeners {
            l.start();
        }
        for i in &self.intervals {
            i.start();
        }
    }
}

/// Canonical request key: integers and strings are accepted, everything
/// else is rejected.
pub fn request_id(raw: &serde_json::Value) -> Result<String, TreeError> {
    match raw {
        serde_json::Value::String(s) if !s.is_empty() => Ok(s.clone()),
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        _ => Err(TreeError::BadId),
    }
}

/// Structural validation of an embedded node object (the `node`, `stages`,
/// and `pipeline` shapes): known types, bounded depth, bounded arrays.
pub fn validate_node(v: &serde_json::Value, depth: usize) -> Result<(), TreeError> {
    if depth > MAX_TREE_DEPTH {
        return Err(TreeError::DepthExceeded);
    }
    let Some(obj) = v.as_object() else {
        return Err(TreeError::WrongType("node"));
    };

    if let Some(t) = obj.get("type") {
        let Some(t) = t.as_str() else {
            return Err(TreeError::WrongType("type"));
        };
        if !KNOWN_NODE_TYPES.contains(&t) {
            return Err(TreeError::UnknownNodeType(t.to_string()));
        }
    }

    if let Some(child) = obj.get("child") {
        if child.is_object() {
            validate_node(child, depth + 1)?;
        }
    }

    for key in ["inputs", "stages", "pipeline"] {
        if let Some(arr) = obj.get(key).and_then(|a| a.as_array()) {
            if arr.len() > MAX_ARRAY_SIZE {
                return Err(match key {
                    "inputs" => TreeError::ArrayTooLarge("inputs"),
                    "stages" => TreeError::ArrayTooLarge("stages"),
                    _ => TreeError::ArrayTooLarge("pipeline"),
                });
            }
            for elem in arr {
                if elem.is_object() {
                    validate_node(elem, depth + 1)?;
                }
            }
        }
    }

    if let Some(node) = obj.get("node") {
        if node.is_object() {
            validate_node(node, depth + 1)?;
        }
    }

    Ok(())
}

/// Validate one subscription request before building.
pub fn validate_request(req: &SubscribeRequest) -> Result<String, TreeError> {
    let id = request_id(&req.id)?;
    if req.symbol.is_empty() {
        return Err(TreeError::MissingField("symbol"));
    }
    if req.field.is_empty() {
        return Err(TreeError::MissingField("field"));
    }
    if let Some(poll_ms) = req.poll_ms {
        if poll_ms < MIN_POLL_MS {
            return Err(TreeError::PollTooFast);
        }
    }
    for stages in [&req.pipeline, &req.stages] {
        if let Some(stages) = stages {
            if stages.len() > MAX_ARRAY_SIZE {
                return Err(TreeError::ArrayTooLarge("pipeline"));
            }
            for stage in stages {
                validate_node(stage, 1)?;
            }
        }
    }
    if let Some(node) = &req.node {
        validate_node(node, 1)?;
    }
    Ok(id)
}

/// Adapt a registered reducer to the worker value contract: numeric inputs
/// reduce, anything else passes through unchanged.
fn worker_fn(
    functions: &FunctionRegistry,
    name: &str,
) -> Result<crate::nodes::WorkerFn, TreeError> {
    let f = functions
        .get(name)
        .map_err(|_| TreeError::UnknownFunction(name.to_string()))?;
    Ok(Arc::new(move |vals: &[Value]| {
        let xs: Vec<f64> = vals.iter().filter_map(Value::as_f64).collect();
        Value::Double(f(&xs))
    }))
}

fn wrap_stage(
    stage: &serde_json::Value,
    downstream: Arc<dyn Node>,
    deps: &Deps,
) -> Result<Arc<dyn Node>, TreeError> {
    let Some(obj) = stage.as_object() else {
        return Err(TreeError::WrongType("stage"));
    };
    let ty = obj
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(TreeError::MissingField("type"))?;

    match ty {
        "Worker" => {
            let name = obj
                .get("fn")
                .and_then(|f| f.as_str())
                .ok_or(TreeError::MissingField("fn"))?;
            let arity = obj.get("arity").and_then(|a| a.as_u64()).unwrap_or(1) as usize;
            Ok(Worker::new(worker_fn(&deps.functions, name)?, arity, downstream))
        }
        "Aggregate" => {
            let arity = obj
                .get("arity")
                .and_then(|a| a.as_u64())
                .ok_or(TreeError::MissingField("arity"))? as usize;
            Ok(Aggregate::new(arity, downstream))
        }
        other if KNOWN_NODE_TYPES.contains(&other) => {
            Err(TreeError::UnsupportedStage(other.to_string()))
        }
        other => Err(TreeError::UnknownNodeType(other.to_string())),
    }
}

/// Build the chain for one validated request.
pub fn build_subscription(
    req: &SubscribeRequest,
    deps: &Deps,
    terminal: Arc<dyn Node>,
) -> Result<BuiltChain, TreeError> {
    // stages wrap the terminal bottom-up; the request's value stream runs
    // first-to-last through `pipeline` (or `stages`)
    let mut current: Arc<dyn Node> = terminal;
    let stages = req.pipeline.as_ref().or(req.stages.as_ref());
    if let Some(stages) = stages {
        for stage in stages.iter().rev() {
            match wrap_stage(stage, current.clone(), deps) {
                Ok(node) => current = node,
                Err(e) => {
                    current.shutdown();
                    return Err(e);
                }
            }
        }
    }

    let mut listeners = Vec::new();
    let mut intervals = Vec::new();

    let head: Arc<dyn Node> = if let Some(poll_ms) = req.poll_ms {
        let accessor = AtomicAccessor::new(
            req.symbol.clone(),
            req.field.clone(),
            deps.store.clone(),
            deps.providers.clone(),
            current,
        );
        let interval = Interval::new(poll_ms, accessor, deps.pool.clone());
        intervals.push(interval.clone());
        interval
    } else {
        let listener = Listener::new(
            req.symbol.clone(),
            req.field.clone(),
            current,
            deps.pool.clone(),
            deps.dispatcher.clone(),
            deps.listener_queue_cap,
        );
        listeners.push(listener.clone());
        listener
    };

    Ok(BuiltChain {
        head,
        listeners,
        intervals,
    })
}
