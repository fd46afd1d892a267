//! Hook pipeline around table verbs.
//!
//! Every mutating or querying verb runs an ordered before-chain and
//! after-chain for its [`Verb`]. Before-hooks may rewrite the verb's
//! arguments or interrupt the whole operation; after-hooks transform the
//! result. Registration prepends, so the most recently registered hook
//! runs first.

use std::collections::HashMap;

use serde_json::Value;

use crate::shape::{Fields, Limit, OrderBy, RowData, Where};

/// Hookable verb families. Every table operation maps onto one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    Insert,
    Update,
    Delete,
    Crease,
    Execute,
    Query,
    Select,
}

/// The positional arguments of one verb, as seen by before-hooks.
#[derive(Clone, Debug)]
pub enum HookArgs {
    Insert {
        row: RowData,
    },
    Inserts {
        rows: Vec<RowData>,
    },
    Update {
        row: RowData,
        cond: Where,
    },
    Delete {
        cond: Where,
    },
    Crease {
        cond: Where,
        field: String,
        amount: f64,
    },
    Query {
        sql: String,
        params: Vec<Value>,
    },
    Execute {
        sql: String,
        params: Vec<Value>,
    },
    Select {
        fields: Fields,
        cond: Where,
        order: OrderBy,
        limit: Limit,
    },
}

/// Outcome of one before-hook.
#[derive(Debug)]
pub enum HookFlow {
    /// Proceed with (possibly rewritten) arguments.
    Continue(HookArgs),
    /// Short-circuit the operation; the verb returns its documented no-op
    /// value without touching the builder or the database.
    Interrupt,
}

type BeforeHook = Box<dyn Fn(HookArgs) -> HookFlow + Send + Sync>;
type AfterHook = Box<dyn Fn(Value) -> Value + Send + Sync>;

/// Per-verb before/after chains.
#[derive(Default)]
pub struct HookPipeline {
    before: HashMap<Verb, Vec<BeforeHook>>,
    after: HashMap<Verb, Vec<AfterHook>>,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a before-hook. Runs before any previously registered hook.
    pub fn before<F>(&mut self, verb: Verb, hook: F)
    where
        F: Fn(HookArgs) -> HookFlow + Send + Sync + 'static,
    {
        self.before.entry(verb).or_default().insert(0, Box::new(hook));
    }

    /// Register an after-hook. Runs before any previously registered hook.
    pub fn after<F>(&mut self, verb: Verb, hook: F)
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.after.entry(verb).or_default().insert(0, Box::new(hook));
    }

    /// Run the before-chain. `None` means a hook interrupted the verb.
    pub fn run_before(&self, verb: Verb, mut args: HookArgs) -> Option<HookArgs> {
        if let Some(chain) = self.before.get(&verb) {
            for hook in chain {
                match hook(args) {
                    HookFlow::Continue(next) => args = next,
                    HookFlow::Interrupt => return None,
                }
            }
        }
        Some(args)
    }

    /// Run the after-chain; the final value is what the last hook returns.
    pub fn run_after(&self, verb: Verb, mut result: Value) -> Value {
        if let Some(chain) = self.after.get(&verb) {
            for hook in chain {
                result = hook(result);
            }
        }
        result
    }
}
