//! Local rewriting: fold rules, rewrite patterns and the greedy canonicalizer.
//!
//! Patterns never mutate the graph behind the driver's back. They record
//! their intent on a `PatternRewriter`; the driver applies it inside a
//! journal transaction and then tells its listener what happened.

pub mod canonicalize;
pub mod fold;
pub mod pattern;
pub mod rewriter;
pub(crate) mod worklist;

use smallvec::SmallVec;

use crate::context::IrContext;
use crate::refs::{OpRef, ValueRef};

pub use canonicalize::{CanonicalizeConfig, CanonicalizeReport, GreedyRewriteDriver};
pub use fold::{FoldFn, FoldPattern, FoldRegistry, FoldResult};
pub use pattern::{PatternSet, PatternTable, RewritePattern};
pub use rewriter::PatternRewriter;

/// Outcome of one pattern attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RewriteResult {
    /// The pattern recorded a rewrite; the driver commits it.
    Applied,
    /// The pattern does not apply here.
    Unchanged,
    /// The pattern matched but could not finish; the attempt is rolled back.
    Failed(String),
}

impl RewriteResult {
    pub fn failed(reason: impl Into<String>) -> Self {
        RewriteResult::Failed(reason.into())
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, RewriteResult::Applied)
    }
}

/// A committed graph change, reported in the order it was applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RewriteEvent {
    Inserted(OpRef),
    Replaced {
        op: OpRef,
        with: SmallVec<[ValueRef; 4]>,
    },
    Erased(OpRef),
    Modified(OpRef),
}

/// Observer of committed rewrites. Rolled-back attempts are never reported.
pub trait RewriteListener {
    fn notify(&mut self, ctx: &IrContext, event: &RewriteEvent);
}

/// Collects events in order; handy for tests and debugging.
#[derive(Debug, Default)]
pub struct EventLog {
    pub events: Vec<RewriteEvent>,
}

impl RewriteListener for EventLog {
    fn notify(&mut self, _ctx: &IrContext, event: &RewriteEvent) {
        self.events.push(event.clone());
    }
}
