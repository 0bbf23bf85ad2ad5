//! Rewrite pattern trait and the benefit-ordered pattern registry.

use std::collections::HashMap;

use smallvec::SmallVec;

use super::RewriteResult;
use super::rewriter::PatternRewriter;
use crate::context::IrContext;
use crate::refs::{OpKind, OpRef};

/// A pattern that can match and transform one operation.
///
/// `match_and_rewrite` may create detached ops through `ctx` and may make
/// in-place edits (followed by `rewriter.notify_modified()`); everything
/// else goes through the rewriter. On anything but `Applied` the driver
/// rolls back whatever the pattern did.
pub trait RewritePattern {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> RewriteResult;

    /// Kind this pattern is rooted at; `None` means it is tried on every op.
    fn root(&self) -> Option<OpKind> {
        None
    }

    fn benefit(&self) -> u16 {
        1
    }

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

struct Entry<P: ?Sized> {
    pattern: Box<P>,
    benefit: u16,
}

/// Registered patterns, keyed by root kind.
///
/// Lookup yields kind-specific and catch-all patterns merged by benefit,
/// highest first, ties in registration order. Shared by the canonicalizer
/// (`PatternSet`) and the conversion driver.
pub struct PatternTable<P: ?Sized> {
    entries: Vec<Entry<P>>,
    by_kind: HashMap<OpKind, Vec<usize>>,
    any: Vec<usize>,
}

pub type PatternSet = PatternTable<dyn RewritePattern>;

impl<P: ?Sized> Default for PatternTable<P> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            by_kind: HashMap::new(),
            any: Vec::new(),
        }
    }
}

impl<P: ?Sized> PatternTable<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, root: Option<OpKind>, benefit: u16, pattern: Box<P>) -> &mut Self {
        let index = self.entries.len();
        match root {
            Some(kind) => self.by_kind.entry(kind).or_default().push(index),
            None => self.any.push(index),
        }
        self.entries.push(Entry { pattern, benefit });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Candidates for an op of `kind`, in the order they must be tried.
    pub fn patterns_for(&self, kind: OpKind) -> impl Iterator<Item = &P> + '_ {
        let mut order: SmallVec<[usize; 8]> = self.any.iter().copied().collect();
        if let Some(specific) = self.by_kind.get(&kind) {
            order.extend(specific.iter().copied());
        }
        order.sort_by_key(|&i| (std::cmp::Reverse(self.entries[i].benefit), i));
        order.into_iter().map(move |i| &*self.entries[i].pattern)
    }
}

impl PatternTable<dyn RewritePattern> {
    pub fn add(&mut self, pattern: impl RewritePattern + 'static) -> &mut Self {
        self.add_boxed(Box::new(pattern))
    }

    pub fn add_boxed(&mut self, pattern: Box<dyn RewritePattern>) -> &mut Self {
        let (root, benefit) = (pattern.root(), pattern.benefit());
        self.insert(root, benefit, pattern)
    }
}
