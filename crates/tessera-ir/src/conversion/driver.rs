//! Conversion pattern driver.
//!
//! Every op starts out unvisited. Legal ops are left alone; an illegal op is
//! offered to the patterns rooted at its kind, best benefit first, each
//! attempt in its own transaction. An op no pattern could convert is parked
//! and offered again when one of its operands is replaced or bridged. After
//! the worklist drains, redundant bridges are resolved and the target is
//! verified.
//!
//! In [`ConversionMode::Full`] the whole pass runs in an outer transaction:
//! any op still illegal, or any bridge still in place, rolls everything back
//! and the listener hears nothing. [`ConversionMode::Partial`] keeps whatever
//! converted and reports the rest.
//!
//! The cancellation flag is checked between two worklist items. A cancelled
//! full conversion is rolled back like a failed one but is not an error; a
//! cancelled partial conversion keeps its progress.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cranelift_entity::SecondaryMap;
use derive_more::{Display, Error, From};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::ConversionError;
use super::adaptor::OpAdaptor;
use super::bridge::resolve_bridges;
use super::rewriter::{OneToNRewriter, Remapping};
use super::target::{ConversionTarget, IllegalOp};
use super::type_converter::TypeConverter;
use crate::context::IrContext;
use crate::dialect::core::{self, Module};
use crate::error::IrError;
use crate::refs::{OpKind, OpRef, RegionRef};
use crate::rewrite::worklist::Worklist;
use crate::rewrite::{PatternTable, RewriteEvent, RewriteListener, RewriteResult};
use crate::walk;

/// A pattern that converts one illegal op.
///
/// The adaptor presents the op's operands already remapped to their
/// converted values. All graph changes go through the rewriter, except
/// creating detached ops and in-place edits reported with
/// `rewriter.notify_modified`. Anything other than `Applied` rolls back
/// whatever the pattern did.
pub trait ConversionPattern {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        adaptor: &OpAdaptor,
        rewriter: &mut OneToNRewriter<'_>,
    ) -> RewriteResult;

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

pub type ConversionPatternSet = PatternTable<dyn ConversionPattern>;

impl PatternTable<dyn ConversionPattern> {
    pub fn add(&mut self, pattern: impl ConversionPattern + 'static) -> &mut Self {
        self.add_boxed(Box::new(pattern))
    }

    pub fn add_boxed(&mut self, pattern: Box<dyn ConversionPattern>) -> &mut Self {
        let (root, benefit) = (pattern.root(), pattern.benefit());
        self.insert(root, benefit, pattern)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionMode {
    /// Every op must end up legal, or nothing changes.
    #[default]
    Full,
    /// Convert what can be converted, report the rest.
    Partial,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    pub mode: ConversionMode,
    /// Upper bound on committed pattern applications.
    pub max_rewrites: usize,
    /// Run `resolve_bridges` before verifying the target.
    pub resolve_bridges: bool,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            mode: ConversionMode::Full,
            max_rewrites: 10_000,
            resolve_bridges: true,
        }
    }
}

impl ConversionConfig {
    pub fn with_mode(mut self, mode: ConversionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_rewrites(mut self, n: usize) -> Self {
        self.max_rewrites = n;
        self
    }

    pub fn with_bridge_resolution(mut self, enabled: bool) -> Self {
        self.resolve_bridges = enabled;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConversionReport {
    /// Committed pattern applications.
    pub rewritten: usize,
    pub bridges_resolved: usize,
    /// Bridges still in place (partial mode only; full mode fails instead).
    pub bridges_remaining: Vec<OpRef>,
    /// Ops left illegal (partial mode only).
    pub skipped: Vec<IllegalOp>,
    /// Stopped by the cancellation flag. In full mode nothing was kept.
    pub cancelled: bool,
}

/// Full conversion left illegal ops behind; the module is unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub struct ConversionFailure {
    pub illegal: Vec<IllegalOp>,
}

impl fmt::Display for ConversionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conversion left {} illegal op(s)", self.illegal.len())?;
        for op in &self.illegal {
            write!(f, "\n  - {op}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Display, Error, From, PartialEq, Eq)]
pub enum DriverError {
    #[display("{_0}")]
    Illegal(ConversionFailure),
    /// A pattern broke a graph invariant; its attempt was rolled back.
    #[display("{_0}")]
    Ir(IrError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum OpState {
    #[default]
    Unvisited,
    NoMatch,
    Rewritten,
}

pub struct ConversionDriver<'a> {
    patterns: &'a ConversionPatternSet,
    converter: &'a TypeConverter,
    target: &'a ConversionTarget,
    config: ConversionConfig,
    cancel: Option<Arc<AtomicBool>>,
    listener: Option<&'a mut dyn RewriteListener>,
    /// Events held back until a full conversion commits.
    deferred: Vec<RewriteEvent>,
}

impl<'a> ConversionDriver<'a> {
    pub fn new(
        patterns: &'a ConversionPatternSet,
        converter: &'a TypeConverter,
        target: &'a ConversionTarget,
    ) -> Self {
        Self {
            patterns,
            converter,
            target,
            config: ConversionConfig::default(),
            cancel: None,
            listener: None,
            deferred: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: ConversionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_listener(mut self, listener: &'a mut dyn RewriteListener) -> Self {
        self.listener = Some(listener);
        self
    }

    #[tracing::instrument(skip_all)]
    pub fn run(&mut self, ctx: &mut IrContext, module: Module) -> Result<ConversionReport, DriverError> {
        let Some(body) = module.body(ctx) else {
            return Ok(ConversionReport::default());
        };
        info!(mode = ?self.config.mode, patterns = self.patterns.len(), "converting module");

        match self.config.mode {
            ConversionMode::Partial => self.convert(ctx, body),
            ConversionMode::Full => {
                let cp = ctx.begin_transaction();
                match self.convert(ctx, body) {
                    Ok(report) if report.cancelled => {
                        ctx.rollback(cp);
                        self.deferred.clear();
                        debug!("full conversion cancelled; rolled back");
                        Ok(ConversionReport {
                            cancelled: true,
                            ..Default::default()
                        })
                    }
                    Ok(report) => {
                        ctx.commit(cp);
                        if let Some(listener) = self.listener.as_deref_mut() {
                            for event in &self.deferred {
                                listener.notify(ctx, event);
                            }
                        }
                        self.deferred.clear();
                        Ok(report)
                    }
                    Err(err) => {
                        ctx.rollback(cp);
                        self.deferred.clear();
                        Err(err)
                    }
                }
            }
        }
    }

    fn convert(&mut self, ctx: &mut IrContext, body: RegionRef) -> Result<ConversionReport, DriverError> {
        let mut report = ConversionReport::default();
        let mut remapping = Remapping::new();
        let mut state: SecondaryMap<OpRef, OpState> = SecondaryMap::new();
        let mut worklist = Worklist::default();
        worklist.extend(walk::collect_ops(ctx, body));

        while let Some(op) = worklist.pop() {
            if self.cancelled() {
                report.cancelled = true;
                debug!("conversion cancelled");
                break;
            }
            if !ctx.is_live(op) || ctx.op(op).parent_block.is_none() || state[op] == OpState::Rewritten {
                continue;
            }
            if self.target.is_legal(ctx, op, self.converter).is_legal() {
                continue;
            }
            if report.rewritten >= self.config.max_rewrites {
                warn!(
                    max_rewrites = self.config.max_rewrites,
                    "conversion rewrite budget exhausted"
                );
                break;
            }
            if self.try_patterns(ctx, op, &mut remapping, &mut worklist)? {
                state[op] = OpState::Rewritten;
                report.rewritten += 1;
            } else {
                if state[op] == OpState::Unvisited {
                    trace!(%op, kind = %ctx.op_kind(op), "no conversion pattern applied yet");
                }
                state[op] = OpState::NoMatch;
            }
        }

        if report.cancelled && self.config.mode == ConversionMode::Full {
            return Ok(report);
        }
        if self.config.resolve_bridges {
            report.bridges_resolved = resolve_bridges(ctx, body)?.resolved;
        }
        report.bridges_remaining = walk::collect_ops(ctx, body)
            .into_iter()
            .filter(|&op| core::is_bridge(ctx, op))
            .collect();

        let mut illegal = self.target.verify(ctx, body, self.converter);
        match self.config.mode {
            ConversionMode::Full => {
                illegal.extend(
                    report
                        .bridges_remaining
                        .iter()
                        .map(|&op| IllegalOp::new(ctx, op, "unresolved placeholder bridge")),
                );
                if !illegal.is_empty() {
                    debug!(illegal = illegal.len(), "full conversion failed; rolling back");
                    return Err(ConversionFailure { illegal }.into());
                }
            }
            ConversionMode::Partial => {
                for item in &illegal {
                    warn!(op = %item.op, kind = %item.kind, reason = %item.reason, "op left unconverted");
                }
                report.skipped = illegal;
            }
        }

        debug!(
            rewritten = report.rewritten,
            bridges_resolved = report.bridges_resolved,
            bridges_remaining = report.bridges_remaining.len(),
            "conversion finished"
        );
        Ok(report)
    }

    fn try_patterns(
        &mut self,
        ctx: &mut IrContext,
        op: OpRef,
        remapping: &mut Remapping,
        worklist: &mut Worklist,
    ) -> Result<bool, DriverError> {
        let kind = ctx.op_kind(op);
        let patterns = self.patterns;
        for pattern in patterns.patterns_for(kind) {
            let cp = ctx.begin_transaction();
            let mut rewriter = OneToNRewriter::new(self.converter, remapping, op);
            let adaptor = match rewriter.adapt(ctx, op) {
                Ok(adaptor) => adaptor,
                Err(ConversionError::Type(err)) => {
                    ctx.rollback(cp);
                    debug!(%op, %kind, %err, "operand types do not convert");
                    return Ok(false);
                }
                Err(ConversionError::Ir(err)) => {
                    ctx.rollback(cp);
                    return Err(err.into());
                }
            };

            let result = pattern.match_and_rewrite(ctx, op, &adaptor, &mut rewriter);
            if let Some(err) = rewriter.take_fault() {
                ctx.rollback(cp);
                return Err(err.into());
            }
            match result {
                RewriteResult::Applied => {
                    let (events, pending) = rewriter.finish();
                    if events.is_empty() && pending.is_empty() {
                        ctx.rollback(cp);
                        continue;
                    }
                    ctx.commit(cp);
                    for (from, to) in pending {
                        remapping.insert(from, to);
                    }
                    debug!(pattern = pattern.name(), %op, %kind, "conversion pattern applied");
                    for event in events {
                        self.emit(ctx, worklist, event);
                    }
                    return Ok(true);
                }
                RewriteResult::Unchanged => ctx.rollback(cp),
                RewriteResult::Failed(reason) => {
                    ctx.rollback(cp);
                    debug!(pattern = pattern.name(), %op, %reason, "conversion failed; rolled back");
                }
            }
        }
        Ok(false)
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn emit(&mut self, ctx: &IrContext, worklist: &mut Worklist, event: RewriteEvent) {
        match &event {
            RewriteEvent::Inserted(op) => {
                worklist.push(*op);
                for &result in ctx.op_results(*op) {
                    worklist.push_users(ctx, result);
                }
            }
            RewriteEvent::Replaced { with, .. } => {
                for &value in with {
                    worklist.push_users(ctx, value);
                }
            }
            RewriteEvent::Erased(_) => {}
            RewriteEvent::Modified(op) => {
                worklist.push(*op);
                for &result in ctx.op_results(*op) {
                    worklist.push_users(ctx, result);
                }
                for &region in &ctx.op(*op).regions {
                    if let Some(&entry) = ctx.region(region).blocks.first() {
                        for &arg in ctx.block_args(entry) {
                            worklist.push_users(ctx, arg);
                        }
                    }
                }
            }
        }
        match self.config.mode {
            ConversionMode::Full => self.deferred.push(event),
            ConversionMode::Partial => {
                if let Some(listener) = self.listener.as_deref_mut() {
                    listener.notify(ctx, &event);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Symbol;
    use crate::dialect::{arith, func, plier};
    use crate::location::{Location, Span};
    use crate::ops::DialectOp;
    use crate::rewrite::EventLog;
    use crate::types::{Attribute, TypeCategory};
    use crate::{BlockRef, ValueRef};

    struct LowerBuildTuple;

    impl ConversionPattern for LowerBuildTuple {
        fn match_and_rewrite(
            &self,
            ctx: &mut IrContext,
            op: OpRef,
            adaptor: &OpAdaptor,
            rewriter: &mut OneToNRewriter<'_>,
        ) -> RewriteResult {
            match rewriter.replace_op(ctx, op, adaptor.flat_operands()) {
                Ok(()) => RewriteResult::Applied,
                Err(err) => RewriteResult::failed(err.to_string()),
            }
        }

        fn root(&self) -> Option<OpKind> {
            Some(plier::BuildTuple::kind())
        }
    }

    struct FlattenReturn;

    impl ConversionPattern for FlattenReturn {
        fn match_and_rewrite(
            &self,
            ctx: &mut IrContext,
            op: OpRef,
            adaptor: &OpAdaptor,
            rewriter: &mut OneToNRewriter<'_>,
        ) -> RewriteResult {
            let location = ctx.op(op).location;
            let flat = func::Return::create(ctx, location, adaptor.flat_operands());
            match rewriter.replace_op_with(ctx, op, flat.op_ref()) {
                Ok(()) => RewriteResult::Applied,
                Err(err) => RewriteResult::failed(err.to_string()),
            }
        }

        fn root(&self) -> Option<OpKind> {
            Some(func::Return::kind())
        }
    }

    /// Erases the matched op even though it is read, then claims no match.
    struct Reckless;

    impl ConversionPattern for Reckless {
        fn match_and_rewrite(
            &self,
            ctx: &mut IrContext,
            op: OpRef,
            _adaptor: &OpAdaptor,
            rewriter: &mut OneToNRewriter<'_>,
        ) -> RewriteResult {
            let _ = rewriter.erase_op(ctx, op);
            RewriteResult::Unchanged
        }

        fn root(&self) -> Option<OpKind> {
            Some(plier::BuildTuple::kind())
        }
    }

    struct Fixture {
        ctx: IrContext,
        module: Module,
        entry: BlockRef,
        tuple: OpRef,
        ret: OpRef,
        elements: [ValueRef; 2],
        converter: TypeConverter,
    }

    /// `return build_tuple(1, 2)` in a function without declared results.
    fn fixture() -> Fixture {
        let mut ctx = IrContext::new();
        let path = ctx.paths.intern("driver.py".to_owned());
        let loc = Location::new(path, Span::new(0, 0));
        let module = core::Module::create(&mut ctx, loc, Symbol::new("m"));
        let top = module.body_block(&ctx).unwrap();
        let function = func::Func::create(&mut ctx, loc, Symbol::new("f"), &[], &[]);
        ctx.push_op(top, function.op_ref()).unwrap();
        let entry = function.entry_block(&ctx).unwrap();

        let i64_ty = core::i64_type(&mut ctx);
        let elements = [1, 2].map(|n| {
            let c = arith::Constant::create(&mut ctx, loc, i64_ty, Attribute::int(n));
            ctx.push_op(entry, c.op_ref()).unwrap();
            c.result(&ctx)
        });
        let tuple = plier::BuildTuple::create(&mut ctx, loc, &elements);
        ctx.push_op(entry, tuple.op_ref()).unwrap();
        let tv = ctx.op_result(tuple.op_ref(), 0);
        let ret = func::Return::create(&mut ctx, loc, &[tv]);
        ctx.push_op(entry, ret.op_ref()).unwrap();

        let mut converter = TypeConverter::new();
        converter.add_identity(|ctx, ty| {
            matches!(
                ctx.types.category(ty),
                TypeCategory::Integer | TypeCategory::Float | TypeCategory::Index
            )
        });
        converter.add_decomposition("core", "tuple");

        Fixture {
            ctx,
            module,
            entry,
            tuple: tuple.op_ref(),
            ret: ret.op_ref(),
            elements,
            converter,
        }
    }

    fn returned(f: &Fixture) -> Vec<ValueRef> {
        let last = *f.ctx.block(f.entry).ops.last().unwrap();
        assert!(func::Return::matches(&f.ctx, last));
        f.ctx.op_operands(last).to_vec()
    }

    #[test]
    fn full_conversion_flattens_and_clears_bridges() {
        let mut f = fixture();
        let mut patterns = ConversionPatternSet::new();
        patterns.add(LowerBuildTuple).add(FlattenReturn);
        let target = ConversionTarget::new();
        let mut log = EventLog::default();

        let report = ConversionDriver::new(&patterns, &f.converter, &target)
            .with_listener(&mut log)
            .run(&mut f.ctx, f.module)
            .unwrap();

        assert_eq!(report.rewritten, 2);
        assert_eq!(report.bridges_resolved, 1);
        assert!(report.bridges_remaining.is_empty());
        assert_eq!(returned(&f), f.elements.to_vec());
        assert!(!f.ctx.is_live(f.tuple));
        assert!(matches!(log.events.first(), Some(RewriteEvent::Inserted(_))));
        assert!(log.events.contains(&RewriteEvent::Erased(f.ret)));
    }

    #[test]
    fn full_conversion_failure_restores_module() {
        let mut f = fixture();
        let before: Vec<OpRef> = f.ctx.block(f.entry).ops.to_vec();
        let tv = f.ctx.op_result(f.tuple, 0);
        let mut patterns = ConversionPatternSet::new();
        patterns.add(FlattenReturn);
        let target = ConversionTarget::new();
        let mut log = EventLog::default();

        let err = ConversionDriver::new(&patterns, &f.converter, &target)
            .with_listener(&mut log)
            .run(&mut f.ctx, f.module)
            .unwrap_err();

        let DriverError::Illegal(failure) = err else {
            panic!("expected an illegal-op failure, got {err}");
        };
        let kinds: Vec<OpKind> = failure.illegal.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![plier::BuildTuple::kind(), core::UnrealizedConversionCast::kind()]
        );
        assert_eq!(f.ctx.block(f.entry).ops.to_vec(), before);
        assert_eq!(f.ctx.op_operands(f.ret), &[tv]);
        assert!(log.events.is_empty());
    }

    #[test]
    fn partial_conversion_keeps_progress_and_reports_leftovers() {
        let mut f = fixture();
        let mut patterns = ConversionPatternSet::new();
        patterns.add(FlattenReturn);
        let target = ConversionTarget::new();

        let report = ConversionDriver::new(&patterns, &f.converter, &target)
            .with_config(ConversionConfig::default().with_mode(ConversionMode::Partial))
            .run(&mut f.ctx, f.module)
            .unwrap();

        assert_eq!(report.rewritten, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].op, f.tuple);
        assert_eq!(report.bridges_remaining.len(), 1);
        let unpack = report.bridges_remaining[0];
        assert_eq!(f.ctx.op_operands(unpack), &[f.ctx.op_result(f.tuple, 0)]);
        assert_eq!(returned(&f), f.ctx.op_results(unpack).to_vec());
    }

    #[test]
    fn structural_error_aborts_and_rolls_back() {
        let mut f = fixture();
        let mut patterns = ConversionPatternSet::new();
        patterns.add(Reckless);
        let target = ConversionTarget::new();

        let err = ConversionDriver::new(&patterns, &f.converter, &target)
            .with_config(ConversionConfig::default().with_mode(ConversionMode::Partial))
            .run(&mut f.ctx, f.module)
            .unwrap_err();

        assert!(matches!(err, DriverError::Ir(IrError::LiveUses { op, .. }) if op == f.tuple));
        assert!(f.ctx.is_live(f.tuple));
        assert_eq!(f.ctx.op(f.tuple).parent_block, Some(f.entry));
    }

    /// Raises the flag as soon as it hears the first event.
    struct CancelOnFirstEvent(Arc<AtomicBool>);

    impl RewriteListener for CancelOnFirstEvent {
        fn notify(&mut self, _ctx: &IrContext, _event: &RewriteEvent) {
            self.0.store(true, Ordering::Relaxed);
        }
    }

    #[test]
    fn cancelled_full_conversion_rolls_back() {
        let mut f = fixture();
        let before: Vec<OpRef> = f.ctx.block(f.entry).ops.to_vec();
        let mut patterns = ConversionPatternSet::new();
        patterns.add(LowerBuildTuple).add(FlattenReturn);
        let target = ConversionTarget::new();
        let mut log = EventLog::default();

        let report = ConversionDriver::new(&patterns, &f.converter, &target)
            .with_cancel_flag(Arc::new(AtomicBool::new(true)))
            .with_listener(&mut log)
            .run(&mut f.ctx, f.module)
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.rewritten, 0);
        assert_eq!(f.ctx.block(f.entry).ops.to_vec(), before);
        assert!(log.events.is_empty());
    }

    #[test]
    fn cancelled_partial_conversion_keeps_progress() {
        let mut f = fixture();
        let mut patterns = ConversionPatternSet::new();
        patterns.add(LowerBuildTuple).add(FlattenReturn);
        let target = ConversionTarget::new();
        let flag = Arc::new(AtomicBool::new(false));
        let mut stopper = CancelOnFirstEvent(Arc::clone(&flag));

        let report = ConversionDriver::new(&patterns, &f.converter, &target)
            .with_config(ConversionConfig::default().with_mode(ConversionMode::Partial))
            .with_cancel_flag(flag)
            .with_listener(&mut stopper)
            .run(&mut f.ctx, f.module)
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.rewritten, 1);
        assert_eq!(report.skipped.len(), 1);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ConversionConfig = serde_json::from_str(r#"{"mode": "partial"}"#).unwrap();
        assert_eq!(config.mode, ConversionMode::Partial);
        assert_eq!(config.max_rewrites, 10_000);
        assert!(config.resolve_bridges);
    }
}
