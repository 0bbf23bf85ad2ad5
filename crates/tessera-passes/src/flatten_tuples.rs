//! Flatten tuple values into their elements.
//!
//! `core.tuple<T..>` converts to the concatenation of its converted elements:
//! nested tuples flatten recursively and `()` disappears. Scalars, tensors
//! and `core.none` are kept as they are; anything else has no conversion.
//!
//! - `plier.build_tuple` -> its (already flattened) operands
//! - `plier.static_getitem` / `plier.getitem` with a constant index -> the
//!   element's pieces
//! - `func.return` -> `func.return` of the flattened operands
//! - `func.func` -> same op with flattened entry arguments and results

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use smallvec::SmallVec;
use tessera_ir::conversion::{
    ConversionConfig, ConversionDriver, ConversionPattern, ConversionPatternSet, ConversionReport,
    ConversionTarget, DriverError, LegalityCheck, OneToNRewriter, OpAdaptor, TypeConverter,
};
use tessera_ir::dialect::core::Module;
use tessera_ir::dialect::{arith, func, plier};
use tessera_ir::rewrite::{RewriteListener, RewriteResult};
use tessera_ir::{DialectOp, IrContext, OpKind, OpRef, TypeCategory, TypeRef, ValueRef};

/// Converter used by this pass.
pub fn type_converter() -> TypeConverter {
    let mut converter = TypeConverter::new();
    converter.add_identity(|ctx, ty| {
        matches!(
            ctx.types.category(ty),
            TypeCategory::Integer
                | TypeCategory::Float
                | TypeCategory::Index
                | TypeCategory::Tensor
                | TypeCategory::None
        )
    });
    converter.add_decomposition("core", "tuple");
    converter
}

/// Type-based legality, plus `func.func` whose declared results must be
/// flat as well. `plier.build_tuple` never survives, and neither does
/// element access on a tuple, whatever its element types.
pub fn conversion_target() -> ConversionTarget {
    let converter = type_converter();
    let mut target = ConversionTarget::new();
    target.add_illegal_op(plier::BuildTuple::kind());
    target.add_dynamic_check(move |ctx, op| {
        let function = func::Func::from_op(ctx, op).ok()?;
        let legal = converter.are_legal(ctx, &function.params(ctx))
            && converter.are_legal(ctx, &function.result_types(ctx));
        Some(LegalityCheck::from(legal))
    });
    target.add_dynamic_check(|ctx, op| {
        let kind = ctx.op_kind(op);
        if kind != plier::StaticGetItem::kind() && kind != plier::GetItem::kind() {
            return None;
        }
        let &source = ctx.op_operands(op).first()?;
        ctx.types
            .tuple_elements(ctx.value_ty(source))
            .map(|_| LegalityCheck::Illegal)
    });
    target
}

pub fn populate_patterns(patterns: &mut ConversionPatternSet) {
    patterns
        .add(FuncSignaturePattern)
        .add(BuildTuplePattern)
        .add(GetItemPattern {
            kind: plier::StaticGetItem::kind(),
        })
        .add(GetItemPattern {
            kind: plier::GetItem::kind(),
        })
        .add(ReturnPattern);
}

/// Flatten every tuple in `module`. Raising `cancel` stops the pass between
/// two ops.
#[tracing::instrument(skip_all)]
pub fn lower(
    ctx: &mut IrContext,
    module: Module,
    config: ConversionConfig,
    cancel: Option<Arc<AtomicBool>>,
    listener: Option<&mut dyn RewriteListener>,
) -> Result<ConversionReport, DriverError> {
    let converter = type_converter();
    let target = conversion_target();
    let mut patterns = ConversionPatternSet::new();
    populate_patterns(&mut patterns);

    let mut driver = ConversionDriver::new(&patterns, &converter, &target).with_config(config);
    if let Some(cancel) = cancel {
        driver = driver.with_cancel_flag(cancel);
    }
    if let Some(listener) = listener {
        driver = driver.with_listener(listener);
    }
    driver.run(ctx, module)
}

fn value_types(ctx: &IrContext, values: &[ValueRef]) -> SmallVec<[TypeRef; 4]> {
    values.iter().map(|&v| ctx.value_ty(v)).collect()
}

/// Whether `values` are exactly what `ty` converts to.
fn lowers_to(ctx: &IrContext, converter: &TypeConverter, ty: TypeRef, values: &[ValueRef]) -> bool {
    converter
        .convert_type(ctx, ty)
        .is_ok_and(|types| types[..] == value_types(ctx, values)[..])
}

fn finish(result: Result<(), impl std::fmt::Display>) -> RewriteResult {
    match result {
        Ok(()) => RewriteResult::Applied,
        Err(err) => RewriteResult::failed(err.to_string()),
    }
}

/// `func.func`: flatten the entry block signature and the declared results.
struct FuncSignaturePattern;

impl ConversionPattern for FuncSignaturePattern {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        _adaptor: &OpAdaptor,
        rewriter: &mut OneToNRewriter<'_>,
    ) -> RewriteResult {
        let Ok(function) = func::Func::from_op(ctx, op) else {
            return RewriteResult::Unchanged;
        };
        let results = match rewriter
            .converter()
            .convert_types(ctx, &function.result_types(ctx))
        {
            Ok(results) => results,
            Err(err) => return RewriteResult::failed(err.to_string()),
        };
        if let Some(body) = function.body(ctx)
            && let Err(err) = rewriter.convert_region_types(ctx, body)
        {
            return RewriteResult::failed(err.to_string());
        }
        function.set_result_types(ctx, &results);
        rewriter.notify_modified(op);
        RewriteResult::Applied
    }

    fn root(&self) -> Option<OpKind> {
        Some(func::Func::kind())
    }
}

/// `plier.build_tuple(a, b, ..)` is replaced by the pieces of its operands.
struct BuildTuplePattern;

impl ConversionPattern for BuildTuplePattern {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        adaptor: &OpAdaptor,
        rewriter: &mut OneToNRewriter<'_>,
    ) -> RewriteResult {
        let Some(&ty) = ctx.op_result_types(op).first() else {
            return RewriteResult::Unchanged;
        };
        let pieces = adaptor.flat_operands();
        if !lowers_to(ctx, rewriter.converter(), ty, pieces) {
            return RewriteResult::failed("tuple type does not match its elements");
        }
        finish(rewriter.replace_op(ctx, op, pieces))
    }

    fn root(&self) -> Option<OpKind> {
        Some(plier::BuildTuple::kind())
    }
}

/// Element access with a constant index picks the element's pieces out of
/// the flattened tuple.
struct GetItemPattern {
    kind: OpKind,
}

impl GetItemPattern {
    fn index(ctx: &IrContext, op: OpRef) -> Option<i64> {
        if let Ok(item) = plier::StaticGetItem::from_op(ctx, op) {
            return item.index(ctx);
        }
        let &index = ctx.op_operands(op).get(1)?;
        arith::constant_value(ctx, index)?.as_i64()
    }
}

impl ConversionPattern for GetItemPattern {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        adaptor: &OpAdaptor,
        rewriter: &mut OneToNRewriter<'_>,
    ) -> RewriteResult {
        let (Some(&tuple), Some(&ty)) = (ctx.op_operands(op).first(), ctx.op_result_types(op).first())
        else {
            return RewriteResult::Unchanged;
        };
        let Some(elements) = ctx.types.tuple_elements(ctx.value_ty(tuple)) else {
            return RewriteResult::Unchanged;
        };
        let elements: SmallVec<[TypeRef; 4]> = elements.into();
        let Some(index) = Self::index(ctx, op)
            .and_then(|i| usize::try_from(i).ok())
            .filter(|&i| i < elements.len())
        else {
            return RewriteResult::Unchanged;
        };

        let mapping = match rewriter.converter().compute_type_mapping(ctx, &elements) {
            Ok(mapping) => mapping,
            Err(err) => return RewriteResult::failed(err.to_string()),
        };
        let pieces = &adaptor.operand(0)[mapping.converted_range(index)];
        if !lowers_to(ctx, rewriter.converter(), ty, pieces) {
            return RewriteResult::failed("element type differs from the access type");
        }
        let pieces: SmallVec<[ValueRef; 4]> = pieces.into();
        finish(rewriter.replace_op(ctx, op, &pieces))
    }

    fn root(&self) -> Option<OpKind> {
        Some(self.kind)
    }
}

/// `func.return` of tuples returns their pieces instead.
struct ReturnPattern;

impl ConversionPattern for ReturnPattern {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        adaptor: &OpAdaptor,
        rewriter: &mut OneToNRewriter<'_>,
    ) -> RewriteResult {
        let location = ctx.op(op).location;
        let flat = func::Return::create(ctx, location, adaptor.flat_operands());
        finish(rewriter.replace_op_with(ctx, op, flat.op_ref()))
    }

    fn root(&self) -> Option<OpKind> {
        Some(func::Return::kind())
    }
}
