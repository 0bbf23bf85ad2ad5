//! `plier` dialect: the untyped front-end surface.
//!
//! Values start out as `plier.undefined` and get refined by inference; the
//! fold rules here only fire once types line up exactly.

use crate::context::{IrContext, OperationDataBuilder};
use crate::dialect::{arith, core, func};
use crate::dialect_op;
use crate::location::Location;
use crate::ops::DialectOp;
use crate::refs::{OpKind, OpRef, TypeRef, ValueRef};
use crate::rewrite::fold::{FoldRegistry, FoldResult};
use crate::rewrite::{PatternRewriter, PatternSet, RewritePattern, RewriteResult};
use crate::types::{Attribute, DYNAMIC_DIM, TypeCategory, TypeDataBuilder};
use crate::Symbol;

crate::symbols! {
    INDEX => "index",
    NAME => "name",
    FUNC_NAME => "func_name",
    KW_START => "kw_start",
    KW_NAMES => "kw_names",
}

dialect_op! {
    pub struct BuildTuple = "plier"."build_tuple";
    /// `value[index]` with a runtime index operand.
    pub struct GetItem = "plier"."getitem";
    /// `value[index]` with the index as an attribute.
    pub struct StaticGetItem = "plier"."static_getitem";
    pub struct Cast = "plier"."cast";
    /// Asserts a tensor's extents; operands are the tensor then one size per dimension.
    pub struct EnforceShape = "plier"."enforce_shape";
    pub struct Dim = "plier"."dim";
    pub struct Global = "plier"."global";
    pub struct GetAttr = "plier"."getattr";
    /// The `index`-th argument of the enclosing function.
    pub struct Arg = "plier"."arg";
    /// `callee(args.., name=value..)`: operands are the callee, then the
    /// positional arguments, then the keyword arguments.
    pub struct PyCall = "plier"."call";
}

pub fn undefined_type(ctx: &mut IrContext) -> TypeRef {
    ctx.types
        .intern(TypeDataBuilder::new("plier", "undefined").build())
}

fn single_result(
    ctx: &mut IrContext,
    builder: OperationDataBuilder,
    ty: TypeRef,
) -> OpRef {
    let data = builder.result(ty).build(ctx);
    ctx.create_op(data)
}

impl BuildTuple {
    /// The result type is the tuple of the element types.
    pub fn create(ctx: &mut IrContext, location: Location, elements: &[ValueRef]) -> Self {
        let types: Vec<TypeRef> = elements.iter().map(|&v| ctx.value_ty(v)).collect();
        let ty = core::tuple_type(ctx, &types);
        let builder =
            OperationDataBuilder::of_kind(location, Self::kind()).operands(elements.iter().copied());
        Self(single_result(ctx, builder, ty))
    }
}

impl GetItem {
    pub fn create(
        ctx: &mut IrContext,
        location: Location,
        value: ValueRef,
        index: ValueRef,
        ty: TypeRef,
    ) -> Self {
        let builder = OperationDataBuilder::of_kind(location, Self::kind())
            .operand(value)
            .operand(index);
        Self(single_result(ctx, builder, ty))
    }
}

impl StaticGetItem {
    pub fn create(
        ctx: &mut IrContext,
        location: Location,
        value: ValueRef,
        index: i64,
        ty: TypeRef,
    ) -> Self {
        let builder = OperationDataBuilder::of_kind(location, Self::kind())
            .operand(value)
            .attr(INDEX(), Attribute::int(index));
        Self(single_result(ctx, builder, ty))
    }

    pub fn index(&self, ctx: &IrContext) -> Option<i64> {
        ctx.attr(self.0, INDEX())?.as_i64()
    }
}

impl Cast {
    pub fn create(ctx: &mut IrContext, location: Location, value: ValueRef, ty: TypeRef) -> Self {
        let builder = OperationDataBuilder::of_kind(location, Self::kind()).operand(value);
        Self(single_result(ctx, builder, ty))
    }
}

impl EnforceShape {
    /// The result starts out with the operand's type.
    pub fn create(
        ctx: &mut IrContext,
        location: Location,
        value: ValueRef,
        sizes: &[ValueRef],
    ) -> Self {
        let ty = ctx.value_ty(value);
        let builder = OperationDataBuilder::of_kind(location, Self::kind())
            .operand(value)
            .operands(sizes.iter().copied());
        Self(single_result(ctx, builder, ty))
    }

    /// Empty when the op is malformed and carries no operands at all.
    pub fn sizes<'a>(&self, ctx: &'a IrContext) -> &'a [ValueRef] {
        ctx.op_operands(self.0).get(1..).unwrap_or(&[])
    }
}

impl Dim {
    pub fn create(ctx: &mut IrContext, location: Location, source: ValueRef, index: ValueRef) -> Self {
        let ty = core::index_type(ctx);
        let builder = OperationDataBuilder::of_kind(location, Self::kind())
            .operand(source)
            .operand(index);
        Self(single_result(ctx, builder, ty))
    }
}

impl Global {
    pub fn create(ctx: &mut IrContext, location: Location, name: Symbol, ty: TypeRef) -> Self {
        let builder =
            OperationDataBuilder::of_kind(location, Self::kind()).attr(NAME(), Attribute::Symbol(name));
        Self(single_result(ctx, builder, ty))
    }

    pub fn name(&self, ctx: &IrContext) -> Option<Symbol> {
        ctx.attr(self.0, NAME())?.as_symbol()
    }
}

impl GetAttr {
    pub fn create(
        ctx: &mut IrContext,
        location: Location,
        value: ValueRef,
        name: Symbol,
        ty: TypeRef,
    ) -> Self {
        let builder = OperationDataBuilder::of_kind(location, Self::kind())
            .operand(value)
            .attr(NAME(), Attribute::Symbol(name));
        Self(single_result(ctx, builder, ty))
    }

    pub fn name(&self, ctx: &IrContext) -> Option<Symbol> {
        ctx.attr(self.0, NAME())?.as_symbol()
    }
}

impl Arg {
    pub fn create(ctx: &mut IrContext, location: Location, index: u32, ty: TypeRef) -> Self {
        let builder = OperationDataBuilder::of_kind(location, Self::kind())
            .attr(INDEX(), Attribute::int(index as i64));
        Self(single_result(ctx, builder, ty))
    }

    pub fn index(&self, ctx: &IrContext) -> Option<i64> {
        ctx.attr(self.0, INDEX())?.as_i64()
    }
}

impl PyCall {
    /// The result is `plier.undefined` until inference types it.
    pub fn create(
        ctx: &mut IrContext,
        location: Location,
        callee: ValueRef,
        func_name: Symbol,
        args: &[ValueRef],
        kwargs: &[(Symbol, ValueRef)],
    ) -> Self {
        let ty = undefined_type(ctx);
        let names = kwargs.iter().map(|&(name, _)| Attribute::Symbol(name)).collect();
        let builder = OperationDataBuilder::of_kind(location, Self::kind())
            .operand(callee)
            .operands(args.iter().copied())
            .operands(kwargs.iter().map(|&(_, value)| value))
            .attr(FUNC_NAME(), Attribute::Symbol(func_name))
            .attr(KW_START(), Attribute::int(args.len() as i64))
            .attr(KW_NAMES(), Attribute::List(names));
        Self(single_result(ctx, builder, ty))
    }

    pub fn callee(&self, ctx: &IrContext) -> Option<ValueRef> {
        ctx.op_operands(self.0).first().copied()
    }

    pub fn func_name(&self, ctx: &IrContext) -> Option<Symbol> {
        ctx.attr(self.0, FUNC_NAME())?.as_symbol()
    }

    fn call_operands<'a>(&self, ctx: &'a IrContext) -> &'a [ValueRef] {
        ctx.op_operands(self.0).get(1..).unwrap_or(&[])
    }

    fn kw_start(&self, ctx: &IrContext) -> usize {
        let all = self.call_operands(ctx).len();
        ctx.attr(self.0, KW_START())
            .and_then(Attribute::as_i64)
            .and_then(|n| usize::try_from(n).ok())
            .map_or(all, |n| n.min(all))
    }

    pub fn args<'a>(&self, ctx: &'a IrContext) -> &'a [ValueRef] {
        &self.call_operands(ctx)[..self.kw_start(ctx)]
    }

    /// Keyword arguments paired with their names; `None` when the names
    /// do not line up with the keyword operands.
    pub fn kwargs(&self, ctx: &IrContext) -> Option<Vec<(Symbol, ValueRef)>> {
        let values = &self.call_operands(ctx)[self.kw_start(ctx)..];
        let names = match ctx.attr(self.0, KW_NAMES()) {
            Some(names) => names.as_list()?,
            None => &[],
        };
        if names.len() != values.len() {
            return None;
        }
        names
            .iter()
            .zip(values)
            .map(|(name, &value)| Some((name.as_symbol()?, value)))
            .collect()
    }
}

// ============================================================================
// Fold rules
// ============================================================================

fn result_type(ctx: &IrContext, op: OpRef) -> Option<TypeRef> {
    ctx.op_result_types(op).first().copied()
}

fn fold_cast(ctx: &IrContext, op: OpRef, _constants: &[Option<Attribute>]) -> FoldResult {
    let (Some(&operand), Some(result_ty)) = (ctx.op_operands(op).first(), result_type(ctx, op))
    else {
        return FoldResult::Unchanged;
    };
    let operand_ty = ctx.value_ty(operand);
    if operand_ty == result_ty && ctx.types.category(operand_ty) != TypeCategory::Undefined {
        FoldResult::Value(operand)
    } else {
        FoldResult::Unchanged
    }
}

/// Constituent `index` of a `build_tuple`, if its type is exactly `ty`.
fn tuple_constituent(ctx: &IrContext, tuple: ValueRef, index: i64, ty: TypeRef) -> FoldResult {
    let Some(producer) = ctx.value_def(tuple).op() else {
        return FoldResult::Unchanged;
    };
    if !BuildTuple::matches(ctx, producer) {
        return FoldResult::Unchanged;
    }
    let elements = ctx.op_operands(producer);
    let Some(&element) = usize::try_from(index).ok().and_then(|i| elements.get(i)) else {
        return FoldResult::Unchanged;
    };
    if ctx.value_ty(element) == ty {
        FoldResult::Value(element)
    } else {
        FoldResult::Unchanged
    }
}

fn fold_getitem(ctx: &IrContext, op: OpRef, constants: &[Option<Attribute>]) -> FoldResult {
    let (Some(&tuple), Some(Some(index)), Some(ty)) = (
        ctx.op_operands(op).first(),
        constants.get(1),
        result_type(ctx, op),
    ) else {
        return FoldResult::Unchanged;
    };
    match index.as_i64() {
        Some(index) => tuple_constituent(ctx, tuple, index, ty),
        None => FoldResult::Unchanged,
    }
}

fn fold_static_getitem(ctx: &IrContext, op: OpRef, _constants: &[Option<Attribute>]) -> FoldResult {
    let item = StaticGetItem::wrap_unchecked(op);
    let (Some(&tuple), Some(index), Some(ty)) = (
        ctx.op_operands(op).first(),
        item.index(ctx),
        result_type(ctx, op),
    ) else {
        return FoldResult::Unchanged;
    };
    tuple_constituent(ctx, tuple, index, ty)
}

/// Merge constant sizes into the declared shape.
///
/// Returns `None` on a rank mismatch or when a concrete extent disagrees
/// with a constant size; never refines only part of the shape.
pub fn refine_shape(declared: &[i64], sizes: &[Option<i64>]) -> Option<Vec<i64>> {
    if declared.len() != sizes.len() {
        return None;
    }
    let mut shape = declared.to_vec();
    for (extent, size) in shape.iter_mut().zip(sizes) {
        match *size {
            Some(size) if size != DYNAMIC_DIM => {
                if *extent == DYNAMIC_DIM {
                    *extent = size;
                } else if *extent != size {
                    return None;
                }
            }
            _ => {}
        }
    }
    Some(shape)
}

fn fold_enforce_shape(ctx: &IrContext, op: OpRef, constants: &[Option<Attribute>]) -> FoldResult {
    let Some(ty) = result_type(ctx, op) else {
        return FoldResult::Unchanged;
    };
    let (Some(declared), Some(element)) = (ctx.types.tensor_shape(ty), ctx.types.tensor_element(ty))
    else {
        return FoldResult::Unchanged;
    };
    let sizes: Vec<Option<i64>> = constants
        .iter()
        .skip(1)
        .map(|c| c.as_ref().and_then(Attribute::as_i64))
        .collect();
    match refine_shape(&declared, &sizes) {
        Some(shape) if shape[..] != declared[..] => {
            let dims = shape.into_iter().map(Attribute::int).collect();
            FoldResult::RefineType(
                TypeDataBuilder::new("core", "tensor")
                    .param(element)
                    .attr(core::SHAPE(), Attribute::List(dims))
                    .build(),
            )
        }
        _ => FoldResult::Unchanged,
    }
}

fn fold_arg(ctx: &IrContext, op: OpRef, _constants: &[Option<Attribute>]) -> FoldResult {
    let (Some(index), Some(ty)) = (Arg::wrap_unchecked(op).index(ctx), result_type(ctx, op)) else {
        return FoldResult::Unchanged;
    };
    let Some(parent) = ctx.parent_op(op) else {
        return FoldResult::Unchanged;
    };
    let Ok(function) = func::Func::from_op(ctx, parent) else {
        return FoldResult::Unchanged;
    };
    let Some(entry) = function.entry_block(ctx) else {
        return FoldResult::Unchanged;
    };
    let args = ctx.block_args(entry);
    match usize::try_from(index).ok().and_then(|i| args.get(i)) {
        Some(&arg) if ctx.value_ty(arg) == ty => FoldResult::Value(arg),
        _ => FoldResult::Unchanged,
    }
}

pub fn register_folders(registry: &mut FoldRegistry) {
    registry.register(Cast::kind(), fold_cast);
    registry.register(GetItem::kind(), fold_getitem);
    registry.register(StaticGetItem::kind(), fold_static_getitem);
    registry.register(EnforceShape::kind(), fold_enforce_shape);
    registry.register(Arg::kind(), fold_arg);
}

// ============================================================================
// Canonicalization patterns
// ============================================================================

/// `getattr{b}(global{a})` becomes `global{"a.b"}`.
pub struct GetattrGlobal;

impl RewritePattern for GetattrGlobal {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> RewriteResult {
        let getattr = GetAttr::wrap_unchecked(op);
        let Some(&source) = ctx.op_operands(op).first() else {
            return RewriteResult::Unchanged;
        };
        let Some(global) = ctx
            .value_def(source)
            .op()
            .and_then(|p| Global::from_op(ctx, p).ok())
        else {
            return RewriteResult::Unchanged;
        };
        let (Some(prefix), Some(attr), Some(ty)) =
            (global.name(ctx), getattr.name(ctx), result_type(ctx, op))
        else {
            return RewriteResult::Unchanged;
        };
        let joined = Symbol::from_dynamic(&format!("{prefix}.{attr}"));
        let location = ctx.op(op).location;
        let merged = Global::create(ctx, location, joined, ty);
        rewriter.replace_op(merged.op_ref());
        RewriteResult::Applied
    }

    fn root(&self) -> Option<OpKind> {
        Some(GetAttr::kind())
    }
}

/// `dim(enforce_shape(x, s0..sn), i)` with constant `i` becomes `s_i`.
pub struct EnforceShapeDim;

impl RewritePattern for EnforceShapeDim {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> RewriteResult {
        let &[source, index] = ctx.op_operands(op) else {
            return RewriteResult::Unchanged;
        };
        let Some(enforce) = ctx
            .value_def(source)
            .op()
            .and_then(|p| EnforceShape::from_op(ctx, p).ok())
        else {
            return RewriteResult::Unchanged;
        };
        let Some(index) = arith::constant_value(ctx, index).and_then(Attribute::as_i64) else {
            return RewriteResult::Unchanged;
        };
        let sizes = enforce.sizes(ctx);
        let Some(&size) = usize::try_from(index).ok().and_then(|i| sizes.get(i)) else {
            return RewriteResult::Unchanged;
        };
        let Some(ty) = result_type(ctx, op) else {
            return RewriteResult::Unchanged;
        };
        if ctx.value_ty(size) != ty {
            return RewriteResult::failed("dimension size has a different type than dim");
        }
        rewriter.replace_with_values([size]);
        RewriteResult::Applied
    }

    fn root(&self) -> Option<OpKind> {
        Some(Dim::kind())
    }
}

pub fn populate_canonicalization_patterns(patterns: &mut PatternSet) {
    patterns.add(GetattrGlobal).add(EnforceShapeDim);
}
