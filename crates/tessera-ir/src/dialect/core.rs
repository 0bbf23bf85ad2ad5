//! `core` dialect: the module container, the conversion bridge and builtin types.

use smallvec::smallvec;

use crate::context::{BlockData, IrContext, OperationDataBuilder, RegionData};
use crate::location::Location;
use crate::ops::DialectOp;
use crate::refs::{BlockRef, OpRef, RegionRef, TypeRef, ValueRef};
use crate::types::{Attribute, TypeDataBuilder};
use crate::{Symbol, dialect_op};

crate::symbols! {
    SYM_NAME => "sym_name",
    SHAPE => "shape",
}

dialect_op! {
    /// Top-level container with a single-block body region.
    pub struct Module = "core"."module";
    /// The placeholder bridge used while values change arity.
    ///
    /// Pack form: N inputs, one result of the original type.
    /// Unpack form: one input, K results of the converted types.
    pub struct UnrealizedConversionCast = "core"."unrealized_conversion_cast";
}

impl Module {
    pub fn create(ctx: &mut IrContext, location: Location, name: Symbol) -> Self {
        let block = ctx.create_block(BlockData {
            location,
            args: vec![],
            ops: smallvec![],
            parent_region: None,
        });
        let region = ctx.create_region(RegionData {
            location,
            blocks: smallvec![block],
            parent_op: None,
        });
        let data = OperationDataBuilder::of_kind(location, Self::kind())
            .attr(SYM_NAME(), Attribute::Symbol(name))
            .region(region)
            .build(ctx);
        Self(ctx.create_op(data))
    }

    pub fn name(&self, ctx: &IrContext) -> Option<Symbol> {
        ctx.attr(self.0, SYM_NAME())?.as_symbol()
    }

    pub fn body(&self, ctx: &IrContext) -> Option<RegionRef> {
        ctx.op(self.0).regions.first().copied()
    }

    pub fn body_block(&self, ctx: &IrContext) -> Option<BlockRef> {
        let body = self.body(ctx)?;
        ctx.region(body).blocks.first().copied()
    }
}

impl UnrealizedConversionCast {
    /// Build a detached bridge; the caller decides where it goes.
    pub fn create(
        ctx: &mut IrContext,
        location: Location,
        inputs: &[ValueRef],
        result_types: &[TypeRef],
    ) -> Self {
        let data = OperationDataBuilder::of_kind(location, Self::kind())
            .operands(inputs.iter().copied())
            .results(result_types.iter().copied())
            .build(ctx);
        Self(ctx.create_op(data))
    }

    pub fn inputs<'a>(&self, ctx: &'a IrContext) -> &'a [ValueRef] {
        ctx.op_operands(self.0)
    }

    pub fn outputs<'a>(&self, ctx: &'a IrContext) -> &'a [ValueRef] {
        ctx.op_results(self.0)
    }
}

/// Whether `op` is a placeholder bridge.
pub fn is_bridge(ctx: &IrContext, op: OpRef) -> bool {
    UnrealizedConversionCast::matches(ctx, op)
}

// ============================================================================
// Builtin types
// ============================================================================

fn scalar(ctx: &mut IrContext, name: &'static str) -> TypeRef {
    ctx.types.intern(TypeDataBuilder::new("core", name).build())
}

pub fn i1_type(ctx: &mut IrContext) -> TypeRef {
    scalar(ctx, "i1")
}

pub fn i32_type(ctx: &mut IrContext) -> TypeRef {
    scalar(ctx, "i32")
}

pub fn i64_type(ctx: &mut IrContext) -> TypeRef {
    scalar(ctx, "i64")
}

pub fn f32_type(ctx: &mut IrContext) -> TypeRef {
    scalar(ctx, "f32")
}

pub fn f64_type(ctx: &mut IrContext) -> TypeRef {
    scalar(ctx, "f64")
}

pub fn index_type(ctx: &mut IrContext) -> TypeRef {
    scalar(ctx, "index")
}

pub fn none_type(ctx: &mut IrContext) -> TypeRef {
    scalar(ctx, "none")
}

pub fn tuple_type(ctx: &mut IrContext, elements: &[TypeRef]) -> TypeRef {
    ctx.types.intern(
        TypeDataBuilder::new("core", "tuple")
            .params(elements.iter().copied())
            .build(),
    )
}

/// Ranked tensor; use `DYNAMIC_DIM` for extents that are not known.
pub fn tensor_type(ctx: &mut IrContext, element: TypeRef, shape: &[i64]) -> TypeRef {
    let dims = shape.iter().map(|&d| Attribute::int(d)).collect();
    ctx.types.intern(
        TypeDataBuilder::new("core", "tensor")
            .param(element)
            .attr(SHAPE(), Attribute::List(dims))
            .build(),
    )
}
