//! `func` dialect: functions whose signature is their entry block.

use smallvec::smallvec;

use crate::context::{BlockArgData, BlockData, IrContext, OperationDataBuilder, RegionData};
use crate::dialect_op;
use crate::location::Location;
use crate::ops::DialectOp;
use crate::refs::{BlockRef, RegionRef, TypeRef, ValueRef};
use crate::types::Attribute;
use crate::Symbol;

crate::symbols! {
    SYM_NAME => "sym_name",
    RESULTS => "results",
}

dialect_op! {
    pub struct Func = "func"."func";
    pub struct Return = "func"."return";
}

impl Func {
    /// Build a detached function with an empty entry block taking `params`.
    pub fn create(
        ctx: &mut IrContext,
        location: Location,
        name: Symbol,
        params: &[TypeRef],
        results: &[TypeRef],
    ) -> Self {
        let entry = ctx.create_block(BlockData {
            location,
            args: params.iter().map(|&ty| BlockArgData::new(ty)).collect(),
            ops: smallvec![],
            parent_region: None,
        });
        let body = ctx.create_region(RegionData {
            location,
            blocks: smallvec![entry],
            parent_op: None,
        });
        let results = results.iter().map(|&ty| Attribute::Type(ty)).collect();
        let data = OperationDataBuilder::of_kind(location, Self::kind())
            .attr(SYM_NAME(), Attribute::Symbol(name))
            .attr(RESULTS(), Attribute::List(results))
            .region(body)
            .build(ctx);
        Self(ctx.create_op(data))
    }

    pub fn name(&self, ctx: &IrContext) -> Option<Symbol> {
        ctx.attr(self.0, SYM_NAME())?.as_symbol()
    }

    pub fn body(&self, ctx: &IrContext) -> Option<RegionRef> {
        ctx.op(self.0).regions.first().copied()
    }

    pub fn entry_block(&self, ctx: &IrContext) -> Option<BlockRef> {
        let body = self.body(ctx)?;
        ctx.region(body).blocks.first().copied()
    }

    pub fn params(&self, ctx: &IrContext) -> Vec<TypeRef> {
        match self.entry_block(ctx) {
            Some(entry) => ctx.block(entry).args.iter().map(|a| a.ty).collect(),
            None => Vec::new(),
        }
    }

    pub fn result_types(&self, ctx: &IrContext) -> Vec<TypeRef> {
        ctx.attr(self.0, RESULTS())
            .and_then(Attribute::as_list)
            .map(|items| items.iter().filter_map(Attribute::as_type).collect())
            .unwrap_or_default()
    }

    pub fn set_result_types(&self, ctx: &mut IrContext, results: &[TypeRef]) {
        let results = results.iter().map(|&ty| Attribute::Type(ty)).collect();
        ctx.set_attr(self.0, RESULTS(), Attribute::List(results));
    }
}

impl Return {
    pub fn create(ctx: &mut IrContext, location: Location, values: &[ValueRef]) -> Self {
        let data = OperationDataBuilder::of_kind(location, Self::kind())
            .operands(values.iter().copied())
            .build(ctx);
        Self(ctx.create_op(data))
    }

    pub fn values<'a>(&self, ctx: &'a IrContext) -> &'a [ValueRef] {
        ctx.op_operands(self.0)
    }
}
