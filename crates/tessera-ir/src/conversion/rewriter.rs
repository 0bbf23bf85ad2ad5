//! The one-to-N rewriter: the only way conversion patterns touch the graph.
//!
//! When a value of type `T` is replaced by `K != 1` values, its consumers
//! cannot read the pieces directly until they are converted themselves. The
//! rewriter packs the pieces back into one `T` with a placeholder bridge
//! (`core.unrealized_conversion_cast`), reroutes the consumers to the bridge
//! result and records `bridge result -> pieces` in the remapping table. When a
//! consumer is converted later, its adaptor reads the pieces through the
//! table and the bridge loses its last use.
//!
//! Remappings and events produced during an attempt stay pending until the
//! driver commits the attempt; a rolled-back attempt leaves no trace. The
//! first structural error a pattern runs into is remembered as a fault: the
//! driver rolls the attempt back and aborts the pass even when the pattern
//! swallowed the error.

use std::collections::HashMap;
use std::ops::Range;

use smallvec::{SmallVec, smallvec};

use super::ConversionError;
use super::adaptor::OpAdaptor;
use super::type_converter::TypeConverter;
use crate::context::IrContext;
use crate::dialect::core::{self, UnrealizedConversionCast};
use crate::error::IrError;
use crate::ops::DialectOp;
use crate::refs::{BlockRef, OpRef, RegionRef, TypeRef, ValueRef};
use crate::rewrite::RewriteEvent;

pub type ValueVec = SmallVec<[ValueRef; 4]>;

/// Bridge result -> the values it stands for.
#[derive(Debug, Default)]
pub struct Remapping {
    map: HashMap<ValueRef, ValueVec>,
}

impl Remapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, value: ValueRef) -> Option<&[ValueRef]> {
        self.map.get(&value).map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub(crate) fn insert(&mut self, from: ValueRef, to: ValueVec) {
        self.map.insert(from, to);
    }
}

fn types_match(ctx: &IrContext, values: &[ValueRef], targets: &[TypeRef]) -> bool {
    values.iter().map(|&v| ctx.value_ty(v)).eq(targets.iter().copied())
}

pub struct OneToNRewriter<'a> {
    converter: &'a TypeConverter,
    remapping: &'a Remapping,
    root: OpRef,
    pending: Vec<(ValueRef, ValueVec)>,
    events: Vec<RewriteEvent>,
    fault: Option<IrError>,
}

impl<'a> OneToNRewriter<'a> {
    pub(crate) fn new(converter: &'a TypeConverter, remapping: &'a Remapping, root: OpRef) -> Self {
        Self {
            converter,
            remapping,
            root,
            pending: Vec::new(),
            events: Vec::new(),
            fault: None,
        }
    }

    pub fn converter(&self) -> &'a TypeConverter {
        self.converter
    }

    /// Current replacement values for `value`, if it is a known bridge result.
    pub fn lookup(&self, value: ValueRef) -> Option<&[ValueRef]> {
        self.pending
            .iter()
            .rev()
            .find(|(from, _)| *from == value)
            .map(|(_, to)| to.as_slice())
            .or_else(|| self.remapping.lookup(value))
    }

    /// Build the operand view of `op`, synthesizing unpack bridges for
    /// operands whose pieces are not known yet.
    pub(crate) fn adapt(&mut self, ctx: &mut IrContext, op: OpRef) -> Result<OpAdaptor, ConversionError> {
        let operands: SmallVec<[ValueRef; 8]> = ctx.op_operands(op).into();
        let types: SmallVec<[TypeRef; 8]> = operands.iter().map(|&v| ctx.value_ty(v)).collect();
        let mapping = self.converter.compute_type_mapping(ctx, &types)?;

        let mut groups: SmallVec<[ValueVec; 4]> = SmallVec::new();
        for (i, &value) in operands.iter().enumerate() {
            let targets: SmallVec<[TypeRef; 4]> = mapping.converted_types(i).into();
            groups.push(self.remapped(ctx, value, &targets)?);
        }

        let mut adaptor = OpAdaptor::new(op, mapping);
        for group in &groups {
            adaptor.push(group);
        }
        Ok(adaptor)
    }

    fn remapped(
        &mut self,
        ctx: &mut IrContext,
        value: ValueRef,
        targets: &[TypeRef],
    ) -> Result<ValueVec, ConversionError> {
        if let &[target] = targets
            && ctx.value_ty(value) == target
        {
            return Ok(smallvec![value]);
        }
        if let Some(values) = self.lookup(value)
            && types_match(ctx, values, targets)
        {
            return Ok(values.into());
        }
        if let Some(producer) = ctx.value_def(value).op()
            && core::is_bridge(ctx, producer)
            && ctx.op_results(producer).len() == 1
            && types_match(ctx, ctx.op_operands(producer), targets)
        {
            return Ok(ctx.op_operands(producer).into());
        }
        if targets.is_empty() {
            return Ok(ValueVec::new());
        }

        let location = ctx.op(self.root).location;
        let unpack = UnrealizedConversionCast::create(ctx, location, &[value], targets);
        self.insert(ctx, unpack.op_ref())?;
        Ok(unpack.outputs(ctx).into())
    }

    /// Insert a detached op right before the matched op.
    pub fn insert(&mut self, ctx: &mut IrContext, op: OpRef) -> Result<(), IrError> {
        let result = self.insert_before(ctx, self.root, op);
        self.track(result)
    }

    fn track<T, E: Clone + Into<ConversionError>>(&mut self, result: Result<T, E>) -> Result<T, E> {
        if let Err(err) = &result
            && let ConversionError::Ir(ir) = err.clone().into()
        {
            self.fault.get_or_insert(ir);
        }
        result
    }

    fn insert_before(&mut self, ctx: &mut IrContext, anchor: OpRef, op: OpRef) -> Result<(), IrError> {
        let block = ctx
            .op(anchor)
            .parent_block
            .ok_or(IrError::Detached { op: anchor })?;
        ctx.insert_op_before(block, anchor, op)?;
        self.events.push(RewriteEvent::Inserted(op));
        Ok(())
    }

    /// Replace every result of `op` and erase it.
    ///
    /// `values` holds either one value per result, or the concatenation of
    /// each result's pieces as the converter splits the result types. The
    /// converter split wins when both readings fit.
    ///
    /// A result replaced by one value of its own type is rerouted directly.
    /// Any other result that still has readers gets a pack bridge, so those
    /// readers keep seeing the original type until they are converted. A
    /// result replaced by no values and left without readers is dropped
    /// silently; if it still has readers, the bridge has no inputs and is
    /// reported by the driver unless a reader's conversion removes it.
    pub fn replace_op(
        &mut self,
        ctx: &mut IrContext,
        op: OpRef,
        values: &[ValueRef],
    ) -> Result<(), ConversionError> {
        let result = self.replace_op_impl(ctx, op, values);
        self.track(result)
    }

    fn replace_op_impl(
        &mut self,
        ctx: &mut IrContext,
        op: OpRef,
        values: &[ValueRef],
    ) -> Result<(), ConversionError> {
        let results: ValueVec = ctx.op_results(op).into();
        let types: SmallVec<[TypeRef; 4]> = results.iter().map(|&r| ctx.value_ty(r)).collect();

        let groups: SmallVec<[Range<usize>; 4]> = match self.converter.compute_type_mapping(ctx, &types) {
            Ok(mapping) if mapping.all_converted_types().len() == values.len() => {
                (0..results.len()).map(|i| mapping.converted_range(i)).collect()
            }
            _ if values.len() == results.len() => (0..results.len()).map(|i| i..i + 1).collect(),
            Err(err) => return Err(err.into()),
            Ok(_) => {
                return Err(IrError::ArityMismatch {
                    op,
                    kind: ctx.op_kind(op),
                    expected: results.len(),
                    actual: values.len(),
                }
                .into());
            }
        };

        let location = ctx.op(op).location;
        for ((&result, &ty), range) in results.iter().zip(&types).zip(groups) {
            let group = &values[range];
            if let &[single] = group
                && ctx.value_ty(single) == ty
            {
                ctx.replace_all_uses(result, single);
            } else if ctx.has_uses(result) {
                let pack = UnrealizedConversionCast::create(ctx, location, group, &[ty]);
                self.insert_before(ctx, op, pack.op_ref())?;
                let packed = pack.outputs(ctx)[0];
                ctx.replace_all_uses(result, packed);
                self.pending.push((packed, group.into()));
            }
        }

        self.events.push(RewriteEvent::Replaced {
            op,
            with: values.into(),
        });
        ctx.detach_op(op);
        ctx.erase_op(op)?;
        self.events.push(RewriteEvent::Erased(op));
        Ok(())
    }

    /// Insert `new_op` before the matched op and replace `op` with its results.
    pub fn replace_op_with(
        &mut self,
        ctx: &mut IrContext,
        op: OpRef,
        new_op: OpRef,
    ) -> Result<(), ConversionError> {
        self.insert(ctx, new_op)?;
        let values: ValueVec = ctx.op_results(new_op).into();
        self.replace_op(ctx, op, &values)
    }

    /// Erase an op whose results have no readers left.
    pub fn erase_op(&mut self, ctx: &mut IrContext, op: OpRef) -> Result<(), IrError> {
        for &value in ctx.op_results(op) {
            let count = ctx.uses(value).len();
            if count > 0 {
                return self.track(Err(IrError::LiveUses { op, value, count }));
            }
        }
        ctx.detach_op(op);
        ctx.erase_op(op)?;
        self.events.push(RewriteEvent::Erased(op));
        Ok(())
    }

    /// Move every block of `region` into `dest`, before `before` or at the
    /// end, keeping their order. `region` is left empty. The ops owning both
    /// regions are reported as modified.
    pub fn inline_region_before(
        &mut self,
        ctx: &mut IrContext,
        region: RegionRef,
        dest: RegionRef,
        before: Option<BlockRef>,
    ) -> Result<(), IrError> {
        let result = self.inline_region_before_impl(ctx, region, dest, before);
        self.track(result)
    }

    fn inline_region_before_impl(
        &mut self,
        ctx: &mut IrContext,
        region: RegionRef,
        dest: RegionRef,
        before: Option<BlockRef>,
    ) -> Result<(), IrError> {
        if region == dest {
            return Err(IrError::RegionIntoItself { region });
        }
        let blocks: SmallVec<[BlockRef; 4]> = ctx.region(region).blocks.clone();
        for block in blocks {
            ctx.move_block(block, dest, before)?;
        }
        for owner in [ctx.region(region).parent_op, ctx.region(dest).parent_op]
            .into_iter()
            .flatten()
        {
            self.notify_modified(owner);
        }
        Ok(())
    }

    /// Narrow or change a result's declared type in place.
    pub fn modify_result_type(&mut self, ctx: &mut IrContext, op: OpRef, index: u32, ty: TypeRef) {
        let value = ctx.op_result(op, index);
        ctx.set_value_type(value, ty);
        self.notify_modified(op);
    }

    /// `op` was edited in place (attributes, signature).
    pub fn notify_modified(&mut self, op: OpRef) {
        self.events.push(RewriteEvent::Modified(op));
    }

    /// Convert the entry block signature of `region`.
    ///
    /// Arguments whose type is already legal stay. Others are replaced by
    /// their pieces, even when there is just one; readers of the old argument
    /// go through a pack bridge placed at the top of the block. The owning op's signature
    /// change is the caller's to report.
    pub fn convert_region_types(
        &mut self,
        ctx: &mut IrContext,
        region: RegionRef,
    ) -> Result<(), ConversionError> {
        let result = self.convert_region_types_impl(ctx, region);
        self.track(result)
    }

    fn convert_region_types_impl(
        &mut self,
        ctx: &mut IrContext,
        region: RegionRef,
    ) -> Result<(), ConversionError> {
        let Some(&entry) = ctx.region(region).blocks.first() else {
            return Ok(());
        };
        let types: SmallVec<[TypeRef; 4]> = ctx.block(entry).args.iter().map(|a| a.ty).collect();
        let mapping = self.converter.compute_type_mapping(ctx, &types)?;
        if mapping.is_identity() {
            return Ok(());
        }

        let anchor = ctx.block(entry).ops.first().copied();
        let location = ctx.block(entry).location;
        let mut index = 0u32;
        for (i, &original) in types.iter().enumerate() {
            let old = ctx.block_arg(entry, index);
            let targets = mapping.converted_types(i);
            if targets == [original] {
                index += 1;
                continue;
            }

            let pieces: ValueVec = targets
                .iter()
                .enumerate()
                .map(|(j, &t)| ctx.insert_block_arg(entry, index + j as u32, t))
                .collect();
            let width = pieces.len() as u32;
            if ctx.has_uses(old) {
                let pack = UnrealizedConversionCast::create(ctx, location, &pieces, &[original]);
                match anchor {
                    Some(anchor) => ctx.insert_op_before(entry, anchor, pack.op_ref())?,
                    None => ctx.push_op(entry, pack.op_ref())?,
                }
                self.events.push(RewriteEvent::Inserted(pack.op_ref()));
                let packed = pack.outputs(ctx)[0];
                ctx.replace_all_uses(old, packed);
                self.pending.push((packed, pieces));
            }
            ctx.erase_block_arg(entry, index + width)?;
            index += width;
        }
        Ok(())
    }

    /// Structural error hit during the attempt, if any.
    pub(crate) fn take_fault(&mut self) -> Option<IrError> {
        self.fault.take()
    }

    pub(crate) fn finish(self) -> (Vec<RewriteEvent>, Vec<(ValueRef, ValueVec)>) {
        (self.events, self.pending)
    }
}
