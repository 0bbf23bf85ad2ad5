//! IrContext: arena-based mutable IR storage with an undo journal.
//!
//! All IR entities live in `PrimaryMap`s owned by `IrContext`. Operand and
//! result lists use `EntityList + ListPool` for compact storage.
//!
//! Every structural mutation goes through a method on `IrContext`. While a
//! transaction is open each mutation also pushes an inverse onto the journal,
//! so `rollback` can restore the graph exactly, including use-list order.

use std::collections::{BTreeMap, HashSet};

use cranelift_entity::{EntityList, ListPool, PrimaryMap, SecondaryMap};
use smallvec::SmallVec;

use crate::Symbol;
use crate::error::IrError;
use crate::location::Location;
use crate::refs::*;
use crate::types::*;

// ============================================================================
// Entity data types
// ============================================================================

pub struct OperationData {
    pub location: Location,
    pub dialect: Symbol,
    pub name: Symbol,
    pub operands: EntityList<ValueRef>,
    pub results: EntityList<TypeRef>,
    pub attributes: BTreeMap<Symbol, Attribute>,
    pub regions: SmallVec<[RegionRef; 4]>,
    pub successors: SmallVec<[BlockRef; 4]>,
    pub parent_block: Option<BlockRef>,
}

pub struct ValueData {
    pub def: ValueDef,
    pub ty: TypeRef,
}

#[derive(Clone, Debug)]
pub struct BlockArgData {
    pub ty: TypeRef,
    pub attrs: BTreeMap<Symbol, Attribute>,
}

impl BlockArgData {
    pub fn new(ty: TypeRef) -> Self {
        Self {
            ty,
            attrs: BTreeMap::new(),
        }
    }
}

pub struct BlockData {
    pub location: Location,
    pub args: Vec<BlockArgData>,
    pub ops: SmallVec<[OpRef; 4]>,
    pub parent_region: Option<RegionRef>,
}

pub struct RegionData {
    pub location: Location,
    pub blocks: SmallVec<[BlockRef; 4]>,
    pub parent_op: Option<OpRef>,
}

// ============================================================================
// Journal
// ============================================================================

/// Token returned by `begin_transaction`; hand it back to `commit` or `rollback`.
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    depth: usize,
    mark: usize,
}

enum Undo {
    Created(OpRef),
    Attached(OpRef),
    Detached {
        op: OpRef,
        block: BlockRef,
        index: usize,
    },
    Erased {
        op: OpRef,
        use_positions: SmallVec<[u32; 4]>,
    },
    Operand {
        op: OpRef,
        index: u32,
        old: ValueRef,
        old_position: u32,
    },
    ValueType {
        value: ValueRef,
        old: TypeRef,
    },
    Attr {
        op: OpRef,
        key: Symbol,
        old: Option<Attribute>,
    },
    BlockArgInserted {
        block: BlockRef,
        index: u32,
    },
    BlockArgErased {
        block: BlockRef,
        index: u32,
        value: ValueRef,
        data: BlockArgData,
    },
    BlockMoved {
        block: BlockRef,
        from: Option<(RegionRef, usize)>,
    },
}

#[derive(Default)]
struct Journal {
    depth: usize,
    entries: Vec<Undo>,
}

// ============================================================================
// IrContext
// ============================================================================

pub struct IrContext {
    ops: PrimaryMap<OpRef, OperationData>,
    values: PrimaryMap<ValueRef, ValueData>,
    blocks: PrimaryMap<BlockRef, BlockData>,
    regions: PrimaryMap<RegionRef, RegionData>,

    /// For each value, every operand slot that reads it, in insertion order.
    uses: SecondaryMap<ValueRef, SmallVec<[Use; 2]>>,
    erased: SecondaryMap<OpRef, bool>,

    pub types: TypeInterner,
    pub paths: PathInterner,

    value_pool: ListPool<ValueRef>,
    type_pool: ListPool<TypeRef>,

    result_values: SecondaryMap<OpRef, EntityList<ValueRef>>,
    block_arg_values: SecondaryMap<BlockRef, EntityList<ValueRef>>,

    journal: Journal,
}

impl IrContext {
    pub fn new() -> Self {
        Self {
            ops: PrimaryMap::new(),
            values: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            regions: PrimaryMap::new(),
            uses: SecondaryMap::new(),
            erased: SecondaryMap::new(),
            types: TypeInterner::new(),
            paths: PathInterner::new(),
            value_pool: ListPool::new(),
            type_pool: ListPool::new(),
            result_values: SecondaryMap::new(),
            block_arg_values: SecondaryMap::new(),
            journal: Journal::default(),
        }
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Open a (possibly nested) transaction.
    pub fn begin_transaction(&mut self) -> Checkpoint {
        self.journal.depth += 1;
        Checkpoint {
            depth: self.journal.depth,
            mark: self.journal.entries.len(),
        }
    }

    /// Keep every mutation since `cp`.
    ///
    /// Committing a nested transaction folds its entries into the enclosing
    /// one, which can still roll them back.
    pub fn commit(&mut self, cp: Checkpoint) {
        debug_assert_eq!(self.journal.depth, cp.depth, "unbalanced commit");
        self.journal.depth -= 1;
        if self.journal.depth == 0 {
            self.journal.entries.clear();
        }
    }

    /// Undo every mutation since `cp`, newest first.
    pub fn rollback(&mut self, cp: Checkpoint) {
        debug_assert_eq!(self.journal.depth, cp.depth, "unbalanced rollback");
        while self.journal.entries.len() > cp.mark {
            if let Some(entry) = self.journal.entries.pop() {
                self.undo(entry);
            }
        }
        self.journal.depth -= 1;
    }

    pub fn in_transaction(&self) -> bool {
        self.journal.depth > 0
    }

    fn record(&mut self, entry: Undo) {
        if self.journal.depth > 0 {
            self.journal.entries.push(entry);
        }
    }

    fn undo(&mut self, entry: Undo) {
        match entry {
            Undo::Created(op) => {
                self.unregister_operand_uses(op);
                let regions = self.ops[op].regions.clone();
                for r in regions {
                    self.regions[r].parent_op = None;
                }
                self.erased[op] = true;
            }
            Undo::Attached(op) => {
                if let Some(block) = self.ops[op].parent_block.take() {
                    self.blocks[block].ops.retain(|o| *o != op);
                }
            }
            Undo::Detached { op, block, index } => {
                self.blocks[block].ops.insert(index, op);
                self.ops[op].parent_block = Some(block);
            }
            Undo::Erased { op, use_positions } => {
                self.erased[op] = false;
                let operands: SmallVec<[ValueRef; 8]> = self.op_operands(op).into();
                for (idx, &val) in operands.iter().enumerate().rev() {
                    let u = Use {
                        user: op,
                        operand_index: idx as u32,
                    };
                    let list = &mut self.uses[val];
                    let pos = (use_positions[idx] as usize).min(list.len());
                    list.insert(pos, u);
                }
            }
            Undo::Operand {
                op,
                index,
                old,
                old_position,
            } => {
                let current = self.op_operands(op)[index as usize];
                let u = Use {
                    user: op,
                    operand_index: index,
                };
                self.uses[current].retain(|x| *x != u);
                self.ops[op].operands.as_mut_slice(&mut self.value_pool)[index as usize] = old;
                let list = &mut self.uses[old];
                let pos = (old_position as usize).min(list.len());
                list.insert(pos, u);
            }
            Undo::ValueType { value, old } => self.write_value_type(value, old),
            Undo::Attr { op, key, old } => {
                let attrs = &mut self.ops[op].attributes;
                match old {
                    Some(v) => {
                        attrs.insert(key, v);
                    }
                    None => {
                        attrs.remove(&key);
                    }
                }
            }
            Undo::BlockArgInserted { block, index } => {
                self.block_arg_values[block].remove(index as usize, &mut self.value_pool);
                self.blocks[block].args.remove(index as usize);
                self.reindex_block_args(block);
            }
            Undo::BlockArgErased {
                block,
                index,
                value,
                data,
            } => {
                self.block_arg_values[block].insert(index as usize, value, &mut self.value_pool);
                self.blocks[block].args.insert(index as usize, data);
                self.reindex_block_args(block);
            }
            Undo::BlockMoved { block, from } => {
                if let Some(current) = self.blocks[block].parent_region.take() {
                    self.regions[current].blocks.retain(|b| *b != block);
                }
                if let Some((region, index)) = from {
                    self.regions[region].blocks.insert(index, block);
                    self.blocks[block].parent_region = Some(region);
                }
            }
        }
    }

    // ========================================================================
    // Operation
    // ========================================================================

    /// Create a new, detached operation and allocate its result values.
    ///
    /// # Panics
    ///
    /// Panics if `data.parent_block` is `Some`, or if any region in
    /// `data.regions` already belongs to another operation.
    pub fn create_op(&mut self, data: OperationData) -> OpRef {
        assert!(
            data.parent_block.is_none(),
            "create_op: operation must not have parent_block set; \
             use push_op to attach to a block after creation",
        );

        let operands: SmallVec<[ValueRef; 8]> = data.operands.as_slice(&self.value_pool).into();
        let result_types: SmallVec<[TypeRef; 4]> = data.results.as_slice(&self.type_pool).into();
        let regions = data.regions.clone();

        let op = self.ops.push(data);

        for &r in &regions {
            if let Some(existing) = self.regions[r].parent_op {
                panic!(
                    "create_op: region {r} already belongs to operation {existing}; \
                     cannot reassign to {op}",
                );
            }
            self.regions[r].parent_op = Some(op);
        }

        for (idx, &val) in operands.iter().enumerate() {
            self.uses[val].push(Use {
                user: op,
                operand_index: idx as u32,
            });
        }

        let mut result_list = EntityList::new();
        for (idx, &ty) in result_types.iter().enumerate() {
            let v = self.values.push(ValueData {
                def: ValueDef::OpResult(op, idx as u32),
                ty,
            });
            result_list.push(v, &mut self.value_pool);
        }
        self.result_values[op] = result_list;

        self.record(Undo::Created(op));
        op
    }

    pub fn op(&self, op: OpRef) -> &OperationData {
        &self.ops[op]
    }

    pub fn op_kind(&self, op: OpRef) -> OpKind {
        let data = &self.ops[op];
        OpKind {
            dialect: data.dialect,
            name: data.name,
        }
    }

    pub fn attr(&self, op: OpRef, key: Symbol) -> Option<&Attribute> {
        self.ops[op].attributes.get(&key)
    }

    pub fn op_operands(&self, op: OpRef) -> &[ValueRef] {
        self.ops[op].operands.as_slice(&self.value_pool)
    }

    pub fn op_result_types(&self, op: OpRef) -> &[TypeRef] {
        self.ops[op].results.as_slice(&self.type_pool)
    }

    pub fn op_result(&self, op: OpRef, index: u32) -> ValueRef {
        self.result_values[op].as_slice(&self.value_pool)[index as usize]
    }

    pub fn op_results(&self, op: OpRef) -> &[ValueRef] {
        self.result_values[op].as_slice(&self.value_pool)
    }

    /// False once the op has been erased (or its creation rolled back).
    pub fn is_live(&self, op: OpRef) -> bool {
        !self.erased[op]
    }

    /// The operation owning the region that contains `op`.
    pub fn parent_op(&self, op: OpRef) -> Option<OpRef> {
        let block = self.ops[op].parent_block?;
        let region = self.blocks[block].parent_region?;
        self.regions[region].parent_op
    }

    /// Unlink `op` from its block. The op stays live and can be re-inserted.
    pub fn detach_op(&mut self, op: OpRef) {
        let Some(block) = self.ops[op].parent_block else {
            return;
        };
        let ops = &mut self.blocks[block].ops;
        if let Some(index) = ops.iter().position(|&o| o == op) {
            ops.remove(index);
            self.ops[op].parent_block = None;
            self.record(Undo::Detached { op, block, index });
        }
    }

    /// Destroy a detached operation together with everything nested in it.
    ///
    /// Fails without mutating anything if a result of the op (or of a nested
    /// op) is still read from outside the erased subtree.
    pub fn erase_op(&mut self, op: OpRef) -> Result<(), IrError> {
        if self.erased[op] {
            return Err(IrError::Erased { op });
        }
        if let Some(block) = self.ops[op].parent_block {
            return Err(IrError::Attached { op, block });
        }

        let mut subtree = vec![op];
        self.collect_nested_ops(op, &mut subtree);
        let members: HashSet<OpRef> = subtree.iter().copied().collect();
        for &member in &subtree {
            for &value in self.op_results(member) {
                let outside = self.uses[value]
                    .iter()
                    .filter(|u| !members.contains(&u.user))
                    .count();
                if outside > 0 {
                    return Err(IrError::LiveUses {
                        op: member,
                        value,
                        count: outside,
                    });
                }
            }
        }

        // Consumers precede producers in reverse pre-order.
        for &member in subtree.iter().rev() {
            let use_positions = self.unregister_operand_uses(member);
            self.erased[member] = true;
            self.record(Undo::Erased {
                op: member,
                use_positions,
            });
        }
        Ok(())
    }

    fn collect_nested_ops(&self, op: OpRef, out: &mut Vec<OpRef>) {
        for &region in &self.ops[op].regions {
            for &block in &self.regions[region].blocks {
                for &nested in &self.blocks[block].ops {
                    if !self.erased[nested] {
                        out.push(nested);
                        self.collect_nested_ops(nested, out);
                    }
                }
            }
        }
    }

    /// Remove every use-list entry owned by `op`, returning where each was.
    fn unregister_operand_uses(&mut self, op: OpRef) -> SmallVec<[u32; 4]> {
        let operands: SmallVec<[ValueRef; 8]> = self.op_operands(op).into();
        let mut positions = SmallVec::new();
        for (idx, &val) in operands.iter().enumerate() {
            let u = Use {
                user: op,
                operand_index: idx as u32,
            };
            let list = &mut self.uses[val];
            let pos = list.iter().position(|x| *x == u).unwrap_or(list.len());
            if pos < list.len() {
                list.remove(pos);
            }
            positions.push(pos as u32);
        }
        positions
    }

    pub fn set_attr(&mut self, op: OpRef, key: impl Into<Symbol>, value: Attribute) {
        let key = key.into();
        let old = self.ops[op].attributes.insert(key, value);
        self.record(Undo::Attr { op, key, old });
    }

    pub fn remove_attr(&mut self, op: OpRef, key: impl Into<Symbol>) -> Option<Attribute> {
        let key = key.into();
        let old = self.ops[op].attributes.remove(&key);
        if old.is_some() {
            self.record(Undo::Attr {
                op,
                key,
                old: old.clone(),
            });
        }
        old
    }

    // ========================================================================
    // Value
    // ========================================================================

    pub fn value(&self, v: ValueRef) -> &ValueData {
        &self.values[v]
    }

    pub fn value_ty(&self, v: ValueRef) -> TypeRef {
        self.values[v].ty
    }

    pub fn value_def(&self, v: ValueRef) -> ValueDef {
        self.values[v].def
    }

    /// Retype a value in place, keeping the producer's signature in sync.
    pub fn set_value_type(&mut self, value: ValueRef, ty: TypeRef) {
        let old = self.values[value].ty;
        if old == ty {
            return;
        }
        self.write_value_type(value, ty);
        self.record(Undo::ValueType { value, old });
    }

    fn write_value_type(&mut self, value: ValueRef, ty: TypeRef) {
        self.values[value].ty = ty;
        match self.values[value].def {
            ValueDef::OpResult(op, idx) => {
                self.ops[op].results.as_mut_slice(&mut self.type_pool)[idx as usize] = ty;
            }
            ValueDef::BlockArg(block, idx) => {
                self.blocks[block].args[idx as usize].ty = ty;
            }
        }
    }

    // ========================================================================
    // Block
    // ========================================================================

    pub fn create_block(&mut self, data: BlockData) -> BlockRef {
        let arg_types: Vec<TypeRef> = data.args.iter().map(|a| a.ty).collect();
        let block = self.blocks.push(data);

        let mut arg_list = EntityList::new();
        for (idx, ty) in arg_types.into_iter().enumerate() {
            let v = self.values.push(ValueData {
                def: ValueDef::BlockArg(block, idx as u32),
                ty,
            });
            arg_list.push(v, &mut self.value_pool);
        }
        self.block_arg_values[block] = arg_list;

        block
    }

    pub fn block(&self, b: BlockRef) -> &BlockData {
        &self.blocks[b]
    }

    pub fn block_arg(&self, b: BlockRef, index: u32) -> ValueRef {
        self.block_arg_values[b].as_slice(&self.value_pool)[index as usize]
    }

    pub fn block_args(&self, b: BlockRef) -> &[ValueRef] {
        self.block_arg_values[b].as_slice(&self.value_pool)
    }

    /// Insert a fresh argument at `index`, shifting later arguments right.
    pub fn insert_block_arg(&mut self, block: BlockRef, index: u32, ty: TypeRef) -> ValueRef {
        let value = self.values.push(ValueData {
            def: ValueDef::BlockArg(block, index),
            ty,
        });
        self.block_arg_values[block].insert(index as usize, value, &mut self.value_pool);
        self.blocks[block]
            .args
            .insert(index as usize, BlockArgData::new(ty));
        self.reindex_block_args(block);
        self.record(Undo::BlockArgInserted { block, index });
        value
    }

    /// Remove an unused argument, shifting later arguments left.
    pub fn erase_block_arg(&mut self, block: BlockRef, index: u32) -> Result<(), IrError> {
        let value = self.block_arg(block, index);
        let count = self.uses[value].len();
        if count > 0 {
            return Err(IrError::BlockArgInUse { value, count });
        }
        self.block_arg_values[block].remove(index as usize, &mut self.value_pool);
        let data = self.blocks[block].args.remove(index as usize);
        self.reindex_block_args(block);
        self.record(Undo::BlockArgErased {
            block,
            index,
            value,
            data,
        });
        Ok(())
    }

    fn reindex_block_args(&mut self, block: BlockRef) {
        let args = self.block_arg_values[block].as_slice(&self.value_pool);
        for (idx, &v) in args.iter().enumerate() {
            self.values[v].def = ValueDef::BlockArg(block, idx as u32);
        }
    }

    /// Append a detached, live operation to the end of `block`.
    pub fn push_op(&mut self, block: BlockRef, op: OpRef) -> Result<(), IrError> {
        self.check_insertable(op)?;
        self.ops[op].parent_block = Some(block);
        self.blocks[block].ops.push(op);
        self.record(Undo::Attached(op));
        Ok(())
    }

    /// Insert a detached, live operation immediately before `anchor`.
    pub fn insert_op_before(
        &mut self,
        block: BlockRef,
        anchor: OpRef,
        op: OpRef,
    ) -> Result<(), IrError> {
        self.check_insertable(op)?;
        let ops = &mut self.blocks[block].ops;
        let pos = ops
            .iter()
            .position(|&o| o == anchor)
            .ok_or(IrError::AnchorNotFound { anchor, block })?;
        ops.insert(pos, op);
        self.ops[op].parent_block = Some(block);
        self.record(Undo::Attached(op));
        Ok(())
    }

    fn check_insertable(&self, op: OpRef) -> Result<(), IrError> {
        if self.erased[op] {
            return Err(IrError::Erased { op });
        }
        if let Some(block) = self.ops[op].parent_block {
            return Err(IrError::AlreadyAttached { op, block });
        }
        Ok(())
    }

    // ========================================================================
    // Region
    // ========================================================================

    /// # Panics
    ///
    /// Panics if any block in `data.blocks` already belongs to another region.
    pub fn create_region(&mut self, data: RegionData) -> RegionRef {
        let region = self.regions.push(data);

        let blocks: SmallVec<[BlockRef; 4]> = self.regions[region].blocks.clone();
        for &b in &blocks {
            if let Some(existing) = self.blocks[b].parent_region {
                panic!(
                    "create_region: block {b} already belongs to region {existing}; \
                     cannot reassign to {region}",
                );
            }
            self.blocks[b].parent_region = Some(region);
        }

        region
    }

    pub fn region(&self, r: RegionRef) -> &RegionData {
        &self.regions[r]
    }

    /// Move `block` into `dest`, before `before` or at the end, taking it
    /// out of whatever region held it.
    pub fn move_block(
        &mut self,
        block: BlockRef,
        dest: RegionRef,
        before: Option<BlockRef>,
    ) -> Result<(), IrError> {
        if before == Some(block) {
            return Ok(());
        }
        if let Some(anchor) = before
            && !self.regions[dest].blocks.contains(&anchor)
        {
            return Err(IrError::BlockNotFound {
                block: anchor,
                region: dest,
            });
        }

        let from = self.blocks[block].parent_region.and_then(|region| {
            let index = self.regions[region].blocks.iter().position(|&b| b == block)?;
            Some((region, index))
        });
        if let Some((region, index)) = from {
            self.regions[region].blocks.remove(index);
        }
        let blocks = &mut self.regions[dest].blocks;
        let pos = before
            .and_then(|anchor| blocks.iter().position(|&b| b == anchor))
            .unwrap_or(blocks.len());
        blocks.insert(pos, block);
        self.blocks[block].parent_region = Some(dest);
        self.record(Undo::BlockMoved { block, from });
        Ok(())
    }

    // ========================================================================
    // Use-chain
    // ========================================================================

    pub fn uses(&self, v: ValueRef) -> &[Use] {
        &self.uses[v]
    }

    pub fn has_uses(&self, v: ValueRef) -> bool {
        !self.uses[v].is_empty()
    }

    /// Point operand `index` of `op` at `new`.
    pub fn set_operand(&mut self, op: OpRef, index: u32, new: ValueRef) -> Result<(), IrError> {
        let Some(&old) = self.op_operands(op).get(index as usize) else {
            return Err(IrError::OperandOutOfRange { op, index });
        };
        if old == new {
            return Ok(());
        }
        let u = Use {
            user: op,
            operand_index: index,
        };
        let list = &mut self.uses[old];
        let old_position = list.iter().position(|x| *x == u).unwrap_or(list.len());
        if old_position < list.len() {
            list.remove(old_position);
        }
        self.ops[op].operands.as_mut_slice(&mut self.value_pool)[index as usize] = new;
        self.uses[new].push(u);
        self.record(Undo::Operand {
            op,
            index,
            old,
            old_position: old_position as u32,
        });
        Ok(())
    }

    /// Redirect every reader of `old` to `new`.
    pub fn replace_all_uses(&mut self, old: ValueRef, new: ValueRef) {
        if old == new {
            return;
        }
        let readers: SmallVec<[Use; 4]> = self.uses[old].iter().copied().collect();
        for u in readers {
            // The slot exists: it came from the use list.
            let _ = self.set_operand(u.user, u.operand_index, new);
        }
    }
}

impl Default for IrContext {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Helper constructors for OperationData
// ============================================================================

/// Collects operands and result types into `Vec`s, then packs them into the
/// context's pools on `build()`.
pub struct OperationDataBuilder {
    location: Location,
    dialect: Symbol,
    name: Symbol,
    operands: Vec<ValueRef>,
    results: Vec<TypeRef>,
    attributes: BTreeMap<Symbol, Attribute>,
    regions: SmallVec<[RegionRef; 4]>,
    successors: SmallVec<[BlockRef; 4]>,
}

impl OperationDataBuilder {
    pub fn new(location: Location, dialect: Symbol, name: Symbol) -> Self {
        Self {
            location,
            dialect,
            name,
            operands: Vec::new(),
            results: Vec::new(),
            attributes: BTreeMap::new(),
            regions: SmallVec::new(),
            successors: SmallVec::new(),
        }
    }

    pub fn of_kind(location: Location, kind: OpKind) -> Self {
        Self::new(location, kind.dialect, kind.name)
    }

    pub fn operand(mut self, v: ValueRef) -> Self {
        self.operands.push(v);
        self
    }

    pub fn operands(mut self, vs: impl IntoIterator<Item = ValueRef>) -> Self {
        self.operands.extend(vs);
        self
    }

    pub fn result(mut self, ty: TypeRef) -> Self {
        self.results.push(ty);
        self
    }

    pub fn results(mut self, tys: impl IntoIterator<Item = TypeRef>) -> Self {
        self.results.extend(tys);
        self
    }

    pub fn attr(mut self, key: impl Into<Symbol>, val: Attribute) -> Self {
        self.attributes.insert(key.into(), val);
        self
    }

    pub fn region(mut self, r: RegionRef) -> Self {
        self.regions.push(r);
        self
    }

    pub fn successor(mut self, b: BlockRef) -> Self {
        self.successors.push(b);
        self
    }

    pub fn build(self, ctx: &mut IrContext) -> OperationData {
        let mut operands = EntityList::new();
        for v in self.operands {
            operands.push(v, &mut ctx.value_pool);
        }
        let mut results = EntityList::new();
        for ty in self.results {
            results.push(ty, &mut ctx.type_pool);
        }
        OperationData {
            location: self.location,
            dialect: self.dialect,
            name: self.name,
            operands,
            results,
            attributes: self.attributes,
            regions: self.regions,
            successors: self.successors,
            parent_block: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Span;

    fn loc(ctx: &mut IrContext) -> Location {
        let path = ctx.paths.intern("mem://context".to_owned());
        Location::new(path, Span::new(0, 0))
    }

    fn i64_type(ctx: &mut IrContext) -> TypeRef {
        ctx.types.intern(TypeDataBuilder::new("core", "i64").build())
    }

    fn block(ctx: &mut IrContext, args: &[TypeRef]) -> BlockRef {
        let location = loc(ctx);
        ctx.create_block(BlockData {
            location,
            args: args.iter().map(|&ty| BlockArgData::new(ty)).collect(),
            ops: SmallVec::new(),
            parent_region: None,
        })
    }

    fn unary(ctx: &mut IrContext, name: &'static str, operand: Option<ValueRef>) -> OpRef {
        let location = loc(ctx);
        let ty = i64_type(ctx);
        let data = OperationDataBuilder::new(location, Symbol::new("test"), Symbol::new(name))
            .operands(operand)
            .result(ty)
            .build(ctx);
        ctx.create_op(data)
    }

    #[test]
    fn create_op_registers_uses() {
        let mut ctx = IrContext::new();
        let b = block(&mut ctx, &[]);
        let src = unary(&mut ctx, "src", None);
        ctx.push_op(b, src).unwrap();
        let v = ctx.op_result(src, 0);
        let user = unary(&mut ctx, "user", Some(v));
        ctx.push_op(b, user).unwrap();

        assert_eq!(
            ctx.uses(v),
            &[Use {
                user,
                operand_index: 0
            }]
        );
        assert_eq!(ctx.value_def(v), ValueDef::OpResult(src, 0));
        assert_eq!(ctx.op_kind(user).to_string(), "test.user");
    }

    #[test]
    fn erase_with_live_uses_is_an_error() {
        let mut ctx = IrContext::new();
        let b = block(&mut ctx, &[]);
        let src = unary(&mut ctx, "src", None);
        ctx.push_op(b, src).unwrap();
        let v = ctx.op_result(src, 0);
        let user = unary(&mut ctx, "user", Some(v));
        ctx.push_op(b, user).unwrap();

        assert_eq!(
            ctx.erase_op(src),
            Err(IrError::Attached { op: src, block: b })
        );
        ctx.detach_op(src);
        assert_eq!(
            ctx.erase_op(src),
            Err(IrError::LiveUses {
                op: src,
                value: v,
                count: 1
            })
        );
        assert!(ctx.is_live(src));
    }

    #[test]
    fn rollback_restores_uses_and_block_order() {
        let mut ctx = IrContext::new();
        let b = block(&mut ctx, &[]);
        let a = unary(&mut ctx, "a", None);
        let c = unary(&mut ctx, "c", None);
        ctx.push_op(b, a).unwrap();
        ctx.push_op(b, c).unwrap();
        let va = ctx.op_result(a, 0);
        let vc = ctx.op_result(c, 0);
        let u1 = unary(&mut ctx, "u1", Some(va));
        let u2 = unary(&mut ctx, "u2", Some(va));
        ctx.push_op(b, u1).unwrap();
        ctx.push_op(b, u2).unwrap();

        let cp = ctx.begin_transaction();
        let fresh = unary(&mut ctx, "fresh", Some(vc));
        ctx.insert_op_before(b, u1, fresh).unwrap();
        ctx.replace_all_uses(va, vc);
        ctx.detach_op(a);
        ctx.erase_op(a).unwrap();
        ctx.rollback(cp);

        assert!(ctx.is_live(a));
        assert!(!ctx.is_live(fresh));
        assert_eq!(&ctx.block(b).ops[..], &[a, c, u1, u2]);
        assert_eq!(
            ctx.uses(va),
            &[
                Use {
                    user: u1,
                    operand_index: 0
                },
                Use {
                    user: u2,
                    operand_index: 0
                },
            ]
        );
        assert!(ctx.uses(vc).is_empty());
        assert!(!ctx.in_transaction());
    }

    #[test]
    fn nested_commit_is_undone_by_outer_rollback() {
        let mut ctx = IrContext::new();
        let b = block(&mut ctx, &[]);
        let op = unary(&mut ctx, "a", None);
        ctx.push_op(b, op).unwrap();

        let outer = ctx.begin_transaction();
        let inner = ctx.begin_transaction();
        ctx.set_attr(op, "flag", Attribute::Bool(true));
        ctx.commit(inner);
        assert_eq!(
            ctx.attr(op, Symbol::new("flag")),
            Some(&Attribute::Bool(true))
        );
        ctx.rollback(outer);
        assert_eq!(ctx.attr(op, Symbol::new("flag")), None);
    }

    #[test]
    fn block_args_reindex_and_roll_back() {
        let mut ctx = IrContext::new();
        let i64_ty = i64_type(&mut ctx);
        let f32_ty = ctx.types.intern(TypeDataBuilder::new("core", "f32").build());
        let b = block(&mut ctx, &[i64_ty, i64_ty]);
        let first = ctx.block_arg(b, 0);
        let second = ctx.block_arg(b, 1);

        let cp = ctx.begin_transaction();
        ctx.erase_block_arg(b, 0).unwrap();
        let inserted = ctx.insert_block_arg(b, 1, f32_ty);
        assert_eq!(ctx.block_args(b), &[second, inserted]);
        assert_eq!(ctx.value_def(second), ValueDef::BlockArg(b, 0));
        assert_eq!(ctx.block(b).args[1].ty, f32_ty);
        ctx.rollback(cp);

        assert_eq!(ctx.block_args(b), &[first, second]);
        assert_eq!(ctx.value_def(first), ValueDef::BlockArg(b, 0));
        assert_eq!(ctx.value_def(second), ValueDef::BlockArg(b, 1));
    }

    fn region(ctx: &mut IrContext, blocks: &[BlockRef]) -> RegionRef {
        let location = loc(ctx);
        ctx.create_region(RegionData {
            location,
            blocks: blocks.iter().copied().collect(),
            parent_op: None,
        })
    }

    #[test]
    fn moved_blocks_change_region_and_roll_back() {
        let mut ctx = IrContext::new();
        let (a, b, c) = (block(&mut ctx, &[]), block(&mut ctx, &[]), block(&mut ctx, &[]));
        let source = region(&mut ctx, &[a, b]);
        let dest = region(&mut ctx, &[c]);

        let cp = ctx.begin_transaction();
        ctx.move_block(a, dest, Some(c)).unwrap();
        ctx.move_block(b, dest, None).unwrap();
        assert_eq!(&ctx.region(dest).blocks[..], &[a, c, b]);
        assert!(ctx.region(source).blocks.is_empty());
        assert_eq!(ctx.block(b).parent_region, Some(dest));
        ctx.rollback(cp);

        assert_eq!(&ctx.region(source).blocks[..], &[a, b]);
        assert_eq!(&ctx.region(dest).blocks[..], &[c]);
        assert_eq!(ctx.block(a).parent_region, Some(source));

        assert_eq!(
            ctx.move_block(a, dest, Some(b)),
            Err(IrError::BlockNotFound {
                block: b,
                region: dest
            })
        );
        assert_eq!(ctx.block(a).parent_region, Some(source));
    }

    #[test]
    fn set_value_type_updates_signature() {
        let mut ctx = IrContext::new();
        let op = unary(&mut ctx, "a", None);
        let v = ctx.op_result(op, 0);
        let f32_ty = ctx.types.intern(TypeDataBuilder::new("core", "f32").build());
        ctx.set_value_type(v, f32_ty);
        assert_eq!(ctx.op_result_types(op), &[f32_ty]);
    }

    #[test]
    fn erase_takes_nested_ops_along() {
        let mut ctx = IrContext::new();
        let inner_block = block(&mut ctx, &[]);
        let inner = unary(&mut ctx, "inner", None);
        ctx.push_op(inner_block, inner).unwrap();
        let location = loc(&mut ctx);
        let region = ctx.create_region(RegionData {
            location,
            blocks: smallvec::smallvec![inner_block],
            parent_op: None,
        });
        let data = OperationDataBuilder::new(location, Symbol::new("test"), Symbol::new("outer"))
            .region(region)
            .build(&mut ctx);
        let outer = ctx.create_op(data);
        assert_eq!(ctx.parent_op(inner), Some(outer));

        ctx.erase_op(outer).unwrap();
        assert!(!ctx.is_live(outer));
        assert!(!ctx.is_live(inner));
    }
}
