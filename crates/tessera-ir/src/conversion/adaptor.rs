//! Operand view handed to conversion patterns.

use std::ops::Range;

use smallvec::SmallVec;

use super::type_converter::OneToNTypeMapping;
use crate::refs::{OpRef, TypeRef, ValueRef};

/// The matched op's operands after remapping.
///
/// Original operand `i` is represented by `operand(i)`: one value when its
/// type converts one-to-one, the pieces of a decomposed value otherwise,
/// nothing when the type is dropped.
#[derive(Clone, Debug)]
pub struct OpAdaptor {
    op: OpRef,
    values: SmallVec<[ValueRef; 8]>,
    ranges: SmallVec<[Range<usize>; 4]>,
    mapping: OneToNTypeMapping,
}

impl OpAdaptor {
    pub(crate) fn new(op: OpRef, mapping: OneToNTypeMapping) -> Self {
        Self {
            op,
            values: SmallVec::new(),
            ranges: SmallVec::new(),
            mapping,
        }
    }

    pub(crate) fn push(&mut self, values: &[ValueRef]) {
        let start = self.values.len();
        self.values.extend_from_slice(values);
        self.ranges.push(start..self.values.len());
    }

    pub fn op(&self) -> OpRef {
        self.op
    }

    /// Number of original operands.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn operand(&self, index: usize) -> &[ValueRef] {
        &self.values[self.ranges[index].clone()]
    }

    /// The operand's value when it is still a single value.
    pub fn single(&self, index: usize) -> Option<ValueRef> {
        match self.operand(index) {
            &[v] => Some(v),
            _ => None,
        }
    }

    /// All remapped operands, concatenated in operand order.
    pub fn flat_operands(&self) -> &[ValueRef] {
        &self.values
    }

    /// Target types of operand `index`.
    pub fn converted_types(&self, index: usize) -> &[TypeRef] {
        self.mapping.converted_types(index)
    }

    pub fn mapping(&self) -> &OneToNTypeMapping {
        &self.mapping
    }
}
