//! Structural errors raised by graph mutation.

use derive_more::{Display, Error};

use crate::refs::{BlockRef, OpKind, OpRef, RegionRef, ValueRef};

/// A mutation that would break a graph invariant.
///
/// These are programming errors in a pattern or pass, not "pattern did not
/// apply" outcomes; drivers abort on them.
#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum IrError {
    #[display("cannot erase {op}: result {value} still has {count} use(s)")]
    LiveUses {
        op: OpRef,
        value: ValueRef,
        count: usize,
    },
    #[display("cannot erase {op}: still attached to {block}")]
    Attached { op: OpRef, block: BlockRef },
    #[display("{op} is already attached to {block}")]
    AlreadyAttached { op: OpRef, block: BlockRef },
    #[display("{op} has been erased")]
    Erased { op: OpRef },
    #[display("{op} is not attached to a block")]
    Detached { op: OpRef },
    #[display("{anchor} is not in {block}")]
    AnchorNotFound { anchor: OpRef, block: BlockRef },
    #[display("block argument {value} still has {count} use(s)")]
    BlockArgInUse { value: ValueRef, count: usize },
    #[display("replacement for {kind} ({op}) has {actual} value(s), expected {expected}")]
    ArityMismatch {
        op: OpRef,
        kind: OpKind,
        expected: usize,
        actual: usize,
    },
    #[display("operand index {index} out of range for {op}")]
    OperandOutOfRange { op: OpRef, index: u32 },
    #[display("{block} is not in {region}")]
    BlockNotFound { block: BlockRef, region: RegionRef },
    #[display("cannot move the blocks of {region} into itself")]
    RegionIntoItself { region: RegionRef },
}
