//! Built-in dialects.

pub mod arith;
pub mod core;
pub mod func;
pub mod plier;

use std::collections::HashSet;

use crate::ops::DialectOp;
use crate::refs::OpKind;
use crate::rewrite::{FoldRegistry, PatternSet};

/// Fold rules of every built-in dialect.
pub fn register_folders(registry: &mut FoldRegistry) {
    arith::register_folders(registry);
    plier::register_folders(registry);
}

/// Canonicalization patterns of every built-in dialect.
pub fn populate_canonicalization_patterns(patterns: &mut PatternSet) {
    plier::populate_canonicalization_patterns(patterns);
}

/// Kinds without side effects: safe to erase once their results are unused.
pub fn pure_ops() -> HashSet<OpKind> {
    [
        arith::Constant::kind(),
        arith::Add::kind(),
        arith::Sub::kind(),
        arith::Mul::kind(),
        plier::BuildTuple::kind(),
        plier::GetItem::kind(),
        plier::StaticGetItem::kind(),
        plier::Cast::kind(),
        plier::EnforceShape::kind(),
        plier::Dim::kind(),
        plier::Global::kind(),
        plier::GetAttr::kind(),
        plier::Arg::kind(),
        core::UnrealizedConversionCast::kind(),
    ]
    .into_iter()
    .collect()
}
