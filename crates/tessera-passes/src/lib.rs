//! Lowering passes built on the tessera-ir conversion framework.

pub mod call_lowering;
pub mod flatten_tuples;
