//! Tessera IR crate.
//!
//! An arena-based SSA IR with a journaled context, plus the rewriting
//! machinery built on top of it: fold rules, the greedy canonicalizer and
//! one-to-N dialect conversion with placeholder bridges.

// === IR infrastructure ===
pub mod context;
pub mod error;
pub mod location;
pub mod ops;
pub mod printer;
pub mod refs;
pub mod symbol;
pub mod types;
pub mod validation;
pub mod walk;

// === Dialect modules ===
pub mod dialect;

// === Rewriting ===
pub mod conversion;
pub mod rewrite;

pub use context::{BlockArgData, BlockData, IrContext, OperationData, OperationDataBuilder, RegionData};
pub use error::IrError;
pub use location::{Location, Span};
pub use ops::DialectOp;
pub use refs::{BlockRef, OpKind, OpRef, PathRef, RegionRef, TypeRef, Use, ValueDef, ValueRef};
pub use symbol::Symbol;
pub use types::{Attribute, TypeCategory, TypeData, TypeDataBuilder};
