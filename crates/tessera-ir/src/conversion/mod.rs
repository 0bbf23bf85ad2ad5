//! One-to-N dialect conversion.
//!
//! A `TypeConverter` says what every type becomes, a `ConversionTarget` says
//! which ops may remain, and `ConversionPattern`s rewrite the rest through a
//! `OneToNRewriter`. Values whose arity changes are bridged with
//! `core.unrealized_conversion_cast` until all their readers are converted;
//! `resolve_bridges` removes the bridges that became redundant.

pub mod adaptor;
pub mod bridge;
pub mod driver;
pub mod rewriter;
pub mod target;
pub mod type_converter;

use derive_more::{Display, Error, From};

use crate::error::IrError;

pub use adaptor::OpAdaptor;
pub use bridge::{BridgeReport, resolve_bridges};
pub use driver::{
    ConversionConfig, ConversionDriver, ConversionFailure, ConversionMode, ConversionPattern,
    ConversionPatternSet, ConversionReport, DriverError,
};
pub use rewriter::{OneToNRewriter, Remapping, ValueVec};
pub use target::{ConversionTarget, IllegalOp, LegalityCheck};
pub use type_converter::{OneToNTypeMapping, TypeConversionError, TypeConverter, TypeVec};

/// Error returned by `OneToNRewriter` operations.
#[derive(Clone, Debug, Display, Error, From, PartialEq, Eq)]
pub enum ConversionError {
    #[display("{_0}")]
    Ir(IrError),
    #[display("{_0}")]
    Type(TypeConversionError),
}
