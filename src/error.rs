//! Errors surfaced by the pipeline entry points.

use derive_more::{Display, From};
use tessera_ir::IrError;
use tessera_ir::conversion::{ConversionFailure, DriverError, IllegalOp};

#[derive(Clone, Debug, Display, From, PartialEq, Eq)]
pub enum Error {
    /// A rewrite broke a graph invariant; the offending attempt was rolled back.
    #[display("structural error: {_0}")]
    Ir(IrError),

    /// Full conversion left illegal ops; the module is unchanged.
    #[display("{_0}")]
    Conversion(ConversionFailure),

    /// Post-pass verification found a malformed module.
    #[display("module failed verification after {pass}:\n{report}")]
    #[from(ignore)]
    Invalid { pass: &'static str, report: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Ir(err) => Some(err),
            Error::Conversion(err) => Some(err),
            Error::Invalid { .. } => None,
        }
    }
}

impl From<DriverError> for Error {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Illegal(failure) => Error::Conversion(failure),
            DriverError::Ir(err) => Error::Ir(err),
        }
    }
}

impl Error {
    /// Ops a failed full conversion could not legalize.
    pub fn illegal_ops(&self) -> &[IllegalOp] {
        match self {
            Error::Conversion(failure) => &failure.illegal,
            _ => &[],
        }
    }
}
