//! Pattern-based rewriting of `tessera-ir` modules.
//!
//! A [`Session`] owns the fold rules and canonicalization patterns of the
//! built-in dialects; the [`pipeline`] functions run passes over a module
//! with it.

pub mod error;
pub mod pipeline;
pub mod session;

pub use error::{Error, Result};
pub use pipeline::{
    PipelineReport, lower_module, run_canonicalization, run_canonicalization_with_listener,
    run_conversion, run_conversion_with_listener,
};
pub use session::{Session, SessionConfig, SessionStats};

pub use tessera_ir as ir;
pub use tessera_passes as passes;
