//! Pass pipeline over a module.
//!
//! ```text
//! Module (plier.* ops, core.tuple values)
//!     │
//!     ▼
//! run_canonicalization ─► folded, dead ops removed
//!     │
//!     ▼
//! run_conversion ─► tuples flattened to their leaves
//!     │
//!     ▼
//! run_canonicalization ─► leftovers of the lowering cleaned up
//! ```
//!
//! Each stage can be run on its own. With verification enabled in the
//! session config, the module is checked after every stage and a malformed
//! result is reported as [`Error::Invalid`].

use tessera_ir::conversion::{ConversionMode, ConversionReport};
use tessera_ir::dialect::core::Module;
use tessera_ir::rewrite::{CanonicalizeReport, GreedyRewriteDriver, RewriteListener};
use tessera_ir::validation::verify_module;
use tessera_ir::IrContext;
use tessera_passes::flatten_tuples;
use tracing::{debug, info_span};

use crate::error::{Error, Result};
use crate::session::Session;

/// What [`lower_module`] did, stage by stage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub canonicalize: CanonicalizeReport,
    pub conversion: ConversionReport,
    pub cleanup: CanonicalizeReport,
}

#[tracing::instrument(skip_all)]
pub fn run_canonicalization(
    session: &mut Session,
    ctx: &mut IrContext,
    module: Module,
) -> Result<CanonicalizeReport> {
    run_canonicalization_with_listener(session, ctx, module, None)
}

pub fn run_canonicalization_with_listener(
    session: &mut Session,
    ctx: &mut IrContext,
    module: Module,
    listener: Option<&mut dyn RewriteListener>,
) -> Result<CanonicalizeReport> {
    let report = {
        let mut driver = GreedyRewriteDriver::new(session.patterns())
            .with_folders(session.folders())
            .with_pure_ops(session.pure_ops())
            .with_config(session.config().canonicalize.clone())
            .with_cancel_flag(session.cancel_flag());
        if let Some(listener) = listener {
            driver = driver.with_listener(listener);
        }
        driver.run(ctx, module)?
    };

    let stats = session.stats_mut();
    stats.canonicalizations += 1;
    stats.rewrites += report.rewrites;
    stats.folds += report.folds;
    stats.erased += report.erased;

    verify_after(session, ctx, module, "canonicalization")?;
    Ok(report)
}

/// Flatten tuple values with the session's conversion settings, overriding
/// only the mode.
#[tracing::instrument(skip_all, fields(mode = ?mode))]
pub fn run_conversion(
    session: &mut Session,
    ctx: &mut IrContext,
    module: Module,
    mode: ConversionMode,
) -> Result<ConversionReport> {
    run_conversion_with_listener(session, ctx, module, mode, None)
}

pub fn run_conversion_with_listener(
    session: &mut Session,
    ctx: &mut IrContext,
    module: Module,
    mode: ConversionMode,
    listener: Option<&mut dyn RewriteListener>,
) -> Result<ConversionReport> {
    let config = session.config().conversion.clone().with_mode(mode);
    let report = flatten_tuples::lower(ctx, module, config, Some(session.cancel_flag()), listener)?;
    if report.cancelled {
        debug!("conversion cancelled");
    }

    let stats = session.stats_mut();
    stats.conversions += 1;
    stats.rewrites += report.rewritten;
    stats.bridges_resolved += report.bridges_resolved;

    verify_after(session, ctx, module, "conversion")?;
    Ok(report)
}

/// Canonicalize, flatten tuples, then canonicalize again.
#[tracing::instrument(skip_all)]
pub fn lower_module(
    session: &mut Session,
    ctx: &mut IrContext,
    module: Module,
    mode: ConversionMode,
) -> Result<PipelineReport> {
    let canonicalize = {
        let _span = info_span!("stage_canonicalize").entered();
        run_canonicalization(session, ctx, module)?
    };
    let conversion = {
        let _span = info_span!("stage_flatten_tuples").entered();
        run_conversion(session, ctx, module, mode)?
    };
    let cleanup = {
        let _span = info_span!("stage_cleanup").entered();
        run_canonicalization(session, ctx, module)?
    };
    Ok(PipelineReport {
        canonicalize,
        conversion,
        cleanup,
    })
}

fn verify_after(session: &Session, ctx: &IrContext, module: Module, pass: &'static str) -> Result<()> {
    if !session.config().verify {
        return Ok(());
    }
    let result = verify_module(ctx, module);
    if result.is_ok() {
        debug!(pass, "module verified");
        return Ok(());
    }
    Err(Error::Invalid {
        pass,
        report: result.to_string(),
    })
}
