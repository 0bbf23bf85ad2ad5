//! Rewrite session: the registries and settings shared by every pass run.
//!
//! A session is created once with [`Session::init`], which registers the
//! fold rules, canonicalization patterns and pure kinds of the built-in
//! dialects. Callers may add their own before running passes. Dropping the
//! session through [`Session::shutdown`] reports what it did.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tessera_ir::conversion::ConversionConfig;
use tessera_ir::dialect;
use tessera_ir::rewrite::{CanonicalizeConfig, FoldFn, FoldRegistry, PatternSet, RewritePattern};
use tessera_ir::OpKind;
use tracing::info;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub canonicalize: CanonicalizeConfig,
    pub conversion: ConversionConfig,
    /// Run the structural verifier after every pass.
    pub verify: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            canonicalize: CanonicalizeConfig::default(),
            conversion: ConversionConfig::default(),
            verify: true,
        }
    }
}

impl SessionConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn with_canonicalize(mut self, config: CanonicalizeConfig) -> Self {
        self.canonicalize = config;
        self
    }

    pub fn with_conversion(mut self, config: ConversionConfig) -> Self {
        self.conversion = config;
        self
    }

    pub fn with_verification(mut self, enabled: bool) -> Self {
        self.verify = enabled;
        self
    }
}

/// Running totals over every pass a session ran.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub canonicalizations: usize,
    pub conversions: usize,
    pub rewrites: usize,
    pub folds: usize,
    pub erased: usize,
    pub bridges_resolved: usize,
}

pub struct Session {
    config: SessionConfig,
    folders: FoldRegistry,
    patterns: PatternSet,
    pure_ops: HashSet<OpKind>,
    cancel: Arc<AtomicBool>,
    stats: SessionStats,
}

impl Session {
    pub fn init(config: SessionConfig) -> Self {
        let mut folders = FoldRegistry::new();
        dialect::register_folders(&mut folders);
        let mut patterns = PatternSet::new();
        dialect::populate_canonicalization_patterns(&mut patterns);
        let pure_ops = dialect::pure_ops();

        info!(
            patterns = patterns.len(),
            pure_ops = pure_ops.len(),
            verify = config.verify,
            "rewrite session initialized"
        );
        Self {
            config,
            folders,
            patterns,
            pure_ops,
            cancel: Arc::new(AtomicBool::new(false)),
            stats: SessionStats::default(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SessionConfig {
        &mut self.config
    }

    /// Replaces any rule already registered for `kind`.
    pub fn register_folder(&mut self, kind: OpKind, fold: FoldFn) -> &mut Self {
        self.folders.register(kind, fold);
        self
    }

    pub fn add_pattern(&mut self, pattern: impl RewritePattern + 'static) -> &mut Self {
        self.patterns.add(pattern);
        self
    }

    /// Lets dead-op removal erase ops of `kind` once their results are unused.
    pub fn add_pure_op(&mut self, kind: OpKind) -> &mut Self {
        self.pure_ops.insert(kind);
        self
    }

    /// Raising the flag stops a running canonicalization between two ops.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Clears a previously raised cancellation.
    pub fn reset_cancellation(&self) {
        self.cancel.store(false, Ordering::Relaxed);
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn shutdown(self) -> SessionStats {
        let stats = self.stats;
        info!(
            canonicalizations = stats.canonicalizations,
            conversions = stats.conversions,
            rewrites = stats.rewrites,
            "rewrite session shut down"
        );
        stats
    }

    pub(crate) fn folders(&self) -> &FoldRegistry {
        &self.folders
    }

    pub(crate) fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    pub(crate) fn pure_ops(&self) -> &HashSet<OpKind> {
        &self.pure_ops
    }

    pub(crate) fn stats_mut(&mut self) -> &mut SessionStats {
        &mut self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_ir::conversion::ConversionMode;

    #[test]
    fn init_registers_builtin_dialects() {
        let session = Session::init(SessionConfig::default());
        assert!(!session.patterns().is_empty());
        assert!(session.pure_ops().contains(&OpKind::new("arith", "constant")));
        assert!(session.folders().contains(OpKind::new("arith", "add")));
        assert_eq!(session.shutdown(), SessionStats::default());
    }

    #[test]
    fn json_config_keeps_defaults_for_missing_fields() {
        let config = SessionConfig::from_json(
            r#"{ "verify": false, "conversion": { "mode": "partial" } }"#,
        )
        .unwrap();
        assert!(!config.verify);
        assert_eq!(config.conversion.mode, ConversionMode::Partial);
        assert_eq!(config.canonicalize, CanonicalizeConfig::default());
    }

    #[test]
    fn cancel_flag_is_shared() {
        let session = Session::init(SessionConfig::default());
        let flag = session.cancel_flag();
        flag.store(true, Ordering::Relaxed);
        assert!(session.cancel.load(Ordering::Relaxed));
        session.reset_cancellation();
        assert!(!flag.load(Ordering::Relaxed));
    }
}
