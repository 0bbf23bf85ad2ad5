//! Shared module builders for the integration tests.

#![allow(dead_code)]

use tessera::ir::dialect::core::{self, Module};
use tessera::ir::dialect::func;
use tessera::ir::printer::print_module;
use tessera::ir::{BlockRef, DialectOp, IrContext, Location, OpRef, Span, Symbol, TypeRef, ValueRef};

pub struct TestModule {
    pub ctx: IrContext,
    pub module: Module,
    pub location: Location,
}

impl TestModule {
    pub fn new() -> Self {
        init_tracing();
        let mut ctx = IrContext::new();
        let path = ctx.paths.intern("mem://test".to_owned());
        let location = Location::new(path, Span::new(0, 0));
        let module = core::Module::create(&mut ctx, location, Symbol::new("m"));
        Self {
            ctx,
            module,
            location,
        }
    }

    /// Appends a function to the module; returns it with its entry block.
    pub fn func(
        &mut self,
        name: &'static str,
        params: &[TypeRef],
        results: &[TypeRef],
    ) -> (func::Func, BlockRef) {
        let top = self.module.body_block(&self.ctx).unwrap();
        let function =
            func::Func::create(&mut self.ctx, self.location, Symbol::new(name), params, results);
        self.ctx.push_op(top, function.op_ref()).unwrap();
        let entry = function.entry_block(&self.ctx).unwrap();
        (function, entry)
    }

    /// Appends `op` to `block` and returns its first result.
    pub fn push(&mut self, block: BlockRef, op: OpRef) -> Option<ValueRef> {
        self.ctx.push_op(block, op).unwrap();
        self.ctx.op_results(op).first().copied()
    }

    pub fn ret(&mut self, block: BlockRef, values: &[ValueRef]) -> OpRef {
        let ret = func::Return::create(&mut self.ctx, self.location, values);
        self.ctx.push_op(block, ret.op_ref()).unwrap();
        ret.op_ref()
    }

    pub fn returned(&self, block: BlockRef) -> Vec<ValueRef> {
        let last = *self.ctx.block(block).ops.last().unwrap();
        assert!(func::Return::matches(&self.ctx, last));
        self.ctx.op_operands(last).to_vec()
    }

    pub fn print(&self) -> String {
        print_module(&self.ctx, self.module.op_ref())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
