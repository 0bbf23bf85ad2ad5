//! Resolution of `plier.call` through a user-supplied resolver.
//!
//! The pattern only unpacks the call: the callee name, the positional
//! arguments and the keyword arguments. Deciding what a name means is the
//! resolver's job. A call through `plier.getattr` is a method call and the
//! object it reads from is passed as the first positional argument.

use smallvec::SmallVec;
use tessera_ir::dialect::plier;
use tessera_ir::rewrite::{PatternRewriter, RewritePattern, RewriteResult};
use tessera_ir::{DialectOp, IrContext, OpKind, OpRef, Symbol, TypeCategory, ValueRef};
use tracing::trace;

/// A `plier.call` broken into what a resolver needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallSite {
    pub op: OpRef,
    pub name: Symbol,
    pub args: SmallVec<[ValueRef; 4]>,
    pub kwargs: SmallVec<[(Symbol, ValueRef); 2]>,
}

/// Turns a call to a known name into other ops.
///
/// The same contract as a rewrite pattern: mutations go through `rewriter`,
/// and anything other than `Applied` leaves the call in place.
pub trait CallResolver {
    fn resolve(&self, ctx: &mut IrContext, call: &CallSite, rewriter: &mut PatternRewriter) -> RewriteResult;
}

impl<F> CallResolver for F
where
    F: Fn(&mut IrContext, &CallSite, &mut PatternRewriter) -> RewriteResult,
{
    fn resolve(&self, ctx: &mut IrContext, call: &CallSite, rewriter: &mut PatternRewriter) -> RewriteResult {
        self(ctx, call, rewriter)
    }
}

pub struct CallLowering<R> {
    resolver: R,
}

impl<R: CallResolver> CallLowering<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    /// `None` while an argument is still untyped or the call is malformed.
    fn call_site(ctx: &IrContext, op: OpRef) -> Option<CallSite> {
        let call = plier::PyCall::from_op(ctx, op).ok()?;
        let name = call.func_name(ctx)?;
        let kwargs: SmallVec<[(Symbol, ValueRef); 2]> = call.kwargs(ctx)?.into_iter().collect();

        let mut args = SmallVec::new();
        let callee = call.callee(ctx)?;
        if let Some(producer) = ctx.value_def(callee).op()
            && plier::GetAttr::matches(ctx, producer)
        {
            args.push(*ctx.op_operands(producer).first()?);
        }
        args.extend_from_slice(call.args(ctx));

        let untyped = args
            .iter()
            .chain(kwargs.iter().map(|(_, value)| value))
            .any(|&v| ctx.types.category(ctx.value_ty(v)) == TypeCategory::Undefined);
        if untyped {
            trace!(%op, %name, "call arguments are not typed yet");
            return None;
        }
        Some(CallSite {
            op,
            name,
            args,
            kwargs,
        })
    }
}

impl<R: CallResolver> RewritePattern for CallLowering<R> {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> RewriteResult {
        match Self::call_site(ctx, op) {
            Some(call) => self.resolver.resolve(ctx, &call, rewriter),
            None => RewriteResult::Unchanged,
        }
    }

    fn root(&self) -> Option<OpKind> {
        Some(plier::PyCall::kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_ir::dialect::{arith, core, func};
    use tessera_ir::printer::print_module;
    use tessera_ir::rewrite::{FoldRegistry, GreedyRewriteDriver, PatternSet};
    use tessera_ir::{BlockRef, Location, Span};

    struct Fixture {
        ctx: IrContext,
        module: core::Module,
        entry: BlockRef,
        location: Location,
    }

    /// `f(%0: i64, %1: i64)` with an empty body.
    fn fixture() -> Fixture {
        let mut ctx = IrContext::new();
        let path = ctx.paths.intern("call_lowering.py".to_owned());
        let location = Location::new(path, Span::new(0, 0));
        let module = core::Module::create(&mut ctx, location, Symbol::new("m"));
        let top = module.body_block(&ctx).unwrap();
        let i64_ty = core::i64_type(&mut ctx);
        let function = func::Func::create(&mut ctx, location, Symbol::new("f"), &[i64_ty, i64_ty], &[]);
        ctx.push_op(top, function.op_ref()).unwrap();
        let entry = function.entry_block(&ctx).unwrap();
        Fixture {
            ctx,
            module,
            entry,
            location,
        }
    }

    impl Fixture {
        fn push(&mut self, op: OpRef) -> ValueRef {
            self.ctx.push_op(self.entry, op).unwrap();
            self.ctx.op_result(op, 0)
        }

        fn global(&mut self, name: &'static str) -> ValueRef {
            let ty = plier::undefined_type(&mut self.ctx);
            let op = plier::Global::create(&mut self.ctx, self.location, Symbol::new(name), ty);
            self.push(op.op_ref())
        }

        fn run(&mut self, resolver: impl CallResolver + 'static) -> usize {
            let mut patterns = PatternSet::new();
            patterns.add(CallLowering::new(resolver));
            let folders = FoldRegistry::new();
            GreedyRewriteDriver::new(&patterns)
                .with_folders(&folders)
                .run(&mut self.ctx, self.module)
                .unwrap()
                .rewrites
        }
    }

    /// `add(a, b)` and `a.add(b)` become `arith.add`; nothing else resolves.
    fn add_resolver(ctx: &mut IrContext, call: &CallSite, rewriter: &mut PatternRewriter) -> RewriteResult {
        let (true, &[lhs, rhs]) = (call.name == "add", &call.args[..]) else {
            return RewriteResult::Unchanged;
        };
        if !call.kwargs.is_empty() {
            return RewriteResult::failed("add takes no keyword arguments");
        }
        let location = ctx.op(call.op).location;
        let ty = ctx.value_ty(lhs);
        let add = arith::Add::create(ctx, location, lhs, rhs, ty);
        rewriter.replace_op(add.op_ref());
        RewriteResult::Applied
    }

    #[test]
    fn known_function_is_resolved() {
        let mut f = fixture();
        let (a, b) = (f.ctx.block_arg(f.entry, 0), f.ctx.block_arg(f.entry, 1));
        let callee = f.global("add");
        let call = plier::PyCall::create(&mut f.ctx, f.location, callee, Symbol::new("add"), &[a, b], &[]);
        let sum = f.push(call.op_ref());
        let ret = func::Return::create(&mut f.ctx, f.location, &[sum]);
        f.ctx.push_op(f.entry, ret.op_ref()).unwrap();

        assert_eq!(f.run(add_resolver), 1);

        assert!(!f.ctx.is_live(call.op_ref()));
        insta::assert_snapshot!(print_module(&f.ctx, f.module.op_ref()), @r#"
        core.module @m {
          func.func @f(%0: core.i64, %1: core.i64) {
            %2 = plier.global {name = @add} : plier.undefined
            %3 = arith.add %0, %1 : core.i64
            func.return %3
          }
        }
        "#);
    }

    #[test]
    fn method_call_passes_the_object_first() {
        let mut f = fixture();
        let (a, b) = (f.ctx.block_arg(f.entry, 0), f.ctx.block_arg(f.entry, 1));
        let undefined = plier::undefined_type(&mut f.ctx);
        let method = plier::GetAttr::create(&mut f.ctx, f.location, a, Symbol::new("add"), undefined);
        let method = f.push(method.op_ref());
        let call = plier::PyCall::create(&mut f.ctx, f.location, method, Symbol::new("add"), &[b], &[]);
        f.push(call.op_ref());

        let seen = std::rc::Rc::new(std::cell::RefCell::new(None));
        let record = std::rc::Rc::clone(&seen);
        f.run(move |_: &mut IrContext, call: &CallSite, _: &mut PatternRewriter| {
            *record.borrow_mut() = Some(call.args.to_vec());
            RewriteResult::Unchanged
        });

        assert_eq!(seen.borrow().clone(), Some(vec![a, b]));
        assert!(f.ctx.is_live(call.op_ref()));
    }

    #[test]
    fn keyword_arguments_reach_the_resolver_and_can_be_refused() {
        let mut f = fixture();
        let (a, b) = (f.ctx.block_arg(f.entry, 0), f.ctx.block_arg(f.entry, 1));
        let callee = f.global("add");
        let call = plier::PyCall::create(
            &mut f.ctx,
            f.location,
            callee,
            Symbol::new("add"),
            &[a, b],
            &[(Symbol::new("out"), a)],
        );
        f.push(call.op_ref());

        assert_eq!(f.run(add_resolver), 0);
        assert!(f.ctx.is_live(call.op_ref()));
    }

    #[test]
    fn untyped_arguments_wait_for_inference() {
        let mut f = fixture();
        let a = f.ctx.block_arg(f.entry, 0);
        let callee = f.global("add");
        let untyped = f.global("g");
        let call =
            plier::PyCall::create(&mut f.ctx, f.location, callee, Symbol::new("add"), &[a, untyped], &[]);
        f.push(call.op_ref());

        assert_eq!(f.run(add_resolver), 0);
        assert!(f.ctx.is_live(call.op_ref()));
    }
}
