mod common;

use std::sync::atomic::Ordering;

use common::TestModule;
use proptest::prelude::*;
use tessera::ir::conversion::ConversionMode;
use tessera::ir::dialect::{arith, core, plier};
use tessera::ir::validation::verify_module;
use tessera::ir::walk;
use tessera::ir::{Attribute, BlockRef, DialectOp, Symbol, TypeDataBuilder, TypeRef, ValueRef};
use tessera::{Error, Session, SessionConfig, lower_module, run_conversion};

fn bridges(m: &TestModule) -> usize {
    let body = m.module.body(&m.ctx).unwrap();
    walk::collect_ops(&m.ctx, body)
        .into_iter()
        .filter(|&op| core::is_bridge(&m.ctx, op))
        .count()
}

#[test]
fn swapped_pair_lowers_to_flat_signature() {
    let mut m = TestModule::new();
    let i64_ty = core::i64_type(&mut m.ctx);
    let f32_ty = core::f32_type(&mut m.ctx);
    let pair = core::tuple_type(&mut m.ctx, &[i64_ty, f32_ty]);
    let swapped = core::tuple_type(&mut m.ctx, &[f32_ty, i64_ty]);
    let (_, entry) = m.func("swap", &[pair], &[swapped]);
    let p = m.ctx.block_arg(entry, 0);
    let first = plier::StaticGetItem::create(&mut m.ctx, m.location, p, 0, i64_ty);
    let first = m.push(entry, first.op_ref()).unwrap();
    let second = plier::StaticGetItem::create(&mut m.ctx, m.location, p, 1, f32_ty);
    let second = m.push(entry, second.op_ref()).unwrap();
    let tuple = plier::BuildTuple::create(&mut m.ctx, m.location, &[second, first]);
    let tuple = m.push(entry, tuple.op_ref()).unwrap();
    m.ret(entry, &[tuple]);

    let mut session = Session::init(SessionConfig::default());
    let report = lower_module(&mut session, &mut m.ctx, m.module, ConversionMode::Full).unwrap();

    assert_eq!(report.conversion.rewritten, 5);
    assert!(report.conversion.bridges_remaining.is_empty());
    assert_eq!(bridges(&m), 0);
    insta::assert_snapshot!(m.print(), @r"
    core.module @m {
      func.func @swap(%0: core.i64, %1: core.f32) -> (core.f32, core.i64) {
        func.return %1, %0
      }
    }
    ");
}

#[test]
fn already_legal_module_is_left_alone() {
    let mut m = TestModule::new();
    let i64_ty = core::i64_type(&mut m.ctx);
    let (_, entry) = m.func("id", &[i64_ty], &[i64_ty]);
    let x = m.ctx.block_arg(entry, 0);
    let one = arith::Constant::create(&mut m.ctx, m.location, i64_ty, Attribute::int(1));
    let one = m.push(entry, one.op_ref()).unwrap();
    let add = arith::Add::create(&mut m.ctx, m.location, x, one, i64_ty);
    let sum = m.push(entry, add.op_ref()).unwrap();
    m.ret(entry, &[sum]);
    let before = m.print();

    let mut session = Session::init(SessionConfig::default());
    let report = run_conversion(&mut session, &mut m.ctx, m.module, ConversionMode::Full).unwrap();

    assert_eq!(report.rewritten, 0);
    assert_eq!(report.bridges_resolved, 0);
    assert_eq!(m.print(), before);
}

/// A function returning a tuple built from an opaque global and a constant.
fn module_with_opaque_global() -> (TestModule, tessera::ir::OpRef) {
    let mut m = TestModule::new();
    let opaque = m
        .ctx
        .types
        .intern(TypeDataBuilder::new("py", "object").build());
    let i64_ty = core::i64_type(&mut m.ctx);
    let (_, entry) = m.func("f", &[], &[]);
    let global = plier::Global::create(&mut m.ctx, m.location, Symbol::new("np"), opaque);
    m.push(entry, global.op_ref());
    let three = arith::Constant::create(&mut m.ctx, m.location, i64_ty, Attribute::int(3));
    let three = m.push(entry, three.op_ref()).unwrap();
    let tuple = plier::BuildTuple::create(&mut m.ctx, m.location, &[three, three]);
    let tuple = m.push(entry, tuple.op_ref()).unwrap();
    m.ret(entry, &[tuple]);
    (m, global.op_ref())
}

#[test]
fn full_conversion_with_opaque_op_fails_and_restores_module() {
    let (mut m, global) = module_with_opaque_global();
    let before = m.print();

    let mut session = Session::init(SessionConfig::default());
    let err = run_conversion(&mut session, &mut m.ctx, m.module, ConversionMode::Full).unwrap_err();

    assert!(matches!(err, Error::Conversion(_)), "{err}");
    let illegal = err.illegal_ops();
    assert_eq!(illegal.len(), 1);
    assert_eq!(illegal[0].op, global);
    assert_eq!(illegal[0].kind, plier::Global::kind());
    assert_eq!(m.print(), before);
    assert!(verify_module(&m.ctx, m.module).is_ok());
    assert_eq!(session.stats().conversions, 0);
}

#[test]
fn partial_conversion_skips_opaque_op_and_lowers_the_rest() {
    let (mut m, global) = module_with_opaque_global();

    let mut session = Session::init(SessionConfig::default());
    let report =
        run_conversion(&mut session, &mut m.ctx, m.module, ConversionMode::Partial).unwrap();

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].op, global);
    assert!(m.ctx.is_live(global));
    assert_eq!(bridges(&m), 0);
    insta::assert_snapshot!(m.print(), @r"
    core.module @m {
      func.func @f() {
        %0 = plier.global {name = @np} : py.object
        %1 = arith.constant {value = 3} : core.i64
        func.return %1, %1
      }
    }
    ");
}

#[test]
fn raised_cancel_flag_leaves_module_untouched() {
    let mut m = TestModule::new();
    let i64_ty = core::i64_type(&mut m.ctx);
    let pair = core::tuple_type(&mut m.ctx, &[i64_ty, i64_ty]);
    let (_, entry) = m.func("f", &[pair], &[pair]);
    let p = m.ctx.block_arg(entry, 0);
    m.ret(entry, &[p]);
    let before = m.print();

    let mut session = Session::init(SessionConfig::default());
    session.cancel_flag().store(true, Ordering::Relaxed);
    let report = run_conversion(&mut session, &mut m.ctx, m.module, ConversionMode::Full).unwrap();

    assert!(report.cancelled);
    assert_eq!(report.rewritten, 0);
    assert_eq!(m.print(), before);

    session.reset_cancellation();
    let report = run_conversion(&mut session, &mut m.ctx, m.module, ConversionMode::Full).unwrap();
    assert!(!report.cancelled);
    assert_eq!(bridges(&m), 0);
    insta::assert_snapshot!(m.print(), @r"
    core.module @m {
      func.func @f(%0: core.i64, %1: core.i64) -> (core.i64, core.i64) {
        func.return %0, %1
      }
    }
    ");
}

/// Nested tuple shape of a generated signature.
#[derive(Clone, Debug)]
enum Shape {
    Int,
    Float,
    Tuple(Vec<Shape>),
}

impl Shape {
    fn ty(&self, m: &mut TestModule) -> TypeRef {
        match self {
            Shape::Int => core::i64_type(&mut m.ctx),
            Shape::Float => core::f32_type(&mut m.ctx),
            Shape::Tuple(items) => {
                let elems: Vec<_> = items.iter().map(|s| s.ty(m)).collect();
                core::tuple_type(&mut m.ctx, &elems)
            }
        }
    }

    fn leaves(&self) -> usize {
        match self {
            Shape::Int | Shape::Float => 1,
            Shape::Tuple(items) => items.iter().map(Shape::leaves).sum(),
        }
    }

    /// Take `value` apart element by element and build it back up.
    fn rebuild(&self, m: &mut TestModule, block: BlockRef, value: ValueRef) -> ValueRef {
        let Shape::Tuple(items) = self else {
            return value;
        };
        let mut parts = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let ty = item.ty(m);
            let get = plier::StaticGetItem::create(&mut m.ctx, m.location, value, i as i64, ty);
            let element = m.push(block, get.op_ref()).unwrap();
            parts.push(item.rebuild(m, block, element));
        }
        let tuple = plier::BuildTuple::create(&mut m.ctx, m.location, &parts);
        m.push(block, tuple.op_ref()).unwrap()
    }
}

fn shape() -> impl Strategy<Value = Shape> {
    let leaf = prop_oneof![Just(Shape::Int), Just(Shape::Float)];
    leaf.prop_recursive(3, 16, 3, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(Shape::Tuple)
    })
}

proptest! {
    #[test]
    fn flattening_preserves_arity(shapes in prop::collection::vec(shape(), 1..4)) {
        let mut m = TestModule::new();
        let types: Vec<TypeRef> = shapes.iter().map(|s| s.ty(&mut m)).collect();
        let (function, entry) = m.func("f", &types, &types);
        let params = m.ctx.block_args(entry).to_vec();
        let rebuilt: Vec<ValueRef> = shapes
            .iter()
            .zip(params)
            .map(|(s, p)| s.rebuild(&mut m, entry, p))
            .collect();
        m.ret(entry, &rebuilt);

        let mut session = Session::init(SessionConfig::default());
        let report = run_conversion(&mut session, &mut m.ctx, m.module, ConversionMode::Full).unwrap();

        let leaves: usize = shapes.iter().map(Shape::leaves).sum();
        prop_assert!(report.bridges_remaining.is_empty());
        prop_assert_eq!(bridges(&m), 0);
        prop_assert_eq!(function.params(&m.ctx).len(), leaves);
        prop_assert_eq!(function.result_types(&m.ctx).len(), leaves);
        prop_assert_eq!(m.returned(entry), m.ctx.block_args(entry).to_vec());
        prop_assert_eq!(m.ctx.block(entry).ops.len(), 1);
        prop_assert!(verify_module(&m.ctx, m.module).is_ok());
    }
}
