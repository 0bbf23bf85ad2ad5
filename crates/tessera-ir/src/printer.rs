//! Text format printer.
//!
//! ```text
//! core.module @m {
//!   func.func @f(%0: core.i64) -> core.i64 {
//!     %1 = arith.constant {value = 10} : core.i64
//!     func.return %1
//!   }
//! }
//! ```
//!
//! Output is a pure function of the graph: values and blocks are numbered in
//! print order and attributes are listed by key name, so two structurally
//! equal graphs print identically.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write;

use crate::Symbol;
use crate::context::IrContext;
use crate::refs::*;
use crate::types::*;

struct PrintState<'a> {
    ctx: &'a IrContext,
    value_names: HashMap<ValueRef, String>,
    block_labels: HashMap<BlockRef, String>,
    next_value_num: usize,
    next_block_num: usize,
}

impl<'a> PrintState<'a> {
    fn new(ctx: &'a IrContext) -> Self {
        Self {
            ctx,
            value_names: HashMap::new(),
            block_labels: HashMap::new(),
            next_value_num: 0,
            next_block_num: 0,
        }
    }

    fn assign_value_name(&mut self, v: ValueRef) -> String {
        let name = format!("%{}", self.next_value_num);
        self.next_value_num += 1;
        self.value_names.insert(v, name.clone());
        name
    }

    fn value_name(&self, v: ValueRef) -> &str {
        self.value_names.get(&v).map(|s| s.as_str()).unwrap_or("%?")
    }

    fn assign_block_label(&mut self, b: BlockRef) {
        let label = format!("^bb{}", self.next_block_num);
        self.next_block_num += 1;
        self.block_labels.insert(b, label);
    }

    fn block_label(&self, b: BlockRef) -> &str {
        self.block_labels
            .get(&b)
            .map(|s| s.as_str())
            .unwrap_or("^bb?")
    }

    fn reset_numbering(&mut self) {
        self.next_value_num = 0;
        self.next_block_num = 0;
        self.value_names.clear();
        self.block_labels.clear();
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Print an operation as IR text.
pub fn print_op(ctx: &IrContext, op: OpRef) -> String {
    let mut state = PrintState::new(ctx);
    let mut out = String::new();
    print_operation(&mut state, &mut out, op, 0).expect("fmt::Write to String never fails");
    out
}

/// Print a type as IR text.
pub fn print_type(ctx: &IrContext, ty: TypeRef) -> String {
    let mut out = String::new();
    write_type(ctx, &mut out, ty).expect("fmt::Write to String never fails");
    out
}

/// Print a module and everything nested in it.
pub fn print_module(ctx: &IrContext, root: OpRef) -> String {
    let mut state = PrintState::new(ctx);
    let mut out = String::new();
    print_module_op(&mut state, &mut out, root).expect("fmt::Write to String never fails");
    out
}

// ============================================================================
// Types and attributes
// ============================================================================

fn sorted_attrs<'a>(
    attrs: impl Iterator<Item = (&'a Symbol, &'a Attribute)>,
) -> Vec<(String, &'a Attribute)> {
    let mut sorted: Vec<_> = attrs.map(|(k, v)| (k.to_string(), v)).collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    sorted
}

fn write_type(ctx: &IrContext, f: &mut impl Write, ty: TypeRef) -> fmt::Result {
    let data = ctx.types.get(ty);
    write!(f, "{}.{}", data.dialect, data.name)?;
    if !data.params.is_empty() {
        f.write_char('(')?;
        for (i, &param) in data.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write_type(ctx, f, param)?;
        }
        f.write_char(')')?;
    } else if !data.attrs.is_empty() {
        f.write_str("()")?;
    }
    if !data.attrs.is_empty() {
        f.write_str(" {")?;
        for (i, (key, val)) in sorted_attrs(data.attrs.iter()).into_iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key} = ")?;
            write_attribute(ctx, f, val)?;
        }
        f.write_char('}')?;
    }
    Ok(())
}

fn write_attribute(ctx: &IrContext, f: &mut impl Write, attr: &Attribute) -> fmt::Result {
    match attr {
        Attribute::Unit => f.write_str("unit"),
        Attribute::Bool(b) => write!(f, "{b}"),
        Attribute::IntBits(v) => write!(f, "{}", *v as i64),
        Attribute::FloatBits(bits) => {
            let v = f64::from_bits(*bits);
            let s = format!("{v}");
            f.write_str(&s)?;
            if v.is_finite() && !s.contains('.') && !s.contains('e') && !s.contains('E') {
                f.write_str(".0")?;
            }
            Ok(())
        }
        Attribute::String(s) => {
            f.write_char('"')?;
            write_escaped_string(f, s)?;
            f.write_char('"')
        }
        Attribute::Symbol(sym) => write_symbol(f, *sym),
        Attribute::Type(ty) => write_type(ctx, f, *ty),
        Attribute::List(list) => {
            f.write_char('[')?;
            for (i, item) in list.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_attribute(ctx, f, item)?;
            }
            f.write_char(']')
        }
    }
}

fn write_escaped_string(f: &mut impl Write, s: &str) -> fmt::Result {
    for ch in s.chars() {
        match ch {
            '\\' => f.write_str("\\\\")?,
            '"' => f.write_str("\\\"")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            c if c.is_control() => write!(f, "\\x{:02x}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    Ok(())
}

fn write_symbol(f: &mut impl Write, sym: Symbol) -> fmt::Result {
    sym.with_str(|s| {
        let plain = !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.');
        if plain {
            write!(f, "@{s}")
        } else {
            f.write_str("@\"")?;
            write_escaped_string(f, s)?;
            f.write_char('"')
        }
    })
}

// ============================================================================
// Operations
// ============================================================================

fn print_operation(
    state: &mut PrintState<'_>,
    f: &mut impl Write,
    op: OpRef,
    indent: usize,
) -> fmt::Result {
    let kind = state.ctx.op_kind(op);
    if kind.dialect == "core" && kind.name == "module" {
        return print_module_op(state, f, op);
    }
    if kind.dialect == "func" && kind.name == "func" {
        return print_func_op(state, f, op, indent);
    }
    print_generic_op(state, f, op, indent)
}

fn print_generic_op(
    state: &mut PrintState<'_>,
    f: &mut impl Write,
    op: OpRef,
    indent: usize,
) -> fmt::Result {
    let indent_str = " ".repeat(indent);
    f.write_str(&indent_str)?;

    let results = state.ctx.op_results(op);
    if !results.is_empty() {
        for (i, &v) in results.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            let name = state.assign_value_name(v);
            f.write_str(&name)?;
        }
        f.write_str(" = ")?;
    }

    write!(f, "{}", state.ctx.op_kind(op))?;

    let operands = state.ctx.op_operands(op);
    if !operands.is_empty() {
        f.write_char(' ')?;
        for (i, &v) in operands.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(state.value_name(v))?;
        }
    }

    let successors = &state.ctx.op(op).successors;
    if !successors.is_empty() {
        f.write_str(" [")?;
        for (i, &b) in successors.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(state.block_label(b))?;
        }
        f.write_char(']')?;
    }

    write_op_attrs(state.ctx, f, op, &[])?;

    let result_types = state.ctx.op_result_types(op);
    if !result_types.is_empty() {
        f.write_str(" : ")?;
        for (i, &ty) in result_types.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write_type(state.ctx, f, ty)?;
        }
    }

    let regions = state.ctx.op(op).regions.clone();
    for region in regions {
        f.write_str(" {\n")?;
        print_region(state, f, region, indent)?;
        f.write_str(&indent_str)?;
        f.write_char('}')?;
    }

    f.write_char('\n')
}

fn write_op_attrs(ctx: &IrContext, f: &mut impl Write, op: OpRef, skip: &[&str]) -> fmt::Result {
    let attrs: Vec<_> = sorted_attrs(ctx.op(op).attributes.iter())
        .into_iter()
        .filter(|(key, _)| !skip.contains(&key.as_str()))
        .collect();
    if attrs.is_empty() {
        return Ok(());
    }
    f.write_str(" {")?;
    for (i, (key, val)) in attrs.into_iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{key} = ")?;
        write_attribute(ctx, f, val)?;
    }
    f.write_char('}')
}

fn write_block_header(
    state: &mut PrintState<'_>,
    f: &mut impl Write,
    block: BlockRef,
    indent: usize,
) -> fmt::Result {
    let label = state.block_label(block).to_owned();
    write!(f, "{}{label}", " ".repeat(indent))?;
    let args: Vec<_> = state.ctx.block_args(block).to_vec();
    if !args.is_empty() {
        f.write_char('(')?;
        for (j, arg) in args.into_iter().enumerate() {
            if j > 0 {
                f.write_str(", ")?;
            }
            let name = state.assign_value_name(arg);
            write!(f, "{name}: ")?;
            write_type(state.ctx, f, state.ctx.value_ty(arg))?;
        }
        f.write_char(')')?;
    }
    f.write_str(":\n")
}

fn print_region(
    state: &mut PrintState<'_>,
    f: &mut impl Write,
    region: RegionRef,
    indent: usize,
) -> fmt::Result {
    let blocks: Vec<_> = state.ctx.region(region).blocks.to_vec();
    for &block in &blocks {
        state.assign_block_label(block);
    }

    let elide_label = blocks.len() == 1 && state.ctx.block_args(blocks[0]).is_empty();
    for (i, &block) in blocks.iter().enumerate() {
        if !elide_label {
            write_block_header(state, f, block, indent)?;
        }
        let ops: Vec<_> = state.ctx.block(block).ops.to_vec();
        for op in ops {
            print_operation(state, f, op, indent + 2)?;
        }
        if i + 1 < blocks.len() {
            f.write_char('\n')?;
        }
    }
    Ok(())
}

fn print_module_op(state: &mut PrintState<'_>, f: &mut impl Write, op: OpRef) -> fmt::Result {
    let data = state.ctx.op(op);
    f.write_str("core.module")?;
    if let Some(Attribute::Symbol(name)) = data.attributes.get(&Symbol::new("sym_name")) {
        f.write_char(' ')?;
        write_symbol(f, *name)?;
    }

    let Some(&region) = data.regions.first() else {
        return f.write_char('\n');
    };
    f.write_str(" {\n")?;
    let blocks: Vec<_> = state.ctx.region(region).blocks.to_vec();
    for block in blocks {
        let ops: Vec<_> = state.ctx.block(block).ops.to_vec();
        for child in ops {
            // Each top-level op gets its own numbering.
            state.reset_numbering();
            print_operation(state, f, child, 2)?;
        }
    }
    f.write_str("}\n")
}

fn print_func_op(
    state: &mut PrintState<'_>,
    f: &mut impl Write,
    op: OpRef,
    indent: usize,
) -> fmt::Result {
    let indent_str = " ".repeat(indent);
    let data = state.ctx.op(op);
    f.write_str(&indent_str)?;
    f.write_str("func.func")?;
    if let Some(Attribute::Symbol(name)) = data.attributes.get(&Symbol::new("sym_name")) {
        f.write_char(' ')?;
        write_symbol(f, *name)?;
    }

    let Some(&region) = data.regions.first() else {
        return f.write_char('\n');
    };
    let blocks: Vec<_> = state.ctx.region(region).blocks.to_vec();

    // Entry block arguments double as the parameter list.
    f.write_char('(')?;
    if let Some(&entry) = blocks.first() {
        let args: Vec<_> = state.ctx.block_args(entry).to_vec();
        for (i, arg) in args.into_iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            let name = state.assign_value_name(arg);
            write!(f, "{name}: ")?;
            write_type(state.ctx, f, state.ctx.value_ty(arg))?;
        }
    }
    f.write_char(')')?;

    let results: Vec<TypeRef> = data
        .attributes
        .get(&Symbol::new("results"))
        .and_then(Attribute::as_list)
        .map(|items| items.iter().filter_map(Attribute::as_type).collect())
        .unwrap_or_default();
    match results.as_slice() {
        [] => {}
        [single] => {
            f.write_str(" -> ")?;
            write_type(state.ctx, f, *single)?;
        }
        many => {
            f.write_str(" -> (")?;
            for (i, &ty) in many.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_type(state.ctx, f, ty)?;
            }
            f.write_char(')')?;
        }
    }
    write_op_attrs(state.ctx, f, op, &["sym_name", "results"])?;
    f.write_str(" {\n")?;

    for &block in &blocks {
        state.assign_block_label(block);
    }
    for (i, &block) in blocks.iter().enumerate() {
        if i > 0 {
            write_block_header(state, f, block, indent)?;
        }
        let ops: Vec<_> = state.ctx.block(block).ops.to_vec();
        for child in ops {
            print_operation(state, f, child, indent + 2)?;
        }
    }
    writeln!(f, "{indent_str}}}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{arith, core, func, plier};
    use crate::location::{Location, Span};
    use crate::ops::DialectOp;

    fn test_location(ctx: &mut IrContext) -> Location {
        let path = ctx.paths.intern("test.py".to_owned());
        Location::new(path, Span::new(0, 0))
    }

    #[test]
    fn prints_builtin_types() {
        let mut ctx = IrContext::new();
        let i32_ty = core::i32_type(&mut ctx);
        let f32_ty = core::f32_type(&mut ctx);
        let tuple = core::tuple_type(&mut ctx, &[i32_ty, f32_ty]);
        assert_eq!(print_type(&ctx, i32_ty), "core.i32");
        assert_eq!(print_type(&ctx, tuple), "core.tuple(core.i32, core.f32)");

        let tensor = core::tensor_type(&mut ctx, f32_ty, &[4, crate::types::DYNAMIC_DIM]);
        assert_eq!(print_type(&ctx, tensor), "core.tensor(core.f32) {shape = [4, -1]}");
    }

    #[test]
    fn prints_negative_constants_signed() {
        let mut ctx = IrContext::new();
        let loc = test_location(&mut ctx);
        let i64_ty = core::i64_type(&mut ctx);
        let c = arith::Constant::create(&mut ctx, loc, i64_ty, Attribute::int(-3));
        assert_eq!(
            print_op(&ctx, c.op_ref()),
            "%0 = arith.constant {value = -3} : core.i64\n"
        );
    }

    #[test]
    fn attributes_print_in_name_order() {
        let mut ctx = IrContext::new();
        let loc = test_location(&mut ctx);
        let i64_ty = core::i64_type(&mut ctx);
        let c = arith::Constant::create(&mut ctx, loc, i64_ty, Attribute::int(1));
        // Interned after "value", so symbol order alone would put it last.
        ctx.set_attr(c.op_ref(), Symbol::from_dynamic("aaa_first_attr"), Attribute::Unit);
        assert_eq!(
            print_op(&ctx, c.op_ref()),
            "%0 = arith.constant {aaa_first_attr = unit, value = 1} : core.i64\n"
        );
    }

    #[test]
    fn prints_module_with_function() {
        let mut ctx = IrContext::new();
        let loc = test_location(&mut ctx);
        let i64_ty = core::i64_type(&mut ctx);
        let module = core::Module::create(&mut ctx, loc, Symbol::new("m"));
        let body = module.body_block(&ctx).unwrap();
        let function = func::Func::create(&mut ctx, loc, Symbol::new("f"), &[i64_ty], &[i64_ty]);
        ctx.push_op(body, function.op_ref()).unwrap();
        let entry = function.entry_block(&ctx).unwrap();

        let x = ctx.block_arg(entry, 0);
        let cast = plier::Cast::create(&mut ctx, loc, x, i64_ty);
        ctx.push_op(entry, cast.op_ref()).unwrap();
        let cast_result = ctx.op_result(cast.op_ref(), 0);
        let ret = func::Return::create(&mut ctx, loc, &[cast_result]);
        ctx.push_op(entry, ret.op_ref()).unwrap();

        insta::assert_snapshot!(print_module(&ctx, module.op_ref()), @r"
        core.module @m {
          func.func @f(%0: core.i64) -> core.i64 {
            %1 = plier.cast %0 : core.i64
            func.return %1
          }
        }
        ");
    }

    fn block(ctx: &mut IrContext, loc: Location, args: &[TypeRef]) -> BlockRef {
        ctx.create_block(crate::context::BlockData {
            location: loc,
            args: args.iter().map(|&ty| crate::context::BlockArgData::new(ty)).collect(),
            ops: Default::default(),
            parent_region: None,
        })
    }

    fn region(ctx: &mut IrContext, loc: Location, blocks: &[BlockRef]) -> RegionRef {
        ctx.create_region(crate::context::RegionData {
            location: loc,
            blocks: blocks.iter().copied().collect(),
            parent_op: None,
        })
    }

    #[test]
    fn nested_blocks_indent_one_level_per_region() {
        let mut ctx = IrContext::new();
        let loc = test_location(&mut ctx);
        let i64_ty = core::i64_type(&mut ctx);
        let module = core::Module::create(&mut ctx, loc, Symbol::new("m"));
        let top = module.body_block(&ctx).unwrap();

        let entry = block(&mut ctx, loc, &[i64_ty]);
        let exit = block(&mut ctx, loc, &[i64_ty]);
        let body = region(&mut ctx, loc, &[entry, exit]);
        let data = crate::context::OperationDataBuilder::of_kind(loc, func::Func::kind())
            .attr(Symbol::new("sym_name"), Attribute::Symbol(Symbol::new("f")))
            .attr(Symbol::new("results"), Attribute::List(vec![Attribute::Type(i64_ty)]))
            .region(body)
            .build(&mut ctx);
        let function = ctx.create_op(data);
        ctx.push_op(top, function).unwrap();

        let inner = block(&mut ctx, loc, &[]);
        let wrapped = region(&mut ctx, loc, &[inner]);
        let data = crate::context::OperationDataBuilder::of_kind(loc, OpKind::new("test", "scope"))
            .region(wrapped)
            .build(&mut ctx);
        let scope = ctx.create_op(data);
        ctx.push_op(entry, scope).unwrap();
        let x = ctx.block_arg(entry, 0);
        let cast = plier::Cast::create(&mut ctx, loc, x, i64_ty);
        ctx.push_op(inner, cast.op_ref()).unwrap();
        let ret = func::Return::create(&mut ctx, loc, &[x]);
        ctx.push_op(entry, ret.op_ref()).unwrap();
        let y = ctx.block_arg(exit, 0);
        let ret = func::Return::create(&mut ctx, loc, &[y]);
        ctx.push_op(exit, ret.op_ref()).unwrap();

        insta::assert_snapshot!(print_module(&ctx, module.op_ref()), @r"
        core.module @m {
          func.func @f(%0: core.i64) -> core.i64 {
            test.scope {
              %1 = plier.cast %0 : core.i64
            }
            func.return %0
          ^bb1(%2: core.i64):
            func.return %2
          }
        }
        ");
    }

    #[test]
    fn symbols_with_punctuation_are_quoted() {
        let ctx = IrContext::new();
        let mut out = String::new();
        write_attribute(&ctx, &mut out, &Attribute::Symbol(Symbol::from_dynamic("np.sum"))).unwrap();
        assert_eq!(out, "@np.sum");

        out.clear();
        write_attribute(&ctx, &mut out, &Attribute::Symbol(Symbol::from_dynamic("a b"))).unwrap();
        assert_eq!(out, r#"@"a b""#);

        out.clear();
        write_attribute(&ctx, &mut out, &Attribute::FloatBits(42.0f64.to_bits())).unwrap();
        assert_eq!(out, "42.0");
    }
}
