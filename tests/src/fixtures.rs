//! Executable sample functions shared by the integration tests.

use veil_ir::{BinOp, FuncBuilder, Function, Module, Operand, Pred, Width};

/// Wrapping 32-bit add, split over two blocks so branch-site passes have
/// something to chew on.
pub fn add32() -> Function {
    let mut fb = FuncBuilder::new("add", &[Width::W32, Width::W32], Some(Width::W32));
    let tail = fb.block("tail");
    let s = fb.bin(Width::W32, BinOp::Add, fb.param(0), fb.param(1));
    fb.br(tail, vec![]);
    fb.switch_to(tail);
    fb.ret(Some(s.into()));
    fb.finish().unwrap()
}

/// Unsigned max through a parameterized join block.
pub fn max32() -> Function {
    let mut fb = FuncBuilder::new("max", &[Width::W32, Width::W32], Some(Width::W32));
    let join = fb.block("join");
    let m = fb.block_param(join, Width::W32);
    let (a, b) = (fb.param(0), fb.param(1));
    let c = fb.cmp(Width::W32, Pred::Ult, a, b);
    fb.cond_br(c, join, vec![b.into()], join, vec![a.into()]);
    fb.switch_to(join);
    fb.ret(Some(m.into()));
    fb.finish().unwrap()
}

/// Sum of 0..n, a counted loop with two block parameters.
pub fn sum_to_n() -> Function {
    let mut fb = FuncBuilder::new("sum", &[Width::W32], Some(Width::W32));
    let header = fb.block("header");
    let i = fb.block_param(header, Width::W32);
    let acc = fb.block_param(header, Width::W32);
    let body = fb.block("body");
    let exit = fb.block("exit");
    let n = fb.param(0);
    fb.br(header, vec![Operand::Const(0), Operand::Const(0)]);
    fb.switch_to(header);
    let more = fb.cmp(Width::W32, Pred::Ult, i, n);
    fb.cond_br(more, body, vec![], exit, vec![]);
    fb.switch_to(body);
    let acc2 = fb.bin(Width::W32, BinOp::Add, acc, i);
    let i2 = fb.bin(Width::W32, BinOp::Add, i, Operand::Const(1));
    fb.br(header, vec![i2.into(), acc2.into()]);
    fb.switch_to(exit);
    fb.ret(Some(acc.into()));
    fb.finish().unwrap()
}

/// Euclid's gcd, a data-dependent loop.
pub fn gcd() -> Function {
    let mut fb = FuncBuilder::new("gcd", &[Width::W32, Width::W32], Some(Width::W32));
    let header = fb.block("header");
    let a = fb.block_param(header, Width::W32);
    let b = fb.block_param(header, Width::W32);
    let step = fb.block("step");
    let exit = fb.block("exit");
    fb.br(header, vec![fb.param(0).into(), fb.param(1).into()]);
    fb.switch_to(header);
    let nonzero = fb.cmp(Width::W32, Pred::Ne, b, Operand::Const(0));
    fb.cond_br(nonzero, step, vec![], exit, vec![]);
    fb.switch_to(step);
    let r = fb.bin(Width::W32, BinOp::URem, a, b);
    fb.br(header, vec![b.into(), r.into()]);
    fb.switch_to(exit);
    fb.ret(Some(a.into()));
    fb.finish().unwrap()
}

/// A straight-line mix of every MBA-eligible operation at 8 bits.
pub fn mix8() -> Function {
    let mut fb = FuncBuilder::new("mix", &[Width::W8, Width::W8], Some(Width::W8));
    let (x, y) = (fb.param(0), fb.param(1));
    let s = fb.bin(Width::W8, BinOp::Add, x, y);
    let d = fb.bin(Width::W8, BinOp::Sub, s, y);
    let c = fb.bin(Width::W8, BinOp::And, d, x);
    let o = fb.bin(Width::W8, BinOp::Or, c, y);
    let r = fb.bin(Width::W8, BinOp::Xor, o, x);
    fb.ret(Some(r.into()));
    fb.finish().unwrap()
}

/// Reference for `mix8`, mirrored in plain Rust.
pub fn mix8_reference(x: u64, y: u64) -> u64 {
    let s = x.wrapping_add(y) & 0xFF;
    let d = s.wrapping_sub(y) & 0xFF;
    let c = d & x;
    let o = c | y;
    (o ^ x) & 0xFF
}

pub fn module_of(functions: impl IntoIterator<Item = Function>) -> Module {
    let mut module = Module::new("m");
    for f in functions {
        module.push(f);
    }
    module
}
