use crate::sparsity::Bvec;
use crate::traits::Element;
use anyhow::{anyhow, Result};

/// OpCodes for the stack-based virtual machine that evaluates scalar graphs.
/// The VM operates on a stack of `Element` values (f64, Dual or SxElem).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant `f64` value onto the stack.
    LoadConst(f64),
    /// Pushes an input nonzero (flat index over all inputs) onto the stack.
    LoadVar(usize),
    /// Pushes a previously stored shared subexpression.
    LoadTemp(usize),
    /// Copies the top of the stack into a temporary without popping it.
    StoreTemp(usize),
    /// Pops top two values (b, a), pushes (a + b).
    Add,
    /// Pops top two values (b, a), pushes (a - b).
    Sub,
    /// Pops top two values (b, a), pushes (a * b).
    Mul,
    /// Pops top two values (b, a), pushes (a / b).
    Div,
    Sin,
    Cos,
    Exp,
    Log,
    Neg,
    /// Pops the top value into an output nonzero (flat index over all outputs).
    Write(usize),
}

/// Represents a compiled sequence of operations.
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
    pub n_temps: usize,
}

impl Bytecode {
    pub fn new() -> Self {
        Self::default()
    }
}

fn pop<T>(stack: &mut Vec<T>) -> Result<T> {
    stack.pop().ok_or_else(|| anyhow!("Bytecode stack underflow"))
}

/// Stack-based virtual machine.
///
/// The VM is stateless; `execute` takes all necessary context:
/// - `bytecode`: instructions to run.
/// - `vars`: flattened input nonzeros (read-only).
/// - `out`: flattened output nonzeros, written by `Write`.
/// - `stack`: a reusable buffer for intermediate values.
pub struct VM;

impl VM {
    pub fn execute<T: Element>(
        bytecode: &Bytecode,
        vars: &[T],
        out: &mut [T],
        stack: &mut Vec<T>,
    ) -> Result<()> {
        stack.clear();
        let mut temps: Vec<T> = vec![T::zero(); bytecode.n_temps];

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(T::from_f64(val)),
                OpCode::LoadVar(idx) => stack.push(vars[idx].clone()),
                OpCode::LoadTemp(idx) => stack.push(temps[idx].clone()),
                OpCode::StoreTemp(idx) => {
                    let top = stack
                        .last()
                        .ok_or_else(|| anyhow!("Bytecode stack underflow"))?;
                    temps[idx] = top.clone();
                }
                OpCode::Add => {
                    let b = pop(stack)?;
                    let a = pop(stack)?;
                    stack.push(a + b);
                }
                OpCode::Sub => {
                    let b = pop(stack)?;
                    let a = pop(stack)?;
                    stack.push(a - b);
                }
                OpCode::Mul => {
                    let b = pop(stack)?;
                    let a = pop(stack)?;
                    stack.push(a * b);
                }
                OpCode::Div => {
                    let b = pop(stack)?;
                    let a = pop(stack)?;
                    stack.push(a / b);
                }
                OpCode::Sin => {
                    let a = pop(stack)?;
                    stack.push(a.sin());
                }
                OpCode::Cos => {
                    let a = pop(stack)?;
                    stack.push(a.cos());
                }
                OpCode::Exp => {
                    let a = pop(stack)?;
                    stack.push(a.exp());
                }
                OpCode::Log => {
                    let a = pop(stack)?;
                    stack.push(a.ln());
                }
                OpCode::Neg => {
                    let a = pop(stack)?;
                    stack.push(-a);
                }
                OpCode::Write(idx) => out[idx] = pop(stack)?,
            }
        }
        Ok(())
    }

    /// Runs the bytecode on dependency bit masks instead of values: every
    /// operation ORs the masks of its operands, constants carry none.
    pub fn execute_taint(
        bytecode: &Bytecode,
        vars: &[Bvec],
        out: &mut [Bvec],
        stack: &mut Vec<Bvec>,
    ) -> Result<()> {
        stack.clear();
        let mut temps: Vec<Bvec> = vec![0; bytecode.n_temps];

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(_) => stack.push(0),
                OpCode::LoadVar(idx) => stack.push(vars[idx]),
                OpCode::LoadTemp(idx) => stack.push(temps[idx]),
                OpCode::StoreTemp(idx) => {
                    temps[idx] = *stack
                        .last()
                        .ok_or_else(|| anyhow!("Bytecode stack underflow"))?;
                }
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div => {
                    let b = pop(stack)?;
                    let a = pop(stack)?;
                    stack.push(a | b);
                }
                OpCode::Sin | OpCode::Cos | OpCode::Exp | OpCode::Log | OpCode::Neg => {}
                OpCode::Write(idx) => out[idx] = pop(stack)?,
            }
        }
        Ok(())
    }
}
