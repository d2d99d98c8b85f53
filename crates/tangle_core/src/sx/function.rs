use super::vm::{Bytecode, OpCode, VM};
use super::{SxElem, SxNode};
use crate::autodiff::Dual;
use crate::error::GraphError;
use crate::expr::{BinaryOp, UnaryOp};
use crate::nonlinear::NonlinearFunction;
use crate::sparsity::{Bvec, Sparsity};
use crate::traits::Element;
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::fmt;

/// A function over scalar graphs, compiled to stack-machine bytecode.
///
/// Inputs and outputs are lists of nonzeros with an attached sparsity
/// pattern. Subexpressions used more than once are evaluated a single time
/// and kept in a temporary.
#[derive(Clone)]
pub struct SxFunction {
    name: String,
    inputs: Vec<Vec<SxElem>>,
    outputs: Vec<Vec<SxElem>>,
    input_sparsity: Vec<Sparsity>,
    output_sparsity: Vec<Sparsity>,
    bytecode: Bytecode,
}

fn offsets<T>(blocks: &[Vec<T>]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(blocks.len() + 1);
    offsets.push(0);
    for b in blocks {
        offsets.push(offsets[offsets.len() - 1] + b.len());
    }
    offsets
}

fn split_flat<T: Clone>(flat: Vec<T>, offsets: &[usize]) -> Vec<Vec<T>> {
    offsets
        .windows(2)
        .map(|w| flat[w[0]..w[1]].to_vec())
        .collect()
}

struct Compiler {
    var_map: HashMap<*const SxNode, usize>,
    uses: HashMap<*const SxNode, usize>,
    temp_of: HashMap<*const SxNode, usize>,
    n_temps: usize,
}

impl Compiler {
    fn count_uses(&mut self, root: &SxElem) {
        let mut stack = vec![root.clone()];
        while let Some(e) = stack.pop() {
            let count = self.uses.entry(e.key()).or_insert(0);
            *count += 1;
            if *count > 1 {
                continue;
            }
            match e.node() {
                SxNode::Unary { arg, .. } => stack.push(arg.clone()),
                SxNode::Binary { lhs, rhs, .. } => {
                    stack.push(lhs.clone());
                    stack.push(rhs.clone());
                }
                SxNode::Constant(_) | SxNode::Symbol { .. } => {}
            }
        }
    }

    fn compile_recursive(&mut self, e: &SxElem, ops: &mut Vec<OpCode>) -> Result<()> {
        if let Some(&t) = self.temp_of.get(&e.key()) {
            ops.push(OpCode::LoadTemp(t));
            return Ok(());
        }
        match e.node() {
            SxNode::Constant(v) => {
                ops.push(OpCode::LoadConst(*v));
                return Ok(());
            }
            SxNode::Symbol { name } => {
                match self.var_map.get(&e.key()) {
                    Some(&idx) => ops.push(OpCode::LoadVar(idx)),
                    None => bail!("Unknown symbol: {}", name),
                }
                return Ok(());
            }
            SxNode::Unary { op, arg } => {
                self.compile_recursive(arg, ops)?;
                ops.push(match op {
                    UnaryOp::Neg => OpCode::Neg,
                    UnaryOp::Sin => OpCode::Sin,
                    UnaryOp::Cos => OpCode::Cos,
                    UnaryOp::Exp => OpCode::Exp,
                    UnaryOp::Log => OpCode::Log,
                });
            }
            SxNode::Binary { op, lhs, rhs } => {
                self.compile_recursive(lhs, ops)?;
                self.compile_recursive(rhs, ops)?;
                ops.push(match op {
                    BinaryOp::Add => OpCode::Add,
                    BinaryOp::Sub => OpCode::Sub,
                    BinaryOp::Mul => OpCode::Mul,
                    BinaryOp::Div => OpCode::Div,
                });
            }
        }
        if self.uses.get(&e.key()).copied().unwrap_or(0) > 1 {
            let t = self.n_temps;
            self.n_temps += 1;
            self.temp_of.insert(e.key(), t);
            ops.push(OpCode::StoreTemp(t));
        }
        Ok(())
    }
}

impl SxFunction {
    /// Compiles a scalar function. Every input nonzero must be a distinct
    /// symbol and every symbol reachable from the outputs must be an input.
    pub fn new(
        name: &str,
        inputs: Vec<Vec<SxElem>>,
        input_sparsity: Vec<Sparsity>,
        outputs: Vec<Vec<SxElem>>,
        output_sparsity: Vec<Sparsity>,
    ) -> Result<Self> {
        if inputs.len() != input_sparsity.len() || outputs.len() != output_sparsity.len() {
            bail!("{}: one sparsity pattern is required per input and output", name);
        }
        for (index, (x, sp)) in inputs.iter().zip(&input_sparsity).enumerate() {
            if x.len() != sp.nnz() {
                return Err(GraphError::NonzeroCount {
                    index,
                    expected: sp.nnz(),
                    got: x.len(),
                }
                .into());
            }
            if x.iter().any(|e| !e.is_symbolic()) {
                return Err(GraphError::NonSymbolicInput(index).into());
            }
        }
        for (j, (o, sp)) in outputs.iter().zip(&output_sparsity).enumerate() {
            if o.len() != sp.nnz() {
                bail!(
                    "{}: output {} has {} nonzeros, pattern {} expects {}",
                    name,
                    j,
                    o.len(),
                    sp,
                    sp.nnz()
                );
            }
        }

        let mut compiler = Compiler {
            var_map: inputs
                .iter()
                .flatten()
                .enumerate()
                .map(|(i, e)| (e.key(), i))
                .collect(),
            uses: HashMap::new(),
            temp_of: HashMap::new(),
            n_temps: 0,
        };
        for e in outputs.iter().flatten() {
            compiler.count_uses(e);
        }
        let mut ops = Vec::new();
        for (k, e) in outputs.iter().flatten().enumerate() {
            compiler.compile_recursive(e, &mut ops)?;
            ops.push(OpCode::Write(k));
        }
        log::debug!(
            "compiled {} into {} ops with {} temporaries",
            name,
            ops.len(),
            compiler.n_temps
        );

        Ok(Self {
            name: name.to_string(),
            inputs,
            outputs,
            input_sparsity,
            output_sparsity,
            bytecode: Bytecode {
                ops,
                n_temps: compiler.n_temps,
            },
        })
    }

    pub fn inputs(&self) -> &[Vec<SxElem>] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Vec<SxElem>] {
        &self.outputs
    }

    pub fn bytecode(&self) -> &Bytecode {
        &self.bytecode
    }

    fn flatten<T: Clone>(&self, args: &[Vec<T>]) -> Result<Vec<T>> {
        if args.len() != self.inputs.len() {
            return Err(GraphError::ArgumentCount {
                expected: self.inputs.len(),
                got: args.len(),
            }
            .into());
        }
        for (index, (a, x)) in args.iter().zip(&self.inputs).enumerate() {
            if a.len() != x.len() {
                return Err(GraphError::NonzeroCount {
                    index,
                    expected: x.len(),
                    got: a.len(),
                }
                .into());
            }
        }
        Ok(args.iter().flatten().cloned().collect())
    }

    /// Evaluates on nonzero buffers of any element type.
    pub fn evaluate<T: Element>(&self, args: &[Vec<T>]) -> Result<Vec<Vec<T>>> {
        let vars = self.flatten(args)?;
        let out_offsets = offsets(&self.outputs);
        let mut out = vec![T::zero(); out_offsets[out_offsets.len() - 1]];
        let mut stack = Vec::new();
        VM::execute(&self.bytecode, &vars, &mut out, &mut stack)?;
        Ok(split_flat(out, &out_offsets))
    }
}

impl NonlinearFunction for SxFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn n_in(&self) -> usize {
        self.inputs.len()
    }

    fn n_out(&self) -> usize {
        self.outputs.len()
    }

    fn input_sparsity(&self, i: usize) -> &Sparsity {
        &self.input_sparsity[i]
    }

    fn output_sparsity(&self, i: usize) -> &Sparsity {
        &self.output_sparsity[i]
    }

    fn eval(&self, args: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        self.evaluate(args)
    }

    fn eval_dual(&self, args: &[Vec<Dual>]) -> Result<Vec<Vec<Dual>>> {
        self.evaluate(args)
    }

    fn sparsity_forward(&self, seeds: &[Vec<Bvec>]) -> Result<Vec<Vec<Bvec>>> {
        let vars = self.flatten(seeds)?;
        let out_offsets = offsets(&self.outputs);
        let mut out = vec![0; out_offsets[out_offsets.len() - 1]];
        VM::execute_taint(&self.bytecode, &vars, &mut out, &mut Vec::new())?;
        Ok(split_flat(out, &out_offsets))
    }
}

impl fmt::Display for SxFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {} ops", self.name, self.bytecode.ops.len())?;
        for (j, o) in self.outputs.iter().enumerate() {
            let entries: Vec<String> = o.iter().map(ToString::to_string).collect();
            writeln!(f, "  o{j} = [{}]", entries.join(", "))?;
        }
        Ok(())
    }
}

impl fmt::Debug for SxFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SxFunction({})", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn shared() -> SxFunction {
        let x = SxElem::sym("x");
        let y = SxElem::sym("y");
        let p = x.clone() * y.clone();
        let f = p.clone() + p.sin();
        let g = p - y.clone();
        SxFunction::new(
            "shared",
            vec![vec![x, y]],
            vec![Sparsity::column(2)],
            vec![vec![f, g]],
            vec![Sparsity::column(2)],
        )
        .expect("compile")
    }

    #[test]
    fn common_subexpressions_use_one_temporary() {
        let f = shared();
        assert_eq!(f.bytecode().n_temps, 1);
        let out = f.evaluate(&[vec![2.0, 3.0]]).expect("eval");
        assert!((out[0][0] - (6.0 + 6.0_f64.sin())).abs() < 1e-15);
        assert_eq!(out[0][1], 3.0);
    }

    #[test]
    fn dependency_masks_follow_the_graph() {
        let x = SxElem::sym("x");
        let y = SxElem::sym("y");
        let f = SxFunction::new(
            "masks",
            vec![vec![x.clone()], vec![y.clone()]],
            vec![Sparsity::scalar(), Sparsity::scalar()],
            vec![vec![x.exp(), SxElem::constant(2.0), x * y]],
            vec![Sparsity::column(3)],
        )
        .expect("compile");
        let masks = f.sparsity_forward(&[vec![0b01], vec![0b10]]).expect("taint");
        assert_eq!(masks, vec![vec![0b01, 0, 0b11]]);
    }

    #[test]
    fn reports_free_symbols_and_bad_arguments() {
        let x = SxElem::sym("x");
        let z = SxElem::sym("z");
        let result = SxFunction::new(
            "free",
            vec![vec![x.clone()]],
            vec![Sparsity::scalar()],
            vec![vec![x * z]],
            vec![Sparsity::scalar()],
        );
        assert_err_contains(result, "Unknown symbol: z");

        let f = shared();
        assert_err_contains(f.eval(&[vec![1.0]]), "has 1 nonzeros, expected 2");
    }
}
