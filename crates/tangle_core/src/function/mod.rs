//! Functions compiled from expression graphs.
//!
//! A [`Function`] sorts the graph reachable from its outputs into a list of
//! instructions over numbered work slots, one slot per node output. The same
//! instruction list drives numeric, dual-number and symbolic evaluation,
//! inline calls, derivative construction and dependency sweeps.

mod codegen;
mod derivative;

use crate::autodiff::{self, Dual};
use crate::error::GraphError;
use crate::expr::{Expr, Node, Operation};
use crate::nonlinear::NonlinearFunction;
use crate::sparsity::{Bvec, Sparsity};
use crate::sx::{SxElem, SxFunction};
use crate::traits::Element;
use anyhow::Result;
use std::collections::HashMap;
use std::fmt;

#[derive(Clone)]
pub(crate) struct Instruction {
    pub(crate) node: Expr,
    pub(crate) args: Vec<usize>,
    /// `None` marks outputs of a multiple-output node nobody reads.
    pub(crate) res: Vec<Option<usize>>,
}

#[derive(Clone)]
pub struct Function {
    name: String,
    inputs: Vec<Expr>,
    outputs: Vec<Expr>,
    instructions: Vec<Instruction>,
    slots: Vec<Sparsity>,
    input_slots: Vec<usize>,
    output_slots: Vec<usize>,
}

fn alloc(slots: &mut Vec<Sparsity>, sparsity: &Sparsity) -> usize {
    slots.push(sparsity.clone());
    slots.len() - 1
}

impl Function {
    /// Builds a function from purely symbolic inputs to arbitrary outputs.
    /// Every symbol reachable from the outputs must be one of the inputs.
    pub fn new(name: &str, inputs: Vec<Expr>, outputs: Vec<Expr>) -> Result<Self, GraphError> {
        let mut slots = Vec::new();
        let mut slot_of: HashMap<*const Node, Vec<usize>> = HashMap::new();
        let mut input_slots = Vec::with_capacity(inputs.len());
        for (i, x) in inputs.iter().enumerate() {
            if !x.is_symbolic() {
                return Err(GraphError::NonSymbolicInput(i));
            }
            let s = alloc(&mut slots, x.sparsity());
            slot_of.insert(x.key(), vec![s]);
            input_slots.push(s);
        }

        let mut instructions: Vec<Instruction> = Vec::new();
        let mut instruction_of: HashMap<*const Node, usize> = HashMap::new();
        let mut free = Vec::new();

        // Iterative depth-first post-order; deps are sorted before users.
        let mut stack: Vec<(Expr, bool)> =
            outputs.iter().rev().map(|e| (e.clone(), false)).collect();
        while let Some((e, expanded)) = stack.pop() {
            if slot_of.contains_key(&e.key()) {
                continue;
            }
            if !expanded {
                stack.push((e.clone(), true));
                for d in e.deps().iter().rev() {
                    if !slot_of.contains_key(&d.key()) {
                        stack.push((d.clone(), false));
                    }
                }
                continue;
            }
            match e.op() {
                Operation::Symbol { name } => {
                    free.push(name.clone());
                    let s = alloc(&mut slots, e.sparsity());
                    slot_of.insert(e.key(), vec![s]);
                }
                Operation::Output { index } => {
                    let producer = e.deps()[0].key();
                    let s = slot_of[&producer][*index];
                    if let Some(&k) = instruction_of.get(&producer) {
                        instructions[k].res[*index] = Some(s);
                    }
                    slot_of.insert(e.key(), vec![s]);
                }
                _ => {
                    let node = e.node();
                    let res: Vec<usize> = node
                        .output_sparsity()
                        .iter()
                        .map(|sp| alloc(&mut slots, sp))
                        .collect();
                    let args = e.deps().iter().map(|d| slot_of[&d.key()][0]).collect();
                    let required = if res.len() == 1 {
                        vec![Some(res[0])]
                    } else {
                        vec![None; res.len()]
                    };
                    instruction_of.insert(e.key(), instructions.len());
                    instructions.push(Instruction {
                        node: e.clone(),
                        args,
                        res: required,
                    });
                    slot_of.insert(e.key(), res);
                }
            }
        }
        if !free.is_empty() {
            return Err(GraphError::FreeVariables(free));
        }

        let output_slots = outputs.iter().map(|o| slot_of[&o.key()][0]).collect();
        Ok(Self {
            name: name.to_string(),
            inputs,
            outputs,
            instructions,
            slots,
            input_slots,
            output_slots,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_in(&self) -> usize {
        self.inputs.len()
    }

    pub fn n_out(&self) -> usize {
        self.outputs.len()
    }

    pub fn input(&self, i: usize) -> &Expr {
        &self.inputs[i]
    }

    pub fn output(&self, i: usize) -> &Expr {
        &self.outputs[i]
    }

    pub fn inputs(&self) -> &[Expr] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Expr] {
        &self.outputs
    }

    pub fn input_sparsity(&self, i: usize) -> &Sparsity {
        self.inputs[i].sparsity()
    }

    pub fn output_sparsity(&self, i: usize) -> &Sparsity {
        self.outputs[i].sparsity()
    }

    /// Number of instructions (non-symbol nodes) in the sorted graph.
    pub fn n_instructions(&self) -> usize {
        self.instructions.len()
    }

    fn check_nnz<I: IntoIterator<Item = usize>>(&self, lens: I) -> Result<(), GraphError> {
        let lens: Vec<usize> = lens.into_iter().collect();
        if lens.len() != self.n_in() {
            return Err(GraphError::ArgumentCount {
                expected: self.n_in(),
                got: lens.len(),
            });
        }
        for (index, (&got, x)) in lens.iter().zip(&self.inputs).enumerate() {
            if got != x.nnz() {
                return Err(GraphError::NonzeroCount {
                    index,
                    expected: x.nnz(),
                    got,
                });
            }
        }
        Ok(())
    }

    /// Evaluates on nonzero buffers of any element type.
    pub fn eval_generic<T: Element>(&self, args: &[&[T]]) -> Result<Vec<Vec<T>>> {
        self.check_nnz(args.iter().map(|a| a.len()))?;
        let mut work: Vec<Vec<T>> = self
            .slots
            .iter()
            .map(|sp| vec![T::zero(); sp.nnz()])
            .collect();
        for (&s, a) in self.input_slots.iter().zip(args) {
            work[s].clone_from_slice(a);
        }
        for ins in &self.instructions {
            let mut outs: Vec<Option<Vec<T>>> = ins
                .res
                .iter()
                .map(|r| r.map(|s| std::mem::take(&mut work[s])))
                .collect();
            {
                let arg_bufs: Vec<&[T]> = ins.args.iter().map(|&s| work[s].as_slice()).collect();
                let mut res: Vec<Option<&mut [T]>> =
                    outs.iter_mut().map(|o| o.as_deref_mut()).collect();
                ins.node.node().eval_nz(&arg_bufs, &mut res);
            }
            for (r, out) in ins.res.iter().zip(outs) {
                if let (Some(s), Some(v)) = (r, out) {
                    work[*s] = v;
                }
            }
        }
        Ok(self.output_slots.iter().map(|&s| work[s].clone()).collect())
    }

    /// Numeric evaluation on input nonzeros.
    pub fn evaluate(&self, args: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        let refs: Vec<&[f64]> = args.iter().map(Vec::as_slice).collect();
        self.eval_generic(&refs)
    }

    /// Numeric evaluation with forward sensitivities. `fwd_seeds[d][i]` is the
    /// seed of direction `d` on input `i`; the result holds the outputs and
    /// `fwd_sens[d][j]` for every output `j`.
    pub fn evaluate_fwd(
        &self,
        args: &[Vec<f64>],
        fwd_seeds: &[Vec<Vec<f64>>],
    ) -> Result<(Vec<Vec<f64>>, Vec<Vec<Vec<f64>>>)> {
        let mut outputs = match fwd_seeds.first() {
            Some(_) => Vec::new(),
            None => self.evaluate(args)?,
        };
        let mut sens = Vec::with_capacity(fwd_seeds.len());
        for seeds in fwd_seeds {
            self.check_nnz(seeds.iter().map(Vec::len))?;
            let duals: Vec<Vec<Dual>> = args
                .iter()
                .zip(seeds)
                .map(|(a, s)| autodiff::seed(a, s))
                .collect();
            let out = self.eval_dual(&duals)?;
            let (values, derivatives): (Vec<_>, Vec<_>) =
                out.iter().map(|o| autodiff::unzip(o)).unzip();
            outputs = values;
            sens.push(derivatives);
        }
        Ok((outputs, sens))
    }

    /// Evaluation on symbolic scalars.
    pub fn evaluate_sx(&self, args: &[Vec<SxElem>]) -> Result<Vec<Vec<SxElem>>> {
        let refs: Vec<&[SxElem]> = args.iter().map(Vec::as_slice).collect();
        self.eval_generic(&refs)
    }

    /// Calls the function on symbolic arguments, expanding its graph inline
    /// so the result can itself be differentiated. Arguments must have the
    /// declared input shapes and are projected onto the input patterns.
    pub fn call(&self, args: &[Expr]) -> Result<Vec<Expr>, GraphError> {
        if args.len() != self.n_in() {
            return Err(GraphError::ArgumentCount {
                expected: self.n_in(),
                got: args.len(),
            });
        }
        let placeholder = Expr::zeros(0, 0);
        let mut work = vec![placeholder; self.slots.len()];
        for (index, ((&s, arg), x)) in self
            .input_slots
            .iter()
            .zip(args)
            .zip(&self.inputs)
            .enumerate()
        {
            if arg.shape() != x.shape() {
                return Err(GraphError::ArgumentShape {
                    index,
                    expected: x.shape(),
                    got: arg.shape(),
                });
            }
            work[s] = arg.project(x.sparsity())?;
        }
        for ins in &self.instructions {
            let node = ins.node.node();
            let outs = if node.deps().is_empty() {
                vec![ins.node.clone()]
            } else {
                let arg_exprs: Vec<Expr> = ins.args.iter().map(|&s| work[s].clone()).collect();
                node.eval_expr(&arg_exprs)?
            };
            for (r, out) in ins.res.iter().zip(outs) {
                if let Some(s) = r {
                    work[*s] = out;
                }
            }
        }
        Ok(self.output_slots.iter().map(|&s| work[s].clone()).collect())
    }

    /// Scalar-graph form of this function.
    pub fn expand(&self) -> Result<SxFunction> {
        let args: Vec<Vec<SxElem>> = self
            .inputs
            .iter()
            .enumerate()
            .map(|(i, x)| {
                let base = x.name().map_or_else(|| format!("i{i}"), str::to_string);
                (0..x.nnz())
                    .map(|k| SxElem::sym(&format!("{base}_{k}")))
                    .collect()
            })
            .collect();
        let outs = self.evaluate_sx(&args)?;
        SxFunction::new(
            &self.name,
            args,
            self.inputs.iter().map(|x| x.sparsity().clone()).collect(),
            outs,
            self.outputs.iter().map(|o| o.sparsity().clone()).collect(),
        )
    }

    /// Primal expressions for the outputs of an instruction's node.
    fn primal_outputs(node: &Expr) -> Vec<Expr> {
        match node.node().n_out() {
            1 => vec![node.clone()],
            n => (0..n).map(|i| Expr::output(node, i)).collect(),
        }
    }

    fn input_name(&self, i: usize) -> String {
        self.inputs[i]
            .name()
            .map_or_else(|| format!("i{i}"), str::to_string)
    }
}

impl NonlinearFunction for Function {
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
        self.inputs[i].sparsity()
    }

    fn output_sparsity(&self, i: usize) -> &Sparsity {
        self.outputs[i].sparsity()
    }

    fn eval(&self, args: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        self.evaluate(args)
    }

    fn eval_dual(&self, args: &[Vec<Dual>]) -> Result<Vec<Vec<Dual>>> {
        let refs: Vec<&[Dual]> = args.iter().map(Vec::as_slice).collect();
        self.eval_generic(&refs)
    }

    fn sparsity_forward(&self, seeds: &[Vec<Bvec>]) -> Result<Vec<Vec<Bvec>>> {
        Function::sparsity_forward(self, seeds)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let describe = |e: &Expr| -> String {
            let sp = e.sparsity();
            let label = e.name().unwrap_or("o");
            if sp.is_scalar() && sp.is_dense() {
                label.to_string()
            } else {
                format!("{label}[{}x{},{}nz]", sp.nrows(), sp.ncols(), sp.nnz())
            }
        };
        let ins: Vec<String> = self.inputs.iter().map(describe).collect();
        let outs: Vec<String> = self.outputs.iter().map(describe).collect();
        write!(f, "{}:({})->({})", self.name, ins.join(","), outs.join(","))
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({self})")
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

    fn rosenbrock() -> Function {
        let x = Expr::sym_vector("x", 2);
        let parts = x.vertsplit(&[0, 1, 2]).expect("split");
        let (a, b) = (&parts[0], &parts[1]);
        let one_minus = &Expr::scalar(1.0) - a;
        let gap = b - &(a * a);
        let f = &(&one_minus * &one_minus) + &(&Expr::scalar(100.0) * &(&gap * &gap));
        Function::new("rosenbrock", vec![x], vec![f]).expect("function")
    }

    #[test]
    fn evaluates_numerically() {
        let f = rosenbrock();
        let out = f.evaluate(&[vec![1.0, 1.0]]).expect("eval");
        assert_eq!(out, vec![vec![0.0]]);
        let out = f.evaluate(&[vec![0.0, 1.0]]).expect("eval");
        assert_eq!(out, vec![vec![101.0]]);
    }

    #[test]
    fn rejects_bad_arguments() {
        let f = rosenbrock();
        assert_err_contains(f.evaluate(&[]), "Expected 1 arguments, got 0");
        assert_err_contains(f.evaluate(&[vec![1.0]]), "has 1 nonzeros, expected 2");
    }

    #[test]
    fn inputs_must_be_symbols_and_cover_the_graph() {
        let x = Expr::sym_scalar("x");
        let y = Expr::sym_scalar("y");
        let err = Function::new("f", vec![&x * &y], vec![x.clone()]).expect_err("non-symbolic");
        assert_eq!(err, GraphError::NonSymbolicInput(0));

        let err = Function::new("f", vec![x.clone()], vec![&x * &y]).expect_err("free");
        assert_eq!(err, GraphError::FreeVariables(vec!["y".to_string()]));
    }

    #[test]
    fn forward_sensitivities_match_the_gradient() {
        let f = rosenbrock();
        let (out, sens) = f
            .evaluate_fwd(
                &[vec![0.5, 2.0]],
                &[vec![vec![1.0, 0.0]], vec![vec![0.0, 1.0]]],
            )
            .expect("fwd");
        // f = (1-a)^2 + 100 (b-a^2)^2
        let (a, b): (f64, f64) = (0.5, 2.0);
        assert!((out[0][0] - ((1.0 - a).powi(2) + 100.0 * (b - a * a).powi(2))).abs() < 1e-12);
        let dfa = -2.0 * (1.0 - a) - 400.0 * a * (b - a * a);
        let dfb = 200.0 * (b - a * a);
        assert!((sens[0][0][0] - dfa).abs() < 1e-12);
        assert!((sens[1][0][0] - dfb).abs() < 1e-12);
    }

    #[test]
    fn call_expands_inline() {
        let f = rosenbrock();
        let z = Expr::sym_vector("z", 2);
        let g_expr = f.call(&[&z * 2.0]).expect("call");
        let g = Function::new("g", vec![z], g_expr).expect("function");
        let out = g.evaluate(&[vec![0.5, 0.5]]).expect("eval");
        assert_eq!(out, vec![vec![0.0]]);

        let wrong = Expr::sym_vector("w", 3);
        assert_eq!(
            f.call(&[wrong]).expect_err("shape"),
            GraphError::ArgumentShape {
                index: 0,
                expected: (2, 1),
                got: (3, 1)
            }
        );
    }

    #[test]
    fn unread_split_outputs_are_not_required() {
        let x = Expr::sym_vector("x", 3);
        let parts = x.vertsplit(&[0, 1, 2, 3]).expect("split");
        let f = Function::new("last", vec![x], vec![parts[2].clone()]).expect("function");
        let split = f
            .instructions
            .iter()
            .find(|ins| ins.node.op().is_split())
            .expect("split instruction");
        assert_eq!(split.res.iter().filter(|r| r.is_some()).count(), 1);
        assert!(split.res[2].is_some());
        assert_eq!(f.evaluate(&[vec![1.0, 2.0, 3.0]]).expect("eval"), vec![vec![3.0]]);
    }

    #[test]
    fn expansion_matches_graph_evaluation() {
        let f = rosenbrock();
        let sx = f.expand().expect("expand");
        let args = vec![vec![0.3, -0.7]];
        let direct = f.evaluate(&args).expect("eval");
        let expanded = sx.eval(&args).expect("eval");
        assert!((direct[0][0] - expanded[0][0]).abs() < 1e-12);
    }

    #[test]
    fn display_lists_signature() {
        let f = rosenbrock();
        assert_eq!(f.to_string(), "rosenbrock:(x[2x1,2nz])->(o)");
    }
}
