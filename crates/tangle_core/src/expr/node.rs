use super::{concat, elementwise, inner_prod, permute, split, Expr};
use crate::error::GraphError;
use crate::sparsity::{Bvec, Sparsity};
use crate::traits::Element;

/// Elementwise unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Sin,
    Cos,
    Exp,
    Log,
}

impl UnaryOp {
    pub fn apply<T: Element>(self, x: &T) -> T {
        match self {
            UnaryOp::Neg => -x.clone(),
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
        }
    }

    /// f(0) == 0, so structural zeros stay structural zeros.
    pub(crate) fn preserves_zero(self) -> bool {
        matches!(self, UnaryOp::Neg | UnaryOp::Sin)
    }

    pub(crate) fn c_expr(self, x: &str) -> String {
        match self {
            UnaryOp::Neg => format!("(-{x})"),
            _ => format!("{}({x})", self.name()),
        }
    }
}

/// Elementwise binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn apply<T: Element>(self, a: T, b: T) -> T {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
        }
    }

    pub fn symbol(self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
        }
    }
}

/// Which operand of a binary node, if any, is a scalar applied to every
/// nonzero of the other operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Broadcast {
    None,
    Lhs,
    Rhs,
}

/// The closed set of node kinds.
///
/// Split nodes store their offset table in nonzero units: output `i` owns
/// the half-open range `offset[i]..offset[i + 1]` of the input's nonzeros.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Symbol { name: String },
    Constant { nz: Vec<f64> },
    Unary(UnaryOp),
    Binary { op: BinaryOp, broadcast: Broadcast },
    InnerProd,
    /// `mapping[k]` is the input nonzero feeding output nonzero `k`.
    Transpose { mapping: Vec<usize> },
    /// Like `Transpose`, with `None` for entries absent from the input.
    Project { mapping: Vec<Option<usize>> },
    Horzcat,
    Vertcat,
    Diagcat,
    Horzsplit { offset: Vec<usize> },
    Vertsplit { offset: Vec<usize> },
    Diagsplit { offset: Vec<usize> },
    /// Output `index` of a multiple-output node.
    Output { index: usize },
}

impl Operation {
    pub fn is_split(&self) -> bool {
        matches!(
            self,
            Operation::Horzsplit { .. } | Operation::Vertsplit { .. } | Operation::Diagsplit { .. }
        )
    }
}

/// Immutable graph node: an operation, its dependencies and one sparsity
/// pattern per output.
#[derive(Debug)]
pub struct Node {
    op: Operation,
    deps: Vec<Expr>,
    sparsity: Vec<Sparsity>,
}

impl Node {
    pub(crate) fn new(op: Operation, deps: Vec<Expr>, sparsity: Vec<Sparsity>) -> Self {
        Self { op, deps, sparsity }
    }

    pub fn op(&self) -> &Operation {
        &self.op
    }

    pub fn deps(&self) -> &[Expr] {
        &self.deps
    }

    pub fn sparsity(&self, index: usize) -> &Sparsity {
        &self.sparsity[index]
    }

    pub fn output_sparsity(&self) -> &[Sparsity] {
        &self.sparsity
    }

    pub fn n_out(&self) -> usize {
        self.sparsity.len()
    }

    /// Evaluates the node on nonzero buffers. Works for any element type, so
    /// the same code serves numeric, dual-number and symbolic scalar
    /// evaluation. `None` result slots are not required by the caller.
    ///
    /// Symbols are bound by the caller, and `Output` references share the
    /// buffer of their producer, so neither does anything here.
    pub fn eval_nz<T: Element>(&self, args: &[&[T]], res: &mut [Option<&mut [T]>]) {
        match &self.op {
            Operation::Symbol { .. } | Operation::Output { .. } => {}
            Operation::Constant { nz } => {
                if let Some(out) = res[0].as_deref_mut() {
                    for (o, &v) in out.iter_mut().zip(nz) {
                        *o = T::from_f64(v);
                    }
                }
            }
            Operation::Unary(op) => {
                if let Some(out) = res[0].as_deref_mut() {
                    elementwise::eval_unary(*op, args[0], out);
                }
            }
            Operation::Binary { op, broadcast } => {
                if let Some(out) = res[0].as_deref_mut() {
                    elementwise::eval_binary(*op, *broadcast, args[0], args[1], out);
                }
            }
            Operation::InnerProd => {
                if let Some(out) = res[0].as_deref_mut() {
                    inner_prod::eval(args[0], args[1], out);
                }
            }
            Operation::Transpose { mapping } => {
                if let Some(out) = res[0].as_deref_mut() {
                    permute::eval_transpose(mapping, args[0], out);
                }
            }
            Operation::Project { mapping } => {
                if let Some(out) = res[0].as_deref_mut() {
                    permute::eval_project(mapping, args[0], out);
                }
            }
            Operation::Horzcat | Operation::Vertcat | Operation::Diagcat => {
                if let Some(out) = res[0].as_deref_mut() {
                    concat::eval(args, out);
                }
            }
            Operation::Horzsplit { offset }
            | Operation::Vertsplit { offset }
            | Operation::Diagsplit { offset } => split::eval(offset, args[0], res),
        }
    }

    /// Propagates dependency-taint bits. Forward: result bits become the
    /// union of the bits they depend on. Reverse: result bits are OR-ed into
    /// the arguments they depend on and then cleared.
    pub fn propagate_sparsity(
        &self,
        args: &mut [&mut [Bvec]],
        res: &mut [Option<&mut [Bvec]>],
        fwd: bool,
    ) {
        match &self.op {
            Operation::Symbol { .. } | Operation::Output { .. } => {}
            Operation::Constant { .. } => {
                if let Some(out) = res[0].as_deref_mut() {
                    out.fill(0);
                }
            }
            Operation::Unary(_) => {
                if let Some(out) = res[0].as_deref_mut() {
                    elementwise::propagate_unary(args, out, fwd);
                }
            }
            Operation::Binary { broadcast, .. } => {
                if let Some(out) = res[0].as_deref_mut() {
                    elementwise::propagate_binary(*broadcast, args, out, fwd);
                }
            }
            Operation::InnerProd => {
                if let Some(out) = res[0].as_deref_mut() {
                    inner_prod::propagate(args, out, fwd);
                }
            }
            Operation::Transpose { mapping } => {
                if let Some(out) = res[0].as_deref_mut() {
                    let mapping: Vec<Option<usize>> = mapping.iter().map(|&k| Some(k)).collect();
                    permute::propagate(&mapping, args, out, fwd);
                }
            }
            Operation::Project { mapping } => {
                if let Some(out) = res[0].as_deref_mut() {
                    permute::propagate(mapping, args, out, fwd);
                }
            }
            Operation::Horzcat | Operation::Vertcat | Operation::Diagcat => {
                if let Some(out) = res[0].as_deref_mut() {
                    concat::propagate(args, out, fwd);
                }
            }
            Operation::Horzsplit { offset }
            | Operation::Vertsplit { offset }
            | Operation::Diagsplit { offset } => split::propagate(offset, args, res, fwd),
        }
    }

    /// Rebuilds the node on new symbolic arguments, returning one expression
    /// per output. Arguments are first projected onto the patterns of the
    /// original dependencies.
    pub fn eval_expr(&self, args: &[Expr]) -> Result<Vec<Expr>, GraphError> {
        if let Operation::Output { index } = &self.op {
            let producer = args.first().ok_or(GraphError::ArgumentCount {
                expected: 1,
                got: 0,
            })?;
            return Ok(vec![Expr::output(producer, *index)]);
        }
        let args = self.align_args(args)?;
        let out = match &self.op {
            Operation::Symbol { .. } => vec![args
                .first()
                .cloned()
                .ok_or(GraphError::ArgumentCount {
                    expected: 1,
                    got: 0,
                })?],
            Operation::Constant { nz } => {
                vec![Expr::constant_unchecked(nz.clone(), self.sparsity[0].clone())]
            }
            Operation::Unary(op) => vec![args[0].unary(*op)],
            Operation::Binary { op, .. } => vec![args[0].try_binary(*op, &args[1])?],
            Operation::InnerProd => vec![args[0].dot(&args[1])?],
            Operation::Transpose { .. } => vec![args[0].transpose()],
            Operation::Project { .. } => vec![args[0].project(&self.sparsity[0])?],
            Operation::Horzcat => vec![Expr::horzcat(&args)?],
            Operation::Vertcat => vec![Expr::vertcat(&args)?],
            Operation::Diagcat => vec![Expr::diagcat(&args)],
            Operation::Horzsplit { .. }
            | Operation::Vertsplit { .. }
            | Operation::Diagsplit { .. } => split::rebuild(self, &args[0])?,
            Operation::Output { .. } => unreachable!("handled above"),
        };
        self.align_results(out)
    }

    /// Forward-mode propagation. `outputs` are the primal results of this
    /// node, `fseed[d][i]` the seed of direction `d` on argument `i`. Returns
    /// `fsens[d][j]`, the sensitivity of output `j` in direction `d`.
    pub fn eval_fwd(
        &self,
        outputs: &[Expr],
        fseed: &[Vec<Expr>],
    ) -> Result<Vec<Vec<Expr>>, GraphError> {
        let mut fsens = Vec::with_capacity(fseed.len());
        for seeds in fseed {
            // Symbols and output references pass their seed through.
            if matches!(self.op, Operation::Symbol { .. } | Operation::Output { .. }) {
                let seed = match seeds.first() {
                    Some(s) => s.clone(),
                    None => Expr::zeros(self.sparsity[0].nrows(), self.sparsity[0].ncols()),
                };
                fsens.push(self.align_results(vec![seed])?);
                continue;
            }
            let seeds = self.align_args(seeds)?;
            let sens = match &self.op {
                Operation::Symbol { .. } | Operation::Output { .. } => {
                    unreachable!("handled above")
                }
                Operation::Constant { .. } => vec![Expr::zeros(
                    self.sparsity[0].nrows(),
                    self.sparsity[0].ncols(),
                )],
                Operation::Unary(op) => {
                    vec![elementwise::fwd_unary(*op, &self.deps[0], &outputs[0], &seeds[0])?]
                }
                Operation::Binary { op, .. } => vec![elementwise::fwd_binary(
                    *op,
                    &self.deps,
                    &outputs[0],
                    &seeds,
                )?],
                Operation::InnerProd => vec![inner_prod::fwd(&self.deps, &seeds)?],
                Operation::Transpose { .. } => vec![seeds[0].transpose()],
                Operation::Project { .. } => vec![seeds[0].project(&self.sparsity[0])?],
                Operation::Horzcat => vec![Expr::horzcat(&seeds)?],
                Operation::Vertcat => vec![Expr::vertcat(&seeds)?],
                Operation::Diagcat => vec![Expr::diagcat(&seeds)],
                Operation::Horzsplit { .. }
                | Operation::Vertsplit { .. }
                | Operation::Diagsplit { .. } => split::rebuild(self, &seeds[0])?,
            };
            fsens.push(self.align_results(sens)?);
        }
        Ok(fsens)
    }

    /// Reverse-mode propagation. `aseed[d][j]` is the adjoint seed of output
    /// `j` in direction `d` (`None` is a zero seed). Contributions are added
    /// into `asens[d][i]` for argument `i`; consumed seeds are cleared.
    pub fn eval_adj(
        &self,
        outputs: &[Expr],
        aseed: &mut [Vec<Option<Expr>>],
        asens: &mut [Vec<Option<Expr>>],
    ) -> Result<(), GraphError> {
        for (seeds, sens) in aseed.iter_mut().zip(asens.iter_mut()) {
            if self.op.is_split() {
                split::adj(self, seeds, sens)?;
                continue;
            }
            let Some(seed) = seeds.first_mut().and_then(Option::take) else {
                continue;
            };
            match &self.op {
                Operation::Symbol { .. } | Operation::Constant { .. } => {}
                Operation::Output { .. } => {
                    // Never dispatched: output references share their producer's slot.
                }
                Operation::Unary(op) => {
                    elementwise::adj_unary(*op, &self.deps[0], &outputs[0], &seed, sens)?
                }
                Operation::Binary { op, broadcast } => elementwise::adj_binary(
                    *op,
                    *broadcast,
                    &self.deps,
                    &outputs[0],
                    &seed,
                    sens,
                )?,
                Operation::InnerProd => inner_prod::adj(&self.deps, &seed, sens)?,
                Operation::Transpose { .. } => {
                    super::accumulate(&mut sens[0], seed.transpose(), self.deps[0].sparsity())?
                }
                Operation::Project { .. } => super::accumulate(
                    &mut sens[0],
                    seed.project(self.deps[0].sparsity())?,
                    self.deps[0].sparsity(),
                )?,
                Operation::Horzcat | Operation::Vertcat | Operation::Diagcat => {
                    concat::adj(self, &seed, sens)?
                }
                Operation::Horzsplit { .. }
                | Operation::Vertsplit { .. }
                | Operation::Diagsplit { .. } => {}
            }
        }
        Ok(())
    }

    /// Appends C statements computing this node. `arg` and `res` name the
    /// nonzero buffers; a result named `"0"` is not required.
    pub fn generate(&self, arg: &[String], res: &[String], code: &mut String) {
        match &self.op {
            Operation::Symbol { .. } | Operation::Output { .. } => {}
            Operation::Constant { nz } => {
                for (k, v) in nz.iter().enumerate() {
                    code.push_str(&format!("  {}[{}] = {:?};\n", res[0], k, v));
                }
            }
            Operation::Unary(op) => elementwise::generate_unary(*op, self, arg, res, code),
            Operation::Binary { op, broadcast } => {
                elementwise::generate_binary(*op, *broadcast, self, arg, res, code)
            }
            Operation::InnerProd => inner_prod::generate(self, arg, res, code),
            Operation::Transpose { mapping } => {
                for (k, &i) in mapping.iter().enumerate() {
                    code.push_str(&format!("  {}[{}] = {}[{}];\n", res[0], k, arg[0], i));
                }
            }
            Operation::Project { mapping } => {
                for (k, i) in mapping.iter().enumerate() {
                    match i {
                        Some(i) => {
                            code.push_str(&format!("  {}[{}] = {}[{}];\n", res[0], k, arg[0], i))
                        }
                        None => code.push_str(&format!("  {}[{}] = 0;\n", res[0], k)),
                    }
                }
            }
            Operation::Horzcat | Operation::Vertcat | Operation::Diagcat => {
                concat::generate(self, arg, res, code)
            }
            Operation::Horzsplit { offset }
            | Operation::Vertsplit { offset }
            | Operation::Diagsplit { offset } => split::generate(offset, arg, res, code),
        }
    }

    /// Human-readable form given the printed dependencies.
    pub fn print(&self, args: &[String]) -> String {
        match &self.op {
            Operation::Symbol { name } => name.clone(),
            Operation::Constant { nz } => {
                if self.sparsity[0].is_scalar() && nz.len() == 1 {
                    format!("{}", nz[0])
                } else if nz.iter().all(|&v| v == 0.0) {
                    format!("zeros({}x{})", self.sparsity[0].nrows(), self.sparsity[0].ncols())
                } else {
                    format!("const({nz:?})")
                }
            }
            Operation::Unary(UnaryOp::Neg) => format!("(-{})", args[0]),
            Operation::Unary(op) => format!("{}({})", op.name(), args[0]),
            Operation::Binary { op, .. } => format!("({}{}{})", args[0], op.symbol(), args[1]),
            Operation::InnerProd => format!("inner_prod({}, {})", args[0], args[1]),
            Operation::Transpose { .. } => format!("{}'", args[0]),
            Operation::Project { .. } => format!("project({})", args[0]),
            Operation::Horzcat => format!("horzcat({})", args.join(", ")),
            Operation::Vertcat => format!("vertcat({})", args.join(", ")),
            Operation::Diagcat => format!("diagcat({})", args.join(", ")),
            Operation::Horzsplit { .. } => format!("horzsplit({})", args[0]),
            Operation::Vertsplit { .. } => format!("vertsplit({})", args[0]),
            Operation::Diagsplit { .. } => format!("diagsplit({})", args[0]),
            Operation::Output { index } => format!("{}{{{}}}", args[0], index),
        }
    }

    fn align_args(&self, args: &[Expr]) -> Result<Vec<Expr>, GraphError> {
        if args.len() != self.deps.len() && !self.deps.is_empty() {
            return Err(GraphError::ArgumentCount {
                expected: self.deps.len(),
                got: args.len(),
            });
        }
        args.iter()
            .zip(self.deps.iter().map(|d| d.sparsity()).chain(std::iter::repeat(&self.sparsity[0])))
            .map(|(a, sp)| a.project(sp))
            .collect()
    }

    fn align_results(&self, out: Vec<Expr>) -> Result<Vec<Expr>, GraphError> {
        out.into_iter()
            .zip(&self.sparsity)
            .map(|(e, sp)| e.project(sp))
            .collect()
    }
}
