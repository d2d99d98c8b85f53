use super::node::{BinaryOp, Broadcast, Node, Operation, UnaryOp};
use super::{accumulate, Expr};
use crate::error::GraphError;
use crate::sparsity::Bvec;
use crate::traits::Element;

impl Expr {
    /// Elementwise unary operation. Operations with f(0) != 0 densify their
    /// argument first.
    pub fn unary(&self, op: UnaryOp) -> Expr {
        let x = if op.preserves_zero() {
            self.clone()
        } else {
            self.densify()
        };
        if let Some(nz) = x.constant_nz() {
            let folded = nz.iter().map(|v| op.apply(v)).collect();
            return Expr::constant_unchecked(folded, x.sparsity().clone());
        }
        if op == UnaryOp::Neg {
            if let Operation::Unary(UnaryOp::Neg) = x.op() {
                return x.deps()[0].clone();
            }
        }
        let sparsity = x.sparsity().clone();
        Expr::from_node(Node::new(Operation::Unary(op), vec![x], vec![sparsity]))
    }

    pub fn sin(&self) -> Expr {
        self.unary(UnaryOp::Sin)
    }

    pub fn cos(&self) -> Expr {
        self.unary(UnaryOp::Cos)
    }

    pub fn exp(&self) -> Expr {
        self.unary(UnaryOp::Exp)
    }

    pub fn ln(&self) -> Expr {
        self.unary(UnaryOp::Log)
    }

    /// Elementwise binary operation.
    ///
    /// Operands of equal shape are projected onto the union of their
    /// patterns. A 1x1 operand is broadcast over every nonzero of the other
    /// one; when the operation does not map structural zeros to zero, the
    /// broadcast target is densified.
    pub fn try_binary(&self, op: BinaryOp, other: &Expr) -> Result<Expr, GraphError> {
        let (a, b, broadcast) = if self.shape() == other.shape() {
            let union = self.sparsity().union(other.sparsity())?;
            (self.project(&union)?, other.project(&union)?, Broadcast::None)
        } else if self.sparsity().is_scalar() {
            let b = match op {
                BinaryOp::Mul => other.clone(),
                _ => other.densify(),
            };
            (self.densify(), b, Broadcast::Lhs)
        } else if other.sparsity().is_scalar() {
            let a = match op {
                BinaryOp::Mul | BinaryOp::Div => self.clone(),
                _ => self.densify(),
            };
            (a, other.densify(), Broadcast::Rhs)
        } else {
            return Err(GraphError::ShapeMismatch {
                op: op.name(),
                details: format!("{:?} vs {:?}", self.shape(), other.shape()),
            });
        };

        let sparsity = match broadcast {
            Broadcast::Lhs => b.sparsity().clone(),
            Broadcast::None | Broadcast::Rhs => a.sparsity().clone(),
        };

        if let (Some(x), Some(y)) = (a.constant_nz(), b.constant_nz()) {
            let mut nz = vec![0.0; sparsity.nnz()];
            eval_binary(op, broadcast, x, y, &mut nz);
            return Ok(Expr::constant_unchecked(nz, sparsity));
        }

        let same_as = |e: &Expr| e.sparsity() == &sparsity;
        match op {
            BinaryOp::Add if a.is_zero_constant() && same_as(&b) => return Ok(b),
            BinaryOp::Add | BinaryOp::Sub if b.is_zero_constant() && same_as(&a) => return Ok(a),
            BinaryOp::Sub if a.is_zero_constant() && same_as(&b) => return Ok(-&b),
            BinaryOp::Mul if a.is_zero_constant() || b.is_zero_constant() => {
                return Ok(Expr::constant_unchecked(
                    vec![0.0; sparsity.nnz()],
                    sparsity.clone(),
                ))
            }
            BinaryOp::Mul if a.is_one_constant() && same_as(&b) => return Ok(b),
            BinaryOp::Mul | BinaryOp::Div if b.is_one_constant() && same_as(&a) => return Ok(a),
            _ => {}
        }

        Ok(Expr::from_node(Node::new(
            Operation::Binary { op, broadcast },
            vec![a, b],
            vec![sparsity],
        )))
    }
}

fn operand_index(broadcast: Broadcast, k: usize) -> (usize, usize) {
    match broadcast {
        Broadcast::None => (k, k),
        Broadcast::Lhs => (0, k),
        Broadcast::Rhs => (k, 0),
    }
}

pub(super) fn eval_unary<T: Element>(op: UnaryOp, x: &[T], out: &mut [T]) {
    for (o, v) in out.iter_mut().zip(x) {
        *o = op.apply(v);
    }
}

pub(super) fn eval_binary<T: Element>(
    op: BinaryOp,
    broadcast: Broadcast,
    a: &[T],
    b: &[T],
    out: &mut [T],
) {
    for (k, o) in out.iter_mut().enumerate() {
        let (i, j) = operand_index(broadcast, k);
        *o = op.apply(a[i].clone(), b[j].clone());
    }
}

pub(super) fn propagate_unary(args: &mut [&mut [Bvec]], out: &mut [Bvec], fwd: bool) {
    let x = &mut *args[0];
    if fwd {
        out.copy_from_slice(x);
    } else {
        for (xi, oi) in x.iter_mut().zip(out.iter_mut()) {
            *xi |= *oi;
            *oi = 0;
        }
    }
}

pub(super) fn propagate_binary(
    broadcast: Broadcast,
    args: &mut [&mut [Bvec]],
    out: &mut [Bvec],
    fwd: bool,
) {
    let (a, b) = match args {
        [a, b, ..] => (a, b),
        _ => return,
    };
    for (k, o) in out.iter_mut().enumerate() {
        let (i, j) = operand_index(broadcast, k);
        if fwd {
            *o = a[i] | b[j];
        } else {
            a[i] |= *o;
            b[j] |= *o;
            *o = 0;
        }
    }
}

pub(super) fn fwd_unary(op: UnaryOp, x: &Expr, out: &Expr, dx: &Expr) -> Result<Expr, GraphError> {
    Ok(match op {
        UnaryOp::Neg => -dx,
        UnaryOp::Sin => dx.try_mul(&x.cos())?,
        UnaryOp::Cos => -dx.try_mul(&x.sin())?,
        UnaryOp::Exp => dx.try_mul(out)?,
        UnaryOp::Log => dx.try_div(x)?,
    })
}

pub(super) fn fwd_binary(
    op: BinaryOp,
    deps: &[Expr],
    out: &Expr,
    seeds: &[Expr],
) -> Result<Expr, GraphError> {
    let (a, b) = (&deps[0], &deps[1]);
    let (da, db) = (&seeds[0], &seeds[1]);
    match op {
        BinaryOp::Add => da.try_add(db),
        BinaryOp::Sub => da.try_sub(db),
        BinaryOp::Mul => da.try_mul(b)?.try_add(&a.try_mul(db)?),
        BinaryOp::Div => da.try_sub(&out.try_mul(db)?)?.try_div(b),
    }
}

pub(super) fn adj_unary(
    op: UnaryOp,
    x: &Expr,
    out: &Expr,
    seed: &Expr,
    sens: &mut [Option<Expr>],
) -> Result<(), GraphError> {
    let contribution = match op {
        UnaryOp::Neg => -seed,
        UnaryOp::Sin => seed.try_mul(&x.cos())?,
        UnaryOp::Cos => -seed.try_mul(&x.sin())?,
        UnaryOp::Exp => seed.try_mul(out)?,
        UnaryOp::Log => seed.try_div(x)?,
    };
    accumulate(&mut sens[0], contribution, x.sparsity())
}

pub(super) fn adj_binary(
    op: BinaryOp,
    broadcast: Broadcast,
    deps: &[Expr],
    out: &Expr,
    seed: &Expr,
    sens: &mut [Option<Expr>],
) -> Result<(), GraphError> {
    let (a, b) = (&deps[0], &deps[1]);
    let (ca, cb) = match op {
        BinaryOp::Add => (seed.clone(), seed.clone()),
        BinaryOp::Sub => (seed.clone(), -seed),
        BinaryOp::Mul => (seed.try_mul(b)?, seed.try_mul(a)?),
        BinaryOp::Div => (seed.try_div(b)?, -seed.try_mul(out)?.try_div(b)?),
    };
    // A broadcast scalar collects the contributions of every nonzero.
    let ca = if broadcast == Broadcast::Lhs { ca.sum() } else { ca };
    let cb = if broadcast == Broadcast::Rhs { cb.sum() } else { cb };
    accumulate(&mut sens[0], ca, a.sparsity())?;
    accumulate(&mut sens[1], cb, b.sparsity())
}

pub(super) fn generate_unary(
    op: UnaryOp,
    node: &Node,
    arg: &[String],
    res: &[String],
    code: &mut String,
) {
    let n = node.sparsity(0).nnz();
    let rhs = op.c_expr(&format!("{}[i]", arg[0]));
    code.push_str(&format!("  for (i=0; i<{n}; ++i) {}[i] = {rhs};\n", res[0]));
}

pub(super) fn generate_binary(
    op: BinaryOp,
    broadcast: Broadcast,
    node: &Node,
    arg: &[String],
    res: &[String],
    code: &mut String,
) {
    let n = node.sparsity(0).nnz();
    let (i, j) = match broadcast {
        Broadcast::None => ("i", "i"),
        Broadcast::Lhs => ("0", "i"),
        Broadcast::Rhs => ("i", "0"),
    };
    code.push_str(&format!(
        "  for (i=0; i<{n}; ++i) {}[i] = {}[{i}]{}{}[{j}];\n",
        res[0],
        arg[0],
        op.symbol(),
        arg[1]
    ));
}
