use super::Function;
use crate::error::GraphError;
use crate::expr::{accumulate, Expr};
use crate::sparsity::Bvec;
use anyhow::Result;

impl Function {
    /// Forward-derivative function. Inputs are the original inputs followed
    /// by one seed per input and direction; outputs are one sensitivity per
    /// output and direction, direction-major.
    pub fn forward(&self, nfwd: usize) -> Result<Function, GraphError> {
        let seeds: Vec<Vec<Expr>> = (0..nfwd)
            .map(|d| {
                self.inputs
                    .iter()
                    .enumerate()
                    .map(|(i, x)| {
                        Expr::sym(&format!("fwd{d}_{}", self.input_name(i)), x.sparsity().clone())
                    })
                    .collect()
            })
            .collect();

        // tangent[slot][direction]; None is a structural zero.
        let mut tangent: Vec<Vec<Option<Expr>>> = vec![vec![None; nfwd]; self.slots.len()];
        for (i, &s) in self.input_slots.iter().enumerate() {
            for d in 0..nfwd {
                tangent[s][d] = Some(seeds[d][i].clone());
            }
        }

        for ins in &self.instructions {
            let seeded = ins
                .args
                .iter()
                .any(|&s| tangent[s].iter().any(Option::is_some));
            if !seeded {
                continue;
            }
            let node = ins.node.node();
            let fseed: Vec<Vec<Expr>> = (0..nfwd)
                .map(|d| {
                    ins.args
                        .iter()
                        .zip(node.deps())
                        .map(|(&s, dep)| match &tangent[s][d] {
                            Some(t) => t.clone(),
                            None => Expr::zeros(dep.shape().0, dep.shape().1),
                        })
                        .collect()
                })
                .collect();
            let fsens = node.eval_fwd(&Self::primal_outputs(&ins.node), &fseed)?;
            for (d, sens) in fsens.into_iter().enumerate() {
                for (r, e) in ins.res.iter().zip(sens) {
                    if let Some(s) = r {
                        tangent[*s][d] = Some(e);
                    }
                }
            }
        }

        let mut outputs = Vec::with_capacity(nfwd * self.n_out());
        for d in 0..nfwd {
            for (&s, o) in self.output_slots.iter().zip(&self.outputs) {
                let sens = match &tangent[s][d] {
                    Some(t) => t.clone(),
                    None => Expr::zeros(o.shape().0, o.shape().1),
                };
                outputs.push(sens.project(o.sparsity())?);
            }
        }
        let mut inputs = self.inputs.clone();
        inputs.extend(seeds.into_iter().flatten());
        Function::new(&format!("fwd{nfwd}_{}", self.name), inputs, outputs)
    }

    /// Reverse-derivative function. Inputs are the original inputs followed
    /// by one adjoint seed per output and direction; outputs are one adjoint
    /// sensitivity per input and direction, direction-major.
    pub fn reverse(&self, nadj: usize) -> Result<Function, GraphError> {
        let seeds: Vec<Vec<Expr>> = (0..nadj)
            .map(|d| {
                self.outputs
                    .iter()
                    .enumerate()
                    .map(|(k, o)| Expr::sym(&format!("adj{d}_o{k}"), o.sparsity().clone()))
                    .collect()
            })
            .collect();

        let mut adjoint: Vec<Vec<Option<Expr>>> = vec![vec![None; nadj]; self.slots.len()];
        for (d, dir_seeds) in seeds.iter().enumerate() {
            for (&s, seed) in self.output_slots.iter().zip(dir_seeds) {
                accumulate(&mut adjoint[s][d], seed.clone(), &self.slots[s])?;
            }
        }

        for ins in self.instructions.iter().rev() {
            let mut aseed: Vec<Vec<Option<Expr>>> = (0..nadj)
                .map(|d| {
                    ins.res
                        .iter()
                        .map(|r| r.and_then(|s| adjoint[s][d].take()))
                        .collect()
                })
                .collect();
            if aseed.iter().flatten().all(Option::is_none) {
                continue;
            }
            let mut asens: Vec<Vec<Option<Expr>>> = vec![vec![None; ins.args.len()]; nadj];
            ins.node
                .node()
                .eval_adj(&Self::primal_outputs(&ins.node), &mut aseed, &mut asens)?;
            for (d, sens) in asens.into_iter().enumerate() {
                for (&s, contribution) in ins.args.iter().zip(sens) {
                    if let Some(c) = contribution {
                        accumulate(&mut adjoint[s][d], c, &self.slots[s])?;
                    }
                }
            }
        }

        let mut outputs = Vec::with_capacity(nadj * self.n_in());
        for d in 0..nadj {
            for (&s, x) in self.input_slots.iter().zip(&self.inputs) {
                let sens = match adjoint[s][d].take() {
                    Some(a) => a,
                    None => Expr::zeros(x.shape().0, x.shape().1),
                };
                outputs.push(sens.project(x.sparsity())?);
            }
        }
        let mut inputs = self.inputs.clone();
        inputs.extend(seeds.into_iter().flatten());
        Function::new(&format!("adj{nadj}_{}", self.name), inputs, outputs)
    }

    /// Forward dependency sweep: `seeds[i]` holds taint bits per nonzero of
    /// input `i`; returns the bits reaching every output nonzero.
    pub fn sparsity_forward(&self, seeds: &[Vec<Bvec>]) -> Result<Vec<Vec<Bvec>>> {
        self.check_nnz(seeds.iter().map(Vec::len))?;
        let mut work: Vec<Vec<Bvec>> = self.slots.iter().map(|sp| vec![0; sp.nnz()]).collect();
        for (&s, seed) in self.input_slots.iter().zip(seeds) {
            work[s].copy_from_slice(seed);
        }
        for ins in &self.instructions {
            let mut arg_bufs: Vec<Vec<Bvec>> = ins.args.iter().map(|&s| work[s].clone()).collect();
            let mut outs: Vec<Option<Vec<Bvec>>> = ins
                .res
                .iter()
                .map(|r| r.map(|s| vec![0; self.slots[s].nnz()]))
                .collect();
            {
                let mut args: Vec<&mut [Bvec]> =
                    arg_bufs.iter_mut().map(Vec::as_mut_slice).collect();
                let mut res: Vec<Option<&mut [Bvec]>> =
                    outs.iter_mut().map(|o| o.as_deref_mut()).collect();
                ins.node.node().propagate_sparsity(&mut args, &mut res, true);
            }
            for (r, out) in ins.res.iter().zip(outs) {
                if let (Some(s), Some(v)) = (r, out) {
                    work[*s] = v;
                }
            }
        }
        Ok(self.output_slots.iter().map(|&s| work[s].clone()).collect())
    }

    /// Reverse dependency sweep: `seeds[j]` holds taint bits per nonzero of
    /// output `j`; returns the bits collected on every input nonzero.
    pub fn sparsity_reverse(&self, seeds: &[Vec<Bvec>]) -> Result<Vec<Vec<Bvec>>> {
        if seeds.len() != self.n_out() {
            return Err(GraphError::ArgumentCount {
                expected: self.n_out(),
                got: seeds.len(),
            }
            .into());
        }
        let mut work: Vec<Vec<Bvec>> = self.slots.iter().map(|sp| vec![0; sp.nnz()]).collect();
        for (index, ((&s, seed), o)) in self
            .output_slots
            .iter()
            .zip(seeds)
            .zip(&self.outputs)
            .enumerate()
        {
            if seed.len() != o.nnz() {
                return Err(GraphError::NonzeroCount {
                    index,
                    expected: o.nnz(),
                    got: seed.len(),
                }
                .into());
            }
            for (w, b) in work[s].iter_mut().zip(seed) {
                *w |= b;
            }
        }
        for ins in self.instructions.iter().rev() {
            let mut outs: Vec<Option<Vec<Bvec>>> = ins
                .res
                .iter()
                .map(|r| r.map(|s| std::mem::replace(&mut work[s], vec![0; self.slots[s].nnz()])))
                .collect();
            let mut arg_bufs: Vec<Vec<Bvec>> = ins
                .args
                .iter()
                .map(|&s| vec![0; self.slots[s].nnz()])
                .collect();
            {
                let mut args: Vec<&mut [Bvec]> =
                    arg_bufs.iter_mut().map(Vec::as_mut_slice).collect();
                let mut res: Vec<Option<&mut [Bvec]>> =
                    outs.iter_mut().map(|o| o.as_deref_mut()).collect();
                ins.node.node().propagate_sparsity(&mut args, &mut res, false);
            }
            for (&s, buf) in ins.args.iter().zip(arg_bufs) {
                for (w, b) in work[s].iter_mut().zip(buf) {
                    *w |= b;
                }
            }
        }
        Ok(self.input_slots.iter().map(|&s| work[s].clone()).collect())
    }
}
