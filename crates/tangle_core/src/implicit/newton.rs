use super::{ImplicitSolver, ImplicitSolverOptions, SolverStats};
use crate::autodiff::{self, Dual};
use crate::nonlinear::NonlinearFunction;
use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use nalgebra::linalg::LU;
use nalgebra::{DVector, Dyn};
use nalgebra_sparse::convert::serial::convert_csc_dense;
use std::rc::Rc;

/// Full-step (optionally damped) Newton iterations with a dense LU solve of
/// the residual Jacobian. Forward sensitivities of the solution follow from
/// the implicit function theorem at the converged point.
pub struct NewtonSolver {
    f: Rc<dyn NonlinearFunction>,
    options: ImplicitSolverOptions,
    inputs: Vec<Vec<f64>>,
    outputs: Vec<Vec<f64>>,
    fwd_seeds: Vec<Vec<Vec<f64>>>,
    fwd_sens: Vec<Vec<Vec<f64>>>,
    stats: SolverStats,
}

fn max_abs(values: &[f64]) -> f64 {
    values.iter().fold(0.0, |acc, v| acc.max(v.abs()))
}

impl NewtonSolver {
    pub fn new(f: Rc<dyn NonlinearFunction>, options: ImplicitSolverOptions) -> Result<Self> {
        if f.n_in() == 0 || f.n_out() == 0 {
            bail!(
                "{}: an implicit function needs the unknown as input 0 and the residual as output 0",
                f.name()
            );
        }
        let n = f.input_sparsity(0).nnz();
        let m = f.output_sparsity(0).nnz();
        if n != m {
            bail!(
                "{}: residual has {} nonzeros but the unknown has {}",
                f.name(),
                m,
                n
            );
        }
        if options.max_iter == 0 {
            bail!("max_iter must be greater than zero.");
        }
        if options.damping <= 0.0 {
            bail!("damping must be positive.");
        }
        if options.abstol <= 0.0 && options.abstol_step <= 0.0 {
            bail!("At least one of abstol and abstol_step must be positive.");
        }

        let inputs = (1..f.n_in())
            .map(|i| vec![0.0; f.input_sparsity(i).nnz()])
            .collect();
        let outputs = Self::zero_outputs(f.as_ref());
        Ok(Self {
            f,
            options,
            inputs,
            outputs,
            fwd_seeds: Vec::new(),
            fwd_sens: Vec::new(),
            stats: SolverStats::default(),
        })
    }

    fn zero_outputs(f: &dyn NonlinearFunction) -> Vec<Vec<f64>> {
        let mut outputs = vec![vec![0.0; f.input_sparsity(0).nnz()]];
        outputs.extend((1..f.n_out()).map(|j| vec![0.0; f.output_sparsity(j).nnz()]));
        outputs
    }

    fn args(&self, x: &[f64]) -> Vec<Vec<f64>> {
        let mut args = Vec::with_capacity(self.inputs.len() + 1);
        args.push(x.to_vec());
        args.extend(self.inputs.iter().cloned());
        args
    }

    fn factorize(&self, args: &[Vec<f64>]) -> Result<LU<f64, Dyn, Dyn>> {
        let jac = self.f.jacobian(0, 0, args)?;
        Ok(convert_csc_dense(&jac).lu())
    }

    /// Runs the iterations from the guess in output slot 0. Returns the root.
    fn solve(&mut self) -> Result<Vec<f64>> {
        let settings = self.options;
        let mut x = self.outputs[0].clone();
        self.stats = SolverStats::default();

        loop {
            let args = self.args(&x);
            let residual = self
                .f
                .eval(&args)
                .with_context(|| format!("Failed to evaluate {}", self.f.name()))?
                .swap_remove(0);
            let norm_f = max_abs(&residual);
            if norm_f <= settings.abstol {
                self.stats.return_status = "success".to_string();
                debug!("{}: converged, max|F| = {:e}", self.f.name(), norm_f);
                return Ok(x);
            }
            if self.stats.iterations >= settings.max_iter {
                self.stats.return_status = "max_iteration_reached".to_string();
                bail!(
                    "Newton solver failed to converge in {} steps (max|F| = {}).",
                    settings.max_iter,
                    norm_f
                );
            }

            let lu = self.factorize(&args)?;
            let step = match lu.solve(&DVector::from_column_slice(&residual)) {
                Some(step) => step,
                None => {
                    self.stats.return_status = "singular_jacobian".to_string();
                    bail!(
                        "Jacobian is singular at iteration {}.",
                        self.stats.iterations
                    );
                }
            };
            for (xi, si) in x.iter_mut().zip(step.iter()) {
                *xi -= settings.damping * si;
            }
            self.stats.iterations += 1;

            let norm_step = step.amax();
            debug!(
                "{}: iter {:4}  max|F| = {:.3e}  |step| = {:.3e}",
                self.f.name(),
                self.stats.iterations,
                norm_f,
                norm_step
            );
            if norm_step <= settings.abstol_step {
                self.stats.return_status = "success".to_string();
                return Ok(x);
            }
        }
    }

    fn dual_args(&self, x: &[f64], dx: &[f64], dir: usize) -> Vec<Vec<Dual>> {
        let mut args = Vec::with_capacity(self.inputs.len() + 1);
        args.push(autodiff::seed(x, dx));
        for (slot, value) in self.inputs.iter().enumerate() {
            args.push(autodiff::seed(value, &self.fwd_seeds[dir][slot]));
        }
        args
    }

    fn ensure_direction(&mut self, dir: usize) {
        while self.fwd_seeds.len() <= dir {
            let seeds = self.inputs.iter().map(|v| vec![0.0; v.len()]).collect();
            self.fwd_seeds.push(seeds);
            self.fwd_sens.push(Self::zero_outputs(self.f.as_ref()));
        }
    }
}

impl ImplicitSolver for NewtonSolver {
    fn name(&self) -> &str {
        "newton"
    }

    fn input_mut(&mut self, slot: usize) -> &mut Vec<f64> {
        &mut self.inputs[slot]
    }

    fn fwd_seed_mut(&mut self, slot: usize, dir: usize) -> &mut Vec<f64> {
        self.ensure_direction(dir);
        &mut self.fwd_seeds[dir][slot]
    }

    fn output(&self, slot: usize) -> &[f64] {
        &self.outputs[slot]
    }

    fn output_mut(&mut self, slot: usize) -> &mut Vec<f64> {
        &mut self.outputs[slot]
    }

    fn fwd_sens(&self, slot: usize, dir: usize) -> &[f64] {
        &self.fwd_sens[dir][slot]
    }

    fn evaluate(&mut self, nfwd: usize) -> Result<()> {
        for (slot, (value, sp)) in self
            .inputs
            .iter()
            .zip((1..self.f.n_in()).map(|i| self.f.input_sparsity(i)))
            .enumerate()
        {
            if value.len() != sp.nnz() {
                bail!(
                    "{}: input slot {} has {} nonzeros, expected {}",
                    self.f.name(),
                    slot,
                    value.len(),
                    sp.nnz()
                );
            }
        }
        let x = self.solve()?;

        let args = self.args(&x);
        let mut out = self.f.eval(&args)?;
        out[0] = x.clone();
        self.outputs = out;

        if nfwd == 0 {
            return Ok(());
        }
        self.ensure_direction(nfwd - 1);
        let lu = self.factorize(&args)?;
        let zeros = vec![0.0; x.len()];
        for dir in 0..nfwd {
            // F(x(p), p) = 0  =>  dx = -J^{-1} (dF/dp dp)
            let partial = self.f.eval_dual(&self.dual_args(&x, &zeros, dir))?;
            let (_, rhs) = autodiff::unzip(&partial[0]);
            let dx = lu
                .solve(&DVector::from_column_slice(&rhs))
                .ok_or_else(|| anyhow!("Jacobian is singular at the solution."))?;
            let dx: Vec<f64> = dx.iter().map(|v| -v).collect();

            let total = self.f.eval_dual(&self.dual_args(&x, &dx, dir))?;
            let mut sens: Vec<Vec<f64>> = total.iter().map(|o| autodiff::unzip(o).1).collect();
            sens[0] = dx;
            self.fwd_sens[dir] = sens;
        }
        Ok(())
    }

    fn stats(&self) -> &SolverStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::function::Function;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    // v^2 - p = 0, q = 3 v
    fn square_root() -> Rc<dyn NonlinearFunction> {
        let v = Expr::sym_scalar("v");
        let p = Expr::sym_scalar("p");
        let residual = &(&v * &v) - &p;
        let q = &v * 3.0;
        Rc::new(Function::new("sqrt", vec![v, p], vec![residual, q]).expect("function"))
    }

    #[test]
    fn solves_and_differentiates_the_root() {
        let mut solver = NewtonSolver::new(square_root(), ImplicitSolverOptions::default())
            .expect("solver");
        solver.input_mut(0)[0] = 4.0;
        solver.output_mut(0)[0] = 1.0;
        solver.fwd_seed_mut(0, 0)[0] = 1.0;
        solver.evaluate(1).expect("solve");

        assert!((solver.output(0)[0] - 2.0).abs() < 1e-12);
        assert!((solver.output(1)[0] - 6.0).abs() < 1e-12);
        // dv/dp = 1 / (2 v)
        assert!((solver.fwd_sens(0, 0)[0] - 0.25).abs() < 1e-12);
        assert!((solver.fwd_sens(1, 0)[0] - 0.75).abs() < 1e-12);
        assert_eq!(solver.stats().return_status, "success");
        assert!(solver.stats().iterations > 0);
    }

    #[test]
    fn reports_non_convergence_with_stats() {
        let options = ImplicitSolverOptions {
            max_iter: 2,
            ..ImplicitSolverOptions::default()
        };
        let mut solver = NewtonSolver::new(square_root(), options).expect("solver");
        solver.input_mut(0)[0] = 4.0;
        solver.output_mut(0)[0] = 100.0;
        assert_err_contains(solver.evaluate(0), "failed to converge in 2 steps");
        assert_eq!(solver.stats().iterations, 2);
        assert_eq!(solver.stats().return_status, "max_iteration_reached");
    }

    #[test]
    fn singular_jacobian_is_an_error() {
        let mut solver = NewtonSolver::new(square_root(), ImplicitSolverOptions::default())
            .expect("solver");
        solver.input_mut(0)[0] = 4.0;
        solver.output_mut(0)[0] = 0.0;
        assert_err_contains(solver.evaluate(0), "Jacobian is singular");
        assert_eq!(solver.stats().return_status, "singular_jacobian");
    }

    #[test]
    fn rejects_non_square_systems() {
        let v = Expr::sym_vector("v", 2);
        let f = Function::new("f", vec![v.clone()], vec![v.sum()]).expect("function");
        let result = NewtonSolver::new(Rc::new(f), ImplicitSolverOptions::default());
        assert_err_contains(result.map(|_| ()), "residual has 1 nonzeros but the unknown has 2");
    }
}
