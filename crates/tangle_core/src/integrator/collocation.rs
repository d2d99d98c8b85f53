use super::startup::{StartupIntegrator, StartupIntegratorOptions, StartupIntegratorRegistry};
use super::tables::{collocation_points, CollocationScheme};
use super::{
    DaeInput, DaeOutput, IntegratorInput, IntegratorOutput, RdaeInput, RdaeOutput,
    INTEGRATOR_NUM_IN, INTEGRATOR_NUM_OUT,
};
use crate::error::CollocationError;
use crate::expr::Expr;
use crate::function::Function;
use crate::implicit::{ImplicitSolver, ImplicitSolverOptions, ImplicitSolverRegistry, SolverStats};
use crate::nonlinear::NonlinearFunction;
use crate::sparsity::Sparsity;
use anyhow::{bail, Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollocationOptions {
    pub t0: f64,
    pub tf: f64,
    pub number_of_finite_elements: usize,
    /// Order of the interpolating polynomials.
    pub interpolation_order: usize,
    pub collocation_scheme: CollocationScheme,
    pub implicit_solver: String,
    pub implicit_solver_options: ImplicitSolverOptions,
    /// Expand the residual function into a scalar graph.
    pub expand_f: bool,
    /// Initialize the trajectory at the previous solution.
    pub hotstart: bool,
    /// Integrator used to generate a startup trajectory.
    pub startup_integrator: Option<String>,
    pub startup_integrator_options: StartupIntegratorOptions,
}

impl Default for CollocationOptions {
    fn default() -> Self {
        Self {
            t0: 0.0,
            tf: 1.0,
            number_of_finite_elements: 20,
            interpolation_order: 3,
            collocation_scheme: CollocationScheme::Radau,
            implicit_solver: "newton".to_string(),
            implicit_solver_options: ImplicitSolverOptions::default(),
            expand_f: false,
            hotstart: true,
            startup_integrator: None,
            startup_integrator_options: StartupIntegratorOptions::default(),
        }
    }
}

/// Polynomial coefficients shared by every finite element.
struct Coefficients {
    /// `c[j][j2]`: derivative of basis polynomial `j` at point `j2`.
    c: Vec<Vec<f64>>,
    /// `d[j]`: basis polynomial `j` at the end of the element.
    d: Vec<f64>,
}

impl Coefficients {
    fn new(tau_root: &[f64]) -> Result<Self> {
        let n = tau_root.len();
        let mut c = vec![vec![0.0; n]; n];
        let mut d = vec![0.0; n];
        let tau = Expr::sym_scalar("tau");
        for j in 0..n {
            let mut l = Expr::scalar(1.0);
            for j2 in (0..n).filter(|&j2| j2 != j) {
                let factor = &(&tau - tau_root[j2]) / (tau_root[j] - tau_root[j2]);
                l = &l * &factor;
            }
            let lfcn = Function::new(&format!("lagrange{j}"), vec![tau.clone()], vec![l])?;
            d[j] = lfcn.evaluate(&[vec![1.0]])?[0][0];

            let dlfcn = lfcn.forward(1)?;
            for j2 in 0..n {
                c[j][j2] = dlfcn.evaluate(&[vec![tau_root[j2]], vec![1.0]])?[0][0];
            }
        }
        Ok(Self { c, d })
    }
}

/// `sum_i coeffs[i] * terms[i]`, skipping zero coefficients.
fn linear_combination(coeffs: &[f64], terms: &[&Expr], n: usize) -> Result<Expr> {
    let mut acc: Option<Expr> = None;
    for (&c, &term) in coeffs.iter().zip(terms) {
        if c == 0.0 {
            continue;
        }
        let scaled = term * c;
        acc = Some(match acc {
            Some(a) => a.try_add(&scaled)?,
            None => scaled,
        });
    }
    Ok(acc.unwrap_or_else(|| Expr::zeros(n, 1)))
}

fn check_column(f: &Function, is_input: bool, slot: usize, label: &str) -> Result<usize> {
    let sp = if is_input {
        f.input_sparsity(slot)
    } else {
        f.output_sparsity(slot)
    };
    if sp.ncols() != 1 || !sp.is_dense() {
        return Err(invalid_dae(
            f,
            format!("{label} must be a dense column vector, got {sp}"),
        ));
    }
    Ok(sp.nrows())
}

fn invalid_dae(f: &Function, details: String) -> anyhow::Error {
    CollocationError::InvalidDae {
        name: f.name().to_string(),
        details,
    }
    .into()
}

/// Rebuilds `f` with dense outputs so every output has one nonzero per entry.
fn densify_outputs(f: &Function) -> Result<Function> {
    let outputs = f.outputs().iter().map(Expr::densify).collect();
    Ok(Function::new(f.name(), f.inputs().to_vec(), outputs)?)
}

/// Sizes of the forward problem read from `f(X, P, T[, XDOT]) -> (ODE[, QUAD])`.
struct ForwardDims {
    nx: usize,
    np: usize,
    nq: usize,
    explicit_ode: bool,
}

fn forward_dims(f: &Function) -> Result<ForwardDims> {
    if !(3..=4).contains(&f.n_in()) || !(1..=2).contains(&f.n_out()) {
        return Err(invalid_dae(
            f,
            format!(
                "expected inputs (X, P, T[, XDOT]) and outputs (ODE[, QUAD]), got {} inputs and {} outputs",
                f.n_in(),
                f.n_out()
            ),
        ));
    }
    let nx = check_column(f, true, DaeInput::X as usize, "X")?;
    if nx == 0 {
        return Err(invalid_dae(f, "the state X is empty".to_string()));
    }
    let np = check_column(f, true, DaeInput::P as usize, "P")?;
    if f.input_sparsity(DaeInput::T as usize).shape() != (1, 1) {
        return Err(invalid_dae(f, "T must be a scalar".to_string()));
    }
    let explicit_ode = f.n_in() < 4 || f.input_sparsity(DaeInput::Xdot as usize).numel() == 0;
    if !explicit_ode && check_column(f, true, DaeInput::Xdot as usize, "XDOT")? != nx {
        return Err(invalid_dae(f, "XDOT must have the shape of X".to_string()));
    }
    if f.output_sparsity(DaeOutput::Ode as usize).shape() != (nx, 1) {
        return Err(invalid_dae(f, "ODE must have the shape of X".to_string()));
    }
    let nq = if f.n_out() > DaeOutput::Quad as usize {
        f.output_sparsity(DaeOutput::Quad as usize).nrows()
    } else {
        0
    };
    Ok(ForwardDims {
        nx,
        np,
        nq,
        explicit_ode,
    })
}

/// Sizes of the backward problem read from
/// `g(RX, RP, X, P, T[, XDOT, RXDOT]) -> (ODE[, QUAD])`.
fn backward_dims(g: &Function, fwd: &ForwardDims) -> Result<(usize, usize, usize)> {
    let expected_in = if fwd.explicit_ode { 5 } else { 7 };
    if g.n_in() != expected_in || !(1..=2).contains(&g.n_out()) {
        return Err(invalid_dae(
            g,
            format!(
                "expected {} inputs and outputs (ODE[, QUAD]), got {} inputs and {} outputs",
                expected_in,
                g.n_in(),
                g.n_out()
            ),
        ));
    }
    let nrx = check_column(g, true, RdaeInput::Rx as usize, "RX")?;
    let nrp = check_column(g, true, RdaeInput::Rp as usize, "RP")?;
    if check_column(g, true, RdaeInput::X as usize, "X")? != fwd.nx
        || check_column(g, true, RdaeInput::P as usize, "P")? != fwd.np
    {
        return Err(invalid_dae(
            g,
            "X and P must match the forward problem".to_string(),
        ));
    }
    if g.input_sparsity(RdaeInput::T as usize).shape() != (1, 1) {
        return Err(invalid_dae(g, "T must be a scalar".to_string()));
    }
    if g.output_sparsity(RdaeOutput::Ode as usize).shape() != (nrx, 1) {
        return Err(invalid_dae(g, "ODE must have the shape of RX".to_string()));
    }
    let nrq = if g.n_out() > RdaeOutput::Quad as usize {
        g.output_sparsity(RdaeOutput::Quad as usize).nrows()
    } else {
        0
    };
    Ok((nrx, nrp, nrq))
}

/// Integrator that discretizes the whole horizon with orthogonal
/// collocation and solves the resulting root-finding problem at once.
///
/// The unknown vector `V` holds, element by element and point by point, the
/// forward state (except the known initial state) followed by the backward
/// state, and ends with the forward state at `tf`.
pub struct CollocationIntegrator {
    f: Function,
    g: Option<Function>,
    options: CollocationOptions,
    nx: usize,
    np: usize,
    nrx: usize,
    nrp: usize,
    times: Vec<f64>,
    residual: Rc<dyn NonlinearFunction>,
    implicit_solver: Box<dyn ImplicitSolver>,
    startup_integrator: Option<Box<dyn StartupIntegrator>>,
    integrated_once: bool,
    /// False while the last `reset` has not produced a solution.
    solved: bool,
    inputs: Vec<Vec<f64>>,
    outputs: Vec<Vec<f64>>,
    fwd_sens: Vec<Vec<Vec<f64>>>,
    nsens: usize,
}

impl CollocationIntegrator {
    pub fn new(f: Function, g: Option<Function>, options: CollocationOptions) -> Result<Self> {
        Self::with_registries(
            f,
            g,
            options,
            &ImplicitSolverRegistry::default(),
            &StartupIntegratorRegistry::default(),
        )
    }

    pub fn with_registries(
        f: Function,
        g: Option<Function>,
        options: CollocationOptions,
        implicit_solvers: &ImplicitSolverRegistry,
        startup_integrators: &StartupIntegratorRegistry,
    ) -> Result<Self> {
        let nk = options.number_of_finite_elements;
        if nk == 0 {
            return Err(CollocationError::NoFiniteElements.into());
        }
        let (t0, tf) = (options.t0, options.tf);
        if tf <= t0 || t0.is_nan() || tf.is_nan() {
            return Err(CollocationError::InvalidHorizon { t0, tf }.into());
        }
        let deg = options.interpolation_order;
        let tau_root = collocation_points(options.collocation_scheme, deg)?;

        let fwd = forward_dims(&f)?;
        let f = densify_outputs(&f)?;
        let (nrx, nrp, nrq) = match &g {
            Some(g) => backward_dims(g, &fwd)?,
            None => (0, 0, 0),
        };
        let g = g.as_ref().map(densify_outputs).transpose()?;
        let ForwardDims {
            nx,
            np,
            nq,
            explicit_ode,
        } = fwd;

        let h = (tf - t0) / nk as f64;
        let coeffs = Coefficients::new(&tau_root).context("Failed to build Lagrange basis")?;

        let x0 = Expr::sym_vector("X0", nx);
        let p = Expr::sym_vector("P", np);
        let rx0 = Expr::sym_vector("RX0", nrx);
        let rp = Expr::sym_vector("RP", nrp);
        let nv = nk * (deg + 1) * (nx + nrx);
        let v = Expr::sym_vector("V", nv);

        // Offsets of the state blocks inside V, in storage order.
        let mut offsets = vec![0];
        let mut push_block = |len: usize| -> usize {
            let last = offsets[offsets.len() - 1];
            offsets.push(last + len);
            offsets.len() - 2
        };
        let mut x_block = vec![vec![None; deg + 1]; nk];
        let mut rx_block = vec![vec![0; deg + 1]; nk];
        for k in 0..nk {
            for j in 0..=deg {
                if k > 0 || j > 0 {
                    x_block[k][j] = Some(push_block(nx));
                }
                rx_block[k][j] = push_block(nrx);
            }
        }
        let xf_block = push_block(nx);
        if offsets[offsets.len() - 1] != nv {
            bail!(
                "Collocation layout covers {} of {} unknowns",
                offsets[offsets.len() - 1],
                nv
            );
        }
        let blocks = v.vertsplit(&offsets)?;

        // X[k][j] and RX[k][j]; X[nk][0] is the state at tf, RX[nk][0] = RX0.
        let mut x: Vec<Vec<Expr>> = x_block
            .iter()
            .map(|row| {
                row.iter()
                    .map(|b| b.map_or_else(|| x0.clone(), |b| blocks[b].clone()))
                    .collect()
            })
            .collect();
        x.push(vec![blocks[xf_block].clone()]);
        let mut rx: Vec<Vec<Expr>> = rx_block
            .iter()
            .map(|row| row.iter().map(|&b| blocks[b].clone()).collect())
            .collect();
        rx.push(vec![rx0.clone()]);

        let h_expr = Expr::scalar(h);
        let mut g_res: Vec<Expr> = Vec::with_capacity(nk * (deg + 1) * 2);
        let mut qf = Expr::zeros(nq, 1);
        let mut rqf = Expr::zeros(nrq, 1);
        let mut times = Vec::with_capacity(nk * (deg + 1));

        for k in 0..nk {
            let xk: Vec<&Expr> = x[k].iter().collect();
            let rxk: Vec<&Expr> = rx[k].iter().collect();
            for j in 1..=deg {
                let tk = t0 + h * (k as f64 + tau_root[j]);
                times.push(tk);
                let t_expr = Expr::scalar(tk);
                let cj: Vec<f64> = (0..=deg).map(|j2| coeffs.c[j2][j]).collect();

                // State derivative at the collocation point, scaled by h.
                let xp_jk = linear_combination(&cj, &xk, nx)?;
                let mut f_in = vec![x[k][j].clone(), p.clone(), t_expr.clone()];
                let xdot = &xp_jk / &h_expr;
                if !explicit_ode {
                    f_in.push(xdot.clone());
                }
                let f_out = f.call(&f_in)?;
                let ode = &f_out[DaeOutput::Ode as usize];
                g_res.push(if explicit_ode {
                    (&h_expr * ode).try_sub(&xp_jk)?
                } else {
                    ode.clone()
                });
                if nq > 0 {
                    let quad = &f_out[DaeOutput::Quad as usize];
                    qf = qf.try_add(&(quad * (coeffs.d[j] * h)))?;
                }

                if let Some(g) = &g {
                    let rxp_jk = linear_combination(&cj, &rxk, nrx)?;
                    let mut g_in = vec![
                        rx[k][j].clone(),
                        rp.clone(),
                        x[k][j].clone(),
                        p.clone(),
                        t_expr,
                    ];
                    if !explicit_ode {
                        g_in.push(xdot);
                        g_in.push(&rxp_jk / &h_expr);
                    }
                    let g_out = g.call(&g_in)?;
                    let rode = &g_out[RdaeOutput::Ode as usize];
                    g_res.push(if explicit_ode {
                        (&h_expr * rode).try_sub(&rxp_jk)?
                    } else {
                        rode.clone()
                    });
                    if nrq > 0 {
                        let rquad = &g_out[RdaeOutput::Quad as usize];
                        rqf = rqf.try_add(&(rquad * (coeffs.d[j] * h)))?;
                    }
                }
            }

            times.push(t0 + h * (k + 1) as f64);

            // Continuity with the next element.
            let xf_k = linear_combination(&coeffs.d, &xk, nx)?;
            g_res.push(x[k + 1][0].try_sub(&xf_k)?);
            if g.is_some() {
                let rxf_k = linear_combination(&coeffs.d, &rxk, nrx)?;
                g_res.push(rx[k + 1][0].try_sub(&rxf_k)?);
            }
        }

        let gv = Expr::vertcat(&g_res)?.densify();
        if gv.nnz() != v.nnz() {
            return Err(CollocationError::EquationCountMismatch {
                equations: gv.nnz(),
                unknowns: v.nnz(),
            }
            .into());
        }
        let gfcn = Function::new(
            "collocation_residual",
            vec![v, x0, p, rx0, rp],
            vec![gv, qf.densify(), rqf.densify()],
        )?;
        info!(
            "collocation: {} elements, degree {} ({}), {} unknowns, {} graph instructions",
            nk,
            deg,
            options.collocation_scheme,
            nv,
            gfcn.n_instructions()
        );
        let residual: Rc<dyn NonlinearFunction> = if options.expand_f {
            Rc::new(gfcn.expand().context("Failed to expand the collocation residual")?)
        } else {
            Rc::new(gfcn)
        };

        let implicit_solver = implicit_solvers.create(
            &options.implicit_solver,
            residual.clone(),
            &options.implicit_solver_options,
        )?;
        let startup_integrator = match &options.startup_integrator {
            Some(name) => Some(startup_integrators.create(
                name,
                f.clone(),
                &options.startup_integrator_options,
            )?),
            None => None,
        };

        let outputs = vec![vec![0.0; nx], vec![0.0; nq], vec![0.0; nrx], vec![0.0; nrq]];
        Ok(Self {
            f,
            g,
            options,
            nx,
            np,
            nrx,
            nrp,
            times,
            residual,
            implicit_solver,
            startup_integrator,
            integrated_once: false,
            solved: false,
            inputs: vec![vec![0.0; nx], vec![0.0; np], vec![0.0; nrx], vec![0.0; nrp]],
            outputs,
            fwd_sens: Vec::new(),
            nsens: 0,
        })
    }

    pub fn forward_function(&self) -> &Function {
        &self.f
    }

    pub fn backward_function(&self) -> Option<&Function> {
        self.g.as_ref()
    }

    pub fn options(&self) -> &CollocationOptions {
        &self.options
    }

    /// The root-finding function `(V, X0, P, RX0, RP) -> (gv, QF, RQF)`.
    pub fn residual_function(&self) -> &Rc<dyn NonlinearFunction> {
        &self.residual
    }

    pub fn n_unknowns(&self) -> usize {
        self.residual.input_sparsity(0).nnz()
    }

    /// Collocation times, element by element, each element ending with its
    /// end time.
    pub fn collocation_times(&self) -> &[f64] {
        &self.times
    }

    pub fn integrated_once(&self) -> bool {
        self.integrated_once
    }

    /// True if the last `reset` converged.
    pub fn is_solved(&self) -> bool {
        self.solved
    }

    pub fn solver_stats(&self) -> &SolverStats {
        self.implicit_solver.stats()
    }

    /// Current solution (or initial guess) of the unknown vector.
    pub fn unknowns(&self) -> &[f64] {
        self.implicit_solver.output(0)
    }

    fn check_inputs(&self, inputs: &[Vec<f64>], what: &str) -> Result<()> {
        let expected = [self.nx, self.np, self.nrx, self.nrp];
        if inputs.len() != INTEGRATOR_NUM_IN {
            bail!(
                "Expected {} {}, got {}",
                INTEGRATOR_NUM_IN,
                what,
                inputs.len()
            );
        }
        for (slot, (value, &n)) in inputs.iter().zip(&expected).enumerate() {
            if value.len() != n {
                bail!(
                    "{} {} has {} entries, expected {}",
                    what,
                    slot,
                    value.len(),
                    n
                );
            }
        }
        Ok(())
    }

    /// Initial guess for the unknowns, by startup simulation when an
    /// integrator is configured and otherwise by repeating the initial states.
    fn initialize_guess(&mut self) -> Result<()> {
        let (nx, nrx) = (self.nx, self.nrx);
        let x0 = &self.inputs[IntegratorInput::X0 as usize];
        let rx0 = &self.inputs[IntegratorInput::Rx0 as usize];
        let v = self.implicit_solver.output_mut(0);

        match self.startup_integrator.as_mut() {
            Some(startup) => {
                startup.reset(self.options.t0, &self.inputs)?;
                let mut offs = nrx;
                for &t in &self.times {
                    startup.integrate(t)?;
                    v[offs..offs + nx].copy_from_slice(startup.state());
                    offs += nx + nrx;
                }
                info!(
                    "startup trajectory generated by {} over {} time points",
                    startup.name(),
                    self.times.len()
                );
            }
            None => {
                for block in v.chunks_mut(nx + nrx) {
                    block[..nrx].copy_from_slice(rx0);
                    block[nrx..].copy_from_slice(x0);
                }
            }
        }
        Ok(())
    }

    /// Solves the collocation equations for the inputs `X0, P, RX0, RP`.
    /// `fwd_seeds[dir]` holds one seed per input for each forward direction.
    pub fn reset(&mut self, inputs: &[Vec<f64>], fwd_seeds: &[Vec<Vec<f64>>]) -> Result<()> {
        self.check_inputs(inputs, "integrator inputs")?;
        for seeds in fwd_seeds {
            self.check_inputs(seeds, "forward seeds")?;
        }
        self.solved = false;
        self.inputs = inputs.to_vec();
        let nsens = fwd_seeds.len();

        for (slot, value) in inputs.iter().enumerate() {
            self.implicit_solver.input_mut(slot).clone_from(value);
        }
        for (dir, seeds) in fwd_seeds.iter().enumerate() {
            for (slot, seed) in seeds.iter().enumerate() {
                self.implicit_solver.fwd_seed_mut(slot, dir).clone_from(seed);
            }
        }

        if !self.options.hotstart || !self.integrated_once {
            self.initialize_guess()?;
        }

        self.implicit_solver
            .evaluate(nsens)
            .context("Failed to solve the collocation equations")?;
        self.integrated_once = true;
        self.nsens = nsens;

        self.outputs[IntegratorOutput::Qf as usize] = self.implicit_solver.output(1).to_vec();
        self.outputs[IntegratorOutput::Rqf as usize] = self.implicit_solver.output(2).to_vec();
        self.fwd_sens = (0..nsens)
            .map(|dir| {
                vec![
                    vec![0.0; self.nx],
                    self.implicit_solver.fwd_sens(1, dir).to_vec(),
                    vec![0.0; self.nrx],
                    self.implicit_solver.fwd_sens(2, dir).to_vec(),
                ]
            })
            .collect();
        self.solved = true;
        Ok(())
    }

    /// Extracts the state at the end of the horizon and the backward state
    /// at its start from the solved unknowns. The whole horizon is solved by
    /// `reset`, so `t_out` only has to lie inside it.
    pub fn integrate(&mut self, t_out: f64) -> Result<()> {
        if !self.integrated_once {
            bail!("reset must be called before integrate");
        }
        if !self.solved {
            bail!(
                "The last reset failed to solve the collocation equations; \
                 there is no solution to integrate"
            );
        }
        if t_out < self.options.t0 || t_out > self.options.tf {
            bail!(
                "Output time {} lies outside the horizon [{}, {}]",
                t_out,
                self.options.t0,
                self.options.tf
            );
        }
        let (nx, nrx) = (self.nx, self.nrx);
        let v = self.implicit_solver.output(0);
        self.outputs[IntegratorOutput::Rxf as usize] = v[..nrx].to_vec();
        self.outputs[IntegratorOutput::Xf as usize] = v[v.len() - nx..].to_vec();

        for dir in 0..self.nsens {
            let v = self.implicit_solver.fwd_sens(0, dir);
            self.fwd_sens[dir][IntegratorOutput::Rxf as usize] = v[..nrx].to_vec();
            self.fwd_sens[dir][IntegratorOutput::Xf as usize] = v[v.len() - nx..].to_vec();
        }
        Ok(())
    }

    pub fn output(&self, slot: IntegratorOutput) -> &[f64] {
        &self.outputs[slot as usize]
    }

    pub fn fwd_sens(&self, slot: IntegratorOutput, dir: usize) -> &[f64] {
        &self.fwd_sens[dir][slot as usize]
    }

    pub fn n_outputs(&self) -> usize {
        INTEGRATOR_NUM_OUT
    }

    /// Pattern of the dense residual, one row per unknown.
    pub fn residual_sparsity(&self) -> &Sparsity {
        self.residual.output_sparsity(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_err_contains<T>(result: Result<T>, needle: &str) {
        let err = match result {
            Ok(_) => panic!("expected error"),
            Err(err) => err,
        };
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn decay() -> Function {
        let x = Expr::sym_scalar("x");
        let p = Expr::sym_vector("p", 0);
        let t = Expr::sym_scalar("t");
        Function::new("decay", vec![x.clone(), p, t], vec![-&x]).expect("function")
    }

    #[test]
    fn lagrange_coefficients_for_linear_radau() {
        let coeffs = Coefficients::new(&[0.0, 1.0]).expect("coefficients");
        assert_eq!(coeffs.d, vec![0.0, 1.0]);
        assert_eq!(coeffs.c, vec![vec![-1.0, -1.0], vec![1.0, 1.0]]);
    }

    #[test]
    fn lagrange_basis_reproduces_quadratics() {
        // Basis weights of t^2 at the points, differentiated at the points.
        let points = collocation_points(CollocationScheme::Legendre, 2).expect("points");
        let coeffs = Coefficients::new(&points).expect("coefficients");
        for (j2, &t) in points.iter().enumerate() {
            let derivative: f64 = (0..points.len())
                .map(|j| coeffs.c[j][j2] * points[j] * points[j])
                .sum();
            assert!((derivative - 2.0 * t).abs() < 1e-12);
        }
        let end: f64 = (0..points.len()).map(|j| coeffs.d[j] * points[j] * points[j]).sum();
        assert!((end - 1.0).abs() < 1e-12);
    }

    #[test]
    fn configuration_errors_are_reported() {
        let options = CollocationOptions {
            number_of_finite_elements: 0,
            ..CollocationOptions::default()
        };
        assert_err_contains(
            CollocationIntegrator::new(decay(), None, options),
            "at least 1",
        );

        let options = CollocationOptions {
            t0: 1.0,
            tf: 1.0,
            ..CollocationOptions::default()
        };
        assert_err_contains(
            CollocationIntegrator::new(decay(), None, options),
            "tf > t0",
        );

        let options = CollocationOptions {
            implicit_solver: "kinsol".to_string(),
            ..CollocationOptions::default()
        };
        assert_err_contains(
            CollocationIntegrator::new(decay(), None, options),
            "No implicit solver plugin registered under \"kinsol\"",
        );
    }

    #[test]
    fn rejects_malformed_dae_functions() {
        let x = Expr::sym_vector("x", 2);
        let p = Expr::sym_vector("p", 0);
        let t = Expr::sym_scalar("t");
        let f = Function::new("short", vec![x.clone(), p, t], vec![x.sum()]).expect("function");
        assert_err_contains(
            CollocationIntegrator::new(f, None, CollocationOptions::default()),
            "ODE must have the shape of X",
        );
    }

    #[test]
    fn times_cover_every_collocation_point() {
        let options = CollocationOptions {
            t0: 1.0,
            tf: 2.0,
            number_of_finite_elements: 2,
            interpolation_order: 1,
            ..CollocationOptions::default()
        };
        let integrator = CollocationIntegrator::new(decay(), None, options).expect("integrator");
        assert_eq!(integrator.collocation_times(), &[1.5, 1.5, 2.0, 2.0]);
        assert_eq!(integrator.n_unknowns(), 4);
        assert!(!integrator.integrated_once());
    }
}
