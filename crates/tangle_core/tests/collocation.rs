use anyhow::Result;
use rstest::rstest;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tangle_core::expr::parse::parse;
use tangle_core::implicit::{
    ImplicitSolver, ImplicitSolverCreator, ImplicitSolverOptions, ImplicitSolverRegistry,
    SolverStats,
};
use tangle_core::integrator::startup::StartupIntegratorCreator;
use tangle_core::integrator::{
    IntegratorOutput, StartupIntegrator, StartupIntegratorOptions, StartupIntegratorRegistry,
};
use tangle_core::{
    CollocationError, CollocationIntegrator, CollocationOptions, CollocationScheme, Expr,
    Function, NonlinearFunction,
};

fn assert_close(actual: f64, expected: f64, tol: f64) {
    assert!(
        (actual - expected).abs() <= tol,
        "expected {expected}, got {actual} (tolerance {tol})"
    );
}

// dx/dt = -p x, quadrature x
fn decay() -> Function {
    let x = Expr::sym_scalar("x");
    let p = Expr::sym_scalar("p");
    let t = Expr::sym_scalar("t");
    Function::new("decay", vec![x.clone(), p.clone(), t], vec![-(&p * &x), x])
        .expect("function")
}

fn options(nk: usize, degree: usize, scheme: CollocationScheme) -> CollocationOptions {
    CollocationOptions {
        number_of_finite_elements: nk,
        interpolation_order: degree,
        collocation_scheme: scheme,
        ..CollocationOptions::default()
    }
}

fn inputs(x0: f64, p: f64) -> Vec<Vec<f64>> {
    vec![vec![x0], vec![p], vec![], vec![]]
}

#[test]
fn linear_radau_is_implicit_euler() {
    let h = 0.5;
    let opts = CollocationOptions {
        tf: h,
        ..options(1, 1, CollocationScheme::Radau)
    };
    let mut integrator = CollocationIntegrator::new(decay(), None, opts).expect("integrator");
    let seeds = vec![
        vec![vec![1.0], vec![0.0], vec![], vec![]],
        vec![vec![0.0], vec![1.0], vec![], vec![]],
    ];
    integrator.reset(&inputs(1.0, 1.0), &seeds).expect("reset");
    integrator.integrate(h).expect("integrate");

    let xf = integrator.output(IntegratorOutput::Xf)[0];
    assert_close(xf, 1.0 / (1.0 + h), 1e-12);
    assert_close(integrator.output(IntegratorOutput::Qf)[0], h * xf, 1e-12);
    assert!(integrator.output(IntegratorOutput::Rxf).is_empty());

    // x1 = x0 / (1 + h p)
    assert_close(integrator.fwd_sens(IntegratorOutput::Xf, 0)[0], 1.0 / (1.0 + h), 1e-10);
    let dxdp = -h / ((1.0 + h) * (1.0 + h));
    assert_close(integrator.fwd_sens(IntegratorOutput::Xf, 1)[0], dxdp, 1e-10);
    assert_close(integrator.fwd_sens(IntegratorOutput::Qf, 1)[0], h * dxdp, 1e-10);
    assert_eq!(integrator.solver_stats().return_status, "success");
}

#[rstest]
#[case(CollocationScheme::Radau, 2)]
#[case(CollocationScheme::Radau, 3)]
#[case(CollocationScheme::Radau, 5)]
#[case(CollocationScheme::Legendre, 2)]
#[case(CollocationScheme::Legendre, 4)]
fn converges_to_the_exponential(#[case] scheme: CollocationScheme, #[case] degree: usize) {
    let mut integrator =
        CollocationIntegrator::new(decay(), None, options(20, degree, scheme)).expect("integrator");
    assert_eq!(integrator.n_unknowns(), 20 * (degree + 1));
    assert_eq!(
        integrator.residual_function().output_sparsity(0).nnz(),
        integrator.n_unknowns()
    );
    assert_eq!(integrator.collocation_times().len(), 20 * (degree + 1));

    integrator.reset(&inputs(2.0, 1.0), &[]).expect("reset");
    integrator.integrate(1.0).expect("integrate");
    assert_close(
        integrator.output(IntegratorOutput::Xf)[0],
        2.0 * (-1.0_f64).exp(),
        1e-5,
    );
}

#[test]
fn parsed_oscillator_follows_cosine() {
    let x = Expr::sym_vector("x", 2);
    let p = Expr::sym_scalar("w");
    let t = Expr::sym_scalar("t");
    let symbols = [x.clone(), p.clone()];
    let rhs = Expr::vertcat(&[
        parse("x[1]", &symbols).expect("parse"),
        parse("-(w^2) * x[0]", &symbols).expect("parse"),
    ])
    .expect("vertcat");
    let f = Function::new("oscillator", vec![x, p, t], vec![rhs]).expect("function");

    let mut integrator =
        CollocationIntegrator::new(f, None, options(20, 3, CollocationScheme::Legendre))
            .expect("integrator");
    integrator
        .reset(&[vec![1.0, 0.0], vec![2.0], vec![], vec![]], &[])
        .expect("reset");
    integrator.integrate(1.0).expect("integrate");
    let xf = integrator.output(IntegratorOutput::Xf);
    assert_close(xf[0], 2.0_f64.cos(), 1e-7);
    assert_close(xf[1], -2.0 * 2.0_f64.sin(), 1e-7);
}

#[test]
fn implicit_dae_matches_the_explicit_ode() {
    let x = Expr::sym_scalar("x");
    let p = Expr::sym_scalar("p");
    let t = Expr::sym_scalar("t");
    let xdot = Expr::sym_scalar("xdot");
    let residual = &xdot + &(&p * &x);
    let dae = Function::new("dae", vec![x, p, t, xdot], vec![residual]).expect("function");

    let mut explicit =
        CollocationIntegrator::new(decay(), None, options(5, 3, CollocationScheme::Radau))
            .expect("integrator");
    let mut implicit =
        CollocationIntegrator::new(dae, None, options(5, 3, CollocationScheme::Radau))
            .expect("integrator");
    for integrator in [&mut explicit, &mut implicit] {
        integrator.reset(&inputs(1.0, 0.5), &[]).expect("reset");
        integrator.integrate(1.0).expect("integrate");
    }
    assert_close(
        implicit.output(IntegratorOutput::Xf)[0],
        explicit.output(IntegratorOutput::Xf)[0],
        1e-10,
    );
    assert!(implicit.output(IntegratorOutput::Qf).is_empty());
}

#[test]
fn expanded_residual_gives_the_same_solution() {
    let mut graph =
        CollocationIntegrator::new(decay(), None, options(4, 3, CollocationScheme::Legendre))
            .expect("integrator");
    let expanded_options = CollocationOptions {
        expand_f: true,
        ..options(4, 3, CollocationScheme::Legendre)
    };
    let mut expanded =
        CollocationIntegrator::new(decay(), None, expanded_options).expect("integrator");
    let seeds = vec![vec![vec![0.0], vec![1.0], vec![], vec![]]];
    for integrator in [&mut graph, &mut expanded] {
        integrator.reset(&inputs(1.0, 2.0), &seeds).expect("reset");
        integrator.integrate(1.0).expect("integrate");
    }
    for slot in [IntegratorOutput::Xf, IntegratorOutput::Qf] {
        assert_close(expanded.output(slot)[0], graph.output(slot)[0], 1e-12);
        assert_close(expanded.fwd_sens(slot, 0)[0], graph.fwd_sens(slot, 0)[0], 1e-10);
    }
}

#[test]
fn backward_states_run_from_the_terminal_condition() {
    // rx' = x with rx(tf) = rx0, so rx(t0) = rx0 - (1 - exp(-1)) for x = exp(-t).
    let rx = Expr::sym_scalar("rx");
    let rp = Expr::sym_vector("rp", 0);
    let x = Expr::sym_scalar("x");
    let p = Expr::sym_scalar("p");
    let t = Expr::sym_scalar("t");
    let g = Function::new("adjoint", vec![rx.clone(), rp, x.clone(), p, t], vec![x, rx])
        .expect("function");

    let mut integrator =
        CollocationIntegrator::new(decay(), Some(g), options(20, 3, CollocationScheme::Radau))
            .expect("integrator");
    assert_eq!(integrator.n_unknowns(), 20 * 4 * 2);

    let inputs = vec![vec![1.0], vec![1.0], vec![3.0], vec![]];
    integrator.reset(&inputs, &[]).expect("reset");
    integrator.integrate(1.0).expect("integrate");

    assert_close(
        integrator.output(IntegratorOutput::Xf)[0],
        (-1.0_f64).exp(),
        1e-8,
    );
    assert_close(
        integrator.output(IntegratorOutput::Rxf)[0],
        3.0 - (1.0 - (-1.0_f64).exp()),
        1e-8,
    );
    assert_eq!(integrator.output(IntegratorOutput::Rqf).len(), 1);
}

struct CountingStartup {
    inner: Box<dyn StartupIntegrator>,
    resets: Rc<Cell<usize>>,
}

impl StartupIntegrator for CountingStartup {
    fn name(&self) -> &str {
        "counting"
    }

    fn reset(&mut self, t0: f64, inputs: &[Vec<f64>]) -> Result<()> {
        self.resets.set(self.resets.get() + 1);
        self.inner.reset(t0, inputs)
    }

    fn integrate(&mut self, t: f64) -> Result<()> {
        self.inner.integrate(t)
    }

    fn state(&self) -> &[f64] {
        self.inner.state()
    }

    fn time(&self) -> f64 {
        self.inner.time()
    }
}

fn counting_registry(resets: &Rc<Cell<usize>>) -> StartupIntegratorRegistry {
    let resets = resets.clone();
    let creator: StartupIntegratorCreator = Box::new(
        move |f: Function,
              options: &StartupIntegratorOptions|
              -> Result<Box<dyn StartupIntegrator>> {
            let inner = StartupIntegratorRegistry::default().create("rk4", f, options)?;
            Ok(Box::new(CountingStartup {
                inner,
                resets: resets.clone(),
            }))
        },
    );
    let mut registry = StartupIntegratorRegistry::empty();
    registry.register("counting", creator);
    registry
}

#[rstest]
#[case(true, 1)]
#[case(false, 2)]
fn hotstart_skips_the_startup_trajectory(#[case] hotstart: bool, #[case] expected_resets: usize) {
    let resets = Rc::new(Cell::new(0));
    let opts = CollocationOptions {
        hotstart,
        startup_integrator: Some("counting".to_string()),
        ..options(10, 3, CollocationScheme::Radau)
    };
    let mut integrator = CollocationIntegrator::with_registries(
        decay(),
        None,
        opts,
        &ImplicitSolverRegistry::default(),
        &counting_registry(&resets),
    )
    .expect("integrator");
    assert_eq!(resets.get(), 0);

    integrator.reset(&inputs(1.0, 1.0), &[]).expect("first reset");
    assert!(integrator.integrated_once());
    // The startup trajectory is already close to the collocation solution.
    assert!(integrator.solver_stats().iterations <= 2);
    integrator.reset(&inputs(1.5, 1.0), &[]).expect("second reset");
    integrator.integrate(1.0).expect("integrate");

    assert_eq!(resets.get(), expected_resets);
    assert_close(
        integrator.output(IntegratorOutput::Xf)[0],
        1.5 * (-1.0_f64).exp(),
        1e-6,
    );
}

/// Newton solver that records the initial guess of every solve.
struct RecordingSolver {
    inner: Box<dyn ImplicitSolver>,
    guesses: Rc<RefCell<Vec<Vec<f64>>>>,
}

impl ImplicitSolver for RecordingSolver {
    fn name(&self) -> &str {
        "recording"
    }

    fn input_mut(&mut self, slot: usize) -> &mut Vec<f64> {
        self.inner.input_mut(slot)
    }

    fn fwd_seed_mut(&mut self, slot: usize, dir: usize) -> &mut Vec<f64> {
        self.inner.fwd_seed_mut(slot, dir)
    }

    fn output(&self, slot: usize) -> &[f64] {
        self.inner.output(slot)
    }

    fn output_mut(&mut self, slot: usize) -> &mut Vec<f64> {
        self.inner.output_mut(slot)
    }

    fn fwd_sens(&self, slot: usize, dir: usize) -> &[f64] {
        self.inner.fwd_sens(slot, dir)
    }

    fn evaluate(&mut self, nfwd: usize) -> Result<()> {
        self.guesses.borrow_mut().push(self.inner.output(0).to_vec());
        self.inner.evaluate(nfwd)
    }

    fn stats(&self) -> &SolverStats {
        self.inner.stats()
    }
}

fn recording_registry(guesses: &Rc<RefCell<Vec<Vec<f64>>>>) -> ImplicitSolverRegistry {
    let guesses = guesses.clone();
    let creator: ImplicitSolverCreator = Box::new(
        move |f: Rc<dyn NonlinearFunction>,
              options: &ImplicitSolverOptions|
              -> Result<Box<dyn ImplicitSolver>> {
            let inner = ImplicitSolverRegistry::default().create("newton", f, options)?;
            Ok(Box::new(RecordingSolver {
                inner,
                guesses: guesses.clone(),
            }))
        },
    );
    let mut registry = ImplicitSolverRegistry::empty();
    registry.register("recording", creator);
    registry
}

// rx' = x
fn accumulator() -> Function {
    let rx = Expr::sym_scalar("rx");
    let rp = Expr::sym_vector("rp", 0);
    let x = Expr::sym_scalar("x");
    let p = Expr::sym_scalar("p");
    let t = Expr::sym_scalar("t");
    Function::new("accumulator", vec![rx, rp, x.clone(), p, t], vec![x]).expect("function")
}

#[rstest]
#[case(true)]
#[case(false)]
fn initial_guess_repeats_the_initial_states_then_hotstarts(#[case] hotstart: bool) {
    let guesses = Rc::new(RefCell::new(Vec::new()));
    let opts = CollocationOptions {
        hotstart,
        implicit_solver: "recording".to_string(),
        ..options(2, 2, CollocationScheme::Radau)
    };
    let mut integrator = CollocationIntegrator::with_registries(
        decay(),
        Some(accumulator()),
        opts,
        &recording_registry(&guesses),
        &StartupIntegratorRegistry::default(),
    )
    .expect("integrator");

    integrator
        .reset(&[vec![1.0], vec![1.0], vec![7.0], vec![]], &[])
        .expect("first reset");
    let first_solution = integrator.unknowns().to_vec();
    integrator
        .reset(&[vec![2.0], vec![1.0], vec![5.0], vec![]], &[])
        .expect("second reset");

    let guesses = guesses.borrow();
    assert_eq!(guesses.len(), 2);
    // [RX0, X0] repeated over the 2 * 3 collocation points.
    assert_eq!(guesses[0], [7.0, 1.0].repeat(6));
    if hotstart {
        assert_eq!(guesses[1], first_solution);
    } else {
        assert_eq!(guesses[1], [5.0, 2.0].repeat(6));
    }
}

// With h = 0.5 and p = -2 the implicit Euler step 1 + h p is singular.
fn euler_step() -> CollocationIntegrator {
    let opts = CollocationOptions {
        tf: 0.5,
        ..options(1, 1, CollocationScheme::Radau)
    };
    CollocationIntegrator::new(decay(), None, opts).expect("integrator")
}

#[test]
fn failed_reset_leaves_nothing_to_integrate() {
    let mut integrator = euler_step();
    integrator.reset(&inputs(1.0, 1.0), &[]).expect("reset");
    integrator.integrate(0.5).expect("integrate");
    assert!(integrator.is_solved());

    let err = integrator
        .reset(&inputs(1.0, -2.0), &[])
        .expect_err("singular step");
    assert!(format!("{err:#}").contains("Jacobian is singular"));
    assert!(!integrator.is_solved());
    let err = integrator.integrate(0.5).expect_err("stale solution");
    assert!(err.to_string().contains("failed to solve the collocation equations"));

    integrator.reset(&inputs(3.0, 1.0), &[]).expect("recovered");
    integrator.integrate(0.5).expect("integrate");
    assert_close(integrator.output(IntegratorOutput::Xf)[0], 2.0, 1e-12);
}

#[test]
fn failed_reset_with_new_directions_does_not_panic() {
    let mut integrator = euler_step();
    integrator.reset(&inputs(1.0, 1.0), &[]).expect("reset");

    let seeds = vec![vec![vec![1.0], vec![0.0], vec![], vec![]]];
    assert!(integrator.reset(&inputs(1.0, -2.0), &seeds).is_err());
    assert!(integrator.integrate(0.5).is_err());

    integrator.reset(&inputs(1.0, 1.0), &seeds).expect("reset");
    integrator.integrate(0.5).expect("integrate");
    assert_close(integrator.fwd_sens(IntegratorOutput::Xf, 0)[0], 1.0 / 1.5, 1e-10);
}

#[test]
fn unknown_startup_integrator_is_rejected() {
    let opts = CollocationOptions {
        startup_integrator: Some("idas".to_string()),
        ..CollocationOptions::default()
    };
    let err = match CollocationIntegrator::new(decay(), None, opts) {
        Ok(_) => panic!("expected error"),
        Err(err) => err,
    };
    assert_eq!(
        err.downcast_ref::<CollocationError>(),
        Some(&CollocationError::UnknownPlugin {
            kind: "startup integrator",
            name: "idas".to_string(),
        })
    );
}

#[test]
fn interpolation_order_above_five_is_rejected() {
    let options = options(4, 6, CollocationScheme::Radau);
    let err = match CollocationIntegrator::new(decay(), None, options) {
        Ok(_) => panic!("expected error"),
        Err(err) => err,
    };
    assert_eq!(
        err.downcast_ref::<CollocationError>(),
        Some(&CollocationError::DegreeOutOfRange(6))
    );
}

#[test]
fn integrate_requires_a_reset() {
    let mut integrator =
        CollocationIntegrator::new(decay(), None, options(2, 2, CollocationScheme::Radau))
            .expect("integrator");
    let err = integrator.integrate(1.0).expect_err("expected error");
    assert!(err.to_string().contains("reset must be called"));
    let err = integrator
        .reset(&[vec![1.0, 2.0], vec![1.0], vec![], vec![]], &[])
        .expect_err("expected error");
    assert!(err.to_string().contains("has 2 entries, expected 1"));
}

#[test]
fn options_deserialize_with_defaults() {
    let parsed: CollocationOptions = serde_json::from_str("{}").expect("json");
    assert_eq!(parsed, CollocationOptions::default());

    let parsed: CollocationOptions = serde_json::from_str(
        r#"{"collocation_scheme": "legendre", "interpolation_order": 4,
            "startup_integrator": "tsit5", "implicit_solver_options": {"max_iter": 5}}"#,
    )
    .expect("json");
    assert_eq!(parsed.collocation_scheme, CollocationScheme::Legendre);
    assert_eq!(parsed.interpolation_order, 4);
    assert_eq!(parsed.startup_integrator.as_deref(), Some("tsit5"));
    assert_eq!(parsed.implicit_solver_options.max_iter, 5);
    assert_eq!(parsed.number_of_finite_elements, 20);
    assert!(parsed.hotstart);
}
