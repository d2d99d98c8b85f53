//! Explicit fixed-step integrators used to produce an initial guess for the
//! collocation unknowns.

use super::{DaeInput, IntegratorInput, INTEGRATOR_NUM_IN};
use crate::error::CollocationError;
use crate::function::Function;
use crate::solvers::{Tsit5, RK4};
use crate::traits::{DynamicalSystem, Steppable};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupIntegratorOptions {
    pub max_step_size: f64,
}

impl Default for StartupIntegratorOptions {
    fn default() -> Self {
        Self {
            max_step_size: 1e-2,
        }
    }
}

pub trait StartupIntegrator {
    fn name(&self) -> &str;

    /// Restarts at `t0` from the integrator inputs `X0, P, RX0, RP`.
    fn reset(&mut self, t0: f64, inputs: &[Vec<f64>]) -> Result<()>;

    /// Advances to `t`, which must not lie before the current time.
    fn integrate(&mut self, t: f64) -> Result<()>;

    /// Current forward state.
    fn state(&self) -> &[f64];

    fn time(&self) -> f64;
}

/// The forward ODE right-hand side at fixed parameters.
struct OdeRhs<'a> {
    f: &'a Function,
    p: &'a [f64],
}

impl DynamicalSystem for OdeRhs<'_> {
    fn dimension(&self) -> usize {
        self.f.input_sparsity(DaeInput::X as usize).nnz()
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) -> Result<()> {
        let res = self.f.evaluate(&[x.to_vec(), self.p.to_vec(), vec![t]])?;
        out.copy_from_slice(&res[0]);
        Ok(())
    }
}

/// Drives a [`Steppable`] over uniform steps no longer than
/// `max_step_size` between requested output times.
pub struct FixedStepIntegrator<S: Steppable> {
    name: String,
    f: Function,
    stepper: S,
    options: StartupIntegratorOptions,
    t: f64,
    x: Vec<f64>,
    p: Vec<f64>,
    steps: usize,
}

impl<S: Steppable> FixedStepIntegrator<S> {
    /// `f` must be an explicit ODE `f(X, P, T) -> (ODE, ...)` whose ODE
    /// output has one nonzero per state.
    pub fn new(
        name: &str,
        f: Function,
        stepper: S,
        options: StartupIntegratorOptions,
    ) -> Result<Self> {
        if f.n_in() != 3 {
            bail!(
                "Startup integrator \"{}\" handles explicit ODEs f(X, P, T) only, {} has {} inputs",
                name,
                f.name(),
                f.n_in()
            );
        }
        let nx = f.input_sparsity(DaeInput::X as usize).nnz();
        if f.output_sparsity(0).nnz() != nx {
            bail!(
                "{}: ODE output has {} nonzeros for {} states",
                f.name(),
                f.output_sparsity(0).nnz(),
                nx
            );
        }
        if options.max_step_size <= 0.0 {
            bail!("max_step_size must be positive.");
        }
        Ok(Self {
            name: name.to_string(),
            f,
            stepper,
            options,
            t: 0.0,
            x: vec![0.0; nx],
            p: Vec::new(),
            steps: 0,
        })
    }

    /// Total number of steps taken since construction.
    pub fn steps(&self) -> usize {
        self.steps
    }
}

impl<S: Steppable> StartupIntegrator for FixedStepIntegrator<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self, t0: f64, inputs: &[Vec<f64>]) -> Result<()> {
        if inputs.len() != INTEGRATOR_NUM_IN {
            bail!(
                "Expected {} integrator inputs, got {}",
                INTEGRATOR_NUM_IN,
                inputs.len()
            );
        }
        let x0 = &inputs[IntegratorInput::X0 as usize];
        if x0.len() != self.x.len() {
            bail!(
                "Initial state has {} entries, expected {}",
                x0.len(),
                self.x.len()
            );
        }
        self.t = t0;
        self.x.clone_from(x0);
        self.p.clone_from(&inputs[IntegratorInput::P as usize]);
        Ok(())
    }

    fn integrate(&mut self, t: f64) -> Result<()> {
        let span = t - self.t;
        if span < 0.0 {
            bail!("Cannot integrate backwards from t = {} to t = {}", self.t, t);
        }
        if span == 0.0 {
            return Ok(());
        }
        let n = (span / self.options.max_step_size).ceil().max(1.0) as usize;
        let dt = span / n as f64;
        let system = OdeRhs {
            f: &self.f,
            p: &self.p,
        };
        for _ in 0..n {
            self.stepper
                .step(&system, &mut self.t, &mut self.x, dt)
                .with_context(|| format!("{} step failed at t = {}", self.name, self.t))?;
        }
        self.t = t;
        self.steps += n;
        Ok(())
    }

    fn state(&self) -> &[f64] {
        &self.x
    }

    fn time(&self) -> f64 {
        self.t
    }
}

pub type StartupIntegratorCreator =
    Box<dyn Fn(Function, &StartupIntegratorOptions) -> Result<Box<dyn StartupIntegrator>>>;

fn create_rk4(
    f: Function,
    options: &StartupIntegratorOptions,
) -> Result<Box<dyn StartupIntegrator>> {
    let nx = f.input_sparsity(DaeInput::X as usize).nnz();
    Ok(Box::new(FixedStepIntegrator::new("rk4", f, RK4::new(nx), *options)?))
}

fn create_tsit5(
    f: Function,
    options: &StartupIntegratorOptions,
) -> Result<Box<dyn StartupIntegrator>> {
    let nx = f.input_sparsity(DaeInput::X as usize).nnz();
    Ok(Box::new(FixedStepIntegrator::new("tsit5", f, Tsit5::new(nx), *options)?))
}

/// Maps plugin names to startup integrator constructors.
pub struct StartupIntegratorRegistry {
    creators: BTreeMap<String, StartupIntegratorCreator>,
}

impl Default for StartupIntegratorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("rk4", Box::new(create_rk4));
        registry.register("tsit5", Box::new(create_tsit5));
        registry
    }
}

impl StartupIntegratorRegistry {
    pub fn empty() -> Self {
        Self {
            creators: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, creator: StartupIntegratorCreator) {
        self.creators.insert(name.to_string(), creator);
    }

    pub fn names(&self) -> Vec<&str> {
        self.creators.keys().map(String::as_str).collect()
    }

    pub fn create(
        &self,
        name: &str,
        f: Function,
        options: &StartupIntegratorOptions,
    ) -> Result<Box<dyn StartupIntegrator>> {
        let creator = self
            .creators
            .get(name)
            .ok_or_else(|| CollocationError::UnknownPlugin {
                kind: "startup integrator",
                name: name.to_string(),
            })?;
        creator(f, options)
    }
}
