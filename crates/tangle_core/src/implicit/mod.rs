//! Root-finding plugins solving `F(V, inputs...) = 0` for the unknown `V`.
//!
//! The solved function is any [`NonlinearFunction`] whose input 0 is the
//! unknown and whose output 0 is the residual. Remaining inputs are fixed
//! parameters (solver input slots `0..`), remaining outputs are evaluated at
//! the solution (solver output slots `1..`); output slot 0 holds the initial
//! guess before and the solution after [`ImplicitSolver::evaluate`].

mod newton;

pub use newton::NewtonSolver;

use crate::error::CollocationError;
use crate::nonlinear::NonlinearFunction;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImplicitSolverOptions {
    /// Maximum number of Newton iterations to perform before returning.
    pub max_iter: usize,
    /// Stopping tolerance on max(|F|).
    pub abstol: f64,
    /// Stopping tolerance on the step size.
    pub abstol_step: f64,
    pub damping: f64,
}

impl Default for ImplicitSolverOptions {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            abstol: 1e-12,
            abstol_step: 1e-12,
            damping: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverStats {
    pub iterations: usize,
    pub return_status: String,
}

pub trait ImplicitSolver {
    fn name(&self) -> &str;

    /// Fixed input `slot` (input `slot + 1` of the solved function).
    fn input_mut(&mut self, slot: usize) -> &mut Vec<f64>;

    /// Forward seed of fixed input `slot` in direction `dir`.
    fn fwd_seed_mut(&mut self, slot: usize, dir: usize) -> &mut Vec<f64>;

    fn output(&self, slot: usize) -> &[f64];

    /// Output slot 0 is also the initial guess of the next solve.
    fn output_mut(&mut self, slot: usize) -> &mut Vec<f64>;

    fn fwd_sens(&self, slot: usize, dir: usize) -> &[f64];

    /// Solves for the unknown and propagates `nfwd` forward directions.
    fn evaluate(&mut self, nfwd: usize) -> Result<()>;

    /// Statistics of the last solve, kept after a failure.
    fn stats(&self) -> &SolverStats;
}

pub type ImplicitSolverCreator = Box<
    dyn Fn(Rc<dyn NonlinearFunction>, &ImplicitSolverOptions) -> Result<Box<dyn ImplicitSolver>>,
>;

fn create_newton(
    f: Rc<dyn NonlinearFunction>,
    options: &ImplicitSolverOptions,
) -> Result<Box<dyn ImplicitSolver>> {
    Ok(Box::new(NewtonSolver::new(f, *options)?))
}

/// Maps plugin names to solver constructors.
pub struct ImplicitSolverRegistry {
    creators: BTreeMap<String, ImplicitSolverCreator>,
}

impl Default for ImplicitSolverRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("newton", Box::new(create_newton));
        registry
    }
}

impl ImplicitSolverRegistry {
    pub fn empty() -> Self {
        Self {
            creators: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, creator: ImplicitSolverCreator) {
        self.creators.insert(name.to_string(), creator);
    }

    pub fn names(&self) -> Vec<&str> {
        self.creators.keys().map(String::as_str).collect()
    }

    pub fn create(
        &self,
        name: &str,
        f: Rc<dyn NonlinearFunction>,
        options: &ImplicitSolverOptions,
    ) -> Result<Box<dyn ImplicitSolver>> {
        let creator = self
            .creators
            .get(name)
            .ok_or_else(|| CollocationError::UnknownPlugin {
                kind: "implicit solver",
                name: name.to_string(),
            })?;
        creator(f, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::function::Function;

    #[test]
    fn registry_resolves_newton_and_rejects_unknown_names() {
        let registry = ImplicitSolverRegistry::default();
        assert_eq!(registry.names(), vec!["newton"]);

        let v = Expr::sym_scalar("v");
        let f: Rc<dyn NonlinearFunction> =
            Rc::new(Function::new("f", vec![v.clone()], vec![&v - 2.0]).expect("function"));
        let solver = registry
            .create("newton", f.clone(), &ImplicitSolverOptions::default())
            .expect("newton");
        assert_eq!(solver.name(), "newton");

        let err = registry
            .create("kinsol", f, &ImplicitSolverOptions::default())
            .err()
            .expect("unknown plugin");
        assert_eq!(
            err.to_string(),
            "No implicit solver plugin registered under \"kinsol\""
        );
    }

    #[test]
    fn options_fill_missing_fields_with_defaults() {
        let options: ImplicitSolverOptions =
            serde_json::from_str(r#"{ "max_iter": 20 }"#).expect("json");
        assert_eq!(options.max_iter, 20);
        assert_eq!(options.abstol, 1e-12);
        assert_eq!(options.damping, 1.0);
    }
}
