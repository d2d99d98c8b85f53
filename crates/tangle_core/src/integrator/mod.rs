//! Collocation integrator and the startup-trajectory integrators it can use.
//!
//! Slot conventions of the DAE functions:
//! - forward `f(X, P, T[, XDOT]) -> (ODE[, QUAD])`
//! - backward `g(RX, RP, X, P, T[, XDOT, RXDOT]) -> (ODE[, QUAD])`
//!
//! A forward function with a nonempty `XDOT` input is a fully implicit DAE
//! `0 = f(t, x, xdot, p)`; otherwise `f` returns `dx/dt`.

mod collocation;
pub mod startup;
pub mod tables;

pub use collocation::{CollocationIntegrator, CollocationOptions};
pub use startup::{
    FixedStepIntegrator, StartupIntegrator, StartupIntegratorOptions, StartupIntegratorRegistry,
};
pub use tables::{collocation_points, CollocationScheme};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaeInput {
    X = 0,
    P = 1,
    T = 2,
    Xdot = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaeOutput {
    Ode = 0,
    Quad = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdaeInput {
    Rx = 0,
    Rp = 1,
    X = 2,
    P = 3,
    T = 4,
    Xdot = 5,
    Rxdot = 6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdaeOutput {
    Ode = 0,
    Quad = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegratorInput {
    X0 = 0,
    P = 1,
    Rx0 = 2,
    Rp = 3,
}

pub const INTEGRATOR_NUM_IN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegratorOutput {
    Xf = 0,
    Qf = 1,
    Rxf = 2,
    Rqf = 3,
}

pub const INTEGRATOR_NUM_OUT: usize = 4;
