pub mod autodiff;
pub mod error;
pub mod expr;
pub mod function;
pub mod implicit;
pub mod integrator;
pub mod nonlinear;
pub mod solvers;
pub mod sparsity;
pub mod sx;
/// The `tangle_core` crate provides symbolic expression graphs over sparse
/// matrices and a collocation integrator built on top of them.
///
/// Key components:
/// - **Sparsity**: compressed-column patterns with concatenation and split.
/// - **Expr / Function**: matrix expression graphs, compiled into
///   instruction lists with forward and reverse derivatives and C codegen.
/// - **Sx**: scalar graphs and the bytecode VM used by expanded functions.
/// - **Implicit**: Newton root-finding plugins with forward sensitivities.
/// - **Integrator**: orthogonal collocation over finite elements, with
///   optional startup trajectories from RK4 or Tsit5.
pub mod traits;

pub use error::{CollocationError, GraphError};
pub use expr::Expr;
pub use function::Function;
pub use integrator::{CollocationIntegrator, CollocationOptions, CollocationScheme};
pub use nonlinear::NonlinearFunction;
pub use sparsity::Sparsity;
pub use sx::{SxElem, SxFunction};
