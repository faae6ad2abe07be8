//! Levenberg-Marquardt over bipartite factor graphs with Schur-complement
//! marginalization, the usual bundle-adjustment setup.
//!
//! The graph has two vertex classes: type-1 vertices (e.g. camera poses) and
//! type-2 vertices (e.g. landmarks). Every edge joins exactly one of each and
//! carries an observation `z` with per-component sigmas. The optimizer
//! minimizes `||W (z - f(x1, x2))||^2` where `W` combines inverse sigmas with an
//! optional robust kernel.
//!
//! How it works (high level):
//! - Residuals and forward-difference Jacobians are written into a few dense
//!   buffers; every per-edge and per-vertex block is index arithmetic on them.
//! - Hessian blocks `A` (type-1), `B` (type-2) and `W = J1^T J2` (per edge) are
//!   accumulated together with `b = J^T r`.
//! - Each damped step eliminates the type-2 vertices through `B^-1`, solves the
//!   reduced type-1 system with Cholesky and back-substitutes.
//! - The gain ratio decides between accepting the step and retrying with a
//!   larger damping factor.
//!
//! Calling it:
//! - Build `OptimizerSettings` with the block sizes.
//! - Add vertices and edges, then `initialize()`.
//! - `optimize()` and `finalize()`, then read the vertices back.
//!
//! Example:
//! ```rust,no_run
//! use schur_ba_rs::{Optimizer, OptimizerSettings};
//!
//! let settings = OptimizerSettings::new(2, 2, 2);
//! let measurement = |pose: &[f64], point: &[f64], out: &mut [f64]| {
//!     out[0] = pose[0] + point[0];
//!     out[1] = pose[1] + point[1];
//! };
//! let mut optimizer = Optimizer::new(settings, measurement).unwrap();
//! optimizer.add_vertex_type1(0, &[0.0, 0.0], false).unwrap();
//! optimizer.add_vertex_type2(0, &[0.0, 0.0], false).unwrap();
//! optimizer.add_edge(0, 0, 0, &[5.0, 5.0], &[1.0, 1.0]).unwrap();
//! optimizer.initialize().unwrap();
//! let stats = optimizer.optimize(20).unwrap();
//! optimizer.finalize().unwrap();
//! assert!(stats.residual_norm < 1e-6);
//! ```

mod gradient;
mod graph;
mod hessian;
mod jacobian;
mod lm;
mod optimizer;
mod parameters;
mod properties;
mod report;
mod residuals;
mod robust;
mod schur;
mod settings;
mod structure;

pub use gradient::Gradient;
pub use graph::{Edge, Graph, GraphError, Vertex, VertexKind};
pub use hessian::Hessian;
pub use jacobian::{Jacobian, DIFFERENCE_STEP};
pub use optimizer::{Optimizer, OptimizerError};
pub use parameters::{Additive, ParameterStore, ParameterUpdate};
pub use properties::Properties;
pub use report::{
    AttemptOutcome, IterationReport, Reporter, SolveStatus, SolverStats, TableReporter,
};
pub use residuals::{Measurement, Residuals};
pub use robust::{Cauchy, Huber, RobustKernel, RobustKind};
pub use schur::{SchurSolver, SolveFailure};
pub use settings::{Algorithm, OptimizerSettings, SettingsError};
pub use structure::{ProblemStructure, Wiring};
