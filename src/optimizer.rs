use core::fmt;

use nalgebra::DVector;

use crate::graph::{Graph, GraphError, VertexKind};
use crate::lm::{self, Strategies};
use crate::parameters::{Additive, ParameterUpdate};
use crate::properties::Properties;
use crate::report::{Reporter, SolverStats};
use crate::residuals::Measurement;
use crate::robust::{RobustKernel, RobustKind};
use crate::schur::SolveFailure;
use crate::settings::{OptimizerSettings, SettingsError};
use crate::structure::ProblemStructure;

/// Errors returned by [`Optimizer`]. The failing call leaves the optimizer unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum OptimizerError {
    Settings(SettingsError),
    Graph(GraphError),
    Solve(SolveFailure),
    /// The call needs `initialize()` first.
    NotInitialized,
    AlreadyInitialized,
    /// Parameters are not readable between `initialize()` and `finalize()`.
    NotFinalized,
    /// The optimizer was finalized; the graph can only be read.
    AlreadyFinalized,
    /// `initialize()` needs at least one edge.
    EmptyGraph,
    UnknownVertex { kind: VertexKind, id: u64 },
}

impl fmt::Display for OptimizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Settings(err) => write!(f, "invalid settings: {err}"),
            Self::Graph(err) => write!(f, "graph error: {err}"),
            Self::Solve(err) => write!(f, "solve failed: {err}"),
            Self::NotInitialized => write!(f, "optimizer is not initialized"),
            Self::AlreadyInitialized => write!(f, "optimizer is already initialized"),
            Self::NotFinalized => {
                write!(f, "parameters are only readable before initialize or after finalize")
            }
            Self::AlreadyFinalized => write!(f, "optimizer is already finalized"),
            Self::EmptyGraph => write!(f, "graph has no edges"),
            Self::UnknownVertex { kind, id } => write!(f, "{kind} vertex {id} does not exist"),
        }
    }
}

impl std::error::Error for OptimizerError {}

impl From<SettingsError> for OptimizerError {
    fn from(err: SettingsError) -> Self {
        Self::Settings(err)
    }
}

impl From<GraphError> for OptimizerError {
    fn from(err: GraphError) -> Self {
        Self::Graph(err)
    }
}

impl From<SolveFailure> for OptimizerError {
    fn from(err: SolveFailure) -> Self {
        Self::Solve(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Building,
    Initialized,
    Finalized,
}

/// Bundle-adjustment style optimizer over a bipartite graph.
///
/// Usage is bracketed: add vertices and edges, `initialize()`, run
/// `optimize()` any number of times, then `finalize()` to write the
/// optimized values back into the graph.
pub struct Optimizer {
    settings: OptimizerSettings,
    graph: Graph,
    measurement: Box<dyn Measurement>,
    type1_update: Box<dyn ParameterUpdate>,
    type2_update: Box<dyn ParameterUpdate>,
    kernel: Option<Box<dyn RobustKernel>>,
    structure: Option<ProblemStructure>,
    stage: Stage,
}

fn reject<T>(err: impl Into<OptimizerError>) -> Result<T, OptimizerError> {
    let err = err.into();
    log::warn!("{err}");
    Err(err)
}

impl Optimizer {
    pub fn new(
        settings: OptimizerSettings,
        measurement: impl Measurement + 'static,
    ) -> Result<Self, OptimizerError> {
        if let Err(err) = settings.validate() {
            return reject(err);
        }
        let graph = Graph::new(
            settings.vertex1_size,
            settings.vertex2_size,
            settings.edge_size,
        );
        Ok(Self {
            kernel: settings.robust.build(),
            settings,
            graph,
            measurement: Box::new(measurement),
            type1_update: Box::new(Additive),
            type2_update: Box::new(Additive),
            structure: None,
            stage: Stage::Building,
        })
    }

    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    pub fn properties(&self) -> &Properties {
        self.graph.properties()
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Update rule for type-1 vertices, e.g. a pose retraction.
    pub fn set_type1_update(&mut self, rule: impl ParameterUpdate + 'static) {
        self.type1_update = Box::new(rule);
    }

    pub fn set_type2_update(&mut self, rule: impl ParameterUpdate + 'static) {
        self.type2_update = Box::new(rule);
    }

    /// Replace the configured kernel; the settings then report `RobustKind::Custom`.
    pub fn set_robust_kernel(&mut self, kernel: impl RobustKernel + 'static) {
        self.kernel = Some(Box::new(kernel));
        self.settings.robust = RobustKind::Custom;
    }

    fn check_building(&self) -> Result<(), OptimizerError> {
        match self.stage {
            Stage::Building => Ok(()),
            Stage::Initialized => reject(GraphError::Frozen),
            Stage::Finalized => reject(OptimizerError::AlreadyFinalized),
        }
    }

    pub fn add_vertex_type1(
        &mut self,
        id: u64,
        parameters: &[f64],
        fixed: bool,
    ) -> Result<(), OptimizerError> {
        self.check_building()?;
        match self.graph.add_vertex1(id, parameters, fixed) {
            Ok(_) => Ok(()),
            Err(err) => reject(err),
        }
    }

    pub fn add_vertex_type2(
        &mut self,
        id: u64,
        parameters: &[f64],
        fixed: bool,
    ) -> Result<(), OptimizerError> {
        self.check_building()?;
        match self.graph.add_vertex2(id, parameters, fixed) {
            Ok(_) => Ok(()),
            Err(err) => reject(err),
        }
    }

    pub fn add_edge(
        &mut self,
        id: u64,
        vertex1: u64,
        vertex2: u64,
        observation: &[f64],
        sigma: &[f64],
    ) -> Result<(), OptimizerError> {
        self.check_building()?;
        match self
            .graph
            .add_edge(id, vertex1, vertex2, observation, sigma)
        {
            Ok(()) => Ok(()),
            Err(err) => reject(err),
        }
    }

    /// Freeze the graph and allocate every block buffer. Call exactly once.
    pub fn initialize(&mut self) -> Result<(), OptimizerError> {
        match self.stage {
            Stage::Building => {}
            Stage::Initialized => return reject(OptimizerError::AlreadyInitialized),
            Stage::Finalized => return reject(OptimizerError::AlreadyFinalized),
        }
        if self.graph.properties().num_edges == 0 {
            return reject(OptimizerError::EmptyGraph);
        }
        self.graph.freeze();
        let fixed = self
            .graph
            .vertices1()
            .iter()
            .chain(self.graph.vertices2())
            .filter(|v| v.is_fixed())
            .count();
        if fixed > 0 {
            log::debug!("{fixed} vertices are marked fixed; the flag is advisory");
        }
        self.structure = Some(ProblemStructure::new(&self.graph));
        self.stage = Stage::Initialized;
        Ok(())
    }

    fn structure_mut(&mut self) -> Result<&mut ProblemStructure, OptimizerError> {
        match (self.stage, self.structure.as_mut()) {
            (Stage::Initialized, Some(structure)) => Ok(structure),
            (Stage::Finalized, _) => reject(OptimizerError::AlreadyFinalized),
            _ => reject(OptimizerError::NotInitialized),
        }
    }

    /// Read-only view of the block pipeline between `initialize` and `finalize`.
    pub fn structure(&self) -> Option<&ProblemStructure> {
        self.structure.as_ref()
    }

    /// Run Levenberg-Marquardt for at most `max_iterations` outer iterations.
    pub fn optimize(&mut self, max_iterations: usize) -> Result<SolverStats, OptimizerError> {
        self.run(max_iterations, None)
    }

    /// `optimize` with the iteration budget from the settings.
    pub fn optimize_default(&mut self) -> Result<SolverStats, OptimizerError> {
        self.run(self.settings.max_iterations, None)
    }

    pub fn optimize_with_reporter(
        &mut self,
        max_iterations: usize,
        reporter: &mut dyn Reporter,
    ) -> Result<SolverStats, OptimizerError> {
        self.run(max_iterations, Some(reporter))
    }

    fn run(
        &mut self,
        max_iterations: usize,
        reporter: Option<&mut dyn Reporter>,
    ) -> Result<SolverStats, OptimizerError> {
        self.structure_mut()?;
        let Self {
            settings,
            measurement,
            type1_update,
            type2_update,
            kernel,
            structure,
            ..
        } = self;
        let Some(structure) = structure.as_mut() else {
            return reject(OptimizerError::NotInitialized);
        };
        let stats = lm::run(
            structure,
            Strategies {
                measurement: &mut **measurement,
                kernel: kernel.as_deref(),
                type1_update: &**type1_update,
                type2_update: &**type2_update,
            },
            settings,
            max_iterations,
            reporter,
        );
        Ok(stats)
    }

    /// Evaluate residuals, Jacobian, Hessian and b at the current values.
    pub fn linearize(&mut self) -> Result<f64, OptimizerError> {
        self.structure_mut()?;
        let Self {
            measurement,
            kernel,
            structure,
            ..
        } = self;
        let Some(structure) = structure.as_mut() else {
            return reject(OptimizerError::NotInitialized);
        };
        let norm = structure.evaluate(&mut **measurement, kernel.as_deref());
        structure.linearize(&mut **measurement);
        Ok(norm)
    }

    /// One damped Schur solve at the last linearization point, without applying it.
    ///
    /// Returns the full update: type-1 prefix, type-2 suffix.
    pub fn compute_step(&mut self, lambda: f64) -> Result<DVector<f64>, OptimizerError> {
        let structure = self.structure_mut()?;
        if let Err(err) = structure.solve(lambda) {
            return reject(err);
        }
        Ok(structure.update().clone())
    }

    /// Copy the optimized values into the graph and release the block buffers.
    pub fn finalize(&mut self) -> Result<(), OptimizerError> {
        self.structure_mut()?;
        let Some(structure) = self.structure.take() else {
            return reject(OptimizerError::NotInitialized);
        };
        self.graph
            .store_parameters(structure.parameters().values().as_slice());
        self.stage = Stage::Finalized;
        Ok(())
    }

    pub fn vertex1_parameters(&self, id: u64) -> Result<&[f64], OptimizerError> {
        self.check_readable()?;
        match self.graph.vertex1(id) {
            Some(vertex) => Ok(vertex.parameters()),
            None => reject(OptimizerError::UnknownVertex {
                kind: VertexKind::Type1,
                id,
            }),
        }
    }

    pub fn vertex2_parameters(&self, id: u64) -> Result<&[f64], OptimizerError> {
        self.check_readable()?;
        match self.graph.vertex2(id) {
            Some(vertex) => Ok(vertex.parameters()),
            None => reject(OptimizerError::UnknownVertex {
                kind: VertexKind::Type2,
                id,
            }),
        }
    }

    fn check_readable(&self) -> Result<(), OptimizerError> {
        if self.stage == Stage::Initialized {
            return reject(OptimizerError::NotFinalized);
        }
        Ok(())
    }
}
