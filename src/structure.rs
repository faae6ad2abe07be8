use nalgebra::DVector;

use crate::gradient::Gradient;
use crate::graph::Graph;
use crate::hessian::Hessian;
use crate::jacobian::Jacobian;
use crate::parameters::{ParameterStore, ParameterUpdate};
use crate::properties::Properties;
use crate::residuals::{Measurement, Residuals};
use crate::robust::RobustKernel;
use crate::schur::{SchurSolver, SolveFailure};

/// Edge to vertex incidence, fixed when the graph is frozen.
///
/// Edge `e` contributes to `A[v1]`, `B[v2]` and `W[e]` where
/// `(v1, v2) = edge_vertices()[e]`; nothing else routes block contributions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wiring {
    edge_vertices: Vec<(usize, usize)>,
    edges_of_vertex1: Vec<Vec<usize>>,
    edges_of_vertex2: Vec<Vec<usize>>,
}

impl Wiring {
    pub fn from_graph(graph: &Graph) -> Self {
        debug_assert!(graph.is_frozen(), "wiring built before freeze");
        let properties = graph.properties();
        let mut edge_vertices = vec![(0, 0); properties.num_edges];
        let mut edges_of_vertex1: Vec<Vec<usize>> = properties
            .observations_per_vertex1
            .iter()
            .map(|&count| Vec::with_capacity(count))
            .collect();
        let mut edges_of_vertex2: Vec<Vec<usize>> = properties
            .observations_per_vertex2
            .iter()
            .map(|&count| Vec::with_capacity(count))
            .collect();
        for edge in graph.edges() {
            edge_vertices[edge.local()] = (edge.vertex1(), edge.vertex2());
            edges_of_vertex1[edge.vertex1()].push(edge.local());
            edges_of_vertex2[edge.vertex2()].push(edge.local());
        }
        Self {
            edge_vertices,
            edges_of_vertex1,
            edges_of_vertex2,
        }
    }

    /// `(vertex1, vertex2)` local indices per edge location.
    pub fn edge_vertices(&self) -> &[(usize, usize)] {
        &self.edge_vertices
    }

    pub fn edges_of_vertex1(&self, vertex1: usize) -> &[usize] {
        &self.edges_of_vertex1[vertex1]
    }

    pub fn edges_of_vertex2(&self, vertex2: usize) -> &[usize] {
        &self.edges_of_vertex2[vertex2]
    }

    pub fn num_vertices1(&self) -> usize {
        self.edges_of_vertex1.len()
    }

    pub fn num_vertices2(&self) -> usize {
        self.edges_of_vertex2.len()
    }
}

/// Owner of every buffer used between `initialize` and `finalize`.
///
/// Stages borrow each other's outputs only for the duration of a call, so
/// the whole pipeline is inspectable through the accessors.
#[derive(Debug, Clone)]
pub struct ProblemStructure {
    properties: Properties,
    wiring: Wiring,
    parameters: ParameterStore,
    residuals: Residuals,
    jacobian: Jacobian,
    hessian: Hessian,
    gradient: Gradient,
    solver: SchurSolver,
}

impl ProblemStructure {
    pub fn new(graph: &Graph) -> Self {
        let properties = graph.properties().clone();
        Self {
            wiring: Wiring::from_graph(graph),
            parameters: ParameterStore::from_graph(graph),
            residuals: Residuals::from_graph(graph),
            jacobian: Jacobian::new(&properties),
            hessian: Hessian::new(&properties),
            gradient: Gradient::new(&properties),
            solver: SchurSolver::new(&properties),
            properties,
        }
    }

    /// Recompute the weighted residuals; returns their norm.
    pub fn evaluate(
        &mut self,
        measurement: &mut dyn Measurement,
        kernel: Option<&dyn RobustKernel>,
    ) -> f64 {
        self.residuals.evaluate(
            &self.properties,
            &self.wiring,
            &self.parameters,
            measurement,
            kernel,
        )
    }

    /// Jacobian, Hessian and b at the current parameters, reusing the row
    /// weights of the last `evaluate`.
    pub fn linearize(&mut self, measurement: &mut dyn Measurement) {
        self.jacobian.compute(
            &self.properties,
            &self.wiring,
            &self.parameters,
            measurement,
            self.residuals.weights(),
        );
        self.hessian.build(&self.wiring, &self.jacobian);
        self.gradient.build(
            &self.properties,
            &self.wiring,
            &self.jacobian,
            &self.residuals,
        );
    }

    /// Solve the damped system into the parameter update buffer.
    pub fn solve(&mut self, lambda: f64) -> Result<(), SolveFailure> {
        self.solver.solve(
            &self.wiring,
            &mut self.hessian,
            &self.gradient,
            lambda,
            self.parameters.update_mut(),
        )
    }

    /// Apply the update buffer after snapshotting parameters and residuals.
    pub fn apply_update(&mut self, type1: &dyn ParameterUpdate, type2: &dyn ParameterUpdate) {
        self.residuals.back_up();
        self.parameters.apply_update(type1, type2);
    }

    /// Undo the last `apply_update` and the evaluation that followed it.
    pub fn restore(&mut self) {
        self.parameters.restore();
        self.residuals.restore();
    }

    /// `lambda * |delta|^2 + delta . b`, the model reduction of the squared norm.
    pub fn predicted_reduction(&self, lambda: f64) -> f64 {
        let delta = self.parameters.update();
        lambda * delta.norm_squared() + delta.dot(self.gradient.values())
    }

    pub fn update(&self) -> &DVector<f64> {
        self.parameters.update()
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn wiring(&self) -> &Wiring {
        &self.wiring
    }

    pub fn parameters(&self) -> &ParameterStore {
        &self.parameters
    }

    pub fn residuals(&self) -> &Residuals {
        &self.residuals
    }

    pub fn jacobian(&self) -> &Jacobian {
        &self.jacobian
    }

    pub fn hessian(&self) -> &Hessian {
        &self.hessian
    }

    pub fn gradient(&self) -> &Gradient {
        &self.gradient
    }

    pub fn solver(&self) -> &SchurSolver {
        &self.solver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::Additive;

    fn sum(vertex1: &[f64], vertex2: &[f64], out: &mut [f64]) {
        for ((o, a), b) in out.iter_mut().zip(vertex1).zip(vertex2) {
            *o = a + b;
        }
    }

    fn graph() -> Graph {
        let mut graph = Graph::new(2, 2, 2);
        graph.add_vertex1(100, &[0.0, 0.0], false).unwrap();
        graph.add_vertex1(101, &[1.0, 1.0], false).unwrap();
        graph.add_vertex2(200, &[0.0, 0.0], false).unwrap();
        graph.add_vertex2(201, &[0.5, 0.5], false).unwrap();
        graph.add_edge(0, 101, 201, &[2.0, 2.0], &[1.0, 1.0]).unwrap();
        graph.add_edge(1, 100, 200, &[1.0, 1.0], &[1.0, 1.0]).unwrap();
        graph.add_edge(2, 101, 200, &[1.0, 2.0], &[1.0, 1.0]).unwrap();
        graph.freeze();
        graph
    }

    #[test]
    fn wiring_lists_every_edge_once() {
        let graph = graph();
        let wiring = Wiring::from_graph(&graph);
        assert_eq!(wiring.edge_vertices(), &[(0, 0), (1, 0), (1, 1)]);
        assert_eq!(wiring.edges_of_vertex1(0), &[0]);
        assert_eq!(wiring.edges_of_vertex1(1), &[1, 2]);
        assert_eq!(wiring.edges_of_vertex2(0), &[0, 1]);
        assert_eq!(wiring.edges_of_vertex2(1), &[2]);
        let total: usize = (0..wiring.num_vertices1())
            .map(|v| wiring.edges_of_vertex1(v).len())
            .sum();
        assert_eq!(total, graph.properties().num_edges);
    }

    #[test]
    fn restore_undoes_update_and_evaluation() {
        let graph = graph();
        let mut structure = ProblemStructure::new(&graph);
        let mut measurement = sum;
        let norm = structure.evaluate(&mut measurement, None);
        structure.linearize(&mut measurement);
        structure.solve(1e-3).unwrap();
        assert!(structure.predicted_reduction(1e-3) > 0.0);

        let before = structure.parameters().values().clone();
        structure.apply_update(&Additive, &Additive);
        let trial = structure.evaluate(&mut measurement, None);
        assert!(trial < norm);

        structure.restore();
        assert_eq!(structure.parameters().values(), &before);
        assert_eq!(structure.residuals().norm(), norm);
    }
}
