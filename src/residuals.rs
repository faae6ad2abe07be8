use nalgebra::{DVector, DVectorView};

use crate::graph::Graph;
use crate::parameters::ParameterStore;
use crate::properties::Properties;
use crate::robust::RobustKernel;
use crate::structure::Wiring;

/// Measurement model `f(vertex1, vertex2)` predicting one edge observation.
///
/// `out` has the edge size and is fully overwritten.
pub trait Measurement {
    fn predict(&mut self, vertex1: &[f64], vertex2: &[f64], out: &mut [f64]);
}

impl<F> Measurement for F
where
    F: FnMut(&[f64], &[f64], &mut [f64]),
{
    fn predict(&mut self, vertex1: &[f64], vertex2: &[f64], out: &mut [f64]) {
        self(vertex1, vertex2, out)
    }
}

/// Weighted residual vector `w .* (z - f(x))`, one slice per edge.
///
/// `weights` holds the full per-row scaling (inverse sigma times robust
/// weight) of the last evaluation; the Jacobian rows are scaled by the same
/// vector.
#[derive(Debug, Clone)]
pub struct Residuals {
    edge_size: usize,
    observations: DVector<f64>,
    information: DVector<f64>,
    values: DVector<f64>,
    weights: DVector<f64>,
    backup_values: DVector<f64>,
    backup_weights: DVector<f64>,
    prediction: Vec<f64>,
}

impl Residuals {
    pub fn from_graph(graph: &Graph) -> Self {
        let properties = graph.properties();
        let n = properties.total_observations;
        let mut observations = DVector::zeros(n);
        let mut information = DVector::zeros(n);
        for edge in graph.edges() {
            let rows = properties.edge_rows(edge.local());
            observations
                .rows_mut(rows.start, rows.len())
                .copy_from_slice(edge.observation());
            for (info, sigma) in information.as_mut_slice()[rows].iter_mut().zip(edge.sigma()) {
                *info = sigma.recip();
            }
        }
        Self {
            edge_size: properties.edge_size,
            weights: information.clone(),
            backup_weights: information.clone(),
            observations,
            information,
            values: DVector::zeros(n),
            backup_values: DVector::zeros(n),
            prediction: vec![0.0; properties.edge_size],
        }
    }

    /// Evaluate every edge at the current parameters and return the residual norm.
    pub fn evaluate(
        &mut self,
        properties: &Properties,
        wiring: &Wiring,
        parameters: &ParameterStore,
        measurement: &mut dyn Measurement,
        kernel: Option<&dyn RobustKernel>,
    ) -> f64 {
        for (edge, &(vertex1, vertex2)) in wiring.edge_vertices().iter().enumerate() {
            let rows = properties.edge_rows(edge);
            measurement.predict(
                parameters.vertex1(vertex1),
                parameters.vertex2(vertex2),
                &mut self.prediction,
            );
            for ((r, z), f) in self.values.as_mut_slice()[rows.clone()]
                .iter_mut()
                .zip(&self.observations.as_slice()[rows])
                .zip(&self.prediction)
            {
                *r = z - f;
            }
        }

        self.values.component_mul_assign(&self.information);
        self.weights.copy_from(&self.information);
        if let Some(kernel) = kernel {
            for (r, w) in self.values.iter_mut().zip(self.weights.iter_mut()) {
                let weight = kernel.weight(*r);
                *r *= weight;
                *w *= weight;
            }
        }
        self.norm()
    }

    pub fn values(&self) -> &DVector<f64> {
        &self.values
    }

    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }

    /// Inverse sigma per row.
    pub fn information(&self) -> &DVector<f64> {
        &self.information
    }

    pub fn edge(&self, edge: usize) -> DVectorView<'_, f64> {
        self.values.rows(edge * self.edge_size, self.edge_size)
    }

    pub fn norm(&self) -> f64 {
        self.values.norm()
    }

    pub fn back_up(&mut self) {
        self.backup_values.copy_from(&self.values);
        self.backup_weights.copy_from(&self.weights);
    }

    pub fn restore(&mut self) {
        self.values.copy_from(&self.backup_values);
        self.weights.copy_from(&self.backup_weights);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robust::Huber;

    fn sum(vertex1: &[f64], vertex2: &[f64], out: &mut [f64]) {
        for ((o, a), b) in out.iter_mut().zip(vertex1).zip(vertex2) {
            *o = a + b;
        }
    }

    fn setup() -> (Graph, Wiring, ParameterStore) {
        let mut graph = Graph::new(2, 2, 2);
        graph.add_vertex1(0, &[1.0, 1.0], false).unwrap();
        graph.add_vertex2(0, &[0.0, 2.0], false).unwrap();
        graph.add_edge(0, 0, 0, &[5.0, 3.0], &[0.5, 2.0]).unwrap();
        graph.freeze();
        let wiring = Wiring::from_graph(&graph);
        let parameters = ParameterStore::from_graph(&graph);
        (graph, wiring, parameters)
    }

    #[test]
    fn information_scales_each_row() {
        let (graph, wiring, parameters) = setup();
        let mut residuals = Residuals::from_graph(&graph);
        let norm = residuals.evaluate(graph.properties(), &wiring, &parameters, &mut sum, None);
        // raw residual [4, 0], inverse sigma [2, 0.5]
        assert_eq!(residuals.values().as_slice(), &[8.0, 0.0]);
        assert_eq!(residuals.weights().as_slice(), &[2.0, 0.5]);
        assert!((norm - 8.0).abs() < 1e-15);
    }

    #[test]
    fn robust_weight_follows_information() {
        let (graph, wiring, parameters) = setup();
        let mut residuals = Residuals::from_graph(&graph);
        let kernel = Huber::new(4.0);
        residuals.evaluate(
            graph.properties(),
            &wiring,
            &parameters,
            &mut sum,
            Some(&kernel),
        );
        // 8 > sqrt(4), weight 2 / 8
        assert!((residuals.values()[0] - 2.0).abs() < 1e-15);
        assert!((residuals.weights()[0] - 0.5).abs() < 1e-15);
        assert_eq!(residuals.weights()[1], 0.5);
    }

    #[test]
    fn restore_brings_back_weights() {
        let (graph, wiring, parameters) = setup();
        let mut residuals = Residuals::from_graph(&graph);
        residuals.evaluate(graph.properties(), &wiring, &parameters, &mut sum, None);
        residuals.back_up();
        let kernel = Huber::new(1.0);
        residuals.evaluate(
            graph.properties(),
            &wiring,
            &parameters,
            &mut sum,
            Some(&kernel),
        );
        residuals.restore();
        assert_eq!(residuals.values().as_slice(), &[8.0, 0.0]);
        assert_eq!(residuals.weights().as_slice(), &[2.0, 0.5]);
    }
}
