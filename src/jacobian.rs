use nalgebra::{DMatrix, DMatrixView, DVector};

use crate::parameters::ParameterStore;
use crate::properties::Properties;
use crate::residuals::Measurement;
use crate::structure::Wiring;

/// Forward-difference step applied to each parameter component.
pub const DIFFERENCE_STEP: f64 = 1e-6;

/// Numeric Jacobian of the measurement model, stored as two tall matrices
/// whose row ranges line up with the residual vector.
///
/// `type1` is `total_observations x vertex1_size`, `type2` is
/// `total_observations x vertex2_size`; the block of edge `e` is the row
/// range `properties.edge_rows(e)` of each.
#[derive(Debug, Clone)]
pub struct Jacobian {
    edge_size: usize,
    type1: DMatrix<f64>,
    type2: DMatrix<f64>,
    point1: Vec<f64>,
    point2: Vec<f64>,
    base: Vec<f64>,
    perturbed: Vec<f64>,
}

impl Jacobian {
    pub fn new(properties: &Properties) -> Self {
        Self {
            edge_size: properties.edge_size,
            type1: DMatrix::zeros(properties.total_observations, properties.vertex1_size),
            type2: DMatrix::zeros(properties.total_observations, properties.vertex2_size),
            point1: vec![0.0; properties.vertex1_size],
            point2: vec![0.0; properties.vertex2_size],
            base: vec![0.0; properties.edge_size],
            perturbed: vec![0.0; properties.edge_size],
        }
    }

    /// Fill every edge block by forward differences, then scale each row by `weights`.
    pub fn compute(
        &mut self,
        properties: &Properties,
        wiring: &Wiring,
        parameters: &ParameterStore,
        measurement: &mut dyn Measurement,
        weights: &DVector<f64>,
    ) {
        for (edge, &(vertex1, vertex2)) in wiring.edge_vertices().iter().enumerate() {
            let row = properties.edge_rows(edge).start;
            self.point1.copy_from_slice(parameters.vertex1(vertex1));
            self.point2.copy_from_slice(parameters.vertex2(vertex2));
            measurement.predict(&self.point1, &self.point2, &mut self.base);

            for k in 0..self.point1.len() {
                let saved = self.point1[k];
                self.point1[k] = saved + DIFFERENCE_STEP;
                measurement.predict(&self.point1, &self.point2, &mut self.perturbed);
                self.point1[k] = saved;
                for (i, (p, b)) in self.perturbed.iter().zip(&self.base).enumerate() {
                    self.type1[(row + i, k)] = (p - b) / DIFFERENCE_STEP;
                }
            }
            for k in 0..self.point2.len() {
                let saved = self.point2[k];
                self.point2[k] = saved + DIFFERENCE_STEP;
                measurement.predict(&self.point1, &self.point2, &mut self.perturbed);
                self.point2[k] = saved;
                for (i, (p, b)) in self.perturbed.iter().zip(&self.base).enumerate() {
                    self.type2[(row + i, k)] = (p - b) / DIFFERENCE_STEP;
                }
            }
        }

        for (mut row, &w) in self.type1.row_iter_mut().zip(weights.iter()) {
            row *= w;
        }
        for (mut row, &w) in self.type2.row_iter_mut().zip(weights.iter()) {
            row *= w;
        }
    }

    /// `edge_size x vertex1_size` block of an edge.
    pub fn block1(&self, edge: usize) -> DMatrixView<'_, f64> {
        self.type1.rows(edge * self.edge_size, self.edge_size)
    }

    /// `edge_size x vertex2_size` block of an edge.
    pub fn block2(&self, edge: usize) -> DMatrixView<'_, f64> {
        self.type2.rows(edge * self.edge_size, self.edge_size)
    }

    pub fn type1(&self) -> &DMatrix<f64> {
        &self.type1
    }

    pub fn type2(&self) -> &DMatrix<f64> {
        &self.type2
    }
}
