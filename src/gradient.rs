use nalgebra::{DVector, DVectorView};

use crate::jacobian::Jacobian;
use crate::properties::Properties;
use crate::residuals::Residuals;
use crate::structure::Wiring;

/// Right-hand side `b = J^T r`, laid out like the parameter vector.
#[derive(Debug, Clone)]
pub struct Gradient {
    split: usize,
    values: DVector<f64>,
}

impl Gradient {
    pub fn new(properties: &Properties) -> Self {
        Self {
            split: properties.total_type1_parameters,
            values: DVector::zeros(properties.total_width),
        }
    }

    pub fn build(
        &mut self,
        properties: &Properties,
        wiring: &Wiring,
        jacobian: &Jacobian,
        residuals: &Residuals,
    ) {
        self.values.fill(0.0);
        for (edge, &(vertex1, vertex2)) in wiring.edge_vertices().iter().enumerate() {
            let r = residuals.edge(edge);
            let mut b1 = self
                .values
                .rows_mut(properties.vertex1_offset(vertex1), properties.vertex1_size);
            b1 += jacobian.block1(edge).tr_mul(&r);
            let mut b2 = self
                .values
                .rows_mut(properties.vertex2_offset(vertex2), properties.vertex2_size);
            b2 += jacobian.block2(edge).tr_mul(&r);
        }
    }

    pub fn values(&self) -> &DVector<f64> {
        &self.values
    }

    pub fn active(&self) -> DVectorView<'_, f64> {
        self.values.rows(0, self.split)
    }

    pub fn marginalized(&self) -> DVectorView<'_, f64> {
        self.values.rows(self.split, self.values.len() - self.split)
    }

    /// `max |b|`, zero for an empty problem.
    pub fn max_abs(&self) -> f64 {
        self.values.iter().fold(0.0, |m: f64, v| m.max(v.abs()))
    }
}
