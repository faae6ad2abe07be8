use nalgebra::{DMatrix, DMatrixView};

use crate::jacobian::Jacobian;
use crate::properties::Properties;
use crate::structure::Wiring;

/// Block pieces of the Gauss-Newton Hessian `J^T J`.
///
/// `A` blocks (one per type-1 vertex) are stored side by side in a
/// `vertex1_size x (num_vertices1 * vertex1_size)` matrix, `B` blocks likewise
/// for type-2 vertices, and the per-edge cross blocks `W = J1^T J2` in a
/// `vertex1_size x (num_edges * vertex2_size)` matrix.
#[derive(Debug, Clone)]
pub struct Hessian {
    vertex1_size: usize,
    vertex2_size: usize,
    a: DMatrix<f64>,
    b: DMatrix<f64>,
    w: DMatrix<f64>,
    applied_lambda: f64,
}

impl Hessian {
    pub fn new(properties: &Properties) -> Self {
        let s1 = properties.vertex1_size;
        let s2 = properties.vertex2_size;
        Self {
            vertex1_size: s1,
            vertex2_size: s2,
            a: DMatrix::zeros(s1, s1 * properties.num_vertices1),
            b: DMatrix::zeros(s2, s2 * properties.num_vertices2),
            w: DMatrix::zeros(s1, s2 * properties.num_edges),
            applied_lambda: 0.0,
        }
    }

    /// Accumulate all blocks from the weighted Jacobian. Clears any damping.
    pub fn build(&mut self, wiring: &Wiring, jacobian: &Jacobian) {
        let s1 = self.vertex1_size;
        let s2 = self.vertex2_size;
        self.a.fill(0.0);
        self.b.fill(0.0);
        for (edge, &(vertex1, vertex2)) in wiring.edge_vertices().iter().enumerate() {
            let j1 = jacobian.block1(edge);
            let j2 = jacobian.block2(edge);
            let mut a = self.a.columns_mut(vertex1 * s1, s1);
            a += j1.tr_mul(&j1);
            let mut b = self.b.columns_mut(vertex2 * s2, s2);
            b += j2.tr_mul(&j2);
            self.w
                .columns_mut(edge * s2, s2)
                .copy_from(&j1.tr_mul(&j2));
        }
        self.applied_lambda = 0.0;
    }

    /// Damp every diagonal entry of A and B to `lambda`.
    ///
    /// `lambda` is absolute: only the difference to the currently applied
    /// value is added, so repeated calls with growing values do not compound.
    pub fn damp(&mut self, lambda: f64) {
        let delta = lambda - self.applied_lambda;
        if delta == 0.0 {
            return;
        }
        add_to_block_diagonals(&mut self.a, self.vertex1_size, delta);
        add_to_block_diagonals(&mut self.b, self.vertex2_size, delta);
        self.applied_lambda = lambda;
    }

    pub fn applied_lambda(&self) -> f64 {
        self.applied_lambda
    }

    pub fn a_block(&self, vertex1: usize) -> DMatrixView<'_, f64> {
        self.a.columns(vertex1 * self.vertex1_size, self.vertex1_size)
    }

    pub fn b_block(&self, vertex2: usize) -> DMatrixView<'_, f64> {
        self.b.columns(vertex2 * self.vertex2_size, self.vertex2_size)
    }

    pub fn w_block(&self, edge: usize) -> DMatrixView<'_, f64> {
        self.w.columns(edge * self.vertex2_size, self.vertex2_size)
    }

    /// Largest undamped diagonal entry over all A and B blocks.
    pub fn max_diagonal(&self) -> f64 {
        let a = block_diagonals(&self.a, self.vertex1_size);
        let b = block_diagonals(&self.b, self.vertex2_size);
        a.chain(b)
            .map(|d| d - self.applied_lambda)
            .fold(0.0, f64::max)
    }
}

fn block_diagonals(blocks: &DMatrix<f64>, size: usize) -> impl Iterator<Item = f64> + '_ {
    (0..blocks.ncols()).map(move |col| blocks[(col % size, col)])
}

fn add_to_block_diagonals(blocks: &mut DMatrix<f64>, size: usize, delta: f64) {
    for col in 0..blocks.ncols() {
        blocks[(col % size, col)] += delta;
    }
}
