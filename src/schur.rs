use core::fmt;

use nalgebra::{DMatrix, DMatrixView, DVector};

use crate::gradient::Gradient;
use crate::hessian::Hessian;
use crate::properties::Properties;
use crate::structure::Wiring;

/// A Cholesky factorization failed during a Schur solve.
///
/// Both the B blocks and the reduced system are factorized with Cholesky,
/// which needs them positive definite. With `lambda > 0`, as the LM loop
/// always uses, `J^T J + lambda I` and its Schur complement are; a
/// non-positive `lambda` passed to `Optimizer::compute_step` can fail here
/// where a pivoted LDL^T would still produce a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveFailure {
    /// The damped B block of a type-2 vertex is not positive definite.
    MarginalizedBlock { vertex2: usize },
    /// The reduced type-1 system is not positive definite.
    ReducedSystem,
}

impl fmt::Display for SolveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MarginalizedBlock { vertex2 } => {
                write!(f, "factorization of B block of type-2 vertex {vertex2} failed")
            }
            Self::ReducedSystem => write!(f, "factorization of the reduced system failed"),
        }
    }
}

impl std::error::Error for SolveFailure {}

/// Solves `(H + lambda I) delta = b` by eliminating the type-2 vertices.
///
/// Buffers are sized once from the problem dimensions: `B^-1` blocks side by
/// side like `B`, one `Y = W B^-1` block per edge, and the dense reduced
/// system over all type-1 parameters.
#[derive(Debug, Clone)]
pub struct SchurSolver {
    vertex1_size: usize,
    vertex2_size: usize,
    b_inverse: DMatrix<f64>,
    y: DMatrix<f64>,
    reduced_hessian: DMatrix<f64>,
    reduced_b: DVector<f64>,
}

impl SchurSolver {
    pub fn new(properties: &Properties) -> Self {
        let s1 = properties.vertex1_size;
        let s2 = properties.vertex2_size;
        let n1 = properties.total_type1_parameters;
        Self {
            vertex1_size: s1,
            vertex2_size: s2,
            b_inverse: DMatrix::zeros(s2, s2 * properties.num_vertices2),
            y: DMatrix::zeros(s1, s2 * properties.num_edges),
            reduced_hessian: DMatrix::zeros(n1, n1),
            reduced_b: DVector::zeros(n1),
        }
    }

    /// Damp `hessian` to `lambda` and write the full update into `delta`.
    ///
    /// On failure `delta` is left in an unspecified state and the damping stays applied.
    pub fn solve(
        &mut self,
        wiring: &Wiring,
        hessian: &mut Hessian,
        gradient: &Gradient,
        lambda: f64,
        delta: &mut DVector<f64>,
    ) -> Result<(), SolveFailure> {
        let s1 = self.vertex1_size;
        let s2 = self.vertex2_size;
        hessian.damp(lambda);

        for vertex2 in 0..wiring.num_vertices2() {
            let inverse = hessian
                .b_block(vertex2)
                .clone_owned()
                .cholesky()
                .ok_or(SolveFailure::MarginalizedBlock { vertex2 })?
                .inverse();
            self.b_inverse
                .columns_mut(vertex2 * s2, s2)
                .copy_from(&inverse);
        }

        for (edge, &(_, vertex2)) in wiring.edge_vertices().iter().enumerate() {
            let y = hessian.w_block(edge) * self.b_inverse.columns(vertex2 * s2, s2);
            self.y.columns_mut(edge * s2, s2).copy_from(&y);
        }

        // S = A - sum over shared points of Y W^T
        self.reduced_hessian.fill(0.0);
        for vertex2 in 0..wiring.num_vertices2() {
            let edges = wiring.edges_of_vertex2(vertex2);
            for &row_edge in edges {
                let row = wiring.edge_vertices()[row_edge].0;
                let y = self.y.columns(row_edge * s2, s2);
                for &col_edge in edges {
                    let col = wiring.edge_vertices()[col_edge].0;
                    let product = &y * hessian.w_block(col_edge).transpose();
                    let mut block = self
                        .reduced_hessian
                        .view_mut((row * s1, col * s1), (s1, s1));
                    block -= product;
                }
            }
        }
        for vertex1 in 0..wiring.num_vertices1() {
            let mut block = self
                .reduced_hessian
                .view_mut((vertex1 * s1, vertex1 * s1), (s1, s1));
            block += hessian.a_block(vertex1);
        }

        let b2 = gradient.marginalized();
        self.reduced_b.copy_from(&gradient.active());
        for (edge, &(vertex1, vertex2)) in wiring.edge_vertices().iter().enumerate() {
            let correction = self.y.columns(edge * s2, s2) * b2.rows(vertex2 * s2, s2);
            let mut rows = self.reduced_b.rows_mut(vertex1 * s1, s1);
            rows -= correction;
        }

        let delta1 = self
            .reduced_hessian
            .clone()
            .cholesky()
            .ok_or(SolveFailure::ReducedSystem)?
            .solve(&self.reduced_b);
        let split = delta1.len();
        delta.rows_mut(0, split).copy_from(&delta1);

        for vertex2 in 0..wiring.num_vertices2() {
            let mut rhs = b2.rows(vertex2 * s2, s2).clone_owned();
            for &edge in wiring.edges_of_vertex2(vertex2) {
                let vertex1 = wiring.edge_vertices()[edge].0;
                rhs -= hessian.w_block(edge).tr_mul(&delta1.rows(vertex1 * s1, s1));
            }
            let delta2 = self.b_inverse.columns(vertex2 * s2, s2) * rhs;
            delta.rows_mut(split + vertex2 * s2, s2).copy_from(&delta2);
        }

        Ok(())
    }

    pub fn b_inverse_block(&self, vertex2: usize) -> DMatrixView<'_, f64> {
        self.b_inverse
            .columns(vertex2 * self.vertex2_size, self.vertex2_size)
    }

    /// `Y = W B^-1` block of an edge.
    pub fn y_block(&self, edge: usize) -> DMatrixView<'_, f64> {
        self.y.columns(edge * self.vertex2_size, self.vertex2_size)
    }

    /// Reduced Hessian of the last solve, damped.
    pub fn reduced_hessian(&self) -> &DMatrix<f64> {
        &self.reduced_hessian
    }

    pub fn reduced_b(&self) -> &DVector<f64> {
        &self.reduced_b
    }
}
