/// Dimensions of a bipartite problem, fixed once the graph is frozen.
///
/// Observation counts are tracked per vertex while edges are added; block
/// index tables are sized from them when the structure is built, so they must
/// be complete before `initialize()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    pub num_edges: usize,
    pub edge_size: usize,
    pub vertex1_size: usize,
    pub vertex2_size: usize,
    pub num_vertices1: usize,
    pub num_vertices2: usize,
    /// `num_edges * edge_size`.
    pub total_observations: usize,
    /// `num_vertices1 * vertex1_size`.
    pub total_type1_parameters: usize,
    /// `num_vertices2 * vertex2_size`.
    pub total_type2_parameters: usize,
    /// `total_type1_parameters + total_type2_parameters`.
    pub total_width: usize,
    pub observations_per_vertex1: Vec<usize>,
    pub observations_per_vertex2: Vec<usize>,
    initialized: bool,
}

impl Properties {
    pub fn new(vertex1_size: usize, vertex2_size: usize, edge_size: usize) -> Self {
        Self {
            vertex1_size,
            vertex2_size,
            edge_size,
            ..Self::default()
        }
    }

    /// Derive the totals from the counts.
    pub fn initialize(&mut self) {
        debug_assert_eq!(self.observations_per_vertex1.len(), self.num_vertices1);
        debug_assert_eq!(self.observations_per_vertex2.len(), self.num_vertices2);
        self.total_observations = self.num_edges * self.edge_size;
        self.total_type1_parameters = self.num_vertices1 * self.vertex1_size;
        self.total_type2_parameters = self.num_vertices2 * self.vertex2_size;
        self.total_width = self.total_type1_parameters + self.total_type2_parameters;
        self.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub(crate) fn register_vertex1(&mut self) -> usize {
        let local = self.num_vertices1;
        self.num_vertices1 += 1;
        self.observations_per_vertex1.push(0);
        local
    }

    pub(crate) fn register_vertex2(&mut self) -> usize {
        let local = self.num_vertices2;
        self.num_vertices2 += 1;
        self.observations_per_vertex2.push(0);
        local
    }

    pub(crate) fn register_edge(&mut self, vertex1: usize, vertex2: usize) {
        self.num_edges += 1;
        self.observations_per_vertex1[vertex1] += 1;
        self.observations_per_vertex2[vertex2] += 1;
    }

    /// Offset of a type-1 vertex inside the full parameter/b vector.
    pub fn vertex1_offset(&self, vertex1: usize) -> usize {
        vertex1 * self.vertex1_size
    }

    /// Offset of a type-2 vertex inside the full parameter/b vector.
    pub fn vertex2_offset(&self, vertex2: usize) -> usize {
        self.total_type1_parameters + vertex2 * self.vertex2_size
    }

    /// Row range of an edge inside the residual vector and the Jacobians.
    pub fn edge_rows(&self, edge: usize) -> std::ops::Range<usize> {
        edge * self.edge_size..(edge + 1) * self.edge_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_add_up_after_initialize() {
        let mut p = Properties::new(6, 3, 2);
        for _ in 0..4 {
            p.register_vertex1();
        }
        for _ in 0..7 {
            p.register_vertex2();
        }
        p.register_edge(0, 0);
        p.register_edge(3, 6);
        p.initialize();

        assert!(p.is_initialized());
        assert_eq!(p.total_type1_parameters, 24);
        assert_eq!(p.total_type2_parameters, 21);
        assert_eq!(
            p.total_width,
            p.total_type1_parameters + p.total_type2_parameters
        );
        assert_eq!(p.total_observations, 4);
        assert_eq!(p.observations_per_vertex1, vec![1, 0, 0, 1]);
        assert_eq!(p.vertex2_offset(1), 27);
        assert_eq!(p.edge_rows(1), 2..4);
    }
}
