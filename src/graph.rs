use core::fmt;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::properties::Properties;

/// Which side of the bipartite graph a vertex lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexKind {
    Type1,
    Type2,
}

impl fmt::Display for VertexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type1 => write!(f, "type-1"),
            Self::Type2 => write!(f, "type-2"),
        }
    }
}

/// Errors raised while building the graph. The rejected call leaves the graph unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphError {
    /// The parameter vector does not match the configured block size.
    ParameterLength {
        kind: VertexKind,
        id: u64,
        expected: usize,
        actual: usize,
    },
    DuplicateVertex { kind: VertexKind, id: u64 },
    UnknownVertex { kind: VertexKind, id: u64 },
    /// The (vertex1, vertex2) pair already carries an edge.
    DuplicateEdge { id: u64, vertex1: u64, vertex2: u64 },
    DuplicateEdgeId { id: u64 },
    MeasurementLength {
        id: u64,
        expected: usize,
        observation: usize,
        sigma: usize,
    },
    /// Sigma components must be positive and finite.
    InvalidSigma { id: u64, component: usize, value: f64 },
    /// Vertices and edges cannot be added once the structure is built.
    Frozen,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParameterLength {
                kind,
                id,
                expected,
                actual,
            } => write!(
                f,
                "{kind} vertex {id}: parameter length {actual} does not match expected {expected}"
            ),
            Self::DuplicateVertex { kind, id } => write!(f, "{kind} vertex {id} already exists"),
            Self::UnknownVertex { kind, id } => write!(f, "{kind} vertex {id} does not exist"),
            Self::DuplicateEdge {
                id,
                vertex1,
                vertex2,
            } => write!(
                f,
                "edge {id}: vertices ({vertex1}, {vertex2}) are already connected"
            ),
            Self::DuplicateEdgeId { id } => write!(f, "edge {id} already exists"),
            Self::MeasurementLength {
                id,
                expected,
                observation,
                sigma,
            } => write!(
                f,
                "edge {id}: observation length {observation} and sigma length {sigma} must both be {expected}"
            ),
            Self::InvalidSigma {
                id,
                component,
                value,
            } => write!(f, "edge {id}: sigma[{component}] = {value} is not positive"),
            Self::Frozen => write!(f, "graph is frozen after initialize"),
        }
    }
}

impl std::error::Error for GraphError {}

#[derive(Debug, Clone)]
pub struct Vertex {
    id: u64,
    local: usize,
    parameters: Vec<f64>,
    fixed: bool,
}

impl Vertex {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Dense index among vertices of the same kind, in insertion order.
    pub fn local(&self) -> usize {
        self.local
    }

    pub fn parameters(&self) -> &[f64] {
        &self.parameters
    }

    /// Advisory only; fixed vertices are still updated by the solver.
    pub fn is_fixed(&self) -> bool {
        self.fixed
    }
}

#[derive(Debug, Clone)]
pub struct Edge {
    id: u64,
    local: usize,
    vertex1: usize,
    vertex2: usize,
    observation: Vec<f64>,
    sigma: Vec<f64>,
}

impl Edge {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Position of the edge in the residual vector; assigned when the graph is frozen.
    pub fn local(&self) -> usize {
        self.local
    }

    /// Local index of the type-1 endpoint.
    pub fn vertex1(&self) -> usize {
        self.vertex1
    }

    /// Local index of the type-2 endpoint.
    pub fn vertex2(&self) -> usize {
        self.vertex2
    }

    pub fn observation(&self) -> &[f64] {
        &self.observation
    }

    pub fn sigma(&self) -> &[f64] {
        &self.sigma
    }
}

/// Bipartite factor graph. Edges are grouped by their type-2 endpoint so that
/// freezing enumerates them in a deterministic, point-major order.
#[derive(Debug, Clone)]
pub struct Graph {
    properties: Properties,
    vertices1: Vec<Vertex>,
    vertices2: Vec<Vertex>,
    lookup1: HashMap<u64, usize>,
    lookup2: HashMap<u64, usize>,
    edges: BTreeMap<usize, BTreeMap<usize, Edge>>,
    edge_ids: HashSet<u64>,
    frozen: bool,
}

impl Graph {
    pub fn new(vertex1_size: usize, vertex2_size: usize, edge_size: usize) -> Self {
        Self {
            properties: Properties::new(vertex1_size, vertex2_size, edge_size),
            vertices1: Vec::new(),
            vertices2: Vec::new(),
            lookup1: HashMap::new(),
            lookup2: HashMap::new(),
            edges: BTreeMap::new(),
            edge_ids: HashSet::new(),
            frozen: false,
        }
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Add a type-1 vertex and return its local index.
    pub fn add_vertex1(
        &mut self,
        id: u64,
        parameters: &[f64],
        fixed: bool,
    ) -> Result<usize, GraphError> {
        self.check_vertex(VertexKind::Type1, id, parameters)?;
        let local = self.properties.register_vertex1();
        self.lookup1.insert(id, local);
        self.vertices1.push(Vertex {
            id,
            local,
            parameters: parameters.to_vec(),
            fixed,
        });
        Ok(local)
    }

    /// Add a type-2 vertex and return its local index.
    pub fn add_vertex2(
        &mut self,
        id: u64,
        parameters: &[f64],
        fixed: bool,
    ) -> Result<usize, GraphError> {
        self.check_vertex(VertexKind::Type2, id, parameters)?;
        let local = self.properties.register_vertex2();
        self.lookup2.insert(id, local);
        self.vertices2.push(Vertex {
            id,
            local,
            parameters: parameters.to_vec(),
            fixed,
        });
        Ok(local)
    }

    fn check_vertex(
        &self,
        kind: VertexKind,
        id: u64,
        parameters: &[f64],
    ) -> Result<(), GraphError> {
        if self.frozen {
            return Err(GraphError::Frozen);
        }
        let (expected, lookup) = match kind {
            VertexKind::Type1 => (self.properties.vertex1_size, &self.lookup1),
            VertexKind::Type2 => (self.properties.vertex2_size, &self.lookup2),
        };
        if parameters.len() != expected {
            return Err(GraphError::ParameterLength {
                kind,
                id,
                expected,
                actual: parameters.len(),
            });
        }
        if lookup.contains_key(&id) {
            return Err(GraphError::DuplicateVertex { kind, id });
        }
        Ok(())
    }

    /// Connect a type-1 and a type-2 vertex with one measurement.
    pub fn add_edge(
        &mut self,
        id: u64,
        vertex1: u64,
        vertex2: u64,
        observation: &[f64],
        sigma: &[f64],
    ) -> Result<(), GraphError> {
        if self.frozen {
            return Err(GraphError::Frozen);
        }
        let local1 = *self.lookup1.get(&vertex1).ok_or(GraphError::UnknownVertex {
            kind: VertexKind::Type1,
            id: vertex1,
        })?;
        let local2 = *self.lookup2.get(&vertex2).ok_or(GraphError::UnknownVertex {
            kind: VertexKind::Type2,
            id: vertex2,
        })?;
        let expected = self.properties.edge_size;
        if observation.len() != expected || sigma.len() != expected {
            return Err(GraphError::MeasurementLength {
                id,
                expected,
                observation: observation.len(),
                sigma: sigma.len(),
            });
        }
        if let Some((component, &value)) = sigma
            .iter()
            .enumerate()
            .find(|(_, s)| !(**s > 0.0 && s.is_finite()))
        {
            return Err(GraphError::InvalidSigma {
                id,
                component,
                value,
            });
        }
        if self
            .edges
            .get(&local2)
            .is_some_and(|group| group.contains_key(&local1))
        {
            return Err(GraphError::DuplicateEdge {
                id,
                vertex1,
                vertex2,
            });
        }
        if !self.edge_ids.insert(id) {
            return Err(GraphError::DuplicateEdgeId { id });
        }

        self.properties.register_edge(local1, local2);
        self.edges.entry(local2).or_default().insert(
            local1,
            Edge {
                id,
                local: usize::MAX,
                vertex1: local1,
                vertex2: local2,
                observation: observation.to_vec(),
                sigma: sigma.to_vec(),
            },
        );
        Ok(())
    }

    /// Assign edge locations and derive the totals. Further mutation is rejected.
    pub fn freeze(&mut self) {
        if self.frozen {
            return;
        }
        let edges = self.edges.values_mut().flat_map(|group| group.values_mut());
        for (local, edge) in edges.enumerate() {
            edge.local = local;
        }
        self.properties.initialize();
        self.frozen = true;
        log::debug!(
            "graph frozen: {} type-1, {} type-2, {} edges",
            self.properties.num_vertices1,
            self.properties.num_vertices2,
            self.properties.num_edges
        );
    }

    /// Edges grouped by type-2 endpoint, then by type-1 endpoint.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values().flat_map(|group| group.values())
    }

    pub fn vertices1(&self) -> &[Vertex] {
        &self.vertices1
    }

    pub fn vertices2(&self) -> &[Vertex] {
        &self.vertices2
    }

    pub fn vertex1(&self, id: u64) -> Option<&Vertex> {
        self.lookup1.get(&id).map(|&local| &self.vertices1[local])
    }

    pub fn vertex2(&self, id: u64) -> Option<&Vertex> {
        self.lookup2.get(&id).map(|&local| &self.vertices2[local])
    }

    /// Overwrite the owned parameters of every vertex from the solver buffer.
    pub(crate) fn store_parameters(&mut self, values: &[f64]) {
        let properties = &self.properties;
        debug_assert_eq!(values.len(), properties.total_width);
        for vertex in &mut self.vertices1 {
            let offset = properties.vertex1_offset(vertex.local);
            vertex
                .parameters
                .copy_from_slice(&values[offset..offset + properties.vertex1_size]);
        }
        for vertex in &mut self.vertices2 {
            let offset = properties.vertex2_offset(vertex.local);
            vertex
                .parameters
                .copy_from_slice(&values[offset..offset + properties.vertex2_size]);
        }
    }
}
