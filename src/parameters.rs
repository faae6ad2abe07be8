use nalgebra::DVector;

use crate::graph::Graph;
use crate::properties::Properties;

/// Rule combining a vertex block with its solver update.
///
/// Called once per vertex block, so manifold-valued vertices can apply a
/// retraction instead of plain addition.
pub trait ParameterUpdate {
    fn update(&self, current: &mut [f64], delta: &[f64]);
}

/// Euclidean update: `current += delta`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Additive;

impl ParameterUpdate for Additive {
    fn update(&self, current: &mut [f64], delta: &[f64]) {
        for (x, d) in current.iter_mut().zip(delta) {
            *x += d;
        }
    }
}

/// Concatenated parameters: type-1 (active) prefix followed by the
/// type-2 (marginalized) suffix, plus the update buffer and a backup.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    values: DVector<f64>,
    backup: DVector<f64>,
    update: DVector<f64>,
    vertex1_size: usize,
    vertex2_size: usize,
    split: usize,
    max_coeff: f64,
    backed_up: bool,
}

impl ParameterStore {
    pub fn from_graph(graph: &Graph) -> Self {
        let properties = graph.properties();
        let mut values = DVector::zeros(properties.total_width);
        for vertex in graph.vertices1() {
            let offset = properties.vertex1_offset(vertex.local());
            values
                .rows_mut(offset, properties.vertex1_size)
                .copy_from_slice(vertex.parameters());
        }
        for vertex in graph.vertices2() {
            let offset = properties.vertex2_offset(vertex.local());
            values
                .rows_mut(offset, properties.vertex2_size)
                .copy_from_slice(vertex.parameters());
        }
        Self::new(properties, values)
    }

    pub(crate) fn new(properties: &Properties, values: DVector<f64>) -> Self {
        debug_assert_eq!(values.len(), properties.total_width);
        Self {
            backup: values.clone(),
            update: DVector::zeros(values.len()),
            values,
            vertex1_size: properties.vertex1_size,
            vertex2_size: properties.vertex2_size,
            split: properties.total_type1_parameters,
            max_coeff: 0.0,
            backed_up: false,
        }
    }

    pub fn values(&self) -> &DVector<f64> {
        &self.values
    }

    pub fn active(&self) -> &[f64] {
        &self.values.as_slice()[..self.split]
    }

    pub fn marginalized(&self) -> &[f64] {
        &self.values.as_slice()[self.split..]
    }

    pub fn vertex1(&self, vertex: usize) -> &[f64] {
        let offset = vertex * self.vertex1_size;
        &self.values.as_slice()[offset..offset + self.vertex1_size]
    }

    pub fn vertex2(&self, vertex: usize) -> &[f64] {
        let offset = self.split + vertex * self.vertex2_size;
        &self.values.as_slice()[offset..offset + self.vertex2_size]
    }

    /// Last solver update, laid out like `values`.
    pub fn update(&self) -> &DVector<f64> {
        &self.update
    }

    pub(crate) fn update_mut(&mut self) -> &mut DVector<f64> {
        &mut self.update
    }

    pub fn update_norm(&self) -> f64 {
        self.update.norm()
    }

    /// Snapshot the current values and their largest magnitude.
    pub fn back_up(&mut self) {
        self.backup.copy_from(&self.values);
        self.max_coeff = self.values.iter().fold(0.0, |m: f64, v| m.max(v.abs()));
        self.backed_up = true;
    }

    /// Revert to the last snapshot without taking a new one.
    pub fn restore(&mut self) {
        debug_assert!(self.backed_up, "restore before any backup");
        self.values.copy_from(&self.backup);
    }

    /// Largest magnitude recorded by the last `back_up`; `None` before the first one.
    pub fn max_coeff(&self) -> Option<f64> {
        self.backed_up.then_some(self.max_coeff)
    }

    /// Back up, then apply `update` block by block with the given rules.
    pub fn apply_update(&mut self, type1: &dyn ParameterUpdate, type2: &dyn ParameterUpdate) {
        self.back_up();
        let (active, marginalized) = self.values.as_mut_slice().split_at_mut(self.split);
        let (delta1, delta2) = self.update.as_slice().split_at(self.split);
        for (current, delta) in active
            .chunks_exact_mut(self.vertex1_size)
            .zip(delta1.chunks_exact(self.vertex1_size))
        {
            type1.update(current, delta);
        }
        for (current, delta) in marginalized
            .chunks_exact_mut(self.vertex2_size)
            .zip(delta2.chunks_exact(self.vertex2_size))
        {
            type2.update(current, delta);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scaled(f64);

    impl ParameterUpdate for Scaled {
        fn update(&self, current: &mut [f64], delta: &[f64]) {
            for (x, d) in current.iter_mut().zip(delta) {
                *x += self.0 * d;
            }
        }
    }

    fn store() -> ParameterStore {
        let mut properties = Properties::new(2, 1, 1);
        properties.register_vertex1();
        properties.register_vertex2();
        properties.register_vertex2();
        properties.initialize();
        ParameterStore::new(&properties, DVector::from_vec(vec![1.0, -2.0, 0.5, 3.0]))
    }

    #[test]
    fn max_coeff_requires_backup() {
        let mut store = store();
        assert_eq!(store.max_coeff(), None);
        store.back_up();
        assert_eq!(store.max_coeff(), Some(3.0));
    }

    #[test]
    fn restore_is_bit_exact() {
        let mut store = store();
        let before = store.values().clone();
        store
            .update_mut()
            .copy_from_slice(&[0.1, 1e-17, std::f64::consts::PI, -7.25]);
        store.apply_update(&Additive, &Additive);
        assert_ne!(store.values(), &before);
        store.restore();
        assert_eq!(store.values(), &before);
        for (a, b) in store.values().iter().zip(before.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn rules_apply_per_partition() {
        let mut store = store();
        store.update_mut().fill(1.0);
        store.apply_update(&Additive, &Scaled(2.0));
        assert_eq!(store.active(), &[2.0, -1.0]);
        assert_eq!(store.marginalized(), &[2.5, 5.0]);
        assert_eq!(store.vertex2(1), &[5.0]);
    }
}
