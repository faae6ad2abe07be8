use core::fmt;

/// Per-residual down-weighting applied after the information weighting.
///
/// The returned weight multiplies one scalar residual and the matching
/// Jacobian row. Implementations must return a value in `(0, 1]`.
pub trait RobustKernel {
    fn weight(&self, residual: f64) -> f64;
}

/// Kernel selection carried by the settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RobustKind {
    /// Plain least squares.
    None,
    /// Huber kernel; `delta` is the squared residual threshold.
    Huber { delta: f64 },
    /// Cauchy kernel with squared scale `delta`.
    Cauchy { delta: f64 },
    /// A user kernel installed with `Optimizer::set_robust_kernel`.
    Custom,
}

impl Default for RobustKind {
    fn default() -> Self {
        RobustKind::Huber {
            delta: DEFAULT_HUBER_DELTA,
        }
    }
}

impl RobustKind {
    pub fn is_robust(self) -> bool {
        !matches!(self, RobustKind::None)
    }

    /// Squared threshold, when the kind carries one.
    pub fn delta(self) -> Option<f64> {
        match self {
            RobustKind::Huber { delta } | RobustKind::Cauchy { delta } => Some(delta),
            RobustKind::None | RobustKind::Custom => None,
        }
    }

    /// Instantiate the built-in kernel; `None` for plain least squares and custom kernels.
    pub fn build(self) -> Option<Box<dyn RobustKernel>> {
        match self {
            RobustKind::Huber { delta } => Some(Box::new(Huber::new(delta))),
            RobustKind::Cauchy { delta } => Some(Box::new(Cauchy::new(delta))),
            RobustKind::None | RobustKind::Custom => None,
        }
    }
}

impl fmt::Display for RobustKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RobustKind::None => write!(f, "none"),
            RobustKind::Huber { delta } => write!(f, "huber(delta={delta})"),
            RobustKind::Cauchy { delta } => write!(f, "cauchy(delta={delta})"),
            RobustKind::Custom => write!(f, "custom"),
        }
    }
}

pub(crate) const DEFAULT_HUBER_DELTA: f64 = 10.0;

/// Huber kernel: unit weight inside `sqrt(delta)`, `sqrt(delta) / |r|` outside.
#[derive(Debug, Clone, Copy)]
pub struct Huber {
    delta: f64,
    sqrt_delta: f64,
}

impl Huber {
    pub fn new(delta: f64) -> Self {
        debug_assert!(delta > 0.0);
        Self {
            delta,
            sqrt_delta: delta.sqrt(),
        }
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }
}

impl RobustKernel for Huber {
    fn weight(&self, residual: f64) -> f64 {
        let r = residual.abs();
        if r <= self.sqrt_delta {
            1.0
        } else {
            self.sqrt_delta / r
        }
    }
}

/// Cauchy kernel: `1 / (1 + r^2 / delta)`.
#[derive(Debug, Clone, Copy)]
pub struct Cauchy {
    delta: f64,
}

impl Cauchy {
    pub fn new(delta: f64) -> Self {
        debug_assert!(delta > 0.0);
        Self { delta }
    }
}

impl RobustKernel for Cauchy {
    fn weight(&self, residual: f64) -> f64 {
        1.0 / (1.0 + residual * residual / self.delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huber_is_unit_inside_threshold() {
        let kernel = Huber::new(4.0);
        for r in [0.0, 0.5, -1.9, 2.0, -2.0] {
            assert_eq!(kernel.weight(r), 1.0, "r = {r}");
        }
    }

    #[test]
    fn huber_weight_stays_in_unit_interval() {
        for delta in [0.01, 1.0, 10.0, 1e4] {
            let kernel = Huber::new(delta);
            for r in [1e-12, 0.3, 3.2, 17.0, -250.0, 1e9] {
                let w = kernel.weight(r);
                assert!(w > 0.0 && w <= 1.0, "delta {delta} r {r} w {w}");
            }
        }
    }

    #[test]
    fn huber_decays_outside_threshold() {
        let kernel = Huber::new(1.0);
        assert!((kernel.weight(5.0) - 0.2).abs() < 1e-15);
        assert!(kernel.weight(10.0) < kernel.weight(5.0));
        assert_eq!(kernel.weight(-5.0), kernel.weight(5.0));
    }

    #[test]
    fn cauchy_weight_decreases_with_r() {
        let kernel = Cauchy::new(1.0);
        let small = kernel.weight(0.1);
        let large = kernel.weight(10.0);
        assert!(small > 0.9, "small weight {small}");
        assert!(large < 0.02, "large weight {large}");
    }

    #[test]
    fn kind_builds_matching_kernel() {
        assert!(RobustKind::None.build().is_none());
        assert!(RobustKind::Custom.build().is_none());
        let huber = RobustKind::Huber { delta: 1.0 }.build().unwrap();
        assert!((huber.weight(4.0) - 0.25).abs() < 1e-15);
        assert_eq!(RobustKind::default().delta(), Some(DEFAULT_HUBER_DELTA));
    }
}
