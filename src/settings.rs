use core::fmt;

use crate::robust::RobustKind;

/// Outer optimization algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    #[default]
    LevenbergMarquardt,
    /// Declared for configuration compatibility; rejected by `validate`.
    GaussNewton,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LevenbergMarquardt => write!(f, "levenberg-marquardt"),
            Self::GaussNewton => write!(f, "gauss-newton"),
        }
    }
}

/// Configuration consumed by `Optimizer::new`.
#[derive(Debug, Clone)]
pub struct OptimizerSettings {
    /// Parameter count of every type-1 vertex.
    pub vertex1_size: usize,
    /// Parameter count of every type-2 vertex.
    pub vertex2_size: usize,
    /// Measurement dimension of every edge.
    pub edge_size: usize,
    pub algorithm: Algorithm,
    /// Outer iterations used by `Optimizer::optimize_default`.
    pub max_iterations: usize,
    /// Trial steps per outer iteration before giving up.
    pub max_repeats: usize,
    pub robust: RobustKind,
    /// Eliminate type-2 vertices with the Schur complement. Only `true` is supported.
    pub marginalized: bool,
    /// Converge when max|b| falls below this value.
    pub gradient_tolerance: f64,
    /// Converge when the accepted update norm falls below this value.
    pub step_tolerance: f64,
    /// Initial damping is this factor times the largest Hessian diagonal entry.
    pub initial_lambda_scale: f64,
    /// 0: silent, 1: summary table, 2: per-attempt lines, 3+: details.
    pub verbosity: u8,
    /// Dump the update, b and the reduced Hessian at trace level (with `verbosity > 3`).
    pub debug: bool,
}

impl OptimizerSettings {
    pub fn new(vertex1_size: usize, vertex2_size: usize, edge_size: usize) -> Self {
        Self {
            vertex1_size,
            vertex2_size,
            edge_size,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        for (name, value) in [
            ("vertex1_size", self.vertex1_size),
            ("vertex2_size", self.vertex2_size),
            ("edge_size", self.edge_size),
        ] {
            if value == 0 {
                return Err(SettingsError::ZeroBlockSize { name });
            }
        }
        if self.algorithm != Algorithm::LevenbergMarquardt {
            return Err(SettingsError::Unsupported {
                feature: "gauss-newton algorithm",
            });
        }
        if !self.marginalized {
            return Err(SettingsError::Unsupported {
                feature: "non-marginalized solver",
            });
        }
        if self.max_repeats == 0 {
            return Err(SettingsError::ZeroRepeats);
        }
        if self.robust == RobustKind::Custom {
            return Err(SettingsError::MissingRobustKernel);
        }
        if let Some(delta) = self.robust.delta() {
            if !(delta > 0.0 && delta.is_finite()) {
                return Err(SettingsError::InvalidRobustDelta { delta });
            }
        }
        for (name, value) in [
            ("gradient_tolerance", self.gradient_tolerance),
            ("step_tolerance", self.step_tolerance),
            ("initial_lambda_scale", self.initial_lambda_scale),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(SettingsError::InvalidTolerance { name, value });
            }
        }
        Ok(())
    }
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            vertex1_size: 0,
            vertex2_size: 0,
            edge_size: 0,
            algorithm: Algorithm::LevenbergMarquardt,
            max_iterations: 100,
            max_repeats: 10,
            robust: RobustKind::default(),
            marginalized: true,
            gradient_tolerance: 1e-6,
            step_tolerance: 1e-6,
            initial_lambda_scale: 1e-6,
            verbosity: 0,
            debug: false,
        }
    }
}

/// Invalid or unsupported configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsError {
    ZeroBlockSize { name: &'static str },
    ZeroRepeats,
    /// `RobustKind::Custom` is only reachable through `Optimizer::set_robust_kernel`.
    MissingRobustKernel,
    InvalidRobustDelta { delta: f64 },
    InvalidTolerance { name: &'static str, value: f64 },
    Unsupported { feature: &'static str },
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroBlockSize { name } => write!(f, "{name} must be positive"),
            Self::ZeroRepeats => write!(f, "max_repeats must be positive"),
            Self::MissingRobustKernel => {
                write!(f, "custom robust kind selected without a kernel")
            }
            Self::InvalidRobustDelta { delta } => {
                write!(f, "robust delta must be positive and finite (got {delta})")
            }
            Self::InvalidTolerance { name, value } => {
                write!(f, "{name} must be positive and finite (got {value})")
            }
            Self::Unsupported { feature } => write!(f, "{feature} is not implemented"),
        }
    }
}

impl std::error::Error for SettingsError {}
