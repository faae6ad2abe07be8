use std::time::Instant;

use crate::parameters::ParameterUpdate;
use crate::report::{
    emit_line, format_duration, AttemptOutcome, IterationReport, Reporter, SolveStatus,
    SolverStats, TableReporter,
};
use crate::residuals::Measurement;
use crate::robust::RobustKernel;
use crate::settings::OptimizerSettings;
use crate::structure::ProblemStructure;

/// Collaborators borrowed for one run.
pub(crate) struct Strategies<'a> {
    pub measurement: &'a mut dyn Measurement,
    pub kernel: Option<&'a dyn RobustKernel>,
    pub type1_update: &'a dyn ParameterUpdate,
    pub type2_update: &'a dyn ParameterUpdate,
}

enum ReporterSlot<'a> {
    External(&'a mut dyn Reporter),
    Local(TableReporter),
    None,
}

impl<'a> ReporterSlot<'a> {
    fn new(reporter: Option<&'a mut dyn Reporter>, verbosity: u8) -> Self {
        match reporter {
            Some(r) => Self::External(r),
            None if verbosity > 0 => Self::Local(TableReporter::new()),
            None => Self::None,
        }
    }

    fn as_mut(&mut self) -> Option<&mut dyn Reporter> {
        match self {
            Self::External(r) => Some(*r),
            Self::Local(r) => Some(r),
            Self::None => None,
        }
    }
}

/// Damping factor after an accepted step with gain ratio `rho`.
pub(crate) fn shrink_lambda(lambda: f64, rho: f64) -> f64 {
    let factor = 1.0 - (2.0 * rho - 1.0).powi(3);
    lambda * factor.clamp(1.0 / 3.0, 2.0 / 3.0)
}

/// Levenberg-Marquardt over a built structure.
///
/// Damping is local to the run: `lambda` starts at
/// `initial_lambda_scale * max diag(H)` and is multiplied by an escalating
/// factor (2, 4, 8, ...) on every rejected attempt. An accepted step shrinks it
/// by `clamp(1 - (2 rho - 1)^3, 1/3, 2/3)` and resets the factor.
pub(crate) fn run(
    structure: &mut ProblemStructure,
    strategies: Strategies<'_>,
    settings: &OptimizerSettings,
    max_iterations: usize,
    reporter: Option<&mut dyn Reporter>,
) -> SolverStats {
    let Strategies {
        measurement,
        kernel,
        type1_update,
        type2_update,
    } = strategies;
    let start_time = (settings.verbosity > 0).then(Instant::now);
    let mut reporter = ReporterSlot::new(reporter, settings.verbosity);
    let dump = settings.debug && settings.verbosity > 3;

    let initial_norm = structure.evaluate(&mut *measurement, kernel);
    structure.linearize(&mut *measurement);
    let mut norm = initial_norm;
    let mut b_max = structure.gradient().max_abs();
    let max_diagonal = structure.hessian().max_diagonal();
    let mut lambda = (settings.initial_lambda_scale * max_diagonal).max(f64::MIN_POSITIVE);
    let mut update_norm = 0.0;
    log::debug!("lm start: |r| {initial_norm:.6e}, max|b| {b_max:.3e}, lambda {lambda:.3e}");

    let mut stats = SolverStats {
        status: SolveStatus::MaxIterations,
        iterations: 0,
        initial_residual_norm: initial_norm,
        residual_norm: norm,
        lambda,
        update_norm,
        b_max,
    };
    if b_max < settings.gradient_tolerance {
        stats.status = SolveStatus::ConvergedGradient;
        return finish(stats, start_time, &mut reporter);
    }

    for iteration in 0..max_iterations {
        let mut scale = 2.0;
        let mut outcome = AttemptOutcome::Rejected;

        for attempt in 0..settings.max_repeats {
            if let Err(failure) = structure.solve(lambda) {
                log::warn!("iteration {iteration} attempt {attempt}: {failure}");
                outcome = AttemptOutcome::SolveFailed;
                report(
                    &mut reporter,
                    IterationReport {
                        iteration,
                        attempt,
                        residual_norm: norm,
                        trial_norm: norm,
                        rho: f64::NAN,
                        lambda,
                        update_norm: f64::NAN,
                        b_max,
                        outcome,
                    },
                );
                lambda *= scale;
                scale *= 2.0;
                continue;
            }

            let step_norm = structure.update().norm();
            let predicted = structure.predicted_reduction(lambda);
            structure.apply_update(type1_update, type2_update);
            let trial = structure.evaluate(&mut *measurement, kernel);
            let rho = (norm * norm - trial * trial) / predicted;
            outcome = if predicted > 0.0 && rho.is_finite() && rho >= 0.0 {
                AttemptOutcome::Accepted
            } else {
                AttemptOutcome::Rejected
            };
            if settings.verbosity > 1 {
                log::debug!(
                    "iteration {iteration} attempt {attempt}: |r| {norm:.6e} -> {trial:.6e}, rho {rho:.3}, lambda {lambda:.3e}"
                );
            }
            report(
                &mut reporter,
                IterationReport {
                    iteration,
                    attempt,
                    residual_norm: norm,
                    trial_norm: trial,
                    rho,
                    lambda,
                    update_norm: step_norm,
                    b_max,
                    outcome,
                },
            );

            if outcome == AttemptOutcome::Accepted {
                norm = trial;
                update_norm = step_norm;
                lambda = shrink_lambda(lambda, rho);
                structure.linearize(&mut *measurement);
                b_max = structure.gradient().max_abs();
                if dump {
                    log::trace!("update: {}", structure.update().transpose());
                    log::trace!("b: {}", structure.gradient().values().transpose());
                    log::trace!("reduced hessian:{}", structure.solver().reduced_hessian());
                }
                break;
            }

            structure.restore();
            lambda *= scale;
            scale *= 2.0;
        }

        stats.iterations = iteration + 1;
        stats.residual_norm = norm;
        stats.lambda = lambda;
        stats.update_norm = update_norm;
        stats.b_max = b_max;
        match outcome {
            AttemptOutcome::Accepted => {}
            AttemptOutcome::Rejected => {
                stats.status = SolveStatus::RepeatsExhausted;
                return finish(stats, start_time, &mut reporter);
            }
            AttemptOutcome::SolveFailed => {
                log::error!("iteration {iteration}: no attempt could be factorized");
                stats.status = SolveStatus::NumericalFailure;
                return finish(stats, start_time, &mut reporter);
            }
        }
        if update_norm < settings.step_tolerance {
            stats.status = SolveStatus::ConvergedStep;
            return finish(stats, start_time, &mut reporter);
        }
        if b_max < settings.gradient_tolerance {
            stats.status = SolveStatus::ConvergedGradient;
            return finish(stats, start_time, &mut reporter);
        }
    }

    finish(stats, start_time, &mut reporter)
}

fn report(reporter: &mut ReporterSlot<'_>, row: IterationReport) {
    if let Some(reporter) = reporter.as_mut() {
        reporter.on_iteration(&row);
    }
}

fn finish(
    stats: SolverStats,
    start_time: Option<Instant>,
    reporter: &mut ReporterSlot<'_>,
) -> SolverStats {
    log::debug!(
        "lm finished: {} after {} iterations, |r| {:.6e} -> {:.6e}",
        stats.status,
        stats.iterations,
        stats.initial_residual_norm,
        stats.residual_norm
    );
    if let Some(reporter) = reporter.as_mut() {
        reporter.on_finish(&stats);
    }
    if let Some(start) = start_time {
        let elapsed = format_duration(start.elapsed());
        emit_line(&format!("time: {elapsed}"));
    }
    stats
}
