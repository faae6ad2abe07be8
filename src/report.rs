use core::fmt;
use std::time::Duration;

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// max|b| fell below the gradient tolerance.
    ConvergedGradient,
    /// The accepted update was shorter than the step tolerance.
    ConvergedStep,
    /// Every attempt of an outer iteration was rejected.
    RepeatsExhausted,
    MaxIterations,
    /// Every attempt of an outer iteration was rejected and the last one failed to factorize.
    NumericalFailure,
}

impl SolveStatus {
    pub fn is_converged(self) -> bool {
        matches!(self, Self::ConvergedGradient | Self::ConvergedStep)
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConvergedGradient => "converged (gradient)",
            Self::ConvergedStep => "converged (step)",
            Self::RepeatsExhausted => "repeats exhausted",
            Self::MaxIterations => "max iterations",
            Self::NumericalFailure => "numerical failure",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct SolverStats {
    pub status: SolveStatus,
    /// Outer iterations started.
    pub iterations: usize,
    pub initial_residual_norm: f64,
    pub residual_norm: f64,
    pub lambda: f64,
    /// Norm of the last accepted update.
    pub update_norm: f64,
    pub b_max: f64,
}

/// What happened to one trial step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Accepted,
    Rejected,
    /// The damped system could not be factorized; no step was tried.
    SolveFailed,
}

#[derive(Debug, Clone)]
pub struct IterationReport {
    pub iteration: usize,
    /// Zero-based attempt within the outer iteration.
    pub attempt: usize,
    pub residual_norm: f64,
    pub trial_norm: f64,
    pub rho: f64,
    pub lambda: f64,
    pub update_norm: f64,
    pub b_max: f64,
    pub outcome: AttemptOutcome,
}

impl IterationReport {
    pub fn accepted(&self) -> bool {
        self.outcome == AttemptOutcome::Accepted
    }
}

pub(crate) fn emit_line(line: &str) {
    if log::log_enabled!(log::Level::Info) {
        log::info!("{line}");
    } else {
        println!("{line}");
    }
}

pub(crate) fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs >= 1.0 {
        format!("{:.3} s", secs)
    } else if secs >= 1e-3 {
        format!("{:.3} ms", secs * 1e3)
    } else if secs >= 1e-6 {
        format!("{:.3} us", secs * 1e6)
    } else {
        format!("{:.0} ns", secs * 1e9)
    }
}

/// Receives one report per trial step and a final call when the run ends.
pub trait Reporter {
    fn on_iteration(&mut self, report: &IterationReport);
    fn on_finish(&mut self, _stats: &SolverStats) {}
}

/// Collects attempts and renders them as a table when the run finishes.
pub struct TableReporter {
    rows: Vec<IterationReport>,
}

impl TableReporter {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    fn render(&self, stats: &SolverStats) -> Table {
        let mut table = Table::new();
        table.load_preset(presets::UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("iter").set_alignment(CellAlignment::Right),
            Cell::new("try").set_alignment(CellAlignment::Right),
            Cell::new("|r|").set_alignment(CellAlignment::Right),
            Cell::new("trial").set_alignment(CellAlignment::Right),
            Cell::new("rho").set_alignment(CellAlignment::Right),
            Cell::new("lambda").set_alignment(CellAlignment::Right),
            Cell::new("|delta|").set_alignment(CellAlignment::Right),
            Cell::new("max|b|").set_alignment(CellAlignment::Right),
            Cell::new("step"),
        ]);
        for row in &self.rows {
            let outcome = match row.outcome {
                AttemptOutcome::Accepted => "accept",
                AttemptOutcome::Rejected => "repeat",
                AttemptOutcome::SolveFailed => "failed",
            };
            table.add_row(vec![
                Cell::new(row.iteration).set_alignment(CellAlignment::Right),
                Cell::new(row.attempt).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.4e}", row.residual_norm)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.4e}", row.trial_norm)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.3}", row.rho)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.1e}", row.lambda)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.1e}", row.update_norm)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.1e}", row.b_max)).set_alignment(CellAlignment::Right),
                Cell::new(outcome),
            ]);
        }
        table.add_row(vec![
            Cell::new(stats.iterations).set_alignment(CellAlignment::Right),
            Cell::new(""),
            Cell::new(format!("{:.4e}", stats.residual_norm)).set_alignment(CellAlignment::Right),
            Cell::new(""),
            Cell::new(""),
            Cell::new(format!("{:.1e}", stats.lambda)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.1e}", stats.update_norm)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.1e}", stats.b_max)).set_alignment(CellAlignment::Right),
            Cell::new(stats.status.to_string()),
        ]);
        table
    }
}

impl Default for TableReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for TableReporter {
    fn on_iteration(&mut self, report: &IterationReport) {
        self.rows.push(report.clone());
    }

    fn on_finish(&mut self, stats: &SolverStats) {
        if !log::log_enabled!(log::Level::Info) {
            println!();
        }
        for line in self.render(stats).to_string().lines() {
            emit_line(line);
        }
        self.rows.clear();
    }
}
