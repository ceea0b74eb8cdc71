//! Evaluation of a job's structure.
//!
//! The relaxation itself is not done here. A [`Calculator`] is the heavy
//! numerical model, built once per worker process and handed by `&mut` to
//! every evaluation. [`ExternalCalculator`] runs a user-provided program that
//! speaks the line protocol in [`protocol`].
//!
//! A calculator returns `Ok` for both converged and non-converged
//! relaxations. `Err` means the calculator itself failed; the worker does not
//! recover from that.

mod external;
mod ipc;
mod proc;
pub mod protocol;

pub use external::ExternalCalculator;

use crate::error::Result;
use crate::store::{JobId, JobResult, NOT_CONVERGED_ENERGY, Properties};
use serde_json::Value;

/// Result of relaxing one structure.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    /// The optimizer reached the force criterion.
    Converged {
        energy: f64,
        forces: Vec<[f64; 3]>,
        /// Derived classification, typically the point group.
        label: Option<String>,
        steps: Option<u64>,
        /// Relaxed geometry.
        structure: Option<Value>,
    },
    /// The optimizer gave up. Still a completed job.
    NotConverged {
        sentinel_energy: f64,
        forces: Option<Vec<[f64; 3]>>,
        label: Option<String>,
        structure: Option<Value>,
    },
}

impl EvaluationOutcome {
    /// Non-converged outcome with the default sentinel and nothing else.
    pub fn not_converged() -> Self {
        Self::NotConverged {
            sentinel_energy: NOT_CONVERGED_ENERGY,
            forces: None,
            label: None,
            structure: None,
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged { .. })
    }

    /// Energy to record: the computed one, or the sentinel.
    pub fn energy(&self) -> f64 {
        match self {
            Self::Converged { energy, .. } => *energy,
            Self::NotConverged {
                sentinel_energy, ..
            } => *sentinel_energy,
        }
    }

    /// Build the result payload written back to the store.
    pub fn into_result(self) -> JobResult {
        match self {
            Self::Converged {
                energy,
                forces,
                label,
                steps,
                structure,
            } => JobResult {
                properties: Properties {
                    energy,
                    forces: Some(forces),
                    point_group: label,
                    converged: true,
                    steps,
                },
                structure,
            },
            Self::NotConverged {
                sentinel_energy,
                forces,
                label,
                structure,
            } => JobResult {
                properties: Properties {
                    energy: sentinel_energy,
                    forces,
                    point_group: label,
                    converged: false,
                    steps: None,
                },
                structure,
            },
        }
    }
}

/// The numerical model used to relax structures.
pub trait Calculator {
    /// Relax `structure` for job `job`.
    fn evaluate(&mut self, job: JobId, structure: &Value) -> Result<EvaluationOutcome>;
}

impl<F> Calculator for F
where
    F: FnMut(JobId, &Value) -> Result<EvaluationOutcome>,
{
    fn evaluate(&mut self, job: JobId, structure: &Value) -> Result<EvaluationOutcome> {
        self(job, structure)
    }
}
