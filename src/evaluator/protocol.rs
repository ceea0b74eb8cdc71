//! Line protocol spoken with an external calculator program.
//!
//! Messages are JSON objects, one per line. The worker writes a request on
//! the program's stdin and reads exactly one response from its stdout.
//!
//! ```text
//! -> {"type":"evaluate","job_id":7,"structure":{...}}
//! <- {"type":"converged","energy":-44.32,"forces":[[0,0,0]],"label":"Ih","steps":210}
//! -> {"type":"exit"}
//! ```

use super::EvaluationOutcome;
use crate::store::{JobId, NOT_CONVERGED_ENERGY};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request from worker to calculator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvalRequest {
    /// Relax one structure.
    Evaluate { job_id: JobId, structure: Value },

    /// Graceful shutdown request.
    Exit,
}

/// Response from calculator to worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvalResponse {
    Converged {
        energy: f64,
        #[serde(default)]
        forces: Vec<[f64; 3]>,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        steps: Option<u64>,
        #[serde(default)]
        structure: Option<Value>,
    },

    NotConverged {
        #[serde(default = "sentinel_energy")]
        energy: f64,
        #[serde(default)]
        forces: Option<Vec<[f64; 3]>>,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        structure: Option<Value>,
    },

    /// The calculator could not evaluate the structure.
    Error { message: String },
}

fn sentinel_energy() -> f64 {
    NOT_CONVERGED_ENERGY
}

impl EvalRequest {
    /// Create an evaluation request.
    pub fn evaluate(job_id: JobId, structure: &Value) -> Self {
        Self::Evaluate {
            job_id,
            structure: structure.clone(),
        }
    }

    /// Serialize to a JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from a JSON line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

impl EvalResponse {
    /// Serialize to a JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from a JSON line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }

    /// Convert into an outcome, or the calculator's error message.
    pub fn into_outcome(self) -> Result<EvaluationOutcome, String> {
        match self {
            Self::Converged {
                energy,
                forces,
                label,
                steps,
                structure,
            } => Ok(EvaluationOutcome::Converged {
                energy,
                forces,
                label,
                steps,
                structure,
            }),
            Self::NotConverged {
                energy,
                forces,
                label,
                structure,
            } => Ok(EvaluationOutcome::NotConverged {
                sentinel_energy: energy,
                forces,
                label,
                structure,
            }),
            Self::Error { message } => Err(message),
        }
    }
}
