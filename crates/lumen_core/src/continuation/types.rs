//! Records produced by a light sweep.

use crate::equilibrium::EquilibriumSolution;
use crate::model::StateVector;
use crate::nlp::SolveStatus;
use crate::stability::{Stability, StabilityReport};
use serde::{Deserialize, Serialize};

/// Everything computed at one light intensity of a sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContinuationRecord {
    pub light: f64,
    pub decay_rate: f64,
    pub solution: EquilibriumSolution,
    pub stability: StabilityReport,
}

impl ContinuationRecord {
    pub fn state(&self) -> &StateVector {
        &self.solution.state
    }

    pub fn status(&self) -> SolveStatus {
        self.solution.status
    }

    pub fn verdict(&self) -> Stability {
        self.stability.verdict
    }
}

/// A sweep step whose solve did not reach an optimal point.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SolverWarning {
    pub index: usize,
    pub light: f64,
    pub status: SolveStatus,
}

/// Ordered, append-only sequence of [`ContinuationRecord`]s in sweep order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContinuationResult {
    records: Vec<ContinuationRecord>,
}

impl ContinuationResult {
    pub(crate) fn push(&mut self, record: ContinuationRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ContinuationRecord> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[ContinuationRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ContinuationRecord> {
        self.records.iter()
    }

    pub fn into_records(self) -> Vec<ContinuationRecord> {
        self.records
    }

    pub fn lights(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.light).collect()
    }

    /// Steps whose solver status was not optimal.
    pub fn warnings(&self) -> Vec<SolverWarning> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, record)| !record.solution.is_optimal())
            .map(|(index, record)| SolverWarning {
                index,
                light: record.light,
                status: record.solution.status,
            })
            .collect()
    }

    /// Indices whose verdict differs from the preceding record.
    pub fn stability_changes(&self) -> Vec<usize> {
        self.records
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| pair[0].verdict() != pair[1].verdict())
            .map(|(i, _)| i + 1)
            .collect()
    }
}

impl<'a> IntoIterator for &'a ContinuationResult {
    type Item = &'a ContinuationRecord;
    type IntoIter = std::slice::Iter<'a, ContinuationRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Progress of a stepped sweep.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SweepProgress {
    pub done: bool,
    pub completed: usize,
    pub total: usize,
    pub warnings: usize,
    /// Light value of the most recent record.
    pub current_light: Option<f64>,
}
