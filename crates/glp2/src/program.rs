//! Test programs: a named, ordered list of steps uploaded in one go.

use glp2_core::{Error, Result};

use crate::frame::{MAX_TEXT_LEN, encode_text};
use crate::response::{ActualValuesResponse, InterimActualValuesResponse};
use crate::steps::ProgramStep;

/// A validated test program.
#[derive(Debug, Clone, PartialEq)]
pub struct TestProgram {
    name: String,
    steps: Vec<ProgramStep>,
}

/// How far a running program has got.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Step currently running (or last finished).
    pub step: u16,
    /// Share of the planned run time already used, 0.0 to 100.0.
    pub percent: f64,
}

impl TestProgram {
    /// Build a program. The name must be non-empty and at most 32
    /// characters after trimming; steps must be present and numbered in
    /// strictly ascending order.
    pub fn new(name: &str, steps: Vec<ProgramStep>) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidParameters("program name is empty".into()));
        }
        if name.chars().count() > MAX_TEXT_LEN {
            return Err(Error::InvalidParameters(format!(
                "program name is longer than {MAX_TEXT_LEN} characters"
            )));
        }
        if name.contains('_') {
            return Err(Error::InvalidParameters(format!(
                "program name {name:?} must not contain '_'"
            )));
        }
        if steps.is_empty() {
            return Err(Error::InvalidParameters(format!("program {name:?} has no steps")));
        }
        if let Some(pair) = steps.windows(2).find(|w| w[0].step() >= w[1].step()) {
            return Err(Error::InvalidParameters(format!(
                "step {} follows step {}; steps must be ascending",
                pair[1].step(),
                pair[0].step()
            )));
        }
        Ok(TestProgram {
            name: name.to_string(),
            steps,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[ProgramStep] {
        &self.steps
    }

    /// `PRG_<name>_<step count>`, sent before the steps themselves.
    pub fn header_data_string(&self) -> String {
        format!("PRG_{}_{}", encode_text(&self.name), self.steps.len())
    }

    /// Planned run time of the whole program.
    pub fn total_ms(&self) -> u64 {
        self.steps.iter().map(ProgramStep::elapsed_ms).sum()
    }

    /// Progress while `step` has been running for `elapsed_ms`.
    ///
    /// Steps numbered below `step` count as finished; the running step
    /// contributes at most its planned time.
    pub fn progress(&self, step: u16, elapsed_ms: u64) -> Progress {
        let total = self.total_ms();
        let mut done = 0;
        for s in &self.steps {
            let number = u16::from(s.step());
            if number < step {
                done += s.elapsed_ms();
            } else if number == step {
                done += elapsed_ms.min(s.elapsed_ms());
            }
        }
        Progress {
            step,
            percent: percent(done, total),
        }
    }

    /// Progress from an interim (`SAMP`) report.
    pub fn progress_from_interim(&self, interim: &InterimActualValuesResponse) -> Progress {
        self.progress(interim.step, u64::from(interim.elapsed_ms))
    }

    /// Progress from an actual-values report: complete when the tester
    /// says so, otherwise up to the end of the last reported step.
    pub fn progress_from_results(&self, values: &ActualValuesResponse) -> Option<Progress> {
        if values.completed {
            let step = self.steps.last().map_or(0, |s| u16::from(s.step()));
            return Some(Progress {
                step,
                percent: 100.0,
            });
        }
        let last = values.results.last()?.step();
        let done: u64 = self
            .steps
            .iter()
            .filter(|s| u16::from(s.step()) <= last)
            .map(ProgramStep::elapsed_ms)
            .sum();
        Some(Progress {
            step: last,
            percent: percent(done, self.total_ms()),
        })
    }
}

fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (done as f64 * 100.0 / total as f64).min(100.0)
}
