//! Stored motion sequences.
//!
//! A sequence is an ordered list of steps (moves, homing, pauses, speed
//! changes, scans) repeated `loop_count` times. Sequences are saved as JSON
//! so treatment protocols can be prepared ahead of a session.

use crate::xls::{ActuatorController, MotionError, ScanDirection};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tosca_core::status::DeviceKind;
use tracing::instrument;

/// One step of a motion sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SequenceStep {
    MoveAbsolute {
        position: i64,
        #[serde(default)]
        speed: Option<u32>,
    },
    MoveRelative {
        distance: i64,
        #[serde(default)]
        speed: Option<u32>,
    },
    Home {
        #[serde(default)]
        speed: Option<u32>,
    },
    Pause {
        duration_ms: u64,
    },
    SetSpeed {
        speed: u32,
    },
    Scan {
        direction: ScanDirection,
        duration_ms: u64,
        #[serde(default)]
        speed: Option<u32>,
    },
}

impl std::fmt::Display for SequenceStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SequenceStep::MoveAbsolute { position, .. } => write!(f, "move to {}", position),
            SequenceStep::MoveRelative { distance, .. } => write!(f, "step {:+}", distance),
            SequenceStep::Home { .. } => write!(f, "home"),
            SequenceStep::Pause { duration_ms } => write!(f, "pause {} ms", duration_ms),
            SequenceStep::SetSpeed { speed } => write!(f, "set speed {}", speed),
            SequenceStep::Scan {
                direction,
                duration_ms,
                ..
            } => write!(f, "scan {:?} for {} ms", direction, duration_ms),
        }
    }
}

fn default_loop_count() -> u32 {
    1
}

/// An ordered list of steps, optionally repeated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Sequence {
    pub steps: Vec<SequenceStep>,
    #[serde(default = "default_loop_count")]
    pub loop_count: u32,
}

impl Sequence {
    pub fn new(steps: Vec<SequenceStep>) -> Self {
        Self {
            steps,
            loop_count: 1,
        }
    }

    pub fn with_loops(mut self, loop_count: u32) -> Self {
        self.loop_count = loop_count;
        self
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sequence file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid sequence file {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).context("Failed to serialize sequence")?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write sequence file {}", path.display()))
    }
}

/// Outcome of a completed sequence run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SequenceReport {
    pub loops_completed: u32,
    pub steps_executed: usize,
}

impl ActuatorController {
    /// Run `sequence` step by step, stopping at the first error.
    ///
    /// A `stop()` issued at any point, including during a pause between
    /// moves, ends the run with [`MotionError::Stopped`].
    #[instrument(skip(self, sequence), fields(steps = sequence.steps.len(), loops = sequence.loop_count), err)]
    pub async fn run_sequence(&self, sequence: &Sequence) -> Result<SequenceReport, MotionError> {
        let epoch = self.current_stop_epoch();
        let mut report = SequenceReport {
            loops_completed: 0,
            steps_executed: 0,
        };

        for iteration in 0..sequence.loop_count {
            for (index, step) in sequence.steps.iter().enumerate() {
                if self.stop_requested_since(epoch) {
                    return Err(MotionError::Stopped);
                }
                tracing::debug!(iteration, index, "sequence step: {}", step);
                self.run_step(step, epoch).await?;
                report.steps_executed += 1;
            }
            report.loops_completed += 1;
        }

        self.status_sink().info(
            DeviceKind::Actuator,
            format!(
                "Sequence complete: {} step(s) over {} loop(s)",
                report.steps_executed, report.loops_completed
            ),
        );
        Ok(report)
    }

    async fn run_step(&self, step: &SequenceStep, epoch: u64) -> Result<(), MotionError> {
        match step {
            SequenceStep::MoveAbsolute { position, speed } => self.move_to(*position, *speed).await,
            SequenceStep::MoveRelative { distance, speed } => {
                self.move_relative(*distance, *speed).await
            }
            SequenceStep::Home { speed } => {
                if let Some(speed) = speed {
                    self.set_speed(*speed).await?;
                }
                self.home().await
            }
            SequenceStep::Pause { duration_ms } => {
                self.interruptible_sleep(Duration::from_millis(*duration_ms), epoch)
                    .await
            }
            SequenceStep::SetSpeed { speed } => self.set_speed(*speed).await,
            SequenceStep::Scan {
                direction,
                duration_ms,
                speed,
            } => {
                if let Some(speed) = speed {
                    self.set_speed(*speed).await?;
                }
                self.scan(*direction, Duration::from_millis(*duration_ms))
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_json_shape() {
        let json = r#"{
            "steps": [
                {"action": "home"},
                {"action": "move_absolute", "position": 2500, "speed": 1500},
                {"action": "pause", "duration_ms": 200},
                {"action": "scan", "direction": "negative", "duration_ms": 1000}
            ],
            "loop_count": 3
        }"#;
        let seq: Sequence = serde_json::from_str(json).unwrap();
        assert_eq!(seq.loop_count, 3);
        assert_eq!(seq.steps[0], SequenceStep::Home { speed: None });
        assert_eq!(
            seq.steps[1],
            SequenceStep::MoveAbsolute {
                position: 2500,
                speed: Some(1500)
            }
        );
        assert_eq!(seq.steps[3].to_string(), "scan Negative for 1000 ms");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("protocol.json");

        let seq = Sequence::new(vec![
            SequenceStep::SetSpeed { speed: 500 },
            SequenceStep::MoveRelative {
                distance: -200,
                speed: None,
            },
        ])
        .with_loops(2);
        seq.save(&path).unwrap();

        assert_eq!(Sequence::load(&path).unwrap(), seq);
        assert!(Sequence::load(&dir.path().join("missing.json")).is_err());
    }
}
