//! Limit switch back-off recovery
//!
//! After a limit switch trips the board refuses to move until it is reset.
//! Recovery runs in four stages, each advanced by exactly one board event:
//! 1. soft reset the board
//! 2. on the first reset, move away from the switch by the latch back-off
//!    distance (`<axis>lb`) in relative mode, then soft reset again
//! 3. on the second reset, move by the zero back-off distance (`<axis>zb`)
//!    and return to absolute mode
//! 4. on the next idle report, resume normal operation
//!
//! [`LimitBackoff`] only tracks the stage; the controller performs the I/O.

use cender_core::{Axis, AxisDirection};

use crate::firmware::BoardConfigMap;

/// Where a recovery episode stands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackoffStage {
    /// No recovery in progress
    #[default]
    Idle,
    /// First soft reset sent
    AwaitingFirstReset,
    /// Back-off move and second soft reset sent
    AwaitingSecondReset,
    /// Zero back-off move sent, waiting for the machine to settle
    AwaitingIdle,
}

/// Work the controller must do for a stage transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffStep {
    /// Relative move of `distance` (signed) on `axis`, then soft reset
    BackOff {
        /// Axis to move
        axis: Axis,
        /// Signed distance, as the board reported it
        distance: String,
    },
    /// Move by the zero back-off distance if known, then absolute mode
    ZeroBackoff {
        /// Axis to move
        axis: Axis,
        /// Signed distance, if the board reported one
        distance: Option<String>,
    },
}

/// Limit recovery state machine
#[derive(Debug, Clone, Default)]
pub struct LimitBackoff {
    stage: BackoffStage,
    last_limit: Option<(Axis, AxisDirection)>,
    axis: Option<Axis>,
    sign: &'static str,
}

impl LimitBackoff {
    /// Create an idle state machine
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stage
    pub fn stage(&self) -> BackoffStage {
        self.stage
    }

    /// Check if a recovery episode is running
    pub fn is_active(&self) -> bool {
        self.stage != BackoffStage::Idle
    }

    /// Remember the switch that tripped last
    pub fn record_limit(&mut self, axis: Axis, direction: AxisDirection) {
        self.last_limit = Some((axis, direction));
    }

    /// Drop the remembered switch, so recovery cannot start from it
    pub fn forget_limit(&mut self) {
        self.last_limit = None;
    }

    /// The switch that tripped last
    pub fn last_limit(&self) -> Option<(Axis, AxisDirection)> {
        self.last_limit
    }

    /// Begin recovery from the last limit hit
    ///
    /// Returns `false` if no limit was hit, a recovery is already running,
    /// the axis is not installed or the board has no positive latch
    /// back-off distance for it.
    pub fn start(&mut self, installed_axes: &[Axis], config: &BoardConfigMap) -> bool {
        tracing::debug!("Latch backoff stage 1");
        if self.is_active() {
            tracing::debug!("Latch backoff already running");
            return false;
        }
        let Some((axis, direction)) = self.last_limit else {
            return false;
        };
        if !installed_axes.contains(&axis) {
            tracing::warn!("Limit hit on uninstalled axis {}", axis);
            return false;
        }
        if config.latch_backoff(axis).is_none() {
            tracing::warn!("No latch backoff distance for axis {}", axis);
            return false;
        }

        self.axis = Some(axis);
        self.sign = match direction {
            AxisDirection::Max => "-",
            AxisDirection::Min => "",
        };
        self.stage = BackoffStage::AwaitingFirstReset;
        true
    }

    /// Advance on a reset report
    pub fn on_reset(&mut self, config: &BoardConfigMap) -> Option<BackoffStep> {
        let axis = self.axis?;
        match self.stage {
            BackoffStage::AwaitingFirstReset => {
                tracing::debug!("Latch backoff stage 2");
                let distance = config.latch_backoff(axis)?;
                self.stage = BackoffStage::AwaitingSecondReset;
                Some(BackoffStep::BackOff {
                    axis,
                    distance: format!("{}{}", self.sign, distance),
                })
            }
            BackoffStage::AwaitingSecondReset => {
                let distance = config
                    .zero_backoff(axis)
                    .map(|zb| format!("{}{}", self.sign, zb));
                tracing::debug!("Latch backoff stage 3 {:?}", distance);
                self.stage = BackoffStage::AwaitingIdle;
                Some(BackoffStep::ZeroBackoff { axis, distance })
            }
            BackoffStage::Idle | BackoffStage::AwaitingIdle => None,
        }
    }

    /// Advance on an idle report, returning `true` when recovery completes
    pub fn on_idle(&mut self) -> bool {
        if self.stage != BackoffStage::AwaitingIdle {
            return false;
        }
        tracing::debug!("Latch backoff stage 4");
        self.stage = BackoffStage::Idle;
        self.axis = None;
        self.sign = "";
        self.last_limit = None;
        true
    }

    /// Abandon any running recovery
    pub fn cancel(&mut self) {
        *self = Self::default();
    }
}
