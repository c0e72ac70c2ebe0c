//! Xeryon controller status word.
//!
//! `STAT=?` returns a decimal integer whose low 22 bits are condition flags.
//! The word is decoded with explicit masks on every query and never cached:
//! it is stale the moment the stage moves.

use serde::Serialize;

/// Width of the status word; higher bits are ignored.
pub const STATUS_WORD_BITS: u32 = 24;

/// One named condition bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StatusFlag {
    AmplifiersEnabled,
    EndStop,
    ThermalProtection1,
    ThermalProtection2,
    ForceZero,
    MotorOn,
    ClosedLoop,
    EncoderAtIndex,
    EncoderValid,
    SearchingIndex,
    PositionReached,
    ErrorCompensation,
    EncoderError,
    Scanning,
    LeftEndStop,
    RightEndStop,
    ErrorLimit,
    SearchingOptimalFrequency,
    SafetyTimeoutTriggered,
    EtherCatAcknowledge,
    EmergencyStop,
    PositionFail,
}

impl StatusFlag {
    /// Every flag, in bit order.
    pub const ALL: [StatusFlag; 22] = [
        StatusFlag::AmplifiersEnabled,
        StatusFlag::EndStop,
        StatusFlag::ThermalProtection1,
        StatusFlag::ThermalProtection2,
        StatusFlag::ForceZero,
        StatusFlag::MotorOn,
        StatusFlag::ClosedLoop,
        StatusFlag::EncoderAtIndex,
        StatusFlag::EncoderValid,
        StatusFlag::SearchingIndex,
        StatusFlag::PositionReached,
        StatusFlag::ErrorCompensation,
        StatusFlag::EncoderError,
        StatusFlag::Scanning,
        StatusFlag::LeftEndStop,
        StatusFlag::RightEndStop,
        StatusFlag::ErrorLimit,
        StatusFlag::SearchingOptimalFrequency,
        StatusFlag::SafetyTimeoutTriggered,
        StatusFlag::EtherCatAcknowledge,
        StatusFlag::EmergencyStop,
        StatusFlag::PositionFail,
    ];

    pub const fn bit(self) -> u32 {
        match self {
            StatusFlag::AmplifiersEnabled => 0,
            StatusFlag::EndStop => 1,
            StatusFlag::ThermalProtection1 => 2,
            StatusFlag::ThermalProtection2 => 3,
            StatusFlag::ForceZero => 4,
            StatusFlag::MotorOn => 5,
            StatusFlag::ClosedLoop => 6,
            StatusFlag::EncoderAtIndex => 7,
            StatusFlag::EncoderValid => 8,
            StatusFlag::SearchingIndex => 9,
            StatusFlag::PositionReached => 10,
            StatusFlag::ErrorCompensation => 11,
            StatusFlag::EncoderError => 12,
            StatusFlag::Scanning => 13,
            StatusFlag::LeftEndStop => 14,
            StatusFlag::RightEndStop => 15,
            StatusFlag::ErrorLimit => 16,
            StatusFlag::SearchingOptimalFrequency => 17,
            StatusFlag::SafetyTimeoutTriggered => 18,
            StatusFlag::EtherCatAcknowledge => 19,
            StatusFlag::EmergencyStop => 20,
            StatusFlag::PositionFail => 21,
        }
    }

    pub const fn mask(self) -> u32 {
        1 << self.bit()
    }

    /// Conditions the device cannot clear by itself: motion must abort and
    /// the controller needs an explicit reset.
    pub const fn is_fault(self) -> bool {
        matches!(
            self,
            StatusFlag::ThermalProtection1
                | StatusFlag::ThermalProtection2
                | StatusFlag::EncoderError
                | StatusFlag::ErrorLimit
                | StatusFlag::SafetyTimeoutTriggered
                | StatusFlag::EmergencyStop
                | StatusFlag::PositionFail
        )
    }

    pub const fn name(self) -> &'static str {
        match self {
            StatusFlag::AmplifiersEnabled => "amplifiers_enabled",
            StatusFlag::EndStop => "end_stop",
            StatusFlag::ThermalProtection1 => "thermal_protection_1",
            StatusFlag::ThermalProtection2 => "thermal_protection_2",
            StatusFlag::ForceZero => "force_zero",
            StatusFlag::MotorOn => "motor_on",
            StatusFlag::ClosedLoop => "closed_loop",
            StatusFlag::EncoderAtIndex => "encoder_at_index",
            StatusFlag::EncoderValid => "encoder_valid",
            StatusFlag::SearchingIndex => "searching_index",
            StatusFlag::PositionReached => "position_reached",
            StatusFlag::ErrorCompensation => "error_compensation",
            StatusFlag::EncoderError => "encoder_error",
            StatusFlag::Scanning => "scanning",
            StatusFlag::LeftEndStop => "left_end_stop",
            StatusFlag::RightEndStop => "right_end_stop",
            StatusFlag::ErrorLimit => "error_limit",
            StatusFlag::SearchingOptimalFrequency => "searching_optimal_frequency",
            StatusFlag::SafetyTimeoutTriggered => "safety_timeout_triggered",
            StatusFlag::EtherCatAcknowledge => "ethercat_acknowledge",
            StatusFlag::EmergencyStop => "emergency_stop",
            StatusFlag::PositionFail => "position_fail",
        }
    }
}

impl std::fmt::Display for StatusFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A decoded status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusWord {
    raw: u32,
}

impl StatusWord {
    pub fn from_raw(raw: u32) -> Self {
        Self {
            raw: raw & ((1 << STATUS_WORD_BITS) - 1),
        }
    }

    pub fn raw(&self) -> u32 {
        self.raw
    }

    pub fn is_set(&self, flag: StatusFlag) -> bool {
        self.raw & flag.mask() != 0
    }

    /// Flags currently set, in bit order.
    pub fn flags(&self) -> Vec<StatusFlag> {
        StatusFlag::ALL
            .iter()
            .copied()
            .filter(|f| self.is_set(*f))
            .collect()
    }

    /// Set flags that count as faults.
    pub fn faults(&self) -> Vec<StatusFlag> {
        self.flags().into_iter().filter(|f| f.is_fault()).collect()
    }

    pub fn has_fault(&self) -> bool {
        StatusFlag::ALL
            .iter()
            .any(|f| f.is_fault() && self.is_set(*f))
    }

    pub fn position_reached(&self) -> bool {
        self.is_set(StatusFlag::PositionReached)
    }

    pub fn is_searching_index(&self) -> bool {
        self.is_set(StatusFlag::SearchingIndex)
    }

    pub fn is_scanning(&self) -> bool {
        self.is_set(StatusFlag::Scanning)
    }
}

impl std::fmt::Display for StatusWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.flags().iter().map(|flag| flag.name()).collect();
        write!(f, "{:#08x} [{}]", self.raw, names.join("|"))
    }
}

/// Snapshot returned by `ActuatorController::status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MotionStatus {
    pub word: StatusWord,
    /// Encoder position at the time of the query.
    pub position: i64,
}

impl MotionStatus {
    pub fn position_reached(&self) -> bool {
        self.word.position_reached()
    }

    pub fn faults(&self) -> Vec<StatusFlag> {
        self.word.faults()
    }
}
