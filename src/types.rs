// src/types.rs - Enumerations and constructed types shared by the engine
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// EVENT STATE AND TRANSITIONS
// ============================================================================

/// Event state of a monitored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventState {
    Normal,
    Fault,
    Offnormal,
    HighLimit,
    LowLimit,
    LifeSafetyAlarm,
}

impl EventState {
    /// Transition bucket that entering this state is recorded under
    pub fn transition(&self) -> Transition {
        match self {
            EventState::Normal => Transition::ToNormal,
            EventState::Fault => Transition::ToFault,
            _ => Transition::ToOffnormal,
        }
    }

    /// Any alarm condition other than normal or fault
    pub fn is_offnormal(&self) -> bool {
        !matches!(self, EventState::Normal | EventState::Fault)
    }
}

impl Default for EventState {
    fn default() -> Self {
        EventState::Normal
    }
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventState::Normal => "normal",
            EventState::Fault => "fault",
            EventState::Offnormal => "offnormal",
            EventState::HighLimit => "high-limit",
            EventState::LowLimit => "low-limit",
            EventState::LifeSafetyAlarm => "life-safety-alarm",
        };
        f.write_str(name)
    }
}

/// One of the three timestamp/acknowledgment buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transition {
    ToOffnormal,
    ToFault,
    ToNormal,
}

impl Transition {
    pub const ALL: [Transition; 3] = [Transition::ToOffnormal, Transition::ToFault, Transition::ToNormal];

    /// Array index of this bucket in the three-slot properties
    pub fn index(&self) -> usize {
        match self {
            Transition::ToOffnormal => 0,
            Transition::ToFault => 1,
            Transition::ToNormal => 2,
        }
    }
}

/// Three-bit vector, one flag per transition bucket
///
/// Used for event enable, ack required, acked transitions and the
/// per-destination transition filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EventTransitionBits {
    #[serde(default)]
    pub to_offnormal: bool,
    #[serde(default)]
    pub to_fault: bool,
    #[serde(default)]
    pub to_normal: bool,
}

impl EventTransitionBits {
    pub fn new(to_offnormal: bool, to_fault: bool, to_normal: bool) -> Self {
        Self { to_offnormal, to_fault, to_normal }
    }

    pub fn all() -> Self {
        Self::new(true, true, true)
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn get(&self, transition: Transition) -> bool {
        match transition {
            Transition::ToOffnormal => self.to_offnormal,
            Transition::ToFault => self.to_fault,
            Transition::ToNormal => self.to_normal,
        }
    }

    pub fn set(&mut self, transition: Transition, value: bool) {
        match transition {
            Transition::ToOffnormal => self.to_offnormal = value,
            Transition::ToFault => self.to_fault = value,
            Transition::ToNormal => self.to_normal = value,
        }
    }

    /// Whether the bucket for entering `state` is set
    pub fn contains(&self, state: EventState) -> bool {
        self.get(state.transition())
    }

    pub fn all_true(&self) -> bool {
        self.to_offnormal && self.to_fault && self.to_normal
    }
}

// ============================================================================
// RELIABILITY, EVENT TYPE, NOTIFY TYPE
// ============================================================================

/// Reliability of the monitored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reliability {
    NoFaultDetected,
    NoSensor,
    OverRange,
    UnderRange,
    OpenLoop,
    ShortedLoop,
    NoOutput,
    UnreliableOther,
    ProcessError,
    MultiStateFault,
    ConfigurationError,
    CommunicationFailure,
    MemberFault,
}

impl Reliability {
    pub fn is_fault(&self) -> bool {
        !matches!(self, Reliability::NoFaultDetected)
    }
}

impl Default for Reliability {
    fn default() -> Self {
        Reliability::NoFaultDetected
    }
}

/// Kind of event carried by a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    ChangeOfState,
    CommandFailure,
    OutOfRange,
    ChangeOfReliability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotifyType {
    Alarm,
    Event,
    AckNotification,
}

impl Default for NotifyType {
    fn default() -> Self {
        NotifyType::Alarm
    }
}

// ============================================================================
// CONSTRUCTED TYPES
// ============================================================================

/// Status flags derived from event state, reliability, override and
/// out-of-service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StatusFlags {
    pub in_alarm: bool,
    pub fault: bool,
    pub overridden: bool,
    pub out_of_service: bool,
}

impl StatusFlags {
    pub fn new(in_alarm: bool, fault: bool, overridden: bool, out_of_service: bool) -> Self {
        Self { in_alarm, fault, overridden, out_of_service }
    }
}

/// Enables for the low and high limit of an out-of-range algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LimitEnable {
    pub low_limit_enable: bool,
    pub high_limit_enable: bool,
}

impl LimitEnable {
    pub fn new(low_limit_enable: bool, high_limit_enable: bool) -> Self {
        Self { low_limit_enable, high_limit_enable }
    }
}

impl Default for LimitEnable {
    fn default() -> Self {
        Self::new(true, true)
    }
}

/// Present value of a binary point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BinaryPv {
    Inactive,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectType {
    AnalogInput,
    AnalogOutput,
    AnalogValue,
    BinaryInput,
    BinaryOutput,
    BinaryValue,
    MultiStateInput,
    MultiStateOutput,
    MultiStateValue,
    NotificationClass,
    Device,
}

/// Object type plus instance number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectIdentifier {
    pub object_type: ObjectType,
    pub instance: u32,
}

impl ObjectIdentifier {
    pub fn new(object_type: ObjectType, instance: u32) -> Self {
        Self { object_type, instance }
    }

    pub fn device(instance: u32) -> Self {
        Self::new(ObjectType::Device, instance)
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.object_type, self.instance)
    }
}

/// Event timestamp; unspecified until the bucket sees its first transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeStamp {
    #[default]
    Unspecified,
    DateTime(DateTime<Utc>),
}

impl TimeStamp {
    pub fn date_time(&self) -> Option<DateTime<Utc>> {
        match self {
            TimeStamp::Unspecified => None,
            TimeStamp::DateTime(at) => Some(*at),
        }
    }
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(at: DateTime<Utc>) -> Self {
        TimeStamp::DateTime(at)
    }
}
