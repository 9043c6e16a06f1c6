// src/algorithms.rs - Pluggable event and fault detection algorithms
//
// Algorithms are stateless strategies. Every parameter (limits, delays,
// alarm values) is read from the object's property store at evaluation
// time, so property writes take effect on the next evaluation.
use crate::{
    notification::NotificationParameters,
    property::{PropertyIdentifier, PropertyStore},
    types::{EventState, EventType, LimitEnable, Reliability, StatusFlags},
    value::Value,
};
use std::fmt;
use std::time::Duration;

/// Inputs handed to an algorithm on each evaluation
#[derive(Debug, Clone, Copy)]
pub struct AlgorithmContext<'a> {
    pub props: &'a PropertyStore,
    pub event_state: EventState,
    pub reliability: Reliability,
    /// Property whose write triggered this evaluation
    pub property: PropertyIdentifier,
    pub old: Option<&'a Value>,
    pub new: &'a Value,
}

impl<'a> AlgorithmContext<'a> {
    fn monitored(&self, pid: PropertyIdentifier) -> Option<Value> {
        self.props.get(pid)
    }

    fn status_flags(&self) -> StatusFlags {
        self.props
            .get_as(PropertyIdentifier::StatusFlags)
            .unwrap_or_default()
    }

    fn time_delay(&self) -> Duration {
        let secs = self.props.get_as::<u32>(PropertyIdentifier::TimeDelay).unwrap_or(0);
        Duration::from_secs(u64::from(secs))
    }

    /// Falls back to the time delay when no separate normal delay is set
    fn time_delay_normal(&self) -> Duration {
        match self.props.get_as::<u32>(PropertyIdentifier::TimeDelayNormal) {
            Some(secs) => Duration::from_secs(u64::from(secs)),
            None => self.time_delay(),
        }
    }

    fn real(&self, pid: PropertyIdentifier) -> Option<f64> {
        self.props.get(pid).and_then(|v| v.as_real())
    }
}

/// Requested move to a new event state, possibly after a delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub to_state: EventState,
    pub delay: Duration,
}

impl StateTransition {
    pub fn new(to_state: EventState, delay: Duration) -> Self {
        Self { to_state, delay }
    }

    pub fn immediate(to_state: EventState) -> Self {
        Self::new(to_state, Duration::ZERO)
    }
}

/// Off-normal detection strategy
pub trait EventAlgorithm: Send + Sync + fmt::Debug {
    fn event_type(&self) -> EventType;

    /// Property carrying the monitored value
    fn monitored_property(&self) -> PropertyIdentifier {
        PropertyIdentifier::PresentValue
    }

    /// Writes to these properties re-run the algorithm
    fn trigger_properties(&self) -> Vec<PropertyIdentifier>;

    /// `None` means no transition is wanted and any pending delay is void
    fn evaluate_event(&self, ctx: &AlgorithmContext<'_>) -> Option<StateTransition>;

    /// Payload for a notification reporting `from -> to`
    fn event_values(
        &self,
        ctx: &AlgorithmContext<'_>,
        from: EventState,
        to: EventState,
    ) -> Option<NotificationParameters>;
}

/// Reliability evaluation strategy
pub trait FaultAlgorithm: Send + Sync + fmt::Debug {
    fn trigger_properties(&self) -> Vec<PropertyIdentifier>;

    /// `None` leaves reliability as is
    fn evaluate_fault(&self, ctx: &AlgorithmContext<'_>) -> Option<Reliability>;
}

// ============================================================================
// EVENT ALGORITHMS
// ============================================================================

/// High/low limit supervision with deadband for analog values
#[derive(Debug, Clone, Copy, Default)]
pub struct OutOfRange;

impl EventAlgorithm for OutOfRange {
    fn event_type(&self) -> EventType {
        EventType::OutOfRange
    }

    fn trigger_properties(&self) -> Vec<PropertyIdentifier> {
        vec![
            PropertyIdentifier::PresentValue,
            PropertyIdentifier::HighLimit,
            PropertyIdentifier::LowLimit,
            PropertyIdentifier::Deadband,
            PropertyIdentifier::LimitEnable,
        ]
    }

    fn evaluate_event(&self, ctx: &AlgorithmContext<'_>) -> Option<StateTransition> {
        let value = ctx.monitored(self.monitored_property())?.as_real()?;
        let high = ctx.real(PropertyIdentifier::HighLimit);
        let low = ctx.real(PropertyIdentifier::LowLimit);
        let deadband = ctx.real(PropertyIdentifier::Deadband).unwrap_or(0.0);
        let enable: LimitEnable = ctx
            .props
            .get_as(PropertyIdentifier::LimitEnable)
            .unwrap_or_default();

        match ctx.event_state {
            EventState::Normal => {
                if enable.high_limit_enable && high.map_or(false, |h| value > h) {
                    Some(StateTransition::new(EventState::HighLimit, ctx.time_delay()))
                } else if enable.low_limit_enable && low.map_or(false, |l| value < l) {
                    Some(StateTransition::new(EventState::LowLimit, ctx.time_delay()))
                } else {
                    None
                }
            }
            EventState::HighLimit => {
                if !enable.high_limit_enable {
                    Some(StateTransition::immediate(EventState::Normal))
                } else if high.map_or(true, |h| value < h - deadband) {
                    Some(StateTransition::new(EventState::Normal, ctx.time_delay_normal()))
                } else {
                    None
                }
            }
            EventState::LowLimit => {
                if !enable.low_limit_enable {
                    Some(StateTransition::immediate(EventState::Normal))
                } else if low.map_or(true, |l| value > l + deadband) {
                    Some(StateTransition::new(EventState::Normal, ctx.time_delay_normal()))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn event_values(
        &self,
        ctx: &AlgorithmContext<'_>,
        from: EventState,
        to: EventState,
    ) -> Option<NotificationParameters> {
        let limit = if to == EventState::HighLimit || (to == EventState::Normal && from == EventState::HighLimit) {
            PropertyIdentifier::HighLimit
        } else {
            PropertyIdentifier::LowLimit
        };
        Some(NotificationParameters::OutOfRange {
            exceeding_value: ctx.real(self.monitored_property())?,
            status_flags: ctx.status_flags(),
            deadband: ctx.real(PropertyIdentifier::Deadband).unwrap_or(0.0),
            exceeded_limit: ctx.real(limit)?,
        })
    }
}

/// Off-normal while the value is one of the configured alarm values
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeOfState;

impl ChangeOfState {
    fn in_alarm(ctx: &AlgorithmContext<'_>, value: &Value) -> bool {
        match ctx.props.get(PropertyIdentifier::AlarmValues) {
            Some(Value::List(values)) => values.contains(value),
            Some(single) => &single == value,
            None => false,
        }
    }
}

impl EventAlgorithm for ChangeOfState {
    fn event_type(&self) -> EventType {
        EventType::ChangeOfState
    }

    fn trigger_properties(&self) -> Vec<PropertyIdentifier> {
        vec![PropertyIdentifier::PresentValue, PropertyIdentifier::AlarmValues]
    }

    fn evaluate_event(&self, ctx: &AlgorithmContext<'_>) -> Option<StateTransition> {
        let value = ctx.monitored(self.monitored_property())?;
        let alarm = Self::in_alarm(ctx, &value);
        match ctx.event_state {
            EventState::Normal if alarm => Some(StateTransition::new(EventState::Offnormal, ctx.time_delay())),
            EventState::Offnormal if !alarm => {
                Some(StateTransition::new(EventState::Normal, ctx.time_delay_normal()))
            }
            _ => None,
        }
    }

    fn event_values(
        &self,
        ctx: &AlgorithmContext<'_>,
        _from: EventState,
        _to: EventState,
    ) -> Option<NotificationParameters> {
        Some(NotificationParameters::ChangeOfState {
            new_state: ctx.monitored(self.monitored_property())?,
            status_flags: ctx.status_flags(),
        })
    }
}

/// Off-normal while the feedback value disagrees with the commanded value
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandFailure;

impl EventAlgorithm for CommandFailure {
    fn event_type(&self) -> EventType {
        EventType::CommandFailure
    }

    fn trigger_properties(&self) -> Vec<PropertyIdentifier> {
        vec![PropertyIdentifier::PresentValue, PropertyIdentifier::FeedbackValue]
    }

    fn evaluate_event(&self, ctx: &AlgorithmContext<'_>) -> Option<StateTransition> {
        let commanded = ctx.monitored(self.monitored_property())?;
        let feedback = ctx.monitored(PropertyIdentifier::FeedbackValue)?;
        let failed = commanded != feedback;
        match ctx.event_state {
            EventState::Normal if failed => Some(StateTransition::new(EventState::Offnormal, ctx.time_delay())),
            EventState::Offnormal if !failed => {
                Some(StateTransition::new(EventState::Normal, ctx.time_delay_normal()))
            }
            _ => None,
        }
    }

    fn event_values(
        &self,
        ctx: &AlgorithmContext<'_>,
        _from: EventState,
        _to: EventState,
    ) -> Option<NotificationParameters> {
        Some(NotificationParameters::CommandFailure {
            command_value: ctx.monitored(self.monitored_property())?,
            status_flags: ctx.status_flags(),
            feedback_value: ctx.monitored(PropertyIdentifier::FeedbackValue)?,
        })
    }
}

// ============================================================================
// FAULT ALGORITHMS
// ============================================================================

/// Over/under range faults for analog values
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultLimits;

impl FaultAlgorithm for FaultLimits {
    fn trigger_properties(&self) -> Vec<PropertyIdentifier> {
        vec![
            PropertyIdentifier::PresentValue,
            PropertyIdentifier::FaultHighLimit,
            PropertyIdentifier::FaultLowLimit,
        ]
    }

    fn evaluate_fault(&self, ctx: &AlgorithmContext<'_>) -> Option<Reliability> {
        let value = ctx.real(PropertyIdentifier::PresentValue)?;
        if ctx.real(PropertyIdentifier::FaultLowLimit).map_or(false, |l| value < l) {
            return Some(Reliability::UnderRange);
        }
        if ctx.real(PropertyIdentifier::FaultHighLimit).map_or(false, |h| value > h) {
            return Some(Reliability::OverRange);
        }
        match ctx.reliability {
            Reliability::UnderRange | Reliability::OverRange => Some(Reliability::NoFaultDetected),
            _ => None,
        }
    }
}

/// Multistate fault while the value is one of the configured fault values
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultState;

impl FaultAlgorithm for FaultState {
    fn trigger_properties(&self) -> Vec<PropertyIdentifier> {
        vec![PropertyIdentifier::PresentValue, PropertyIdentifier::FaultValues]
    }

    fn evaluate_fault(&self, ctx: &AlgorithmContext<'_>) -> Option<Reliability> {
        let value = ctx.props.get(PropertyIdentifier::PresentValue)?;
        let faulted = match ctx.props.get(PropertyIdentifier::FaultValues) {
            Some(Value::List(values)) => values.contains(&value),
            _ => false,
        };
        if faulted {
            Some(Reliability::MultiStateFault)
        } else if ctx.reliability == Reliability::MultiStateFault {
            Some(Reliability::NoFaultDetected)
        } else {
            None
        }
    }
}
