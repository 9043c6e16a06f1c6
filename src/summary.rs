// src/summary.rs - Alarm, event and enrollment summaries
use crate::{
    notification::{NotificationClass, Recipient},
    types::{EventState, EventTransitionBits, EventType, NotifyType, ObjectIdentifier, TimeStamp},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmSummary {
    pub object_identifier: ObjectIdentifier,
    pub alarm_state: EventState,
    pub acknowledged_transitions: EventTransitionBits,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSummary {
    pub object_identifier: ObjectIdentifier,
    pub event_state: EventState,
    pub acknowledged_transitions: EventTransitionBits,
    pub event_time_stamps: [TimeStamp; 3],
    pub notify_type: NotifyType,
    pub event_enable: EventTransitionBits,
    pub event_priorities: [u8; 3],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentSummary {
    pub object_identifier: ObjectIdentifier,
    pub event_type: EventType,
    pub event_state: EventState,
    pub priority: u8,
    pub notification_class: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcknowledgmentFilter {
    All,
    Acked,
    NotAcked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventStateFilter {
    Offnormal,
    Fault,
    Normal,
    All,
    /// Anything but normal
    Active,
}

impl EventStateFilter {
    pub fn matches(&self, state: EventState) -> bool {
        match self {
            EventStateFilter::Offnormal => state.is_offnormal(),
            EventStateFilter::Fault => state == EventState::Fault,
            EventStateFilter::Normal => state == EventState::Normal,
            EventStateFilter::All => true,
            EventStateFilter::Active => state != EventState::Normal,
        }
    }
}

/// Inclusive priority range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityFilter {
    pub min: u8,
    pub max: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientProcess {
    pub recipient: Recipient,
    pub process_identifier: u32,
}

/// Enrollment query; every set criterion must match
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentFilter {
    pub acknowledgment: Option<AcknowledgmentFilter>,
    pub enrollment: Option<RecipientProcess>,
    pub event_state: Option<EventStateFilter>,
    pub event_type: Option<EventType>,
    pub priority: Option<PriorityFilter>,
    pub notification_class: Option<u32>,
}

impl EnrollmentFilter {
    pub fn matches(&self, summary: &EnrollmentSummary, acked: EventTransitionBits, class: &NotificationClass) -> bool {
        let ack_ok = match self.acknowledgment {
            None | Some(AcknowledgmentFilter::All) => true,
            Some(AcknowledgmentFilter::Acked) => acked.all_true(),
            Some(AcknowledgmentFilter::NotAcked) => !acked.all_true(),
        };
        let enrollment_ok = self.enrollment.as_ref().map_or(true, |wanted| {
            class.recipient_list.iter().any(|dest| {
                dest.recipient == wanted.recipient && dest.process_identifier == wanted.process_identifier
            })
        });
        let state_ok = self.event_state.map_or(true, |f| f.matches(summary.event_state));
        let type_ok = self.event_type.map_or(true, |t| t == summary.event_type);
        let priority_ok = self
            .priority
            .map_or(true, |p| (p.min..=p.max).contains(&summary.priority));
        let class_ok = self
            .notification_class
            .map_or(true, |id| id == summary.notification_class);

        ack_ok && enrollment_ok && state_ok && type_ok && priority_ok && class_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::Destination;
    use crate::types::ObjectType;

    fn summary(state: EventState, priority: u8) -> EnrollmentSummary {
        EnrollmentSummary {
            object_identifier: ObjectIdentifier::new(ObjectType::AnalogInput, 1),
            event_type: EventType::OutOfRange,
            event_state: state,
            priority,
            notification_class: 17,
        }
    }

    #[test]
    fn test_empty_filter_matches() {
        let class = NotificationClass::new(17, [100, 5, 200], EventTransitionBits::all());
        assert!(EnrollmentFilter::default().matches(&summary(EventState::Normal, 200), EventTransitionBits::all(), &class));
    }

    #[test]
    fn test_filters_combine_with_and() {
        let class = NotificationClass::new(17, [100, 5, 200], EventTransitionBits::all())
            .with_recipient(Destination::new(Recipient::Device(4), 9));
        let pending = EventTransitionBits::new(false, true, true);

        let filter = EnrollmentFilter {
            acknowledgment: Some(AcknowledgmentFilter::NotAcked),
            event_state: Some(EventStateFilter::Offnormal),
            priority: Some(PriorityFilter { min: 50, max: 150 }),
            ..Default::default()
        };
        assert!(filter.matches(&summary(EventState::HighLimit, 100), pending, &class));
        assert!(!filter.matches(&summary(EventState::HighLimit, 100), EventTransitionBits::all(), &class));
        assert!(!filter.matches(&summary(EventState::HighLimit, 200), pending, &class));
        assert!(!filter.matches(&summary(EventState::Fault, 100), pending, &class));

        let by_recipient = EnrollmentFilter {
            enrollment: Some(RecipientProcess { recipient: Recipient::Device(4), process_identifier: 9 }),
            ..Default::default()
        };
        assert!(by_recipient.matches(&summary(EventState::Normal, 200), pending, &class));
        let wrong_process = EnrollmentFilter {
            enrollment: Some(RecipientProcess { recipient: Recipient::Device(4), process_identifier: 1 }),
            ..Default::default()
        };
        assert!(!wrong_process.matches(&summary(EventState::Normal, 200), pending, &class));
    }

    #[test]
    fn test_state_filter_categories() {
        assert!(EventStateFilter::Active.matches(EventState::Fault));
        assert!(!EventStateFilter::Offnormal.matches(EventState::Fault));
        assert!(EventStateFilter::Offnormal.matches(EventState::LowLimit));
        assert!(!EventStateFilter::Active.matches(EventState::Normal));
    }
}
