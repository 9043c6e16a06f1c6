mod common;

use bacevent::*;
use common::{Harness, CLASS, PROCESS};

fn stamps(object: &MonitoredObject) -> [TimeStamp; 3] {
    match object.get(PropertyIdentifier::EventTimeStamps) {
        Some(Value::TimeStamps(stamps)) => stamps,
        other => panic!("unexpected timestamps {:?}", other),
    }
}

fn acked(object: &MonitoredObject) -> EventTransitionBits {
    object
        .properties()
        .get_as(PropertyIdentifier::AckedTransitions)
        .expect("acked transitions")
}

#[test]
fn test_out_of_range_scenario() {
    let h = Harness::new();
    let object = h.analog_input(1, |r| r);

    // Idle in range
    h.advance_ms(2000);
    assert_eq!(object.event_state(), EventState::Normal);

    // Condition clears before the delay elapses
    object.update(PropertyIdentifier::PresentValue, Value::Real(110.0)).unwrap();
    assert_eq!(object.pending_transition(), Some(EventState::HighLimit));
    h.advance_ms(500);
    object.update(PropertyIdentifier::PresentValue, Value::Real(90.0)).unwrap();
    assert_eq!(object.pending_transition(), None);
    h.advance_ms(2000);
    assert_eq!(object.event_state(), EventState::Normal);
    assert!(h.delivered().is_empty());

    // Held below the low limit
    object.update(PropertyIdentifier::PresentValue, Value::Real(10.0)).unwrap();
    h.advance_ms(900);
    assert_eq!(object.event_state(), EventState::Normal);
    h.advance_ms(200);
    assert_eq!(object.event_state(), EventState::LowLimit);
    assert!(object.status_flags().in_alarm);

    let delivered = h.delivered();
    assert_eq!(delivered.len(), 1);
    let n = &delivered[0];
    assert_eq!(n.from_state, Some(EventState::Normal));
    assert_eq!(n.to_state, EventState::LowLimit);
    assert_eq!(n.event_type, EventType::OutOfRange);
    assert_eq!(n.priority, 100);
    assert_eq!(n.notification_class, CLASS);
    assert_eq!(n.process_identifier, PROCESS);
    assert_eq!(n.ack_required, Some(true));
    assert_eq!(n.notify_type, NotifyType::Alarm);
    assert_eq!(n.time_stamp, stamps(&object)[0]);
    match &n.event_values {
        Some(NotificationParameters::OutOfRange { exceeding_value, deadband, exceeded_limit, status_flags }) => {
            assert_eq!(*exceeding_value, 10.0);
            assert_eq!(*deadband, 5.0);
            assert_eq!(*exceeded_limit, 20.0);
            assert!(status_flags.in_alarm);
        }
        other => panic!("unexpected event values {:?}", other),
    }
    assert!(!acked(&object).to_offnormal);
}

#[test]
fn test_return_to_normal_honors_deadband_and_normal_delay() {
    let h = Harness::new();
    let object = h.analog_input(2, |r| r.time_delay_normal(2));

    object.update(PropertyIdentifier::PresentValue, Value::Real(110.0)).unwrap();
    h.advance_ms(1000);
    assert_eq!(object.event_state(), EventState::HighLimit);

    // Inside the deadband
    object.update(PropertyIdentifier::PresentValue, Value::Real(97.0)).unwrap();
    assert_eq!(object.pending_transition(), None);

    object.update(PropertyIdentifier::PresentValue, Value::Real(90.0)).unwrap();
    assert_eq!(object.pending_transition(), Some(EventState::Normal));
    h.advance_ms(1000);
    assert_eq!(object.event_state(), EventState::HighLimit);
    h.advance_ms(1000);
    assert_eq!(object.event_state(), EventState::Normal);

    let delivered = h.delivered();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[1].from_state, Some(EventState::HighLimit));
    assert_eq!(delivered[1].priority, 200);
    match &delivered[1].event_values {
        Some(NotificationParameters::OutOfRange { exceeded_limit, .. }) => assert_eq!(*exceeded_limit, 100.0),
        other => panic!("unexpected event values {:?}", other),
    }
}

#[test]
fn test_pending_delay_same_target_kept_other_target_replaced() {
    let h = Harness::new();
    let object = h.analog_input(3, |r| r);

    object.update(PropertyIdentifier::PresentValue, Value::Real(110.0)).unwrap();
    h.advance_ms(600);
    // Same target: the running timer keeps its original deadline
    object.update(PropertyIdentifier::PresentValue, Value::Real(120.0)).unwrap();
    h.advance_ms(400);
    assert_eq!(object.event_state(), EventState::HighLimit);

    let h = Harness::new();
    let object = h.analog_input(4, |r| r);
    object.update(PropertyIdentifier::PresentValue, Value::Real(110.0)).unwrap();
    h.advance_ms(600);
    object.update(PropertyIdentifier::PresentValue, Value::Real(10.0)).unwrap();
    assert_eq!(object.pending_transition(), Some(EventState::LowLimit));
    h.advance_ms(500);
    assert_eq!(object.event_state(), EventState::Normal);
    h.advance_ms(500);
    assert_eq!(object.event_state(), EventState::LowLimit);

    let delivered = h.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].to_state, EventState::LowLimit);
}

#[test]
fn test_fault_bypasses_time_delay() {
    let h = Harness::new();
    let object = h.analog_input(5, |_| {
        IntrinsicReporting::out_of_range(CLASS, AnalogLimits::new(20.0, 100.0, 5.0).with_fault_limits(0.0, 120.0))
            .time_delay(5)
    });

    object.update(PropertyIdentifier::PresentValue, Value::Real(-5.0)).unwrap();
    assert_eq!(object.event_state(), EventState::Fault);
    assert_eq!(object.reliability(), Reliability::UnderRange);
    assert!(object.status_flags().fault);
    assert_eq!(object.pending_transition(), None);

    object.update(PropertyIdentifier::PresentValue, Value::Real(50.0)).unwrap();
    assert_eq!(object.event_state(), EventState::Normal);
    assert_eq!(object.reliability(), Reliability::NoFaultDetected);
    assert!(!object.status_flags().fault);

    let delivered = h.delivered();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[0].to_state, EventState::Fault);
    assert_eq!(delivered[0].priority, 5);
    assert_eq!(delivered[0].event_type, EventType::ChangeOfReliability);
    match &delivered[0].event_values {
        Some(NotificationParameters::ChangeOfReliability { reliability, property_values, .. }) => {
            assert_eq!(*reliability, Reliability::UnderRange);
            assert_eq!(property_values, &vec![(PropertyIdentifier::PresentValue, Value::Real(-5.0))]);
        }
        other => panic!("unexpected event values {:?}", other),
    }
    assert_eq!(delivered[1].from_state, Some(EventState::Fault));
    assert_eq!(delivered[1].to_state, EventState::Normal);
    assert_eq!(delivered[1].event_type, EventType::ChangeOfReliability);
}

#[test]
fn test_reliability_write_forces_fault() {
    let h = Harness::new();
    let object = h.analog_input(6, |r| r);

    object
        .write_property(PropertyIdentifier::Reliability, Reliability::CommunicationFailure.into(), None)
        .unwrap();
    assert_eq!(object.event_state(), EventState::Fault);

    // Limits are not evaluated while faulted
    object.update(PropertyIdentifier::PresentValue, Value::Real(150.0)).unwrap();
    assert_eq!(object.pending_transition(), None);

    object
        .write_property(PropertyIdentifier::Reliability, Reliability::NoFaultDetected.into(), None)
        .unwrap();
    assert_eq!(object.event_state(), EventState::Normal);
    // The clear re-runs the event algorithm against the current value
    assert_eq!(object.pending_transition(), Some(EventState::HighLimit));
    h.advance_ms(1000);
    assert_eq!(object.event_state(), EventState::HighLimit);
}

#[test]
fn test_reliability_clear_returns_to_normal_after_inhibited_fault() {
    let h = Harness::new();
    let object = h.analog_input(14, |r| r);

    object.update(PropertyIdentifier::PresentValue, Value::Real(110.0)).unwrap();
    h.advance_ms(1000);
    assert_eq!(object.event_state(), EventState::HighLimit);
    assert_eq!(h.delivered().len(), 1);

    // A fault written while evaluation is inhibited leaves the state alone
    object
        .write_property(PropertyIdentifier::ReliabilityEvaluationInhibit, Value::Boolean(true), None)
        .unwrap();
    object
        .write_property(PropertyIdentifier::Reliability, Reliability::OpenLoop.into(), None)
        .unwrap();
    assert_eq!(object.event_state(), EventState::HighLimit);
    object
        .write_property(PropertyIdentifier::ReliabilityEvaluationInhibit, Value::Boolean(false), None)
        .unwrap();

    object
        .write_property(PropertyIdentifier::Reliability, Reliability::NoFaultDetected.into(), None)
        .unwrap();
    assert_eq!(object.event_state(), EventState::Normal);
    assert_eq!(object.pending_transition(), Some(EventState::HighLimit));

    let delivered = h.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].from_state, Some(EventState::HighLimit));
    assert_eq!(delivered[0].to_state, EventState::Normal);
    assert_eq!(delivered[0].event_type, EventType::OutOfRange);
}

#[test]
fn test_acknowledge_requires_matching_timestamp() {
    let h = Harness::new();
    let object = h.analog_input(7, |r| r);

    object.update(PropertyIdentifier::PresentValue, Value::Real(110.0)).unwrap();
    h.advance_ms(1000);
    assert_eq!(object.event_state(), EventState::HighLimit);
    assert_eq!(h.delivered().len(), 1);

    let mut request = AcknowledgeAlarmRequest {
        acknowledging_process_identifier: 42,
        event_object: object.id(),
        event_state_acknowledged: EventState::HighLimit,
        time_stamp: TimeStamp::Unspecified,
        acknowledgment_source: Some("console".to_string()),
        time_of_acknowledgment: TimeStamp::from(h.clock.now()),
    };
    let err = object.acknowledge(&request).unwrap_err();
    assert_eq!(err.error_code(), Some(ErrorCode::InvalidTimeStamp));
    assert!(!acked(&object).to_offnormal);
    assert!(h.delivered().is_empty());

    request.time_stamp = stamps(&object)[0];
    object.acknowledge(&request).unwrap();
    assert!(acked(&object).to_offnormal);

    let delivered = h.delivered();
    assert_eq!(delivered.len(), 1);
    let n = &delivered[0];
    assert_eq!(n.notify_type, NotifyType::AckNotification);
    assert_eq!(n.to_state, EventState::HighLimit);
    assert_eq!(n.from_state, None);
    assert_eq!(n.ack_required, None);
    assert_eq!(n.message_text.as_deref(), Some("42: console"));

    // A repeated acknowledgment is accepted without a second notification
    object.acknowledge(&request).unwrap();
    assert!(h.delivered().is_empty());
}

#[test]
fn test_transitions_without_ack_required_are_acked() {
    let h = Harness::with_ack_required(EventTransitionBits::none());
    let object = h.analog_input(8, |r| r);

    object.update(PropertyIdentifier::PresentValue, Value::Real(110.0)).unwrap();
    h.advance_ms(1000);
    assert_eq!(object.event_state(), EventState::HighLimit);
    assert!(acked(&object).all_true());
    assert_eq!(h.delivered()[0].ack_required, Some(false));
}

#[test]
fn test_event_enable_suppresses_notification_only() {
    let h = Harness::new();
    let object = h.analog_input(9, |r| r.event_enable(EventTransitionBits::new(false, true, true)));

    object.update(PropertyIdentifier::PresentValue, Value::Real(110.0)).unwrap();
    h.advance_ms(1000);
    assert_eq!(object.event_state(), EventState::HighLimit);
    assert_ne!(stamps(&object)[0], TimeStamp::Unspecified);
    assert!(h.delivered().is_empty());

    object.update(PropertyIdentifier::PresentValue, Value::Real(50.0)).unwrap();
    h.advance_ms(1000);
    let delivered = h.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].to_state, EventState::Normal);
}

#[test]
fn test_algorithm_inhibit() {
    let h = Harness::new();
    let object = h.analog_input(10, |r| r);

    object.update(PropertyIdentifier::PresentValue, Value::Real(110.0)).unwrap();
    h.advance_ms(1000);
    assert_eq!(object.event_state(), EventState::HighLimit);

    object
        .write_property(PropertyIdentifier::EventAlgorithmInhibit, Value::Boolean(true), None)
        .unwrap();
    assert_eq!(object.event_state(), EventState::Normal);

    object.update(PropertyIdentifier::PresentValue, Value::Real(130.0)).unwrap();
    assert_eq!(object.pending_transition(), None);

    object
        .write_property(PropertyIdentifier::EventAlgorithmInhibit, Value::Boolean(false), None)
        .unwrap();
    assert_eq!(object.pending_transition(), Some(EventState::HighLimit));
    h.advance_ms(1000);
    assert_eq!(object.event_state(), EventState::HighLimit);

    let states: Vec<EventState> = h.delivered().iter().map(|n| n.to_state).collect();
    assert_eq!(states, vec![EventState::HighLimit, EventState::Normal, EventState::HighLimit]);
}

#[test]
fn test_disabling_detection_clears_state_and_summaries() {
    let h = Harness::new();
    let object = h.analog_input(11, |r| r);

    object.update(PropertyIdentifier::PresentValue, Value::Real(110.0)).unwrap();
    h.advance_ms(1000);
    assert!(object.alarm_summary().is_some());

    object.update(PropertyIdentifier::PresentValue, Value::Real(90.0)).unwrap();
    assert_eq!(object.pending_transition(), Some(EventState::Normal));
    assert_eq!(stamps(&object)[2], TimeStamp::Unspecified);

    object.set_event_detection_enable(false);
    assert_eq!(object.event_state(), EventState::Normal);
    assert_eq!(object.pending_transition(), None);
    assert_eq!(stamps(&object)[2], TimeStamp::from(h.clock.now()));
    assert_eq!(h.delivered().len(), 1);
    assert!(object.alarm_summary().is_none());
    assert!(object.event_summary().is_none());
    assert!(object.enrollment_summary(&EnrollmentFilter::default()).is_none());

    object.update(PropertyIdentifier::PresentValue, Value::Real(150.0)).unwrap();
    h.advance_ms(2000);
    assert_eq!(object.event_state(), EventState::Normal);

    object.set_event_detection_enable(true);
    assert_eq!(object.pending_transition(), Some(EventState::HighLimit));
}

#[test]
fn test_message_texts_are_published() {
    let h = Harness::new();
    let texts = ["limit exceeded".to_string(), "sensor fault".to_string(), String::new()];
    let object = h.analog_input(12, |r| r.message_texts(texts));

    object.update(PropertyIdentifier::PresentValue, Value::Real(110.0)).unwrap();
    h.advance_ms(1000);
    object.update(PropertyIdentifier::PresentValue, Value::Real(50.0)).unwrap();
    h.advance_ms(1000);

    let delivered = h.delivered();
    assert_eq!(delivered[0].message_text.as_deref(), Some("limit exceeded"));
    assert_eq!(delivered[1].message_text, None);
    match object.get(PropertyIdentifier::EventMessageTexts) {
        Some(Value::Texts(published)) => assert_eq!(published[0], "limit exceeded"),
        other => panic!("unexpected texts {:?}", other),
    }

    // Clearing the configured text clears the published one on the next event
    object
        .write_property(
            PropertyIdentifier::EventMessageTextsConfig,
            Value::Texts([String::new(), "sensor fault".to_string(), String::new()]),
            None,
        )
        .unwrap();
    object.update(PropertyIdentifier::PresentValue, Value::Real(110.0)).unwrap();
    h.advance_ms(1000);

    let delivered = h.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].message_text, None);
    match object.get(PropertyIdentifier::EventMessageTexts) {
        Some(Value::Texts(published)) => assert!(published[0].is_empty()),
        other => panic!("unexpected texts {:?}", other),
    }
}

#[test]
fn test_summaries() {
    let h = Harness::new();
    let object = h.analog_input(13, |r| r);
    assert!(object.event_summary().is_none());

    object.update(PropertyIdentifier::PresentValue, Value::Real(10.0)).unwrap();
    h.advance_ms(1000);

    let alarm = object.alarm_summary().expect("alarm summary");
    assert_eq!(alarm.alarm_state, EventState::LowLimit);
    assert!(!alarm.acknowledged_transitions.to_offnormal);

    let event = object.event_summary().expect("event summary");
    assert_eq!(event.event_priorities, [100, 5, 200]);
    assert_eq!(event.event_time_stamps, stamps(&object));

    let offnormal = EnrollmentFilter {
        event_state: Some(EventStateFilter::Offnormal),
        priority: Some(PriorityFilter { min: 50, max: 150 }),
        ..Default::default()
    };
    let enrollment = object.enrollment_summary(&offnormal).expect("enrollment");
    assert_eq!(enrollment.event_type, EventType::OutOfRange);
    assert_eq!(enrollment.priority, 100);

    let other_class = EnrollmentFilter { notification_class: Some(99), ..Default::default() };
    assert!(object.enrollment_summary(&other_class).is_none());
}

#[test]
fn test_command_failure_follows_priority_array() {
    let h = Harness::new();
    let object = MonitoredObject::builder(
        ObjectIdentifier::new(ObjectType::BinaryOutput, 1),
        "fan",
        Value::Binary(BinaryPv::Inactive),
    )
    .commandable(Value::Binary(BinaryPv::Inactive))
    .intrinsic_reporting(
        IntrinsicReporting::command_failure(CLASS)
            .parameter(PropertyIdentifier::FeedbackValue, Value::Binary(BinaryPv::Inactive)),
    )
    .build(h.services.clone())
    .unwrap();
    assert_eq!(object.event_state(), EventState::Normal);

    object
        .write_property(PropertyIdentifier::PresentValue, Value::Binary(BinaryPv::Active), Some(8))
        .unwrap();
    assert_eq!(object.event_state(), EventState::Offnormal);

    object.update(PropertyIdentifier::FeedbackValue, Value::Binary(BinaryPv::Active)).unwrap();
    assert_eq!(object.event_state(), EventState::Normal);

    let delivered = h.delivered();
    assert_eq!(delivered.len(), 2);
    match &delivered[0].event_values {
        Some(NotificationParameters::CommandFailure { command_value, feedback_value, .. }) => {
            assert_eq!(*command_value, Value::Binary(BinaryPv::Active));
            assert_eq!(*feedback_value, Value::Binary(BinaryPv::Inactive));
        }
        other => panic!("unexpected event values {:?}", other),
    }
}

#[test]
fn test_internal_listener_sees_every_transition() {
    let h = Harness::new();
    let class_object = h.registry.insert_object(NotificationClass::new(CLASS, [100, 5, 200], EventTransitionBits::all()));
    let object = h.analog_input(14, |r| r);

    object.update(PropertyIdentifier::PresentValue, Value::Real(110.0)).unwrap();
    h.advance_ms(1000);

    // The replacement class has no recipients
    assert!(h.delivered().is_empty());
    assert_eq!(class_object.received(), 1);
    assert_eq!(
        class_object.last_notification().map(|n| n.to_state),
        Some(EventState::HighLimit)
    );
}
