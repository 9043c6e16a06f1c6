use bacevent::*;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

const DEVICE_YAML: &str = r#"
device:
  instance: 260001
  name: ahu-3
notification_classes:
  - id: 17
    priority: [100, 5, 200]
    ack_required: { to_offnormal: true, to_fault: true, to_normal: false }
    recipients:
      - recipient: { device: 100 }
        process_identifier: 9
        confirmed: true
devices:
  - instance: 100
    network: 5
    mac: [10, 0, 0, 100]
points:
  - kind: analog-input
    instance: 1
    name: supply-air-temp
    initial: 60
    reporting:
      notification_class: 17
      time_delay: 1
      time_delay_normal: 2
      algorithm:
        type: out-of-range
        high_limit: 100
        low_limit: 20
        deadband: 5
        fault_high_limit: 120
        fault_low_limit: 0
  - kind: binary-output
    instance: 1
    name: supply-fan
    commandable:
      relinquish_default: inactive
      minimum_on_time: 60
      minimum_off_time: 30
  - kind: multi-state-input
    instance: 1
    name: filter-status
    initial: 1
    reporting:
      notification_class: 17
      algorithm:
        type: change-of-state
        alarm_values: [3]
        fault_values: [4]
"#;

fn load(yaml: &str) -> (LocalDevice, VirtualClock, Arc<RecordingTransport>) {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    let config = Config::from_file(file.path()).unwrap();
    let clock = VirtualClock::default();
    let transport = Arc::new(RecordingTransport::new());
    let device =
        LocalDevice::from_config(&config, Arc::new(clock.clone()), Arc::new(clock.clone()), transport.clone())
            .unwrap();
    (device, clock, transport)
}

#[test]
fn test_device_built_from_file() {
    let (device, _, _) = load(DEVICE_YAML);
    assert_eq!(device.identifier(), ObjectIdentifier::device(260001));
    assert_eq!(device.name(), "ahu-3");
    assert_eq!(device.object_count(), 3);

    let fan = device.object(ObjectIdentifier::new(ObjectType::BinaryOutput, 1)).unwrap();
    assert!(fan.is_commandable());
    assert_eq!(fan.present_value(), Some(Value::Binary(BinaryPv::Inactive)));
    assert_eq!(fan.get(PropertyIdentifier::MinimumOnTime), Some(Value::Unsigned(60)));

    let temp = device.object(ObjectIdentifier::new(ObjectType::AnalogInput, 1)).unwrap();
    assert!(!temp.is_commandable());
    assert_eq!(temp.get(PropertyIdentifier::FaultHighLimit), Some(Value::Real(120.0)));
}

#[test]
fn test_configured_point_reports_to_resolved_device() {
    let (device, clock, transport) = load(DEVICE_YAML);
    let temp = device.object(ObjectIdentifier::new(ObjectType::AnalogInput, 1)).unwrap();

    temp.update(PropertyIdentifier::PresentValue, Value::Real(105.0)).unwrap();
    clock.advance(Duration::from_secs(1));
    assert_eq!(temp.event_state(), EventState::HighLimit);

    device.dispatcher().flush();
    let sent = transport.take();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].confirmed);
    assert_eq!(sent[0].address, Address::new(5, vec![10, 0, 0, 100]));
    assert_eq!(sent[0].notification.initiating_device, ObjectIdentifier::device(260001));
    assert_eq!(sent[0].notification.process_identifier, 9);
    assert_eq!(device.dispatcher().stats().sent, 1);
}

#[test]
fn test_multistate_fault_values() {
    let (device, _, _) = load(DEVICE_YAML);
    let filter = device.object(ObjectIdentifier::new(ObjectType::MultiStateInput, 1)).unwrap();

    filter.update(PropertyIdentifier::PresentValue, Value::Unsigned(3)).unwrap();
    assert_eq!(filter.event_state(), EventState::Offnormal);

    filter.update(PropertyIdentifier::PresentValue, Value::Unsigned(4)).unwrap();
    assert_eq!(filter.event_state(), EventState::Fault);
    assert_eq!(filter.reliability(), Reliability::MultiStateFault);

    filter.update(PropertyIdentifier::PresentValue, Value::Unsigned(1)).unwrap();
    assert_eq!(filter.event_state(), EventState::Normal);
    assert_eq!(device.alarm_summaries().len(), 0);
    // to-offnormal and to-fault still await acknowledgment
    assert_eq!(device.event_information().len(), 1);
}

#[test]
fn test_enrollment_filter_by_recipient() {
    let (device, _, _) = load(DEVICE_YAML);
    let enrolled = EnrollmentFilter {
        enrollment: Some(RecipientProcess { recipient: Recipient::Device(100), process_identifier: 9 }),
        ..Default::default()
    };
    assert_eq!(device.enrollment_summaries(&enrolled).len(), 2);

    let stranger = EnrollmentFilter {
        enrollment: Some(RecipientProcess { recipient: Recipient::Device(100), process_identifier: 10 }),
        ..Default::default()
    };
    assert!(device.enrollment_summaries(&stranger).is_empty());
}

#[test]
fn test_invalid_configuration_rejected() {
    let missing_class = DEVICE_YAML.replace("notification_class: 17\n      time_delay: 1", "notification_class: 4\n      time_delay: 1");
    assert!(matches!(Config::from_yaml(&missing_class), Err(BacError::Config(_))));

    let commandable_input = DEVICE_YAML.replace("kind: binary-output", "kind: binary-input");
    assert!(matches!(Config::from_yaml(&commandable_input), Err(BacError::Config(_))));

    assert!(matches!(Config::from_file("/nonexistent/device.yaml"), Err(BacError::Io(_))));
}
