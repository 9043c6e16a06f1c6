// Shared fixture: virtual time, in-memory registry and a recording transport
#![allow(dead_code)]

use bacevent::*;
use std::sync::Arc;

pub const CLASS: u32 = 17;
pub const PROCESS: u32 = 9;

pub struct Harness {
    pub clock: VirtualClock,
    pub transport: Arc<RecordingTransport>,
    pub registry: Arc<InMemoryRegistry>,
    pub services: ObjectServices,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_ack_required(EventTransitionBits::all())
    }

    pub fn with_ack_required(ack_required: EventTransitionBits) -> Self {
        let clock = VirtualClock::default();
        let transport = Arc::new(RecordingTransport::new());
        let registry = Arc::new(InMemoryRegistry::new());
        registry.insert(
            NotificationClass::new(CLASS, [100, 5, 200], ack_required).with_recipient(Destination::new(
                Recipient::Address(Address::new(0, vec![192, 168, 1, 20])),
                PROCESS,
            )),
        );
        let dispatcher = NotificationDispatcher::builder(transport.clone(), Arc::new(DeviceTable::new()))
            .spawn()
            .expect("dispatcher");
        let services = ObjectServices {
            device: ObjectIdentifier::device(1),
            clock: Arc::new(clock.clone()),
            scheduler: Arc::new(clock.clone()),
            registry: registry.clone(),
            dispatcher,
        };
        Self { clock, transport, registry, services }
    }

    /// Notifications delivered so far, draining the transport
    pub fn delivered(&self) -> Vec<EventNotification> {
        self.services.dispatcher.flush();
        self.transport.take().into_iter().map(|sent| sent.notification).collect()
    }

    pub fn advance_ms(&self, ms: u64) {
        self.clock.advance(std::time::Duration::from_millis(ms));
    }

    /// Analog input with high 100, low 20, deadband 5 and a 1s delay
    pub fn analog_input(&self, instance: u32, reporting: impl FnOnce(IntrinsicReporting) -> IntrinsicReporting) -> MonitoredObject {
        let limits = AnalogLimits::new(20.0, 100.0, 5.0);
        MonitoredObject::builder(
            ObjectIdentifier::new(ObjectType::AnalogInput, instance),
            format!("ai-{}", instance),
            Value::Real(60.0),
        )
        .intrinsic_reporting(reporting(IntrinsicReporting::out_of_range(CLASS, limits).time_delay(1)))
        .build(self.services.clone())
        .expect("analog input")
    }
}
