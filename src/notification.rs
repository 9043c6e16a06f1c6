// src/notification.rs - Notification classes, destinations and payloads
use crate::{
    dispatcher::NotificationListener,
    error::Result,
    property::PropertyIdentifier,
    types::{
        EventState, EventTransitionBits, EventType, NotifyType, ObjectIdentifier, Reliability, StatusFlags,
        TimeStamp,
    },
    value::Value,
};
use chrono::{DateTime, Datelike, NaiveTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

// ============================================================================
// RECIPIENTS
// ============================================================================

/// Network address of a remote device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub network: u16,
    pub mac: Vec<u8>,
}

impl Address {
    pub fn new(network: u16, mac: impl Into<Vec<u8>>) -> Self {
        Self { network, mac: mac.into() }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mac: Vec<String> = self.mac.iter().map(|b| format!("{:02x}", b)).collect();
        write!(f, "{}:{}", self.network, mac.join(""))
    }
}

/// Who receives a notification: a device resolved through the device
/// table, or a fixed address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Recipient {
    Device(u32),
    Address(Address),
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Device(instance) => write!(f, "device {}", instance),
            Recipient::Address(address) => write!(f, "address {}", address),
        }
    }
}

/// One entry of a recipient list
///
/// Valid days are indexed Monday first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub valid_days: [bool; 7],
    pub from_time: NaiveTime,
    pub to_time: NaiveTime,
    pub recipient: Recipient,
    pub process_identifier: u32,
    pub issue_confirmed_notifications: bool,
    pub transitions: EventTransitionBits,
}

impl Destination {
    /// Every day, all day, every transition, unconfirmed
    pub fn new(recipient: Recipient, process_identifier: u32) -> Self {
        Self {
            valid_days: [true; 7],
            from_time: NaiveTime::MIN,
            to_time: NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or_default(),
            recipient,
            process_identifier,
            issue_confirmed_notifications: false,
            transitions: EventTransitionBits::all(),
        }
    }

    pub fn confirmed(mut self, confirmed: bool) -> Self {
        self.issue_confirmed_notifications = confirmed;
        self
    }

    pub fn with_transitions(mut self, transitions: EventTransitionBits) -> Self {
        self.transitions = transitions;
        self
    }

    pub fn with_window(mut self, valid_days: [bool; 7], from_time: NaiveTime, to_time: NaiveTime) -> Self {
        self.valid_days = valid_days;
        self.from_time = from_time;
        self.to_time = to_time;
        self
    }

    /// Whether a notification stamped `at` entering `to_state` goes here
    pub fn is_suitable_for_event(&self, at: DateTime<Utc>, to_state: EventState) -> bool {
        let day = at.weekday().num_days_from_monday() as usize;
        if !self.valid_days[day] {
            return false;
        }
        let time = at.time();
        if time < self.from_time || time > self.to_time {
            return false;
        }
        self.transitions.contains(to_state)
    }
}

// ============================================================================
// NOTIFICATION CLASSES
// ============================================================================

/// Priorities, ack requirements and recipients shared by reporting objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationClass {
    pub id: u32,
    /// Priority per transition bucket: to-offnormal, to-fault, to-normal
    pub priority: [u8; 3],
    pub ack_required: EventTransitionBits,
    #[serde(default)]
    pub recipient_list: Vec<Destination>,
}

impl NotificationClass {
    pub fn new(id: u32, priority: [u8; 3], ack_required: EventTransitionBits) -> Self {
        Self {
            id,
            priority,
            ack_required,
            recipient_list: Vec::new(),
        }
    }

    pub fn with_recipient(mut self, destination: Destination) -> Self {
        self.recipient_list.push(destination);
        self
    }

    pub fn priority_for(&self, to_state: EventState) -> u8 {
        self.priority[to_state.transition().index()]
    }
}

/// Lookup of notification classes by id
pub trait NotificationClassRegistry: Send + Sync {
    fn get(&self, id: u32) -> Option<Arc<NotificationClass>>;

    /// Side channel receiving every notification raised under class `id`
    fn internal_listener(&self, _id: u32) -> Option<Arc<dyn NotificationListener>> {
        None
    }
}

/// Registry kept in memory
///
/// Classes are stored behind `Arc` and replaced wholesale; readers holding
/// an older class keep a consistent recipient list.
#[derive(Default)]
pub struct InMemoryRegistry {
    classes: DashMap<u32, Arc<NotificationClass>>,
    objects: DashMap<u32, Arc<NotificationClassObject>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, class: NotificationClass) {
        debug!("Registering notification class {}", class.id);
        self.classes.insert(class.id, Arc::new(class));
    }

    /// Install a class together with its notification-class object
    pub fn insert_object(&self, class: NotificationClass) -> Arc<NotificationClassObject> {
        let object = Arc::new(NotificationClassObject::new(class.id));
        self.objects.insert(class.id, Arc::clone(&object));
        self.insert(class);
        object
    }

    /// Swap the recipient list; returns false for an unknown class
    pub fn replace_recipients(&self, id: u32, recipients: Vec<Destination>) -> bool {
        match self.classes.get_mut(&id) {
            Some(mut entry) => {
                let mut class = NotificationClass::clone(entry.value());
                class.recipient_list = recipients;
                *entry.value_mut() = Arc::new(class);
                true
            }
            None => false,
        }
    }

    pub fn object(&self, id: u32) -> Option<Arc<NotificationClassObject>> {
        self.objects.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.classes.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }
}

impl NotificationClassRegistry for InMemoryRegistry {
    fn get(&self, id: u32) -> Option<Arc<NotificationClass>> {
        self.classes.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    fn internal_listener(&self, id: u32) -> Option<Arc<dyn NotificationListener>> {
        self.object(id).map(|object| object as Arc<dyn NotificationListener>)
    }
}

impl fmt::Debug for InMemoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRegistry")
            .field("classes", &self.ids())
            .finish()
    }
}

/// Notification-class object: observes every notification of its class
#[derive(Debug)]
pub struct NotificationClassObject {
    id: u32,
    received: AtomicU64,
    last: Mutex<Option<EventNotification>>,
}

impl NotificationClassObject {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            received: AtomicU64::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn last_notification(&self) -> Option<EventNotification> {
        self.last.lock().clone()
    }
}

impl NotificationListener for NotificationClassObject {
    fn on_event(&self, notification: &EventNotification) -> Result<()> {
        self.received.fetch_add(1, Ordering::Relaxed);
        *self.last.lock() = Some(notification.clone());
        Ok(())
    }
}

// ============================================================================
// PAYLOAD
// ============================================================================

/// Event values attached to a notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationParameters {
    ChangeOfState {
        new_state: Value,
        status_flags: StatusFlags,
    },
    OutOfRange {
        exceeding_value: f64,
        status_flags: StatusFlags,
        deadband: f64,
        exceeded_limit: f64,
    },
    CommandFailure {
        command_value: Value,
        status_flags: StatusFlags,
        feedback_value: Value,
    },
    ChangeOfReliability {
        reliability: Reliability,
        status_flags: StatusFlags,
        property_values: Vec<(PropertyIdentifier, Value)>,
    },
}

/// Event notification as handed to the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNotification {
    pub process_identifier: u32,
    pub initiating_device: ObjectIdentifier,
    pub event_object: ObjectIdentifier,
    pub time_stamp: TimeStamp,
    pub notification_class: u32,
    pub priority: u8,
    pub event_type: EventType,
    pub message_text: Option<String>,
    pub notify_type: NotifyType,
    pub ack_required: Option<bool>,
    pub from_state: Option<EventState>,
    pub to_state: EventState,
    pub event_values: Option<NotificationParameters>,
}
