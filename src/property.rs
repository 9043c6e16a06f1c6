// src/property.rs - Per-object property store with after-write notifications
use crate::{error::{BacError, Result}, value::Value};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

/// Properties the engine and arbiter read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropertyIdentifier {
    ObjectIdentifier,
    ObjectName,
    PresentValue,
    StatusFlags,
    EventState,
    Reliability,
    OutOfService,
    PriorityArray,
    RelinquishDefault,
    MinimumOnTime,
    MinimumOffTime,
    NotificationClass,
    EventEnable,
    AckedTransitions,
    NotifyType,
    EventTimeStamps,
    EventMessageTexts,
    EventMessageTextsConfig,
    EventAlgorithmInhibit,
    EventAlgorithmInhibitRef,
    EventDetectionEnable,
    ReliabilityEvaluationInhibit,
    TimeDelay,
    TimeDelayNormal,
    HighLimit,
    LowLimit,
    Deadband,
    LimitEnable,
    FaultHighLimit,
    FaultLowLimit,
    AlarmValues,
    FaultValues,
    FeedbackValue,
}

impl PropertyIdentifier {
    /// Value type name a write to this property must carry, when fixed
    pub fn expected_type(&self) -> Option<&'static str> {
        use PropertyIdentifier::*;
        match self {
            OutOfService | EventAlgorithmInhibit | EventDetectionEnable | ReliabilityEvaluationInhibit => {
                Some("boolean")
            }
            Reliability => Some("reliability"),
            NotificationClass | TimeDelay | TimeDelayNormal | MinimumOnTime | MinimumOffTime => Some("unsigned"),
            EventEnable | AckedTransitions => Some("event-transition-bits"),
            NotifyType => Some("notify-type"),
            LimitEnable => Some("limit-enable"),
            HighLimit | LowLimit | Deadband | FaultHighLimit | FaultLowLimit => Some("real"),
            EventMessageTextsConfig => Some("texts"),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Callback fired after every write with `(property, old, new)`
pub type WriteListener = Arc<dyn Fn(PropertyIdentifier, Option<&Value>, &Value) + Send + Sync>;

/// Thread-safe property store for one object
///
/// Reads never block on the owning object's lock. Mutation is crate
/// private and only happens while that lock is held, so write ordering per
/// object is total.
///
/// # Examples
///
/// ```rust
/// use bacevent::{PropertyIdentifier, PropertyStore};
///
/// let store = PropertyStore::new();
/// assert!(store.get(PropertyIdentifier::PresentValue).is_none());
/// store.subscribe(std::sync::Arc::new(|pid, _old, new| println!("{} = {}", pid, new)));
/// ```
#[derive(Clone)]
pub struct PropertyStore {
    values: Arc<DashMap<PropertyIdentifier, Value>>,
    listeners: Arc<RwLock<Vec<(u64, WriteListener)>>>,
    next_listener: Arc<AtomicU64>,
}

impl PropertyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            values: Arc::new(DashMap::new()),
            listeners: Arc::new(RwLock::new(Vec::new())),
            next_listener: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Get a property value
    ///
    /// Returns `None` if the property doesn't exist.
    pub fn get(&self, pid: PropertyIdentifier) -> Option<Value> {
        self.values.get(&pid).map(|entry| entry.value().clone())
    }

    /// Typed read; `None` when missing or of another type
    pub fn get_as<T>(&self, pid: PropertyIdentifier) -> Option<T>
    where
        T: TryFrom<Value, Error = BacError>,
    {
        self.get(pid).and_then(|value| T::try_from(value).ok())
    }

    /// Typed read that reports why the value is unusable
    pub fn require<T>(&self, pid: PropertyIdentifier) -> Result<T>
    where
        T: TryFrom<Value, Error = BacError>,
    {
        let value = self.get(pid).ok_or(BacError::PropertyNotFound(pid))?;
        T::try_from(value)
    }

    /// Check if a property exists
    pub fn contains(&self, pid: PropertyIdentifier) -> bool {
        self.values.contains_key(&pid)
    }

    /// Write a value and fire after-write listeners
    ///
    /// Returns the previous value.
    pub(crate) fn write(&self, pid: PropertyIdentifier, value: Value) -> Option<Value> {
        trace!("Writing property {} = {}", pid, value);
        let old = self.values.insert(pid, value.clone());
        self.notify(pid, old.as_ref(), &value);
        old
    }

    /// Write only when the property is absent
    pub(crate) fn write_default(&self, pid: PropertyIdentifier, value: Value) {
        if !self.contains(pid) {
            self.write(pid, value);
        }
    }

    /// Subscribe to after-write notifications
    ///
    /// Listeners run on the writing thread while the owning object is
    /// locked and must not write back into the same object.
    pub fn subscribe(&self, listener: WriteListener) -> u64 {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    fn notify(&self, pid: PropertyIdentifier, old: Option<&Value>, new: &Value) {
        let listeners: Vec<WriteListener> = self.listeners.read().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(pid, old, new))).is_err() {
                error!("After-write listener panicked on {}", pid);
            }
        }
    }

    /// Get the number of properties
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Create a snapshot of all properties
    pub fn snapshot(&self) -> HashMap<PropertyIdentifier, Value> {
        self.values
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }
}

impl Default for PropertyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PropertyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyStore")
            .field("properties", &self.values.len())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}
