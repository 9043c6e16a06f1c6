// src/object.rs - Monitored objects: property store, arbiter and reporting under one lock
use crate::{
    algorithms::{ChangeOfState, CommandFailure, EventAlgorithm, FaultAlgorithm, FaultLimits, OutOfRange},
    dispatcher::NotificationDispatcher,
    error::{BacError, ErrorCode, Result},
    notification::NotificationClassRegistry,
    priority::{PriorityArbiter, PriorityArray},
    property::{PropertyIdentifier, PropertyStore},
    reporting::{AcknowledgeAlarmRequest, EventStateMachine},
    scheduler::{Clock, Scheduler, TimerHandle},
    summary::{AlarmSummary, EnrollmentFilter, EnrollmentSummary, EventSummary},
    types::{
        EventState, EventTransitionBits, LimitEnable, NotifyType, ObjectIdentifier, Reliability, StatusFlags,
    },
    value::Value,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

/// Writes waiting to be applied under the object lock
///
/// Hooks push derived writes here instead of writing recursively; the
/// object drains the queue in order until it is empty.
pub(crate) type WriteQueue = VecDeque<(PropertyIdentifier, Value)>;

// ============================================================================
// SERVICES AND CONTEXT
// ============================================================================

/// Shared collaborators every object of a device uses
#[derive(Clone)]
pub struct ObjectServices {
    pub device: ObjectIdentifier,
    pub clock: Arc<dyn Clock>,
    pub scheduler: Arc<dyn Scheduler>,
    pub registry: Arc<dyn NotificationClassRegistry>,
    pub dispatcher: NotificationDispatcher,
}

impl fmt::Debug for ObjectServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectServices")
            .field("device", &self.device)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

/// Everything a hook may touch besides the mutable core
pub struct ObjectContext {
    id: ObjectIdentifier,
    pub(crate) props: PropertyStore,
    services: ObjectServices,
    overridden: AtomicBool,
    this: Weak<ObjectShared>,
}

impl ObjectContext {
    pub fn id(&self) -> ObjectIdentifier {
        self.id
    }

    pub fn device(&self) -> ObjectIdentifier {
        self.services.device
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.services.clock.now()
    }

    pub fn is_overridden(&self) -> bool {
        self.overridden.load(Ordering::SeqCst)
    }

    pub(crate) fn registry(&self) -> &dyn NotificationClassRegistry {
        self.services.registry.as_ref()
    }

    pub(crate) fn dispatcher(&self) -> &NotificationDispatcher {
        &self.services.dispatcher
    }

    /// Run `task` under the object lock after `delay`
    ///
    /// The timer holds only a weak reference; a dropped object never runs
    /// its pending tasks. Writes the task queues are applied before the
    /// lock is released.
    pub(crate) fn schedule<F>(&self, delay: Duration, task: F) -> TimerHandle
    where
        F: FnOnce(&mut ObjectCore, &ObjectContext, &mut WriteQueue) + Send + 'static,
    {
        let weak = self.this.clone();
        self.services.scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    let mut core = shared.core.lock();
                    let mut queue = WriteQueue::new();
                    task(&mut *core, &shared.ctx, &mut queue);
                    core.apply(&shared.ctx, &mut queue);
                }
            }),
        )
    }

    /// Re-derive status flags; writes only on change
    pub(crate) fn refresh_status_flags(&self) {
        let state: EventState = self.props.get_as(PropertyIdentifier::EventState).unwrap_or_default();
        let reliability: Reliability = self.props.get_as(PropertyIdentifier::Reliability).unwrap_or_default();
        let out_of_service = self.props.get_as(PropertyIdentifier::OutOfService).unwrap_or(false);
        let flags = StatusFlags::new(
            state != EventState::Normal,
            reliability.is_fault(),
            self.is_overridden(),
            out_of_service,
        );
        if self.props.get_as::<StatusFlags>(PropertyIdentifier::StatusFlags) != Some(flags) {
            self.props.write(PropertyIdentifier::StatusFlags, flags.into());
        }
    }
}

/// Mutable state guarded by the object lock
#[derive(Debug, Default)]
pub(crate) struct ObjectCore {
    pub(crate) arbiter: Option<PriorityArbiter>,
    pub(crate) reporting: Option<EventStateMachine>,
}

impl ObjectCore {
    pub(crate) fn apply(&mut self, ctx: &ObjectContext, queue: &mut WriteQueue) {
        while let Some((pid, value)) = queue.pop_front() {
            let old = ctx.props.write(pid, value.clone());
            if let Some(arbiter) = self.arbiter.as_mut() {
                arbiter.after_write(ctx, pid, queue);
            }
            if let Some(reporting) = self.reporting.as_mut() {
                reporting.after_write(ctx, pid, old.as_ref(), &value, queue);
            }
            if matches!(pid, PropertyIdentifier::Reliability | PropertyIdentifier::OutOfService) {
                ctx.refresh_status_flags();
            }
        }
    }
}

pub(crate) struct ObjectShared {
    ctx: ObjectContext,
    core: Mutex<ObjectCore>,
}

// ============================================================================
// MONITORED OBJECT
// ============================================================================

/// A point with optional command prioritization and intrinsic reporting
///
/// Clones share the same object. Every mutating entry point takes the
/// object lock; reads go straight to the property store.
///
/// # Examples
///
/// ```rust,ignore
/// use bacevent::{IntrinsicReporting, AnalogLimits, MonitoredObject, ObjectIdentifier, ObjectType, Value};
///
/// let object = MonitoredObject::builder(ObjectIdentifier::new(ObjectType::AnalogInput, 1), "ai-1", Value::Real(50.0))
///     .intrinsic_reporting(IntrinsicReporting::out_of_range(17, AnalogLimits::new(20.0, 100.0, 5.0)).time_delay(1))
///     .build(services)?;
///
/// object.update(PropertyIdentifier::PresentValue, Value::Real(110.0))?;
/// ```
#[derive(Clone)]
pub struct MonitoredObject {
    shared: Arc<ObjectShared>,
}

impl MonitoredObject {
    pub fn builder(id: ObjectIdentifier, name: impl Into<String>, present_value: Value) -> MonitoredObjectBuilder {
        MonitoredObjectBuilder {
            id,
            name: name.into(),
            present_value,
            relinquish_default: None,
            minimum_on_off: None,
            reporting: None,
            out_of_service: false,
            properties: Vec::new(),
        }
    }

    pub fn id(&self) -> ObjectIdentifier {
        self.shared.ctx.id
    }

    /// Read access to the property store and its write listeners
    ///
    /// ```compile_fail
    /// use bacevent::{EventState, MonitoredObject, PropertyIdentifier};
    ///
    /// fn force(object: &MonitoredObject) {
    ///     object.properties().write(PropertyIdentifier::EventState, EventState::HighLimit.into());
    /// }
    /// ```
    pub fn properties(&self) -> &PropertyStore {
        &self.shared.ctx.props
    }

    pub fn get(&self, pid: PropertyIdentifier) -> Option<Value> {
        self.shared.ctx.props.get(pid)
    }

    pub fn present_value(&self) -> Option<Value> {
        self.get(PropertyIdentifier::PresentValue)
    }

    pub fn event_state(&self) -> EventState {
        self.shared
            .ctx
            .props
            .get_as(PropertyIdentifier::EventState)
            .unwrap_or_default()
    }

    pub fn reliability(&self) -> Reliability {
        self.shared
            .ctx
            .props
            .get_as(PropertyIdentifier::Reliability)
            .unwrap_or_default()
    }

    pub fn status_flags(&self) -> StatusFlags {
        self.shared
            .ctx
            .props
            .get_as(PropertyIdentifier::StatusFlags)
            .unwrap_or_default()
    }

    pub fn is_commandable(&self) -> bool {
        self.shared.core.lock().arbiter.is_some()
    }

    pub fn priority_array(&self) -> Option<PriorityArray> {
        self.shared
            .core
            .lock()
            .arbiter
            .as_ref()
            .map(|arbiter| arbiter.array().clone())
    }

    pub fn lockout_active(&self) -> bool {
        self.shared
            .core
            .lock()
            .arbiter
            .as_ref()
            .map_or(false, PriorityArbiter::lockout_active)
    }

    /// Target state of a pending delayed transition
    pub fn pending_transition(&self) -> Option<EventState> {
        self.shared
            .core
            .lock()
            .reporting
            .as_ref()
            .and_then(EventStateMachine::pending_transition)
    }

    /// External write, as issued by a remote client
    ///
    /// `priority` applies to commandable present value writes only.
    pub fn write_property(&self, pid: PropertyIdentifier, value: Value, priority: Option<u8>) -> Result<()> {
        let ctx = &self.shared.ctx;
        let mut core = self.shared.core.lock();
        let mut queue = WriteQueue::new();

        match pid {
            PropertyIdentifier::PresentValue => {
                if let Some(arbiter) = core.arbiter.as_mut() {
                    arbiter.command(ctx, priority, value, &mut queue)?;
                } else if ctx.props.get_as(PropertyIdentifier::OutOfService).unwrap_or(false) {
                    queue.push_back((pid, value));
                } else {
                    return Err(BacError::Validation(ErrorCode::WriteAccessDenied));
                }
            }
            PropertyIdentifier::ObjectIdentifier
            | PropertyIdentifier::PriorityArray
            | PropertyIdentifier::StatusFlags => {
                return Err(BacError::Validation(ErrorCode::WriteAccessDenied));
            }
            _ => {
                if let Some(reporting) = core.reporting.as_ref() {
                    reporting.validate_write(pid)?;
                }
                if let Some(expected) = pid.expected_type() {
                    if value.type_name() != expected {
                        return Err(BacError::Validation(ErrorCode::InvalidDataType));
                    }
                }
                queue.push_back((pid, value));
            }
        }

        core.apply(ctx, &mut queue);
        Ok(())
    }

    /// Local write from the object's own process side, e.g. a new sensor
    /// reading; skips write validation but runs every hook
    ///
    /// The present value of a commandable object is owned by its priority
    /// array and only changes through [`write_property`](Self::write_property).
    pub fn update(&self, pid: PropertyIdentifier, value: Value) -> Result<()> {
        let mut core = self.shared.core.lock();
        if pid == PropertyIdentifier::PresentValue && core.arbiter.is_some() {
            return Err(BacError::Validation(ErrorCode::WriteAccessDenied));
        }
        let mut queue = WriteQueue::from([(pid, value)]);
        core.apply(&self.shared.ctx, &mut queue);
        Ok(())
    }

    pub fn set_overridden(&self, overridden: bool) {
        let _core = self.shared.core.lock();
        self.shared.ctx.overridden.store(overridden, Ordering::SeqCst);
        self.shared.ctx.refresh_status_flags();
    }

    pub fn set_event_detection_enable(&self, enabled: bool) {
        let ctx = &self.shared.ctx;
        let mut core = self.shared.core.lock();
        let mut queue = WriteQueue::new();
        if let Some(reporting) = core.reporting.as_mut() {
            reporting.set_event_detection_enable(ctx, enabled, &mut queue);
        }
        core.apply(ctx, &mut queue);
    }

    pub fn acknowledge(&self, request: &AcknowledgeAlarmRequest) -> Result<()> {
        let ctx = &self.shared.ctx;
        let mut core = self.shared.core.lock();
        match core.reporting.as_mut() {
            Some(reporting) => reporting.acknowledge(ctx, request),
            None => Err(BacError::Protocol(ErrorCode::UnknownProperty)),
        }
    }

    pub fn alarm_summary(&self) -> Option<AlarmSummary> {
        let core = self.shared.core.lock();
        core.reporting.as_ref()?.alarm_summary(&self.shared.ctx)
    }

    pub fn event_summary(&self) -> Option<EventSummary> {
        let core = self.shared.core.lock();
        core.reporting.as_ref()?.event_summary(&self.shared.ctx)
    }

    pub fn enrollment_summary(&self, filter: &EnrollmentFilter) -> Option<EnrollmentSummary> {
        let core = self.shared.core.lock();
        core.reporting.as_ref()?.enrollment_summary(&self.shared.ctx, filter)
    }
}

impl fmt::Debug for MonitoredObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoredObject")
            .field("id", &self.shared.ctx.id)
            .field("event_state", &self.event_state())
            .field("present_value", &self.present_value())
            .finish()
    }
}

// ============================================================================
// BUILDERS
// ============================================================================

pub struct MonitoredObjectBuilder {
    id: ObjectIdentifier,
    name: String,
    present_value: Value,
    relinquish_default: Option<Value>,
    minimum_on_off: Option<(u32, u32)>,
    reporting: Option<IntrinsicReporting>,
    out_of_service: bool,
    properties: Vec<(PropertyIdentifier, Value)>,
}

impl MonitoredObjectBuilder {
    /// Make the present value commandable through a priority array
    pub fn commandable(mut self, relinquish_default: Value) -> Self {
        self.relinquish_default = Some(relinquish_default);
        self
    }

    /// Minimum on and off times in seconds
    pub fn minimum_on_off(mut self, on: u32, off: u32) -> Self {
        self.minimum_on_off = Some((on, off));
        self
    }

    pub fn intrinsic_reporting(mut self, reporting: IntrinsicReporting) -> Self {
        self.reporting = Some(reporting);
        self
    }

    pub fn out_of_service(mut self) -> Self {
        self.out_of_service = true;
        self
    }

    pub fn property(mut self, pid: PropertyIdentifier, value: Value) -> Self {
        self.properties.push((pid, value));
        self
    }

    pub fn build(self, services: ObjectServices) -> Result<MonitoredObject> {
        let props = PropertyStore::new();
        props.write(PropertyIdentifier::ObjectIdentifier, Value::ObjectId(self.id));
        props.write(PropertyIdentifier::ObjectName, Value::CharacterString(self.name));
        props.write(PropertyIdentifier::OutOfService, Value::Boolean(self.out_of_service));
        props.write(PropertyIdentifier::EventState, EventState::Normal.into());
        props.write(PropertyIdentifier::Reliability, Reliability::NoFaultDetected.into());

        let arbiter = match self.relinquish_default {
            Some(relinquish) => {
                props.write(PropertyIdentifier::PresentValue, relinquish.clone());
                props.write(PropertyIdentifier::RelinquishDefault, relinquish);
                if let Some((on, off)) = self.minimum_on_off {
                    props.write(PropertyIdentifier::MinimumOnTime, Value::Unsigned(on));
                    props.write(PropertyIdentifier::MinimumOffTime, Value::Unsigned(off));
                }
                Some(PriorityArbiter::new())
            }
            None => {
                props.write(PropertyIdentifier::PresentValue, self.present_value);
                None
            }
        };
        for (pid, value) in self.properties {
            props.write(pid, value);
        }

        let reporting = match self.reporting {
            Some(config) => Some(EventStateMachine::new(&props, services.registry.as_ref(), config)?),
            None => None,
        };

        let shared = Arc::new_cyclic(|this| ObjectShared {
            ctx: ObjectContext {
                id: self.id,
                props,
                services,
                overridden: AtomicBool::new(false),
                this: this.clone(),
            },
            core: Mutex::new(ObjectCore { arbiter, reporting }),
        });

        {
            let ctx = &shared.ctx;
            let mut core = shared.core.lock();
            let mut queue = WriteQueue::new();
            ctx.refresh_status_flags();
            if let Some(arbiter) = core.arbiter.as_mut() {
                arbiter.initialize(ctx, &mut queue);
            }
            core.apply(ctx, &mut queue);
            if let Some(reporting) = core.reporting.as_mut() {
                reporting.initialize(ctx, &mut queue);
            }
            core.apply(ctx, &mut queue);
        }

        debug!("Created object {}", self.id);
        Ok(MonitoredObject { shared })
    }
}

/// Analog limits for out-of-range supervision
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalogLimits {
    pub low_limit: f32,
    pub high_limit: f32,
    pub deadband: f32,
    pub limit_enable: LimitEnable,
    pub fault_low_limit: Option<f32>,
    pub fault_high_limit: Option<f32>,
}

impl AnalogLimits {
    pub fn new(low_limit: f32, high_limit: f32, deadband: f32) -> Self {
        Self {
            low_limit,
            high_limit,
            deadband,
            limit_enable: LimitEnable::default(),
            fault_low_limit: None,
            fault_high_limit: None,
        }
    }

    pub fn with_fault_limits(mut self, low: f32, high: f32) -> Self {
        self.fault_low_limit = Some(low);
        self.fault_high_limit = Some(high);
        self
    }
}

/// Intrinsic reporting configuration for one object
pub struct IntrinsicReporting {
    pub(crate) notification_class: u32,
    pub(crate) event_algorithm: Box<dyn EventAlgorithm>,
    pub(crate) fault_algorithm: Option<Box<dyn FaultAlgorithm>>,
    pub(crate) event_enable: EventTransitionBits,
    pub(crate) notify_type: NotifyType,
    pub(crate) time_delay: u32,
    pub(crate) time_delay_normal: Option<u32>,
    pub(crate) message_texts: Option<[String; 3]>,
    pub(crate) parameters: Vec<(PropertyIdentifier, Value)>,
    pub(crate) reliability_context: Vec<PropertyIdentifier>,
}

impl IntrinsicReporting {
    pub fn new(notification_class: u32, event_algorithm: Box<dyn EventAlgorithm>) -> Self {
        Self {
            notification_class,
            event_algorithm,
            fault_algorithm: None,
            event_enable: EventTransitionBits::all(),
            notify_type: NotifyType::Alarm,
            time_delay: 0,
            time_delay_normal: None,
            message_texts: None,
            parameters: Vec::new(),
            reliability_context: vec![PropertyIdentifier::PresentValue],
        }
    }

    /// Out-of-range detection, with fault limits when both are given
    pub fn out_of_range(notification_class: u32, limits: AnalogLimits) -> Self {
        let mut reporting = Self::new(notification_class, Box::new(OutOfRange))
            .parameter(PropertyIdentifier::HighLimit, Value::Real(limits.high_limit))
            .parameter(PropertyIdentifier::LowLimit, Value::Real(limits.low_limit))
            .parameter(PropertyIdentifier::Deadband, Value::Real(limits.deadband))
            .parameter(PropertyIdentifier::LimitEnable, limits.limit_enable.into());
        if let (Some(low), Some(high)) = (limits.fault_low_limit, limits.fault_high_limit) {
            reporting = reporting
                .fault_algorithm(Box::new(FaultLimits))
                .parameter(PropertyIdentifier::FaultLowLimit, Value::Real(low))
                .parameter(PropertyIdentifier::FaultHighLimit, Value::Real(high));
        }
        reporting
    }

    pub fn change_of_state(notification_class: u32, alarm_values: Vec<Value>) -> Self {
        Self::new(notification_class, Box::new(ChangeOfState))
            .parameter(PropertyIdentifier::AlarmValues, Value::List(alarm_values))
    }

    pub fn command_failure(notification_class: u32) -> Self {
        Self::new(notification_class, Box::new(CommandFailure))
    }

    pub fn fault_algorithm(mut self, algorithm: Box<dyn FaultAlgorithm>) -> Self {
        self.fault_algorithm = Some(algorithm);
        self
    }

    /// Seconds a condition must persist before an off-normal transition
    pub fn time_delay(mut self, secs: u32) -> Self {
        self.time_delay = secs;
        self
    }

    pub fn time_delay_normal(mut self, secs: u32) -> Self {
        self.time_delay_normal = Some(secs);
        self
    }

    pub fn event_enable(mut self, bits: EventTransitionBits) -> Self {
        self.event_enable = bits;
        self
    }

    pub fn notify_type(mut self, notify_type: NotifyType) -> Self {
        self.notify_type = notify_type;
        self
    }

    pub fn message_texts(mut self, texts: [String; 3]) -> Self {
        self.message_texts = Some(texts);
        self
    }

    pub fn parameter(mut self, pid: PropertyIdentifier, value: Value) -> Self {
        self.parameters.push((pid, value));
        self
    }

    /// Properties reported with change-of-reliability notifications;
    /// present value only unless replaced
    pub fn reliability_context(mut self, pids: Vec<PropertyIdentifier>) -> Self {
        self.reliability_context = pids;
        self
    }
}

impl fmt::Debug for IntrinsicReporting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntrinsicReporting")
            .field("notification_class", &self.notification_class)
            .field("event_algorithm", &self.event_algorithm)
            .field("fault_algorithm", &self.fault_algorithm)
            .field("time_delay", &self.time_delay)
            .finish()
    }
}
