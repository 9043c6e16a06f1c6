// src/reporting.rs - Intrinsic reporting state machine
//
// One EventStateMachine is attached to each reporting object. It runs under
// the object lock: property writes, reliability changes, delay expiry and
// acknowledgments all enter through the object and arrive here serialized.
use crate::{
    algorithms::{AlgorithmContext, EventAlgorithm, FaultAlgorithm},
    error::{BacError, ErrorCode, Result},
    notification::{EventNotification, NotificationClass, NotificationClassRegistry, NotificationParameters},
    object::{IntrinsicReporting, ObjectContext, WriteQueue},
    property::{PropertyIdentifier, PropertyStore},
    scheduler::TimerHandle,
    summary::{AlarmSummary, EnrollmentFilter, EnrollmentSummary, EventSummary},
    types::{
        EventState, EventTransitionBits, EventType, NotifyType, ObjectIdentifier, Reliability, StatusFlags,
        TimeStamp,
    },
    value::Value,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Acknowledgment of one transition bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcknowledgeAlarmRequest {
    pub acknowledging_process_identifier: u32,
    pub event_object: ObjectIdentifier,
    pub event_state_acknowledged: EventState,
    /// Must equal the stored timestamp of the acknowledged bucket
    pub time_stamp: TimeStamp,
    pub acknowledgment_source: Option<String>,
    pub time_of_acknowledgment: TimeStamp,
}

#[derive(Debug)]
struct DelayTimer {
    to_state: EventState,
    handle: TimerHandle,
    generation: u64,
}

/// Intrinsic reporting engine for one object
#[derive(Debug)]
pub struct EventStateMachine {
    event_algorithm: Box<dyn EventAlgorithm>,
    fault_algorithm: Option<Box<dyn FaultAlgorithm>>,
    triggers: Vec<PropertyIdentifier>,
    reliability_context: Vec<PropertyIdentifier>,
    delay: Option<DelayTimer>,
    generation: u64,
}

impl EventStateMachine {
    /// Install reporting properties on `props`
    ///
    /// Fails when the notification class is not registered; nothing is
    /// written in that case.
    pub(crate) fn new(
        props: &PropertyStore,
        registry: &dyn NotificationClassRegistry,
        config: IntrinsicReporting,
    ) -> Result<Self> {
        if registry.get(config.notification_class).is_none() {
            return Err(BacError::Config(format!(
                "notification class {} does not exist",
                config.notification_class
            )));
        }

        props.write(PropertyIdentifier::NotificationClass, Value::Unsigned(config.notification_class));
        props.write(PropertyIdentifier::EventEnable, config.event_enable.into());
        props.write(PropertyIdentifier::NotifyType, config.notify_type.into());
        props.write(PropertyIdentifier::TimeDelay, Value::Unsigned(config.time_delay));
        if let Some(secs) = config.time_delay_normal {
            props.write(PropertyIdentifier::TimeDelayNormal, Value::Unsigned(secs));
        }
        props.write(
            PropertyIdentifier::EventMessageTextsConfig,
            Value::Texts(config.message_texts.unwrap_or_default()),
        );
        for (pid, value) in config.parameters {
            props.write(pid, value);
        }

        props.write_default(PropertyIdentifier::AckedTransitions, EventTransitionBits::all().into());
        props.write_default(PropertyIdentifier::EventTimeStamps, Value::TimeStamps(Default::default()));
        props.write_default(PropertyIdentifier::EventMessageTexts, Value::Texts(Default::default()));
        props.write_default(PropertyIdentifier::EventAlgorithmInhibit, Value::Boolean(false));
        props.write_default(PropertyIdentifier::EventDetectionEnable, Value::Boolean(true));
        props.write_default(PropertyIdentifier::ReliabilityEvaluationInhibit, Value::Boolean(false));
        props.write_default(PropertyIdentifier::EventState, EventState::Normal.into());
        props.write_default(PropertyIdentifier::Reliability, Reliability::NoFaultDetected.into());

        let mut triggers = config.event_algorithm.trigger_properties();
        if let Some(fault) = &config.fault_algorithm {
            triggers.extend(fault.trigger_properties());
        }
        triggers.sort();
        triggers.dedup();

        Ok(Self {
            event_algorithm: config.event_algorithm,
            fault_algorithm: config.fault_algorithm,
            triggers,
            reliability_context: config.reliability_context,
            delay: None,
            generation: 0,
        })
    }

    pub fn event_type(&self) -> EventType {
        self.event_algorithm.event_type()
    }

    pub fn triggers(&self) -> &[PropertyIdentifier] {
        &self.triggers
    }

    /// Target of the pending delay timer, if any
    pub fn pending_transition(&self) -> Option<EventState> {
        self.delay.as_ref().map(|timer| timer.to_state)
    }

    /// Evaluate the values present at construction
    pub(crate) fn initialize(&mut self, ctx: &ObjectContext, queue: &mut WriteQueue) {
        if !detection_enabled(ctx) {
            return;
        }
        let pid = self.event_algorithm.monitored_property();
        let current = ctx.props.get(pid).unwrap_or_default();
        self.on_trigger(ctx, pid, None, &current, queue);
    }

    /// Reject external writes to engine-owned properties
    pub(crate) fn validate_write(&self, pid: PropertyIdentifier) -> Result<()> {
        match pid {
            PropertyIdentifier::EventDetectionEnable
            | PropertyIdentifier::EventTimeStamps
            | PropertyIdentifier::EventMessageTexts
            | PropertyIdentifier::EventAlgorithmInhibitRef
            | PropertyIdentifier::AckedTransitions
            | PropertyIdentifier::EventState => Err(BacError::Validation(ErrorCode::WriteAccessDenied)),
            _ => Ok(()),
        }
    }

    pub(crate) fn after_write(
        &mut self,
        ctx: &ObjectContext,
        pid: PropertyIdentifier,
        old: Option<&Value>,
        new: &Value,
        queue: &mut WriteQueue,
    ) {
        if !detection_enabled(ctx) {
            return;
        }
        match pid {
            PropertyIdentifier::Reliability => self.on_reliability_write(ctx, old, new),
            PropertyIdentifier::EventAlgorithmInhibit => self.on_inhibit_write(ctx, old, new),
            _ if self.triggers.contains(&pid) => self.on_trigger(ctx, pid, old, new, queue),
            _ => {}
        }
    }

    pub(crate) fn set_event_detection_enable(&mut self, ctx: &ObjectContext, enabled: bool, queue: &mut WriteQueue) {
        let was = detection_enabled(ctx);
        ctx.props.write(PropertyIdentifier::EventDetectionEnable, Value::Boolean(enabled));
        if was == enabled {
            return;
        }
        if enabled {
            debug!("{}: event detection enabled", ctx.id());
            self.initialize(ctx, queue);
        } else {
            debug!("{}: event detection disabled", ctx.id());
            self.cancel_delay();
            // Silent reset: stamped like any transition, never reported
            if current_state(ctx) != EventState::Normal {
                ctx.props.write(PropertyIdentifier::EventState, EventState::Normal.into());
                stamp_transition(ctx, EventState::Normal);
                ctx.refresh_status_flags();
            }
        }
    }

    // ========================================================================
    // EVALUATION
    // ========================================================================

    fn on_trigger(
        &mut self,
        ctx: &ObjectContext,
        pid: PropertyIdentifier,
        old: Option<&Value>,
        new: &Value,
        queue: &mut WriteQueue,
    ) {
        let reliability = current_reliability(ctx);

        if !reliability_inhibited(ctx) {
            if let Some(fault) = &self.fault_algorithm {
                let algo_ctx = algorithm_context(ctx, pid, old, new);
                if let Some(evaluated) = fault.evaluate_fault(&algo_ctx) {
                    if evaluated != reliability {
                        debug!("{}: reliability {:?} -> {:?}", ctx.id(), reliability, evaluated);
                        queue.push_back((PropertyIdentifier::Reliability, evaluated.into()));
                        return;
                    }
                }
            }
        }

        if !reliability.is_fault() {
            self.execute_event_algorithm(ctx, pid, old, new);
        }
    }

    fn on_reliability_write(&mut self, ctx: &ObjectContext, old: Option<&Value>, new: &Value) {
        if reliability_inhibited(ctx) {
            return;
        }
        let Ok(reliability) = Reliability::try_from(new.clone()) else {
            return;
        };
        let previous = old
            .and_then(|v| Reliability::try_from(v.clone()).ok())
            .unwrap_or_default();
        let state = current_state(ctx);

        if reliability.is_fault() {
            if state != EventState::Fault || reliability != previous {
                self.do_state_transition(ctx, EventState::Fault);
            }
        } else if reliability != previous {
            self.do_state_transition(ctx, EventState::Normal);
            self.rerun_event_algorithm(ctx);
        }
    }

    fn on_inhibit_write(&mut self, ctx: &ObjectContext, old: Option<&Value>, new: &Value) {
        let inhibit = new.as_bool().unwrap_or(false);
        let was = old.and_then(Value::as_bool).unwrap_or(false);
        if inhibit == was || current_reliability(ctx).is_fault() {
            return;
        }

        if inhibit {
            self.cancel_delay();
            if current_state(ctx) != EventState::Normal {
                self.do_state_transition(ctx, EventState::Normal);
            }
        } else {
            self.rerun_event_algorithm(ctx);
        }
    }

    fn rerun_event_algorithm(&mut self, ctx: &ObjectContext) {
        let pid = self.event_algorithm.monitored_property();
        let current = ctx.props.get(pid).unwrap_or_default();
        self.execute_event_algorithm(ctx, pid, None, &current);
    }

    fn execute_event_algorithm(
        &mut self,
        ctx: &ObjectContext,
        pid: PropertyIdentifier,
        old: Option<&Value>,
        new: &Value,
    ) {
        if ctx
            .props
            .get_as::<bool>(PropertyIdentifier::EventAlgorithmInhibit)
            .unwrap_or(false)
        {
            return;
        }

        let algo_ctx = algorithm_context(ctx, pid, old, new);
        let Some(transition) = self.event_algorithm.evaluate_event(&algo_ctx) else {
            self.cancel_delay();
            return;
        };

        if transition.delay.is_zero() {
            self.do_state_transition(ctx, transition.to_state);
            return;
        }

        if let Some(timer) = &self.delay {
            if timer.to_state == transition.to_state {
                return;
            }
        }
        self.cancel_delay();

        self.generation += 1;
        let generation = self.generation;
        let handle = ctx.schedule(transition.delay, move |core, ctx, _queue| {
            if let Some(reporting) = core.reporting.as_mut() {
                reporting.delay_expired(ctx, generation);
            }
        });
        debug!(
            "{}: {} pending in {:?}",
            ctx.id(),
            transition.to_state,
            transition.delay
        );
        self.delay = Some(DelayTimer {
            to_state: transition.to_state,
            handle,
            generation,
        });
    }

    pub(crate) fn delay_expired(&mut self, ctx: &ObjectContext, generation: u64) {
        let to_state = match &self.delay {
            Some(timer) if timer.generation == generation => timer.to_state,
            _ => return,
        };
        self.delay = None;
        self.do_state_transition(ctx, to_state);
        if to_state == EventState::Normal {
            self.rerun_event_algorithm(ctx);
        }
    }

    fn cancel_delay(&mut self) {
        if let Some(timer) = self.delay.take() {
            timer.handle.cancel();
        }
    }

    // ========================================================================
    // TRANSITIONS
    // ========================================================================

    fn do_state_transition(&mut self, ctx: &ObjectContext, to_state: EventState) {
        self.cancel_delay();
        let from_state = current_state(ctx);
        let bucket = to_state.transition();
        let index = bucket.index();

        ctx.props.write(PropertyIdentifier::EventState, to_state.into());
        ctx.refresh_status_flags();

        let now = stamp_transition(ctx, to_state);

        debug!("{}: {} -> {}", ctx.id(), from_state, to_state);

        let Some(class) = self.notification_class(ctx) else {
            warn!("{}: notification class missing, transition not reported", ctx.id());
            return;
        };

        let mut acked = acked_transitions(ctx);
        acked.set(bucket, !class.ack_required.get(bucket));
        ctx.props.write(PropertyIdentifier::AckedTransitions, acked.into());

        let configured: [String; 3] = ctx
            .props
            .get_as(PropertyIdentifier::EventMessageTextsConfig)
            .unwrap_or_default();
        let mut texts: [String; 3] = ctx
            .props
            .get_as(PropertyIdentifier::EventMessageTexts)
            .unwrap_or_default();
        texts[index] = configured[index].clone();
        ctx.props.write(PropertyIdentifier::EventMessageTexts, Value::Texts(texts));
        let message_text = (!configured[index].is_empty()).then(|| configured[index].clone());

        if !event_enable(ctx).get(bucket) {
            return;
        }

        let (event_type, event_values) = if from_state == EventState::Fault || to_state == EventState::Fault {
            let property_values = self
                .reliability_context
                .iter()
                .filter_map(|pid| ctx.props.get(*pid).map(|value| (*pid, value)))
                .collect();
            (
                EventType::ChangeOfReliability,
                Some(NotificationParameters::ChangeOfReliability {
                    reliability: current_reliability(ctx),
                    status_flags: status_flags(ctx),
                    property_values,
                }),
            )
        } else {
            let pid = self.event_algorithm.monitored_property();
            let current = ctx.props.get(pid).unwrap_or_default();
            let algo_ctx = algorithm_context(ctx, pid, None, &current);
            (
                self.event_algorithm.event_type(),
                self.event_algorithm.event_values(&algo_ctx, from_state, to_state),
            )
        };

        let notification = EventNotification {
            process_identifier: 0,
            initiating_device: ctx.device(),
            event_object: ctx.id(),
            time_stamp: now.into(),
            notification_class: class.id,
            priority: class.priority[index],
            event_type,
            message_text,
            notify_type: notify_type(ctx),
            ack_required: Some(class.ack_required.get(bucket)),
            from_state: Some(from_state),
            to_state,
            event_values,
        };
        self.dispatch(ctx, class, notification);
    }

    fn dispatch(&self, ctx: &ObjectContext, class: Arc<NotificationClass>, notification: EventNotification) {
        let internal = ctx.registry().internal_listener(class.id);
        if let Err(e) = ctx.dispatcher().dispatch(class, notification, internal) {
            warn!("{}: notification not queued: {}", ctx.id(), e);
        }
    }

    fn notification_class(&self, ctx: &ObjectContext) -> Option<Arc<NotificationClass>> {
        let id = ctx.props.get_as::<u32>(PropertyIdentifier::NotificationClass)?;
        ctx.registry().get(id)
    }

    // ========================================================================
    // ACKNOWLEDGMENT
    // ========================================================================

    pub(crate) fn acknowledge(&mut self, ctx: &ObjectContext, request: &AcknowledgeAlarmRequest) -> Result<()> {
        let bucket = request.event_state_acknowledged.transition();
        let index = bucket.index();
        let stamps: [TimeStamp; 3] = ctx
            .props
            .get_as(PropertyIdentifier::EventTimeStamps)
            .unwrap_or_default();
        if stamps[index] != request.time_stamp {
            return Err(BacError::Protocol(ErrorCode::InvalidTimeStamp));
        }

        let mut acked = acked_transitions(ctx);
        if acked.get(bucket) {
            return Ok(());
        }
        acked.set(bucket, true);
        ctx.props.write(PropertyIdentifier::AckedTransitions, acked.into());
        debug!(
            "{}: {:?} acknowledged by process {}",
            ctx.id(),
            bucket,
            request.acknowledging_process_identifier
        );

        if !event_enable(ctx).get(bucket) {
            return Ok(());
        }
        let Some(class) = self.notification_class(ctx) else {
            return Ok(());
        };

        let message_text = match &request.acknowledgment_source {
            Some(source) => format!("{}: {}", request.acknowledging_process_identifier, source),
            None => request.acknowledging_process_identifier.to_string(),
        };
        let notification = EventNotification {
            process_identifier: 0,
            initiating_device: ctx.device(),
            event_object: ctx.id(),
            time_stamp: request.time_of_acknowledgment,
            notification_class: class.id,
            priority: class.priority[index],
            event_type: self.event_algorithm.event_type(),
            message_text: Some(message_text),
            notify_type: NotifyType::AckNotification,
            ack_required: None,
            from_state: None,
            to_state: request.event_state_acknowledged,
            event_values: None,
        };
        self.dispatch(ctx, class, notification);
        Ok(())
    }

    // ========================================================================
    // SUMMARIES
    // ========================================================================

    pub(crate) fn alarm_summary(&self, ctx: &ObjectContext) -> Option<AlarmSummary> {
        if !detection_enabled(ctx) {
            return None;
        }
        let state = current_state(ctx);
        if state == EventState::Normal || notify_type(ctx) != NotifyType::Alarm {
            return None;
        }
        Some(AlarmSummary {
            object_identifier: ctx.id(),
            alarm_state: state,
            acknowledged_transitions: acked_transitions(ctx),
        })
    }

    pub(crate) fn event_summary(&self, ctx: &ObjectContext) -> Option<EventSummary> {
        if !detection_enabled(ctx) {
            return None;
        }
        let state = current_state(ctx);
        let acked = acked_transitions(ctx);
        if state == EventState::Normal && acked.all_true() {
            return None;
        }
        let priorities = self
            .notification_class(ctx)
            .map(|class| class.priority)
            .unwrap_or_default();
        Some(EventSummary {
            object_identifier: ctx.id(),
            event_state: state,
            acknowledged_transitions: acked,
            event_time_stamps: ctx
                .props
                .get_as(PropertyIdentifier::EventTimeStamps)
                .unwrap_or_default(),
            notify_type: notify_type(ctx),
            event_enable: event_enable(ctx),
            event_priorities: priorities,
        })
    }

    pub(crate) fn enrollment_summary(&self, ctx: &ObjectContext, filter: &EnrollmentFilter) -> Option<EnrollmentSummary> {
        if !detection_enabled(ctx) {
            return None;
        }
        let class = self.notification_class(ctx)?;
        let state = current_state(ctx);
        let summary = EnrollmentSummary {
            object_identifier: ctx.id(),
            event_type: self.event_algorithm.event_type(),
            event_state: state,
            priority: class.priority_for(state),
            notification_class: class.id,
        };
        filter
            .matches(&summary, acked_transitions(ctx), &class)
            .then_some(summary)
    }
}

// ============================================================================
// PROPERTY HELPERS
// ============================================================================

fn algorithm_context<'a>(
    ctx: &'a ObjectContext,
    pid: PropertyIdentifier,
    old: Option<&'a Value>,
    new: &'a Value,
) -> AlgorithmContext<'a> {
    AlgorithmContext {
        props: &ctx.props,
        event_state: current_state(ctx),
        reliability: current_reliability(ctx),
        property: pid,
        old,
        new,
    }
}

/// Record the current time in the bucket of `to_state`
fn stamp_transition(ctx: &ObjectContext, to_state: EventState) -> DateTime<Utc> {
    let now = ctx.now();
    let mut stamps: [TimeStamp; 3] = ctx
        .props
        .get_as(PropertyIdentifier::EventTimeStamps)
        .unwrap_or_default();
    stamps[to_state.transition().index()] = now.into();
    ctx.props.write(PropertyIdentifier::EventTimeStamps, Value::TimeStamps(stamps));
    now
}

fn current_state(ctx: &ObjectContext) -> EventState {
    ctx.props.get_as(PropertyIdentifier::EventState).unwrap_or_default()
}

fn current_reliability(ctx: &ObjectContext) -> Reliability {
    ctx.props.get_as(PropertyIdentifier::Reliability).unwrap_or_default()
}

fn reliability_inhibited(ctx: &ObjectContext) -> bool {
    ctx.props
        .get_as(PropertyIdentifier::ReliabilityEvaluationInhibit)
        .unwrap_or(false)
}

fn detection_enabled(ctx: &ObjectContext) -> bool {
    ctx.props
        .get_as(PropertyIdentifier::EventDetectionEnable)
        .unwrap_or(true)
}

fn acked_transitions(ctx: &ObjectContext) -> EventTransitionBits {
    ctx.props
        .get_as(PropertyIdentifier::AckedTransitions)
        .unwrap_or_else(EventTransitionBits::all)
}

fn event_enable(ctx: &ObjectContext) -> EventTransitionBits {
    ctx.props
        .get_as(PropertyIdentifier::EventEnable)
        .unwrap_or_else(EventTransitionBits::all)
}

fn notify_type(ctx: &ObjectContext) -> NotifyType {
    ctx.props.get_as(PropertyIdentifier::NotifyType).unwrap_or_default()
}

fn status_flags(ctx: &ObjectContext) -> StatusFlags {
    ctx.props.get_as(PropertyIdentifier::StatusFlags).unwrap_or_default()
}
