// src/priority.rs - Command prioritization for commandable objects
use crate::{
    error::{BacError, ErrorCode, Result},
    object::{ObjectContext, WriteQueue},
    property::PropertyIdentifier,
    scheduler::TimerHandle,
    value::Value,
};
use std::time::Duration;
use tracing::debug;

/// Number of command priorities
pub const PRIORITY_LEVELS: u8 = 16;

/// Slot reserved for minimum on/off lockout
pub const MINIMUM_ON_OFF_PRIORITY: u8 = 6;

/// Priority used when a write names none
pub const DEFAULT_PRIORITY: u8 = 16;

/// Sixteen command slots, priority 1 highest
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriorityArray {
    slots: [Option<Value>; PRIORITY_LEVELS as usize],
}

impl PriorityArray {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(priority: u8) -> Option<usize> {
        (1..=PRIORITY_LEVELS)
            .contains(&priority)
            .then(|| usize::from(priority - 1))
    }

    pub fn get(&self, priority: u8) -> Option<&Value> {
        Self::index(priority).and_then(|i| self.slots[i].as_ref())
    }

    /// Set or clear a slot; out-of-range priorities are ignored
    pub fn set(&mut self, priority: u8, value: Option<Value>) {
        if let Some(i) = Self::index(priority) {
            self.slots[i] = value;
        }
    }

    /// Highest priority command and its level
    pub fn active(&self) -> Option<(u8, &Value)> {
        self.slots
            .iter()
            .enumerate()
            .find_map(|(i, slot)| slot.as_ref().map(|v| (i as u8 + 1, v)))
    }

    /// Value in the lowest-indexed non-empty slot
    pub fn effective(&self) -> Option<&Value> {
        self.active().map(|(_, v)| v)
    }

    pub fn to_value(&self) -> Value {
        Value::List(
            self.slots
                .iter()
                .map(|slot| slot.clone().unwrap_or(Value::Null))
                .collect(),
        )
    }
}

#[derive(Debug)]
struct LockoutTimer {
    handle: TimerHandle,
    generation: u64,
}

/// Priority array plus minimum on/off lockout for one object
///
/// Every method runs under the owning object's lock. Derived writes
/// (priority array, present value) are pushed to the write queue so the
/// reporting engine observes them like any other write.
#[derive(Debug)]
pub struct PriorityArbiter {
    array: PriorityArray,
    lockout: Option<LockoutTimer>,
    generation: u64,
}

impl PriorityArbiter {
    pub fn new() -> Self {
        Self {
            array: PriorityArray::new(),
            lockout: None,
            generation: 0,
        }
    }

    pub fn array(&self) -> &PriorityArray {
        &self.array
    }

    pub fn lockout_active(&self) -> bool {
        self.lockout.is_some()
    }

    /// Publish the empty array and derive the initial present value
    pub(crate) fn initialize(&mut self, ctx: &ObjectContext, queue: &mut WriteQueue) {
        self.update_present_value(ctx, queue);
    }

    /// Write a command, or relinquish it with [`Value::Null`]
    ///
    /// Rejected writes leave the array untouched.
    pub(crate) fn command(
        &mut self,
        ctx: &ObjectContext,
        priority: Option<u8>,
        value: Value,
        queue: &mut WriteQueue,
    ) -> Result<()> {
        let priority = priority.unwrap_or(DEFAULT_PRIORITY);
        if !(1..=PRIORITY_LEVELS).contains(&priority) {
            return Err(BacError::Validation(ErrorCode::InvalidArrayIndex));
        }
        if priority == MINIMUM_ON_OFF_PRIORITY || ctx.is_overridden() {
            return Err(BacError::Validation(ErrorCode::WriteAccessDenied));
        }

        if priority < MINIMUM_ON_OFF_PRIORITY && !value.is_null() && self.lockout.is_some() {
            let present = ctx.props.get(PropertyIdentifier::PresentValue);
            if present.as_ref() != Some(&value) {
                debug!("{}: priority {} overrides minimum on/off lockout", ctx.id(), priority);
                self.cancel_lockout();
                self.array.set(MINIMUM_ON_OFF_PRIORITY, None);
            }
        }

        let slot = if value.is_null() { None } else { Some(value) };
        self.array.set(priority, slot);
        self.update_present_value(ctx, queue);
        Ok(())
    }

    /// Recompute when a property feeding the present value changes
    pub(crate) fn after_write(&mut self, ctx: &ObjectContext, pid: PropertyIdentifier, queue: &mut WriteQueue) {
        match pid {
            PropertyIdentifier::RelinquishDefault
            | PropertyIdentifier::MinimumOnTime
            | PropertyIdentifier::MinimumOffTime => self.update_present_value(ctx, queue),
            _ => {}
        }
    }

    pub(crate) fn lockout_expired(&mut self, ctx: &ObjectContext, generation: u64, queue: &mut WriteQueue) {
        match &self.lockout {
            Some(timer) if timer.generation == generation => {
                debug!("{}: minimum on/off lockout expired", ctx.id());
                self.lockout = None;
                self.array.set(MINIMUM_ON_OFF_PRIORITY, None);
                self.update_present_value(ctx, queue);
            }
            _ => {}
        }
    }

    fn cancel_lockout(&mut self) {
        if let Some(timer) = self.lockout.take() {
            timer.handle.cancel();
        }
    }

    fn minimum_times(ctx: &ObjectContext) -> Option<(u32, u32)> {
        let on = ctx.props.get_as::<u32>(PropertyIdentifier::MinimumOnTime)?;
        let off = ctx.props.get_as::<u32>(PropertyIdentifier::MinimumOffTime)?;
        Some((on, off))
    }

    fn update_present_value(&mut self, ctx: &ObjectContext, queue: &mut WriteQueue) {
        let new = match self.array.effective() {
            Some(value) => value.clone(),
            None => ctx
                .props
                .get(PropertyIdentifier::RelinquishDefault)
                .unwrap_or(Value::Null),
        };
        let present = ctx.props.get(PropertyIdentifier::PresentValue);
        let changed = present.as_ref() != Some(&new);

        if changed && self.lockout.is_none() {
            if let Some((on, off)) = Self::minimum_times(ctx) {
                let secs = if new.is_inactive() { off } else { on };
                self.array.set(MINIMUM_ON_OFF_PRIORITY, Some(new.clone()));
                self.generation += 1;
                let generation = self.generation;
                let handle = ctx.schedule(Duration::from_secs(u64::from(secs)), move |core, ctx, queue| {
                    if let Some(arbiter) = core.arbiter.as_mut() {
                        arbiter.lockout_expired(ctx, generation, queue);
                    }
                });
                debug!("{}: minimum on/off lockout for {}s holding {}", ctx.id(), secs, new);
                self.lockout = Some(LockoutTimer { handle, generation });
            }
        }

        queue.push_back((PropertyIdentifier::PriorityArray, self.array.to_value()));
        if changed {
            queue.push_back((PropertyIdentifier::PresentValue, new));
        }
    }
}

impl Default for PriorityArbiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_is_lowest_index() {
        let mut array = PriorityArray::new();
        assert_eq!(array.effective(), None);

        array.set(10, Some(Value::Real(10.0)));
        array.set(3, Some(Value::Real(3.0)));
        assert_eq!(array.active(), Some((3, &Value::Real(3.0))));

        array.set(3, None);
        assert_eq!(array.effective(), Some(&Value::Real(10.0)));
    }

    #[test]
    fn test_out_of_range_slots_ignored() {
        let mut array = PriorityArray::new();
        array.set(0, Some(Value::Real(1.0)));
        array.set(17, Some(Value::Real(1.0)));
        assert_eq!(array, PriorityArray::new());
        assert_eq!(array.get(0), None);
    }

    #[test]
    fn test_array_value_has_sixteen_slots() {
        let mut array = PriorityArray::new();
        array.set(16, Some(Value::Unsigned(2)));
        match array.to_value() {
            Value::List(items) => {
                assert_eq!(items.len(), 16);
                assert!(items[..15].iter().all(Value::is_null));
                assert_eq!(items[15], Value::Unsigned(2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
