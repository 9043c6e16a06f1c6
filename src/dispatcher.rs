// src/dispatcher.rs - Background notification delivery
use crate::{
    error::{BacError, Result},
    notification::{Address, EventNotification, NotificationClass, Recipient},
};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace, warn};

// ============================================================================
// COLLABORATORS
// ============================================================================

/// Outbound half of the network stack
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    fn send_confirmed(&self, address: &Address, notification: &EventNotification) -> Result<()>;
    fn send_unconfirmed(&self, address: &Address, notification: &EventNotification) -> Result<()>;
}

/// Maps device instances to network addresses
pub trait DeviceResolver: Send + Sync {
    fn resolve(&self, device: u32) -> Result<Address>;
}

/// Local consumer of every dispatched notification
pub trait NotificationListener: Send + Sync {
    fn on_event(&self, notification: &EventNotification) -> Result<()>;
}

/// Static device address table
#[derive(Debug, Default)]
pub struct DeviceTable {
    addresses: DashMap<u32, Address>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, device: u32, address: Address) {
        self.addresses.insert(device, address);
    }

    pub fn remove(&self, device: u32) -> Option<Address> {
        self.addresses.remove(&device).map(|(_, address)| address)
    }
}

impl DeviceResolver for DeviceTable {
    fn resolve(&self, device: u32) -> Result<Address> {
        self.addresses
            .get(&device)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BacError::Delivery {
                recipient: format!("device {}", device),
                reason: "address unknown".to_string(),
            })
    }
}

/// Transport that keeps every send in memory
///
/// Useful for local loopback and for asserting on delivered notifications.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentNotification>>,
}

/// One send captured by [`RecordingTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub address: Address,
    pub confirmed: bool,
    pub notification: EventNotification,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().clone()
    }

    /// Drain everything recorded so far
    pub fn take(&self) -> Vec<SentNotification> {
        std::mem::take(&mut *self.sent.lock())
    }

    fn record(&self, address: &Address, confirmed: bool, notification: &EventNotification) {
        self.sent.lock().push(SentNotification {
            address: address.clone(),
            confirmed,
            notification: notification.clone(),
        });
    }
}

impl Transport for RecordingTransport {
    fn send_confirmed(&self, address: &Address, notification: &EventNotification) -> Result<()> {
        self.record(address, true, notification);
        Ok(())
    }

    fn send_unconfirmed(&self, address: &Address, notification: &EventNotification) -> Result<()> {
        self.record(address, false, notification);
        Ok(())
    }
}

/// Called with every delivery or listener failure
pub type ErrorHook = Arc<dyn Fn(&BacError) + Send + Sync>;

// ============================================================================
// DISPATCHER
// ============================================================================

struct DeliveryJob {
    class: Arc<NotificationClass>,
    notification: EventNotification,
    internal: Option<Arc<dyn NotificationListener>>,
}

enum Job {
    Deliver(Box<DeliveryJob>),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Sends the transport accepted
    pub sent: u64,
    /// Destinations outside their validity window or transition filter
    pub skipped: u64,
    /// Unresolvable recipients and transport failures
    pub failed: u64,
}

struct DispatcherInner {
    tx: mpsc::UnboundedSender<Job>,
    counters: Arc<Counters>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the delivery worker
///
/// Enqueueing never blocks, so callers may dispatch while holding an
/// object lock. Cloning shares the same worker.
#[derive(Clone)]
pub struct NotificationDispatcher {
    inner: Arc<DispatcherInner>,
}

pub struct DispatcherBuilder {
    transport: Arc<dyn Transport>,
    devices: Arc<dyn DeviceResolver>,
    listeners: Vec<Arc<dyn NotificationListener>>,
    error_hook: Option<ErrorHook>,
}

impl DispatcherBuilder {
    pub fn listener(mut self, listener: Arc<dyn NotificationListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn error_hook(mut self, hook: ErrorHook) -> Self {
        self.error_hook = Some(hook);
        self
    }

    /// Start the delivery worker thread
    pub fn spawn(self) -> Result<NotificationDispatcher> {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let worker = Worker {
            transport: self.transport,
            devices: self.devices,
            listeners: self.listeners,
            hook: self.error_hook,
            counters: Arc::clone(&counters),
        };
        let handle = thread::Builder::new()
            .name("bacevent-delivery".to_string())
            .spawn(move || worker.run(rx))?;

        Ok(NotificationDispatcher {
            inner: Arc::new(DispatcherInner {
                tx,
                counters,
                worker: Mutex::new(Some(handle)),
            }),
        })
    }
}

impl NotificationDispatcher {
    pub fn builder(transport: Arc<dyn Transport>, devices: Arc<dyn DeviceResolver>) -> DispatcherBuilder {
        DispatcherBuilder {
            transport,
            devices,
            listeners: Vec::new(),
            error_hook: None,
        }
    }

    /// Queue a notification for every suitable destination of `class`
    pub fn dispatch(
        &self,
        class: Arc<NotificationClass>,
        notification: EventNotification,
        internal: Option<Arc<dyn NotificationListener>>,
    ) -> Result<()> {
        let job = DeliveryJob { class, notification, internal };
        self.inner
            .tx
            .send(Job::Deliver(Box::new(job)))
            .map_err(|_| BacError::Delivery {
                recipient: "all".to_string(),
                reason: "dispatcher is shut down".to_string(),
            })
    }

    /// Block until every job queued before this call has been delivered
    ///
    /// Must not be called from within an async context; use
    /// [`NotificationDispatcher::flushed`] there.
    pub fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.inner.tx.send(Job::Flush(tx)).is_ok() {
            let _ = rx.blocking_recv();
        }
    }

    pub async fn flushed(&self) {
        let (tx, rx) = oneshot::channel();
        if self.inner.tx.send(Job::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Deliver what is queued, then stop the worker
    pub fn shutdown(&self) -> Result<()> {
        let _ = self.inner.tx.send(Job::Shutdown);
        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| BacError::Listener("delivery worker panicked".to_string()))?;
            debug!("Notification dispatcher stopped");
        }
        Ok(())
    }

    pub fn stats(&self) -> DeliveryStats {
        let counters = &self.inner.counters;
        DeliveryStats {
            sent: counters.sent.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("stats", &self.stats())
            .finish()
    }
}

// ============================================================================
// WORKER
// ============================================================================

struct Worker {
    transport: Arc<dyn Transport>,
    devices: Arc<dyn DeviceResolver>,
    listeners: Vec<Arc<dyn NotificationListener>>,
    hook: Option<ErrorHook>,
    counters: Arc<Counters>,
}

impl Worker {
    fn run(self, mut rx: mpsc::UnboundedReceiver<Job>) {
        debug!("Delivery worker started");
        while let Some(job) = rx.blocking_recv() {
            match job {
                Job::Deliver(job) => self.deliver(*job),
                Job::Flush(done) => {
                    let _ = done.send(());
                }
                Job::Shutdown => break,
            }
        }
        debug!("Delivery worker exiting");
    }

    fn deliver(&self, job: DeliveryJob) {
        let DeliveryJob { class, notification, internal } = job;
        let at = notification.time_stamp.date_time().unwrap_or_else(Utc::now);

        for destination in &class.recipient_list {
            if !destination.is_suitable_for_event(at, notification.to_state) {
                trace!("Skipping {} for {}", destination.recipient, notification.event_object);
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let address = match &destination.recipient {
                Recipient::Address(address) => address.clone(),
                Recipient::Device(instance) => match self.devices.resolve(*instance) {
                    Ok(address) => address,
                    Err(e) => {
                        warn!("Cannot resolve recipient device {}: {}", instance, e);
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                        self.report(&e);
                        continue;
                    }
                },
            };

            let mut outgoing = notification.clone();
            outgoing.process_identifier = destination.process_identifier;
            let confirmed = destination.issue_confirmed_notifications;
            let sent = catch_unwind(AssertUnwindSafe(|| {
                if confirmed {
                    self.transport.send_confirmed(&address, &outgoing)
                } else {
                    self.transport.send_unconfirmed(&address, &outgoing)
                }
            }))
            .unwrap_or_else(|_| {
                Err(BacError::Delivery {
                    recipient: destination.recipient.to_string(),
                    reason: "transport panicked".to_string(),
                })
            });

            match sent {
                Ok(()) => {
                    self.counters.sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!("Notification to {} failed: {}", destination.recipient, e);
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    self.report(&e);
                }
            }
        }

        if let Some(listener) = &internal {
            self.notify(listener, &notification);
        }
        for listener in &self.listeners {
            self.notify(listener, &notification);
        }
    }

    fn notify(&self, listener: &Arc<dyn NotificationListener>, notification: &EventNotification) {
        match catch_unwind(AssertUnwindSafe(|| listener.on_event(notification))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Notification listener failed: {}", e);
                self.report(&e);
            }
            Err(_) => {
                let e = BacError::Listener("notification listener panicked".to_string());
                error!("{}", e);
                self.report(&e);
            }
        }
    }

    fn report(&self, e: &BacError) {
        if let Some(hook) = &self.hook {
            if catch_unwind(AssertUnwindSafe(|| hook(e))).is_err() {
                error!("Error hook panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::Destination;
    use crate::types::{EventState, EventTransitionBits, EventType, NotifyType, ObjectIdentifier, ObjectType};
    use chrono::TimeZone;

    fn notification() -> EventNotification {
        EventNotification {
            process_identifier: 0,
            initiating_device: ObjectIdentifier::device(1),
            event_object: ObjectIdentifier::new(ObjectType::AnalogInput, 1),
            time_stamp: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap().into(),
            notification_class: 17,
            priority: 100,
            event_type: EventType::OutOfRange,
            message_text: None,
            notify_type: NotifyType::Alarm,
            ack_required: Some(true),
            from_state: Some(EventState::Normal),
            to_state: EventState::HighLimit,
            event_values: None,
        }
    }

    struct Failing;

    impl NotificationListener for Failing {
        fn on_event(&self, _: &EventNotification) -> Result<()> {
            Err(BacError::Listener("boom".into()))
        }
    }

    struct Panicking;

    impl NotificationListener for Panicking {
        fn on_event(&self, _: &EventNotification) -> Result<()> {
            panic!("listener panic")
        }
    }

    #[test]
    fn test_routes_by_confirmation_and_process_id() {
        let mut transport = MockTransport::new();
        transport
            .expect_send_confirmed()
            .withf(|address, n| address.mac == vec![1] && n.process_identifier == 7)
            .times(1)
            .returning(|_, _| Ok(()));
        transport
            .expect_send_unconfirmed()
            .withf(|address, n| address.mac == vec![2] && n.process_identifier == 8)
            .times(1)
            .returning(|_, _| Ok(()));

        let devices = Arc::new(DeviceTable::new());
        devices.insert(10, Address::new(0, vec![2]));
        let dispatcher = NotificationDispatcher::builder(Arc::new(transport), devices).spawn().unwrap();

        let class = NotificationClass::new(17, [100, 5, 200], EventTransitionBits::all())
            .with_recipient(Destination::new(Recipient::Address(Address::new(0, vec![1])), 7).confirmed(true))
            .with_recipient(Destination::new(Recipient::Device(10), 8));
        dispatcher.dispatch(Arc::new(class), notification(), None).unwrap();
        dispatcher.flush();

        assert_eq!(dispatcher.stats(), DeliveryStats { sent: 2, skipped: 0, failed: 0 });
        dispatcher.shutdown().unwrap();
    }

    #[test]
    fn test_unresolvable_recipient_is_skipped_and_reported() {
        let mut transport = MockTransport::new();
        transport.expect_send_unconfirmed().times(1).returning(|_, _| Ok(()));

        let reported = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&reported);
        let dispatcher = NotificationDispatcher::builder(Arc::new(transport), Arc::new(DeviceTable::new()))
            .error_hook(Arc::new(move |_: &BacError| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .spawn()
            .unwrap();

        let class = NotificationClass::new(17, [100, 5, 200], EventTransitionBits::all())
            .with_recipient(Destination::new(Recipient::Device(99), 1))
            .with_recipient(Destination::new(Recipient::Address(Address::new(0, vec![3])), 2))
            .with_recipient(
                Destination::new(Recipient::Address(Address::new(0, vec![4])), 3)
                    .with_transitions(EventTransitionBits::new(false, true, true)),
            );
        dispatcher.dispatch(Arc::new(class), notification(), None).unwrap();
        dispatcher.flush();

        assert_eq!(dispatcher.stats(), DeliveryStats { sent: 1, skipped: 1, failed: 1 });
        assert_eq!(reported.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_failures_are_isolated() {
        let transport = MockTransport::new();
        let reported = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&reported);
        let internal = Arc::new(crate::notification::NotificationClassObject::new(17));

        let dispatcher = NotificationDispatcher::builder(Arc::new(transport), Arc::new(DeviceTable::new()))
            .listener(Arc::new(Panicking))
            .listener(Arc::new(Failing))
            .error_hook(Arc::new(move |_: &BacError| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .spawn()
            .unwrap();

        let class = NotificationClass::new(17, [100, 5, 200], EventTransitionBits::all());
        dispatcher
            .dispatch(Arc::new(class), notification(), Some(internal.clone()))
            .unwrap();
        dispatcher.flush();

        // Internal listener still runs once even with no recipients
        assert_eq!(internal.received(), 1);
        assert_eq!(reported.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dispatch_after_shutdown_fails() {
        let dispatcher = NotificationDispatcher::builder(Arc::new(MockTransport::new()), Arc::new(DeviceTable::new()))
            .spawn()
            .unwrap();
        dispatcher.shutdown().unwrap();

        let class = Arc::new(NotificationClass::new(1, [1, 1, 1], EventTransitionBits::all()));
        assert!(matches!(
            dispatcher.dispatch(class, notification(), None),
            Err(BacError::Delivery { .. })
        ));
    }
}
