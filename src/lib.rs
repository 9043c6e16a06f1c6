//! BACEVENT - Intrinsic event reporting and command prioritization
//!
//! Building-automation objects that supervise their own present value,
//! run a per-object event state machine and deliver event notifications
//! to the recipients of a notification class.
//!
//! # Features
//!
//! - `tokio-scheduler` (default): timers run as tasks on a tokio runtime.
//!   Without it the crate still builds with [`VirtualClock`] as the only
//!   scheduler.
//!
//! # Examples
//!
//! ```rust,ignore
//! use bacevent::{Config, LocalDevice, RecordingTransport, SystemClock, TokioScheduler};
//! use std::sync::Arc;
//!
//! bacevent::init();
//!
//! let config = Config::from_file("device.yaml")?;
//! let device = LocalDevice::from_config(
//!     &config,
//!     Arc::new(SystemClock),
//!     Arc::new(TokioScheduler::current()?),
//!     Arc::new(RecordingTransport::new()),
//! )?;
//! # Ok::<(), bacevent::BacError>(())
//! ```

// ============================================================================
// CORE MODULES
// ============================================================================

/// Error types, protocol error codes and the crate result alias
pub mod error;

/// Enumerations and small value types shared across modules
pub mod types;

/// Tagged property values
pub mod value;

/// Property identifiers and the concurrent property store
pub mod property;

/// Clocks, timers and schedulers
pub mod scheduler;

// ============================================================================
// COMMANDING AND REPORTING
// ============================================================================

/// Priority array and minimum on/off arbitration
pub mod priority;

/// Event and fault evaluation algorithms
pub mod algorithms;

/// Notification classes, destinations and event notifications
pub mod notification;

/// Background notification delivery
pub mod dispatcher;

/// Alarm, event and enrollment summaries
pub mod summary;

/// Event state machine and acknowledgment
pub mod reporting;

/// Monitored objects
pub mod object;

/// Local device hosting objects
pub mod device;

/// YAML configuration
pub mod config;

// ============================================================================
// PUBLIC API EXPORTS
// ============================================================================

pub use error::{BacError, ErrorClass, ErrorCode, Result};
pub use types::{
    BinaryPv, EventState, EventTransitionBits, EventType, LimitEnable, NotifyType, ObjectIdentifier,
    ObjectType, Reliability, StatusFlags, TimeStamp, Transition,
};
pub use value::Value;
pub use property::{PropertyIdentifier, PropertyStore, WriteListener};
pub use scheduler::{Clock, Scheduler, SystemClock, Task, TimerHandle, VirtualClock};
#[cfg(feature = "tokio-scheduler")]
pub use scheduler::TokioScheduler;
pub use priority::{PriorityArray, DEFAULT_PRIORITY, MINIMUM_ON_OFF_PRIORITY, PRIORITY_LEVELS};
pub use algorithms::{
    AlgorithmContext, ChangeOfState, CommandFailure, EventAlgorithm, FaultAlgorithm, FaultLimits, FaultState,
    OutOfRange, StateTransition,
};
pub use notification::{
    Address, Destination, EventNotification, InMemoryRegistry, NotificationClass, NotificationClassObject,
    NotificationClassRegistry, NotificationParameters, Recipient,
};
pub use dispatcher::{
    DeliveryStats, DeviceResolver, DeviceTable, ErrorHook, NotificationDispatcher, NotificationListener,
    RecordingTransport, SentNotification, Transport,
};
pub use summary::{
    AcknowledgmentFilter, AlarmSummary, EnrollmentFilter, EnrollmentSummary, EventStateFilter, EventSummary,
    PriorityFilter, RecipientProcess,
};
pub use reporting::{AcknowledgeAlarmRequest, EventStateMachine};
pub use object::{AnalogLimits, IntrinsicReporting, MonitoredObject, MonitoredObjectBuilder, ObjectServices};
pub use device::LocalDevice;
pub use config::Config;

// ============================================================================
// VERSION INFORMATION
// ============================================================================

/// BACEVENT version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// INITIALIZATION
// ============================================================================

/// Install the default tracing subscriber
///
/// Honors `RUST_LOG`, falling back to `bacevent=info`. Calling it again, or
/// after the host application installed its own subscriber, is a no-op.
pub fn init() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bacevent=info"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false));

    if subscriber.try_init().is_ok() {
        tracing::info!("BACEVENT v{} initialized", VERSION);
    }
}
