// src/config.rs - YAML device configuration: notification classes, devices and points

use crate::{
    algorithms::FaultState,
    error::{BacError, Result},
    notification::{Address, Destination, NotificationClass, Recipient},
    object::{AnalogLimits, IntrinsicReporting},
    property::PropertyIdentifier,
    types::{BinaryPv, EventTransitionBits, LimitEnable, NotifyType, ObjectIdentifier, ObjectType},
    value::Value,
};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

// ============================================================================
// MAIN CONFIGURATION
// ============================================================================

/// Device configuration
///
/// # Examples
///
/// ```rust
/// use bacevent::Config;
///
/// let config = Config::from_yaml(r#"
/// device:
///   instance: 1
/// notification_classes:
///   - id: 17
///     priority: [100, 5, 200]
/// points:
///   - kind: analog-input
///     instance: 1
///     name: supply-temp
///     initial: 21.5
///     reporting:
///       notification_class: 17
///       algorithm:
///         type: out-of-range
///         high_limit: 100.0
///         low_limit: 20.0
/// "#)?;
/// assert_eq!(config.points.len(), 1);
/// # Ok::<(), bacevent::BacError>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,

    #[serde(default)]
    pub notification_classes: Vec<NotificationClassConfig>,

    /// Static address table for recipients given by device instance
    #[serde(default)]
    pub devices: Vec<DeviceAddressConfig>,

    #[serde(default)]
    pub points: Vec<PointConfig>,
}

impl Config {
    /// Load and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross references and uniqueness
    pub fn validate(&self) -> Result<()> {
        let mut classes = HashSet::new();
        for class in &self.notification_classes {
            if !classes.insert(class.id) {
                return Err(BacError::Config(format!("Duplicate notification class {}", class.id)));
            }
        }

        let mut devices = HashSet::new();
        for device in &self.devices {
            if !devices.insert(device.instance) {
                return Err(BacError::Config(format!("Duplicate device address for {}", device.instance)));
            }
        }

        let mut points = HashSet::new();
        for point in &self.points {
            if !points.insert(point.object_identifier()) {
                return Err(BacError::Config(format!(
                    "Duplicate point {}",
                    point.object_identifier()
                )));
            }
            if let Some(reporting) = &point.reporting {
                if !classes.contains(&reporting.notification_class) {
                    return Err(BacError::Config(format!(
                        "Point '{}' references unknown notification class {}",
                        point.name, reporting.notification_class
                    )));
                }
                reporting.algorithm.check_kind(point)?;
            }
            if point.commandable.is_some() && !point.kind.is_commandable() {
                return Err(BacError::Config(format!(
                    "Point '{}' of kind {:?} cannot be commandable",
                    point.name, point.kind
                )));
            }
        }

        Ok(())
    }
}

/// Local device identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub instance: u32,
    #[serde(default = "default_device_name")]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAddressConfig {
    pub instance: u32,
    #[serde(default)]
    pub network: u16,
    pub mac: Vec<u8>,
}

impl DeviceAddressConfig {
    pub fn address(&self) -> Address {
        Address::new(self.network, self.mac.clone())
    }
}

// ============================================================================
// NOTIFICATION CLASSES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationClassConfig {
    pub id: u32,
    /// Priorities for to-offnormal, to-fault and to-normal
    pub priority: [u8; 3],
    #[serde(default)]
    pub ack_required: EventTransitionBits,
    #[serde(default)]
    pub recipients: Vec<DestinationConfig>,
}

impl NotificationClassConfig {
    pub fn to_class(&self) -> NotificationClass {
        let mut class = NotificationClass::new(self.id, self.priority, self.ack_required);
        class.recipient_list = self.recipients.iter().map(DestinationConfig::to_destination).collect();
        class
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub recipient: Recipient,
    #[serde(default)]
    pub process_identifier: u32,
    #[serde(default)]
    pub confirmed: bool,
    /// Monday first; all days when omitted
    #[serde(default)]
    pub valid_days: Option<[bool; 7]>,
    #[serde(default)]
    pub from_time: Option<NaiveTime>,
    #[serde(default)]
    pub to_time: Option<NaiveTime>,
    #[serde(default)]
    pub transitions: Option<EventTransitionBits>,
}

impl DestinationConfig {
    pub fn to_destination(&self) -> Destination {
        let base = Destination::new(self.recipient.clone(), self.process_identifier).confirmed(self.confirmed);
        let days = self.valid_days.unwrap_or(base.valid_days);
        let from = self.from_time.unwrap_or(base.from_time);
        let to = self.to_time.unwrap_or(base.to_time);
        let transitions = self.transitions.unwrap_or(base.transitions);
        base.with_window(days, from, to).with_transitions(transitions)
    }
}

// ============================================================================
// POINTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PointKind {
    AnalogInput,
    AnalogOutput,
    AnalogValue,
    BinaryInput,
    BinaryOutput,
    BinaryValue,
    MultiStateInput,
    MultiStateOutput,
    MultiStateValue,
}

impl PointKind {
    pub fn object_type(&self) -> ObjectType {
        match self {
            PointKind::AnalogInput => ObjectType::AnalogInput,
            PointKind::AnalogOutput => ObjectType::AnalogOutput,
            PointKind::AnalogValue => ObjectType::AnalogValue,
            PointKind::BinaryInput => ObjectType::BinaryInput,
            PointKind::BinaryOutput => ObjectType::BinaryOutput,
            PointKind::BinaryValue => ObjectType::BinaryValue,
            PointKind::MultiStateInput => ObjectType::MultiStateInput,
            PointKind::MultiStateOutput => ObjectType::MultiStateOutput,
            PointKind::MultiStateValue => ObjectType::MultiStateValue,
        }
    }

    fn is_analog(&self) -> bool {
        matches!(self, PointKind::AnalogInput | PointKind::AnalogOutput | PointKind::AnalogValue)
    }

    fn is_binary(&self) -> bool {
        matches!(self, PointKind::BinaryInput | PointKind::BinaryOutput | PointKind::BinaryValue)
    }

    /// Inputs carry sensor readings and take no commands
    fn is_commandable(&self) -> bool {
        !matches!(
            self,
            PointKind::AnalogInput | PointKind::BinaryInput | PointKind::MultiStateInput
        )
    }

    /// Convert a YAML scalar to a present value of this kind
    pub fn convert(&self, raw: &serde_yaml::Value) -> Result<Value> {
        let invalid = || BacError::Config(format!("Invalid {:?} value: {:?}", self, raw));
        if self.is_analog() {
            raw.as_f64().map(|f| Value::Real(f as f32)).ok_or_else(invalid)
        } else if self.is_binary() {
            let active = match raw {
                serde_yaml::Value::Bool(b) => *b,
                serde_yaml::Value::Number(n) => match n.as_u64() {
                    Some(0) => false,
                    Some(1) => true,
                    _ => return Err(invalid()),
                },
                serde_yaml::Value::String(s) => match s.as_str() {
                    "active" => true,
                    "inactive" => false,
                    _ => return Err(invalid()),
                },
                _ => return Err(invalid()),
            };
            Ok(Value::Binary(if active { BinaryPv::Active } else { BinaryPv::Inactive }))
        } else {
            raw.as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n >= 1)
                .map(Value::Unsigned)
                .ok_or_else(invalid)
        }
    }

    fn default_value(&self) -> Value {
        if self.is_analog() {
            Value::Real(0.0)
        } else if self.is_binary() {
            Value::Binary(BinaryPv::Inactive)
        } else {
            Value::Unsigned(1)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointConfig {
    pub kind: PointKind,
    pub instance: u32,
    pub name: String,
    #[serde(default)]
    pub initial: Option<serde_yaml::Value>,
    #[serde(default)]
    pub out_of_service: bool,
    #[serde(default)]
    pub commandable: Option<CommandableConfig>,
    #[serde(default)]
    pub reporting: Option<ReportingConfig>,
}

impl PointConfig {
    pub fn object_identifier(&self) -> ObjectIdentifier {
        ObjectIdentifier::new(self.kind.object_type(), self.instance)
    }

    pub fn initial_value(&self) -> Result<Value> {
        match &self.initial {
            Some(raw) => self.kind.convert(raw),
            None => Ok(self.kind.default_value()),
        }
    }

    pub fn relinquish_default(&self) -> Result<Option<Value>> {
        match &self.commandable {
            Some(commandable) => match &commandable.relinquish_default {
                Some(raw) => self.kind.convert(raw).map(Some),
                None => self.initial_value().map(Some),
            },
            None => Ok(None),
        }
    }

    /// Reporting setup for this point, if configured
    pub fn intrinsic_reporting(&self) -> Result<Option<IntrinsicReporting>> {
        let Some(cfg) = &self.reporting else {
            return Ok(None);
        };
        cfg.algorithm.check_kind(self)?;

        let nc = cfg.notification_class;
        let mut reporting = match &cfg.algorithm {
            AlgorithmConfig::OutOfRange {
                high_limit,
                low_limit,
                deadband,
                limit_enable,
                fault_high_limit,
                fault_low_limit,
            } => {
                let mut limits = AnalogLimits::new(*low_limit, *high_limit, *deadband);
                limits.limit_enable = *limit_enable;
                if let (Some(low), Some(high)) = (fault_low_limit, fault_high_limit) {
                    limits = limits.with_fault_limits(*low, *high);
                }
                IntrinsicReporting::out_of_range(nc, limits)
            }
            AlgorithmConfig::ChangeOfState { alarm_values, fault_values } => {
                let alarms = alarm_values
                    .iter()
                    .map(|raw| self.kind.convert(raw))
                    .collect::<Result<Vec<_>>>()?;
                let mut reporting = IntrinsicReporting::change_of_state(nc, alarms);
                if !fault_values.is_empty() {
                    let faults = fault_values
                        .iter()
                        .map(|raw| self.kind.convert(raw))
                        .collect::<Result<Vec<_>>>()?;
                    reporting = reporting
                        .fault_algorithm(Box::new(FaultState))
                        .parameter(PropertyIdentifier::FaultValues, Value::List(faults));
                }
                reporting
            }
            AlgorithmConfig::CommandFailure { feedback } => {
                let initial = match feedback {
                    Some(raw) => self.kind.convert(raw)?,
                    None => self.initial_value()?,
                };
                IntrinsicReporting::command_failure(nc).parameter(PropertyIdentifier::FeedbackValue, initial)
            }
        };

        reporting = reporting
            .time_delay(cfg.time_delay)
            .event_enable(cfg.event_enable)
            .notify_type(cfg.notify_type);
        if let Some(secs) = cfg.time_delay_normal {
            reporting = reporting.time_delay_normal(secs);
        }
        if let Some(texts) = &cfg.message_texts {
            reporting = reporting.message_texts(texts.clone());
        }
        Ok(Some(reporting))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandableConfig {
    #[serde(default)]
    pub relinquish_default: Option<serde_yaml::Value>,
    /// Seconds; lockout applies only when both are set
    #[serde(default)]
    pub minimum_on_time: Option<u32>,
    #[serde(default)]
    pub minimum_off_time: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingConfig {
    pub notification_class: u32,
    pub algorithm: AlgorithmConfig,
    #[serde(default)]
    pub time_delay: u32,
    #[serde(default)]
    pub time_delay_normal: Option<u32>,
    #[serde(default = "default_event_enable")]
    pub event_enable: EventTransitionBits,
    #[serde(default)]
    pub notify_type: NotifyType,
    #[serde(default)]
    pub message_texts: Option<[String; 3]>,
}

/// Event algorithm and its parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AlgorithmConfig {
    OutOfRange {
        high_limit: f32,
        low_limit: f32,
        #[serde(default)]
        deadband: f32,
        #[serde(default)]
        limit_enable: LimitEnable,
        #[serde(default)]
        fault_high_limit: Option<f32>,
        #[serde(default)]
        fault_low_limit: Option<f32>,
    },
    ChangeOfState {
        alarm_values: Vec<serde_yaml::Value>,
        #[serde(default)]
        fault_values: Vec<serde_yaml::Value>,
    },
    CommandFailure {
        #[serde(default)]
        feedback: Option<serde_yaml::Value>,
    },
}

impl AlgorithmConfig {
    fn check_kind(&self, point: &PointConfig) -> Result<()> {
        let fits = match self {
            AlgorithmConfig::OutOfRange { .. } => point.kind.is_analog(),
            AlgorithmConfig::ChangeOfState { .. } => !point.kind.is_analog(),
            AlgorithmConfig::CommandFailure { .. } => true,
        };
        if fits {
            Ok(())
        } else {
            Err(BacError::Config(format!(
                "Algorithm {:?} does not apply to point '{}' of kind {:?}",
                self, point.name, point.kind
            )))
        }
    }
}

// ============================================================================
// DEFAULT VALUE FUNCTIONS
// ============================================================================

fn default_device_name() -> String { "bacevent".to_string() }
fn default_event_enable() -> EventTransitionBits { EventTransitionBits::all() }
