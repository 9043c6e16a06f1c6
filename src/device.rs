// src/device.rs - Local device: object table, registry and device-wide services
use crate::{
    config::Config,
    dispatcher::{DeviceTable, NotificationDispatcher, Transport},
    error::{BacError, ErrorCode, Result},
    notification::InMemoryRegistry,
    object::{MonitoredObject, ObjectServices},
    reporting::AcknowledgeAlarmRequest,
    scheduler::{Clock, Scheduler},
    summary::{AlarmSummary, EnrollmentFilter, EnrollmentSummary, EventSummary},
    types::ObjectIdentifier,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use parking_lot::RwLock;
use tracing::{debug, info};

/// A device hosting monitored objects
///
/// Service calls that span objects (summaries, acknowledgment routing)
/// take each object's lock in turn, never two at once.
pub struct LocalDevice {
    name: String,
    services: ObjectServices,
    registry: Arc<InMemoryRegistry>,
    devices: Arc<DeviceTable>,
    objects: RwLock<BTreeMap<ObjectIdentifier, MonitoredObject>>,
}

impl LocalDevice {
    pub fn new(
        instance: u32,
        name: impl Into<String>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let registry = Arc::new(InMemoryRegistry::new());
        let devices = Arc::new(DeviceTable::new());
        let dispatcher = NotificationDispatcher::builder(transport, devices.clone()).spawn()?;
        Ok(Self::with_dispatcher(instance, name, clock, scheduler, registry, devices, dispatcher))
    }

    /// Assemble a device around an already running dispatcher
    pub fn with_dispatcher(
        instance: u32,
        name: impl Into<String>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
        registry: Arc<InMemoryRegistry>,
        devices: Arc<DeviceTable>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        let services = ObjectServices {
            device: ObjectIdentifier::device(instance),
            clock,
            scheduler,
            registry: registry.clone(),
            dispatcher,
        };
        Self {
            name: name.into(),
            services,
            registry,
            devices,
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Build the registry, address table and every configured point
    pub fn from_config(
        config: &Config,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        let device = Self::new(config.device.instance, config.device.name.clone(), clock, scheduler, transport)?;

        for class in &config.notification_classes {
            device.registry.insert_object(class.to_class());
        }
        for entry in &config.devices {
            device.devices.insert(entry.instance, entry.address());
        }

        for point in &config.points {
            let mut builder = MonitoredObject::builder(point.object_identifier(), point.name.clone(), point.initial_value()?);
            if let Some(relinquish) = point.relinquish_default()? {
                builder = builder.commandable(relinquish);
                if let Some(commandable) = &point.commandable {
                    if let (Some(on), Some(off)) = (commandable.minimum_on_time, commandable.minimum_off_time) {
                        builder = builder.minimum_on_off(on, off);
                    }
                }
            }
            if let Some(reporting) = point.intrinsic_reporting()? {
                builder = builder.intrinsic_reporting(reporting);
            }
            if point.out_of_service {
                builder = builder.out_of_service();
            }
            device.add_object(builder.build(device.services())?)?;
        }

        info!(
            "Device {} '{}' loaded with {} objects",
            config.device.instance,
            device.name,
            device.object_count()
        );
        Ok(device)
    }

    pub fn identifier(&self) -> ObjectIdentifier {
        self.services.device
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Services handed to objects built for this device
    pub fn services(&self) -> ObjectServices {
        self.services.clone()
    }

    pub fn registry(&self) -> &Arc<InMemoryRegistry> {
        &self.registry
    }

    pub fn device_table(&self) -> &Arc<DeviceTable> {
        &self.devices
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.services.dispatcher
    }

    pub fn add_object(&self, object: MonitoredObject) -> Result<()> {
        let mut objects = self.objects.write();
        let id = object.id();
        if objects.contains_key(&id) {
            return Err(BacError::Config(format!("Object {} already exists", id)));
        }
        debug!("Adding object {} to device", id);
        objects.insert(id, object);
        Ok(())
    }

    pub fn object(&self, id: ObjectIdentifier) -> Option<MonitoredObject> {
        self.objects.read().get(&id).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    fn all_objects(&self) -> Vec<MonitoredObject> {
        self.objects.read().values().cloned().collect()
    }

    /// Route an acknowledgment to its event object
    pub fn acknowledge_alarm(&self, request: &AcknowledgeAlarmRequest) -> Result<()> {
        let object = self
            .object(request.event_object)
            .ok_or(BacError::Protocol(ErrorCode::UnknownObject))?;
        object.acknowledge(request)
    }

    pub fn alarm_summaries(&self) -> Vec<AlarmSummary> {
        self.all_objects().iter().filter_map(MonitoredObject::alarm_summary).collect()
    }

    /// Event information: objects not normal or with unacked transitions
    pub fn event_information(&self) -> Vec<EventSummary> {
        self.all_objects().iter().filter_map(MonitoredObject::event_summary).collect()
    }

    pub fn enrollment_summaries(&self, filter: &EnrollmentFilter) -> Vec<EnrollmentSummary> {
        self.all_objects()
            .iter()
            .filter_map(|object| object.enrollment_summary(filter))
            .collect()
    }

    /// Deliver queued notifications and stop the delivery worker
    pub fn shutdown(&self) -> Result<()> {
        self.services.dispatcher.shutdown()
    }
}

impl std::fmt::Debug for LocalDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDevice")
            .field("identifier", &self.services.device)
            .field("name", &self.name)
            .field("objects", &self.object_count())
            .finish()
    }
}
