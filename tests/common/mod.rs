#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gattlink::common::{characteristics, descriptors, services};
use gattlink::{
    CharacteristicProperties as Props, Characteristic, Descriptor, Driver, DriverEvent,
    DriverEvents, Error, Handle, Result, Service, Session, SessionConfig, WriteMode,
    WriteOutcome,
};
use tokio::sync::{mpsc, Semaphore};
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

pub const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

pub const HEART_RATE: Handle = Handle(7);
pub const HEART_RATE_CCCD: Handle = Handle(8);
pub const CONTROL_POINT: Handle = Handle(10);
pub const SETTINGS: Handle = Handle(12);
pub const BATTERY_A: Handle = Handle(20);
pub const BATTERY_B: Handle = Handle(24);
pub const STATUS: Handle = Handle(30);
pub const MODEL_NUMBER: Handle = Handle(42);

pub const CONTROL_POINT_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
pub const SETTINGS_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);
pub const STATUS_UUID: Uuid = Uuid::from_u128(0x6e400004_b5a3_f393_e0a9_e50e24dcca9e);

/// Something the session asked the driver to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(String),
    Disconnect,
    Discover,
    Read(Handle),
    Write(Handle, Vec<u8>, WriteMode),
    SetNotify(Handle, bool),
    Pair,
    Unpair,
}

/// How the link drops while services are being discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryLoss {
    /// Discovery still returns its result.
    Completing,
    /// Discovery never returns.
    Hanging,
}

/// Scripted in-memory peripheral.
pub struct MockDriver {
    services: Vec<Service>,
    values: Mutex<HashMap<Handle, Vec<u8>>>,
    calls: Mutex<Vec<Call>>,
    events: Mutex<Option<mpsc::UnboundedSender<DriverEvent>>>,
    failing: Mutex<HashMap<Handle, Error>>,
    hanging: Mutex<HashSet<Handle>>,
    connect_delay: Mutex<Option<Duration>>,
    fail_connect: AtomicBool,
    gate_acks: AtomicBool,
    acks: Semaphore,
    discovery_loss: Mutex<Option<DiscoveryLoss>>,
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        let mut values = HashMap::new();
        values.insert(MODEL_NUMBER, b"Model-X".to_vec());
        values.insert(BATTERY_A, vec![87]);
        values.insert(BATTERY_B, vec![42]);
        values.insert(SETTINGS, vec![0]);
        values.insert(HEART_RATE_CCCD, vec![0, 0]);

        Arc::new(Self {
            services: peripheral(),
            values: Mutex::new(values),
            calls: Mutex::new(Vec::new()),
            events: Mutex::new(None),
            failing: Mutex::new(HashMap::new()),
            hanging: Mutex::new(HashSet::new()),
            connect_delay: Mutex::new(None),
            fail_connect: AtomicBool::new(false),
            gate_acks: AtomicBool::new(false),
            acks: Semaphore::new(0),
            discovery_loss: Mutex::new(None),
        })
    }

    pub fn session(self: &Arc<Self>) -> Session {
        self.session_with(SessionConfig::default())
    }

    pub fn session_with(self: &Arc<Self>, config: SessionConfig) -> Session {
        Session::with_config(ADDRESS, self.clone(), config)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|call| matches(call)).count()
    }

    pub fn delay_connect(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = Some(delay);
    }

    pub fn refuse_connect(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    pub fn fail(&self, handle: Handle, error: Error) {
        self.failing.lock().unwrap().insert(handle, error);
    }

    /// Requests on `handle` never complete.
    pub fn hang(&self, handle: Handle) {
        self.hanging.lock().unwrap().insert(handle);
    }

    /// Writes with response complete only after [`MockDriver::release_ack`].
    pub fn gate_acks(&self) {
        self.gate_acks.store(true, Ordering::SeqCst);
    }

    pub fn release_ack(&self) {
        self.acks.add_permits(1);
    }

    /// The next service discovery reports the link as lost.
    pub fn lose_link_during_discovery(&self, loss: DiscoveryLoss) {
        *self.discovery_loss.lock().unwrap() = Some(loss);
    }

    pub fn emit_value(&self, handle: Handle, value: &[u8]) {
        self.emit(DriverEvent::ValueChanged {
            handle,
            value: value.to_vec(),
        });
    }

    /// The peripheral goes out of range.
    pub fn drop_link(&self) {
        self.emit(DriverEvent::ConnectionLost);
    }

    fn emit(&self, event: DriverEvent) {
        if let Some(sender) = self.events.lock().unwrap().as_ref() {
            sender.send(event).ok();
        }
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    async fn gate(&self, handle: Handle) -> Result<()> {
        let hang = self.hanging.lock().unwrap().contains(&handle);
        if hang {
            futures::future::pending::<()>().await;
        }
        match self.failing.lock().unwrap().get(&handle) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn connect(&self, identifier: &str) -> Result<()> {
        self.record(Call::Connect(identifier.to_string()));

        let delay = *self.connect_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::native(Some(0x85), "peripheral refused the connection"));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.record(Call::Disconnect);
        self.events.lock().unwrap().take();
        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<Service>> {
        self.record(Call::Discover);

        let loss = self.discovery_loss.lock().unwrap().take();
        if let Some(loss) = loss {
            self.drop_link();
            if loss == DiscoveryLoss::Hanging {
                futures::future::pending::<()>().await;
            }
        }
        Ok(self.services.clone())
    }

    async fn read(&self, handle: Handle) -> Result<Vec<u8>> {
        self.record(Call::Read(handle));
        self.gate(handle).await?;

        Ok(self
            .values
            .lock()
            .unwrap()
            .get(&handle)
            .cloned()
            .unwrap_or_default())
    }

    async fn write(&self, handle: Handle, data: &[u8], mode: WriteMode) -> Result<WriteOutcome> {
        self.record(Call::Write(handle, data.to_vec(), mode));
        self.gate(handle).await?;

        if mode == WriteMode::WithResponse && self.gate_acks.load(Ordering::SeqCst) {
            self.acks.acquire().await.unwrap().forget();
        }

        self.values.lock().unwrap().insert(handle, data.to_vec());
        Ok(match mode {
            WriteMode::WithResponse => WriteOutcome::Acknowledged,
            WriteMode::WithoutResponse => WriteOutcome::Accepted,
        })
    }

    async fn set_notify(&self, handle: Handle, enabled: bool) -> Result<()> {
        self.record(Call::SetNotify(handle, enabled));
        self.gate(handle).await
    }

    async fn events(&self) -> Result<DriverEvents> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.events.lock().unwrap() = Some(sender);
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    async fn pair(&self) -> Result<()> {
        self.record(Call::Pair);
        Ok(())
    }

    async fn unpair(&self) -> Result<()> {
        self.record(Call::Unpair);
        Ok(())
    }
}

/// Attribute layout of the scripted peripheral.
fn peripheral() -> Vec<Service> {
    vec![
        Service::new(services::HEART_RATE, 6)
            .with_characteristic(
                Characteristic::new(characteristics::HEART_RATE_MEASUREMENT, 7, Props::NOTIFY)
                    .with_descriptor(Descriptor::new(
                        descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION,
                        8,
                    )),
            )
            .with_characteristic(Characteristic::new(
                CONTROL_POINT_UUID,
                10,
                Props::WRITE_WITHOUT_RESPONSE,
            ))
            .with_characteristic(Characteristic::new(
                SETTINGS_UUID,
                12,
                Props::READ | Props::WRITE,
            )),
        Service::new(services::BATTERY, 19).with_characteristic(Characteristic::new(
            characteristics::BATTERY_LEVEL,
            20,
            Props::READ | Props::NOTIFY,
        )),
        Service::new(services::BATTERY, 23).with_characteristic(Characteristic::new(
            characteristics::BATTERY_LEVEL,
            24,
            Props::READ,
        )),
        Service::new(services::DEVICE_INFORMATION, 29)
            .with_characteristic(Characteristic::new(STATUS_UUID, 30, Props::READ))
            .with_characteristic(Characteristic::new(
                characteristics::MODEL_NUMBER_STRING,
                42,
                Props::READ,
            )),
    ]
}

pub fn init_logger() {
    let _ = pretty_env_logger::try_init();
}
