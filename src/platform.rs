use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, ValueNotification,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::future::{BoxFuture, FutureExt};
use futures::{stream, StreamExt};

use crate::driver::{Driver, DriverEvent, DriverEvents, WriteOutcome};
use crate::{Characteristic, Descriptor, Error, Handle, Result, Service, WriteMode};

/// An opened Bluetooth adapter.
///
/// Owned explicitly and shared by the drivers created from it.
pub struct BleAdapter {
    _manager: Manager,
    adapter: Adapter,
}

impl BleAdapter {
    /// Open the first Bluetooth adapter of the system.
    pub async fn new() -> Result<Self> {
        Self::with_index(0).await
    }

    /// Open the adapter at `index`.
    pub async fn with_index(index: usize) -> Result<Self> {
        let manager = Manager::new().await?;
        let mut adapters = manager.adapters().await?;

        if index >= adapters.len() {
            return Err(btleplug::Error::DeviceNotFound.into());
        }

        let adapter = adapters.swap_remove(index);

        log::trace!("Using adapter: {:?}", adapter);

        Ok(Self {
            _manager: manager,
            adapter,
        })
    }
}

#[derive(Debug, Clone)]
enum Attribute {
    Characteristic(btleplug::api::Characteristic),
    Descriptor(btleplug::api::Descriptor),
}

#[derive(Default)]
struct Discovered {
    attributes: HashMap<Handle, Attribute>,
    enabled: HashSet<Handle>,
}

impl Discovered {
    /// Enabled handles whose characteristic has the UUID of `notification`.
    fn route(&self, notification: &ValueNotification) -> Vec<Handle> {
        self.enabled
            .iter()
            .filter(|handle| match self.attributes.get(handle) {
                Some(Attribute::Characteristic(characteristic)) => {
                    characteristic.uuid == notification.uuid
                }
                _ => false,
            })
            .copied()
            .collect()
    }
}

/// [`Driver`] on top of btleplug.
///
/// Devices are identified by their address string, e.g. `"AA:BB:CC:DD:EE:FF"`,
/// compared case-insensitively. btleplug has no attribute handles, so handles
/// are numbered in discovery order.
pub struct BtleplugDriver {
    adapter: Arc<BleAdapter>,
    peripheral: Mutex<Option<Peripheral>>,
    discovered: Arc<Mutex<Discovered>>,
}

impl BtleplugDriver {
    pub fn new(adapter: Arc<BleAdapter>) -> Self {
        Self {
            adapter,
            peripheral: Mutex::new(None),
            discovered: Arc::new(Mutex::new(Discovered::default())),
        }
    }

    fn peripheral(&self) -> Result<Peripheral> {
        self.peripheral
            .lock()
            .unwrap()
            .clone()
            .ok_or(Error::NotConnected)
    }

    fn attribute(&self, handle: Handle) -> Result<Attribute> {
        self.discovered
            .lock()
            .unwrap()
            .attributes
            .get(&handle)
            .cloned()
            .ok_or_else(|| Error::AttributeNotFound(handle.to_string()))
    }

    /// Find the peripheral with address `identifier`, scanning until it shows up.
    async fn find(&self, identifier: &str) -> Result<Peripheral> {
        let adapter = &self.adapter.adapter;
        let matches = |peripheral: &Peripheral| {
            peripheral
                .address()
                .to_string()
                .eq_ignore_ascii_case(identifier)
        };

        // Subscribed before listing so a discovery in between is not missed.
        let mut events = adapter.events().await?;

        if let Some(peripheral) = adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|peripheral| matches(peripheral))
        {
            return Ok(peripheral);
        }

        log::debug!("{} is not known yet, scanning", identifier);
        adapter.start_scan(ScanFilter::default()).await?;
        let scan = StopOnDrop::new({
            let adapter = adapter.clone();
            async move {
                if let Err(err) = adapter.stop_scan().await {
                    log::debug!("Could not stop the scan: {}", err);
                }
            }
        });

        let found = loop {
            match events.next().await {
                Some(CentralEvent::DeviceDiscovered(id)) | Some(CentralEvent::DeviceUpdated(id)) => {
                    if let Ok(peripheral) = adapter.peripheral(&id).await {
                        if matches(&peripheral) {
                            break Ok(peripheral);
                        }
                    }
                }
                Some(_) => {}
                None => {
                    break Err(Error::ConnectionFailed(format!(
                        "adapter stopped reporting before {} was found",
                        identifier
                    )))
                }
            }
        };

        scan.finish().await;
        found
    }
}

/// Stops a scan when the search that started it ends, including when the
/// search is dropped half way.
struct StopOnDrop {
    stop: Option<BoxFuture<'static, ()>>,
}

impl StopOnDrop {
    fn new(stop: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            stop: Some(stop.boxed()),
        }
    }

    async fn finish(mut self) {
        if let Some(stop) = self.stop.take() {
            stop.await;
        }
    }
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        let stop = match self.stop.take() {
            Some(stop) => stop,
            None => return,
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(stop);
            }
            Err(_) => log::warn!("Search dropped outside a runtime, scan left running"),
        }
    }
}

fn next_handle(last: &mut u16) -> Result<u16> {
    *last = last
        .checked_add(1)
        .ok_or_else(|| Error::native(None, "peripheral has more attributes than handles"))?;
    Ok(*last)
}

#[async_trait]
impl Driver for BtleplugDriver {
    async fn connect(&self, identifier: &str) -> Result<()> {
        let peripheral = self.find(identifier).await?;

        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }

        log::debug!("Link up with {}", peripheral.address());
        *self.peripheral.lock().unwrap() = Some(peripheral);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let peripheral = self.peripheral.lock().unwrap().take();
        *self.discovered.lock().unwrap() = Discovered::default();

        match peripheral {
            Some(peripheral) => Ok(peripheral.disconnect().await?),
            None => Ok(()),
        }
    }

    async fn discover_services(&self) -> Result<Vec<Service>> {
        let peripheral = self.peripheral()?;
        peripheral.discover_services().await?;

        let mut attributes = HashMap::new();
        let mut services = Vec::new();
        let mut last = 0;

        for service in peripheral.services() {
            let mut gatt_service = Service::new(service.uuid, next_handle(&mut last)?);
            if !service.primary {
                gatt_service = gatt_service.secondary();
            }

            for characteristic in service.characteristics {
                let handle = next_handle(&mut last)?;
                let mut converted =
                    Characteristic::new(characteristic.uuid, handle, characteristic.properties.into());

                for descriptor in &characteristic.descriptors {
                    let handle = next_handle(&mut last)?;
                    converted = converted.with_descriptor(Descriptor::new(descriptor.uuid, handle));
                    attributes.insert(Handle(handle), Attribute::Descriptor(descriptor.clone()));
                }

                attributes.insert(Handle(handle), Attribute::Characteristic(characteristic));
                gatt_service = gatt_service.with_characteristic(converted);
            }

            services.push(gatt_service);
        }

        log::trace!("Discovered {} attributes", last);
        self.discovered.lock().unwrap().attributes = attributes;
        Ok(services)
    }

    async fn read(&self, handle: Handle) -> Result<Vec<u8>> {
        let peripheral = self.peripheral()?;

        Ok(match self.attribute(handle)? {
            Attribute::Characteristic(characteristic) => peripheral.read(&characteristic).await?,
            Attribute::Descriptor(descriptor) => peripheral.read_descriptor(&descriptor).await?,
        })
    }

    async fn write(&self, handle: Handle, data: &[u8], mode: WriteMode) -> Result<WriteOutcome> {
        let peripheral = self.peripheral()?;

        match self.attribute(handle)? {
            Attribute::Characteristic(characteristic) => {
                let write_type = match mode {
                    WriteMode::WithResponse => WriteType::WithResponse,
                    WriteMode::WithoutResponse => WriteType::WithoutResponse,
                };
                peripheral.write(&characteristic, data, write_type).await?;
                Ok(WriteOutcome::expected_for(mode))
            }
            Attribute::Descriptor(descriptor) => {
                peripheral.write_descriptor(&descriptor, data).await?;
                Ok(WriteOutcome::Acknowledged)
            }
        }
    }

    async fn set_notify(&self, handle: Handle, enabled: bool) -> Result<()> {
        let peripheral = self.peripheral()?;

        let characteristic = match self.attribute(handle)? {
            Attribute::Characteristic(characteristic) => characteristic,
            Attribute::Descriptor(_) => {
                return Err(Error::AttributeNotFound(handle.to_string()));
            }
        };

        if enabled {
            peripheral.subscribe(&characteristic).await?;
            self.discovered.lock().unwrap().enabled.insert(handle);
        } else {
            self.discovered.lock().unwrap().enabled.remove(&handle);
            peripheral.unsubscribe(&characteristic).await?;
        }

        Ok(())
    }

    async fn events(&self) -> Result<DriverEvents> {
        let peripheral = self.peripheral()?;
        let id = peripheral.id();

        let discovered = self.discovered.clone();
        let values = peripheral.notifications().await?.flat_map(move |notification| {
            let handles = discovered.lock().unwrap().route(&notification);
            stream::iter(handles.into_iter().map(move |handle| DriverEvent::ValueChanged {
                handle,
                value: notification.value.clone(),
            }))
        });

        let lost = self.adapter.adapter.events().await?.filter_map(move |event| {
            let ours = matches!(&event, CentralEvent::DeviceDisconnected(other) if *other == id);
            async move { ours.then_some(DriverEvent::ConnectionLost) }
        });

        Ok(Box::pin(stream::select(values, lost)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn cancelled_search_stops_the_scan() {
        let (stopped, receiver) = oneshot::channel();

        let search = async move {
            let _scan = StopOnDrop::new(async move {
                stopped.send(()).ok();
            });
            futures::future::pending::<()>().await;
        };

        assert!(tokio::time::timeout(Duration::from_millis(10), search)
            .await
            .is_err());
        assert_eq!(receiver.await, Ok(()));
    }

    #[tokio::test]
    async fn finished_search_stops_the_scan_once() {
        let stops = Arc::new(Mutex::new(0));
        let counter = stops.clone();

        let scan = StopOnDrop::new(async move {
            *counter.lock().unwrap() += 1;
        });
        scan.finish().await;
        tokio::task::yield_now().await;

        assert_eq!(*stops.lock().unwrap(), 1);
    }
}
