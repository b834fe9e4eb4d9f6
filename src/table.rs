use std::collections::HashMap;

use uuid::Uuid;

use crate::{Characteristic, Descriptor, Error, Handle, Result, Service, WriteMode};

/// Addresses an attribute by handle or by UUID.
///
/// UUID addressing only works while the UUID is unique among attributes of
/// the same kind; otherwise the lookup fails and the caller has to pick one
/// of the reported handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Handle(Handle),
    Uuid(Uuid),
}

impl From<Handle> for Target {
    fn from(handle: Handle) -> Self {
        Target::Handle(handle)
    }
}

impl From<u16> for Target {
    fn from(handle: u16) -> Self {
        Target::Handle(Handle(handle))
    }
}

impl From<Uuid> for Target {
    fn from(uuid: Uuid) -> Self {
        Target::Uuid(uuid)
    }
}

impl From<&Characteristic> for Target {
    fn from(characteristic: &Characteristic) -> Self {
        Target::Handle(characteristic.handle)
    }
}

impl From<&Descriptor> for Target {
    fn from(descriptor: &Descriptor) -> Self {
        Target::Handle(descriptor.handle)
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Service,
    Characteristic(usize, usize),
    Descriptor(usize, usize, usize),
}

/// Services, characteristics and descriptors discovered on one connection.
///
/// Built once after connecting and never modified afterwards.
#[derive(Debug, Clone)]
pub struct AttributeTable {
    services: Vec<Service>,
    slots: HashMap<Handle, Slot>,
}

impl AttributeTable {
    /// Index a discovery snapshot. Fails if a handle appears twice.
    pub fn new(services: Vec<Service>) -> Result<Self> {
        let mut slots = HashMap::new();
        let mut claim = |handle: Handle, slot: Slot| {
            if slots.insert(handle, slot).is_some() {
                Err(Error::ConnectionFailed(format!(
                    "discovery reported handle {} more than once",
                    handle
                )))
            } else {
                Ok(())
            }
        };

        for (s, service) in services.iter().enumerate() {
            claim(service.handle, Slot::Service)?;
            for (c, characteristic) in service.characteristics.iter().enumerate() {
                claim(characteristic.handle, Slot::Characteristic(s, c))?;
                for (d, descriptor) in characteristic.descriptors.iter().enumerate() {
                    claim(descriptor.handle, Slot::Descriptor(s, c, d))?;
                }
            }
        }

        Ok(Self { services, slots })
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// First service with the given UUID
    pub fn service(&self, uuid: Uuid) -> Option<&Service> {
        self.services.iter().find(|service| service.uuid == uuid)
    }

    /// All characteristics in discovery order
    pub fn characteristics(&self) -> impl Iterator<Item = &Characteristic> + '_ {
        self.services
            .iter()
            .flat_map(|service| service.characteristics.iter())
    }

    fn descriptors(&self) -> impl Iterator<Item = &Descriptor> + '_ {
        self.characteristics()
            .flat_map(|characteristic| characteristic.descriptors.iter())
    }

    pub fn characteristic(&self, target: impl Into<Target>) -> Result<&Characteristic> {
        match target.into() {
            Target::Handle(handle) => match self.slots.get(&handle) {
                Some(&Slot::Characteristic(s, c)) => Ok(&self.services[s].characteristics[c]),
                _ => Err(Error::AttributeNotFound(format!("characteristic {}", handle))),
            },
            Target::Uuid(uuid) => {
                let mut matches = self
                    .characteristics()
                    .filter(|characteristic| characteristic.uuid == uuid);
                let first = matches
                    .next()
                    .ok_or_else(|| Error::AttributeNotFound(format!("characteristic {}", uuid)))?;

                let rest: Vec<Handle> = matches.map(|characteristic| characteristic.handle).collect();
                if rest.is_empty() {
                    Ok(first)
                } else {
                    let mut handles = vec![first.handle];
                    handles.extend(rest);
                    Err(Error::AmbiguousCharacteristic { uuid, handles })
                }
            }
        }
    }

    pub fn descriptor(&self, target: impl Into<Target>) -> Result<&Descriptor> {
        match target.into() {
            Target::Handle(handle) => match self.slots.get(&handle) {
                Some(&Slot::Descriptor(s, c, d)) => {
                    Ok(&self.services[s].characteristics[c].descriptors[d])
                }
                _ => Err(Error::AttributeNotFound(format!("descriptor {}", handle))),
            },
            Target::Uuid(uuid) => {
                let matches: Vec<&Descriptor> = self
                    .descriptors()
                    .filter(|descriptor| descriptor.uuid == uuid)
                    .collect();
                match matches.as_slice() {
                    [] => Err(Error::AttributeNotFound(format!("descriptor {}", uuid))),
                    [descriptor] => Ok(*descriptor),
                    _ => Err(Error::AmbiguousDescriptor {
                        uuid,
                        handles: matches.iter().map(|descriptor| descriptor.handle).collect(),
                    }),
                }
            }
        }
    }

    /// Resolve a characteristic that can be read.
    pub(crate) fn readable(&self, target: Target) -> Result<&Characteristic> {
        let characteristic = self.characteristic(target)?;
        if !characteristic.can_read() {
            return Err(Error::PropertyNotSupported {
                handle: characteristic.handle,
                operation: "read",
            });
        }
        Ok(characteristic)
    }

    /// Resolve a characteristic that accepts writes in the given mode.
    pub(crate) fn writable(&self, target: Target, mode: WriteMode) -> Result<&Characteristic> {
        let characteristic = self.characteristic(target)?;
        if !characteristic.can_write(mode) {
            return Err(Error::PropertyNotSupported {
                handle: characteristic.handle,
                operation: match mode {
                    WriteMode::WithResponse => "write with response",
                    WriteMode::WithoutResponse => "write without response",
                },
            });
        }
        Ok(characteristic)
    }

    /// Resolve a characteristic that can notify or indicate.
    pub(crate) fn notifiable(&self, target: Target) -> Result<&Characteristic> {
        let characteristic = self.characteristic(target)?;
        if !characteristic.can_notify() {
            return Err(Error::PropertyNotSupported {
                handle: characteristic.handle,
                operation: "notifications",
            });
        }
        Ok(characteristic)
    }
}
