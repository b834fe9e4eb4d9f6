use std::fmt;

use uuid::Uuid;

use crate::Characteristic;

/// Connection-scoped identifier of one attribute.
///
/// Unique within a single connection, unlike UUIDs. Handles are meaningless
/// across reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(pub u16);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

impl From<u16> for Handle {
    fn from(handle: u16) -> Self {
        Handle(handle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub(crate) uuid: Uuid,
    pub(crate) handle: Handle,
    pub(crate) primary: bool,
    pub(crate) characteristics: Vec<Characteristic>,
}

impl Service {
    pub fn new(uuid: Uuid, handle: u16) -> Self {
        Self {
            uuid,
            handle: Handle(handle),
            primary: true,
            characteristics: Vec::new(),
        }
    }

    /// Mark the service as secondary (only reachable through includes).
    pub fn secondary(mut self) -> Self {
        self.primary = false;
        self
    }

    /// Append a characteristic, recording this service as its parent.
    pub fn with_characteristic(mut self, mut characteristic: Characteristic) -> Self {
        characteristic.service_uuid = self.uuid;
        self.characteristics.push(characteristic);
        self
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    /// Characteristics in discovery order
    pub fn characteristics(&self) -> &[Characteristic] {
        &self.characteristics
    }
}
