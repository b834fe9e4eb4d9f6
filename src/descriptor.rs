use uuid::Uuid;

use crate::Handle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub(crate) uuid: Uuid,
    pub(crate) handle: Handle,
    pub(crate) characteristic: Handle,
}

impl Descriptor {
    pub fn new(uuid: Uuid, handle: u16) -> Self {
        Self {
            uuid,
            handle: Handle(handle),
            characteristic: Handle(0),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Handle of the characteristic this descriptor belongs to
    pub fn characteristic(&self) -> Handle {
        self.characteristic
    }
}
