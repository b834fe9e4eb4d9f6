use bitflags::bitflags;
use btleplug::api::CharPropFlags;
use uuid::Uuid;

use crate::{Descriptor, Handle};

bitflags! {
    /// Declared access properties of a characteristic.
    ///
    /// Bit values match the characteristic properties field of the
    /// characteristic declaration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CharacteristicProperties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

impl From<CharPropFlags> for CharacteristicProperties {
    fn from(flags: CharPropFlags) -> Self {
        // btleplug uses the same bit layout
        CharacteristicProperties::from_bits_truncate(flags.bits())
    }
}

/// Whether a write waits for the peripheral to acknowledge it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteMode {
    /// Write request; resolves on the peripheral's acknowledgment.
    WithResponse,
    /// Write command; resolves once the local stack accepted the data.
    WithoutResponse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub(crate) uuid: Uuid,
    pub(crate) handle: Handle,
    pub(crate) service_uuid: Uuid,
    pub(crate) properties: CharacteristicProperties,
    pub(crate) descriptors: Vec<Descriptor>,
}

impl Characteristic {
    pub fn new(uuid: Uuid, handle: u16, properties: CharacteristicProperties) -> Self {
        Self {
            uuid,
            handle: Handle(handle),
            service_uuid: Uuid::nil(),
            properties,
            descriptors: Vec::new(),
        }
    }

    /// Append a descriptor, pointing its back reference at this characteristic.
    pub fn with_descriptor(mut self, mut descriptor: Descriptor) -> Self {
        descriptor.characteristic = self.handle;
        self.descriptors.push(descriptor);
        self
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// UUID of the service this characteristic belongs to
    pub fn service_uuid(&self) -> Uuid {
        self.service_uuid
    }

    pub fn properties(&self) -> CharacteristicProperties {
        self.properties
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    /// Get descriptor by UUID. Returns the first match within this characteristic.
    pub fn descriptor(&self, uuid: Uuid) -> Option<&Descriptor> {
        self.descriptors
            .iter()
            .find(|descriptor| descriptor.uuid == uuid)
    }

    pub fn can_read(&self) -> bool {
        self.properties.contains(CharacteristicProperties::READ)
    }

    pub fn can_write(&self, mode: WriteMode) -> bool {
        match mode {
            WriteMode::WithResponse => self.properties.contains(CharacteristicProperties::WRITE),
            WriteMode::WithoutResponse => self
                .properties
                .contains(CharacteristicProperties::WRITE_WITHOUT_RESPONSE),
        }
    }

    pub fn can_notify(&self) -> bool {
        self.properties
            .intersects(CharacteristicProperties::NOTIFY | CharacteristicProperties::INDICATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_btleplug_flags() {
        let properties =
            CharacteristicProperties::from(CharPropFlags::READ | CharPropFlags::INDICATE);
        assert_eq!(
            properties,
            CharacteristicProperties::READ | CharacteristicProperties::INDICATE
        );
    }

    #[test]
    fn write_modes_follow_their_own_bit() {
        let characteristic = Characteristic::new(
            Uuid::nil(),
            10,
            CharacteristicProperties::WRITE_WITHOUT_RESPONSE,
        );
        assert!(characteristic.can_write(WriteMode::WithoutResponse));
        assert!(!characteristic.can_write(WriteMode::WithResponse));
        assert!(!characteristic.can_read());
    }

    #[test]
    fn descriptors_point_back_to_their_characteristic() {
        let characteristic =
            Characteristic::new(Uuid::nil(), 7, CharacteristicProperties::NOTIFY)
                .with_descriptor(Descriptor::new(Uuid::from_u128(0x2902), 8));
        assert_eq!(characteristic.descriptors()[0].characteristic(), Handle(7));
        assert!(characteristic.can_notify());
    }
}
