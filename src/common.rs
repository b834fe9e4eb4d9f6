//! Assigned numbers for commonly used GATT attributes.

pub mod services {
    use btleplug::api::bleuuid::uuid_from_u16;
    use uuid::Uuid;

    pub const GENERIC_ACCESS: Uuid = uuid_from_u16(0x1800);
    pub const GENERIC_ATTRIBUTE: Uuid = uuid_from_u16(0x1801);
    pub const DEVICE_INFORMATION: Uuid = uuid_from_u16(0x180A);
    pub const HEART_RATE: Uuid = uuid_from_u16(0x180D);
    pub const BATTERY: Uuid = uuid_from_u16(0x180F);
}

pub mod characteristics {
    use btleplug::api::bleuuid::uuid_from_u16;
    use uuid::Uuid;

    pub const DEVICE_NAME: Uuid = uuid_from_u16(0x2A00);
    pub const SERVICE_CHANGED: Uuid = uuid_from_u16(0x2A05);
    pub const BATTERY_LEVEL: Uuid = uuid_from_u16(0x2A19);
    pub const MODEL_NUMBER_STRING: Uuid = uuid_from_u16(0x2A24);
    pub const FIRMWARE_REVISION_STRING: Uuid = uuid_from_u16(0x2A26);
    pub const MANUFACTURER_NAME_STRING: Uuid = uuid_from_u16(0x2A29);
    pub const HEART_RATE_MEASUREMENT: Uuid = uuid_from_u16(0x2A37);
}

pub mod descriptors {
    use btleplug::api::bleuuid::uuid_from_u16;
    use uuid::Uuid;

    pub const CHARACTERISTIC_USER_DESCRIPTION: Uuid = uuid_from_u16(0x2901);
    /// Written by the stack to enable notifications or indications.
    pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid = uuid_from_u16(0x2902);
}
