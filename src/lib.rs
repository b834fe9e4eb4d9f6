//! GATT client sessions for BLE devices.
//!
//! A [`Session`] owns the connection with one device: it serializes GATT
//! operations, validates them against the discovered attributes, routes
//! notifications to subscribers and cleans everything up when the link goes
//! away. The radio side is a [`Driver`]; [`BtleplugDriver`] is the bundled one.
//!
//! ## Usage
//!
//! Connect to a device by address and read its battery level:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use gattlink::common::characteristics::BATTERY_LEVEL;
//! use gattlink::{BleAdapter, BtleplugDriver, Error, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     pretty_env_logger::init();
//!
//!     let adapter = Arc::new(BleAdapter::new().await?);
//!     let session = Session::new("AA:BB:CC:DD:EE:FF", Arc::new(BtleplugDriver::new(adapter)));
//!
//!     let level = session
//!         .with_connection(|session| async move { session.read_characteristic(BATTERY_LEVEL).await })
//!         .await?;
//!     println!("Battery level: {:?}", level);
//!
//!     Ok(())
//! }
//!```

#![warn(clippy::all, future_incompatible, nonstandard_style, rust_2018_idioms)]

pub use characteristic::{Characteristic, CharacteristicProperties, WriteMode};
pub use config::SessionConfig;
pub use correlator::OperationKind;
pub use descriptor::Descriptor;
pub use driver::{Driver, DriverEvent, DriverEvents, WriteOutcome};
pub use error::{gatt_status_name, Error};
pub use platform::{BleAdapter, BtleplugDriver};
pub use registry::NotifyCallback;
pub use service::{Handle, Service};
pub use session::{ConnectionGuard, Session, SessionEvent};
pub use state::ConnectionState;
pub use table::{AttributeTable, Target};

mod correlator;
mod registry;
mod session;
mod state;

mod config;
mod driver;
mod error;
mod platform;

mod characteristic;
mod descriptor;
mod service;
mod table;

pub mod common;

pub type Result<T, E = Error> = std::result::Result<T, E>;
