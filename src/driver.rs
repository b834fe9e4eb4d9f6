use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{Error, Handle, Result, Service, WriteMode};

/// Unsolicited events reported by a driver while connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// The link went away without being asked to.
    ConnectionLost,
    /// A notification or indication arrived.
    ValueChanged { handle: Handle, value: Vec<u8> },
}

pub type DriverEvents = Pin<Box<dyn Stream<Item = DriverEvent> + Send>>;

/// How the native stack completed a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The peripheral acknowledged a write request.
    Acknowledged,
    /// The local stack took the data for transmission.
    Accepted,
}

impl WriteOutcome {
    pub(crate) fn expected_for(mode: WriteMode) -> Self {
        match mode {
            WriteMode::WithResponse => WriteOutcome::Acknowledged,
            WriteMode::WithoutResponse => WriteOutcome::Accepted,
        }
    }
}

/// Capabilities a platform backend provides for one connection.
///
/// A session issues at most one `read`, `write` or `set_notify` at a time, even
/// across reconnects: a request abandoned by a disconnect keeps the next one
/// waiting until the driver returns from it. `disconnect` and `connect` may
/// run while such a request is still outstanding.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    async fn connect(&self, identifier: &str) -> Result<()>;

    /// Tear the link down. Expected to succeed locally even if the radio link
    /// is already gone.
    async fn disconnect(&self) -> Result<()>;

    async fn discover_services(&self) -> Result<Vec<Service>>;

    /// Read a characteristic or descriptor value.
    async fn read(&self, handle: Handle) -> Result<Vec<u8>>;

    /// Write a characteristic or descriptor value. Descriptors are always
    /// written with response.
    async fn write(&self, handle: Handle, data: &[u8], mode: WriteMode) -> Result<WriteOutcome>;

    async fn set_notify(&self, handle: Handle, enabled: bool) -> Result<()>;

    /// Event stream for the current link. Requested once per connection,
    /// after `connect` succeeded.
    async fn events(&self) -> Result<DriverEvents>;

    /// Bond with the connected peripheral.
    async fn pair(&self) -> Result<()> {
        Err(Error::native(None, "pairing is not supported by this driver"))
    }

    /// Remove the bond with the peripheral.
    async fn unpair(&self) -> Result<()> {
        Err(Error::native(None, "pairing is not supported by this driver"))
    }
}
