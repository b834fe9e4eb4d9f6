//! This example connects to a heart rate sensor and prints heart rate values
//! until the connection goes away. The device address should be given as a
//! command line argument.

use std::sync::Arc;

use futures::StreamExt;
use gattlink::common::characteristics::HEART_RATE_MEASUREMENT;
use gattlink::{BleAdapter, BtleplugDriver, Error, Session, SessionEvent};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let address = std::env::args().nth(1).expect("Expected device address");
    pretty_env_logger::init();

    let adapter = Arc::new(BleAdapter::new().await?);
    let session = Session::new(address, Arc::new(BtleplugDriver::new(adapter)));

    let mut events = session.event_stream();
    let guard = session.connect_scoped().await?;

    let mut hr_stream = guard.notifications(HEART_RATE_MEASUREMENT).await?;
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            println!("{:?}", event);
            if event == SessionEvent::ConnectionLost {
                break;
            }
        }
    });

    while let Some(hr) = hr_stream.next().await {
        // Flags byte first; bit 0 selects a 16-bit value.
        let bpm = match hr.as_slice() {
            [flags, low, high, ..] if flags & 0x01 != 0 => u16::from_le_bytes([*low, *high]),
            [_, value, ..] => u16::from(*value),
            _ => continue,
        };
        println!("Heart rate: {} bpm", bpm);
    }

    guard.release().await
}
