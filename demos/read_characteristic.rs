//! This example connects to a device and reads its battery level and model
//! number. The device address should be given as a command line argument.

use std::sync::Arc;

use gattlink::common::characteristics::{BATTERY_LEVEL, MODEL_NUMBER_STRING};
use gattlink::{BleAdapter, BtleplugDriver, Error, Session};

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Give BLE device address as a command line argument.
    let address = std::env::args().nth(1).expect("Expected device address");
    pretty_env_logger::init();

    let adapter = Arc::new(BleAdapter::new().await?);
    let session = Session::new(address, Arc::new(BtleplugDriver::new(adapter)));

    session
        .with_connection(|session| async move {
            if let Some(table) = session.attributes() {
                for service in table.services() {
                    println!("Service: {:?}", service);
                }
            }

            println!("Battery level: {:?}", session.read_characteristic(BATTERY_LEVEL).await?);

            let model = session.read_characteristic(MODEL_NUMBER_STRING).await?;
            println!("Model: {}", String::from_utf8_lossy(&model));

            Ok(())
        })
        .await
}
