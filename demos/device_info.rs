use scom_sdk::device::DeviceKind;
use scom_sdk::transport::SerialTransport;
use scom_sdk::{device::Device, devices};

fn main() {
    let port = std::env::args().nth(1).unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let transport = std::sync::Arc::new(SerialTransport::open(&port, 38400).expect("open serial transport"));

    let bsp = Device::new(
        DeviceKind::Bsp,
        601,
        devices::param_table(DeviceKind::Bsp),
        devices::user_info_table(DeviceKind::Bsp),
        transport,
    );

    println!("battery voltage: {:?}", bsp.read_user_info("battery_voltage"));
    println!("firmware version: {:?}", bsp.software_version());
}
