use std::sync::Arc;
use std::time::Duration;

use scom_sdk::config::Config;
use scom_sdk::device::{Device, DeviceKind};
use scom_sdk::manager::{DeviceManager, Subscriber};

struct LoggingSubscriber;

impl Subscriber for LoggingSubscriber {
    fn on_device_connected(&self, device: Arc<Device>) {
        log::info!("connected: {:?} @ {}", device.kind(), device.bus_address());
    }

    fn on_device_disconnected(&self, kind: DeviceKind, bus_address: u32) {
        log::info!("disconnected: {kind:?} @ {bus_address}");
    }
}

fn main() {
    env_logger::init();

    let port = std::env::args().nth(1).unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let manager = DeviceManager::start(Config::new(port)).expect("open serial transport");

    manager.subscribe(Arc::new(LoggingSubscriber), None);

    log::info!("scanning bus, press Ctrl-C to exit");
    loop {
        std::thread::sleep(Duration::from_secs(10));
        for kind in [DeviceKind::Xtender, DeviceKind::VarioPower, DeviceKind::Rcc, DeviceKind::Bsp] {
            for device in manager.devices(kind) {
                let (major, minor, patch) = device.software_version();
                log::info!("{:?} @ {}: firmware {major}.{minor}.{patch}", kind, device.bus_address());
            }
        }
    }
}
