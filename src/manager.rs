//! Process-wide device discovery: a background thread that scans the bus,
//! keeps a per-kind registry of live devices, and notifies subscribers as
//! devices appear and disappear.
//!
//! Grounded on `devicemanager.py`'s `DeviceManager`: one process-wide
//! instance enforced at construction time, a discovery loop that probes a
//! fixed object id per kind across an address range, and weak references so
//! a device that a subscriber drops is not kept alive by the registry alone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::Config;
use crate::device::{Device, DeviceKind};
use crate::devices;
use crate::property::{object_type, property_id};
use crate::transport::SerialTransport;
use crate::TransportOpenError;

/// RX error count past which a single critical log line is emitted.
const RX_ERROR_WARN_THRESHOLD: u64 = 50;
/// RX error count past which the process is terminated, unconditionally.
const RX_ERROR_FATAL_THRESHOLD: u64 = 100;

/// Granularity at which the discovery thread re-checks the stop flag while
/// waiting out its scan interval.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Notified as devices are discovered and lost. Implementations must be
/// `Send + Sync` since they are invoked from the discovery thread.
pub trait Subscriber: Send + Sync {
    fn on_device_connected(&self, device: Arc<Device>);
    fn on_device_disconnected(&self, kind: DeviceKind, bus_address: u32);
}

struct Subscription {
    subscriber: Arc<dyn Subscriber>,
    /// `None` subscribes to every kind.
    kinds: Option<Vec<DeviceKind>>,
}

impl Subscription {
    fn wants(&self, kind: DeviceKind) -> bool {
        self.kinds.as_ref().map_or(true, |kinds| kinds.contains(&kind))
    }
}

type Registry = HashMap<DeviceKind, HashMap<u32, Weak<Device>>>;

/// Guards the process-wide singleton slot. Unlike a `OnceLock`, this can be
/// released again by [`DeviceManager::destroy`], giving the manager a
/// create/destroy lifecycle rather than a set-once-and-never-cleared flag.
static INSTANCE_HELD: AtomicBool = AtomicBool::new(false);

/// Returned by [`DeviceManager::start`] when an instance already exists.
#[derive(Debug, Display)]
#[display(fmt = "a DeviceManager already exists in this process; call destroy() first")]
pub struct AlreadyStarted;

impl std::error::Error for AlreadyStarted {}

/// Owns the shared [`SerialTransport`], the live device registry, and the
/// background discovery thread. At most one instance may exist per process;
/// [`DeviceManager::start`] fails on a second attempt, and
/// [`DeviceManager::destroy`] releases the slot for re-creation.
pub struct DeviceManager {
    transport: Arc<SerialTransport>,
    registry: Mutex<Registry>,
    subscribers: Mutex<Vec<Subscription>>,
    stop: Arc<AtomicBool>,
    discovery_handle: Mutex<Option<JoinHandle<()>>>,
    rx_error_warned: AtomicBool,
    config: Config,
}

/// Either the transport could not be opened, or an instance already exists.
#[derive(Debug, Display)]
pub enum StartError {
    #[display(fmt = "{}", _0)]
    AlreadyStarted(AlreadyStarted),
    #[display(fmt = "{}", _0)]
    TransportOpen(TransportOpenError),
}

impl std::error::Error for StartError {}

impl From<AlreadyStarted> for StartError {
    fn from(value: AlreadyStarted) -> Self {
        Self::AlreadyStarted(value)
    }
}

impl From<TransportOpenError> for StartError {
    fn from(value: TransportOpenError) -> Self {
        Self::TransportOpen(value)
    }
}

impl DeviceManager {
    /// Opens the configured transport and spawns the discovery thread.
    ///
    /// Fails with [`AlreadyStarted`] if a [`DeviceManager`] already exists
    /// in this process and has not been released via [`Self::destroy`] —
    /// the bus is a physical singleton, so two managers would corrupt each
    /// other's exchanges.
    pub fn start(config: Config) -> Result<Arc<Self>, StartError> {
        if INSTANCE_HELD.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return Err(AlreadyStarted.into());
        }

        let transport = match SerialTransport::open(&config.port, config.baud_rate) {
            Ok(transport) => Arc::new(transport),
            Err(e) => {
                INSTANCE_HELD.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        Ok(Self::spawn(config, transport))
    }

    /// Same singleton/lifecycle contract as [`Self::start`], but takes an
    /// already-open transport instead of opening `config.port` — the
    /// injection point tests use to run discovery against a mocked serial
    /// port without a real bus.
    pub fn start_with_transport(config: Config, transport: Arc<SerialTransport>) -> Result<Arc<Self>, AlreadyStarted> {
        if INSTANCE_HELD.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return Err(AlreadyStarted);
        }
        Ok(Self::spawn(config, transport))
    }

    fn spawn(config: Config, transport: Arc<SerialTransport>) -> Arc<Self> {
        let manager = Arc::new(DeviceManager {
            transport,
            registry: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            stop: Arc::new(AtomicBool::new(false)),
            discovery_handle: Mutex::new(None),
            rx_error_warned: AtomicBool::new(false),
            config,
        });

        let handle = {
            let manager = manager.clone();
            std::thread::Builder::new()
                .name("scom-discovery".to_string())
                .spawn(move || manager.discovery_loop())
                .expect("failed to spawn discovery thread")
        };
        if manager.config.thread_monitor {
            log::info!("scom: registered discovery thread {:?} with thread monitor", handle.thread().name());
        }
        *manager.discovery_handle.lock().unwrap() = Some(handle);

        manager
    }

    /// Stops the discovery thread, drops every tracked device and
    /// subscription, and releases the process-wide singleton slot so a
    /// subsequent [`Self::start`] can succeed.
    pub fn destroy(&self) {
        self.stop();
        self.registry.lock().unwrap().clear();
        self.subscribers.lock().unwrap().clear();
        INSTANCE_HELD.store(false, Ordering::SeqCst);
    }

    /// Registers `subscriber`, replaying every currently-known device as an
    /// immediate `on_device_connected` callback so late subscribers see
    /// devices discovered before they subscribed.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>, kinds: Option<Vec<DeviceKind>>) {
        let registry = self.registry.lock().unwrap();
        for (&kind, devices) in registry.iter() {
            if kinds.as_ref().map_or(true, |ks| ks.contains(&kind)) {
                for weak in devices.values() {
                    if let Some(device) = weak.upgrade() {
                        subscriber.on_device_connected(device);
                    }
                }
            }
        }
        drop(registry);

        self.subscribers.lock().unwrap().push(Subscription { subscriber, kinds });
    }

    /// Removes every subscription backed by `subscriber`, compared by
    /// pointer identity.
    pub fn unsubscribe(&self, subscriber: &Arc<dyn Subscriber>) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|s| !Arc::ptr_eq(&s.subscriber, subscriber));
    }

    /// Devices currently believed present for `kind`, upgrading and
    /// discarding any weak handle whose strong owner already dropped it.
    pub fn devices(&self, kind: DeviceKind) -> Vec<Arc<Device>> {
        self.registry
            .lock()
            .unwrap()
            .get(&kind)
            .map(|m| m.values().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }

    /// Number of responses that failed checksum/length validation on the
    /// shared transport since it was opened.
    pub fn rx_errors(&self) -> u64 {
        self.transport.rx_errors()
    }

    /// Signals the discovery thread to stop and joins it. Does not close
    /// the underlying transport.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.discovery_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn discovery_loop(&self) {
        loop {
            self.scan_once();
            self.check_health();

            if self.wait_or_stop(self.config.discovery_interval) {
                return;
            }
        }
    }

    /// Sleeps for `duration`, polling the stop flag every
    /// [`STOP_POLL_INTERVAL`]. Returns `true` if a stop was observed.
    fn wait_or_stop(&self, duration: Duration) -> bool {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.stop.load(Ordering::SeqCst) {
                return true;
            }
            let slice = STOP_POLL_INTERVAL.min(remaining);
            std::thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
        self.stop.load(Ordering::SeqCst)
    }

    fn scan_range(&self, kind: DeviceKind) -> std::ops::RangeInclusive<u32> {
        self.config
            .scan_overrides
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, range)| range.clone())
            .unwrap_or_else(|| devices::probe_spec(kind).address_range.clone())
    }

    fn scan_once(&self) {
        for spec in devices::PROBE_SPECS {
            let mut present = Vec::new();
            for address in self.scan_range(spec.kind) {
                let probe = Device::new(
                    spec.kind,
                    address,
                    devices::param_table(spec.kind),
                    devices::user_info_table(spec.kind),
                    self.transport.clone(),
                );
                // RCC's probe object (5000) is a parameter (Language), not a
                // user-info object, unlike every other kind's probe.
                let found = if spec.kind == DeviceKind::Rcc {
                    probe
                        .read_object(object_type::PARAMETER, spec.probe_object_id, property_id::VALUE_QSP)
                        .is_ok()
                } else {
                    probe
                        .read_object(object_type::READ_USER_INFO, spec.probe_object_id, property_id::READ)
                        .is_ok()
                };
                if found {
                    present.push((address, Arc::new(probe)));
                }
            }
            self.reconcile(spec.kind, present);
        }
    }

    fn reconcile(&self, kind: DeviceKind, present: Vec<(u32, Arc<Device>)>) {
        let present_addresses: Vec<u32> = present.iter().map(|(a, _)| *a).collect();

        let mut newly_connected = Vec::new();
        let mut disconnected = Vec::new();

        {
            let mut registry = self.registry.lock().unwrap();
            let kind_map = registry.entry(kind).or_default();

            for (address, device) in present {
                if !kind_map.contains_key(&address) || kind_map[&address].upgrade().is_none() {
                    newly_connected.push(device.clone());
                }
                kind_map.insert(address, Arc::downgrade(&device));
            }

            kind_map.retain(|address, weak| {
                let still_present = present_addresses.contains(address);
                let alive = weak.upgrade().is_some();
                if (!still_present || !alive) && alive {
                    disconnected.push(*address);
                }
                still_present && alive
            });
        }

        let subscribers = self.subscribers.lock().unwrap();
        for device in newly_connected {
            for sub in subscribers.iter().filter(|s| s.wants(kind)) {
                sub.subscriber.on_device_connected(device.clone());
            }
        }
        for address in disconnected {
            for sub in subscribers.iter().filter(|s| s.wants(kind)) {
                sub.subscriber.on_device_disconnected(kind, address);
            }
        }
    }

    /// Transport health gate: the RX-error counter is the manager's sole
    /// signal that the bus itself has gone bad. Crossing the fatal
    /// threshold terminates the process unconditionally — deemed
    /// unrecoverable, documented and intentional, not contingent on any
    /// configuration flag.
    fn check_health(&self) {
        let errors = self.transport.rx_errors();
        match health_action(errors, self.rx_error_warned.load(Ordering::SeqCst)) {
            HealthAction::Fatal => {
                log::error!("scom: transport rx_errors={errors}, exceeding fatal threshold; terminating");
                std::process::exit(1);
            }
            HealthAction::Warn => {
                if self.rx_error_warned.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
                    log::error!("scom: transport rx_errors={errors}, exceeding warn threshold");
                }
            }
            HealthAction::Ok => {}
        }
    }
}

/// What [`DeviceManager::check_health`] should do for a given RX-error
/// count, factored out so the threshold logic is testable without actually
/// terminating the test process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HealthAction {
    Ok,
    Warn,
    Fatal,
}

fn health_action(errors: u64, already_warned: bool) -> HealthAction {
    if errors > RX_ERROR_FATAL_THRESHOLD {
        HealthAction::Fatal
    } else if errors > RX_ERROR_WARN_THRESHOLD && !already_warned {
        HealthAction::Warn
    } else {
        HealthAction::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSubscriber {
        connected: AtomicUsize,
        disconnected: AtomicUsize,
    }

    impl Subscriber for CountingSubscriber {
        fn on_device_connected(&self, _device: Arc<Device>) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }
        fn on_device_disconnected(&self, _kind: DeviceKind, _bus_address: u32) {
            self.disconnected.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fresh_manager() -> DeviceManager {
        DeviceManager {
            transport: Arc::new(SerialTransport::from_port(Box::new(NullPort))),
            registry: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            stop: Arc::new(AtomicBool::new(false)),
            discovery_handle: Mutex::new(None),
            rx_error_warned: AtomicBool::new(false),
            config: Config::new("/dev/null"),
        }
    }

    #[test]
    fn reconcile_notifies_connect_then_disconnect() {
        let manager = fresh_manager();
        let subscriber = Arc::new(CountingSubscriber {
            connected: AtomicUsize::new(0),
            disconnected: AtomicUsize::new(0),
        });
        manager.subscribe(subscriber.clone(), None);

        let device = Arc::new(Device::new(
            DeviceKind::Bsp,
            601,
            devices::param_table(DeviceKind::Bsp),
            devices::user_info_table(DeviceKind::Bsp),
            manager.transport.clone(),
        ));
        manager.reconcile(DeviceKind::Bsp, vec![(601, device)]);
        assert_eq!(subscriber.connected.load(Ordering::SeqCst), 1);

        manager.reconcile(DeviceKind::Bsp, vec![]);
        assert_eq!(subscriber.disconnected.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscribe_replays_already_known_devices() {
        let manager = fresh_manager();
        let device = Arc::new(Device::new(
            DeviceKind::Xtender,
            101,
            devices::param_table(DeviceKind::Xtender),
            devices::user_info_table(DeviceKind::Xtender),
            manager.transport.clone(),
        ));
        manager.reconcile(DeviceKind::Xtender, vec![(101, device)]);

        let subscriber = Arc::new(CountingSubscriber {
            connected: AtomicUsize::new(0),
            disconnected: AtomicUsize::new(0),
        });
        manager.subscribe(subscriber.clone(), None);
        assert_eq!(subscriber.connected.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_further_notifications() {
        let manager = fresh_manager();
        let subscriber = Arc::new(CountingSubscriber {
            connected: AtomicUsize::new(0),
            disconnected: AtomicUsize::new(0),
        });
        manager.subscribe(subscriber.clone(), None);
        manager.unsubscribe(&(subscriber.clone() as Arc<dyn Subscriber>));

        let device = Arc::new(Device::new(
            DeviceKind::Rcc,
            501,
            devices::param_table(DeviceKind::Rcc),
            devices::user_info_table(DeviceKind::Rcc),
            manager.transport.clone(),
        ));
        manager.reconcile(DeviceKind::Rcc, vec![(501, device)]);
        assert_eq!(subscriber.connected.load(Ordering::SeqCst), 0);
    }

    /// Scans a single address per kind with a short interval, so the
    /// background discovery thread this spawns finishes a sweep quickly
    /// instead of walking each kind's full default address range.
    fn fast_scan_config() -> Config {
        let mut config = Config::new("/dev/null");
        config.thread_monitor = false;
        config.scan_overrides = vec![
            (DeviceKind::Xtender, 101..=101),
            (DeviceKind::VarioPower, 701..=701),
            (DeviceKind::Rcc, 501..=501),
            (DeviceKind::Bsp, 601..=601),
        ];
        config
    }

    #[test]
    fn second_start_fails_until_destroy_releases_the_slot() {
        let first = DeviceManager::start_with_transport(
            fast_scan_config(),
            Arc::new(SerialTransport::from_port(Box::new(NullPort))),
        )
        .expect("first start succeeds");

        let second = DeviceManager::start_with_transport(
            fast_scan_config(),
            Arc::new(SerialTransport::from_port(Box::new(NullPort))),
        );
        assert!(second.is_err());

        first.destroy();

        let third = DeviceManager::start_with_transport(
            fast_scan_config(),
            Arc::new(SerialTransport::from_port(Box::new(NullPort))),
        )
        .expect("start succeeds again after destroy");
        third.destroy();
    }

    #[test]
    fn health_action_escalates_at_documented_thresholds() {
        assert_eq!(health_action(0, false), HealthAction::Ok);
        assert_eq!(health_action(RX_ERROR_WARN_THRESHOLD, false), HealthAction::Ok);
        assert_eq!(health_action(RX_ERROR_WARN_THRESHOLD + 1, false), HealthAction::Warn);
        assert_eq!(health_action(RX_ERROR_WARN_THRESHOLD + 1, true), HealthAction::Ok);
        assert_eq!(health_action(RX_ERROR_FATAL_THRESHOLD + 1, false), HealthAction::Fatal);
        assert_eq!(health_action(RX_ERROR_FATAL_THRESHOLD + 1, true), HealthAction::Fatal);
    }

    /// A [`serialport::SerialPort`] stand-in that never produces bytes;
    /// enough for registry/subscriber tests that never exercise the wire.
    #[derive(Debug, Clone)]
    struct NullPort;

    impl std::io::Read for NullPort {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"))
        }
    }

    impl std::io::Write for NullPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl serialport::SerialPort for NullPort {
        fn name(&self) -> Option<String> { None }
        fn baud_rate(&self) -> serialport::Result<u32> { Ok(38400) }
        fn data_bits(&self) -> serialport::Result<serialport::DataBits> { Ok(serialport::DataBits::Eight) }
        fn flow_control(&self) -> serialport::Result<serialport::FlowControl> { Ok(serialport::FlowControl::None) }
        fn parity(&self) -> serialport::Result<serialport::Parity> { Ok(serialport::Parity::Even) }
        fn stop_bits(&self) -> serialport::Result<serialport::StopBits> { Ok(serialport::StopBits::One) }
        fn timeout(&self) -> Duration { Duration::from_millis(100) }
        fn set_baud_rate(&mut self, _: u32) -> serialport::Result<()> { Ok(()) }
        fn set_data_bits(&mut self, _: serialport::DataBits) -> serialport::Result<()> { Ok(()) }
        fn set_flow_control(&mut self, _: serialport::FlowControl) -> serialport::Result<()> { Ok(()) }
        fn set_parity(&mut self, _: serialport::Parity) -> serialport::Result<()> { Ok(()) }
        fn set_stop_bits(&mut self, _: serialport::StopBits) -> serialport::Result<()> { Ok(()) }
        fn set_timeout(&mut self, _: Duration) -> serialport::Result<()> { Ok(()) }
        fn write_request_to_send(&mut self, _: bool) -> serialport::Result<()> { Ok(()) }
        fn write_data_terminal_ready(&mut self, _: bool) -> serialport::Result<()> { Ok(()) }
        fn read_clear_to_send(&mut self) -> serialport::Result<bool> { Ok(false) }
        fn read_data_set_ready(&mut self) -> serialport::Result<bool> { Ok(false) }
        fn read_ring_indicator(&mut self) -> serialport::Result<bool> { Ok(false) }
        fn read_carrier_detect(&mut self) -> serialport::Result<bool> { Ok(false) }
        fn bytes_to_read(&self) -> serialport::Result<u32> { Ok(0) }
        fn bytes_to_write(&self) -> serialport::Result<u32> { Ok(0) }
        fn clear(&self, _: serialport::ClearBuffer) -> serialport::Result<()> { Ok(()) }
        fn try_clone(&self) -> serialport::Result<Box<dyn serialport::SerialPort>> {
            Ok(Box::new(self.clone()))
        }
        fn set_break(&self) -> serialport::Result<()> { Ok(()) }
        fn clear_break(&self) -> serialport::Result<()> { Ok(()) }
    }
}
