//! Owns a single serial port, serialising request/response exchanges and
//! accumulating partial reads across calls.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use serialport::SerialPort;

use crate::frame::{Frame, ParseOutcome};
use crate::{TransportBusy, TransportOpenError};

const LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const RX_POLL_SLICE: Duration = Duration::from_millis(100);

/// A [`Mutex`] whose `lock` can time out, backed by a [`Condvar`].
///
/// `std::sync::Mutex` has no timed acquisition; `parking_lot` would give us
/// one directly, but nothing else in this codebase needs it, so a small
/// condvar-based wrapper is used instead of pulling in a new dependency for
/// a single call site.
struct TimedMutex<T> {
    state: Mutex<(bool, T)>,
    released: Condvar,
}

impl<T> TimedMutex<T> {
    fn new(value: T) -> Self {
        TimedMutex {
            state: Mutex::new((false, value)),
            released: Condvar::new(),
        }
    }

    fn lock(&self, timeout: Duration) -> Result<TimedMutexGuard<'_, T>, TransportBusy> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.state.lock().unwrap();
        while guard.0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportBusy { timeout });
            }
            let (g, result) = self.released.wait_timeout(guard, remaining).unwrap();
            guard = g;
            if result.timed_out() && guard.0 {
                return Err(TransportBusy { timeout });
            }
        }
        guard.0 = true;
        Ok(TimedMutexGuard { mutex: self, guard: Some(guard) })
    }
}

struct TimedMutexGuard<'a, T> {
    mutex: &'a TimedMutex<T>,
    guard: Option<std::sync::MutexGuard<'a, (bool, T)>>,
}

impl<'a, T> std::ops::Deref for TimedMutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard.as_ref().unwrap().1
    }
}

impl<'a, T> std::ops::DerefMut for TimedMutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard.as_mut().unwrap().1
    }
}

impl<'a, T> Drop for TimedMutexGuard<'a, T> {
    fn drop(&mut self) {
        if let Some(mut guard) = self.guard.take() {
            guard.0 = false;
            drop(guard);
            self.mutex.released.notify_one();
        }
    }
}

struct TransportState {
    port: Option<Box<dyn SerialPort>>,
    rx_buffer: Vec<u8>,
}

/// Owns one serial port and serialises every request/response exchange
/// through it. Safe to share across threads via `Arc`.
pub struct SerialTransport {
    state: TimedMutex<TransportState>,
    rx_errors: AtomicU64,
}

impl SerialTransport {
    /// Opens `port_name` at `baud_rate`, 8 data bits, even parity, 1 stop
    /// bit, as required by the SCOM wire protocol.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, TransportOpenError> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::Even)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| TransportOpenError {
                port: port_name.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })?;

        Ok(SerialTransport {
            state: TimedMutex::new(TransportState {
                port: Some(port),
                rx_buffer: Vec::new(),
            }),
            rx_errors: AtomicU64::new(0),
        })
    }

    /// Wraps an already-open [`SerialPort`], e.g. a mock used in tests.
    pub fn from_port(port: Box<dyn SerialPort>) -> Self {
        SerialTransport {
            state: TimedMutex::new(TransportState {
                port: Some(port),
                rx_buffer: Vec::new(),
            }),
            rx_errors: AtomicU64::new(0),
        }
    }

    /// Sends `request` and waits up to `rx_timeout` for a complete,
    /// checksum-valid response frame. Returns `None` on timeout or on a
    /// response that failed to parse (both increment [`Self::rx_errors`]
    /// for the parse-failure case).
    ///
    /// Acquires the transport's exclusive lock for the duration of the
    /// exchange; `TransportBusy` is returned if the lock cannot be acquired
    /// within 10 s.
    pub fn write_frame(&self, request: &Frame, rx_timeout: Duration) -> Result<Option<Frame>, TransportBusy> {
        let mut guard = self.state.lock(LOCK_ACQUIRE_TIMEOUT)?;

        let Some(port) = guard.port.as_mut() else {
            log::warn!("scom: write attempted on closed transport");
            return Ok(None);
        };
        if let Err(e) = port.write_all(request.as_bytes()) {
            log::warn!("scom: write error: {e}");
            return Ok(None);
        }

        Ok(self.read_frame(&mut guard, rx_timeout))
    }

    fn read_frame(&self, state: &mut TransportState, rx_timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + rx_timeout;
        let mut read_buf = [0u8; 256];

        loop {
            match Frame::parse_stream(&state.rx_buffer) {
                ParseOutcome::Frame { frame, consumed } => {
                    state.rx_buffer.drain(..consumed);
                    return Some(frame);
                }
                ParseOutcome::Invalid(e) => {
                    log::warn!("scom: frame invalid: {e}");
                    self.rx_errors.fetch_add(1, Ordering::Relaxed);
                    state.rx_buffer.clear();
                    return None;
                }
                ParseOutcome::Incomplete => {}
            }

            if Instant::now() >= deadline {
                return None;
            }

            let port = state.port.as_mut()?;
            match port.read(&mut read_buf) {
                Ok(0) => {}
                Ok(n) => state.rx_buffer.extend_from_slice(&read_buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    log::warn!("scom: read error: {e}");
                    return None;
                }
            }

            std::thread::sleep(RX_POLL_SLICE.min(deadline.saturating_duration_since(Instant::now())));
        }
    }

    /// Monotonic count of responses that failed checksum/length validation
    /// since the transport was opened (or last [`Self::reset`]).
    pub fn rx_errors(&self) -> u64 {
        self.rx_errors.load(Ordering::Relaxed)
    }

    /// Clears the RX-error counter and any buffered partial-read bytes.
    pub fn reset(&self) {
        self.rx_errors.store(0, Ordering::Relaxed);
        if let Ok(mut guard) = self.state.lock(LOCK_ACQUIRE_TIMEOUT) {
            guard.rx_buffer.clear();
        }
    }

    /// Closes the underlying port by dropping it; further calls return
    /// `None` rather than erroring, matching the no-internal-retry policy.
    pub fn close(&self) {
        self.rx_errors.store(0, Ordering::Relaxed);
        if let Ok(mut guard) = self.state.lock(LOCK_ACQUIRE_TIMEOUT) {
            guard.port = None;
            guard.rx_buffer.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn timed_mutex_grants_exclusive_access() {
        let mutex = TimedMutex::new(0u32);
        {
            let mut guard = mutex.lock(Duration::from_millis(50)).unwrap();
            *guard += 1;
        }
        let guard = mutex.lock(Duration::from_millis(50)).unwrap();
        assert_eq!(*guard, 1);
    }

    #[test]
    fn timed_mutex_contended_lock_times_out() {
        let mutex = Arc::new(TimedMutex::new(0u32));
        let holder = mutex.clone();
        let held = Arc::new(std::sync::Barrier::new(2));
        let held_thread = held.clone();

        let handle = std::thread::spawn(move || {
            let _guard = holder.lock(Duration::from_secs(1)).unwrap();
            held_thread.wait();
            std::thread::sleep(Duration::from_millis(300));
        });

        held.wait();
        let result = mutex.lock(Duration::from_millis(50));
        assert!(result.is_err());

        handle.join().unwrap();
    }

    // SerialTransport::write_frame requires a live serialport::SerialPort
    // implementation and is exercised against real hardware, matching the
    // teacher crate's own hardware-dependent tests.
}
