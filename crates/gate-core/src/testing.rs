//! Host-side doubles for pins, delays, clocks, transports and restarts.
//!
//! Everything that records shares one [`Timeline`] so tests can assert on the
//! relative order and virtual timestamps of pin edges and pauses.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal::digital::{
    Error as PinError, ErrorKind as PinErrorKind, ErrorType as PinErrorType, OutputPin, PinState,
};
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{ErrorKind, ErrorType, Read, ReadReady, Write};

use crate::mqtt::{Clock, Transport};
use crate::supervisor::Restart;

pub const RESTART_PANIC: &str = "device restart requested";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinEvent {
    pub pin: &'static str,
    pub level: PinState,
    pub at_ms: u64,
}

#[derive(Default)]
struct TimelineState {
    now_ns: u64,
    delays_ms: Vec<u32>,
    pin_events: Vec<PinEvent>,
}

#[derive(Clone, Default)]
pub struct Timeline(Rc<RefCell<TimelineState>>);

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&self) -> u64 {
        self.0.borrow().now_ns / 1_000_000
    }

    pub fn advance_ms(&self, ms: u64) {
        self.0.borrow_mut().now_ns += ms * 1_000_000;
    }

    pub fn delays_ms(&self) -> Vec<u32> {
        self.0.borrow().delays_ms.clone()
    }

    pub fn pin_events(&self) -> Vec<PinEvent> {
        self.0.borrow().pin_events.clone()
    }

    /// Edges recorded for one pin, skipping the initial idle level set at construction.
    pub fn edges(&self, pin: &'static str) -> Vec<PinEvent> {
        self.pin_events()
            .into_iter()
            .filter(|event| event.pin == pin)
            .skip(1)
            .collect()
    }

    pub fn delay(&self) -> MockDelay {
        MockDelay(self.clone())
    }

    pub fn pin(&self, name: &'static str) -> MockPin {
        MockPin {
            name,
            timeline: self.clone(),
            rejects_low: false,
        }
    }

    /// Pin that accepts HIGH but refuses every change to LOW.
    pub fn stuck_high_pin(&self, name: &'static str) -> MockPin {
        MockPin {
            rejects_low: true,
            ..self.pin(name)
        }
    }

    pub fn clock(&self) -> MockClock {
        MockClock(self.clone())
    }
}

/// Delay that advances virtual time instead of sleeping
pub struct MockDelay(Timeline);

impl DelayNs for MockDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.0.0.borrow_mut().now_ns += u64::from(ns);
    }

    async fn delay_ms(&mut self, ms: u32) {
        let mut state = self.0.0.borrow_mut();
        state.now_ns += u64::from(ms) * 1_000_000;
        state.delays_ms.push(ms);
    }
}

pub struct MockPin {
    name: &'static str,
    timeline: Timeline,
    rejects_low: bool,
}

#[derive(Debug)]
pub struct PinFault;

impl PinError for PinFault {
    fn kind(&self) -> PinErrorKind {
        PinErrorKind::Other
    }
}

impl MockPin {
    fn record(&mut self, level: PinState) {
        let at_ms = self.timeline.now_ms();
        self.timeline.0.borrow_mut().pin_events.push(PinEvent {
            pin: self.name,
            level,
            at_ms,
        });
    }
}

impl PinErrorType for MockPin {
    type Error = PinFault;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        if self.rejects_low {
            return Err(PinFault);
        }
        self.record(PinState::Low);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.record(PinState::High);
        Ok(())
    }
}

pub struct MockClock(Timeline);

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.0.now_ms()
    }
}

pub struct PanicRestart;

impl Restart for PanicRestart {
    fn restart(&mut self) -> ! {
        std::panic::panic_any(RESTART_PANIC)
    }
}

#[derive(Default)]
struct WireState {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    refuse_connects: u32,
    hung_up: bool,
    read_timeout: Option<u32>,
    read_timeouts: Vec<Option<u32>>,
    open: bool,
    connects: u32,
    closes: u32,
}

/// Scripted broker connection. Bytes queued with [`Wire::feed`] are what the
/// "broker" sends; everything the client writes is captured.
///
/// Reading past the queued bytes yields end of stream, except while a read
/// timeout is set, when it fails with [`ErrorKind::TimedOut`] as a silent
/// broker would.
#[derive(Clone, Default)]
pub struct Wire(Rc<RefCell<WireState>>);

impl Wire {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> MockTransport {
        MockTransport(self.clone())
    }

    pub fn feed(&self, bytes: &[u8]) {
        self.0.borrow_mut().inbound.extend(bytes.iter().copied());
    }

    pub fn take_outbound(&self) -> Vec<u8> {
        core::mem::take(&mut self.0.borrow_mut().outbound)
    }

    /// Refuse the next `count` connection attempts (`u32::MAX` for all of them).
    pub fn refuse_connects(&self, count: u32) {
        self.0.borrow_mut().refuse_connects = count;
    }

    /// Broker closes its side: reads past the queued bytes see end of stream.
    pub fn hang_up(&self) {
        self.0.borrow_mut().hung_up = true;
    }

    /// Every read timeout the client has set, in order.
    pub fn read_timeouts(&self) -> Vec<Option<u32>> {
        self.0.borrow().read_timeouts.clone()
    }

    pub fn is_open(&self) -> bool {
        self.0.borrow().open
    }

    pub fn connects(&self) -> u32 {
        self.0.borrow().connects
    }

    pub fn closes(&self) -> u32 {
        self.0.borrow().closes
    }
}

pub struct MockTransport(Wire);

impl ErrorType for MockTransport {
    type Error = ErrorKind;
}

impl Read for MockTransport {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut state = self.0.0.borrow_mut();
        if !state.open {
            return Err(ErrorKind::NotConnected);
        }
        if state.inbound.is_empty() && !state.hung_up && state.read_timeout.is_some() {
            return Err(ErrorKind::TimedOut);
        }
        let mut n = 0;
        while n < buf.len() {
            match state.inbound.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

impl ReadReady for MockTransport {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.0.0.borrow().inbound.is_empty())
    }
}

impl Write for MockTransport {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut state = self.0.0.borrow_mut();
        if !state.open {
            return Err(ErrorKind::NotConnected);
        }
        state.outbound.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), Self::Error> {
        let mut state = self.0.0.borrow_mut();
        state.connects += 1;
        if state.refuse_connects > 0 {
            if state.refuse_connects != u32::MAX {
                state.refuse_connects -= 1;
            }
            return Err(ErrorKind::ConnectionRefused);
        }
        state.open = true;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.0.0.borrow_mut();
        if state.open {
            state.closes += 1;
        }
        state.open = false;
    }

    fn set_read_timeout(&mut self, timeout_ms: Option<u32>) {
        let mut state = self.0.0.borrow_mut();
        state.read_timeout = timeout_ms;
        state.read_timeouts.push(timeout_ms);
    }
}
