//! Relay pulse driver for the gate.
//!
//! Both output lines are active-low: they idle HIGH and are pulled LOW for
//! [`PULSE_DURATION_MS`] to trigger the relay. The pulse is a blocking wait
//! from the caller's point of view; nothing else runs on the control path
//! until the line is back HIGH.

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use log::info;
use thiserror_no_std::Error;

use crate::config::PULSE_DURATION_MS;

/// One of the two relay control lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateLine {
    Open,
    Close,
}

impl GateLine {
    const fn verb(self) -> &'static str {
        match self {
            Self::Open => "Opening",
            Self::Close => "Closing",
        }
    }
}

/// A pin refused a level change
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    #[error("output line {0:?} rejected level change")]
    Line(GateLine),
    #[error("indicator rejected level change")]
    Indicator,
}

/// Owns the open and close lines and the delay used to time pulses.
pub struct GateActuator<P, D> {
    open: P,
    close: P,
    delay: D,
}

impl<P, D> GateActuator<P, D>
where
    P: OutputPin,
    D: DelayNs,
{
    /// Takes ownership of both lines and drives them to their idle HIGH level.
    pub fn new(open: P, close: P, delay: D) -> Result<Self, ActuatorError> {
        let mut actuator = Self { open, close, delay };
        for line in [GateLine::Open, GateLine::Close] {
            actuator
                .line(line)
                .set_high()
                .map_err(|_| ActuatorError::Line(line))?;
        }
        Ok(actuator)
    }

    fn line(&mut self, line: GateLine) -> &mut P {
        match line {
            GateLine::Open => &mut self.open,
            GateLine::Close => &mut self.close,
        }
    }

    /// Drives `line` LOW, holds it for the pulse duration, then HIGH again.
    pub async fn pulse(&mut self, line: GateLine) -> Result<(), ActuatorError> {
        info!("STARTING: {} gate...", line.verb());

        self.line(line).set_low().map_err(|_| ActuatorError::Line(line))?;
        self.delay.delay_ms(PULSE_DURATION_MS).await;
        self.line(line).set_high().map_err(|_| ActuatorError::Line(line))?;

        info!("FINISHED: {} gate...", line.verb());
        Ok(())
    }
}
