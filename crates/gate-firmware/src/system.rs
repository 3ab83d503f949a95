use embassy_time::Instant;
use gate_core::Restart;
use gate_core::mqtt::Clock;

/// Full chip reset through the ROM reset vector
pub struct SystemReset;

impl Restart for SystemReset {
    fn restart(&mut self) -> ! {
        esp_hal::system::software_reset()
    }
}

/// Milliseconds since boot from the embassy time driver
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now_ms(&self) -> u64 {
        Instant::now().as_millis()
    }
}
