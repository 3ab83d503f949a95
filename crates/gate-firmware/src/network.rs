//! Wi-Fi connectivity provider
//!
//! Association is owned by [`connection_task`], which joins the configured
//! network at startup and rejoins on its own after a disconnect. The main loop
//! only observes the result through [`WifiLink`], whose attempt is a no-op.

use embassy_net::{Runner, Stack};
use embassy_time::{Duration, Timer};
use esp_radio::wifi::{
    ClientConfig, ModeConfig, WifiController, WifiDevice, WifiEvent, WifiStaState,
};
use gate_core::Supervised;
use gate_core::config::InternetConfig;
use log::{info, warn};

/// Back-off between association attempts inside the driver task
const REJOIN_DELAY: Duration = Duration::from_millis(5000);

#[embassy_executor::task]
pub async fn connection_task(
    mut controller: WifiController<'static>,
    internet: InternetConfig<'static>,
) {
    info!("Connecting to WiFi: {}", internet.ssid);

    loop {
        if esp_radio::wifi::sta_state() == WifiStaState::Connected {
            controller.wait_for_event(WifiEvent::StaDisconnected).await;
            warn!("WiFi disconnected from {}", internet.ssid);
            Timer::after(REJOIN_DELAY).await;
        }

        if !matches!(controller.is_started(), Ok(true)) {
            let config = ModeConfig::Client(
                ClientConfig::default()
                    .with_ssid(internet.ssid.into())
                    .with_password(internet.password.into()),
            );
            if let Err(e) = controller.set_config(&config) {
                warn!("WiFi configuration rejected: {:?}", e);
                Timer::after(REJOIN_DELAY).await;
                continue;
            }
            if let Err(e) = controller.start_async().await {
                warn!("WiFi start failed: {:?}", e);
                Timer::after(REJOIN_DELAY).await;
                continue;
            }
        }

        if let Err(e) = controller.connect_async().await {
            warn!("WiFi association failed: {:?}", e);
            Timer::after(REJOIN_DELAY).await;
        }
    }
}

#[embassy_executor::task]
pub async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

/// Network link as seen by the retry supervisor: up once the interface has
/// link and a DHCP lease.
pub struct WifiLink {
    stack: Stack<'static>,
    ssid: &'static str,
    announced: bool,
}

impl WifiLink {
    pub fn new(stack: Stack<'static>, ssid: &'static str) -> Self {
        Self {
            stack,
            ssid,
            announced: false,
        }
    }
}

impl Supervised for WifiLink {
    async fn attempt(&mut self) {}

    fn is_satisfied(&mut self) -> bool {
        let up = self.stack.is_link_up() && self.stack.is_config_up();

        if up && !self.announced {
            if let Some(config) = self.stack.config_v4() {
                info!("Connected. IP: {}", config.address.address());
            }
        }
        self.announced = up;

        up
    }

    fn on_attempt_failed(&mut self, trial: u32) {
        warn!("Failed to connect to: {} (attempt {})", self.ssid, trial);
    }
}
