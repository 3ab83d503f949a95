//! Main loop sequencing.
//!
//! Every iteration makes sure the network link is up, then the broker session,
//! then services exactly one pass of inbound traffic. Each link is
//! independently supervised; a link that cannot be recovered restarts the
//! device from inside [`RetrySupervisor::run_until`].

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use log::{info, warn};

use crate::config::IDLE_POLL_MS;
use crate::dispatcher::{Command, CommandDispatcher};
use crate::mqtt::{Clock, MqttClient, Transport};
use crate::supervisor::{Restart, RetrySupervisor, Supervised};

/// Broker session as a supervised link: an attempt connects and subscribes to
/// every command topic.
pub struct BrokerLink<'c, 'a, T, C, const N: usize> {
    client: &'c mut MqttClient<'a, T, C, N>,
}

impl<'c, 'a, T, C, const N: usize> BrokerLink<'c, 'a, T, C, N> {
    pub fn new(client: &'c mut MqttClient<'a, T, C, N>) -> Self {
        Self { client }
    }
}

impl<T, C, const N: usize> Supervised for BrokerLink<'_, '_, T, C, N>
where
    T: Transport,
    C: Clock,
{
    async fn attempt(&mut self) {
        info!("Attempting MQTT connection...");
        if let Err(err) = self.client.connect().await {
            warn!("MQTT connect error: {}", err);
            return;
        }

        info!("MQTT connected");
        for command in Command::ALL {
            if let Err(err) = self.client.subscribe(command.topic()).await {
                warn!("Subscribe to {} failed: {}", command.topic(), err);
                return;
            }
        }
    }

    fn is_satisfied(&mut self) -> bool {
        self.client.is_connected()
    }

    fn on_attempt_failed(&mut self, trial: u32) {
        warn!(
            "MQTT connection failed, rc={} (attempt {})",
            self.client.state().code(),
            trial
        );
    }
}

/// Outcome of one main-loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// No message arrived
    Idle,
    /// A message was handed to the dispatcher; holds the command that ran,
    /// `None` for an unknown topic or a failed pulse
    Delivered(Option<Command>),
}

/// Owns every long-lived component of the device.
pub struct GateController<'a, N, T, C, P, I, D, R, const BUF: usize> {
    supervisor: RetrySupervisor<D, R>,
    network: N,
    client: MqttClient<'a, T, C, BUF>,
    dispatcher: CommandDispatcher<P, I, D>,
}

impl<'a, N, T, C, P, I, D, R, const BUF: usize> GateController<'a, N, T, C, P, I, D, R, BUF>
where
    N: Supervised,
    T: Transport,
    C: Clock,
    P: OutputPin,
    I: OutputPin,
    D: DelayNs,
    R: Restart,
{
    pub fn new(
        supervisor: RetrySupervisor<D, R>,
        network: N,
        client: MqttClient<'a, T, C, BUF>,
        dispatcher: CommandDispatcher<P, I, D>,
    ) -> Self {
        Self {
            supervisor,
            network,
            client,
            dispatcher,
        }
    }

    pub fn client(&self) -> &MqttClient<'a, T, C, BUF> {
        &self.client
    }

    /// One main-loop iteration.
    pub async fn run_once(&mut self) -> Pass {
        self.supervisor.run_until(&mut self.network).await;
        self.supervisor
            .run_until(&mut BrokerLink::new(&mut self.client))
            .await;

        match self.client.poll().await {
            Ok(Some(message)) => {
                match self.dispatcher.dispatch(message.topic, message.payload).await {
                    Ok(command) => Pass::Delivered(command),
                    Err(err) => {
                        warn!("Gate command failed: {}", err);
                        Pass::Delivered(None)
                    }
                }
            }
            Ok(None) => Pass::Idle,
            Err(err) => {
                warn!("MQTT link dropped: {}", err);
                Pass::Idle
            }
        }
    }

    /// One iteration followed, when it was idle, by the short poll pause.
    async fn step(&mut self) -> Pass {
        let pass = self.run_once().await;
        if pass == Pass::Idle {
            self.supervisor.pause(IDLE_POLL_MS).await;
        }
        pass
    }

    pub async fn run(&mut self) -> ! {
        loop {
            self.step().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::GateActuator;
    use crate::mqtt::packet;
    use crate::testing::{
        MockClock, MockDelay, MockPin, MockTransport, PanicRestart, Timeline, Wire, RESTART_PANIC,
    };
    use embassy_futures::block_on;
    use embedded_hal::digital::PinState;
    use std::cell::Cell;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::rc::Rc;

    const CONNACK_OK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

    /// Network link whose state the test flips; attempts are counted.
    #[derive(Clone, Default)]
    struct Network {
        up: Rc<Cell<bool>>,
        attempts: Rc<Cell<u32>>,
    }

    impl Supervised for Network {
        async fn attempt(&mut self) {
            self.attempts.set(self.attempts.get() + 1);
        }

        fn is_satisfied(&mut self) -> bool {
            self.up.get()
        }

        fn on_attempt_failed(&mut self, _trial: u32) {}
    }

    type TestController = GateController<
        'static,
        Network,
        MockTransport,
        MockClock,
        MockPin,
        MockPin,
        MockDelay,
        PanicRestart,
        256,
    >;

    fn controller(timeline: &Timeline, wire: &Wire, network: &Network) -> TestController {
        let supervisor = RetrySupervisor::new(timeline.delay(), PanicRestart);
        let client = MqttClient::new(wire.transport(), timeline.clock(), "ESP32_Client", 15);
        let actuator =
            GateActuator::new(timeline.pin("open"), timeline.pin("close"), timeline.delay())
                .unwrap();
        let dispatcher = CommandDispatcher::new(actuator, timeline.pin("led"));
        GateController::new(supervisor, network.clone(), client, dispatcher)
    }

    fn publish(topic: &str) -> Vec<u8> {
        let mut frame = vec![0x30, (topic.len() + 2) as u8, 0x00, topic.len() as u8];
        frame.extend_from_slice(topic.as_bytes());
        frame
    }

    #[test]
    fn test_first_pass_connects_and_subscribes() {
        let timeline = Timeline::new();
        let wire = Wire::new();
        let network = Network::default();
        network.up.set(true);
        let mut controller = controller(&timeline, &wire, &network);

        wire.feed(&CONNACK_OK);
        assert_eq!(block_on(controller.run_once()), Pass::Idle);

        assert!(controller.client().is_connected());
        assert_eq!(network.attempts.get(), 0);
        let mut expected = packet::connect("ESP32_Client", 15).unwrap().to_vec();
        expected.extend_from_slice(&packet::subscribe(1, "ESP32_GATE/OPEN").unwrap());
        expected.extend_from_slice(&packet::subscribe(2, "ESP32_GATE/CLOSE").unwrap());
        assert_eq!(wire.take_outbound(), expected);
    }

    #[test]
    fn test_message_drives_gate_pulse() {
        let timeline = Timeline::new();
        let wire = Wire::new();
        let network = Network::default();
        network.up.set(true);
        let mut controller = controller(&timeline, &wire, &network);

        wire.feed(&CONNACK_OK);
        wire.feed(&publish("ESP32_GATE/OPEN"));
        assert_eq!(
            block_on(controller.run_once()),
            Pass::Delivered(Some(Command::Open))
        );

        wire.feed(&publish("ESP32_GATE/FOO"));
        assert_eq!(block_on(controller.run_once()), Pass::Delivered(None));

        wire.feed(&publish("ESP32_GATE/CLOSE"));
        assert_eq!(
            block_on(controller.run_once()),
            Pass::Delivered(Some(Command::Close))
        );

        let lows = |pin| {
            timeline
                .edges(pin)
                .iter()
                .filter(|event| event.level == PinState::Low)
                .count()
        };
        assert_eq!(lows("open"), 1);
        assert_eq!(lows("close"), 1);
        assert_eq!(wire.connects(), 1, "session reused across iterations");
    }

    #[test]
    fn test_broker_retries_until_connack() {
        let timeline = Timeline::new();
        let wire = Wire::new();
        let network = Network::default();
        network.up.set(true);
        let mut controller = controller(&timeline, &wire, &network);

        wire.refuse_connects(3);
        wire.feed(&CONNACK_OK);

        block_on(controller.run_once());

        assert!(controller.client().is_connected());
        assert_eq!(wire.connects(), 4);
        assert_eq!(timeline.delays_ms(), vec![500; 3]);
    }

    #[test]
    fn test_dead_network_restarts_before_broker() {
        let timeline = Timeline::new();
        let wire = Wire::new();
        let network = Network::default();
        let mut controller = controller(&timeline, &wire, &network);

        let result = catch_unwind(AssertUnwindSafe(|| block_on(controller.run_once())));

        let panic = result.expect_err("dead network must restart the device");
        assert_eq!(panic.downcast_ref::<&str>(), Some(&RESTART_PANIC));
        assert_eq!(network.attempts.get(), 60);
        assert_eq!(wire.connects(), 0);
        assert_eq!(timeline.delays_ms(), vec![500; 59]);
    }

    #[test]
    fn test_dead_broker_restarts_device() {
        let timeline = Timeline::new();
        let wire = Wire::new();
        let network = Network::default();
        network.up.set(true);
        let mut controller = controller(&timeline, &wire, &network);

        wire.refuse_connects(u32::MAX);
        let result = catch_unwind(AssertUnwindSafe(|| block_on(controller.run_once())));

        assert!(result.is_err());
        assert_eq!(wire.connects(), 60);
        assert_eq!(controller.client().state().code(), -2);
    }

    #[test]
    fn test_lost_session_is_reestablished_next_pass() {
        let timeline = Timeline::new();
        let wire = Wire::new();
        let network = Network::default();
        network.up.set(true);
        let mut controller = controller(&timeline, &wire, &network);

        wire.feed(&CONNACK_OK);
        block_on(controller.run_once());

        // Truncated packet: the stream ends after the header byte
        wire.feed(&[0x30]);
        assert_eq!(block_on(controller.run_once()), Pass::Idle);
        assert!(!controller.client().is_connected());

        wire.feed(&CONNACK_OK);
        wire.feed(&publish("ESP32_GATE/OPEN"));
        assert_eq!(
            block_on(controller.run_once()),
            Pass::Delivered(Some(Command::Open))
        );
        assert_eq!(wire.connects(), 2);
    }

    #[test]
    fn test_only_idle_passes_pause() {
        let timeline = Timeline::new();
        let wire = Wire::new();
        let network = Network::default();
        network.up.set(true);
        let mut controller = controller(&timeline, &wire, &network);

        wire.feed(&CONNACK_OK);
        assert_eq!(block_on(controller.step()), Pass::Idle);
        assert_eq!(timeline.delays_ms(), vec![10]);

        wire.feed(&publish("ESP32_GATE/FOO"));
        assert_eq!(block_on(controller.step()), Pass::Delivered(None));
        assert_eq!(timeline.delays_ms(), vec![10], "unknown topic still counts as delivered");

        wire.feed(&publish("ESP32_GATE/CLOSE"));
        block_on(controller.step());
        assert_eq!(timeline.delays_ms(), vec![10, 1500]);

        block_on(controller.step());
        assert_eq!(timeline.delays_ms(), vec![10, 1500, 10]);
    }
}
