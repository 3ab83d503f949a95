#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_net::tcp::TcpSocket;
use embassy_net::{DhcpConfig, StackResources};
use embassy_time::Delay;
use esp_hal::clock::CpuClock;
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;
use log::info;
use static_cell::StaticCell;

use gate_core::mqtt::MqttClient;
use gate_core::{CommandDispatcher, GateActuator, GateController, RetrySupervisor};
use gate_firmware::broker::BrokerSocket;
use gate_firmware::hardware::init_gate_pins;
use gate_firmware::network::{WifiLink, connection_task, net_task};
use gate_firmware::system::{EmbassyClock, SystemReset};
use gate_firmware::wifi_secrets;

const SOCKET_BUFFER_SIZE: usize = 1024;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    esp_hal::system::software_reset()
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(size: 72 * 1024);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("Embassy initialized!");

    let pins = init_gate_pins(peripherals.GPIO22, peripherals.GPIO23, peripherals.GPIO2);

    static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
    let radio_init =
        RADIO.init(esp_radio::init().expect("Failed to initialize Wi-Fi/BLE controller"));
    let (wifi_controller, interfaces) =
        esp_radio::wifi::new(radio_init, peripherals.WIFI, Default::default())
            .expect("Failed to initialize Wi-Fi controller");

    let rng = Rng::new();
    let seed = (u64::from(rng.random()) << 32) | u64::from(rng.random());

    static RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(DhcpConfig::default()),
        RESOURCES.init(StackResources::new()),
        seed,
    );

    let internet = wifi_secrets::internet();
    spawner.spawn(
        connection_task(wifi_controller, internet).expect("Failed to spawn Wi-Fi connection task"),
    );
    spawner.spawn(net_task(runner).expect("Failed to spawn network stack task"));

    static RX_BUFFER: StaticCell<[u8; SOCKET_BUFFER_SIZE]> = StaticCell::new();
    static TX_BUFFER: StaticCell<[u8; SOCKET_BUFFER_SIZE]> = StaticCell::new();
    let socket = TcpSocket::new(
        stack,
        RX_BUFFER.init([0; SOCKET_BUFFER_SIZE]),
        TX_BUFFER.init([0; SOCKET_BUFFER_SIZE]),
    );

    let broker = wifi_secrets::broker();
    info!("MQTT broker: {}:{}", broker.host, broker.port);
    let transport = BrokerSocket::new(socket, stack, broker.host, broker.port);
    let client: MqttClient<'_, BrokerSocket, EmbassyClock> =
        MqttClient::new(transport, EmbassyClock, broker.client_id, broker.keep_alive_secs);

    let actuator = GateActuator::new(pins.open, pins.close, Delay)
        .expect("Failed to drive gate lines to idle");
    let dispatcher = CommandDispatcher::new(actuator, pins.indicator);

    let mut controller = GateController::new(
        RetrySupervisor::new(Delay, SystemReset),
        WifiLink::new(stack, internet.ssid),
        client,
        dispatcher,
    );

    controller.run().await
}
