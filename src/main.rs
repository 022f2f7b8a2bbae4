use embedded_svc::utils::asyncify::timer::AsyncTimer;
use esp_idf_hal::{
    gpio::{PinDriver, Pins, Pull},
    peripherals::Peripherals,
    task::executor::EspExecutor,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    nvs::EspDefaultNvsPartition,
    timer::{EspTimer, EspTimerService},
    wifi::{AsyncWifi, EspWifi},
};
use esp_idf_sys::{self as _, EspError, ESP_FAIL};
use flow_meter::{
    config,
    flow::{EdgeCapture, PulseCounter},
    http, net, ota,
    report::ReadingBoard,
    sampler, storage, task,
};
use std::sync::Arc;

static PULSES: PulseCounter = PulseCounter::new();

/// The executor only fails to spawn once its task slots are exhausted.
fn no_task_slot<E>(_: E) -> EspError {
    EspError::from_infallible::<ESP_FAIL>()
}

/// Joins the network and starts every service that depends on it.
///
/// Never returns on success, as it owns the server and the mDNS registration.
async fn bring_up(
    wifi: &mut AsyncWifi<EspWifi<'_>>,
    timer: &mut AsyncTimer<EspTimer>,
    board: Arc<ReadingBoard>,
) -> Result<(), EspError> {
    let ip = net::init(wifi, timer).await?.ip;

    let _mdns = net::advertise().map_err(|err| log::warn!("mDNS unavailable: {err}")).ok();

    let _server = http::serve(board)?;
    log::info!("open browser: http://{ip}");

    if let Err(err) = ota::listener::spawn(config::OTA_PORT) {
        log::error!("OTA listener failed to start: {err:#}");
    }

    core::future::pending().await
}

fn main() -> Result<(), EspError> {
    // It is necessary to call this function once. Otherwise some patches to the runtime
    // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
    esp_idf_sys::link_patches();

    esp_idf_svc::log::EspLogger::initialize_default();
    log::info!("booting flow meter");

    let Peripherals { modem, pins: Pins { gpio27: flow_sensor_pin, .. }, .. } =
        Peripherals::take().ok_or_else(EspError::from_infallible::<ESP_FAIL>)?;

    let mut sensor = PinDriver::input(flow_sensor_pin)?;
    sensor.set_pull(Pull::Up)?;
    let _capture = EdgeCapture::attach(sensor, &PULSES)?;
    log::info!("counting flow sensor edges on GPIO{}", config::SENSOR_GPIO);

    // The data endpoint does not depend on storage, so a failed mount only costs the UI.
    if let Err(err) = storage::mount() {
        log::error!("storage mount failed: {err}");
    }

    // Initialize other services
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;
    let timer_svc = EspTimerService::new()?;

    // Set up Wi-Fi driver
    let wifi = EspWifi::new(modem, sysloop.clone(), Some(nvs))?;
    let mut wifi = AsyncWifi::wrap(wifi, sysloop, timer_svc.clone())?;

    // Set up asynchronous timers
    let mut timer_svc = timer_svc.into_async();
    let mut retry_timer = timer_svc.timer()?;
    let sample_timer = timer_svc.timer()?;

    let board = Arc::new(ReadingBoard::new());

    // Sampling runs on its own so that no network or storage failure can stop it.
    let exec = EspExecutor::<4, _>::new();
    exec.spawn_local_detached(task::supervise("sampler", sampler::run(sample_timer, &PULSES, &board)))
        .map_err(no_task_slot)?
        .spawn_local_detached(task::supervise("network", bring_up(&mut wifi, &mut retry_timer, board.clone())))
        .map_err(no_task_slot)?;
    exec.run(|| true);

    Ok(())
}
