use embedded_svc::utils::asyncify::timer::AsyncTimer;
use esp_idf_svc::{systime::EspSystemTime, timer::EspTimer};
use esp_idf_sys::EspError;

use crate::{
    config::{CALIBRATION_FACTOR, SAMPLE_PERIOD},
    flow::PulseCounter,
    integrator::Integrator,
    report::ReadingBoard,
};

fn now_ms() -> u64 {
    EspSystemTime.now().as_millis() as u64
}

/// Closes a sampling window every [`SAMPLE_PERIOD`] and publishes the result.
pub async fn run(
    mut timer: AsyncTimer<EspTimer>,
    counter: &PulseCounter,
    board: &ReadingBoard,
) -> Result<(), EspError> {
    let mut integrator = Integrator::new(CALIBRATION_FACTOR, now_ms());
    log::info!("sampling every {SAMPLE_PERIOD:?} with calibration factor {CALIBRATION_FACTOR}");

    loop {
        timer.after(SAMPLE_PERIOD)?.await;
        let Some(reading) = integrator.sample(counter, now_ms()) else {
            log::debug!("no time elapsed since the last window, carrying {} pulses over", counter.pending());
            continue;
        };
        board.publish(reading);
        log::info!("flow rate: {:.2} L/min | total: {:.3} L", reading.flow_rate, reading.total_volume);
    }
}
