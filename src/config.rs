//! Build-time configuration of the meter.
//!
//! Nothing here can be changed at runtime. Wi-Fi credentials are captured from the
//! `WIFI_SSID` and `WIFI_PASSWORD` environment variables by the build script.

use core::time::Duration;

/// Station SSID to associate with.
pub const WIFI_SSID: &str = env!("WIFI_SSID");
/// Station password. Empty selects an open network.
pub const WIFI_PASSWORD: &str = env!("WIFI_PASSWORD");

/// Delay between failed association attempts.
pub const WIFI_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// YF-S201: pulse frequency (Hz) per L/min of flow.
pub const CALIBRATION_FACTOR: f64 = 4.5;

/// GPIO the sensor signal is wired to. The pin itself is taken in `main`.
pub const SENSOR_GPIO: u8 = 27;

/// Cadence of the integrator. The elapsed time is still measured on every cycle.
pub const SAMPLE_PERIOD: Duration = Duration::from_millis(100);

/// mDNS hostname, also used in the OTA service advertisement.
pub const HOSTNAME: &str = "FlowMeter-ESP32";

pub const HTTP_PORT: u16 = 80;
pub const OTA_PORT: u16 = 3232;

/// Mount point of the SPIFFS partition holding the web UI.
pub const STORAGE_BASE_PATH: &str = "/spiffs";
/// Label of the SPIFFS partition in the partition table.
pub const STORAGE_PARTITION: &str = "storage";
/// UI asset served at `/`.
pub const INDEX_FILE: &str = "/spiffs/index.html";
