use embedded_svc::{ipv4, utils::asyncify::timer::AsyncTimer, wifi};
use esp_idf_svc::{
    mdns::EspMdns,
    timer::EspTimer,
    wifi::{AsyncWifi, EspWifi},
};
use esp_idf_sys::EspError;

use crate::config::{HOSTNAME, HTTP_PORT, OTA_PORT, WIFI_PASSWORD, WIFI_RETRY_INTERVAL, WIFI_SSID};

/// Joins the configured network, retrying until the association succeeds.
pub async fn init(
    wifi: &mut AsyncWifi<EspWifi<'_>>,
    timer: &mut AsyncTimer<EspTimer>,
) -> Result<ipv4::IpInfo, EspError> {
    let auth_method = if WIFI_PASSWORD.is_empty() {
        log::warn!("no Wi-Fi password configured, joining {WIFI_SSID} as an open network");
        wifi::AuthMethod::None
    } else {
        wifi::AuthMethod::WPA2Personal
    };
    wifi.set_configuration(&wifi::Configuration::Client(wifi::ClientConfiguration {
        ssid: WIFI_SSID.into(),
        password: WIFI_PASSWORD.into(),
        auth_method,
        ..Default::default()
    }))?;

    wifi.start().await?;
    log::info!("Wi-Fi started");

    let mut attempt = 1u32;
    while let Err(err) = wifi.connect().await {
        log::warn!("attempt {attempt} to join {WIFI_SSID} failed: {err}");
        attempt += 1;
        timer.after(WIFI_RETRY_INTERVAL)?.await;
    }
    log::info!("successfully connected to network");

    wifi.wait_netif_up().await?;
    let info = wifi.wifi().sta_netif().get_ip_info()?;
    let ipv4::IpInfo { ip, subnet, dns, secondary_dns } = info;
    match (dns, secondary_dns) {
        (Some(a), Some(b)) => log::info!("{ip} connected to {subnet} with DNS providers {a} and {b}"),
        (Some(dns), None) | (None, Some(dns)) => log::info!("{ip} connected to {subnet} with DNS provider {dns}"),
        _ => log::info!("{ip} connected to {subnet} without DNS providers"),
    }
    Ok(info)
}

/// Publishes the hostname along with the OTA and HTTP services.
///
/// `_arduino._tcp` is what the Arduino tooling browses for network upload targets.
pub fn advertise() -> Result<EspMdns, EspError> {
    let mut mdns = EspMdns::take()?;
    mdns.set_hostname(HOSTNAME)?;
    mdns.set_instance_name(HOSTNAME)?;
    mdns.add_service(
        None,
        "_arduino",
        "_tcp",
        OTA_PORT,
        &[("board", "esp32"), ("tcp_check", "no"), ("ssh_upload", "no"), ("auth_upload", "no")],
    )?;
    mdns.add_service(None, "_http", "_tcp", HTTP_PORT, &[("path", "/")])?;
    log::info!("advertising {HOSTNAME}.local");
    Ok(mdns)
}
