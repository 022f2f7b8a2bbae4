use std::env;

const CREDENTIALS: [&str; 2] = ["WIFI_SSID", "WIFI_PASSWORD"];

fn main() {
    for key in CREDENTIALS {
        println!("cargo:rerun-if-env-changed={key}");
        let value = env::var(key).unwrap_or_else(|_| {
            println!("cargo:warning={key} is not set, building with an empty value");
            String::new()
        });
        println!("cargo:rustc-env={key}={value}");
    }

    // Necessary for ESP-IDF
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
