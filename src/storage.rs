use core::ffi::c_void;
use esp_idf_sys::{
    esp, esp_partition_erase_range, esp_partition_find_first, esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_DATA_SPIFFS,
    esp_partition_t, esp_partition_type_t_ESP_PARTITION_TYPE_DATA, esp_partition_write, esp_vfs_spiffs_conf_t,
    esp_vfs_spiffs_register, esp_vfs_spiffs_unregister, EspError, ESP_ERR_INVALID_STATE, ESP_ERR_NOT_FOUND, ESP_FAIL,
};
use std::ffi::CString;

use crate::{
    config::{STORAGE_BASE_PATH, STORAGE_PARTITION},
    ota::RawPartition,
};

const MAX_OPEN_FILES: usize = 4;

fn c_string(text: &str) -> Result<CString, EspError> {
    CString::new(text).map_err(|_| EspError::from_infallible::<ESP_FAIL>())
}

/// Mounts the SPIFFS partition holding the web UI at [`STORAGE_BASE_PATH`].
///
/// A partition that cannot be mounted is formatted, as a fresh board ships without one.
pub fn mount() -> Result<(), EspError> {
    let base_path = c_string(STORAGE_BASE_PATH)?;
    let label = c_string(STORAGE_PARTITION)?;
    let conf = esp_vfs_spiffs_conf_t {
        base_path: base_path.as_ptr(),
        partition_label: label.as_ptr(),
        max_files: MAX_OPEN_FILES,
        format_if_mount_failed: true,
    };

    // SAFETY: the registration copies both strings before returning.
    esp!(unsafe { esp_vfs_spiffs_register(&conf) })?;
    log::info!("SPIFFS partition {STORAGE_PARTITION} mounted at {STORAGE_BASE_PATH}");
    Ok(())
}

fn unmount() -> Result<(), EspError> {
    let label = c_string(STORAGE_PARTITION)?;
    // SAFETY: the label is only read during the call.
    match esp!(unsafe { esp_vfs_spiffs_unregister(label.as_ptr()) }) {
        Err(err) if err.code() == ESP_ERR_INVALID_STATE as i32 => {
            log::debug!("SPIFFS partition {STORAGE_PARTITION} was not mounted");
            Ok(())
        }
        other => other,
    }
}

/// The SPIFFS data partition, unmounted and open for raw writes.
///
/// The filesystem is mounted again once the image is committed or discarded.
pub struct StoragePartition {
    partition: &'static esp_partition_t,
}

impl StoragePartition {
    pub fn open() -> Result<Self, EspError> {
        let label = c_string(STORAGE_PARTITION)?;
        // SAFETY: entries of the partition table live for the whole program.
        let partition = unsafe {
            esp_partition_find_first(
                esp_partition_type_t_ESP_PARTITION_TYPE_DATA,
                esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_DATA_SPIFFS,
                label.as_ptr(),
            )
            .as_ref()
        }
        .ok_or_else(EspError::from_infallible::<ESP_ERR_NOT_FOUND>)?;

        unmount()?;
        log::info!("SPIFFS partition {STORAGE_PARTITION} unmounted for update");
        Ok(Self { partition })
    }

    fn remount(self) -> Result<(), EspError> {
        mount()
    }
}

impl RawPartition for StoragePartition {
    type Error = EspError;

    fn capacity(&self) -> u32 {
        self.partition.size
    }

    fn erase(&mut self, len: u32) -> Result<(), EspError> {
        // SAFETY: `len` never exceeds the partition size and is sector aligned or the full size.
        esp!(unsafe { esp_partition_erase_range(self.partition, 0, len as usize) })
    }

    fn write_at(&mut self, offset: u32, data: &[u8]) -> Result<(), EspError> {
        // SAFETY: the source buffer outlives the call, bounds are checked by ESP-IDF.
        esp!(unsafe {
            esp_partition_write(self.partition, offset as usize, data.as_ptr() as *const c_void, data.len())
        })
    }

    fn commit(self) -> Result<(), EspError> {
        self.remount()
    }

    fn discard(self) -> Result<(), EspError> {
        // A half written image fails to mount and is formatted away.
        self.remount()
    }
}
