//! Over-the-air updates using the espota protocol spoken by the Arduino tooling.
//!
//! The host announces an image with a UDP [`Invitation`]. The device answers `OK`,
//! connects back over TCP to pull the image, acknowledges every written chunk with its
//! length in decimal, and finally answers `OK` once the image is verified and staged.

mod invitation;
mod partition;
mod session;

#[cfg(feature = "espidf")]
pub mod listener;

pub use invitation::{Command, Invitation, InvitationError};
pub use partition::{PartitionError, PartitionWriter, RawPartition, SECTOR_SIZE};
pub use session::{update, FirmwareSink, CHUNK_SIZE, MAX_STALLS, RECEIVE_TIMEOUT};

use core::fmt;
use std::io;

/// Reply to an accepted invitation, and to a completed transfer.
pub const ACCEPT: &[u8] = b"OK";

/// Stage of an update at which it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaPhase {
    Begin,
    Connect,
    Receive,
    End,
}

impl fmt::Display for OtaPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Begin => "Begin Failed",
            Self::Connect => "Connect Failed",
            Self::Receive => "Receive Failed",
            Self::End => "End Failed",
        })
    }
}

/// Lifecycle notifications of a single update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaEvent {
    Start(Command),
    Progress { received: u32, total: u32 },
    End,
    Error(OtaPhase),
}

#[derive(Debug)]
pub enum OtaError {
    EmptyImage,
    Begin(String),
    Connect(io::Error),
    Stalled,
    Closed { received: u32, expected: u32 },
    Stream(io::Error),
    Write(String),
    DigestMismatch,
    Finish(String),
}

impl OtaError {
    pub fn phase(&self) -> OtaPhase {
        match self {
            Self::EmptyImage | Self::Begin(_) => OtaPhase::Begin,
            Self::Connect(_) => OtaPhase::Connect,
            Self::Stalled | Self::Closed { .. } | Self::Stream(_) | Self::Write(_) => OtaPhase::Receive,
            Self::DigestMismatch | Self::Finish(_) => OtaPhase::End,
        }
    }
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyImage => write!(f, "announced image is empty"),
            Self::Begin(reason) => write!(f, "could not open the target partition: {reason}"),
            Self::Connect(err) => write!(f, "could not reach the update host: {err}"),
            Self::Stalled => write!(f, "update host stopped sending data"),
            Self::Closed { received, expected } => {
                write!(f, "update host closed the stream after {received} of {expected} bytes")
            }
            Self::Stream(err) => write!(f, "failed to read the image: {err}"),
            Self::Write(reason) => write!(f, "failed to write the image: {reason}"),
            Self::DigestMismatch => write!(f, "image MD5 does not match the invitation"),
            Self::Finish(reason) => write!(f, "could not finalize the update: {reason}"),
        }
    }
}

impl std::error::Error for OtaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect(err) | Self::Stream(err) => Some(err),
            _ => None,
        }
    }
}

/// Writes [`OtaEvent`]s to the log, reporting progress once per ten percent.
#[derive(Debug, Default)]
pub struct EventLog {
    last_decile: Option<u32>,
}

impl EventLog {
    pub fn handle(&mut self, event: OtaEvent) {
        match event {
            OtaEvent::Start(command) => {
                self.last_decile = None;
                log::info!("start updating {command}");
            }
            OtaEvent::Progress { received, total } => {
                let percent = percent(received, total);
                if self.last_decile.replace(percent / 10) != Some(percent / 10) {
                    log::info!("progress: {percent}%");
                }
            }
            OtaEvent::End => log::info!("update finished"),
            OtaEvent::Error(phase) => log::error!("update error: {phase}"),
        }
    }
}

/// Share of `total` covered by `received`, clamped to 100.
pub fn percent(received: u32, total: u32) -> u32 {
    if total == 0 {
        return 100;
    }
    (u64::from(received) * 100 / u64::from(total)).min(100) as u32
}
