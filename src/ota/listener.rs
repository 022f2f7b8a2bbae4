use core::time::Duration;
use esp_idf_svc::ota::{EspOta, EspOtaUpdate};
use esp_idf_sys::EspError;
use std::{
    io,
    net::{Ipv4Addr, SocketAddr, TcpStream, UdpSocket},
    thread::{self, JoinHandle},
};

use super::{Command, EventLog, FirmwareSink, Invitation, PartitionWriter, ACCEPT, RECEIVE_TIMEOUT};
use crate::storage::StoragePartition;

const STACK_SIZE: usize = 8 * 1024;

/// Next OTA partition, open for writing.
struct Partition<'a>(EspOtaUpdate<'a>);

impl FirmwareSink for Partition<'_> {
    type Error = EspError;

    fn write(&mut self, mut chunk: &[u8]) -> Result<(), EspError> {
        while !chunk.is_empty() {
            let written = self.0.write(chunk)?;
            chunk = &chunk[written..];
        }
        Ok(())
    }

    fn complete(self) -> Result<(), EspError> {
        self.0.complete()
    }

    fn abort(self) -> Result<(), EspError> {
        self.0.abort()
    }
}

/// Where an accepted image is written.
enum Target<'a> {
    App(Partition<'a>),
    Storage(PartitionWriter<StoragePartition>),
}

impl FirmwareSink for Target<'_> {
    type Error = anyhow::Error;

    fn write(&mut self, chunk: &[u8]) -> anyhow::Result<()> {
        match self {
            Self::App(partition) => partition.write(chunk)?,
            Self::Storage(writer) => writer.write(chunk)?,
        }
        Ok(())
    }

    fn complete(self) -> anyhow::Result<()> {
        match self {
            Self::App(partition) => partition.complete()?,
            Self::Storage(writer) => writer.complete()?,
        }
        Ok(())
    }

    fn abort(self) -> anyhow::Result<()> {
        match self {
            Self::App(partition) => partition.abort()?,
            Self::Storage(writer) => writer.abort()?,
        }
        Ok(())
    }
}

fn open_target<'a>(ota: &'a mut EspOta, invitation: &Invitation) -> anyhow::Result<Target<'a>> {
    Ok(match invitation.command {
        Command::Flash => Target::App(Partition(ota.initiate_update()?)),
        Command::Filesystem => Target::Storage(PartitionWriter::begin(StoragePartition::open()?, invitation.size)?),
    })
}

/// Listens for espota invitations on `port` in a dedicated thread.
pub fn spawn(port: u16) -> anyhow::Result<JoinHandle<()>> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
    let handle = thread::Builder::new()
        .name("ota".into())
        .stack_size(STACK_SIZE)
        .spawn(move || serve(socket))?;
    log::info!("OTA ready on UDP port {port}");
    Ok(handle)
}

fn serve(socket: UdpSocket) {
    let mut ota = match EspOta::new() {
        Ok(ota) => ota,
        Err(err) => {
            log::error!("OTA partitions unavailable: {err}");
            return;
        }
    };
    let mut events = EventLog::default();
    let mut buf = [0; 128];

    loop {
        let (len, host) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(err) => {
                log::warn!("failed to receive an invitation: {err}");
                continue;
            }
        };

        let invitation = match Invitation::parse(&buf[..len]) {
            Ok(invitation) => invitation,
            Err(err) => {
                log::warn!("ignoring invitation from {host}: {err}");
                continue;
            }
        };
        log::info!("{} image of {} bytes offered by {host}", invitation.command, invitation.size);

        if let Err(err) = socket.send_to(ACCEPT, host) {
            log::warn!("could not accept the invitation from {host}: {err}");
            continue;
        }

        let result = super::update(
            &invitation,
            |invitation| open_target(&mut ota, invitation),
            |port| connect(SocketAddr::new(host.ip(), port)),
            |event| events.handle(event),
        );
        match result {
            Ok(()) if invitation.command == Command::Filesystem => log::info!("web UI storage updated"),
            Ok(()) => {
                log::info!("restarting into the new image");
                thread::sleep(Duration::from_millis(100));
                esp_idf_hal::reset::restart();
            }
            Err(err) => log::warn!("update from {host} failed: {err}"),
        }
    }
}

fn connect(addr: SocketAddr) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(RECEIVE_TIMEOUT))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
