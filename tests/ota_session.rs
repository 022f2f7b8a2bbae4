//! espota sessions driven against an in-memory update host and partitions.

#![cfg(not(target_os = "espidf"))]

use flow_meter::ota::{
    self, Command, FirmwareSink, Invitation, OtaError, OtaEvent, OtaPhase, PartitionWriter, RawPartition, CHUNK_SIZE,
    MAX_STALLS, SECTOR_SIZE,
};
use md5::{Digest, Md5};
use std::{
    cell::RefCell,
    collections::VecDeque,
    io::{self, ErrorKind, Read, Write},
    rc::Rc,
};

/// Update host serving a scripted sequence of reads and recording what the device sends.
#[derive(Default)]
struct Host {
    script: VecDeque<io::Result<Vec<u8>>>,
    received: Vec<u8>,
}

impl Host {
    fn serving(image: &[u8]) -> Self {
        let mut host = Self::default();
        host.script.push_back(Ok(image.to_vec()));
        host
    }

    fn replies(&self) -> String {
        String::from_utf8_lossy(&self.received).into_owned()
    }
}

impl Read for Host {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.script.pop_front() {
            None => Ok(0),
            Some(Err(err)) => Err(err),
            Some(Ok(mut data)) => {
                let count = data.len().min(buf.len());
                buf[..count].copy_from_slice(&data[..count]);
                if count < data.len() {
                    self.script.push_front(Ok(data.split_off(count)));
                }
                Ok(count)
            }
        }
    }
}

impl Write for Host {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.received.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    #[default]
    Open,
    Completed,
    Aborted,
}

#[derive(Debug, Default)]
struct Flash {
    image: Vec<u8>,
    outcome: Outcome,
}

/// Partition whose state outlives the sink consumed by the session.
#[derive(Default)]
struct Partition {
    flash: Rc<RefCell<Flash>>,
    reject_writes: bool,
    reject_complete: bool,
}

impl FirmwareSink for Partition {
    type Error = &'static str;

    fn write(&mut self, chunk: &[u8]) -> Result<(), Self::Error> {
        if self.reject_writes {
            return Err("flash write failed");
        }
        self.flash.borrow_mut().image.extend_from_slice(chunk);
        Ok(())
    }

    fn complete(self) -> Result<(), Self::Error> {
        if self.reject_complete {
            return Err("image validation failed");
        }
        self.flash.borrow_mut().outcome = Outcome::Completed;
        Ok(())
    }

    fn abort(self) -> Result<(), Self::Error> {
        self.flash.borrow_mut().outcome = Outcome::Aborted;
        Ok(())
    }
}

fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

fn invitation_for(image: &[u8]) -> Invitation {
    let mut md5 = [0; 16];
    md5.copy_from_slice(&Md5::digest(image));
    Invitation { command: Command::Flash, port: 8266, size: image.len() as u32, md5 }
}

struct Run {
    result: Result<(), OtaError>,
    events: Vec<OtaEvent>,
    host: Host,
    flash: Rc<RefCell<Flash>>,
}

fn run(invitation: &Invitation, partition: Partition, mut host: Host) -> Run {
    let flash = Rc::clone(&partition.flash);
    let mut events = Vec::new();
    let result = ota::update(invitation, |_| Ok(partition), |_| Ok(&mut host), |event| events.push(event));
    Run { result, events, host, flash }
}

#[test]
fn writes_and_acknowledges_every_chunk() {
    let image = image(2 * CHUNK_SIZE + 1080);
    let invitation = invitation_for(&image);
    let Run { result, events, host, flash } = run(&invitation, Partition::default(), Host::serving(&image));

    result.unwrap();
    assert_eq!(flash.borrow().image, image);
    assert_eq!(flash.borrow().outcome, Outcome::Completed);
    assert_eq!(host.replies(), format!("{CHUNK_SIZE}{CHUNK_SIZE}1080OK"));

    let total = invitation.size;
    assert_eq!(
        events,
        [
            OtaEvent::Start(Command::Flash),
            OtaEvent::Progress { received: 0, total },
            OtaEvent::Progress { received: CHUNK_SIZE as u32, total },
            OtaEvent::Progress { received: 2 * CHUNK_SIZE as u32, total },
            OtaEvent::Progress { received: total, total },
            OtaEvent::End,
        ]
    );
}

#[test]
fn never_reads_past_the_announced_size() {
    let image = image(100);
    let mut served = image.clone();
    served.extend_from_slice(b"trailing garbage");
    let Run { result, flash, .. } = run(&invitation_for(&image), Partition::default(), Host::serving(&served));

    result.unwrap();
    assert_eq!(flash.borrow().image, image);
}

#[test]
fn digest_mismatch_fails_at_end() {
    let image = image(512);
    let mut invitation = invitation_for(&image);
    invitation.md5[0] ^= 0xff;
    let Run { result, events, host, flash } = run(&invitation, Partition::default(), Host::serving(&image));

    let err = result.unwrap_err();
    assert!(matches!(err, OtaError::DigestMismatch));
    assert_eq!(err.phase(), OtaPhase::End);
    assert_eq!(events.last(), Some(&OtaEvent::Error(OtaPhase::End)));
    assert_eq!(flash.borrow().outcome, Outcome::Aborted);
    assert!(host.replies().starts_with("512ERROR: "), "{}", host.replies());
}

#[test]
fn early_close_fails_while_receiving() {
    let image = image(3000);
    let Run { result, events, flash, .. } = run(&invitation_for(&image), Partition::default(), Host::serving(&image[..2000]));

    match result.unwrap_err() {
        OtaError::Closed { received, expected } => {
            assert_eq!(received, 2000);
            assert_eq!(expected, 3000);
        }
        err => panic!("unexpected error: {err}"),
    }
    assert_eq!(events.last(), Some(&OtaEvent::Error(OtaPhase::Receive)));
    assert_eq!(flash.borrow().outcome, Outcome::Aborted);
}

#[test]
fn tolerates_a_few_stalls() {
    let image = image(64);
    let mut host = Host::default();
    for _ in 0..MAX_STALLS {
        host.script.push_back(Err(ErrorKind::WouldBlock.into()));
    }
    host.script.push_back(Err(ErrorKind::Interrupted.into()));
    host.script.push_back(Ok(image.clone()));

    let Run { result, flash, .. } = run(&invitation_for(&image), Partition::default(), host);
    result.unwrap();
    assert_eq!(flash.borrow().outcome, Outcome::Completed);
}

#[test]
fn gives_up_after_too_many_stalls() {
    let image = image(64);
    let mut host = Host::default();
    for _ in 0..=MAX_STALLS {
        host.script.push_back(Err(ErrorKind::TimedOut.into()));
    }
    host.script.push_back(Ok(image.clone()));

    let Run { result, flash, .. } = run(&invitation_for(&image), Partition::default(), host);
    assert!(matches!(result.unwrap_err(), OtaError::Stalled));
    assert_eq!(flash.borrow().outcome, Outcome::Aborted);
}

#[test]
fn stalls_only_count_while_consecutive() {
    let image = image(4 * CHUNK_SIZE);
    let mut host = Host::default();
    for chunk in image.chunks(CHUNK_SIZE) {
        host.script.push_back(Err(ErrorKind::TimedOut.into()));
        host.script.push_back(Ok(chunk.to_vec()));
    }

    let Run { result, host, flash, .. } = run(&invitation_for(&image), Partition::default(), host);
    result.unwrap();
    assert_eq!(flash.borrow().image, image);
    assert!(host.replies().ends_with("OK"));
}

#[test]
fn spaced_stall_bursts_below_the_limit_are_tolerated() {
    let image = image(2 * CHUNK_SIZE);
    let mut host = Host::default();
    for chunk in image.chunks(CHUNK_SIZE) {
        for _ in 0..MAX_STALLS {
            host.script.push_back(Err(ErrorKind::WouldBlock.into()));
        }
        host.script.push_back(Ok(chunk.to_vec()));
    }

    let Run { result, flash, .. } = run(&invitation_for(&image), Partition::default(), host);
    result.unwrap();
    assert_eq!(flash.borrow().outcome, Outcome::Completed);
}

#[test]
fn empty_images_are_refused_before_begin() {
    let invitation = Invitation { command: Command::Flash, port: 8266, size: 0, md5: [0; 16] };
    let mut events = Vec::new();

    let result = ota::update(
        &invitation,
        |_| -> Result<Partition, &'static str> { panic!("partition must not be opened") },
        |_| -> io::Result<Host> { panic!("host must not be contacted") },
        |event| events.push(event),
    );

    assert!(matches!(result.unwrap_err(), OtaError::EmptyImage));
    assert_eq!(events, [OtaEvent::Error(OtaPhase::Begin)]);
}

#[test]
fn stream_errors_fail_while_receiving() {
    let image = image(64);
    let mut host = Host::default();
    host.script.push_back(Err(ErrorKind::ConnectionReset.into()));

    let Run { result, .. } = run(&invitation_for(&image), Partition::default(), host);
    let err = result.unwrap_err();
    assert!(matches!(err, OtaError::Stream(_)));
    assert_eq!(err.phase(), OtaPhase::Receive);
}

#[test]
fn flash_write_failure_fails_while_receiving() {
    let image = image(64);
    let partition = Partition { reject_writes: true, ..Default::default() };
    let Run { result, flash, .. } = run(&invitation_for(&image), partition, Host::serving(&image));

    let err = result.unwrap_err();
    assert!(matches!(err, OtaError::Write(_)));
    assert_eq!(err.phase(), OtaPhase::Receive);
    assert!(flash.borrow().image.is_empty());
}

#[test]
fn finalization_failure_fails_at_end() {
    let image = image(64);
    let partition = Partition { reject_complete: true, ..Default::default() };
    let Run { result, events, host, .. } = run(&invitation_for(&image), partition, Host::serving(&image));

    assert!(matches!(result.unwrap_err(), OtaError::Finish(_)));
    assert_eq!(events.last(), Some(&OtaEvent::Error(OtaPhase::End)));
    assert!(!host.replies().ends_with("OK"));
}

#[test]
fn connect_failure_discards_the_partition() {
    let image = image(64);
    let partition = Partition::default();
    let flash = Rc::clone(&partition.flash);
    let mut events = Vec::new();

    let result = ota::update(
        &invitation_for(&image),
        |_| Ok(partition),
        |_| Err::<Host, _>(ErrorKind::ConnectionRefused.into()),
        |event| events.push(event),
    );

    assert_eq!(result.unwrap_err().phase(), OtaPhase::Connect);
    assert_eq!(flash.borrow().outcome, Outcome::Aborted);
    assert_eq!(events.first(), Some(&OtaEvent::Start(Command::Flash)));
    assert_eq!(events.last(), Some(&OtaEvent::Error(OtaPhase::Connect)));
}

/// Storage region backing filesystem updates.
#[derive(Debug, Default)]
struct Region {
    bytes: Vec<u8>,
    erased: u32,
    outcome: Outcome,
}

#[derive(Default)]
struct Storage(Rc<RefCell<Region>>);

impl RawPartition for Storage {
    type Error = &'static str;

    fn capacity(&self) -> u32 {
        self.0.borrow().bytes.len() as u32
    }

    fn erase(&mut self, len: u32) -> Result<(), Self::Error> {
        let mut region = self.0.borrow_mut();
        region.bytes[..len as usize].fill(0xff);
        region.erased = len;
        Ok(())
    }

    fn write_at(&mut self, offset: u32, data: &[u8]) -> Result<(), Self::Error> {
        let offset = offset as usize;
        self.0.borrow_mut().bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn commit(self) -> Result<(), Self::Error> {
        self.0.borrow_mut().outcome = Outcome::Completed;
        Ok(())
    }

    fn discard(self) -> Result<(), Self::Error> {
        self.0.borrow_mut().outcome = Outcome::Aborted;
        Ok(())
    }
}

fn storage(capacity: usize) -> Storage {
    Storage(Rc::new(RefCell::new(Region { bytes: vec![0; capacity], ..Region::default() })))
}

#[test]
fn filesystem_images_are_written_to_storage() {
    let image = image(CHUNK_SIZE + 300);
    let mut invitation = invitation_for(&image);
    invitation.command = Command::Filesystem;
    let storage = storage(4 * SECTOR_SIZE as usize);
    let region = Rc::clone(&storage.0);
    let mut host = Host::serving(&image);
    let mut events = Vec::new();

    let result = ota::update(
        &invitation,
        |invitation| PartitionWriter::begin(storage, invitation.size),
        |_| Ok(&mut host),
        |event| events.push(event),
    );

    result.unwrap();
    let region = region.borrow();
    assert_eq!(region.erased, SECTOR_SIZE);
    assert_eq!(&region.bytes[..image.len()], image);
    assert!(region.bytes[image.len()..SECTOR_SIZE as usize].iter().all(|&b| b == 0xff));
    assert_eq!(region.outcome, Outcome::Completed);
    assert_eq!(host.replies(), format!("{CHUNK_SIZE}300OK"));
    assert_eq!(events.first(), Some(&OtaEvent::Start(Command::Filesystem)));
    assert_eq!(events.last(), Some(&OtaEvent::End));
}

#[test]
fn filesystem_images_larger_than_storage_fail_to_begin() {
    let image = image(2 * SECTOR_SIZE as usize);
    let mut invitation = invitation_for(&image);
    invitation.command = Command::Filesystem;
    let storage = storage(SECTOR_SIZE as usize);
    let region = Rc::clone(&storage.0);
    let mut events = Vec::new();

    let result = ota::update(
        &invitation,
        |invitation| PartitionWriter::begin(storage, invitation.size),
        |_| -> io::Result<Host> { panic!("host must not be contacted") },
        |event| events.push(event),
    );

    assert!(matches!(result.unwrap_err(), OtaError::Begin(_)));
    assert_eq!(events, [OtaEvent::Error(OtaPhase::Begin)]);
    assert_eq!(region.borrow().erased, 0);
    assert_eq!(region.borrow().outcome, Outcome::Aborted);
}

#[test]
fn begin_failure_is_reported() {
    let image = image(64);
    let mut events = Vec::new();

    let result = ota::update(
        &invitation_for(&image),
        |_| Err::<Partition, _>("no OTA partition"),
        |_| -> io::Result<Host> { panic!("host must not be contacted") },
        |event| events.push(event),
    );

    let err = result.unwrap_err();
    assert!(matches!(err, OtaError::Begin(_)));
    assert_eq!(events, [OtaEvent::Error(OtaPhase::Begin)]);
}
