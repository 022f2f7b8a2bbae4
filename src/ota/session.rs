use core::{fmt, time::Duration};
use md5::{Digest, Md5};
use std::io::{self, ErrorKind, Read, Write};

use super::{Invitation, OtaError, OtaEvent, ACCEPT};

/// Largest read from the update host, one TCP segment.
pub const CHUNK_SIZE: usize = 1460;
/// Read timeout the transport should apply to the image stream.
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);
/// Consecutive timed-out reads tolerated before the host is considered gone.
pub const MAX_STALLS: u32 = 3;

/// Destination of a pushed image: the next OTA partition, or the storage partition.
pub trait FirmwareSink {
    type Error: fmt::Debug;

    fn write(&mut self, chunk: &[u8]) -> Result<(), Self::Error>;

    /// Validates the written image and marks it bootable.
    fn complete(self) -> Result<(), Self::Error>;

    /// Discards everything written so far.
    fn abort(self) -> Result<(), Self::Error>;
}

/// Runs one accepted update to completion.
///
/// `begin` opens the sink for the announced image and `connect` opens the stream to
/// the invitation's TCP port. The final [`OtaEvent::End`] or [`OtaEvent::Error`] is
/// emitted here; restarting into the new image is left to the caller.
pub fn update<F, S>(
    invitation: &Invitation,
    begin: impl FnOnce(&Invitation) -> Result<F, F::Error>,
    connect: impl FnOnce(u16) -> io::Result<S>,
    mut on_event: impl FnMut(OtaEvent),
) -> Result<(), OtaError>
where
    F: FirmwareSink,
    S: Read + Write,
{
    let result = run(invitation, begin, connect, &mut on_event);
    on_event(match &result {
        Ok(()) => OtaEvent::End,
        Err(err) => OtaEvent::Error(err.phase()),
    });
    result
}

fn run<F, S, H>(
    invitation: &Invitation,
    begin: impl FnOnce(&Invitation) -> Result<F, F::Error>,
    connect: impl FnOnce(u16) -> io::Result<S>,
    on_event: &mut H,
) -> Result<(), OtaError>
where
    F: FirmwareSink,
    S: Read + Write,
    H: FnMut(OtaEvent),
{
    if invitation.size == 0 {
        return Err(OtaError::EmptyImage);
    }

    let mut sink = begin(invitation).map_err(|err| OtaError::Begin(format!("{err:?}")))?;
    on_event(OtaEvent::Start(invitation.command));
    on_event(OtaEvent::Progress { received: 0, total: invitation.size });

    let mut stream = match connect(invitation.port) {
        Ok(stream) => stream,
        Err(err) => return Err(abandon(sink, OtaError::Connect(err))),
    };

    if let Err(err) = transfer(invitation, &mut sink, &mut stream, on_event) {
        reject(&mut stream, &err);
        return Err(abandon(sink, err));
    }

    if let Err(err) = sink.complete() {
        let err = OtaError::Finish(format!("{err:?}"));
        reject(&mut stream, &err);
        return Err(err);
    }

    // The image is already staged at this point, so a lost acknowledgement is not fatal.
    if let Err(err) = stream.write_all(ACCEPT).and_then(|()| stream.flush()) {
        log::warn!("could not acknowledge the completed update: {err}");
    }
    Ok(())
}

fn transfer<F, S, H>(invitation: &Invitation, sink: &mut F, stream: &mut S, on_event: &mut H) -> Result<(), OtaError>
where
    F: FirmwareSink,
    S: Read + Write,
    H: FnMut(OtaEvent),
{
    let total = invitation.size;
    let mut digest = Md5::new();
    let mut buf = [0; CHUNK_SIZE];
    let mut received = 0;
    let mut stalls = 0;

    while received < total {
        let wanted = (total - received).min(CHUNK_SIZE as u32) as usize;
        let count = match stream.read(&mut buf[..wanted]) {
            Ok(0) => return Err(OtaError::Closed { received, expected: total }),
            Ok(count) => {
                stalls = 0;
                count
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                stalls += 1;
                log::debug!("no image data for {RECEIVE_TIMEOUT:?} ({stalls}/{MAX_STALLS})");
                if stalls > MAX_STALLS {
                    return Err(OtaError::Stalled);
                }
                continue;
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(OtaError::Stream(err)),
        };

        let chunk = &buf[..count];
        sink.write(chunk).map_err(|err| OtaError::Write(format!("{err:?}")))?;
        digest.update(chunk);
        received += count as u32;

        write!(stream, "{count}").and_then(|()| stream.flush()).map_err(OtaError::Stream)?;
        on_event(OtaEvent::Progress { received, total });
    }

    if digest.finalize()[..] != invitation.md5[..] {
        return Err(OtaError::DigestMismatch);
    }
    Ok(())
}

fn abandon<F: FirmwareSink>(sink: F, err: OtaError) -> OtaError {
    if let Err(abort) = sink.abort() {
        log::warn!("could not discard the partial image: {abort:?}");
    }
    err
}

/// Best effort: the host may already be gone.
fn reject<S: Write>(stream: &mut S, err: &OtaError) {
    if write!(stream, "ERROR: {err}").and_then(|()| stream.flush()).is_err() {
        log::debug!("update host did not receive the failure notice");
    }
}
