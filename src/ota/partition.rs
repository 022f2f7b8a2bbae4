use core::fmt;

use super::FirmwareSink;

/// Flash erase granularity.
pub const SECTOR_SIZE: u32 = 4096;

/// A raw flash region that an image is written into from its first byte.
pub trait RawPartition {
    type Error: fmt::Debug;

    /// Size of the region in bytes.
    fn capacity(&self) -> u32;

    /// Erases the first `len` bytes. `len` is a multiple of [`SECTOR_SIZE`] or the capacity.
    fn erase(&mut self, len: u32) -> Result<(), Self::Error>;

    fn write_at(&mut self, offset: u32, data: &[u8]) -> Result<(), Self::Error>;

    /// Called once the whole image is written.
    fn commit(self) -> Result<(), Self::Error>
    where
        Self: Sized,
    {
        Ok(())
    }

    /// Called when the transfer is abandoned. The region content is then undefined.
    fn discard(self) -> Result<(), Self::Error>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PartitionError<E> {
    TooLarge { size: u32, capacity: u32 },
    Overflow { offset: u32, len: usize, size: u32 },
    Incomplete { written: u32, size: u32 },
    Device(E),
}

impl<E: fmt::Debug> fmt::Display for PartitionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLarge { size, capacity } => {
                write!(f, "image of {size} bytes does not fit a {capacity} byte partition")
            }
            Self::Overflow { offset, len, size } => {
                write!(f, "write of {len} bytes at {offset} runs past the {size} byte image")
            }
            Self::Incomplete { written, size } => write!(f, "only {written} of {size} bytes were written"),
            Self::Device(err) => write!(f, "flash error: {err:?}"),
        }
    }
}

impl<E: fmt::Debug> std::error::Error for PartitionError<E> {}

/// Streams an image of a known size into a [`RawPartition`].
///
/// The region is erased up front, sector by sector, so that writes are plain appends.
#[derive(Debug)]
pub struct PartitionWriter<P> {
    partition: P,
    size: u32,
    written: u32,
}

impl<P: RawPartition> PartitionWriter<P> {
    pub fn begin(mut partition: P, size: u32) -> Result<Self, PartitionError<P::Error>> {
        let capacity = partition.capacity();
        if size > capacity {
            return Err(release(partition, PartitionError::TooLarge { size, capacity }));
        }

        let erase = size.div_ceil(SECTOR_SIZE).saturating_mul(SECTOR_SIZE).min(capacity);
        if let Err(err) = partition.erase(erase) {
            return Err(release(partition, PartitionError::Device(err)));
        }
        Ok(Self { partition, size, written: 0 })
    }

    pub fn written(&self) -> u32 {
        self.written
    }
}

fn release<P: RawPartition>(partition: P, err: PartitionError<P::Error>) -> PartitionError<P::Error> {
    if let Err(discard) = partition.discard() {
        log::warn!("could not release the partition: {discard:?}");
    }
    err
}

impl<P: RawPartition> FirmwareSink for PartitionWriter<P> {
    type Error = PartitionError<P::Error>;

    fn write(&mut self, chunk: &[u8]) -> Result<(), Self::Error> {
        let end = u32::try_from(chunk.len())
            .ok()
            .and_then(|len| self.written.checked_add(len))
            .filter(|&end| end <= self.size)
            .ok_or(PartitionError::Overflow { offset: self.written, len: chunk.len(), size: self.size })?;

        self.partition.write_at(self.written, chunk).map_err(PartitionError::Device)?;
        self.written = end;
        Ok(())
    }

    fn complete(self) -> Result<(), Self::Error> {
        if self.written != self.size {
            let (written, size) = (self.written, self.size);
            self.abort()?;
            return Err(PartitionError::Incomplete { written, size });
        }
        self.partition.commit().map_err(PartitionError::Device)
    }

    fn abort(self) -> Result<(), Self::Error> {
        self.partition.discard().map_err(PartitionError::Device)
    }
}
