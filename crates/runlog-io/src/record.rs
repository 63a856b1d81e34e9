use std::io::{self, Write};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::masked_crc::MaskedCrc;

// Layout of a serialized record:
//  u64     length (little-endian)
//  u32     masked CRC of the length bytes
//  byte    data[length]
//  u32     masked CRC of the data
const LENGTH_CRC_OFFSET: usize = 8;
const HEADER_LENGTH: usize = LENGTH_CRC_OFFSET + 4;
const FOOTER_LENGTH: usize = 4;

/// A completely read record. The stored data checksum is as read from the
/// file (or computed at construction time) and may or may not match the
/// data; call [`Record::verify_checksum`] to find out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub data: Vec<u8>,
    data_crc: MaskedCrc,
}

/// A buffer's checksum was computed but did not match the expected value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("got {got}, want {want}")]
pub struct ChecksumError {
    pub got: MaskedCrc,
    pub want: MaskedCrc,
}

impl Record {
    /// Creates a record from a payload, computing its checksum.
    pub fn from_data(data: Vec<u8>) -> Self {
        let data_crc = MaskedCrc::compute(&data);
        Record { data, data_crc }
    }

    /// Creates a record with a pre-computed checksum, which is not
    /// validated.
    pub fn with_checksum(data: Vec<u8>, data_crc: MaskedCrc) -> Self {
        Record { data, data_crc }
    }

    /// Validates the record's integrity by recomputing the data CRC and
    /// comparing it against the stored value.
    pub fn verify_checksum(&self) -> Result<(), ChecksumError> {
        let got = MaskedCrc::compute(&self.data);
        let want = self.data_crc;
        if got == want {
            Ok(())
        } else {
            Err(ChecksumError { got, want })
        }
    }

    /// Writes the serialized form of this record. The stored data checksum
    /// is used as-is, so writing a corrupt record produces a corrupt frame.
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let length_field = (self.data.len() as u64).to_le_bytes();
        writer.write_all(&length_field)?;
        writer.write_all(&MaskedCrc::compute(&length_field).0.to_le_bytes())?;
        writer.write_all(&self.data)?;
        writer.write_all(&self.data_crc.0.to_le_bytes())?;
        Ok(())
    }

    /// Number of bytes [`Record::write`] would produce.
    pub fn byte_size(&self) -> usize {
        HEADER_LENGTH + self.data.len() + FOOTER_LENGTH
    }
}

#[derive(Debug, Error)]
pub enum ReadRecordError {
    /// Length field failed its checksum; nothing after it can be trusted.
    #[error("length CRC mismatch; cannot read rest of file: {0}")]
    BadLengthCrc(ChecksumError),
    /// No hard error so far, but the record is incomplete. Call
    /// [`read_record`] again with the same state once the file may have
    /// grown.
    #[error("record truncated; more data may arrive later")]
    Truncated,
    /// Declared payload length does not fit in memory on this system.
    #[error("record too large for this system: {0} bytes")]
    TooLarge(u64),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ReadRecordError {
    /// Whether this error ends reading of the file for good. Truncation is
    /// the one resumable case.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ReadRecordError::Truncated)
    }
}

/// Reentrant parse state for [`read_record`]. Fresh for each record; carried
/// across calls while a record is truncated so that no byte is read twice.
#[derive(Debug)]
pub enum RecordState {
    /// Accumulating the 12-byte header.
    Header(Vec<u8>),
    /// Header verified; accumulating `target` bytes of payload plus footer.
    Body { body: Vec<u8>, target: usize },
}

impl Default for RecordState {
    fn default() -> Self {
        RecordState::Header(Vec::with_capacity(HEADER_LENGTH))
    }
}

/// Attempts to read one record, behaving nicely in the face of truncation.
///
/// If the underlying reader runs dry mid-record, the bytes consumed so far
/// stay in `state` and the result is [`ReadRecordError::Truncated`]; a later
/// call with the same state and a reader positioned where this one stopped
/// picks up exactly where it left off.
///
/// The length field is always validated against its checksum before the
/// payload buffer is allocated; the payload itself is validated only when
/// the caller asks via [`Record::verify_checksum`].
pub async fn read_record<R: AsyncRead + Unpin>(
    state: &mut RecordState,
    reader: &mut R,
) -> Result<Record, ReadRecordError> {
    loop {
        match state {
            RecordState::Header(header) => {
                read_to_target(reader, header, HEADER_LENGTH).await?;

                let mut length_bytes = [0u8; 8];
                length_bytes.copy_from_slice(&header[..LENGTH_CRC_OFFSET]);
                let mut crc_bytes = [0u8; 4];
                crc_bytes.copy_from_slice(&header[LENGTH_CRC_OFFSET..]);

                let want = MaskedCrc(u32::from_le_bytes(crc_bytes));
                let got = MaskedCrc::compute(&length_bytes);
                if got != want {
                    return Err(ReadRecordError::BadLengthCrc(ChecksumError { got, want }));
                }

                let length = u64::from_le_bytes(length_bytes);
                let target = length
                    .checked_add(FOOTER_LENGTH as u64)
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or(ReadRecordError::TooLarge(length))?;
                *state = RecordState::Body {
                    body: Vec::with_capacity(target),
                    target,
                };
            }
            RecordState::Body { body, target } => {
                let target = *target;
                read_to_target(reader, body, target).await?;

                let footer = body.split_off(target - FOOTER_LENGTH);
                let data = std::mem::take(body);
                let mut crc_bytes = [0u8; 4];
                crc_bytes.copy_from_slice(&footer);
                let record = Record::with_checksum(data, MaskedCrc(u32::from_le_bytes(crc_bytes)));
                *state = RecordState::default();
                return Ok(record);
            }
        }
    }
}

/// Reads until `buf` holds `target` bytes. A zero-byte read before that is a
/// truncation; `buf` keeps what was read.
async fn read_to_target<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    target: usize,
) -> Result<(), ReadRecordError> {
    let mut chunk = [0u8; 4096];
    while buf.len() < target {
        let want = (target - buf.len()).min(chunk.len());
        let n = reader.read(&mut chunk[..want]).await?;
        if n == 0 {
            return Err(ReadRecordError::Truncated);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(())
}
