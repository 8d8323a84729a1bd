//! Metadata frame codec
//!
//! Wire layout (little-endian, no padding):
//! LEAD (1) | NAME_LEN (1) | NAME (n) | FILE_LEN (w) | CHUNK (w) | TOTAL (w) | CRC (4) | TAIL (1)
//!
//! `w` is 4 or 8 depending on [`FieldWidth`]. The CRC field always occupies four
//! bytes; only the low 16 or 32 bits are significant.

use crate::protocol::{ChecksumWidth, FieldWidth, LEAD_MARKER, MAX_FILENAME_LEN, TAIL_MARKER};
use thiserror::Error;

const CHECKSUM_LEN: usize = 4;

/// The per-transfer descriptor exchanged during the handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataFrame {
    pub lead: u8,
    pub filename: Vec<u8>,
    pub file_length: u64,
    pub chunk_index: u64,
    pub total_chunks: u64,
    pub checksum: u32,
    pub tail: u8,
}

impl MetadataFrame {
    /// Build a frame with correct markers and checksum.
    pub fn new(
        filename: &[u8],
        file_length: u64,
        chunk_index: u64,
        total_chunks: u64,
        width: ChecksumWidth,
    ) -> Self {
        Self {
            lead: LEAD_MARKER,
            filename: filename.to_vec(),
            file_length,
            chunk_index,
            total_chunks,
            checksum: filename_checksum(filename, width),
            tail: TAIL_MARKER,
        }
    }

    /// Whole-file transfers always travel as chunk 1 of 1.
    pub fn whole_file(filename: &[u8], file_length: u64, width: ChecksumWidth) -> Self {
        Self::new(filename, file_length, 1, 1, width)
    }

    pub fn filename_lossy(&self) -> String {
        self.filename.iter().map(|&b| b as char).collect()
    }
}

/// `CRC32(filename)` masked to the agreed width.
pub fn filename_checksum(filename: &[u8], width: ChecksumWidth) -> u32 {
    crc32fast::hash(filename) & width.mask()
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("filename is empty")]
    EmptyFilename,

    #[error("filename is {0} bytes, limit is 255")]
    FilenameTooLong(usize),

    #[error("{field} value {value} does not fit the frame field")]
    FieldOverflow { field: &'static str, value: u64 },

    #[error("chunk {chunk} of {total} is out of order")]
    ChunkOrder { chunk: u64, total: u64 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed frame: need {needed} bytes, have {available}")]
    Malformed { needed: usize, available: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("bad lead marker 0x{0:02x}")]
    BadLead(u8),

    #[error("bad tail marker 0x{0:02x}")]
    BadTail(u8),

    #[error("filename checksum mismatch: frame carries 0x{carried:08x}, computed 0x{computed:08x}")]
    ChecksumMismatch { carried: u32, computed: u32 },

    #[error("frame carries an empty filename")]
    EmptyFilename,

    #[error("chunk {chunk} of {total} is out of range")]
    ChunkRange { chunk: u64, total: u64 },
}

/// Encoder/decoder for one configured frame schema.
#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    field_width: FieldWidth,
    checksum_width: ChecksumWidth,
}

impl FrameCodec {
    pub fn new(field_width: FieldWidth, checksum_width: ChecksumWidth) -> Self {
        Self {
            field_width,
            checksum_width,
        }
    }

    /// Total encoded size of a frame whose filename is `name_len` bytes.
    pub fn frame_len(&self, name_len: usize) -> usize {
        2 + name_len + 3 * self.field_width.bytes() + CHECKSUM_LEN + 1
    }

    /// Length a buffer must reach before it holds a whole frame, if the
    /// filename-length byte has arrived yet.
    pub fn expected_len(&self, buf: &[u8]) -> Option<usize> {
        buf.get(1).map(|&n| self.frame_len(n as usize))
    }

    /// Serialise the fields in wire order, computing the checksum over the raw
    /// filename bytes.
    pub fn encode(
        &self,
        filename: &[u8],
        file_length: u64,
        chunk_index: u64,
        total_chunks: u64,
    ) -> Result<Vec<u8>, EncodeError> {
        let frame = MetadataFrame::new(
            filename,
            file_length,
            chunk_index,
            total_chunks,
            self.checksum_width,
        );
        self.encode_frame(&frame)
    }

    /// Serialise an existing frame as-is, markers and checksum included.
    pub fn encode_frame(&self, frame: &MetadataFrame) -> Result<Vec<u8>, EncodeError> {
        let name = &frame.filename;
        if name.is_empty() {
            return Err(EncodeError::EmptyFilename);
        }
        if name.len() > MAX_FILENAME_LEN {
            return Err(EncodeError::FilenameTooLong(name.len()));
        }
        if frame.chunk_index == 0 || frame.chunk_index > frame.total_chunks {
            return Err(EncodeError::ChunkOrder {
                chunk: frame.chunk_index,
                total: frame.total_chunks,
            });
        }

        let mut buf = Vec::with_capacity(self.frame_len(name.len()));
        buf.push(frame.lead);
        buf.push(name.len() as u8);
        buf.extend_from_slice(name);
        self.put_field(&mut buf, "file length", frame.file_length)?;
        self.put_field(&mut buf, "chunk index", frame.chunk_index)?;
        self.put_field(&mut buf, "total chunks", frame.total_chunks)?;
        buf.extend_from_slice(&frame.checksum.to_le_bytes());
        buf.push(frame.tail);
        Ok(buf)
    }

    fn put_field(&self, buf: &mut Vec<u8>, field: &'static str, value: u64) -> Result<(), EncodeError> {
        if value > self.field_width.max_value() {
            return Err(EncodeError::FieldOverflow { field, value });
        }
        match self.field_width {
            FieldWidth::U32 => buf.extend_from_slice(&(value as u32).to_le_bytes()),
            FieldWidth::U64 => buf.extend_from_slice(&value.to_le_bytes()),
        }
        Ok(())
    }

    /// Slice a frame out of `buf`. Trailing bytes past the tail are ignored.
    /// Markers and checksum are not checked here, see [`FrameCodec::validate`].
    pub fn decode(&self, buf: &[u8]) -> Result<MetadataFrame, DecodeError> {
        let mut r = Reader { buf, pos: 0 };
        let lead = r.u8()?;
        let name_len = r.u8()? as usize;
        let filename = r.take(name_len)?.to_vec();
        let file_length = r.field(self.field_width)?;
        let chunk_index = r.field(self.field_width)?;
        let total_chunks = r.field(self.field_width)?;
        let checksum = u32::from_le_bytes(r.array::<CHECKSUM_LEN>()?);
        let tail = r.u8()?;
        Ok(MetadataFrame {
            lead,
            filename,
            file_length,
            chunk_index,
            total_chunks,
            checksum,
            tail,
        })
    }

    /// A frame is valid iff both markers are right, the filename is non-empty,
    /// the chunk index lies in `1..=total` and the checksum matches a fresh
    /// computation under this codec's mask.
    pub fn validate(&self, frame: &MetadataFrame) -> Result<(), ValidationError> {
        if frame.lead != LEAD_MARKER {
            return Err(ValidationError::BadLead(frame.lead));
        }
        if frame.tail != TAIL_MARKER {
            return Err(ValidationError::BadTail(frame.tail));
        }
        if frame.filename.is_empty() {
            return Err(ValidationError::EmptyFilename);
        }
        if frame.chunk_index == 0 || frame.chunk_index > frame.total_chunks {
            return Err(ValidationError::ChunkRange {
                chunk: frame.chunk_index,
                total: frame.total_chunks,
            });
        }
        let computed = filename_checksum(&frame.filename, self.checksum_width);
        if frame.checksum != computed {
            return Err(ValidationError::ChecksumMismatch {
                carried: frame.checksum,
                computed,
            });
        }
        Ok(())
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(DecodeError::Malformed {
                needed: end,
                available: self.buf.len(),
            });
        }
        let s = &self.buf[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn field(&mut self, width: FieldWidth) -> Result<u64, DecodeError> {
        match width {
            FieldWidth::U32 => Ok(u32::from_le_bytes(self.array::<4>()?) as u64),
            FieldWidth::U64 => Ok(u64::from_le_bytes(self.array::<8>()?)),
        }
    }
}
