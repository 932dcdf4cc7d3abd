//! Log file framing using nom
//!
//! File format:
//! ```text
//! DRAG001\n
//! [version: u32 little-endian]
//! [flags: u32 little-endian, reserved]
//! ...frames...
//! ```
//!
//! Frame format (one frame per committed write batch):
//! ```text
//! [payload_len: u32 little-endian][payload: JSON write batch]\n
//! ```

use nom::{
    bytes::complete::{tag, take},
    number::complete::le_u32,
    sequence::{terminated, tuple},
    IResult,
};

use crate::error::{Error, Result};

/// Magic header for log files
pub const DRAG_MAGIC: &[u8] = b"DRAG001\n";

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

/// Header length in bytes
pub const HEADER_LEN: usize = DRAG_MAGIC.len() + 8;

/// Maximum frame payload size (256 MB)
pub const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

/// Log file header
#[derive(Debug, Clone, PartialEq)]
pub struct DragHeader {
    /// File format version
    pub version: u32,
    /// Reserved flag bits
    pub flags: u32,
}

/// Parse the log file header
pub fn parse_header(input: &[u8]) -> Result<DragHeader> {
    if input.len() < HEADER_LEN {
        return Err(Error::Parse("Input too short for header".to_string()));
    }

    let (_, (_, version, flags)) = tuple((tag(DRAG_MAGIC), le_u32, le_u32))(input)
        .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| {
            Error::Parse("Invalid DRAG magic header".to_string())
        })?;

    Ok(DragHeader { version, flags })
}

/// Create a log file header
pub fn create_header(version: u32) -> Vec<u8> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(DRAG_MAGIC);
    header.extend_from_slice(&version.to_le_bytes());
    header.extend_from_slice(&0u32.to_le_bytes());
    header
}

/// Parse a single frame, returning its payload
pub fn parse_frame(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = le_u32(input)?;
    terminated(take(len), tag("\n"))(input)
}

/// Encode a payload as a frame
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(payload.len() + 5);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    frame.push(b'\n');
    Ok(frame)
}
