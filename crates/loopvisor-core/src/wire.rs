//! Byte codec for values crossing a process boundary
//!
//! Values sent through a cross-process queue are written as one frame:
//!
//! ```text
//! 0x00: len      (u32, little endian) - payload length
//! 0x04: payload  (len bytes)          - WireCodec::encode output
//! ```
//!
//! Integers are little endian; strings are a `u32` length followed by
//! UTF-8 bytes.

use std::borrow::Cow;

use crate::constants::MAX_FRAME_SIZE;
use crate::error::WireError;
use crate::fault::{ErrorReport, FaultKind, FaultPhase, RemoteFault};

/// Size of the frame length prefix
pub const FRAME_HEADER_SIZE: usize = 4;

/// A value that can be written to and read back from a frame payload
pub trait WireCodec: Sized {
    fn encode(&self, out: &mut Vec<u8>);

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, WireError>;
}

/// Cursor over a frame payload
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < len {
            return Err(WireError::Truncated);
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.read_bytes(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.read_bytes(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_str(&mut self) -> Result<&'a str, WireError> {
        let len = self.read_u32()? as usize;
        std::str::from_utf8(self.read_bytes(len)?).map_err(|_| WireError::InvalidUtf8)
    }
}

#[inline]
pub fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

#[inline]
pub fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn put_str(out: &mut Vec<u8>, s: &str) {
    put_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

/// Encode `value` as a complete frame (header + payload)
pub fn encode_frame<T: WireCodec>(value: &T) -> Result<Vec<u8>, WireError> {
    let mut frame = vec![0u8; FRAME_HEADER_SIZE];
    value.encode(&mut frame);
    let payload_len = frame.len() - FRAME_HEADER_SIZE;
    if payload_len > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge(payload_len));
    }
    frame[..FRAME_HEADER_SIZE].copy_from_slice(&(payload_len as u32).to_le_bytes());
    Ok(frame)
}

/// Parse a frame header, rejecting oversized frames
pub fn frame_len(header: [u8; FRAME_HEADER_SIZE]) -> Result<usize, WireError> {
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge(len));
    }
    Ok(len)
}

/// Decode a payload (frame without its header)
pub fn decode_payload<T: WireCodec>(payload: &[u8]) -> Result<T, WireError> {
    let mut reader = WireReader::new(payload);
    T::decode(&mut reader)
}

impl WireCodec for u8 {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(*self);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        reader.read_u8()
    }
}

impl WireCodec for u32 {
    fn encode(&self, out: &mut Vec<u8>) {
        put_u32(out, *self);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        reader.read_u32()
    }
}

impl WireCodec for u64 {
    fn encode(&self, out: &mut Vec<u8>) {
        put_u64(out, *self);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        reader.read_u64()
    }
}

impl WireCodec for i64 {
    fn encode(&self, out: &mut Vec<u8>) {
        put_u64(out, *self as u64);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(reader.read_u64()? as i64)
    }
}

impl WireCodec for String {
    fn encode(&self, out: &mut Vec<u8>) {
        put_str(out, self);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(reader.read_str()?.to_owned())
    }
}

/// Appended to a string cut short to fit a frame
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Fixed part of an encoded `ErrorReport`: two tags and three length prefixes
const ERROR_REPORT_OVERHEAD: usize = 2 + 3 * 4;

/// Cut `s` to at most `limit` bytes on a char boundary, marking the cut
fn clip(s: &str, limit: usize) -> Cow<'_, str> {
    if s.len() <= limit {
        return Cow::Borrowed(s);
    }
    let mut cut = limit.saturating_sub(TRUNCATION_MARKER.len());
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    Cow::Owned(format!("{}{}", &s[..cut], TRUNCATION_MARKER))
}

/// Error reports lose their concrete error type on the wire: the receiving
/// side gets a [`RemoteFault`] carrying the original `Display` and `Debug`
/// text, plus the trace rendered in the child.
///
/// The encoding always fits in one frame. Message and detail are capped at a
/// quarter of [`MAX_FRAME_SIZE`] each, and the trace gets what is left.
impl WireCodec for ErrorReport {
    fn encode(&self, out: &mut Vec<u8>) {
        let message = self.message();
        let detail = format!("{:?}", self.error());
        let message = clip(&message, MAX_FRAME_SIZE / 4);
        let detail = clip(&detail, MAX_FRAME_SIZE / 4);
        let trace_budget = MAX_FRAME_SIZE - ERROR_REPORT_OVERHEAD - message.len() - detail.len();

        out.push(self.phase() as u8);
        out.push(self.kind() as u8);
        put_str(out, &message);
        put_str(out, &detail);
        put_str(out, &clip(self.formatted_stack_trace(), trace_budget));
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        let phase = FaultPhase::from_u8(reader.read_u8()?)?;
        let kind = FaultKind::from_u8(reader.read_u8()?)?;
        let message = reader.read_str()?;
        let detail = reader.read_str()?;
        let trace = reader.read_str()?.to_owned();
        Ok(ErrorReport::from_parts(
            phase,
            kind,
            Box::new(RemoteFault::new(message, detail)),
            trace,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::PanicFault;

    fn payload_of(frame: &[u8]) -> &[u8] {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&frame[..FRAME_HEADER_SIZE]);
        let len = frame_len(header).unwrap();
        assert_eq!(len, frame.len() - FRAME_HEADER_SIZE);
        &frame[FRAME_HEADER_SIZE..]
    }

    #[test]
    fn test_frame_header_matches_payload() {
        let frame = encode_frame(&String::from("hello")).unwrap();
        assert_eq!(frame.len(), FRAME_HEADER_SIZE + 4 + 5);
        let decoded: String = decode_payload(payload_of(&frame)).unwrap();
        assert_eq!(decoded, "hello");
    }

    #[test]
    fn test_error_report_becomes_remote_fault() {
        let report = ErrorReport::capture(
            FaultPhase::Iteration,
            FaultKind::Panic,
            Box::new(PanicFault::new("test message")),
        );
        let trace = report.formatted_stack_trace().to_owned();

        let frame = encode_frame(&report).unwrap();
        let decoded: ErrorReport = decode_payload(payload_of(&frame)).unwrap();

        assert_eq!(decoded.phase(), FaultPhase::Iteration);
        assert_eq!(decoded.kind(), FaultKind::Panic);
        assert_eq!(decoded.message(), "test message");
        assert_eq!(decoded.formatted_stack_trace(), trace);

        let remote = decoded.into_error().downcast::<RemoteFault>().unwrap();
        assert_eq!(remote.detail(), "PanicFault { message: \"test message\" }");
    }

    #[test]
    fn test_truncated_payload() {
        let frame = encode_frame(&42u64).unwrap();
        let payload = &frame[FRAME_HEADER_SIZE..frame.len() - 1];
        assert_eq!(decode_payload::<u64>(payload), Err(WireError::Truncated));
    }

    #[test]
    fn test_bad_tag_and_utf8() {
        assert_eq!(
            decode_payload::<ErrorReport>(&[9, 0]).unwrap_err(),
            WireError::InvalidTag(9)
        );

        let mut bad = Vec::new();
        put_u32(&mut bad, 2);
        bad.extend_from_slice(&[0xff, 0xfe]);
        assert_eq!(decode_payload::<String>(&bad), Err(WireError::InvalidUtf8));
    }

    #[test]
    fn test_oversized_header_rejected() {
        let header = ((MAX_FRAME_SIZE + 1) as u32).to_le_bytes();
        assert_eq!(frame_len(header), Err(WireError::FrameTooLarge(MAX_FRAME_SIZE + 1)));
    }

    #[test]
    fn test_oversized_error_report_still_fits_a_frame() {
        // Multi-byte chars so the cut has to find a char boundary
        let huge = "é".repeat(MAX_FRAME_SIZE);
        let report = ErrorReport::from_parts(
            FaultPhase::Iteration,
            FaultKind::Error,
            Box::new(RemoteFault::new(huge.clone(), "Detail")),
            huge,
        );

        let frame = encode_frame(&report).unwrap();
        assert!(frame.len() <= FRAME_HEADER_SIZE + MAX_FRAME_SIZE);

        let decoded: ErrorReport = decode_payload(payload_of(&frame)).unwrap();
        assert_eq!(decoded.phase(), FaultPhase::Iteration);
        assert!(decoded.message().ends_with(TRUNCATION_MARKER));
        assert!(decoded.message().len() <= MAX_FRAME_SIZE / 4);
        assert!(decoded.formatted_stack_trace().starts_with("éé"));
        assert!(decoded.formatted_stack_trace().ends_with(TRUNCATION_MARKER));

        let remote = decoded.into_error().downcast::<RemoteFault>().unwrap();
        assert_eq!(remote.detail(), "Detail");
    }

    #[test]
    fn test_clip_keeps_short_strings() {
        assert!(matches!(clip("short", 5), Cow::Borrowed("short")));
        assert_eq!(clip("abcdefghijklmnopqrstuvwxyz", 20), "abcdef...[truncated]");
    }
}
