//! Helper functions shared by the Git smart protocol handlers, including pkt-line parsing, pkt-line
//! encoding, subsequence scans, and response builders that honor HTTP/SSH quirks.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::GitError;

use super::types::{
    MAX_PKT_LINE_DATA_LEN, PKT_LINE_DELIM_MARKER, PKT_LINE_END_MARKER, PKT_LINE_RESPONSE_END_MARKER,
    TransportProtocol,
};

/// One frame off the wire, distinguishing the three zero-length marker packets (protocol v2's
/// delim and response-end, alongside the original flush) from an ordinary data packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// `0000` - ends a list, or a whole request/response in protocol v0/v1.
    Flush,
    /// `0001` - separates sections within a single v2 response.
    Delim,
    /// `0002` - closes out a v2 response after its final delimiter.
    ResponseEnd,
    /// A length-prefixed payload packet.
    Data(Bytes),
}

/// Read one pkt-line frame, distinguishing flush/delim/response-end markers from data and
/// rejecting the malformed shapes the bare `read_pkt_line` silently ignores: truncated length
/// prefixes, non-hex lengths, lengths below the 4-byte minimum, and payloads past the wire's
/// 65516-byte cap.
pub fn read_pkt_line_typed(bytes: &mut Bytes) -> Result<(usize, PktLine), GitError> {
    if bytes.is_empty() {
        return Ok((0, PktLine::Flush));
    }
    if bytes.len() < 4 {
        return Err(GitError::MalformedPktLine(format!(
            "truncated length prefix: only {} byte(s) available",
            bytes.len()
        )));
    }

    let prefix = bytes.copy_to_bytes(4);
    let prefix_str = core::str::from_utf8(&prefix)
        .map_err(|_| GitError::MalformedPktLine(format!("non-UTF8 length prefix: {prefix:?}")))?;
    let pkt_length = usize::from_str_radix(prefix_str, 16)
        .map_err(|_| GitError::MalformedPktLine(format!("non-hex length prefix: {prefix_str:?}")))?;

    match pkt_length {
        0 => Ok((4, PktLine::Flush)),
        1 => Ok((4, PktLine::Delim)),
        2 => Ok((4, PktLine::ResponseEnd)),
        3 => Err(GitError::MalformedPktLine(format!(
            "reserved length prefix 0003"
        ))),
        len if len < 4 => Err(GitError::MalformedPktLine(format!(
            "length prefix {len} below the 4-byte minimum"
        ))),
        len => {
            let data_length = len - 4;
            if data_length > MAX_PKT_LINE_DATA_LEN {
                return Err(GitError::PktLineTooLong(data_length));
            }
            if bytes.len() < data_length {
                return Err(GitError::MalformedPktLine(format!(
                    "truncated payload: need {data_length} bytes, have {}",
                    bytes.len()
                )));
            }
            let payload = bytes.copy_to_bytes(data_length);
            Ok((len, PktLine::Data(payload)))
        }
    }
}

/// Append a flush packet (`0000`).
pub fn write_flush(buf: &mut BytesMut) {
    buf.put(&PKT_LINE_END_MARKER[..]);
}

/// Append a delimiter packet (`0001`).
pub fn write_delim(buf: &mut BytesMut) {
    buf.put(&PKT_LINE_DELIM_MARKER[..]);
}

/// Append a response-end packet (`0002`).
pub fn write_response_end(buf: &mut BytesMut) {
    buf.put(&PKT_LINE_RESPONSE_END_MARKER[..]);
}

/// Append `data` as a length-prefixed pkt-line, rejecting payloads that would overflow the
/// 4-hex-digit length prefix's usable range.
pub fn write_pkt_line(buf: &mut BytesMut, data: &[u8]) -> Result<(), GitError> {
    if data.len() > MAX_PKT_LINE_DATA_LEN {
        return Err(GitError::PktLineTooLong(data.len()));
    }
    buf.put(Bytes::from(format!("{:04x}", data.len() + 4)));
    buf.put(data);
    Ok(())
}

/// Read a packet line from the given bytes buffer
///
/// Returns a tuple of (bytes_consumed, packet_data)
///
/// This is the original simple implementation from ceres
pub fn read_pkt_line(bytes: &mut Bytes) -> (usize, Bytes) {
    if bytes.is_empty() {
        return (0, Bytes::new());
    }

    // Ensure we have at least 4 bytes for the length prefix
    if bytes.len() < 4 {
        return (0, Bytes::new());
    }

    let pkt_length = bytes.copy_to_bytes(4);
    let pkt_length_str = match core::str::from_utf8(&pkt_length) {
        Ok(s) => s,
        Err(_) => {
            tracing::warn!("Invalid UTF-8 in packet length: {:?}", pkt_length);
            return (0, Bytes::new());
        }
    };

    let pkt_length = match usize::from_str_radix(pkt_length_str, 16) {
        Ok(len) => len,
        Err(_) => {
            tracing::warn!("Invalid hex packet length: {:?}", pkt_length_str);
            return (0, Bytes::new());
        }
    };

    if pkt_length == 0 {
        return (4, Bytes::new()); // Consumed 4 bytes for the "0000" marker
    }

    if pkt_length < 4 {
        tracing::warn!("Invalid packet length: {} (must be >= 4)", pkt_length);
        return (0, Bytes::new());
    }

    let data_length = pkt_length - 4;
    if bytes.len() < data_length {
        tracing::warn!(
            "Insufficient data: need {} bytes, have {}",
            data_length,
            bytes.len()
        );
        return (0, Bytes::new());
    }

    // this operation will change the original bytes
    let pkt_line = bytes.copy_to_bytes(data_length);
    tracing::debug!("pkt line: {:?}", pkt_line);

    (pkt_length, pkt_line)
}

/// Add a packet line string to the buffer with proper length prefix
///
/// This is the original simple implementation from ceres
pub fn add_pkt_line_string(pkt_line_stream: &mut BytesMut, buf_str: String) {
    let buf_str_length = buf_str.len() + 4;
    pkt_line_stream.put(Bytes::from(format!("{buf_str_length:04x}")));
    pkt_line_stream.put(buf_str.as_bytes());
}

/// Read until whitespace and return the extracted string
///
/// This is the original implementation from ceres
pub fn read_until_white_space(bytes: &mut Bytes) -> String {
    let mut buf = Vec::new();
    while bytes.has_remaining() {
        let c = bytes.get_u8();
        if c.is_ascii_whitespace() || c == 0 {
            break;
        }
        buf.push(c);
    }
    match String::from_utf8(buf) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Invalid UTF-8 in protocol data: {}", e);
            String::new() // Return empty string on invalid UTF-8
        }
    }
}

/// Build a smart reply packet line stream
/// 
/// This is the original simple implementation from ceres
pub fn build_smart_reply(
    transport_protocol: TransportProtocol,
    ref_list: &[String],
    service: String,
) -> BytesMut {
    let mut pkt_line_stream = BytesMut::new();
    if transport_protocol == TransportProtocol::Http {
        add_pkt_line_string(&mut pkt_line_stream, format!("# service={service}\n"));
        pkt_line_stream.put(&PKT_LINE_END_MARKER[..]);
    }

    for ref_line in ref_list {
        add_pkt_line_string(&mut pkt_line_stream, ref_line.to_string());
    }
    pkt_line_stream.put(&PKT_LINE_END_MARKER[..]);
    pkt_line_stream
}

/// Search for a subsequence in a byte slice
pub fn search_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
