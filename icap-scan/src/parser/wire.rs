//! Byte-level framing: bounded terminator reads and chunked transfer coding.

use crate::error::{Error, IcapResult};
use std::io::{self, BufRead, Write};
use tracing::trace;

/// End of an ICAP (or HTTP) header block.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
/// Zero-length chunk closing a chunked body.
pub const CHUNKED_TERMINATOR: &[u8] = b"0\r\n\r\n";

/// Read until the accumulated bytes end with `terminator`.
///
/// Nothing past the terminator is consumed from `reader`, so a following call
/// starts exactly at the next message. Fails with
/// [`Error::ResponseTooLarge`] once `cap` bytes have been accumulated without
/// a match, and with a protocol error on EOF.
pub fn read_until<R>(reader: &mut R, terminator: &[u8], cap: usize) -> IcapResult<Vec<u8>>
where
    R: BufRead + ?Sized,
{
    debug_assert!(!terminator.is_empty());
    let mut out = Vec::with_capacity(cap.min(4096));
    loop {
        let (matched, used) = {
            let available = fill(reader)?;
            if available.is_empty() {
                return Err(crate::icap_protocol_error!(
                    "connection closed after {} bytes before terminator {:?}",
                    out.len(),
                    String::from_utf8_lossy(terminator)
                ));
            }
            let mut used = 0;
            let mut matched = false;
            for &b in available {
                out.push(b);
                used += 1;
                if out.ends_with(terminator) {
                    matched = true;
                    break;
                }
                if out.len() >= cap {
                    break;
                }
            }
            (matched, used)
        };
        reader.consume(used);

        if matched {
            trace!("read_until: {} bytes", out.len());
            return Ok(out);
        }
        if out.len() >= cap {
            return Err(Error::ResponseTooLarge { limit: cap });
        }
    }
}

fn fill<R: BufRead + ?Sized>(reader: &mut R) -> io::Result<&[u8]> {
    loop {
        match reader.fill_buf() {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
            Ok(_) => break,
        }
    }
    reader.fill_buf()
}

/// Length of each chunk when `len` bytes are split into `partitions` parts.
pub fn chunk_len(len: usize, partitions: usize) -> usize {
    len.div_ceil(partitions.max(1)).max(1)
}

/// Append one chunk (`<HEX>\r\n<data>\r\n`) to `out`.
pub fn write_chunk_into(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(format!("{:X}\r\n", data.len()).as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

/// Write `payload` as `partitions` chunks followed by the zero chunk.
///
/// Each chunk is written separately, so at most one chunk is buffered.
pub fn write_chunked<W>(writer: &mut W, payload: &[u8], partitions: usize) -> IcapResult<()>
where
    W: Write + ?Sized,
{
    if payload.is_empty() {
        return Err(Error::EmptyPayload);
    }
    if partitions == 0 {
        return Err(Error::configuration("send_partition must be at least 1"));
    }

    let size = chunk_len(payload.len(), partitions);
    let mut frame = Vec::with_capacity(size + 16);
    let mut sent = 0usize;
    for chunk in payload.chunks(size) {
        frame.clear();
        write_chunk_into(&mut frame, chunk);
        writer.write_all(&frame)?;
        sent += chunk.len();
    }
    writer.write_all(CHUNKED_TERMINATOR)?;
    writer.flush()?;
    trace!(
        "write_chunked: {} bytes in {} chunks of {}",
        sent,
        payload.len().div_ceil(size),
        size
    );
    Ok(())
}

/// Parse a single chunk: returns (next_pos, is_final_zero, size).
pub fn parse_one_chunk(buf: &[u8], from: usize) -> Option<(usize, bool, usize)> {
    let line_end = from + memchr::memmem::find(buf.get(from..)?, b"\r\n")?;
    let size_line = &buf[from..line_end];
    let size_hex = size_line.split(|&b| b == b';').next().unwrap_or(size_line);
    let size_str = std::str::from_utf8(size_hex).ok()?.trim();
    let size = usize::from_str_radix(size_str, 16).ok()?;
    let after_size = line_end + 2;
    if size == 0 {
        return Some((after_size, true, 0));
    }
    let need = after_size.checked_add(size)?.checked_add(2)?;
    if buf.len() < need || &buf[need - 2..need] != b"\r\n" {
        return None;
    }
    Some((need, false, size))
}

/// Decode a complete chunked body. Returns `None` if it is malformed or
/// lacks the zero chunk.
pub fn decode_chunked(buf: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(buf.len());
    let mut pos = 0;
    loop {
        let (next, is_final, size) = parse_one_chunk(buf, pos)?;
        if is_final {
            return Some(out);
        }
        out.extend_from_slice(&buf[next - size - 2..next - 2]);
        pos = next;
    }
}
