//! ANSI-aware byte scanning: chunking a stream on escape-sequence
//! boundaries and stripping sequences for the chat transport.
//!
//! The grammar recognized here is deliberately small: `ESC` alone, CSI
//! (`ESC [` … final byte in `@`–`~`), OSC (`ESC ]` … `BEL` or `ESC \`),
//! and any other two-byte `ESC x` construct. Splitting the mirrored
//! stream inside one of these corrupts cursor state on the host
//! terminal, so the chunker never emits a chunk whose tail falls inside
//! an unterminated sequence.

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

/// Ceiling on the retained tail. A well-formed sequence never gets close;
/// if a stream feeds us an unterminated prefix this large, it is flushed
/// verbatim and the receiver treats the bytes as best-effort.
pub const MAX_RETAINED: usize = 4096;

/// Outcome of scanning for an escape sequence starting at some offset.
enum Scan {
    /// Sequence is complete; next unconsumed offset.
    Complete(usize),
    /// Sequence starts here but its terminator is not in the buffer yet.
    Partial,
}

/// Scans the escape sequence starting at `start` (which must index an ESC
/// byte) and reports where it ends, or that it is still unterminated.
fn scan_sequence(buf: &[u8], start: usize) -> Scan {
    debug_assert_eq!(buf[start], ESC);
    let Some(&kind) = buf.get(start + 1) else {
        return Scan::Partial;
    };
    match kind {
        b'[' => {
            // CSI: parameter and intermediate bytes 0x20–0x3f, then a
            // final byte 0x40–0x7e.
            let mut idx = start + 2;
            while let Some(&b) = buf.get(idx) {
                match b {
                    0x20..=0x3f => idx += 1,
                    0x40..=0x7e => return Scan::Complete(idx + 1),
                    // Malformed CSI; stop treating it as a sequence.
                    _ => return Scan::Complete(idx),
                }
            }
            Scan::Partial
        }
        b']' => {
            // OSC string, terminated by BEL or ST (ESC \).
            let mut idx = start + 2;
            while idx < buf.len() {
                match buf[idx] {
                    BEL => return Scan::Complete(idx + 1),
                    ESC => {
                        if let Some(&next) = buf.get(idx + 1) {
                            if next == b'\\' {
                                return Scan::Complete(idx + 2);
                            }
                            idx += 1;
                        } else {
                            // Trailing ESC may begin the ST terminator.
                            return Scan::Partial;
                        }
                    }
                    _ => idx += 1,
                }
            }
            Scan::Partial
        }
        _ => Scan::Complete(start + 2),
    }
}

/// Splits a byte stream into chunks that never end inside a partial
/// escape sequence. The unterminated suffix of each feed is retained and
/// prepended to the next one.
#[derive(Default)]
pub struct AnsiChunker {
    tail: Vec<u8>,
}

impl AnsiChunker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds new bytes and returns the longest prefix that is safe to
    /// emit. Concatenating every returned chunk followed by the final
    /// [`Self::take_tail`] reproduces the input byte-exactly.
    pub fn feed(&mut self, new_bytes: &[u8]) -> Vec<u8> {
        let mut buf = std::mem::take(&mut self.tail);
        buf.extend_from_slice(new_bytes);

        let mut idx = 0;
        let mut partial_start = None;
        while idx < buf.len() {
            if buf[idx] != ESC {
                idx += 1;
                continue;
            }
            match scan_sequence(&buf, idx) {
                Scan::Complete(end) => idx = end,
                Scan::Partial => {
                    partial_start = Some(idx);
                    break;
                }
            }
        }

        match partial_start {
            Some(start) if buf.len() - start <= MAX_RETAINED => {
                self.tail = buf.split_off(start);
                buf
            }
            // Unterminated prefix grew past the ceiling; flush verbatim.
            _ => buf,
        }
    }

    /// Hands back whatever unterminated suffix is still buffered.
    pub fn take_tail(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.tail)
    }
}

/// Removes every escape sequence from `bytes`. Control bytes other than
/// `\n`, `\r` and `\t` are dropped as well; the remainder is the payload
/// the chat transport sees.
pub fn strip_ansi(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        let b = bytes[idx];
        if b == ESC {
            match scan_sequence(bytes, idx) {
                Scan::Complete(end) => idx = end,
                // A trailing partial only appears when stripping raw,
                // unchunked bytes; drop it.
                Scan::Partial => break,
            }
            continue;
        }
        match b {
            b'\n' | b'\r' | b'\t' => out.push(b),
            0x00..=0x1f | 0x7f => {}
            _ => out.push(b),
        }
        idx += 1;
    }
    out
}
