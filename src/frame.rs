//! Frame reassembler (L3): per-session byte-stream to sequence of complete
//! message payloads.

use crate::error::Error;

/// Minimum permitted maximum frame size, per the wire framing rules (MAX
/// must be at least 64 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 65536;

/// A single reassembled message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The message bytes.
    pub payload: Vec<u8>,
    /// Set when the payload was truncated at `max_frame_size` before its
    /// delimiter arrived. The message is still emitted, just shorter than
    /// what the sender sent.
    pub oversized: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Undecided,
    OctetCounted,
    Delimited,
}

/// Reassembles a byte stream into complete message payloads, auto-detecting
/// between octet-counted and delimited framing on the first frame of a
/// session and holding that decision for the session's remaining life.
#[derive(Debug)]
pub struct FrameReassembler {
    mode: Mode,
    buf: Vec<u8>,
    /// Only meaningful while `mode == OctetCounted`: `true` while still
    /// consuming count digits, `false` once the terminating SP has been seen
    /// and payload bytes are being copied verbatim.
    reading_count: bool,
    byte_count_pending: usize,
    count_digits_seen: u32,
    oversized: bool,

    support_octet_framing: bool,
    disable_lf_delim: bool,
    addtl_frame_delim: Option<u8>,
    max_frame_size: usize,
}

impl FrameReassembler {
    /// Creates a new reassembler for a session with the given framing
    /// policy.
    pub fn new(support_octet_framing: bool, disable_lf_delim: bool, addtl_frame_delim: Option<u8>) -> Self {
        FrameReassembler {
            mode: Mode::Undecided,
            buf: Vec::new(),
            reading_count: false,
            byte_count_pending: 0,
            count_digits_seen: 0,
            oversized: false,
            support_octet_framing,
            disable_lf_delim,
            addtl_frame_delim,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Feeds a chunk of newly received bytes through the reassembler,
    /// returning every frame completed by this chunk, in order.
    ///
    /// Partial reads are expected and handled: a chunk boundary may fall
    /// anywhere, including mid-digit or mid-delimiter.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, Error> {
        let mut frames = Vec::new();

        for &byte in chunk {
            match self.mode {
                Mode::Undecided => self.feed_undecided(byte, &mut frames)?,
                Mode::OctetCounted if self.reading_count => self.feed_count_digit(byte)?,
                Mode::OctetCounted => self.feed_octet_payload(byte, &mut frames),
                Mode::Delimited => self.feed_delimited(byte, &mut frames),
            }
        }

        Ok(frames)
    }

    fn feed_undecided(&mut self, byte: u8, frames: &mut Vec<Frame>) -> Result<(), Error> {
        if byte.is_ascii_whitespace() {
            return Ok(());
        }

        if byte.is_ascii_digit() && self.support_octet_framing {
            self.mode = Mode::OctetCounted;
            self.reading_count = true;
            self.count_digits_seen = 1;
            self.byte_count_pending = (byte - b'0') as usize;
        } else {
            self.mode = Mode::Delimited;
            self.feed_delimited(byte, frames);
        }

        Ok(())
    }

    fn feed_count_digit(&mut self, byte: u8) -> Result<(), Error> {
        if byte == b' ' {
            if self.count_digits_seen == 0 {
                return Err(Error::FrameMalformed(
                    "octet count terminated with no digits".into(),
                ));
            }
            if self.byte_count_pending == 0 {
                return Err(Error::FrameMalformed("octet count of zero".into()));
            }
            if self.byte_count_pending > self.max_frame_size {
                return Err(Error::FrameMalformed(format!(
                    "octet count {} exceeds maximum frame size {}",
                    self.byte_count_pending, self.max_frame_size
                )));
            }

            self.reading_count = false;
            return Ok(());
        }

        if !byte.is_ascii_digit() {
            return Err(Error::FrameMalformed(
                "non-digit, non-SP byte in octet count".into(),
            ));
        }

        self.count_digits_seen += 1;
        if self.count_digits_seen > 9 {
            return Err(Error::FrameMalformed(
                "octet count exceeds 9 digits without a terminating SP".into(),
            ));
        }

        self.byte_count_pending = self.byte_count_pending * 10 + (byte - b'0') as usize;

        Ok(())
    }

    fn feed_octet_payload(&mut self, byte: u8, frames: &mut Vec<Frame>) {
        self.buf.push(byte);

        if self.buf.len() == self.byte_count_pending {
            frames.push(Frame {
                payload: std::mem::take(&mut self.buf),
                oversized: false,
            });
            self.reset_to_undecided();
        }
    }

    fn feed_delimited(&mut self, byte: u8, frames: &mut Vec<Frame>) {
        let is_delim = (byte == b'\n' && !self.disable_lf_delim) || Some(byte) == self.addtl_frame_delim;

        if is_delim {
            frames.push(Frame {
                payload: std::mem::take(&mut self.buf),
                oversized: self.oversized,
            });
            self.reset_to_undecided();
            return;
        }

        if self.buf.len() < self.max_frame_size {
            self.buf.push(byte);
        } else {
            self.oversized = true;
        }
    }

    fn reset_to_undecided(&mut self) {
        self.mode = Mode::Undecided;
        self.reading_count = false;
        self.byte_count_pending = 0;
        self.count_digits_seen = 0;
        self.oversized = false;
    }

    /// Flushes any pending, incomplete frame as a final message, as done at
    /// an orderly remote close. Returns `None` if nothing is pending.
    ///
    /// Only a partially-accumulated delimited-mode buffer, or an
    /// octet-counted payload still being copied, counts as pending; a
    /// reassembler still mid-count-digits (no payload bytes collected yet)
    /// has nothing to flush.
    pub fn flush_at_close(&mut self) -> Option<Frame> {
        match self.mode {
            Mode::Delimited if !self.buf.is_empty() => Some(Frame {
                payload: std::mem::take(&mut self.buf),
                oversized: self.oversized,
            }),
            Mode::OctetCounted if !self.reading_count && !self.buf.is_empty() => Some(Frame {
                payload: std::mem::take(&mut self.buf),
                oversized: false,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads(frames: &[Frame]) -> Vec<&[u8]> {
        frames.iter().map(|f| f.payload.as_slice()).collect()
    }

    #[test]
    fn delimited_split_reads() {
        let mut r = FrameReassembler::new(true, false, None);

        let mut out = Vec::new();
        out.extend(r.feed(b"hel").unwrap());
        out.extend(r.feed(b"lo\nwo").unwrap());
        out.extend(r.feed(b"rld\n").unwrap());

        assert_eq!(payloads(&out), vec![b"hello".as_slice(), b"world"]);
    }

    #[test]
    fn octet_counted_back_to_back() {
        let mut r = FrameReassembler::new(true, false, None);

        let out = r.feed(b"5 hello7 goodbye").unwrap();

        assert_eq!(payloads(&out), vec![b"hello".as_slice(), b"goodbye"]);
    }

    #[test]
    fn autodetection_prefers_delimited_on_non_digit_lead() {
        let mut r = FrameReassembler::new(true, false, None);

        let out = r.feed(b"<13>ok\n").unwrap();

        assert_eq!(payloads(&out), vec![b"<13>ok".as_slice()]);
    }

    #[test]
    fn regular_close_flushes_partial_delimited_frame() {
        let mut r = FrameReassembler::new(true, false, None);

        assert!(r.feed(b"partial").unwrap().is_empty());

        let flushed = r.flush_at_close().unwrap();
        assert_eq!(flushed.payload, b"partial");
    }

    #[test]
    fn error_close_discards_without_flush() {
        let mut r = FrameReassembler::new(true, false, None);

        assert!(r.feed(b"partial").unwrap().is_empty());
        // Error-close simply never calls `flush_at_close`; nothing is ever
        // surfaced to the caller.
        drop(r);
    }

    #[test]
    fn octet_framing_disabled_forces_delimited() {
        let mut r = FrameReassembler::new(false, false, None);

        let out = r.feed(b"5 hello\n").unwrap();

        assert_eq!(payloads(&out), vec![b"5 hello".as_slice()]);
    }

    #[test]
    fn additional_delimiter_byte_honored() {
        let mut r = FrameReassembler::new(true, false, Some(b';'));

        let out = r.feed(b"hello;world\n").unwrap();

        assert_eq!(payloads(&out), vec![b"hello".as_slice(), b"world"]);
    }

    #[test]
    fn oversized_delimited_frame_truncated_but_emitted() {
        let mut r = FrameReassembler::new(true, false, None);
        r.max_frame_size = 8;

        let out = r.feed(b"0123456789\n").unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload, b"01234567");
        assert!(out[0].oversized);
    }

    #[test]
    fn excessive_count_digits_rejected() {
        let mut r = FrameReassembler::new(true, false, None);

        let err = r.feed(b"1234567890 ").unwrap_err();
        assert!(matches!(err, Error::FrameMalformed(_)));
    }

    #[test]
    fn zero_count_rejected() {
        let mut r = FrameReassembler::new(true, false, None);

        let err = r.feed(b"0 ").unwrap_err();
        assert!(matches!(err, Error::FrameMalformed(_)));
    }
}
