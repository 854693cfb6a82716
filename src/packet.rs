//! Wire-format definitions for protocol segments.
//!
//! A datagram exchanged between peers carries one or more back-to-back
//! segments.  This module is responsible for:
//! - Defining the on-wire binary layout (header fields, commands, payload).
//! - Serialising a [`Header`] plus payload into an output buffer.
//! - Walking a raw datagram and yielding each segment in turn, reporting
//!   malformed or truncated segments without giving up on the ones before
//!   them.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **little-endian**, which keeps the layout
//! byte-compatible with existing KCP peers.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Conversation id (conv)                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |               Token (only when the session has one)           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      cmd      |      frg      |              wnd              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Cumulative ack (una)                       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload length                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Header size: [`OVERHEAD`] = 24 bytes, plus [`TOKEN_LEN`] when a token is
//! carried.  Both peers of a conversation must agree on whether a token is
//! in use, exactly as they must agree on `conv`.  A token-presence mismatch
//! cannot be detected in general: the token bytes shift every later field,
//! and the shifted header may still decode as a plausible segment.

use thiserror::Error;

/// Byte length of the fixed header without a token.
pub const OVERHEAD: usize = 24;

/// Extra header bytes taken by the validation token.
pub const TOKEN_LEN: usize = 4;

/// Header length for a session with or without a token.
#[inline]
pub const fn header_len(with_token: bool) -> usize {
    if with_token {
        OVERHEAD + TOKEN_LEN
    } else {
        OVERHEAD
    }
}

/// Segment command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Application data.
    Push = 81,
    /// Selective acknowledgement of one sequence number.
    Ack = 82,
    /// Asks the peer for its window; sent while it advertises zero.
    WindowProbe = 83,
    /// Window update, answers a probe or announces a reopened window.
    WindowTell = 84,
}

impl Command {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            81 => Command::Push,
            82 => Command::Ack,
            83 => Command::WindowProbe,
            84 => Command::WindowTell,
            _ => return None,
        })
    }
}

/// Decoded segment header.
///
/// `len` is the payload length as carried on the wire; [`Header::encode`]
/// writes whatever is stored here, so callers keep it in sync with the
/// payload they append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub conv: u32,
    /// `Some` when the conversation carries a validation token.
    pub token: Option<u32>,
    pub cmd: Command,
    /// Fragments remaining after this one (0 = last fragment of a message).
    pub frg: u8,
    /// Advertised receive window in segments.
    pub wnd: u16,
    pub ts: u32,
    pub sn: u32,
    /// Next sequence number the sender of this segment expects.
    pub una: u32,
    pub len: u32,
}

impl Header {
    /// Number of bytes this header occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        header_len(self.token.is_some())
    }

    /// Append the serialised header to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.conv.to_le_bytes());
        if let Some(token) = self.token {
            out.extend_from_slice(&token.to_le_bytes());
        }
        out.push(self.cmd as u8);
        out.push(self.frg);
        out.extend_from_slice(&self.wnd.to_le_bytes());
        out.extend_from_slice(&self.ts.to_le_bytes());
        out.extend_from_slice(&self.sn.to_le_bytes());
        out.extend_from_slice(&self.una.to_le_bytes());
        out.extend_from_slice(&self.len.to_le_bytes());
    }
}

/// Errors that can arise when walking a raw datagram.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes left than a full header.
    #[error("segment truncated: {remaining} bytes left, header needs {needed}")]
    Truncated { remaining: usize, needed: usize },
    /// The `len` field claims more payload than the datagram holds.
    #[error("segment declares {declared} payload bytes but only {remaining} remain")]
    LengthOverrun { declared: u32, remaining: usize },
    /// The command byte is not one of [`Command`].
    #[error("unknown segment command {0}")]
    UnknownCommand(u8),
}

/// Iterator over the segments packed into one datagram.
///
/// Yields `Ok((header, payload))` per well-formed segment.  A segment with an
/// unknown command yields an error but iteration continues, since its length
/// is still known.  A truncated header or an overrunning `len` yields an
/// error and ends the iteration: nothing after that point can be located.
#[derive(Debug)]
pub struct Segments<'a> {
    buf: &'a [u8],
    with_token: bool,
    consumed: usize,
    fused: bool,
}

impl<'a> Segments<'a> {
    /// Bytes covered by the segments yielded so far, including skipped ones.
    pub fn consumed(&self) -> usize {
        self.consumed
    }
}

/// Start walking `datagram`; `with_token` selects the header layout.
pub fn segments(datagram: &[u8], with_token: bool) -> Segments<'_> {
    Segments {
        buf: datagram,
        with_token,
        consumed: 0,
        fused: false,
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Result<(Header, &'a [u8]), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fused || self.buf.is_empty() {
            return None;
        }

        let needed = header_len(self.with_token);
        if self.buf.len() < needed {
            self.fused = true;
            return Some(Err(DecodeError::Truncated {
                remaining: self.buf.len(),
                needed,
            }));
        }

        let mut r = Reader { buf: self.buf, pos: 0 };
        let conv = r.u32();
        let token = self.with_token.then(|| r.u32());
        let cmd_byte = r.u8();
        let frg = r.u8();
        let wnd = r.u16();
        let ts = r.u32();
        let sn = r.u32();
        let una = r.u32();
        let len = r.u32();

        let remaining = self.buf.len() - needed;
        if len as usize > remaining {
            self.fused = true;
            return Some(Err(DecodeError::LengthOverrun {
                declared: len,
                remaining,
            }));
        }

        let total = needed + len as usize;
        let payload = &self.buf[needed..total];
        self.buf = &self.buf[total..];
        self.consumed += total;

        let Some(cmd) = Command::from_u8(cmd_byte) else {
            return Some(Err(DecodeError::UnknownCommand(cmd_byte)));
        };

        Some(Ok((
            Header {
                conv,
                token,
                cmd,
                frg,
                wnd,
                ts,
                sn,
                una,
                len,
            },
            payload,
        )))
    }
}

/// Little-endian cursor; callers check the length up front.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn u8(&mut self) -> u8 {
        let v = self.buf[self.pos];
        self.pos += 1;
        v
    }

    fn u16(&mut self) -> u16 {
        let v = u16::from_le_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        v
    }

    fn u32(&mut self) -> u32 {
        let b = &self.buf[self.pos..self.pos + 4];
        self.pos += 4;
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_header(token: Option<u32>, sn: u32, len: u32) -> Header {
        Header {
            conv: 0x1122_3344,
            token,
            cmd: Command::Push,
            frg: 2,
            wnd: 128,
            ts: 1000,
            sn,
            una: 7,
            len,
        }
    }

    fn encode_segment(h: &Header, payload: &[u8], out: &mut Vec<u8>) {
        h.encode(out);
        out.extend_from_slice(payload);
    }

    #[test]
    fn header_len_constants() {
        // conv(4) + cmd(1) + frg(1) + wnd(2) + ts(4) + sn(4) + una(4) + len(4)
        assert_eq!(OVERHEAD, 24);
        assert_eq!(header_len(true), 28);
        assert_eq!(push_header(None, 0, 0).encoded_len(), 24);
        assert_eq!(push_header(Some(9), 0, 0).encoded_len(), 28);
    }

    #[test]
    fn fields_are_little_endian_on_wire() {
        let mut out = Vec::new();
        push_header(None, 0x0102_0304, 0).encode(&mut out);
        assert_eq!(&out[0..4], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(out[4], Command::Push as u8);
        assert_eq!(out[5], 2);
        assert_eq!(&out[12..16], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn token_sits_between_conv_and_cmd() {
        let mut out = Vec::new();
        push_header(Some(0xAABB_CCDD), 1, 0).encode(&mut out);
        assert_eq!(out.len(), 28);
        assert_eq!(&out[4..8], &[0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(out[8], Command::Push as u8);
    }

    #[test]
    fn decode_several_segments_from_one_datagram() {
        let mut dgram = Vec::new();
        encode_segment(&push_header(None, 1, 3), b"abc", &mut dgram);
        encode_segment(&push_header(None, 2, 0), b"", &mut dgram);
        encode_segment(&push_header(None, 3, 2), b"de", &mut dgram);

        let decoded: Vec<_> = segments(&dgram, false)
            .map(|r| r.expect("well-formed"))
            .collect();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].0.sn, 1);
        assert_eq!(decoded[0].1, b"abc");
        assert_eq!(decoded[1].1, b"");
        assert_eq!(decoded[2].1, b"de");
    }

    #[test]
    fn decode_with_token() {
        let mut dgram = Vec::new();
        encode_segment(&push_header(Some(42), 5, 1), b"x", &mut dgram);
        let (h, payload) = segments(&dgram, true).next().unwrap().unwrap();
        assert_eq!(h.token, Some(42));
        assert_eq!(h.sn, 5);
        assert_eq!(payload, b"x");
    }

    #[test]
    fn short_buffer_is_truncated() {
        let mut it = segments(&[0u8; OVERHEAD - 1], false);
        assert_eq!(
            it.next(),
            Some(Err(DecodeError::Truncated {
                remaining: OVERHEAD - 1,
                needed: OVERHEAD
            }))
        );
        assert_eq!(it.next(), None);
    }

    #[test]
    fn overrunning_len_stops_after_good_segments() {
        let mut dgram = Vec::new();
        encode_segment(&push_header(None, 1, 2), b"ok", &mut dgram);
        // Claims 10 bytes but only carries 3.
        encode_segment(&push_header(None, 2, 10), b"bad", &mut dgram);
        encode_segment(&push_header(None, 3, 0), b"", &mut dgram);

        let mut it = segments(&dgram, false);
        assert!(it.next().unwrap().is_ok());
        assert!(matches!(
            it.next(),
            Some(Err(DecodeError::LengthOverrun { declared: 10, .. }))
        ));
        assert_eq!(it.next(), None);
        assert_eq!(it.consumed(), OVERHEAD + 2);
    }

    #[test]
    fn unknown_command_is_skipped_not_fatal() {
        let mut dgram = Vec::new();
        encode_segment(&push_header(None, 1, 1), b"a", &mut dgram);
        let cmd_offset = dgram.len() + 4;
        encode_segment(&push_header(None, 2, 1), b"b", &mut dgram);
        dgram[cmd_offset] = 99;
        encode_segment(&push_header(None, 3, 1), b"c", &mut dgram);

        let results: Vec<_> = segments(&dgram, false).collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert_eq!(results[1], Err(DecodeError::UnknownCommand(99)));
        assert_eq!(results[2].as_ref().unwrap().0.sn, 3);
    }

    #[test]
    fn empty_datagram_yields_nothing() {
        assert_eq!(segments(&[], false).count(), 0);
    }
}
