//! Side-channel wire format.
//!
//! One record per captured buffer:
//!
//! ```text
//! [NTRACE:<SEND|RECV>:<fd>:<len>]<len raw bytes>[/NTRACE]\n
//! ```
//!
//! The payload is written verbatim and may itself contain `[/NTRACE]`, so a
//! reader must consume exactly `<len>` bytes after the header before it
//! looks for the terminator.  Diagnostic lines (`[NTRACE:INIT] ...`) share
//! the stream; [`FrameReader`] skips them along with any other host output.

use std::io::{self, IoSlice, Read, Write};

use libc::c_int;

use crate::error::FrameError;

pub const MAGIC: &[u8] = b"[NTRACE:";
pub const TERMINATOR: &[u8] = b"[/NTRACE]\n";

/// Room for the longest possible header,
/// `[NTRACE:SEND:-2147483648:18446744073709551615]` (46 bytes).
pub const HEADER_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Recv,
}

impl Direction {
    pub fn token(self) -> &'static str {
        match self {
            Direction::Send => "SEND",
            Direction::Recv => "RECV",
        }
    }

    pub fn from_token(token: &[u8]) -> Option<Self> {
        match token {
            b"SEND" => Some(Direction::Send),
            b"RECV" => Some(Direction::Recv),
            _ => None,
        }
    }
}

/// One observed transfer.  Borrows the caller's buffer for the duration of
/// the intercepted call.
#[derive(Debug, Clone, Copy)]
pub struct CaptureEvent<'a> {
    pub direction: Direction,
    pub fd: c_int,
    pub payload: &'a [u8],
}

impl<'a> CaptureEvent<'a> {
    pub fn new(direction: Direction, fd: c_int, payload: &'a [u8]) -> Self {
        CaptureEvent {
            direction,
            fd,
            payload,
        }
    }
}

/// Format the record header into `buf` without allocating.
pub fn encode_header<'b>(event: &CaptureEvent<'_>, buf: &'b mut [u8; HEADER_CAPACITY]) -> &'b [u8] {
    let len = {
        let mut cursor = io::Cursor::new(&mut buf[..]);
        // Cannot overflow: HEADER_CAPACITY covers the widest fd and length.
        let _ = write!(
            cursor,
            "[NTRACE:{}:{}:{}]",
            event.direction.token(),
            event.fd,
            event.payload.len()
        );
        cursor.position() as usize
    };
    &buf[..len]
}

/// Write one complete record (header, payload, terminator) and flush.
///
/// The three parts go out as a single vectored write where the sink allows
/// it; short writes and `EINTR` are retried until the record is complete.
pub fn write_frame<W: Write + ?Sized>(w: &mut W, event: &CaptureEvent<'_>) -> io::Result<()> {
    let mut header = [0u8; HEADER_CAPACITY];
    let header = encode_header(event, &mut header);
    let mut slices = [
        IoSlice::new(header),
        IoSlice::new(event.payload),
        IoSlice::new(TERMINATOR),
    ];
    write_all_vectored(w, &mut slices)?;
    w.flush()
}

pub(crate) fn write_all_vectored<W: Write + ?Sized>(
    w: &mut W,
    mut bufs: &mut [IoSlice<'_>],
) -> io::Result<()> {
    IoSlice::advance_slices(&mut bufs, 0);
    while !bufs.is_empty() {
        match w.write_vectored(bufs) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "side channel accepted no bytes",
                ))
            }
            Ok(n) => IoSlice::advance_slices(&mut bufs, n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// An owned, decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub direction: Direction,
    pub fd: c_int,
    pub payload: Vec<u8>,
}

/// Decode one record from the start of `buf`.
///
/// Returns `Ok(None)` when `buf` holds a valid but incomplete prefix of a
/// record, otherwise the frame and the number of bytes it occupied.
pub fn decode(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    if buf.len() < MAGIC.len() {
        return if MAGIC.starts_with(buf) {
            Ok(None)
        } else {
            Err(FrameError::BadMagic)
        };
    }
    if !buf.starts_with(MAGIC) {
        return Err(FrameError::BadMagic);
    }

    let window = &buf[..buf.len().min(HEADER_CAPACITY)];
    let close = match window.iter().position(|&b| b == b']') {
        Some(i) => i,
        None if buf.len() < HEADER_CAPACITY => return Ok(None),
        None => return Err(FrameError::UnterminatedHeader),
    };

    let mut fields = buf[MAGIC.len()..close].splitn(3, |&b| b == b':');
    let token = fields.next().unwrap_or_default();
    let direction = Direction::from_token(token)
        .ok_or_else(|| FrameError::BadDirection(String::from_utf8_lossy(token).into_owned()))?;
    let fd: c_int = parse_field(fields.next(), "descriptor")?;
    let len: usize = parse_field(fields.next(), "length")?;

    let body = close + 1;
    let end = body
        .checked_add(len)
        .ok_or(FrameError::BadNumber("length"))?;
    let total = end + TERMINATOR.len();
    if buf.len() < total {
        return Ok(None);
    }
    if &buf[end..total] != TERMINATOR {
        return Err(FrameError::MissingTerminator);
    }

    let frame = Frame {
        direction,
        fd,
        payload: buf[body..end].to_vec(),
    };
    Ok(Some((frame, total)))
}

fn parse_field<T: std::str::FromStr>(
    field: Option<&[u8]>,
    name: &'static str,
) -> Result<T, FrameError> {
    field
        .and_then(|f| std::str::from_utf8(f).ok())
        .and_then(|s| s.parse().ok())
        .ok_or(FrameError::BadNumber(name))
}

fn find_magic(buf: &[u8]) -> Option<usize> {
    buf.windows(MAGIC.len()).position(|w| w == MAGIC)
}

/// Iterates over the records in a byte stream, discarding anything that is
/// not a well-formed record (host output, `[NTRACE:INIT]` lines).
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
    eof: bool,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        FrameReader {
            inner,
            buf: Vec::new(),
            eof: false,
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; 4096];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = io::Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match find_magic(&self.buf) {
                Some(start) => {
                    self.buf.drain(..start);
                    match decode(&self.buf) {
                        Ok(Some((frame, used))) => {
                            self.buf.drain(..used);
                            return Some(Ok(frame));
                        }
                        Ok(None) => {}
                        Err(_) => {
                            // Not a record after all; resync past this magic.
                            self.buf.drain(..1);
                            continue;
                        }
                    }
                }
                None => {
                    // Keep a tail that could be the start of a split magic.
                    let keep = MAGIC.len() - 1;
                    if self.buf.len() > keep {
                        self.buf.drain(..self.buf.len() - keep);
                    }
                }
            }

            if self.eof {
                return None;
            }
            if let Err(e) = self.fill() {
                return Some(Err(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(direction: Direction, fd: c_int, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write_frame(&mut out, &CaptureEvent::new(direction, fd, payload)).unwrap();
        out
    }

    #[test]
    fn outbound_request_scenario() {
        let out = encoded(Direction::Send, 5, b"GET /x HTTP/1.1\r\n\r\n");
        assert_eq!(
            out,
            b"[NTRACE:SEND:5:19]GET /x HTTP/1.1\r\n\r\n[/NTRACE]\n".to_vec()
        );
    }

    #[test]
    fn inbound_response_scenario() {
        let out = encoded(Direction::Recv, 5, b"HTTP/1.1 200 OK\r\n\r\n");
        assert_eq!(
            out,
            b"[NTRACE:RECV:5:19]HTTP/1.1 200 OK\r\n\r\n[/NTRACE]\n".to_vec()
        );
    }

    #[test]
    fn header_fits_extreme_values() {
        let payload = [0u8; 0];
        let event = CaptureEvent::new(Direction::Send, c_int::MIN, &payload);
        let mut buf = [0u8; HEADER_CAPACITY];
        assert_eq!(encode_header(&event, &mut buf), b"[NTRACE:SEND:-2147483648:0]");
    }

    #[test]
    fn payload_containing_terminator_is_decoded_by_length() {
        let payload = b"POST / HTTP/1.1\r\n\r\n[/NTRACE]\n[NTRACE:RECV:1:1]x";
        let out = encoded(Direction::Send, 9, payload);
        let (frame, used) = decode(&out).unwrap().unwrap();
        assert_eq!(used, out.len());
        assert_eq!(frame.direction, Direction::Send);
        assert_eq!(frame.fd, 9);
        assert_eq!(frame.payload, payload.to_vec());
    }

    #[test]
    fn incomplete_input_asks_for_more() {
        let out = encoded(Direction::Recv, 3, b"HTTP/1.0 404 Not Found\r\n");
        for cut in [0, 4, MAGIC.len(), 15, out.len() - 1] {
            assert_eq!(decode(&out[..cut]), Ok(None), "cut at {}", cut);
        }
    }

    #[test]
    fn malformed_records_are_rejected() {
        assert_eq!(decode(b"hello world"), Err(FrameError::BadMagic));
        assert_eq!(decode(b"[NTRAX"), Err(FrameError::BadMagic));
        assert_eq!(
            decode(b"[NTRACE:INIT] Loaded send hook\n"),
            Err(FrameError::BadDirection("INIT".into()))
        );
        assert_eq!(
            decode(b"[NTRACE:SEND:x:4]GET [/NTRACE]\n"),
            Err(FrameError::BadNumber("descriptor"))
        );
        assert_eq!(
            decode(b"[NTRACE:SEND:4:]GET [/NTRACE]\n"),
            Err(FrameError::BadNumber("length"))
        );
        assert_eq!(
            decode(b"[NTRACE:RECV:4:2]ab[/NTRACX]\n"),
            Err(FrameError::MissingTerminator)
        );
        let long = [b"[NTRACE:SEND:".as_slice(), &[b'1'; 80]].concat();
        assert_eq!(decode(&long), Err(FrameError::UnterminatedHeader));
    }

    #[test]
    fn reader_skips_noise_and_init_lines() {
        let mut stream = Vec::new();
        stream.extend_from_slice(b"[NTRACE:INIT] Loaded send hook\n");
        stream.extend_from_slice(b"warning: something from the host\n");
        stream.extend(encoded(Direction::Send, 4, b"GET / HTTP/1.1\r\n\r\n"));
        stream.extend_from_slice(b"[NTRACE: not a record\n");
        stream.extend(encoded(Direction::Recv, 4, b"HTTP/1.1 204 No Content\r\n\r\n"));
        stream.extend_from_slice(b"trailing noise");

        let frames: Vec<Frame> = FrameReader::new(&stream[..])
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].direction, Direction::Send);
        assert_eq!(frames[0].payload, b"GET / HTTP/1.1\r\n\r\n".to_vec());
        assert_eq!(frames[1].direction, Direction::Recv);
        assert_eq!(frames[1].fd, 4);
    }

    /// Delivers its input one byte per `read()` call.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            match self.0.split_first() {
                Some((b, rest)) if !out.is_empty() => {
                    out[0] = *b;
                    self.0 = rest;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }
    }

    #[test]
    fn reader_reassembles_records_split_across_reads() {
        let stream = encoded(Direction::Send, 12, b"HEAD /health HTTP/1.1\r\n\r\n");
        let frames: Vec<Frame> = FrameReader::new(Trickle(&stream))
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].fd, 12);
        assert_eq!(frames[0].payload, b"HEAD /health HTTP/1.1\r\n\r\n".to_vec());
    }

    /// Accepts at most `limit` bytes per call and fails every other call with
    /// `Interrupted`.
    struct Choppy {
        out: Vec<u8>,
        limit: usize,
        interrupt: bool,
    }

    impl Write for Choppy {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.interrupt = !self.interrupt;
            if self.interrupt {
                return Err(io::ErrorKind::Interrupted.into());
            }
            let n = buf.len().min(self.limit);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn short_and_interrupted_writes_still_produce_whole_record() {
        let mut sink = Choppy {
            out: Vec::new(),
            limit: 3,
            interrupt: false,
        };
        let event = CaptureEvent::new(Direction::Recv, 7, b"HTTP/1.1 200 OK\r\n\r\nbody");
        write_frame(&mut sink, &event).unwrap();
        assert_eq!(
            sink.out,
            b"[NTRACE:RECV:7:23]HTTP/1.1 200 OK\r\n\r\nbody[/NTRACE]\n".to_vec()
        );
    }

    struct Closed;

    impl Write for Closed {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sink_accepting_nothing_is_an_error() {
        let event = CaptureEvent::new(Direction::Send, 1, b"GET / ");
        let err = write_frame(&mut Closed, &event).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }
}
