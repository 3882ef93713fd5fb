//! RESP2 encoding and incremental parsing
//!
//! Commands are always sent as arrays of bulk strings, so keys and values
//! stay binary safe. Replies are decoded incrementally from the read buffer;
//! an incomplete frame yields `Ok(None)` and the caller reads more bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::store::StoreError;

/// Largest bulk string accepted from a server (512MB, Redis proto-max-bulk-len)
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Largest array accepted from a server
const MAX_ARRAY_LEN: usize = 64 * 1024 * 1024;

/// Deepest nesting accepted from a server
const MAX_DEPTH: usize = 32;

/// RESP2 reply frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Simple string: `+OK\r\n`
    Simple(String),
    /// Error: `-ERR message\r\n`
    Error(String),
    /// Integer: `:1000\r\n`
    Integer(i64),
    /// Bulk string, `None` for `$-1\r\n`
    Bulk(Option<Bytes>),
    /// Array, `None` for `*-1\r\n`
    Array(Option<Vec<Frame>>),
}

impl Frame {
    /// Convert an error reply into `StoreError::Command`, pass anything else
    pub fn into_result(self) -> Result<Frame, StoreError> {
        match self {
            Frame::Error(msg) => Err(StoreError::Command(msg)),
            other => Ok(other),
        }
    }

    /// Interpret as an integer reply
    pub fn into_integer(self) -> Result<i64, StoreError> {
        match self.into_result()? {
            Frame::Integer(n) => Ok(n),
            other => Err(unexpected("integer", &other)),
        }
    }

    /// Interpret as a bulk string, `None` for nil
    pub fn into_bulk(self) -> Result<Option<Bytes>, StoreError> {
        match self.into_result()? {
            Frame::Bulk(b) => Ok(b),
            Frame::Simple(s) => Ok(Some(Bytes::from(s))),
            other => Err(unexpected("bulk string", &other)),
        }
    }

    /// Interpret as a status or bulk reply rendered as text
    pub fn into_text(self) -> Result<String, StoreError> {
        match self.into_result()? {
            Frame::Simple(s) => Ok(s),
            Frame::Bulk(Some(b)) => Ok(String::from_utf8_lossy(&b).into_owned()),
            other => Err(unexpected("status", &other)),
        }
    }

    /// Interpret as an array of bulk strings; nil arrays are empty
    pub fn into_bulk_array(self) -> Result<Vec<Bytes>, StoreError> {
        match self.into_result()? {
            Frame::Array(None) => Ok(Vec::new()),
            Frame::Array(Some(items)) => items
                .into_iter()
                .map(|item| {
                    item.into_bulk()?
                        .ok_or_else(|| StoreError::Protocol("nil element in array".into()))
                })
                .collect(),
            other => Err(unexpected("array", &other)),
        }
    }

    /// Interpret as an array of frames
    pub fn into_array(self) -> Result<Vec<Frame>, StoreError> {
        match self.into_result()? {
            Frame::Array(items) => Ok(items.unwrap_or_default()),
            other => Err(unexpected("array", &other)),
        }
    }
}

#[cold]
fn unexpected(expected: &str, got: &Frame) -> StoreError {
    StoreError::Protocol(format!("expected {} reply, got {:?}", expected, got))
}

/// Append one command, encoded as an array of bulk strings, to `out`.
pub fn encode_command(args: &[Bytes], out: &mut BytesMut) {
    out.put_u8(b'*');
    out.put_slice(args.len().to_string().as_bytes());
    out.put_slice(b"\r\n");
    for arg in args {
        out.put_u8(b'$');
        out.put_slice(arg.len().to_string().as_bytes());
        out.put_slice(b"\r\n");
        out.put_slice(arg);
        out.put_slice(b"\r\n");
    }
}

/// Resumable RESP2 reply decoder.
///
/// Each complete element is split off the buffer as soon as it arrives, and
/// arrays under construction are kept on a stack between calls. A reply
/// delivered over many reads is therefore scanned once, however large it is.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Arrays still waiting for elements, innermost last
    pending: Vec<PartialArray>,
}

#[derive(Debug)]
struct PartialArray {
    remaining: usize,
    items: Vec<Frame>,
}

impl FrameDecoder {
    /// Create a decoder with no reply in progress
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one element (a scalar or an array header) off the front of `src`.
    fn element(&mut self, src: &mut BytesMut) -> Result<Option<Element>, StoreError> {
        let Some(&tag) = src.first() else {
            return Ok(None);
        };
        let Some(line_end) = find_crlf(src, 1) else {
            return Ok(None);
        };

        let element = match tag {
            b'+' => Element::Frame(Frame::Simple(
                String::from_utf8_lossy(&src[1..line_end]).into_owned(),
            )),
            b'-' => Element::Frame(Frame::Error(
                String::from_utf8_lossy(&src[1..line_end]).into_owned(),
            )),
            b':' => Element::Frame(Frame::Integer(parse_int(&src[1..line_end])?)),
            b'$' => {
                let len = parse_int(&src[1..line_end])?;
                if len < 0 {
                    Element::Frame(Frame::Bulk(None))
                } else {
                    let len = len as usize;
                    if len > MAX_BULK_LEN {
                        return Err(StoreError::Protocol(format!(
                            "bulk length {} too large",
                            len
                        )));
                    }
                    let start = line_end + 2;
                    let end = start + len;
                    if src.len() < end + 2 {
                        src.reserve(end + 2 - src.len());
                        return Ok(None);
                    }
                    if &src[end..end + 2] != b"\r\n" {
                        return Err(StoreError::Protocol("expected CRLF after bulk".into()));
                    }
                    src.advance(start);
                    let payload = src.split_to(len).freeze();
                    src.advance(2);
                    return Ok(Some(Element::Frame(Frame::Bulk(Some(payload)))));
                }
            }
            b'*' => {
                let count = parse_int(&src[1..line_end])?;
                if count < 0 {
                    Element::Frame(Frame::Array(None))
                } else if count == 0 {
                    Element::Frame(Frame::Array(Some(Vec::new())))
                } else {
                    let count = count as usize;
                    if count > MAX_ARRAY_LEN {
                        return Err(StoreError::Protocol(format!(
                            "array length {} too large",
                            count
                        )));
                    }
                    Element::ArrayHeader(count)
                }
            }
            other => {
                return Err(StoreError::Protocol(format!(
                    "unexpected byte: {:02x}",
                    other
                )))
            }
        };
        src.advance(line_end + 2);
        Ok(Some(element))
    }
}

enum Element {
    Frame(Frame),
    ArrayHeader(usize),
}

impl Decoder for FrameDecoder {
    type Item = Frame;
    type Error = StoreError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, StoreError> {
        loop {
            let mut frame = match self.element(src)? {
                None => return Ok(None),
                Some(Element::ArrayHeader(count)) => {
                    if self.pending.len() >= MAX_DEPTH {
                        return Err(StoreError::Protocol("nesting too deep".into()));
                    }
                    self.pending.push(PartialArray {
                        remaining: count,
                        items: Vec::with_capacity(count.min(1024)),
                    });
                    continue;
                }
                Some(Element::Frame(frame)) => frame,
            };

            // fold the finished element into its parents
            loop {
                let Some(parent) = self.pending.last_mut() else {
                    return Ok(Some(frame));
                };
                parent.items.push(frame);
                parent.remaining -= 1;
                if parent.remaining > 0 {
                    break;
                }
                let done = self.pending.pop().map(|p| p.items).unwrap_or_default();
                frame = Frame::Array(Some(done));
            }
        }
    }
}

/// Parse one frame from the front of `buf`.
///
/// Returns the frame and the number of bytes it used, or `None` if `buf`
/// does not yet hold a complete frame.
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, StoreError> {
    let mut src = BytesMut::from(buf);
    let frame = FrameDecoder::new().decode(&mut src)?;
    Ok(frame.map(|frame| (frame, buf.len() - src.len())))
}

/// Offset of the first CRLF at or after `start`.
fn find_crlf(buf: &[u8], start: usize) -> Option<usize> {
    buf.get(start..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| start + i)
}

fn parse_int(line: &[u8]) -> Result<i64, StoreError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            StoreError::Protocol(format!(
                "invalid integer: {}",
                String::from_utf8_lossy(line)
            ))
        })
}
