// Telnet line codec for the OPUS control port.
// Inbound: LF-terminated lines (CR stripped), telnet IAC negotiation removed,
// trailing login/password prompts emitted without waiting for a newline.
// Outbound: each command followed by CR.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

use crate::settings::SETTINGS;

const IAC: u8 = 0xFF;
const SB: u8 = 0xFA;
const SE: u8 = 0xF0;
const WILL: u8 = 0xFB;
const DONT: u8 = 0xFE;

pub struct OpusCodec {
    max_frame_len: usize,
}

impl Default for OpusCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl OpusCodec {
    pub fn new() -> Self {
        Self {
            max_frame_len: SETTINGS.max_frame_len,
        }
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }
}

enum Strip {
    Done(Vec<u8>),
    /// The buffer ends inside a telnet sequence.
    Incomplete,
}

// Removes telnet command sequences, keeping escaped 0xFF bytes.
fn strip_telnet(bytes: &[u8]) -> Strip {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != IAC {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let Some(&cmd) = bytes.get(i + 1) else {
            return Strip::Incomplete;
        };
        match cmd {
            IAC => {
                out.push(IAC);
                i += 2;
            }
            WILL..=DONT => {
                if i + 2 >= bytes.len() {
                    return Strip::Incomplete;
                }
                i += 3;
            }
            SB => {
                let end = bytes[i + 2..]
                    .windows(2)
                    .position(|w| w == [IAC, SE]);
                match end {
                    Some(pos) => i += 2 + pos + 2,
                    None => return Strip::Incomplete,
                }
            }
            _ => i += 2,
        }
    }
    Strip::Done(out)
}

fn to_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

fn is_prompt(text: &str) -> bool {
    if !text.ends_with(':') {
        return false;
    }
    let lower = text.to_ascii_lowercase();
    lower.contains("login") || lower.contains("password") || lower.contains("username")
}

impl Decoder for OpusCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if let Some(newline_pos) = buf.iter().position(|&b| b == b'\n') {
                let raw = buf.split_to(newline_pos + 1);
                let cleaned = match strip_telnet(&raw[..raw.len() - 1]) {
                    Strip::Done(bytes) => bytes,
                    // A newline inside an unfinished sequence: the sequence is garbage.
                    Strip::Incomplete => raw[..raw.len() - 1]
                        .iter()
                        .copied()
                        .filter(|b| *b != IAC)
                        .collect(),
                };
                let line = to_line(&cleaned);
                if line.is_empty() {
                    continue;
                }
                trace!("Decoded frame: {}", line);
                return Ok(Some(line));
            }

            if buf.len() > self.max_frame_len {
                warn!(
                    "Discarding {} bytes of unterminated input from the switch",
                    buf.len()
                );
                buf.clear();
                return Ok(None);
            }

            // Prompts arrive without a line ending.
            if let Strip::Done(cleaned) = strip_telnet(buf) {
                let text = to_line(&cleaned);
                if is_prompt(&text) {
                    buf.clear();
                    trace!("Decoded prompt: {}", text);
                    return Ok(Some(text));
                }
            }
            return Ok(None);
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let rest = buf.split();
        let cleaned: Vec<u8> = match strip_telnet(&rest) {
            Strip::Done(bytes) => bytes,
            Strip::Incomplete => rest.iter().copied().filter(|b| *b != IAC).collect(),
        };
        let line = to_line(&cleaned);
        Ok(if line.is_empty() { None } else { Some(line) })
    }
}

impl Encoder<String> for OpusCodec {
    type Error = std::io::Error;

    fn encode(&mut self, command: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(command.len() + 1);
        dst.put_slice(command.as_bytes());
        dst.put_u8(b'\r');
        Ok(())
    }
}
