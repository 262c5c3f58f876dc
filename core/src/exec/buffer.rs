//! Bounded capture primitives for one in-flight command.
//!
//! Each stream gets its own byte-capped rolling buffer (oldest chunks
//! evicted first). A separate character-capped tail window accumulates
//! ANSI-stripped, CRLF-normalized text across both streams and exists only
//! to feed prompt matching; it is never part of the returned payload.

use std::collections::VecDeque;

use once_cell::sync::Lazy;
use regex_lite::Regex;

/// Byte-bounded, oldest-evicted capture of one process stream.
#[derive(Debug)]
pub(crate) struct RollingBuffer {
    chunks: VecDeque<Vec<u8>>,
    buffered: usize,
    cap: usize,
    evicted: bool,
    total_received: u64,
}

impl RollingBuffer {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            buffered: 0,
            cap,
            evicted: false,
            total_received: 0,
        }
    }

    pub(crate) fn append(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.total_received += chunk.len() as u64;
        self.buffered += chunk.len();
        self.chunks.push_back(chunk.to_vec());
        // Evict oldest bytes, not just whole chunks: one chunk bigger than
        // the cap must still leave the newest bytes in place.
        while self.buffered > self.cap {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let excess = self.buffered - self.cap;
            if front.len() <= excess {
                self.buffered -= front.len();
                self.chunks.pop_front();
            } else {
                front.drain(..excess);
                self.buffered -= excess;
            }
            self.evicted = true;
        }
    }

    pub(crate) fn truncated(&self) -> bool {
        self.evicted
    }

    pub(crate) fn total_received(&self) -> u64 {
        self.total_received
    }

    pub(crate) fn evicted_bytes(&self) -> u64 {
        self.total_received - self.buffered as u64
    }

    pub(crate) fn contents(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.buffered);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }
}

static CSI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;:?]*[ -/]*[@-~]").expect("invalid csi regex"));

static OSC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)?").expect("invalid osc regex"));

fn strip_ansi(text: &str) -> String {
    let text = CSI_RE.replace_all(text, "");
    OSC_RE.replace_all(&text, "").into_owned()
}

/// Character-capped window over the decoded tail of both streams.
#[derive(Debug)]
pub(crate) struct TailWindow {
    text: String,
    cap_chars: usize,
}

impl TailWindow {
    pub(crate) fn new(cap_chars: usize) -> Self {
        Self {
            text: String::new(),
            cap_chars,
        }
    }

    pub(crate) fn append(&mut self, chunk: &[u8]) {
        let decoded = String::from_utf8_lossy(chunk);
        let stripped = strip_ansi(&decoded);
        let normalized = stripped.replace("\r\n", "\n").replace('\r', "\n");
        self.text.push_str(&normalized);

        let excess = self.text.chars().count().saturating_sub(self.cap_chars);
        if excess > 0 {
            let cut = self
                .text
                .char_indices()
                .nth(excess)
                .map(|(idx, _)| idx)
                .unwrap_or(self.text.len());
            self.text.drain(..cut);
        }
    }

    pub(crate) fn last_non_empty_line(&self) -> Option<&str> {
        self.text
            .lines()
            .rev()
            .map(str::trim_end)
            .find(|line| !line.is_empty())
    }
}

const SNIFF_LIMIT_BYTES: usize = 512;
const SNIFF_MIN_BYTES: usize = 32;
const CONTROL_RATIO_THRESHOLD: f64 = 0.30;

/// Binary-content heuristic over the first bytes of both streams: a NUL
/// byte, or a high ratio of non-printable bytes once enough has been seen.
/// Sticky once tripped for the remainder of the run.
#[derive(Debug, Default)]
pub(crate) struct BinarySniffer {
    window: Vec<u8>,
    detected: bool,
}

impl BinarySniffer {
    pub(crate) fn observe(&mut self, chunk: &[u8]) {
        if self.detected || self.window.len() >= SNIFF_LIMIT_BYTES {
            return;
        }
        let room = SNIFF_LIMIT_BYTES - self.window.len();
        self.window.extend_from_slice(&chunk[..chunk.len().min(room)]);

        if self.window.contains(&0) {
            self.detected = true;
            return;
        }
        if self.window.len() >= SNIFF_MIN_BYTES {
            let control = self
                .window
                .iter()
                .filter(|b| is_control_byte(**b))
                .count();
            if control as f64 / self.window.len() as f64 > CONTROL_RATIO_THRESHOLD {
                self.detected = true;
            }
        }
    }

    pub(crate) fn detected(&self) -> bool {
        self.detected
    }
}

fn is_control_byte(byte: u8) -> bool {
    (byte < 0x20 && byte != b'\n' && byte != b'\r' && byte != b'\t') || byte == 0x7f
}
