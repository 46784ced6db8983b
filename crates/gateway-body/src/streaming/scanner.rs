//! Incremental scanner for top-level routing fields.
//!
//! Tracks just enough JSON structure (string/escape state and nesting depth)
//! to find the values of interesting top-level keys, then hands each captured
//! value to `serde_json`. Elements of `tools` are parsed one at a time so a
//! scan cut short by the byte budget still keeps the completed ones.

use super::metadata::{BodyMetadata, Field};
use super::BodyStream;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, warn};

/// Outcome of feeding bytes to the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    /// Routing fields not found yet; feed more bytes
    NeedMore,
    /// `model` and `stream` are both known
    Complete,
    /// The top-level value ended (or was not an object)
    Finished,
    /// The byte budget is spent
    BudgetExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    ExpectKey,
    Key,
    AfterKey,
    BeforeValue,
    InValue,
    Finished,
}

/// Byte-level scanner with a fixed budget
#[derive(Debug)]
pub struct MetadataScanner {
    limit: usize,
    scanned: usize,
    phase: Phase,
    depth: usize,
    in_string: bool,
    escaped: bool,
    key: Vec<u8>,
    field: Option<Field>,
    value: Vec<u8>,
    element_start: Option<usize>,
    metadata: BodyMetadata,
}

impl MetadataScanner {
    /// Scanner that inspects at most `limit` bytes
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            scanned: 0,
            phase: Phase::Start,
            depth: 0,
            in_string: false,
            escaped: false,
            key: Vec::new(),
            field: None,
            value: Vec::new(),
            element_start: None,
            metadata: BodyMetadata::default(),
        }
    }

    /// Bytes inspected so far
    #[must_use]
    pub const fn scanned(&self) -> usize {
        self.scanned
    }

    /// Metadata collected so far
    #[must_use]
    pub const fn metadata(&self) -> &BodyMetadata {
        &self.metadata
    }

    /// Consume the scanner
    #[must_use]
    pub fn into_metadata(self) -> BodyMetadata {
        self.metadata
    }

    /// Feed the next chunk. Stops inside the chunk as soon as the outcome is
    /// decided.
    pub fn feed(&mut self, chunk: &[u8]) -> ScanStatus {
        for &byte in chunk {
            match self.status() {
                ScanStatus::NeedMore => {}
                done => return done,
            }
            self.scanned += 1;
            self.step(byte);
        }
        self.status()
    }

    fn status(&self) -> ScanStatus {
        if self.phase == Phase::Finished {
            ScanStatus::Finished
        } else if self.metadata.has_routing_fields() {
            ScanStatus::Complete
        } else if self.scanned >= self.limit {
            ScanStatus::BudgetExhausted
        } else {
            ScanStatus::NeedMore
        }
    }

    fn step(&mut self, byte: u8) {
        match self.phase {
            Phase::Start => match byte {
                b'{' => {
                    self.depth = 1;
                    self.phase = Phase::ExpectKey;
                }
                b if b.is_ascii_whitespace() => {}
                _ => self.phase = Phase::Finished,
            },
            Phase::ExpectKey => match byte {
                b'"' => {
                    self.key.clear();
                    self.phase = Phase::Key;
                }
                b'}' => {
                    self.depth = 0;
                    self.phase = Phase::Finished;
                }
                _ => {}
            },
            Phase::Key => {
                if self.escaped {
                    self.escaped = false;
                    self.key.push(byte);
                } else if byte == b'\\' {
                    self.escaped = true;
                    self.key.push(byte);
                } else if byte == b'"' {
                    self.phase = Phase::AfterKey;
                } else {
                    self.key.push(byte);
                }
            }
            Phase::AfterKey => {
                if byte == b':' {
                    self.field = Field::from_key(&self.key);
                    self.phase = Phase::BeforeValue;
                }
            }
            Phase::BeforeValue => {
                if !byte.is_ascii_whitespace() {
                    self.value.clear();
                    self.element_start = None;
                    self.phase = Phase::InValue;
                    self.value_byte(byte);
                }
            }
            Phase::InValue => self.value_byte(byte),
            Phase::Finished => {}
        }
    }

    fn value_byte(&mut self, byte: u8) {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = false;
            }
            self.capture(byte);
            return;
        }

        let depth = self.depth;
        match byte {
            b',' if depth == 1 => {
                self.finish_value();
                self.phase = Phase::ExpectKey;
                return;
            }
            b'}' if depth == 1 => {
                self.finish_value();
                self.depth = 0;
                self.phase = Phase::Finished;
                return;
            }
            _ => {}
        }

        if depth == 2 && self.field == Some(Field::Tools) {
            self.track_tool(byte);
        }

        match byte {
            b'"' => self.in_string = true,
            b'{' | b'[' => self.depth += 1,
            b'}' | b']' => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
        self.capture(byte);
    }

    fn capture(&mut self, byte: u8) {
        if self.field.is_some() {
            self.value.push(byte);
        }
    }

    fn track_tool(&mut self, byte: u8) {
        match byte {
            b',' | b']' => {
                if let Some(start) = self.element_start.take() {
                    if let Ok(tool) = serde_json::from_slice::<Value>(&self.value[start..]) {
                        self.metadata.push_tool(tool);
                    }
                }
            }
            b if b.is_ascii_whitespace() => {}
            _ => {
                if self.element_start.is_none() {
                    self.element_start = Some(self.value.len());
                }
            }
        }
    }

    fn finish_value(&mut self) {
        let Some(field) = self.field.take() else {
            return;
        };
        match serde_json::from_slice::<Value>(&self.value) {
            Ok(value) => self.metadata.assign(field, value),
            Err(e) => debug!(?field, error = %e, "Skipping unparseable metadata value"),
        }
        self.value.clear();
    }
}

/// Scan `stream` for routing metadata, reading at most `limit` bytes.
///
/// Once the outcome is decided the rest of the stream is drained by a
/// detached task so the producer never stalls on this branch. A stream error
/// ends the scan with whatever was collected.
pub async fn extract_metadata(mut stream: BodyStream, limit: usize) -> BodyMetadata {
    let mut scanner = MetadataScanner::new(limit);

    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => {
                let status = scanner.feed(&chunk);
                if status != ScanStatus::NeedMore {
                    debug!(?status, scanned = scanner.scanned(), "Metadata scan stopped");
                    drain(stream);
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Metadata scan aborted by stream error");
                break;
            }
        }
    }

    scanner.into_metadata()
}

fn drain(mut stream: BodyStream) {
    tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            if item.is_err() {
                break;
            }
        }
    });
}
