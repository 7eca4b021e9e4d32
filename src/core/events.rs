//! Events - framed output stream from the engine thread to front ends
//!
//! Records are appended to one growable buffer as `{tag: u32, size: u32}`
//! headers followed by the payload. A read cursor drains them in order; once
//! it catches up with the write cursor both cursors reset to zero.

use std::fmt;
use std::sync::Mutex;

use super::debugger::DebugError;
use crate::debug::types::RegisterSet;

/// Size of the `{tag, size}` record header in bytes
pub const HEADER_SIZE: usize = 8;

/// Default capacity of the output buffer
pub const DEFAULT_CAPACITY: usize = 64 * 1024;

/// Record tag carried in the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DataType {
    Error = 0,
    Warning = 1,
    Info = 2,
    Debug = 3,
    Registers = 4,
    Memory = 5,
    TargetOutput = 6,
    ProcessId = 7,
}

impl DataType {
    pub fn from_tag(tag: u32) -> Option<Self> {
        Some(match tag {
            0 => DataType::Error,
            1 => DataType::Warning,
            2 => DataType::Info,
            3 => DataType::Debug,
            4 => DataType::Registers,
            5 => DataType::Memory,
            6 => DataType::TargetOutput,
            7 => DataType::ProcessId,
            _ => return None,
        })
    }

    pub fn tag(self) -> u32 {
        self as u32
    }
}

/// Typed view of a record payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Error(String),
    Warning(String),
    Info(String),
    Debug(String),
    Registers(RegisterSet),
    Memory { address: u64, bytes: Vec<u8> },
    TargetOutput(String),
    ProcessId(i32),
}

impl Event {
    pub fn kind(&self) -> DataType {
        match self {
            Event::Error(_) => DataType::Error,
            Event::Warning(_) => DataType::Warning,
            Event::Info(_) => DataType::Info,
            Event::Debug(_) => DataType::Debug,
            Event::Registers(_) => DataType::Registers,
            Event::Memory { .. } => DataType::Memory,
            Event::TargetOutput(_) => DataType::TargetOutput,
            Event::ProcessId(_) => DataType::ProcessId,
        }
    }

    /// Serialize the payload (header excluded)
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Event::Error(text)
            | Event::Warning(text)
            | Event::Info(text)
            | Event::Debug(text)
            | Event::TargetOutput(text) => text.as_bytes().to_vec(),
            Event::Registers(regs) => regs.to_bytes(),
            Event::Memory { address, bytes } => {
                let mut payload = Vec::with_capacity(8 + bytes.len());
                payload.extend_from_slice(&address.to_le_bytes());
                payload.extend_from_slice(bytes);
                payload
            }
            Event::ProcessId(pid) => pid.to_le_bytes().to_vec(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Error(text) => write!(f, "Error: {}", text),
            Event::Warning(text) => write!(f, "Warning: {}", text),
            Event::Info(text) | Event::Debug(text) | Event::TargetOutput(text) => {
                f.write_str(text)
            }
            Event::Registers(_) => f.write_str("<register snapshot>"),
            Event::Memory { address, bytes } => {
                write!(f, "<{} bytes at {:#x}>", bytes.len(), address)
            }
            Event::ProcessId(pid) => write!(f, "pid {}", pid),
        }
    }
}

/// One record popped from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub kind: DataType,
    pub payload: Vec<u8>,
}

impl EventRecord {
    /// Wire shape: header followed by the payload
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        bytes.extend_from_slice(&self.kind.tag().to_le_bytes());
        bytes.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Decode the payload according to its tag
    pub fn decode(&self) -> Result<Event, DebugError> {
        let text = || String::from_utf8_lossy(&self.payload).into_owned();
        Ok(match self.kind {
            DataType::Error => Event::Error(text()),
            DataType::Warning => Event::Warning(text()),
            DataType::Info => Event::Info(text()),
            DataType::Debug => Event::Debug(text()),
            DataType::TargetOutput => Event::TargetOutput(text()),
            DataType::Registers => Event::Registers(
                RegisterSet::from_bytes(&self.payload)
                    .ok_or_else(|| malformed(self.kind, self.payload.len()))?,
            ),
            DataType::Memory => {
                if self.payload.len() < 8 {
                    return Err(malformed(self.kind, self.payload.len()));
                }
                let (address, bytes) = self.payload.split_at(8);
                Event::Memory {
                    address: u64::from_le_bytes(address.try_into().unwrap_or_default()),
                    bytes: bytes.to_vec(),
                }
            }
            DataType::ProcessId => {
                let raw: [u8; 4] = self
                    .payload
                    .as_slice()
                    .try_into()
                    .map_err(|_| malformed(self.kind, self.payload.len()))?;
                Event::ProcessId(i32::from_le_bytes(raw))
            }
        })
    }
}

fn malformed(kind: DataType, size: usize) -> DebugError {
    DebugError::Protocol(format!("Malformed {:?} record of {} bytes", kind, size))
}

#[derive(Debug, Default)]
struct Buffer {
    data: Vec<u8>,
    read: usize,
    write: usize,
    dropped: u64,
}

/// Capacity-bounded append/drain log of tagged records
#[derive(Debug)]
pub struct EventStream {
    capacity: usize,
    inner: Mutex<Buffer>,
}

impl EventStream {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Buffer::default()),
        }
    }

    /// Append one record, or drop it when it does not fit
    pub fn push(&self, kind: DataType, bytes: &[u8]) -> Result<(), DebugError> {
        let size = HEADER_SIZE + bytes.len();
        let mut buf = self.lock();

        if buf.write + size > self.capacity || bytes.len() > u32::MAX as usize {
            buf.dropped += 1;
            log::warn!(
                "Event stream full, dropped {:?} record of {} bytes ({} dropped so far)",
                kind,
                bytes.len(),
                buf.dropped
            );
            return Err(DebugError::Capacity { size: bytes.len() });
        }

        let write = buf.write;
        buf.data.truncate(write);
        buf.data.extend_from_slice(&kind.tag().to_le_bytes());
        buf.data.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        buf.data.extend_from_slice(bytes);
        buf.write += size;
        Ok(())
    }

    pub fn push_event(&self, event: &Event) -> Result<(), DebugError> {
        self.push(event.kind(), &event.payload())
    }

    /// Take the next record; resets the buffer once fully drained
    pub fn pop(&self) -> Option<EventRecord> {
        let mut buf = self.lock();

        if buf.read >= buf.write {
            buf.read = 0;
            buf.write = 0;
            buf.data.clear();
            return None;
        }

        let at = buf.read;
        let tag = read_u32(&buf.data[at..at + 4]);
        let size = read_u32(&buf.data[at + 4..at + HEADER_SIZE]) as usize;
        let start = at + HEADER_SIZE;
        let payload = buf.data[start..start + size].to_vec();
        buf.read = start + size;

        match DataType::from_tag(tag) {
            Some(kind) => Some(EventRecord { kind, payload }),
            None => {
                log::error!("Corrupt event record tag {}, discarding stream", tag);
                buf.read = buf.write;
                None
            }
        }
    }

    /// Number of records dropped because the buffer was full
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    pub fn error(&self, text: impl Into<String>) {
        self.emit(Event::Error(text.into()));
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.emit(Event::Warning(text.into()));
    }

    pub fn info(&self, text: impl Into<String>) {
        self.emit(Event::Info(text.into()));
    }

    /// Push an event; a full buffer is already counted and logged by `push`
    pub fn emit(&self, event: Event) {
        let _ = self.push_event(&event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Buffer> {
        // a panicking producer cannot leave the buffer half-written
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::types::Register;

    #[test]
    fn drains_records_in_order() {
        let stream = EventStream::new(1024);
        stream.info("first");
        stream.push(DataType::Memory, &[1, 2, 3, 4, 5, 6, 7, 8, 0xaa]).unwrap();
        stream.error("third");

        let first = stream.pop().unwrap();
        assert_eq!(first.kind, DataType::Info);
        assert_eq!(first.payload, b"first");

        let second = stream.pop().unwrap();
        assert_eq!(second.kind, DataType::Memory);
        assert_eq!(second.payload, vec![1, 2, 3, 4, 5, 6, 7, 8, 0xaa]);

        assert_eq!(stream.pop().unwrap().decode().unwrap(), Event::Error("third".into()));
        assert!(stream.pop().is_none());
    }

    #[test]
    fn drained_stream_starts_fresh() {
        let stream = EventStream::new(64);
        stream.info("0123456789");
        assert!(stream.push(DataType::Info, &[0u8; 64 - HEADER_SIZE]).is_err());
        assert!(stream.pop().is_some());
        assert!(stream.pop().is_none());

        // the whole capacity is available again after the reset
        stream.push(DataType::Info, &[0u8; 64 - HEADER_SIZE]).unwrap();
        assert_eq!(stream.pop().unwrap().payload.len(), 64 - HEADER_SIZE);
    }

    #[test]
    fn full_buffer_drops_and_counts() {
        let stream = EventStream::new(32);
        stream.push(DataType::Info, &[0u8; 16]).unwrap();
        let err = stream.push(DataType::Info, &[0u8; 8]).unwrap_err();
        assert!(matches!(err, DebugError::Capacity { size: 8 }));
        assert_eq!(stream.dropped(), 1);

        // a smaller record still fits
        stream.push(DataType::Debug, &[]).unwrap();
        assert_eq!(stream.pop().unwrap().payload.len(), 16);
        assert_eq!(stream.pop().unwrap().kind, DataType::Debug);
        assert!(stream.pop().is_none());
    }

    #[test]
    fn typed_events_decode_back() {
        let stream = EventStream::default();
        let mut regs = RegisterSet::default();
        regs.set(Register::Rip, 0x401000);

        let events = vec![
            Event::Registers(regs),
            Event::Memory { address: 0x7fff_0000, bytes: vec![0xde, 0xad] },
            Event::ProcessId(4242),
            Event::TargetOutput("hello".into()),
        ];
        for event in &events {
            stream.push_event(event).unwrap();
        }

        let decoded: Vec<Event> = std::iter::from_fn(|| stream.pop())
            .map(|record| record.decode().unwrap())
            .collect();
        assert_eq!(decoded, events);
    }

    #[test]
    fn wire_shape_has_tag_and_length_header() {
        let record = EventRecord { kind: DataType::ProcessId, payload: 7i32.to_le_bytes().to_vec() };
        let bytes = record.to_bytes();
        assert_eq!(&bytes[..4], &7u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &4u32.to_le_bytes());
        assert_eq!(&bytes[8..], &7i32.to_le_bytes());
    }

    #[test]
    fn malformed_payload_is_a_protocol_error() {
        let record = EventRecord { kind: DataType::Registers, payload: vec![0; 3] };
        assert!(matches!(record.decode(), Err(DebugError::Protocol(_))));
    }
}
