//! Test and helper mocks for gantry_core
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::SensorError;
use crate::port::{Capability, SensorPort};
use crate::sink::LogFile;
use crate::types::SensorValue;

type ReadHook = Box<dyn FnMut(u64) + Send>;

/// Port answering from a fixed script, cycled. Reads are 1-based.
pub struct ScriptedPort {
    id: String,
    capability: Capability,
    script: Vec<Result<SensorValue, SensorError>>,
    delays: Vec<(u64, Duration)>,
    on_read: Option<ReadHook>,
    reads: u64,
}

impl ScriptedPort {
    pub fn new(id: impl Into<String>, script: Vec<Result<SensorValue, SensorError>>) -> Self {
        Self {
            id: id.into(),
            capability: Capability::DedicatedLine,
            script,
            delays: Vec::new(),
            on_read: None,
            reads: 0,
        }
    }

    pub fn constant(id: impl Into<String>, value: SensorValue) -> Self {
        Self::new(id, vec![Ok(value)])
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = capability;
        self
    }

    /// Block for `delay` of real time on the given reads, ignoring the timeout.
    pub fn with_delay(mut self, reads: &[u64], delay: Duration) -> Self {
        self.delays.extend(reads.iter().map(|r| (*r, delay)));
        self
    }

    /// Run `hook(read)` at the start of every read.
    pub fn on_read(mut self, hook: impl FnMut(u64) + Send + 'static) -> Self {
        self.on_read = Some(Box::new(hook));
        self
    }

    /// Raise `flag` during read number `read`, simulating a signal that
    /// arrives mid-tick.
    pub fn raise_during(self, read: u64, flag: Arc<AtomicBool>) -> Self {
        self.on_read(move |n| {
            if n == read {
                flag.store(true, Ordering::SeqCst);
            }
        })
    }
}

impl SensorPort for ScriptedPort {
    fn id(&self) -> &str {
        &self.id
    }

    fn capability(&self) -> Capability {
        self.capability
    }

    fn read(&mut self, _timeout: Duration) -> Result<SensorValue, SensorError> {
        self.reads += 1;
        let n = self.reads;
        if let Some(hook) = self.on_read.as_mut() {
            hook(n);
        }
        if let Some((_, d)) = self.delays.iter().find(|(r, _)| *r == n) {
            std::thread::sleep(*d);
        }
        if self.script.is_empty() {
            return Err(SensorError::DeviceBusy("empty script".into()));
        }
        let idx = ((n - 1) % self.script.len() as u64) as usize;
        self.script[idx].clone()
    }
}

/// In-memory log file with an optional write failure.
///
/// Clones share the buffer, so a test can keep one to inspect what the
/// sink wrote. Write calls are counted from 1; the header is call 1.
#[derive(Clone, Default)]
pub struct MemLogFile {
    buf: Arc<Mutex<Vec<u8>>>,
    writes: Arc<Mutex<u64>>,
    fail_from: Option<u64>,
    partial: bool,
}

impl MemLogFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every write call from number `n` on.
    pub fn failing_from(n: u64) -> Self {
        Self {
            fail_from: Some(n),
            ..Self::default()
        }
    }

    /// Accept half of the bytes before failing, like a disk filling up.
    pub fn partial_writes(mut self) -> Self {
        self.partial = true;
        self
    }

    pub fn contents(&self) -> String {
        let buf = self.buf.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for MemLogFile {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = {
            let mut w = self
                .writes
                .lock()
                .map_err(|_| io::Error::other("poisoned"))?;
            *w += 1;
            *w
        };
        let mut buf = self.buf.lock().map_err(|_| io::Error::other("poisoned"))?;
        if self.fail_from.is_some_and(|f| n >= f) {
            if self.partial && data.len() > 1 {
                buf.extend_from_slice(&data[..data.len() / 2]);
            }
            return Err(io::Error::new(io::ErrorKind::StorageFull, "no space left on device"));
        }
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LogFile for MemLogFile {
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        let mut buf = self.buf.lock().map_err(|_| io::Error::other("poisoned"))?;
        buf.truncate(usize::try_from(len).unwrap_or(usize::MAX));
        Ok(())
    }
}
