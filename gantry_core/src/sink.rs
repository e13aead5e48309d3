//! Append-only tabular logs with tick-level atomicity.
//!
//! A sink owns its file exclusively. `open` truncates and writes the header
//! once; each append is flushed and synced before returning. `TickLogs`
//! pairs the sensor and image sinks and rolls both back to their last
//! committed length if either append fails, so a reader never sees half a
//! tick.
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::error;

use crate::config::RowFormat;
use crate::error::AcqError;
use crate::types::Record;

pub const TIMESTAMP_COLUMN: &str = "Timestamp";
pub const IMAGE_COLUMN: &str = "ImageFile";

/// Durable, truncatable log storage.
pub trait LogFile: Write + Send {
    /// Force written data to stable storage.
    fn sync(&mut self) -> io::Result<()>;

    /// Drop everything past `len` and continue writing from there.
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.seek(SeekFrom::Start(len))?;
        Ok(())
    }
}

/// Encode one CSV row (quoted as needed, `\n` terminated).
pub fn encode_row<I, T>(fields: I) -> io::Result<Vec<u8>>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut w = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    w.write_record(fields).map_err(io::Error::other)?;
    w.into_inner().map_err(|e| io::Error::other(e.to_string()))
}

pub struct PersistenceSink {
    file: Box<dyn LogFile>,
    columns: usize,
    committed: u64,
}

impl PersistenceSink {
    /// Create (or truncate) `path` and write `header`. Parent directories are
    /// created as needed.
    pub fn open(path: &Path, header: &[String]) -> io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::from_writer(Box::new(file), header)
    }

    /// Use an already-open, empty writer.
    pub fn from_writer(file: Box<dyn LogFile>, header: &[String]) -> io::Result<Self> {
        let mut sink = Self {
            file,
            columns: header.len(),
            committed: 0,
        };
        let row = encode_row(header)?;
        sink.append(&row)?;
        Ok(sink)
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Bytes durably written so far, header included.
    pub fn committed_len(&self) -> u64 {
        self.committed
    }

    /// Append one encoded row and sync it. On error nothing is committed.
    pub fn append(&mut self, row: &[u8]) -> io::Result<()> {
        self.file.write_all(row)?;
        self.file.flush()?;
        self.file.sync()?;
        self.committed += row.len() as u64;
        Ok(())
    }

    /// Cut the file back to `len` bytes, discarding later appends.
    pub fn rollback_to(&mut self, len: u64) -> io::Result<()> {
        self.file.truncate_to(len)?;
        self.file.sync()?;
        self.committed = len.min(self.committed);
        Ok(())
    }
}

/// Where the two logs go.
pub enum LogTarget {
    Paths {
        sensor: PathBuf,
        image: PathBuf,
    },
    Writers {
        sensor: Box<dyn LogFile>,
        image: Box<dyn LogFile>,
    },
}

impl LogTarget {
    pub fn paths(sensor: impl Into<PathBuf>, image: impl Into<PathBuf>) -> Self {
        LogTarget::Paths {
            sensor: sensor.into(),
            image: image.into(),
        }
    }

    pub fn open(self, sensor_ids: &[String], format: RowFormat) -> Result<TickLogs, AcqError> {
        let sensor_header = TickLogs::sensor_header(sensor_ids);
        let image_header = TickLogs::image_header();
        let persist = |what: &str, e: io::Error| AcqError::Persistence(format!("{what}: {e}"));
        let (sensor, image) = match self {
            LogTarget::Paths { sensor, image } => (
                PersistenceSink::open(&sensor, &sensor_header)
                    .map_err(|e| persist(&format!("open {}", sensor.display()), e))?,
                PersistenceSink::open(&image, &image_header)
                    .map_err(|e| persist(&format!("open {}", image.display()), e))?,
            ),
            LogTarget::Writers { sensor, image } => (
                PersistenceSink::from_writer(sensor, &sensor_header)
                    .map_err(|e| persist("open sensor log", e))?,
                PersistenceSink::from_writer(image, &image_header)
                    .map_err(|e| persist("open image log", e))?,
            ),
        };
        Ok(TickLogs {
            sensor,
            image,
            sensor_ids: sensor_ids.to_vec(),
            format,
        })
    }
}

/// Sensor log + image log written as one unit per tick.
pub struct TickLogs {
    sensor: PersistenceSink,
    image: PersistenceSink,
    sensor_ids: Vec<String>,
    format: RowFormat,
}

impl TickLogs {
    pub fn sensor_header(sensor_ids: &[String]) -> Vec<String> {
        std::iter::once(TIMESTAMP_COLUMN.to_string())
            .chain(sensor_ids.iter().cloned())
            .collect()
    }

    pub fn image_header() -> Vec<String> {
        vec![TIMESTAMP_COLUMN.to_string(), IMAGE_COLUMN.to_string()]
    }

    /// Encode both rows without touching either file.
    pub fn encode(&self, record: &Record) -> Result<(Vec<u8>, Vec<u8>), AcqError> {
        if record.readings.len() != self.sensor_ids.len()
            || record
                .readings
                .iter()
                .zip(&self.sensor_ids)
                .any(|(r, id)| r.sensor_id != *id)
        {
            return Err(AcqError::State(format!(
                "record {} does not match the sensor log columns",
                record.sequence
            )));
        }
        let f = &self.format;
        let ts = record.timestamp.render(&f.timestamp_format, f.zone);
        let sentinel = f.sentinel.as_str();

        let sensor_row = encode_row(std::iter::once(ts.clone()).chain(
            record.readings.iter().map(|r| match &r.value {
                Some(v) => v.render(f.precision),
                None => sentinel.to_string(),
            }),
        ));
        let image_row = encode_row([
            ts.as_str(),
            record.image_ref.as_ref().map_or(sentinel, |r| r.as_str()),
        ]);
        match (sensor_row, image_row) {
            (Ok(s), Ok(i)) => Ok((s, i)),
            (Err(e), _) | (_, Err(e)) => Err(AcqError::Persistence(format!("encode row: {e}"))),
        }
    }

    /// Persist one tick: both rows or neither.
    pub fn write(&mut self, record: &Record) -> Result<(), AcqError> {
        let (sensor_row, image_row) = self.encode(record)?;
        let sensor_mark = self.sensor.committed_len();
        let image_mark = self.image.committed_len();

        let res = self
            .sensor
            .append(&sensor_row)
            .map_err(|e| format!("sensor log: {e}"))
            .and_then(|()| {
                self.image
                    .append(&image_row)
                    .map_err(|e| format!("image log: {e}"))
            });
        if let Err(msg) = res {
            self.rollback(sensor_mark, image_mark);
            return Err(AcqError::Persistence(format!(
                "tick {}: {msg}",
                record.sequence
            )));
        }
        Ok(())
    }

    fn rollback(&mut self, sensor_mark: u64, image_mark: u64) {
        if let Err(e) = self.sensor.rollback_to(sensor_mark) {
            error!(error = %e, "sensor log rollback failed");
        }
        if let Err(e) = self.image.rollback_to(image_mark) {
            error!(error = %e, "image log rollback failed");
        }
    }

    pub fn columns(&self) -> usize {
        self.sensor.columns()
    }
}
