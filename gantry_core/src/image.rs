//! Per-tick image capture keyed by the tick sequence.
use std::path::PathBuf;

use gantry_traits::Camera;
use tracing::debug;

use crate::atomic::write_atomic;
use crate::error::ImageCaptureError;
use crate::types::ImageRef;

/// `prefix` + zero-padded sequence + `.` + `extension`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageNaming {
    pub prefix: String,
    pub digits: usize,
    pub extension: String,
}

impl Default for ImageNaming {
    fn default() -> Self {
        Self {
            prefix: "image_".into(),
            digits: 4,
            extension: "jpg".into(),
        }
    }
}

impl ImageNaming {
    /// Sequences wider than `digits` are written in full, never truncated.
    pub fn file_name(&self, sequence: u64) -> String {
        format!(
            "{}{:0width$}.{}",
            self.prefix,
            sequence,
            self.extension,
            width = self.digits
        )
    }
}

pub struct ImageCorrelator {
    camera: Option<Box<dyn Camera + Send>>,
    naming: ImageNaming,
    dir: Option<PathBuf>,
}

impl ImageCorrelator {
    pub fn new(camera: Option<Box<dyn Camera + Send>>, naming: ImageNaming) -> Self {
        Self {
            camera,
            naming,
            dir: None,
        }
    }

    /// Store captured bytes under `dir`. Without it only the name is logged.
    pub fn store_in(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.camera.is_some()
    }

    /// Create the image directory. Called once before the first tick.
    pub fn prepare(&self) -> std::io::Result<()> {
        match &self.dir {
            Some(dir) => std::fs::create_dir_all(dir),
            None => Ok(()),
        }
    }

    /// Capture the image for `sequence`. `Ok(None)` when no camera is configured.
    pub fn capture(&mut self, sequence: u64) -> Result<Option<ImageRef>, ImageCaptureError> {
        let Some(camera) = self.camera.as_mut() else {
            return Ok(None);
        };
        let bytes = camera
            .capture()
            .map_err(|e| ImageCaptureError::Capture(e.to_string()))?;
        let name = self.naming.file_name(sequence);
        if let Some(dir) = &self.dir {
            write_atomic(&dir.join(&name), &bytes)
                .map_err(|e| ImageCaptureError::Store(e.to_string()))?;
        }
        debug!(sequence, file = %name, bytes = bytes.len(), "image captured");
        Ok(Some(ImageRef(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_hardware::sim::{Fault, FaultSchedule, SimCamera};
    use rstest::rstest;

    #[rstest]
    #[case(1, "image_0001.jpg")]
    #[case(42, "image_0042.jpg")]
    #[case(9999, "image_9999.jpg")]
    #[case(12345, "image_12345.jpg")]
    fn names_are_zero_padded(#[case] seq: u64, #[case] want: &str) {
        assert_eq!(ImageNaming::default().file_name(seq), want);
    }

    #[test]
    fn stores_bytes_under_sequence_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = ImageCorrelator::new(Some(Box::new(SimCamera::new())), ImageNaming::default())
            .store_in(dir.path().join("images"));
        c.prepare().unwrap();
        let r = c.capture(7).unwrap().unwrap();
        assert_eq!(r.as_str(), "image_0007.jpg");
        let bytes = std::fs::read(dir.path().join("images/image_0007.jpg")).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn capture_failure_is_reported_not_panicked() {
        let cam = SimCamera::new().with_faults(FaultSchedule::at(&[1], Fault::Busy));
        let mut c = ImageCorrelator::new(Some(Box::new(cam)), ImageNaming::default());
        assert!(matches!(c.capture(1), Err(ImageCaptureError::Capture(_))));
        assert!(c.capture(2).unwrap().is_some());
    }

    #[test]
    fn no_camera_means_no_reference() {
        let mut c = ImageCorrelator::new(None, ImageNaming::default());
        assert!(!c.is_enabled());
        assert_eq!(c.capture(1).unwrap(), None);
    }
}
