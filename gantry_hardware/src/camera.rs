//! Still capture through an external program writing the image to stdout.
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::Duration;

use gantry_traits::{Camera, DeviceError};
use tracing::debug;

use crate::error::HwError;
use crate::util::wait_child_with_timeout;

pub const DEFAULT_PROGRAM: &str = "rpicam-still";
pub const DEFAULT_ARGS: &[&str] = &["-n", "-t", "1", "-e", "jpg", "-o", "-"];

pub struct CommandCamera {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandCamera {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

impl Default for CommandCamera {
    fn default() -> Self {
        Self::new(
            DEFAULT_PROGRAM,
            DEFAULT_ARGS.iter().map(|s| s.to_string()).collect(),
            Duration::from_secs(5),
        )
    }
}

impl Camera for CommandCamera {
    fn capture(&mut self) -> Result<Vec<u8>, DeviceError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| HwError::Camera(format!("spawn {}: {e}", self.program)))?;

        // Drain stdout concurrently so a large image cannot fill the pipe and stall the child.
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| HwError::Camera("stdout not captured".into()))?;
        let reader = std::thread::spawn(move || {
            let mut bytes = Vec::new();
            stdout.read_to_end(&mut bytes).map(|_| bytes)
        });

        let status = wait_child_with_timeout(&mut child, self.timeout, Duration::from_millis(10));
        let bytes = reader
            .join()
            .map_err(|_| HwError::Camera("stdout reader panicked".into()))?
            .map_err(HwError::Io)?;
        let status = status?;
        if !status.success() {
            return Err(HwError::Camera(format!("{} exited with {status}", self.program)).into());
        }
        if bytes.is_empty() {
            return Err(HwError::Camera("empty image".into()).into());
        }
        debug!(bytes = bytes.len(), "image captured");
        Ok(bytes)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_bytes() {
        let mut cam = CommandCamera::new(
            "sh",
            vec!["-c".into(), "printf 'JFIF'".into()],
            Duration::from_secs(5),
        );
        assert_eq!(cam.capture().unwrap(), b"JFIF");
    }

    #[test]
    fn failing_program_is_an_error() {
        let mut cam =
            CommandCamera::new("sh", vec!["-c".into(), "exit 3".into()], Duration::from_secs(5));
        let err = cam.capture().unwrap_err();
        assert!(err.to_string().contains("exited"));
    }

    #[test]
    fn slow_program_is_killed() {
        let mut cam = CommandCamera::new(
            "sh",
            vec!["-c".into(), "exec sleep 5".into()],
            Duration::from_millis(50),
        );
        let err = cam.capture().unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }
}
