//! Cooperative termination and fatal-fault behaviour of the scheduler.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gantry_core::mocks::{MemLogFile, ScriptedPort};
use gantry_core::{
    AcqError, GpioPort, LogTarget, PipelineBuilder, RunCfg, ScheduleState, SensorValue, StateHandle,
    StopReason,
};
use gantry_hardware::sim::{Fault, FaultSchedule, SimInput};
use gantry_traits::clock::test_clock::TestClock;
use gantry_traits::{Camera, DeviceError};

/// Camera that notes the scheduler state at every capture.
#[derive(Clone, Default)]
struct StateAtCapture {
    handle: Arc<Mutex<Option<StateHandle>>>,
    seen: Arc<Mutex<Vec<ScheduleState>>>,
}

impl Camera for StateAtCapture {
    fn capture(&mut self) -> Result<Vec<u8>, DeviceError> {
        if let Some(h) = self.handle.lock().unwrap().as_ref() {
            self.seen.lock().unwrap().push(h.get());
        }
        Ok(vec![0xFF, 0xD8])
    }
}

fn until_interrupted(period_ms: u64) -> RunCfg {
    RunCfg {
        duration: None,
        period: Duration::from_millis(period_ms),
        max_ticks: None,
    }
}

#[test]
fn signal_mid_tick_finishes_that_tick_and_starts_no_other() {
    let flag = Arc::new(AtomicBool::new(false));
    let sensor_log = MemLogFile::new();
    let image_log = MemLogFile::new();
    let reads = Arc::new(AtomicU64::new(0));
    let reads_in_port = reads.clone();
    let port = ScriptedPort::constant("Temp", SensorValue::Number(20.0))
        .raise_during(3, flag.clone());
    let counter = ScriptedPort::constant("Light", SensorValue::Number(300.0)).on_read(move |_| {
        reads_in_port.fetch_add(1, Ordering::SeqCst);
    });

    let mut sched = PipelineBuilder::new()
        .with_clock(TestClock::new())
        .port(port)
        .port(counter)
        .run_cfg(until_interrupted(1000))
        .shutdown_flag(flag.clone())
        .logs(LogTarget::Writers {
            sensor: Box::new(sensor_log.clone()),
            image: Box::new(image_log.clone()),
        })
        .try_build()
        .unwrap();
    let state = sched.state();
    let summary = sched.run().unwrap();

    assert_eq!(summary.stop_reason, StopReason::Signal);
    assert_eq!(summary.ticks, 3);
    // The second port of tick 3 was still read after the flag went up.
    assert_eq!(reads.load(Ordering::SeqCst), 3);
    assert_eq!(sensor_log.lines().len(), 4);
    assert_eq!(image_log.lines().len(), 4);
    assert_eq!(state.get(), ScheduleState::Stopped);
}

#[test]
fn flag_raised_before_start_runs_no_ticks() {
    let flag = Arc::new(AtomicBool::new(true));
    let sensor_log = MemLogFile::new();
    let mut sched = PipelineBuilder::new()
        .with_clock(TestClock::new())
        .port(ScriptedPort::constant("T", SensorValue::Number(1.0)))
        .run_cfg(until_interrupted(1000))
        .shutdown_flag(flag)
        .logs(LogTarget::Writers {
            sensor: Box::new(sensor_log.clone()),
            image: Box::new(MemLogFile::new()),
        })
        .try_build()
        .unwrap();
    let summary = sched.run().unwrap();
    assert_eq!(summary.ticks, 0);
    assert_eq!(sensor_log.lines(), ["Timestamp,T"]);
}

#[test]
fn flag_from_another_thread_interrupts_the_pause() {
    let mut sched = PipelineBuilder::new()
        .port(ScriptedPort::constant("T", SensorValue::Number(1.0)))
        .run_cfg(until_interrupted(60_000))
        .logs(LogTarget::Writers {
            sensor: Box::new(MemLogFile::new()),
            image: Box::new(MemLogFile::new()),
        })
        .try_build()
        .unwrap();
    let flag = sched.shutdown_flag();
    let state = sched.state();
    let t = std::thread::spawn(move || {
        while state.get() != ScheduleState::Running {
            std::thread::sleep(Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(30));
        flag.store(true, Ordering::SeqCst);
    });
    let started = std::time::Instant::now();
    let summary = sched.run().unwrap();
    t.join().unwrap();
    assert_eq!(summary.ticks, 1);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn failing_sensor_log_aborts_on_first_write() {
    let reads = Arc::new(AtomicU64::new(0));
    let reads_in_port = reads.clone();
    let image_log = MemLogFile::new();
    let mut sched = PipelineBuilder::new()
        .with_clock(TestClock::new())
        .port(
            ScriptedPort::constant("T", SensorValue::Number(1.0)).on_read(move |_| {
                reads_in_port.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .run_cfg(until_interrupted(1000))
        .logs(LogTarget::Writers {
            sensor: Box::new(MemLogFile::failing_from(2)),
            image: Box::new(image_log.clone()),
        })
        .try_build()
        .unwrap();
    let state = sched.state();
    let err = sched.run().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AcqError>(),
        Some(AcqError::Persistence(_))
    ));
    assert_eq!(reads.load(Ordering::SeqCst), 1, "no tick after the failure");
    assert_eq!(image_log.lines(), ["Timestamp,ImageFile"]);
    assert_eq!(state.get(), ScheduleState::Stopped);
}

#[test]
fn unwritable_log_path_aborts_before_any_read() {
    let dir = tempfile::tempdir().unwrap();
    let reads = Arc::new(AtomicU64::new(0));
    let reads_in_port = reads.clone();
    let mut sched = PipelineBuilder::new()
        .with_clock(TestClock::new())
        .port(
            ScriptedPort::constant("T", SensorValue::Number(1.0)).on_read(move |_| {
                reads_in_port.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .run_cfg(until_interrupted(1000))
        // A directory cannot be opened as a log file.
        .logs(LogTarget::paths(dir.path(), dir.path().join("i.csv")))
        .try_build()
        .unwrap();
    let err = sched.run().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AcqError>(),
        Some(AcqError::Persistence(_))
    ));
    assert_eq!(reads.load(Ordering::SeqCst), 0);
}

#[test]
fn line_lost_mid_run_persists_tick_then_aborts() {
    let sensor_log = MemLogFile::new();
    // Read 1 is taken by open(); read 3 is tick 2.
    let soil = GpioPort::new(
        "Soil",
        SimInput::constant(true).with_faults(FaultSchedule::at(&[3], Fault::Unreadable)),
    );
    let mut sched = PipelineBuilder::new()
        .with_clock(TestClock::new())
        .port(ScriptedPort::constant("T", SensorValue::Number(21.0)))
        .port(soil)
        .run_cfg(until_interrupted(1000))
        .logs(LogTarget::Writers {
            sensor: Box::new(sensor_log.clone()),
            image: Box::new(MemLogFile::new()),
        })
        .try_build()
        .unwrap();
    let err = sched.run().unwrap_err();
    match err.downcast_ref::<AcqError>() {
        Some(AcqError::SensorMisconfigured { sensor, .. }) => assert_eq!(sensor, "Soil"),
        other => panic!("unexpected error: {other:?}"),
    }
    let lines = sensor_log.lines();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].ends_with(",21.00,1"));
    assert!(lines[2].ends_with(",21.00,N/A"));
}

#[test]
fn fatal_tick_is_captured_while_terminating() {
    let camera = StateAtCapture::default();
    let soil = GpioPort::new(
        "Soil",
        SimInput::constant(true).with_faults(FaultSchedule::at(&[3], Fault::Unreadable)),
    );
    let mut sched = PipelineBuilder::new()
        .with_clock(TestClock::new())
        .port(soil)
        .camera(Box::new(camera.clone()))
        .run_cfg(until_interrupted(1000))
        .logs(LogTarget::Writers {
            sensor: Box::new(MemLogFile::new()),
            image: Box::new(MemLogFile::new()),
        })
        .try_build()
        .unwrap();
    let state = sched.state();
    *camera.handle.lock().unwrap() = Some(state.clone());

    assert!(sched.run().is_err());
    assert_eq!(
        *camera.seen.lock().unwrap(),
        [ScheduleState::Running, ScheduleState::Terminating]
    );
    assert_eq!(state.get(), ScheduleState::Stopped);
}

#[test]
fn unreadable_line_at_startup_opens_no_logs() {
    let dir = tempfile::tempdir().unwrap();
    let sensor_log = dir.path().join("s.csv");
    let mut sched = PipelineBuilder::new()
        .with_clock(TestClock::new())
        .port(GpioPort::new("Soil", SimInput::unreadable()))
        .logs(LogTarget::paths(&sensor_log, dir.path().join("i.csv")))
        .try_build()
        .unwrap();
    let err = sched.run().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AcqError>(),
        Some(AcqError::SensorMisconfigured { .. })
    ));
    assert!(!sensor_log.exists());
}

#[test]
fn scheduler_runs_once() {
    let mut sched = PipelineBuilder::new()
        .with_clock(TestClock::new())
        .port(ScriptedPort::constant("T", SensorValue::Number(1.0)))
        .run_cfg(RunCfg {
            duration: Some(Duration::from_secs(1)),
            ..RunCfg::default()
        })
        .logs(LogTarget::Writers {
            sensor: Box::new(MemLogFile::new()),
            image: Box::new(MemLogFile::new()),
        })
        .try_build()
        .unwrap();
    sched.run().unwrap();
    let err = sched.run().unwrap_err();
    assert!(matches!(err.downcast_ref::<AcqError>(), Some(AcqError::State(_))));
}
