//! Port worker threads are joined on drop and never leak.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use gantry_core::mocks::ScriptedPort;
use gantry_core::worker::PortWorker;
use gantry_core::{SensorError, SensorValue};

#[test]
fn worker_thread_exits_on_drop() {
    let worker = PortWorker::spawn(
        Box::new(ScriptedPort::constant("T", SensorValue::Number(1.0))),
        Duration::from_millis(50),
    );
    std::thread::sleep(Duration::from_millis(20));
    let started = Instant::now();
    drop(worker);
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[test]
fn many_workers_dont_leak_threads() {
    for i in 0..20 {
        let w = PortWorker::spawn(
            Box::new(ScriptedPort::constant(format!("T{i}"), SensorValue::Number(1.0))),
            Duration::from_millis(10),
        );
        assert!(w.dispatch(1));
        assert_eq!(
            w.collect(1, Instant::now() + Duration::from_millis(200)),
            Ok(SensorValue::Number(1.0))
        );
    }
}

#[test]
fn drop_waits_for_in_flight_read() {
    let done = Arc::new(AtomicU64::new(0));
    let done_in_port = done.clone();
    let port = ScriptedPort::constant("slow", SensorValue::Number(1.0))
        .with_delay(&[1], Duration::from_millis(60))
        .on_read(move |_| {
            done_in_port.fetch_add(1, Ordering::SeqCst);
        });
    let w = PortWorker::spawn(Box::new(port), Duration::from_millis(10));
    assert!(w.dispatch(1));
    std::thread::sleep(Duration::from_millis(10));
    drop(w);
    assert_eq!(done.load(Ordering::SeqCst), 1);
}

#[test]
fn busy_worker_refuses_a_second_request() {
    let port = ScriptedPort::constant("slow", SensorValue::Number(1.0))
        .with_delay(&[1], Duration::from_millis(80));
    let w = PortWorker::spawn(Box::new(port), Duration::from_millis(10));
    assert!(w.dispatch(1));
    std::thread::sleep(Duration::from_millis(10));
    // Worker is inside read 1; the one-slot queue takes request 2 only.
    assert!(w.dispatch(2));
    assert!(!w.dispatch(3));
    assert_eq!(
        w.collect(2, Instant::now() + Duration::from_millis(5)),
        Err(SensorError::Timeout)
    );
    assert_eq!(
        w.collect(2, Instant::now() + Duration::from_millis(500)),
        Ok(SensorValue::Number(1.0))
    );
}
