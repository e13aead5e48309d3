//! Per-tick read of every configured port into one ordered `Record`.
//!
//! A failed read becomes an absent value; it never aborts the tick. The
//! assembler does not retry within a tick.
use std::time::{Duration, Instant};

use tracing::warn;

use crate::config::ReadMode;
use crate::error::SensorError;
use crate::port::{Capability, SensorPort};
use crate::types::{Record, SensorReading, SensorValue, Timestamp};
use crate::worker::PortWorker;

/// Extra slack on top of the slowest worker's read bound when joining.
const JOIN_SLACK: Duration = Duration::from_millis(5);

/// A read failure observed while assembling a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortFault {
    pub sensor_id: String,
    pub error: SensorError,
}

#[derive(Debug)]
pub struct Assembled {
    pub record: Record,
    pub faults: Vec<PortFault>,
}

impl Assembled {
    /// First fault that must end the run, if any.
    pub fn fatal(&self) -> Option<&PortFault> {
        self.faults.iter().find(|f| f.error.is_fatal())
    }
}

enum Slot {
    Inline(Box<dyn SensorPort>),
    Worker(PortWorker),
}

impl Slot {
    fn id(&self) -> &str {
        match self {
            Slot::Inline(p) => p.id(),
            Slot::Worker(w) => w.id(),
        }
    }
}

pub struct RecordAssembler {
    slots: Vec<Slot>,
    mode: ReadMode,
    timeout: Duration,
    opened: bool,
}

impl RecordAssembler {
    pub fn new(ports: Vec<Box<dyn SensorPort>>, mode: ReadMode, timeout: Duration) -> Self {
        Self {
            slots: ports.into_iter().map(Slot::Inline).collect(),
            mode,
            timeout,
            opened: false,
        }
    }

    pub fn sensor_ids(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Open every port in configuration order, then hand independent ports
    /// to workers in concurrent mode. Stops at the first failure.
    pub fn open(&mut self) -> Result<(), PortFault> {
        if self.opened {
            return Ok(());
        }
        for slot in &mut self.slots {
            if let Slot::Inline(port) = slot {
                port.open().map_err(|error| PortFault {
                    sensor_id: port.id().to_string(),
                    error,
                })?;
            }
        }
        if self.mode == ReadMode::Concurrent {
            let timeout = self.timeout;
            self.slots = std::mem::take(&mut self.slots)
                .into_iter()
                .map(|slot| match slot {
                    Slot::Inline(port) if port.capability() != Capability::BinaryGpio => {
                        Slot::Worker(PortWorker::spawn(port, timeout))
                    }
                    other => other,
                })
                .collect();
        }
        self.opened = true;
        Ok(())
    }

    pub fn assemble(&mut self, sequence: u64, timestamp: Timestamp) -> Assembled {
        let results = match self.mode {
            ReadMode::Sequential => self.read_sequential(),
            ReadMode::Concurrent => self.read_concurrent(sequence),
        };

        let mut readings = Vec::with_capacity(results.len());
        let mut faults = Vec::new();
        for (slot, result) in self.slots.iter().zip(results) {
            let id = slot.id();
            match result {
                Ok(v) => readings.push(SensorReading {
                    sensor_id: id.to_string(),
                    value: Some(v),
                }),
                Err(error) => {
                    warn!(sensor = %id, sequence, error = %error, "sensor read failed");
                    readings.push(SensorReading::absent(id));
                    faults.push(PortFault {
                        sensor_id: id.to_string(),
                        error,
                    });
                }
            }
        }

        Assembled {
            record: Record {
                sequence,
                timestamp,
                readings,
                image_ref: None,
            },
            faults,
        }
    }

    fn read_sequential(&mut self) -> Vec<Result<SensorValue, SensorError>> {
        let timeout = self.timeout;
        self.slots
            .iter_mut()
            .map(|slot| match slot {
                Slot::Inline(port) => port.read(timeout),
                Slot::Worker(_) => Err(SensorError::DeviceBusy("port owned by worker".into())),
            })
            .collect()
    }

    fn read_concurrent(&mut self, sequence: u64) -> Vec<Result<SensorValue, SensorError>> {
        let timeout = self.timeout;
        // Bus ports may wait up to one timeout for the lock, then one for the transaction.
        let window = self
            .slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Worker(w) => Some(w.read_bound()),
                Slot::Inline(_) => None,
            })
            .fold(timeout * 2, Duration::max);
        let deadline = Instant::now() + window + JOIN_SLACK;
        let dispatched: Vec<bool> = self
            .slots
            .iter()
            .map(|slot| match slot {
                Slot::Worker(w) => w.dispatch(sequence),
                Slot::Inline(_) => false,
            })
            .collect();

        // Inline ports are read while the workers run.
        let mut inline: Vec<Option<Result<SensorValue, SensorError>>> = self
            .slots
            .iter_mut()
            .map(|slot| match slot {
                Slot::Inline(port) => Some(port.read(timeout)),
                Slot::Worker(_) => None,
            })
            .collect();

        self.slots
            .iter()
            .zip(dispatched)
            .zip(inline.iter_mut())
            .map(|((slot, sent), inline)| match slot {
                Slot::Worker(w) if sent => w.collect(sequence, deadline),
                Slot::Worker(_) => Err(SensorError::Timeout),
                Slot::Inline(_) => inline.take().unwrap_or(Err(SensorError::Timeout)),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::ScriptedPort;
    use crate::port::{GpioPort, LinePort};
    use std::sync::{Arc, Mutex};
    use chrono::Utc;
    use gantry_hardware::sim::{Fault, FaultSchedule, SimInput, SimSensor, Waveform};

    const T: Duration = Duration::from_millis(30);

    fn ts() -> Timestamp {
        Timestamp::new(Instant::now(), Utc::now())
    }

    fn five_ports(fail_third_on: u64) -> Vec<Box<dyn SensorPort>> {
        (1..=5)
            .map(|i| {
                let mut sensor = SimSensor::new(Waveform::Constant(f64::from(i)));
                if i == 3 {
                    let mut outcomes = vec![None; fail_third_on as usize];
                    outcomes[fail_third_on as usize - 1] = Some(Fault::Busy);
                    sensor = sensor.with_faults(FaultSchedule::from_outcomes(&outcomes));
                }
                Box::new(LinePort::new(format!("s{i}"), sensor)) as Box<dyn SensorPort>
            })
            .collect()
    }

    #[test]
    fn failed_port_becomes_absent_without_blocking_others() {
        let mut asm = RecordAssembler::new(five_ports(2), ReadMode::Sequential, T);
        asm.open().unwrap();
        let first = asm.assemble(1, ts());
        assert!(first.faults.is_empty());
        let second = asm.assemble(2, ts());
        let values: Vec<_> = second.record.readings.iter().map(|r| r.value).collect();
        assert_eq!(values.iter().filter(|v| v.is_some()).count(), 4);
        assert!(values[2].is_none());
        assert_eq!(second.faults.len(), 1);
        assert_eq!(second.faults[0].sensor_id, "s3");
        assert!(second.fatal().is_none());
        assert!(!asm.assemble(3, ts()).record.is_partial());
    }

    #[test]
    fn readings_keep_configuration_order() {
        let mut asm = RecordAssembler::new(five_ports(99), ReadMode::Concurrent, T);
        asm.open().unwrap();
        for seq in 1..=3 {
            let rec = asm.assemble(seq, ts()).record;
            let ids: Vec<_> = rec.readings.iter().map(|r| r.sensor_id.as_str()).collect();
            assert_eq!(ids, ["s1", "s2", "s3", "s4", "s5"]);
            assert_eq!(rec.readings[4].value, Some(SensorValue::Number(5.0)));
        }
    }

    #[test]
    fn concurrent_mode_discards_late_replies() {
        let slow = ScriptedPort::new(
            "slow",
            vec![Ok(SensorValue::Number(1.0)), Ok(SensorValue::Number(2.0))],
        )
        .with_delay(&[1], Duration::from_millis(100));
        let ports: Vec<Box<dyn SensorPort>> = vec![
            Box::new(slow),
            Box::new(GpioPort::new("soil", SimInput::constant(true))),
        ];
        let mut asm = RecordAssembler::new(ports, ReadMode::Concurrent, Duration::from_millis(20));
        asm.open().unwrap();

        let a = asm.assemble(1, ts());
        assert_eq!(a.record.readings[0].value, None);
        assert_eq!(a.faults[0].error, SensorError::Timeout);
        assert_eq!(a.record.readings[1].value, Some(SensorValue::Flag(true)));

        // Let the late reply for tick 1 land in the channel.
        std::thread::sleep(Duration::from_millis(150));
        let b = asm.assemble(2, ts()).record;
        assert_eq!(b.readings[0].value, Some(SensorValue::Number(2.0)));
    }

    #[test]
    fn concurrent_ranger_reports_echo_longer_than_sensor_timeout() {
        use crate::port::PulsePort;
        use crate::pulse::{PulseDistanceSensor, PulseTiming};
        use gantry_hardware::sim::SimPulseRig;
        use gantry_traits::MonotonicClock;

        // 600 cm is a ~35 ms echo, well past the 5 ms sensor timeout.
        let (trigger, echo) = SimPulseRig::at_distance(MonotonicClock, 600.0).lines();
        let timing = PulseTiming {
            rise_timeout: Duration::from_millis(25),
            fall_timeout: Duration::from_millis(40),
            poll: Duration::from_micros(10),
        };
        let ranger = PulseDistanceSensor::new(trigger, echo, MonotonicClock, timing);
        let ports: Vec<Box<dyn SensorPort>> = vec![
            Box::new(ScriptedPort::constant("t", SensorValue::Number(21.0))),
            Box::new(PulsePort::new("range", ranger)),
        ];
        let mut asm = RecordAssembler::new(ports, ReadMode::Concurrent, Duration::from_millis(5));
        asm.open().unwrap();

        for seq in 1..=3 {
            let out = asm.assemble(seq, ts());
            assert!(out.faults.is_empty(), "tick {seq}: {:?}", out.faults);
            match out.record.readings[1].value {
                Some(SensorValue::Number(cm)) => assert!((cm - 600.0).abs() < 20.0, "got {cm}"),
                other => panic!("tick {seq}: {other:?}"),
            }
        }
    }

    #[test]
    fn binary_gpio_ports_stay_on_the_tick_thread() {
        let tick_thread = std::thread::current().id();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record_thread = |port: &'static str| {
            let seen = seen.clone();
            move |_: u64| seen.lock().unwrap().push((port, std::thread::current().id()))
        };
        let gpio = ScriptedPort::constant("gpio", SensorValue::Flag(true))
            .with_capability(Capability::BinaryGpio)
            .on_read(record_thread("gpio"));
        let line = ScriptedPort::constant("line", SensorValue::Number(1.0))
            .with_capability(Capability::DedicatedLine)
            .on_read(record_thread("line"));
        let ports: Vec<Box<dyn SensorPort>> = vec![Box::new(gpio), Box::new(line)];
        let mut asm = RecordAssembler::new(ports, ReadMode::Concurrent, T);
        asm.open().unwrap();
        let rec = asm.assemble(1, ts()).record;
        assert!(!rec.is_partial());

        let seen = seen.lock().unwrap();
        let thread_of = |id| seen.iter().find(|(p, _)| *p == id).map(|(_, t)| *t);
        assert_eq!(thread_of("gpio"), Some(tick_thread));
        assert_ne!(thread_of("line"), Some(tick_thread));
        assert!(thread_of("line").is_some());
    }

    #[test]
    fn misconfigured_port_is_reported_as_fatal() {
        let ports: Vec<Box<dyn SensorPort>> = vec![
            Box::new(ScriptedPort::constant("ok", SensorValue::Number(1.0))),
            Box::new(GpioPort::new(
                "soil",
                SimInput::constant(false).with_faults(FaultSchedule::at(&[2], Fault::Unreadable)),
            )),
        ];
        let mut asm = RecordAssembler::new(ports, ReadMode::Sequential, T);
        // open() consumes read 1 of the line.
        asm.open().unwrap();
        let out = asm.assemble(1, ts());
        let fatal = out.fatal().expect("fatal fault");
        assert_eq!(fatal.sensor_id, "soil");
        assert_eq!(out.record.readings[0].value, Some(SensorValue::Number(1.0)));
    }

    #[test]
    fn open_failure_names_the_port() {
        let ports: Vec<Box<dyn SensorPort>> =
            vec![Box::new(GpioPort::new("soil", SimInput::unreadable()))];
        let mut asm = RecordAssembler::new(ports, ReadMode::Sequential, T);
        let fault = asm.open().unwrap_err();
        assert_eq!(fault.sensor_id, "soil");
        assert!(fault.error.is_fatal());
    }
}
