//! Config-driven assembly of sensor ports and the camera.
//!
//! A sensor with a `[sensors.sim]` table is always simulated. Without one it
//! is simulated with stock values, or driven by the real part when built
//! with the `hardware` feature.

use std::time::Duration;

use eyre::{Result, WrapErr, eyre};
use gantry_config::{
    CameraBackend, CameraCfg, Channel, Config, SensorCfg, SensorKind, SimCfg, SimFault,
};
use gantry_core::{
    BusPort, GpioPort, LinePort, PulseDistanceSensor, PulsePort, PulseTiming, SensorPort, SharedBus,
    Timeouts, shared_bus,
};
use gantry_hardware::CommandCamera;
use gantry_hardware::sim::{
    Fault, FaultSchedule, SimBus, SimCamera, SimInput, SimPulseRig, SimSensor, Waveform,
};
use gantry_traits::{Camera, MonotonicClock};
use tracing::debug;

/// Stock `(start, step)` for a simulated sensor.
fn stock_ramp(s: &SensorCfg) -> (f64, f64) {
    match (s.kind, s.channel) {
        (SensorKind::Dht22, Some(Channel::Humidity)) => (50.0, 0.2),
        (SensorKind::Dht22, _) => (24.0, 0.1),
        (SensorKind::Bh1750, _) => (400.0, 5.0),
        (SensorKind::Mlx90614, Some(Channel::Ambient)) => (22.5, 0.05),
        (SensorKind::Mlx90614, _) => (27.0, 0.1),
        (SensorKind::SoilMoisture, _) => (1.0, 0.0),
        (SensorKind::Ultrasonic, _) => (100.0, 0.0),
    }
}

fn replay(s: &SensorCfg, sim: Option<&SimCfg>) -> Result<Option<Vec<Option<f64>>>> {
    let Some(path) = sim.and_then(|c| c.replay.as_ref()) else {
        return Ok(None);
    };
    let series = gantry_config::load_replay_csv(path)
        .wrap_err_with(|| format!("sensor {}: replay {}", s.id, path.display()))?;
    Ok(Some(series))
}

fn waveform(s: &SensorCfg, sim: Option<&SimCfg>) -> Result<Waveform> {
    if let Some(series) = replay(s, sim)? {
        return Ok(Waveform::Replay(series));
    }
    let (start, step) = stock_ramp(s);
    Ok(Waveform::Ramp {
        start: sim.and_then(|c| c.start).unwrap_or(start),
        step: sim.and_then(|c| c.step).unwrap_or(step),
    })
}

fn fault_schedule(sim: Option<&SimCfg>) -> FaultSchedule {
    sim.map_or_else(FaultSchedule::none, |c| {
        let fault = match c.fault {
            SimFault::Timeout => Fault::Timeout,
            SimFault::Busy => Fault::Busy,
        };
        FaultSchedule::at(&c.fail_ticks, fault)
    })
}

fn required<T>(s: &SensorCfg, value: Option<T>, what: &str) -> Result<T> {
    value.ok_or_else(|| eyre!("sensor {}: {what} is required", s.id))
}

struct Wiring {
    timing: PulseTiming,
    sim_bus: Option<SharedBus>,
    #[cfg(feature = "hardware")]
    bus_id: u8,
    #[cfg(feature = "hardware")]
    sensor_timeout: Duration,
    #[cfg(feature = "hardware")]
    pi_bus: Option<SharedBus>,
    #[cfg(feature = "hardware")]
    dht: std::collections::HashMap<
        u8,
        std::sync::Arc<
            std::sync::Mutex<gantry_hardware::Dht22<gantry_hardware::dht22::GpioFrameSource>>,
        >,
    >,
}

impl Wiring {
    fn new(cfg: &Config) -> Self {
        Self {
            timing: PulseTiming::from(&Timeouts::from(&cfg.timeouts)),
            sim_bus: None,
            #[cfg(feature = "hardware")]
            bus_id: cfg.bus.id,
            #[cfg(feature = "hardware")]
            sensor_timeout: Duration::from_millis(cfg.timeouts.sensor_ms),
            #[cfg(feature = "hardware")]
            pi_bus: None,
            #[cfg(feature = "hardware")]
            dht: std::collections::HashMap::new(),
        }
    }

    fn port(&mut self, s: &SensorCfg) -> Result<Box<dyn SensorPort>> {
        #[cfg(feature = "hardware")]
        {
            if s.sim.is_none() {
                return self.hardware_port(s);
            }
        }
        self.sim_port(s)
    }

    fn sim_bus(&mut self) -> SharedBus {
        self.sim_bus
            .get_or_insert_with(|| shared_bus(SimBus::new()))
            .clone()
    }

    fn sim_port(&mut self, s: &SensorCfg) -> Result<Box<dyn SensorPort>> {
        let sim = s.sim.as_ref();
        let faults = fault_schedule(sim);
        debug!(sensor = %s.id, kind = ?s.kind, "wiring simulated sensor");
        let port: Box<dyn SensorPort> = match s.kind {
            SensorKind::Dht22 => {
                let sensor = SimSensor::new(waveform(s, sim)?).with_faults(faults);
                Box::new(LinePort::new(&s.id, sensor))
            }
            SensorKind::Bh1750 | SensorKind::Mlx90614 => {
                let address = required(s, s.bus_address(), "address")?;
                let sensor = SimSensor::new(waveform(s, sim)?)
                    .with_address(address)
                    .with_faults(faults);
                Box::new(BusPort::new(&s.id, self.sim_bus(), sensor))
            }
            SensorKind::SoilMoisture => {
                // Levels >= 0.5 read high.
                let line = match replay(s, sim)? {
                    Some(series) => SimInput::pattern(
                        series.into_iter().map(|v| v.is_some_and(|x| x >= 0.5)).collect(),
                    ),
                    None => {
                        let start = sim.and_then(|c| c.start).unwrap_or(stock_ramp(s).0);
                        SimInput::constant(start >= 0.5)
                    }
                };
                Box::new(GpioPort::new(&s.id, line.with_faults(faults)).active_low(s.active_low))
            }
            SensorKind::Ultrasonic => {
                let distance = sim.and_then(|c| c.start).unwrap_or(stock_ramp(s).0);
                let rig = SimPulseRig::at_distance(MonotonicClock, distance).with_faults(faults);
                let (trigger, echo) = rig.lines();
                let sensor = PulseDistanceSensor::new(trigger, echo, MonotonicClock, self.timing);
                Box::new(PulsePort::new(&s.id, sensor))
            }
        };
        Ok(port)
    }

    #[cfg(feature = "hardware")]
    fn hardware_port(&mut self, s: &SensorCfg) -> Result<Box<dyn SensorPort>> {
        use gantry_core::AcqError;
        use gantry_hardware::dht22::GpioFrameSource;
        use gantry_hardware::gpio::{PiBus, PiInput, PiOutput};
        use gantry_hardware::{Bh1750, Dht22, Dht22Channel, Dht22Port, IrChannel, Mlx90614};
        use std::sync::{Arc, Mutex};

        let misconfigured = |e: gantry_hardware::HwError| AcqError::SensorMisconfigured {
            sensor: s.id.clone(),
            reason: e.to_string(),
        };
        debug!(sensor = %s.id, kind = ?s.kind, "wiring hardware sensor");
        let port: Box<dyn SensorPort> = match s.kind {
            SensorKind::Dht22 => {
                let pin = required(s, s.pin, "pin")?;
                let device = if let Some(d) = self.dht.get(&pin) {
                    d.clone()
                } else {
                    let source = GpioFrameSource::open(pin).map_err(misconfigured)?;
                    let d = Arc::new(Mutex::new(Dht22::new(source)));
                    self.dht.insert(pin, d.clone());
                    d
                };
                let channel = if s.channel == Some(Channel::Humidity) {
                    Dht22Channel::Humidity
                } else {
                    Dht22Channel::Temperature
                };
                Box::new(LinePort::new(&s.id, Dht22Port::new(device, channel)))
            }
            SensorKind::Bh1750 | SensorKind::Mlx90614 => {
                let address = required(s, s.bus_address(), "address")?;
                let bus = if let Some(b) = &self.pi_bus {
                    b.clone()
                } else {
                    let pi = PiBus::open(self.bus_id, self.sensor_timeout).map_err(misconfigured)?;
                    let b = shared_bus(pi);
                    self.pi_bus = Some(b.clone());
                    b
                };
                if s.kind == SensorKind::Bh1750 {
                    Box::new(BusPort::new(&s.id, bus, Bh1750::new(address)))
                } else {
                    let channel = if s.channel == Some(Channel::Ambient) {
                        IrChannel::Ambient
                    } else {
                        IrChannel::Object
                    };
                    Box::new(BusPort::new(&s.id, bus, Mlx90614::new(address, channel)))
                }
            }
            SensorKind::SoilMoisture => {
                let line = PiInput::open(required(s, s.pin, "pin")?).map_err(misconfigured)?;
                Box::new(GpioPort::new(&s.id, line).active_low(s.active_low))
            }
            SensorKind::Ultrasonic => {
                let trigger_pin = required(s, s.trigger_pin, "trigger_pin")?;
                let echo_pin = required(s, s.echo_pin, "echo_pin")?;
                let trigger = PiOutput::open(trigger_pin).map_err(misconfigured)?;
                let echo = PiInput::open(echo_pin).map_err(misconfigured)?;
                let sensor = PulseDistanceSensor::new(trigger, echo, MonotonicClock, self.timing);
                Box::new(PulsePort::new(&s.id, sensor))
            }
        };
        Ok(port)
    }
}

/// One port per `[[sensors]]` entry, in configuration order.
pub fn build_ports(cfg: &Config) -> Result<Vec<Box<dyn SensorPort>>> {
    let mut wiring = Wiring::new(cfg);
    cfg.sensors.iter().map(|s| wiring.port(s)).collect()
}

/// `None` when the camera is disabled.
pub fn build_camera(cfg: &CameraCfg) -> Option<Box<dyn Camera + Send>> {
    if !cfg.enabled {
        return None;
    }
    let camera: Box<dyn Camera + Send> = match cfg.backend {
        CameraBackend::Sim => Box::new(SimCamera::new()),
        CameraBackend::Command => Box::new(CommandCamera::new(
            cfg.command.clone(),
            cfg.args.clone(),
            Duration::from_millis(cfg.timeout_ms),
        )),
    };
    Some(camera)
}
