mod cli;
mod error_fmt;
mod wiring;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use eyre::{Result, WrapErr, eyre};
use gantry_config::{Config, ReadMode};
use gantry_core::{AcqError, LogTarget, PipelineBuilder, RunSummary};
use serde_json::json;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    let _ = color_eyre::install();

    if let Err(err) = real_main(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        std::process::exit(exit_code_for_error(&err));
    }
}

fn real_main(cli: Cli) -> Result<()> {
    let text = std::fs::read_to_string(&cli.config)
        .wrap_err_with(|| format!("read config {}", cli.config.display()))?;
    let mut cfg = gantry_config::load_toml(&text).wrap_err("parse config")?;

    if let Commands::Run {
        duration_s,
        period_ms,
        max_ticks,
        sensor_log,
        image_log,
        concurrent,
        ..
    } = &cli.cmd
    {
        if let Some(s) = duration_s {
            cfg.run.duration_s = *s;
        }
        if let Some(ms) = period_ms {
            cfg.run.period_ms = *ms;
        }
        if max_ticks.is_some() {
            cfg.run.max_ticks = *max_ticks;
        }
        if let Some(p) = sensor_log {
            cfg.output.sensor_log.clone_from(p);
        }
        if let Some(p) = image_log {
            cfg.output.image_log.clone_from(p);
        }
        if *concurrent {
            cfg.run.mode = ReadMode::Concurrent;
        }
    }
    cfg.validate().wrap_err("invalid configuration")?;

    init_tracing(&cli, &cfg.logging)?;

    match cli.cmd {
        Commands::Run { stats, .. } => run(&cfg, stats, cli.json),
        Commands::SelfCheck => self_check(&cfg, cli.json),
    }
}

/// RUST_LOG wins, then --log-level, then [logging].level.
fn init_tracing(cli: &Cli, logging: &gantry_config::Logging) -> Result<()> {
    let level = cli
        .log_level
        .clone()
        .or_else(|| logging.level.clone())
        .unwrap_or_else(|| "info".to_string());
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(&level)
            .wrap_err_with(|| format!("invalid log level {level:?}"))?,
    };

    let json_console = cli
        .json
        .then(|| fmt::layer().json().with_writer(std::io::stderr));
    let pretty_console = (!cli.json).then(|| fmt::layer().with_writer(std::io::stderr));

    let file_layer = match &logging.file {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let prefix = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| eyre!("logging.file must name a file: {file}"))?;
            let rotation = match logging.rotation.as_deref() {
                Some("daily") => Rotation::DAILY,
                Some("hourly") => Rotation::HOURLY,
                _ => Rotation::NEVER,
            };
            let appender = RollingFileAppender::builder()
                .rotation(rotation)
                .filename_prefix(prefix)
                .build(dir)
                .wrap_err_with(|| format!("open log file {file}"))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(fmt::layer().json().with_ansi(false).with_writer(writer))
        }
        None => None,
    };

    // A subscriber may already be set (tests); keep going with it.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json_console)
        .with(pretty_console)
        .with(file_layer)
        .try_init();
    Ok(())
}

fn run(cfg: &Config, stats: bool, json: bool) -> Result<()> {
    let ports = wiring::build_ports(cfg)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = shutdown.clone();
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
            .wrap_err("install signal handler")?;
    }

    let mut builder = PipelineBuilder::new()
        .ports(ports)
        .run_cfg((&cfg.run).into())
        .timeouts((&cfg.timeouts).into())
        .read_mode(cfg.run.mode.into())
        .row_format((&cfg.output).into())
        .image_naming((&cfg.camera).into())
        .logs(LogTarget::paths(&cfg.output.sensor_log, &cfg.output.image_log))
        .shutdown_flag(shutdown);
    if let Some(camera) = wiring::build_camera(&cfg.camera) {
        builder = builder.camera(camera);
    }
    if let Some(dir) = &cfg.output.image_dir {
        builder = builder.image_dir(dir);
    }
    let mut scheduler = builder.try_build()?;

    info!(
        sensors = ?scheduler.sensor_ids(),
        period_ms = cfg.run.period_ms,
        duration_s = cfg.run.duration_s,
        mode = ?cfg.run.mode,
        "acquisition starting"
    );
    let summary = scheduler.run()?;
    info!(ticks = summary.ticks, stop = summary.stop_reason.as_str(), "acquisition finished");

    if json {
        println!("{}", summary_json(&summary, stats));
    } else {
        print_summary(&summary, stats);
    }
    Ok(())
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn summary_json(s: &RunSummary, stats: bool) -> serde_json::Value {
    let absent: Vec<_> = s
        .absent
        .iter()
        .map(|(id, n)| json!({ "sensor": id, "absent": n }))
        .collect();
    let mut obj = json!({
        "ticks": s.ticks,
        "partial_ticks": s.partial_ticks,
        "absent": absent,
        "image_failures": s.image_failures,
        "overruns": s.overruns,
        "last_sequence": s.last_sequence,
        "stop_reason": s.stop_reason.as_str(),
    });
    if stats {
        obj["latency"] = json!({
            "count": s.latency.count,
            "min_ms": s.latency.min.map(ms),
            "avg_ms": s.latency.avg().map(ms),
            "max_ms": ms(s.latency.max),
        });
    }
    obj
}

fn print_summary(s: &RunSummary, stats: bool) {
    println!(
        "Run stopped ({}): {} ticks, {} partial, {} image failures, {} overruns",
        s.stop_reason.as_str(),
        s.ticks,
        s.partial_ticks,
        s.image_failures,
        s.overruns
    );
    for (id, n) in s.absent.iter().filter(|(_, n)| *n > 0) {
        println!("  {id}: {n} absent");
    }
    if stats && let (Some(min), Some(avg)) = (s.latency.min, s.latency.avg()) {
        println!(
            "Tick latency: min {:.3} ms, avg {:.3} ms, max {:.3} ms over {} ticks",
            ms(min),
            ms(avg),
            ms(s.latency.max),
            s.latency.count
        );
    }
}

/// Open each port and take one reading. Exits 4 when any sensor is misconfigured.
fn self_check(cfg: &Config, json: bool) -> Result<()> {
    let timeout = Duration::from_millis(cfg.timeouts.sensor_ms);
    let precision = cfg.output.precision;
    let mut rows = Vec::new();
    let mut first_fatal = None;

    for mut port in wiring::build_ports(cfg)? {
        let outcome = port.open().and_then(|()| port.read(timeout));
        let id = port.id().to_string();
        match &outcome {
            Ok(v) => info!(sensor = %id, value = v.as_f64(), "self-check ok"),
            Err(e) => {
                warn!(sensor = %id, error = %e, "self-check failed");
                if e.is_fatal() && first_fatal.is_none() {
                    first_fatal = Some((id.clone(), e.to_string()));
                }
            }
        }
        rows.push((id, outcome.map(|v| v.render(precision)).map_err(|e| e.to_string())));
    }

    let camera = wiring::build_camera(&cfg.camera).map(|mut c| {
        c.capture()
            .map(|bytes| bytes.len())
            .map_err(|e| e.to_string())
    });

    if json {
        let sensors: Vec<_> = rows
            .iter()
            .map(|(id, r)| match r {
                Ok(v) => json!({ "sensor": id, "ok": true, "value": v }),
                Err(e) => json!({ "sensor": id, "ok": false, "error": e }),
            })
            .collect();
        let camera = match &camera {
            None => json!({ "enabled": false }),
            Some(Ok(n)) => json!({ "enabled": true, "ok": true, "bytes": n }),
            Some(Err(e)) => json!({ "enabled": true, "ok": false, "error": e }),
        };
        println!("{}", json!({ "sensors": sensors, "camera": camera }));
    } else {
        for (id, r) in &rows {
            match r {
                Ok(v) => println!("{id}: ok {v}"),
                Err(e) => println!("{id}: FAILED {e}"),
            }
        }
        match &camera {
            None => println!("camera: disabled"),
            Some(Ok(n)) => println!("camera: ok ({n} bytes)"),
            Some(Err(e)) => println!("camera: FAILED {e}"),
        }
    }

    if let Some((sensor, reason)) = first_fatal {
        return Err(AcqError::SensorMisconfigured { sensor, reason }.into());
    }
    Ok(())
}
