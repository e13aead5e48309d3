use std::time::Duration;

use gantry_core::mocks::{MemLogFile, ScriptedPort};
use gantry_core::{
    BuildError, ImageNaming, LogTarget, PipelineBuilder, RowFormat, RunCfg, SensorValue,
};
use rstest::rstest;

fn mem_logs() -> LogTarget {
    LogTarget::Writers {
        sensor: Box::new(MemLogFile::new()),
        image: Box::new(MemLogFile::new()),
    }
}

fn port(id: &str) -> ScriptedPort {
    ScriptedPort::constant(id, SensorValue::Number(0.0))
}

fn build_err(b: PipelineBuilder) -> BuildError {
    match b.try_build() {
        Ok(_) => panic!("expected build error"),
        Err(e) => e
            .downcast_ref::<BuildError>()
            .cloned()
            .unwrap_or_else(|| panic!("not a BuildError: {e}")),
    }
}

#[test]
fn requires_at_least_one_port() {
    let err = build_err(PipelineBuilder::new().logs(mem_logs()));
    assert!(matches!(err, BuildError::NoSensors));
}

#[test]
fn rejects_duplicate_ids() {
    let err = build_err(
        PipelineBuilder::new()
            .port(port("T"))
            .port(port("T"))
            .logs(mem_logs()),
    );
    assert!(matches!(err, BuildError::DuplicateSensorId(id) if id == "T"));
}

#[test]
fn requires_logs() {
    let err = build_err(PipelineBuilder::new().port(port("T")));
    assert!(matches!(err, BuildError::MissingSensorLog));
}

#[test]
fn rejects_same_file_for_both_logs() {
    let err = build_err(
        PipelineBuilder::new()
            .port(port("T"))
            .logs(LogTarget::paths("log.csv", "log.csv")),
    );
    assert!(matches!(err, BuildError::InvalidConfig(_)));
}

#[test]
fn rejects_empty_image_log_path() {
    let err = build_err(
        PipelineBuilder::new()
            .port(port("T"))
            .logs(LogTarget::paths("s.csv", "")),
    );
    assert!(matches!(err, BuildError::MissingImageLog));
}

#[rstest]
#[case(RunCfg { period: Duration::ZERO, ..RunCfg::default() }, RowFormat::default(), 4)]
#[case(RunCfg::default(), RowFormat { precision: 10, ..RowFormat::default() }, 4)]
#[case(RunCfg::default(), RowFormat { sentinel: String::new(), ..RowFormat::default() }, 4)]
#[case(RunCfg::default(), RowFormat::default(), 0)]
fn rejects_invalid_settings(#[case] run: RunCfg, #[case] format: RowFormat, #[case] digits: usize) {
    let err = build_err(
        PipelineBuilder::new()
            .port(port("T"))
            .run_cfg(run)
            .row_format(format)
            .image_naming(ImageNaming {
                digits,
                ..ImageNaming::default()
            })
            .logs(mem_logs()),
    );
    assert!(matches!(err, BuildError::InvalidConfig(_)));
}
