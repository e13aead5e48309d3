//! Human-readable error descriptions and structured JSON error formatting.

use gantry_core::error::{AcqError, BuildError};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::NoSensors => {
                "What happened: No sensors were wired into the pipeline.\nLikely causes: The config has no [[sensors]] entries.\nHow to fix: Add at least one [[sensors]] table to the config.".to_string()
            }
            BuildError::DuplicateSensorId(id) => format!(
                "What happened: Sensor id {id:?} is used more than once.\nLikely causes: A copied [[sensors]] entry kept its id.\nHow to fix: Give every sensor a unique id; ids become column headers."
            ),
            BuildError::MissingSensorLog | BuildError::MissingImageLog => {
                "What happened: A log destination is missing.\nLikely causes: output.sensor_log or output.image_log is empty.\nHow to fix: Set both paths in [output] or pass --sensor-log/--image-log.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/gantry.toml for a sample."
            ),
        };
    }

    if let Some(ae) = err.downcast_ref::<AcqError>() {
        return match ae {
            AcqError::Persistence(detail) => format!(
                "What happened: A record could not be written ({detail}).\nLikely causes: Disk full, missing permissions, or the log path is a directory.\nHow to fix: Check the [output] paths and free space. Rows already written are complete."
            ),
            AcqError::SensorMisconfigured { sensor, reason } => format!(
                "What happened: Sensor {sensor} is misconfigured ({reason}).\nLikely causes: Wrong pin or bus address, or the device is not connected.\nHow to fix: Check wiring and the [[sensors]] entry, then run `gantry self-check`."
            ),
            AcqError::State(detail) => format!(
                "What happened: {detail}.\nLikely causes: Internal inconsistency.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("read config") {
        return format!(
            "What happened: The config file could not be read.\nLikely causes: Wrong --config path or missing permissions.\nHow to fix: Point --config at a readable TOML file. Original: {msg}"
        );
    }

    if lower.contains("parse config") || lower.contains("invalid configuration") {
        let detail = err
            .chain()
            .skip(1)
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(": ");
        return format!(
            "What happened: Configuration is invalid or incomplete ({detail}).\nLikely causes: A typo, a missing [[sensors]] field, or an out-of-range value.\nHow to fix: Edit the TOML config and try again."
        );
    }

    if lower.contains("replay csv must have headers") {
        return "Invalid headers in replay CSV. Expected 'tick,value'.".to_string();
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: persistence failures 3, misconfigured sensors 4, anything else 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match err.downcast_ref::<AcqError>() {
        Some(AcqError::Persistence(_)) => 3,
        Some(AcqError::SensorMisconfigured { .. }) => 4,
        _ => 1,
    }
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(ae) = err.downcast_ref::<AcqError>() {
        return match ae {
            AcqError::Persistence(_) => "Persistence",
            AcqError::SensorMisconfigured { .. } => "SensorMisconfigured",
            AcqError::State(_) => "State",
        };
    }
    if err.downcast_ref::<BuildError>().is_some() {
        return "InvalidConfig";
    }
    "Error"
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let mut obj = json!({ "reason": reason_name(err), "message": humanize(err) });
    if let Some(AcqError::SensorMisconfigured { sensor, .. }) = err.downcast_ref::<AcqError>() {
        obj["details"] = json!({ "sensor": sensor });
    }
    obj.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_kind() {
        let p = eyre::Report::new(AcqError::Persistence("disk full".into()));
        let m = eyre::Report::new(AcqError::SensorMisconfigured {
            sensor: "Soil".into(),
            reason: "line unreadable".into(),
        });
        assert_eq!(exit_code_for_error(&p), 3);
        assert_eq!(exit_code_for_error(&m), 4);
        assert_eq!(exit_code_for_error(&eyre::eyre!("boom")), 1);
    }

    #[test]
    fn wrapped_errors_keep_their_code() {
        use eyre::WrapErr;
        let r: Result<(), AcqError> = Err(AcqError::Persistence("eio".into()));
        let err = r.wrap_err("tick 7").unwrap_err();
        assert_eq!(exit_code_for_error(&err), 3);
        assert!(humanize(&err).contains("could not be written"));
    }

    #[test]
    fn json_names_the_reason() {
        let err = eyre::Report::new(AcqError::SensorMisconfigured {
            sensor: "Soil".into(),
            reason: "x".into(),
        });
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "SensorMisconfigured");
        assert_eq!(v["details"]["sensor"], "Soil");
        assert!(v["message"].as_str().unwrap().contains("What happened"));
    }

    #[test]
    fn build_errors_are_explained() {
        let err = eyre::Report::new(BuildError::DuplicateSensorId("Soil".into()));
        assert!(humanize(&err).contains("\"Soil\""));
        assert_eq!(exit_code_for_error(&err), 1);
    }
}
