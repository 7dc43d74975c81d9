use serde_json::Value;

// Section of the telemetry payload holding the sensor readings.
const SENSOR_SECTION: &str = "CustomSensor";

// Readings every telemetry message must carry.
const REQUIRED_FIELDS: [&str; 3] = ["Temperature", "Humidity", "Pressure"];

/// Checks a telemetry payload against the expected sensor schema.
///
/// A conforming payload carries a `CustomSensor` section whose
/// `Temperature`, `Humidity`, and `Pressure` readings are all numeric.
/// Every deviation is reported as its own message, in field order, so a
/// single malformed payload lists all of its problems at once. An empty
/// result means the payload conforms.
///
/// A `null` section or reading counts as absent.
#[must_use]
pub fn validate(payload: &Value) -> Vec<String> {
    let sensor = match payload.get(SENSOR_SECTION) {
        Some(sensor) if !sensor.is_null() => sensor,
        _ => return vec![format!("Missing '{SENSOR_SECTION}' section")],
    };

    let mut errors = Vec::new();
    for field in REQUIRED_FIELDS {
        match sensor.get(field) {
            None | Some(Value::Null) => errors.push(format!("Missing '{field}'")),
            Some(value) if !value.is_number() => {
                errors.push(format!("'{field}' is not numeric: {value}"));
            }
            Some(_) => {}
        }
    }

    errors
}
