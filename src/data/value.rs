//! Decoding of raw telemetry payloads into reading values
//!
//! The device bridge is loose about what it sends: bare numbers, numbers as
//! strings, or an object wrapping the number under `number` or `value`. All of
//! them are accepted as long as the number is integral.

/// Fields that may wrap the reading value in an object payload
const VALUE_FIELDS: [&str; 2] = ["number", "value"];

/// Extract an integral reading value from a JSON payload
pub fn parse_reading_value(json: &serde_json::Value) -> Result<i64, ValueError> {
    match json {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else if let Some(f) = n.as_f64() {
                float_to_integer(f, &n.to_string())
            } else {
                Err(ValueError::OutOfRange(n.to_string()))
            }
        }
        serde_json::Value::String(s) => parse_reading_str(s),
        serde_json::Value::Object(obj) => {
            let inner = VALUE_FIELDS
                .iter()
                .find_map(|field| obj.get(*field))
                .ok_or(ValueError::MissingField)?;
            match inner {
                // Only one level of wrapping is accepted
                serde_json::Value::Object(_) => Err(ValueError::NotNumeric(inner.to_string())),
                other => parse_reading_value(other),
            }
        }
        other => Err(ValueError::NotNumeric(other.to_string())),
    }
}

/// Extract an integral reading value from a raw text payload
pub fn parse_reading_str(raw: &str) -> Result<i64, ValueError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValueError::NotNumeric(raw.to_string()));
    }

    if let Ok(i) = trimmed.parse::<i64>() {
        return Ok(i);
    }

    match trimmed.parse::<f64>() {
        Ok(f) if f.is_finite() => float_to_integer(f, trimmed),
        _ => Err(ValueError::NotNumeric(raw.to_string())),
    }
}

/// Decode a raw message body, trying JSON first and plain text second
pub fn parse_reading_payload(payload: &[u8]) -> Result<i64, ValueError> {
    match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(json) => parse_reading_value(&json),
        Err(_) => {
            let text = std::str::from_utf8(payload)
                .map_err(|_| ValueError::NotNumeric("<binary payload>".to_string()))?;
            parse_reading_str(text)
        }
    }
}

fn float_to_integer(f: f64, raw: &str) -> Result<i64, ValueError> {
    if f.fract() != 0.0 {
        return Err(ValueError::NotInteger(raw.to_string()));
    }
    // Both bounds are exclusive: 2^63 is one past i64::MAX, and an exact
    // i64::MIN written as an integer is taken by the integer path before
    // any float rounding happens
    if f <= i64::MIN as f64 || f >= i64::MAX as f64 {
        return Err(ValueError::OutOfRange(raw.to_string()));
    }
    Ok(f as i64)
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("not a number: {0}")]
    NotNumeric(String),

    #[error("not an integer: {0}")]
    NotInteger(String),

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("payload has no 'number' or 'value' field")]
    MissingField,
}
