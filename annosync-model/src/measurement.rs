//! Measurement values on the wire.
//!
//! JSON numbers cannot hold NaN or infinities, which measurement tables use
//! for undefined results. Non-finite values are written as the strings
//! `"NaN"`, `"Infinity"` and `"-Infinity"`; `null` reads back as NaN.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// Encodes one measurement value.
#[must_use]
pub fn measurement_to_json(value: f64) -> Value {
    if value.is_nan() {
        Value::from("NaN")
    } else if value == f64::INFINITY {
        Value::from("Infinity")
    } else if value == f64::NEG_INFINITY {
        Value::from("-Infinity")
    } else {
        Value::from(value)
    }
}

/// Decodes one measurement value, or `None` if it isn't one.
#[must_use]
pub fn measurement_from_json(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::Null => Some(f64::NAN),
        Value::String(text) => match text.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            _ => None,
        },
        _ => None,
    }
}

/// True if both maps hold the same measurements, counting NaN equal to NaN.
#[must_use]
pub fn same_measurements(a: &BTreeMap<String, f64>, b: &BTreeMap<String, f64>) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|((name_a, value_a), (name_b, value_b))| {
            name_a == name_b && (value_a == value_b || (value_a.is_nan() && value_b.is_nan()))
        })
}

pub(crate) fn serialize<S: Serializer>(
    measurements: &BTreeMap<String, f64>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(
        measurements
            .iter()
            .map(|(name, value)| (name, measurement_to_json(*value))),
    )
}

pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, f64>, D::Error> {
    let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(name, value)| match measurement_from_json(&value) {
            Some(number) => Ok((name, number)),
            None => Err(D::Error::custom(format!(
                "measurement {name} is not a number: {value}"
            ))),
        })
        .collect()
}
