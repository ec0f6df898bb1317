//! Payload validation and normalization per datatype.
//!
//! Validation is deliberately weak for `float` and `string`: any payload is
//! accepted.

use lean_homie_proto::DataType;

/// Outcome of normalizing a raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    /// Value to store
    pub value: String,
    /// Whether the datatype default replaced the payload
    pub defaulted: bool,
}

/// Check a payload against a datatype and its optional format.
#[must_use]
pub fn validate(datatype: DataType, format: Option<&str>, value: &str) -> bool {
    match datatype {
        DataType::Boolean => value == "true" || value == "false",
        DataType::Color => format.is_some() && color_components(value).is_some(),
        DataType::Enum => format.is_some_and(|tags| tags.split(',').any(|tag| tag.trim() == value)),
        DataType::Integer => is_numeric(value),
        DataType::Float | DataType::String => true,
    }
}

/// Turn a raw payload into the value a property of this kind stores.
///
/// Empty or invalid payloads become the datatype default. Colors are
/// re-serialized as rounded integers.
#[must_use]
pub fn normalize(datatype: DataType, format: Option<&str>, raw: &str) -> Normalized {
    let defaulted = raw.is_empty() || !validate(datatype, format, raw);
    let accepted = if defaulted {
        datatype.default_value()
    } else {
        raw
    };

    let value = if datatype == DataType::Color {
        color_components(accepted).map_or_else(|| accepted.to_string(), format_color)
    } else {
        accepted.to_string()
    };

    Normalized { value, defaulted }
}

/// Whether the whole string is a finite number, without surrounding whitespace.
#[must_use]
pub fn is_numeric(value: &str) -> bool {
    !value.is_empty()
        && value.trim() == value
        && value.parse::<f64>().is_ok_and(f64::is_finite)
}

/// Parse three comma separated, finite, non-negative components.
fn color_components(value: &str) -> Option<[f64; 3]> {
    let mut components = [0.0; 3];
    let mut parts = value.split(',');

    for slot in &mut components {
        let component: f64 = parts.next()?.trim().parse().ok()?;
        if !component.is_finite() || component < 0.0 {
            return None;
        }
        *slot = component;
    }

    if parts.next().is_some() {
        return None;
    }
    Some(components)
}

fn format_color([h, s, v]: [f64; 3]) -> String {
    format!(
        "{:.0},{:.0},{:.0}",
        h.round().abs(),
        s.round().abs(),
        v.round().abs()
    )
}
