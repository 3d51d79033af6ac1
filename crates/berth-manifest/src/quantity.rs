//! Kubernetes resource quantities
//!
//! Only what limit/request comparison needs: a quantity is reduced to an
//! `f64` in base units (cores, bytes, devices).

use serde_json::Value;

const BINARY_SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
];

const DECIMAL_SUFFIXES: &[(&str, f64)] = &[
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// Parse a quantity string such as `"500m"`, `"1.5"`, `"128Mi"` or `"1e3"`
pub fn parse_quantity(raw: &str) -> Result<f64, String> {
    let s = raw.trim();
    let (number, multiplier) = BINARY_SUFFIXES
        .iter()
        .chain(DECIMAL_SUFFIXES)
        .find_map(|(suffix, mult)| s.strip_suffix(suffix).map(|n| (n, *mult)))
        .unwrap_or((s, 1.0));

    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid quantity '{raw}'"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("invalid quantity '{raw}'"));
    }
    Ok(value * multiplier)
}

/// Parse a quantity that YAML may have delivered as a number or a string
pub fn quantity_from_value(value: &Value) -> Result<f64, String> {
    match value {
        Value::String(s) => parse_quantity(s),
        Value::Number(n) => n
            .as_f64()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .ok_or_else(|| format!("invalid quantity '{n}'")),
        other => Err(format!("invalid quantity '{other}'")),
    }
}

/// Render a quantity value for error messages without JSON quoting
pub fn display_quantity(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
