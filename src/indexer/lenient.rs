//! Tolerant decoders for JSON fields whose type varies between responses.
//!
//! Trackers and download clients report the same field as a number in one
//! response and a string in the next (`"seeders": "12"` vs `12`, sizes as
//! `"1.2 GiB"`, percentages as `"45%"`). These wrappers accept every observed
//! shape and fall back to zero/false for values they cannot interpret, so one
//! odd field never discards a whole result.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;

/// Unsigned integer accepting numbers, numeric strings, and human-readable sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LenientU64(pub u64);

/// Float accepting numbers, numeric strings, and percentage strings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LenientF64(pub f64);

/// Boolean accepting `true`/`false`, `0`/`1`, and their string forms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LenientBool(pub bool);

/// Parses a number that may carry thousands separators, a `%` suffix, or a unit.
///
/// Returns `None` when no leading number is present.
#[must_use]
pub fn parse_number_lenient(raw: &str) -> Option<f64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',' && *c != '_').collect();
    let end = cleaned
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+'))))
        .map_or(cleaned.len(), |(i, _)| i);
    cleaned[..end].parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parses a human-readable size (`"1.2 GiB"`, `"700 MB"`, `"512"`) into bytes.
///
/// Decimal and binary unit spellings are both treated as binary multiples,
/// matching how trackers label sizes.
#[must_use]
pub fn parse_human_size(raw: &str) -> Option<u64> {
    let value = parse_number_lenient(raw)?;
    if value < 0.0 {
        return None;
    }
    let unit = raw
        .trim()
        .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | ',' | '_' | '+'))
        .trim()
        .to_ascii_lowercase();
    let multiplier: f64 = match unit.as_str() {
        "" | "b" | "bytes" => 1.0,
        "k" | "kb" | "kib" => 1024.0,
        "m" | "mb" | "mib" => 1024.0 * 1024.0,
        "g" | "gb" | "gib" => 1024.0 * 1024.0 * 1024.0,
        "t" | "tb" | "tib" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some((value * multiplier).round() as u64)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn f64_to_u64(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}

impl<'de> Deserialize<'de> for LenientU64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct U64Visitor;

        impl Visitor<'_> for U64Visitor {
            type Value = LenientU64;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number, numeric string, or size string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(LenientU64(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(LenientU64(u64::try_from(v).unwrap_or(0)))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Ok(LenientU64(f64_to_u64(v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                let trimmed = v.trim();
                if let Ok(exact) = trimmed.parse::<u64>() {
                    return Ok(LenientU64(exact));
                }
                Ok(LenientU64(parse_human_size(trimmed).unwrap_or(0)))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
                Ok(LenientU64(u64::from(v)))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(LenientU64(0))
            }
        }

        deserializer.deserialize_any(U64Visitor)
    }
}

impl<'de> Deserialize<'de> for LenientF64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct F64Visitor;

        impl Visitor<'_> for F64Visitor {
            type Value = LenientF64;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number or numeric string")
            }

            #[allow(clippy::cast_precision_loss)]
            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(LenientF64(v as f64))
            }

            #[allow(clippy::cast_precision_loss)]
            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(LenientF64(v as f64))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Ok(LenientF64(if v.is_finite() { v } else { 0.0 }))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(LenientF64(parse_number_lenient(v).unwrap_or(0.0)))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
                Ok(LenientF64(if v { 1.0 } else { 0.0 }))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(LenientF64(0.0))
            }
        }

        deserializer.deserialize_any(F64Visitor)
    }
}

impl<'de> Deserialize<'de> for LenientBool {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BoolVisitor;

        impl Visitor<'_> for BoolVisitor {
            type Value = LenientBool;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a boolean, 0/1, or boolean-like string")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
                Ok(LenientBool(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(LenientBool(v != 0))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(LenientBool(v != 0))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Ok(LenientBool(v.abs() > f64::EPSILON))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                let truthy = matches!(
                    v.trim().to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "y" | "on"
                );
                Ok(LenientBool(truthy))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(LenientBool(false))
            }
        }

        deserializer.deserialize_any(BoolVisitor)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Row {
        #[serde(default)]
        seeders: LenientU64,
        #[serde(default)]
        size: LenientU64,
        #[serde(default)]
        progress: LenientF64,
        #[serde(default)]
        free: LenientBool,
    }

    #[test]
    fn test_accepts_numbers_and_strings() {
        let a: Row = serde_json::from_str(r#"{"seeders": 12, "free": 1}"#).unwrap();
        let b: Row = serde_json::from_str(r#"{"seeders": "12", "free": "1"}"#).unwrap();
        assert_eq!(a.seeders, b.seeders);
        assert_eq!(a.free, b.free);
        assert!(a.free.0);
    }

    #[test]
    fn test_human_size_and_percentage() {
        let row: Row =
            serde_json::from_str(r#"{"size": "1.5 GiB", "progress": "45%"}"#).unwrap();
        assert_eq!(row.size.0, 1_610_612_736);
        assert!((row.progress.0 - 45.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_garbage_and_null_fall_back_to_zero() {
        let row: Row = serde_json::from_str(
            r#"{"seeders": "n/a", "size": null, "progress": "", "free": "no"}"#,
        )
        .unwrap();
        assert_eq!(row.seeders.0, 0);
        assert_eq!(row.size.0, 0);
        assert!(row.progress.0.abs() < f64::EPSILON);
        assert!(!row.free.0);
    }

    #[test]
    fn test_missing_fields_default() {
        let row: Row = serde_json::from_str("{}").unwrap();
        assert_eq!(row.seeders.0, 0);
        assert!(!row.free.0);
    }

    #[test]
    fn test_parse_number_lenient() {
        assert_eq!(parse_number_lenient("1,234.5 MB"), Some(1234.5));
        assert_eq!(parse_number_lenient("-3"), Some(-3.0));
        assert_eq!(parse_number_lenient("abc"), None);
    }

    #[test]
    fn test_parse_human_size_units() {
        assert_eq!(parse_human_size("700 MB"), Some(700 * 1024 * 1024));
        assert_eq!(parse_human_size("512"), Some(512));
        assert_eq!(parse_human_size("3 parsecs"), None);
    }
}
