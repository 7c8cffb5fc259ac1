//! Textual temporal and spatial values (`T` and `@` sigils).
//!
//! Dates count days since the Unix epoch, times count nanoseconds since
//! midnight. Leap seconds and daylight saving time are ignored.

use std::sync::LazyLock;

use chrono::{Days, NaiveDate};
use regex::{Captures, Regex};

use super::JoltError;
use crate::bolt::packstream::{format_float, marker, PackStreamVersion, Structure, Value};

const NANOS_PER_SECOND: i64 = 1_000_000_000;
const SECONDS_PER_DAY: i64 = 86_400;

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})(?:-(\d{2}))?(?:-(\d{2}))?$").expect("valid date regex")
});

static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(\d{2}):(\d{2})(?::(\d{2}))?(?:\.(\d{1,9}))?",
        r"(Z|\+00|[+-]00(?::?[0-5][0-9]|60)|",
        r"(?:[+-](?:0[1-9]|1[0-9]|2[0-3]))(?::?[0-5][0-9]|60)?)$",
    ))
    .expect("valid time regex")
});

static LOCAL_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{2}):(\d{2})(?::(\d{2}))?(?:\.(\d{1,9}))?$").expect("valid local time regex")
});

static DATE_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}(?:-\d{2})?(?:-\d{2})?)T(.+)$").expect("valid date time regex")
});

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^P(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)D)?",
        r"(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)(?:\.(\d{1,9}))?S)?)?$",
    ))
    .expect("valid duration regex")
});

static POINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:SRID=(\d+);)?\s*",
        r"POINT\s*\(((?:[+-]?\d+(?:\.\d+)? ){1,2}[+-]?\d+(?:\.\d+)?)\)$",
    ))
    .expect("valid point regex")
});

fn parse_error(value: &str, kind: &'static str) -> JoltError {
    JoltError::Parse {
        value: value.to_string(),
        kind,
    }
}

/// Integer capture group, `default` if the group did not participate.
fn group(caps: &Captures<'_>, i: usize, default: i64) -> Option<i64> {
    match caps.get(i) {
        Some(m) => m.as_str().parse().ok(),
        None => Some(default),
    }
}

/// Fraction digits as nanoseconds (`"5"` is 500,000,000).
fn fraction(caps: &Captures<'_>, i: usize) -> Option<i64> {
    match caps.get(i) {
        Some(m) => format!("{:0<9}", m.as_str()).parse().ok(),
        None => Some(0),
    }
}

fn epoch() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1970, 1, 1)
}

fn parse_date(s: &str) -> Option<i64> {
    let caps = DATE_RE.captures(s)?;
    let year = i32::try_from(group(&caps, 1, 1)?).ok()?;
    let month = u32::try_from(group(&caps, 2, 1)?).ok()?;
    let day = u32::try_from(group(&caps, 3, 1)?).ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.signed_duration_since(epoch()?).num_days())
}

fn clock_nanos(caps: &Captures<'_>) -> Option<i64> {
    let hours = group(caps, 1, 0)?;
    let minutes = group(caps, 2, 0)?;
    let seconds = group(caps, 3, 0)?;
    let nanos = fraction(caps, 4)?;
    Some(nanos + (seconds + minutes * 60 + hours * 3600) * NANOS_PER_SECOND)
}

fn parse_offset(s: &str) -> Option<i64> {
    if s == "Z" {
        return Some(0);
    }
    let digits = format!("{:0<5}", s.replace(':', ""));
    let sign = if digits.starts_with('-') { -1 } else { 1 };
    let hours: i64 = digits.get(1..3)?.parse().ok()?;
    let minutes: i64 = digits.get(3..5)?.parse().ok()?;
    Some(sign * (hours * 60 + minutes) * 60)
}

/// `(nanoseconds, utc offset seconds)`
fn parse_time(s: &str) -> Option<(i64, i64)> {
    let caps = TIME_RE.captures(s)?;
    Some((clock_nanos(&caps)?, parse_offset(caps.get(5)?.as_str())?))
}

fn parse_local_time(s: &str) -> Option<i64> {
    clock_nanos(&LOCAL_TIME_RE.captures(s)?)
}

/// `(seconds since epoch in local time, nanoseconds, offset seconds)`
fn parse_date_time(s: &str) -> Option<(i64, i64, i64)> {
    let caps = DATE_TIME_RE.captures(s)?;
    let days = parse_date(caps.get(1)?.as_str())?;
    let (nanos, offset) = parse_time(caps.get(2)?.as_str())?;
    Some((
        days * SECONDS_PER_DAY + nanos.div_euclid(NANOS_PER_SECOND),
        nanos.rem_euclid(NANOS_PER_SECOND),
        offset,
    ))
}

fn parse_local_date_time(s: &str) -> Option<(i64, i64)> {
    let caps = DATE_TIME_RE.captures(s)?;
    let days = parse_date(caps.get(1)?.as_str())?;
    let nanos = parse_local_time(caps.get(2)?.as_str())?;
    Some((
        days * SECONDS_PER_DAY + nanos.div_euclid(NANOS_PER_SECOND),
        nanos.rem_euclid(NANOS_PER_SECOND),
    ))
}

/// `(months, days, seconds, nanoseconds)`
fn parse_duration(s: &str) -> Option<(i64, i64, i64, i64)> {
    let caps = DURATION_RE.captures(s)?;
    let years = group(&caps, 1, 0)?;
    let months = group(&caps, 2, 0)?;
    let days = group(&caps, 3, 0)?;
    let hours = group(&caps, 4, 0)?;
    let minutes = group(&caps, 5, 0)?;
    let seconds = group(&caps, 6, 0)?;
    let nanos = fraction(&caps, 7)?;
    Some((
        months + 12 * years,
        days,
        seconds + minutes * 60 + hours * 3600,
        nanos,
    ))
}

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().copied().map(Value::Integer).collect()
}

/// Decode the string following a `T` sigil.
///
/// Strings starting with `P` are durations; strings with a `:` are times,
/// or date times if they also contain a `T`; anything else is a date.
pub(crate) fn parse_temporal(s: &str, version: PackStreamVersion) -> Result<Structure, JoltError> {
    if s.starts_with('P') {
        return parse_duration(s)
            .map(|(mo, d, sec, ns)| Structure::new(marker::DURATION, ints(&[mo, d, sec, ns])))
            .ok_or_else(|| parse_error(s, "Duration"));
    }
    if s.contains(':') {
        if s.contains('T') {
            if let Some((seconds, nanos, offset)) = parse_date_time(s) {
                return Ok(match version {
                    PackStreamVersion::V1 => {
                        Structure::new(marker::DATE_TIME, ints(&[seconds, nanos, offset]))
                    }
                    PackStreamVersion::V2 => Structure::new(
                        marker::DATE_TIME_UTC,
                        ints(&[seconds - offset, nanos, offset]),
                    ),
                });
            }
            return parse_local_date_time(s)
                .map(|(sec, ns)| Structure::new(marker::LOCAL_DATE_TIME, ints(&[sec, ns])))
                .ok_or_else(|| parse_error(s, "DateTime or LocalDateTime"));
        }
        if let Some((nanos, offset)) = parse_time(s) {
            return Ok(Structure::new(marker::TIME, ints(&[nanos, offset])));
        }
        return parse_local_time(s)
            .map(|ns| Structure::new(marker::LOCAL_TIME, ints(&[ns])))
            .ok_or_else(|| parse_error(s, "Time or LocalTime"));
    }
    parse_date(s)
        .map(|days| Structure::new(marker::DATE, ints(&[days])))
        .ok_or_else(|| parse_error(s, "Date"))
}

/// Decode the string following an `@` sigil: `SRID=<id>;POINT(x y[ z])`.
pub(crate) fn parse_point(s: &str) -> Result<Structure, JoltError> {
    let caps = POINT_RE.captures(s).ok_or_else(|| parse_error(s, "Point"))?;
    let srid: i64 = caps
        .get(1)
        .ok_or_else(|| JoltError::value(format!("Point {} is missing an SRID", s)))?
        .as_str()
        .parse()
        .map_err(|_| parse_error(s, "Point"))?;
    let coords = caps
        .get(2)
        .map(|m| m.as_str())
        .unwrap_or_default()
        .split_whitespace()
        .map(|c| c.parse::<f64>().map(Value::Float))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| parse_error(s, "Point"))?;
    let tag = if coords.len() == 3 {
        marker::POINT_3D
    } else {
        marker::POINT_2D
    };
    let mut fields = vec![Value::Integer(srid)];
    fields.extend(coords);
    Ok(Structure::new(tag, fields))
}

fn date_from_days(days: i64) -> Option<NaiveDate> {
    let epoch = epoch()?;
    if days >= 0 {
        epoch.checked_add_days(Days::new(days as u64))
    } else {
        epoch.checked_sub_days(Days::new(days.unsigned_abs()))
    }
}

fn format_date(days: i64) -> Option<String> {
    Some(date_from_days(days)?.format("%Y-%m-%d").to_string())
}

/// Seconds with the fraction trimmed of trailing zeros, e.g. `05.25`.
fn format_seconds(seconds: i64, nanos: i64) -> String {
    let mut out = format!("{:02}", seconds);
    if nanos != 0 {
        let frac = format!("{:09}", nanos);
        out.push('.');
        out.push_str(frac.trim_end_matches('0'));
    }
    out
}

fn format_clock(nanos: i64) -> Option<String> {
    if nanos < 0 {
        return None;
    }
    let hours = nanos / (3600 * NANOS_PER_SECOND);
    let minutes = nanos / (60 * NANOS_PER_SECOND) % 60;
    let seconds = nanos / NANOS_PER_SECOND % 60;
    Some(format!(
        "{:02}:{:02}:{}",
        hours,
        minutes,
        format_seconds(seconds, nanos % NANOS_PER_SECOND)
    ))
}

fn format_offset(offset: i64) -> Option<String> {
    if offset % 60 != 0 {
        return None;
    }
    let sign = if offset < 0 { '-' } else { '+' };
    let minutes = offset.abs() / 60;
    Some(format!("{}{:02}{:02}", sign, minutes / 60, minutes % 60))
}

fn format_local_date_time(seconds: i64, nanos: i64) -> Option<String> {
    let seconds = seconds.checked_add(nanos.div_euclid(NANOS_PER_SECOND))?;
    let nanos = nanos.rem_euclid(NANOS_PER_SECOND);
    let days = seconds.div_euclid(SECONDS_PER_DAY);
    let clock = seconds.rem_euclid(SECONDS_PER_DAY) * NANOS_PER_SECOND + nanos;
    Some(format!("{}T{}", format_date(days)?, format_clock(clock)?))
}

fn format_duration(months: i64, days: i64, seconds: i64, nanos: i64) -> String {
    let part = |value: i64, unit: char| {
        if value != 0 {
            format!("{:02}{}", value, unit)
        } else {
            String::new()
        }
    };
    let seconds = seconds + nanos.div_euclid(NANOS_PER_SECOND);
    let nanos = nanos.rem_euclid(NANOS_PER_SECOND);
    format!(
        "P{}{}{}T{}{}{}S",
        part(months.div_euclid(12), 'Y'),
        part(months.rem_euclid(12), 'M'),
        part(days, 'D'),
        part(seconds.div_euclid(3600), 'H'),
        part(seconds.rem_euclid(3600).div_euclid(60), 'M'),
        format_seconds(seconds.rem_euclid(60), nanos),
    )
}

/// Render a temporal structure as the string following a `T` sigil.
///
/// Returns `None` for structures that have no textual form (zone id date
/// times, out of range values).
pub(crate) fn render_temporal(s: &Structure) -> Option<String> {
    let int = |i: usize| s.fields.get(i).and_then(Value::as_int);
    match s.tag {
        marker::DATE => format_date(int(0)?),
        marker::TIME => Some(format!("{}{}", format_clock(int(0)?)?, format_offset(int(1)?)?)),
        marker::LOCAL_TIME => format_clock(int(0)?),
        marker::DATE_TIME | marker::DATE_TIME_UTC => {
            let offset = int(2)?;
            let seconds = if s.tag == marker::DATE_TIME_UTC {
                int(0)?.checked_add(offset)?
            } else {
                int(0)?
            };
            Some(format!(
                "{}{}",
                format_local_date_time(seconds, int(1)?)?,
                format_offset(offset)?
            ))
        }
        marker::LOCAL_DATE_TIME => format_local_date_time(int(0)?, int(1)?),
        marker::DURATION => Some(format_duration(int(0)?, int(1)?, int(2)?, int(3)?)),
        _ => None,
    }
}

/// Render a point structure as the string following an `@` sigil.
pub(crate) fn render_point(s: &Structure) -> Option<String> {
    let srid = s.fields.first()?.as_int()?;
    let coords = s.fields[1..]
        .iter()
        .map(|v| v.as_float().map(format_float))
        .collect::<Option<Vec<_>>>()?;
    Some(format!("SRID={};POINT({})", srid, coords.join(" ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn fields(s: &Structure) -> Vec<i64> {
        s.fields.iter().map(|v| v.as_int().unwrap()).collect()
    }

    #[rstest]
    #[case("2020-01-02", vec![18263])]
    #[case("2020-01", vec![18262])]
    #[case("2020", vec![18262])]
    #[case("1969-12-31", vec![-1])]
    fn test_date(#[case] input: &str, #[case] expected: Vec<i64>) {
        let s = parse_temporal(input, PackStreamVersion::V1).unwrap();
        assert_eq!(s.tag, marker::DATE);
        assert_eq!(fields(&s), expected);
    }

    #[rstest]
    #[case("12:00:00Z", 12 * 3600 * NANOS_PER_SECOND, 0)]
    #[case("12:00:00.5+01:00", (12 * 3600) * NANOS_PER_SECOND + 500_000_000, 3600)]
    #[case("00:01-0130", 60 * NANOS_PER_SECOND, -5400)]
    #[case("12:00:00+00", 12 * 3600 * NANOS_PER_SECOND, 0)]
    fn test_time(#[case] input: &str, #[case] nanos: i64, #[case] offset: i64) {
        let s = parse_temporal(input, PackStreamVersion::V1).unwrap();
        assert_eq!(s.tag, marker::TIME);
        assert_eq!(fields(&s), vec![nanos, offset]);
    }

    #[test]
    fn test_local_time() {
        let s = parse_temporal("01:02:03.000000004", PackStreamVersion::V1).unwrap();
        assert_eq!(s.tag, marker::LOCAL_TIME);
        assert_eq!(fields(&s), vec![3723 * NANOS_PER_SECOND + 4]);
    }

    #[test]
    fn test_date_time_versions() {
        let v1 = parse_temporal("1970-01-02T01:00:00+01:00", PackStreamVersion::V1).unwrap();
        assert_eq!(v1.tag, marker::DATE_TIME);
        assert_eq!(fields(&v1), vec![SECONDS_PER_DAY + 3600, 0, 3600]);

        let v2 = parse_temporal("1970-01-02T01:00:00+01:00", PackStreamVersion::V2).unwrap();
        assert_eq!(v2.tag, marker::DATE_TIME_UTC);
        assert_eq!(fields(&v2), vec![SECONDS_PER_DAY, 0, 3600]);

        let local = parse_temporal("1970-01-01T00:00:01", PackStreamVersion::V2).unwrap();
        assert_eq!(local.tag, marker::LOCAL_DATE_TIME);
        assert_eq!(fields(&local), vec![1, 0]);
    }

    #[test]
    fn test_duration() {
        let s = parse_temporal("P1Y2M3DT4H5M6.7S", PackStreamVersion::V1).unwrap();
        assert_eq!(s.tag, marker::DURATION);
        assert_eq!(fields(&s), vec![14, 3, 4 * 3600 + 5 * 60 + 6, 700_000_000]);
        assert!(parse_temporal("P5W", PackStreamVersion::V1).is_err());
    }

    #[test]
    fn test_parse_errors() {
        let err = parse_temporal("2020-13-01", PackStreamVersion::V1).unwrap_err();
        assert_eq!(err.to_string(), "Couldn't parse 2020-13-01 as Date");
        assert!(parse_temporal("12:0:0Z", PackStreamVersion::V1).is_err());
    }

    #[test]
    fn test_point() {
        let s = parse_point("SRID=7203;POINT(1 -2.5)").unwrap();
        assert_eq!(s.tag, marker::POINT_2D);
        assert_eq!(
            s.fields,
            vec![Value::Integer(7203), Value::Float(1.0), Value::Float(-2.5)]
        );
        let s = parse_point("SRID=9157; POINT(1 2 3)").unwrap();
        assert_eq!(s.tag, marker::POINT_3D);
        assert!(parse_point("POINT(1 2)").is_err());
        assert!(parse_point("SRID=1;POINT(1, 2)").is_err());
        assert_eq!(render_point(&parse_point("SRID=1;POINT(1 2.5)").unwrap()).unwrap(), "SRID=1;POINT(1.0 2.5)");
    }

    #[rstest]
    #[case("2020-01-02")]
    #[case("12:30:00.25+0100")]
    #[case("12:30:00-0130")]
    #[case("23:59:59.999999999")]
    #[case("2020-02-29T10:00:00+0200")]
    #[case("2020-02-29T10:00:05")]
    fn test_render_reverses_parse(#[case] text: &str) {
        for version in [PackStreamVersion::V1, PackStreamVersion::V2] {
            let s = parse_temporal(text, version).unwrap();
            assert_eq!(render_temporal(&s).unwrap(), text);
        }
    }

    #[test]
    fn test_render_duration() {
        let s = Structure::new(marker::DURATION, ints(&[14, 3, 3661, 500_000_000]));
        assert_eq!(render_temporal(&s).unwrap(), "P01Y02M03DT01H01M01.5S");
        let s = Structure::new(marker::DURATION, ints(&[0, 0, 0, 0]));
        assert_eq!(render_temporal(&s).unwrap(), "PT00S");
    }

    #[test]
    fn test_render_unrepresentable() {
        let s = Structure::new(
            marker::DATE_TIME_ZONE_ID,
            vec![Value::Integer(0), Value::Integer(0), Value::from("Europe/Paris")],
        );
        assert!(render_temporal(&s).is_none());
        let s = Structure::new(marker::TIME, ints(&[0, 30]));
        assert!(render_temporal(&s).is_none());
    }
}
