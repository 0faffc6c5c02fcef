//! InfluxDB line protocol encoding, plus a small parser used by the
//! in-memory target to ingest what the write client sends.

use std::collections::BTreeMap;

use crate::point::{FieldValue, Point};

fn escape(value: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub(crate) fn escape_measurement(value: &str) -> String {
    escape(value, &[',', ' '])
}

pub(crate) fn escape_key(value: &str) -> String {
    escape(value, &[',', '=', ' '])
}

pub(crate) fn escape_string_field(value: &str) -> String {
    escape(value, &['"', '\\'])
}

/// Encodes one point as `measurement,tags fields timestamp`.
#[must_use]
pub fn encode_point(point: &Point) -> String {
    let mut line = escape_measurement(&point.measurement);
    for (key, value) in &point.tags {
        if value.is_empty() {
            continue;
        }
        line.push(',');
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&escape_key(value));
    }
    line.push(' ');
    let fields: Vec<String> = point
        .fields
        .iter()
        .map(|(key, value)| format!("{}={}", escape_key(key), value))
        .collect();
    line.push_str(&fields.join(","));
    line.push(' ');
    line.push_str(&point.timestamp.to_string());
    line
}

/// Encodes points as a newline-separated body.
#[must_use]
pub fn encode_points(points: &[Point]) -> String {
    let mut body = String::new();
    for (i, point) in points.iter().enumerate() {
        if i > 0 {
            body.push('\n');
        }
        body.push_str(&encode_point(point));
    }
    body
}

/// Splits on `sep` outside of backslash escapes and double quotes.
fn split_unescaped(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    let mut quoted = false;
    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => quoted = !quoted,
            c if c == sep && !quoted => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn parse_field_value(raw: &str) -> Result<FieldValue, String> {
    if let Some(int) = raw.strip_suffix('i') {
        return int
            .parse::<i64>()
            .map(FieldValue::Integer)
            .map_err(|e| format!("bad integer `{raw}`: {e}"));
    }
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return Ok(FieldValue::String(unescape(&raw[1..raw.len() - 1])));
    }
    match raw {
        "true" | "t" | "T" | "TRUE" | "True" => return Ok(FieldValue::Boolean(true)),
        "false" | "f" | "F" | "FALSE" | "False" => return Ok(FieldValue::Boolean(false)),
        _ => {}
    }
    raw.parse::<f64>()
        .map(FieldValue::Float)
        .map_err(|e| format!("bad float `{raw}`: {e}"))
}

/// Parses one line. Points without a timestamp are stamped with `default_ts`.
///
/// # Errors
///
/// Returns a description of the first malformed element.
pub fn parse_line(line: &str, default_ts: i64) -> Result<Point, String> {
    let sections = split_unescaped(line.trim(), ' ');
    let (series, fields, ts) = match sections.as_slice() {
        [series, fields] => (*series, *fields, None),
        [series, fields, ts] => (*series, *fields, Some(*ts)),
        _ => return Err(format!("expected 2 or 3 sections in `{line}`")),
    };

    let mut series_parts = split_unescaped(series, ',').into_iter();
    let measurement = series_parts
        .next()
        .filter(|m| !m.is_empty())
        .map(unescape)
        .ok_or_else(|| format!("missing measurement in `{line}`"))?;

    let mut tags = BTreeMap::new();
    for pair in series_parts {
        let kv = split_unescaped(pair, '=');
        let [key, value] = kv.as_slice() else {
            return Err(format!("bad tag `{pair}`"));
        };
        tags.insert(unescape(key), unescape(value));
    }

    let mut field_map = BTreeMap::new();
    for pair in split_unescaped(fields, ',') {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(format!("bad field `{pair}`"));
        };
        field_map.insert(unescape(key), parse_field_value(value)?);
    }
    if field_map.is_empty() {
        return Err(format!("no fields in `{line}`"));
    }

    let timestamp = match ts {
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|e| format!("bad timestamp `{raw}`: {e}"))?,
        None => default_ts,
    };

    Ok(Point {
        measurement,
        tags,
        fields: field_map,
        timestamp,
    })
}

/// Parses a newline-separated body, skipping blank lines and comments.
///
/// # Errors
///
/// Returns the first line that fails to parse.
pub fn parse_body(body: &str, default_ts: i64) -> Result<Vec<Point>, String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| parse_line(line, default_ts))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_tags_fields_and_timestamp() {
        let point = Point::new("cpu", 42)
            .tag("device_id", "dev-3")
            .tag("run_id", "abc")
            .field("value", 3.0)
            .field("seq", 3_i64);
        assert_eq!(
            encode_point(&point),
            "cpu,device_id=dev-3,run_id=abc seq=3i,value=3 42"
        );
    }

    #[test]
    fn escapes_special_characters() {
        let point = Point::new("my meas", 1)
            .tag("host name", "a,b=c")
            .field("v", 1_i64);
        let line = encode_point(&point);
        assert_eq!(line, "my\\ meas,host\\ name=a\\,b\\=c v=1i 1");
        let parsed = parse_line(&line, 0).unwrap();
        assert_eq!(parsed, point);
    }

    #[test]
    fn empty_tag_values_are_dropped() {
        let point = Point::new("cpu", 1).tag("run_id", "").field("v", 1_i64);
        assert_eq!(encode_point(&point), "cpu v=1i 1");
    }

    #[test]
    fn parses_body_with_default_timestamp() {
        let points = parse_body("cpu v=1.5\n\n# comment\nmem,h=a used=3i 10\n", 99).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].timestamp, 99);
        assert_eq!(points[0].fields["v"], FieldValue::Float(1.5));
        assert_eq!(points[1].tags["h"], "a");
        assert_eq!(points[1].fields["used"], FieldValue::Integer(3));
    }

    #[test]
    fn string_fields_may_contain_spaces() {
        let point = parse_line("kpi,env=ci note=\"hello world\",ok=true 5", 0).unwrap();
        assert_eq!(point.fields["note"], FieldValue::String("hello world".into()));
        assert_eq!(point.fields["ok"], FieldValue::Boolean(true));
    }

    #[test]
    fn rejects_lines_without_fields() {
        assert!(parse_line("cpu", 0).is_err());
        assert!(parse_line("cpu,host=a 5i 1", 0).is_err());
    }
}
