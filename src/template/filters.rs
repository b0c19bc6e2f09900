//! Filters and functions available to sandboxed templates.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};
use rand::Rng;
use serde_json::Value;

use super::render::{compare, eval_error, number, range_values, to_display, to_number};
use super::TemplateError;

const DEFAULT_DATE_FORMAT: &str = "F j, Y H:i";

pub(super) fn apply_filter(name: &str, input: Value, args: Vec<Value>) -> Result<Value, TemplateError> {
    match name {
        "escape" | "e" => {
            let strategy = arg_str(&args, 0, "html");
            escape(&to_display(&input), &strategy).map(Value::String)
        }
        "raw" => Ok(input),
        "lower" => Ok(Value::String(to_display(&input).to_lowercase())),
        "upper" => Ok(Value::String(to_display(&input).to_uppercase())),
        "capitalize" => Ok(Value::String(capitalize(&to_display(&input)))),
        "title" => Ok(Value::String(title(&to_display(&input)))),
        "length" => Ok(Value::from(length(&input))),
        "trim" => {
            let chars = args.first().map(to_display);
            let side = arg_str(&args, 1, "both");
            trim(&to_display(&input), chars.as_deref(), &side).map(Value::String)
        }
        "round" => {
            let precision = match args.first() {
                Some(v) => to_number(v)? as i32,
                None => 0,
            };
            let method = arg_str(&args, 1, "common");
            round(to_number(&input)?, precision, &method)
        }
        "date" => {
            let format = arg_str(&args, 0, DEFAULT_DATE_FORMAT);
            let moment = parse_datetime(&input)?;
            Ok(Value::String(format_php_date(&moment, &format)))
        }
        other => Err(eval_error(format!("filter {} is not implemented", other))),
    }
}

pub(super) fn call_function(name: &str, args: Vec<Value>) -> Result<Value, TemplateError> {
    match name {
        "date" => {
            let moment = parse_datetime(args.first().unwrap_or(&Value::Null))?;
            Ok(Value::String(moment.to_rfc3339()))
        }
        "min" => extreme(args, std::cmp::Ordering::Less),
        "max" => extreme(args, std::cmp::Ordering::Greater),
        "random" => random(&args),
        "range" => {
            let (Some(low), Some(high)) = (args.first(), args.get(1)) else {
                return Err(eval_error("range() needs a low and a high bound"));
            };
            let step = match args.get(2) {
                Some(step) => to_number(step)?,
                None => 1.0,
            };
            range_values(low, high, step)
        }
        other => Err(eval_error(format!("function {} is not implemented", other))),
    }
}

fn arg_str(args: &[Value], index: usize, default: &str) -> String {
    args.get(index)
        .map(to_display)
        .unwrap_or_else(|| default.to_string())
}

fn length(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => to_display(other).chars().count(),
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
        None => String::new(),
    }
}

fn title(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut word_start = true;
    for c in text.chars() {
        if word_start {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        word_start = !c.is_alphanumeric() && c != '\'';
    }
    out
}

fn trim(text: &str, chars: Option<&str>, side: &str) -> Result<String, TemplateError> {
    let strip = |c: char| match chars {
        Some(set) => set.contains(c),
        None => c.is_whitespace() || c == '\0',
    };
    let trimmed = match side {
        "both" => text.trim_matches(strip),
        "left" => text.trim_start_matches(strip),
        "right" => text.trim_end_matches(strip),
        other => return Err(eval_error(format!("unknown trim side {}", other))),
    };
    Ok(trimmed.to_string())
}

fn round(value: f64, precision: i32, method: &str) -> Result<Value, TemplateError> {
    let factor = 10f64.powi(precision);
    let scaled = value * factor;
    let rounded = match method {
        "common" => scaled.round(),
        "ceil" => scaled.ceil(),
        "floor" => scaled.floor(),
        other => return Err(eval_error(format!("unknown rounding method {}", other))),
    };
    Ok(number(rounded / factor))
}

fn extreme(args: Vec<Value>, wanted: std::cmp::Ordering) -> Result<Value, TemplateError> {
    let values = match args.as_slice() {
        [Value::Array(items)] => items.clone(),
        [Value::Object(map)] => map.values().cloned().collect(),
        _ => args,
    };
    let mut best: Option<Value> = None;
    for value in values {
        best = match best {
            Some(current) if compare(&value, &current)? != wanted => Some(current),
            _ => Some(value),
        };
    }
    best.ok_or_else(|| eval_error("min/max need at least one value"))
}

fn random(args: &[Value]) -> Result<Value, TemplateError> {
    let mut rng = rand::thread_rng();
    match args {
        [] => Ok(Value::from(rng.gen_range(0..=i64::from(i32::MAX)))),
        [Value::String(text)] => {
            let chars: Vec<char> = text.chars().collect();
            if chars.is_empty() {
                return Ok(Value::String(String::new()));
            }
            Ok(Value::String(chars[rng.gen_range(0..chars.len())].to_string()))
        }
        [Value::Array(items)] => {
            if items.is_empty() {
                return Err(eval_error("random() of an empty sequence"));
            }
            Ok(items[rng.gen_range(0..items.len())].clone())
        }
        [max] => {
            let max = to_number(max)? as i64;
            Ok(Value::from(rng.gen_range(max.min(0)..=max.max(0))))
        }
        [low, high, ..] => {
            let (low, high) = (to_number(low)? as i64, to_number(high)? as i64);
            Ok(Value::from(rng.gen_range(low.min(high)..=low.max(high))))
        }
    }
}

pub(super) fn escape(text: &str, strategy: &str) -> Result<String, TemplateError> {
    match strategy {
        "html" => Ok(escape_html(text)),
        "html_attr" => Ok(text
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, ',' | '.' | '-' | '_') {
                    c.to_string()
                } else {
                    format!("&#x{:02X};", c as u32)
                }
            })
            .collect()),
        "js" => Ok(text
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, ',' | '.' | '_') {
                    c.to_string()
                } else {
                    let mut units = [0u16; 2];
                    c.encode_utf16(&mut units)
                        .iter()
                        .map(|u| format!("\\u{:04X}", u))
                        .collect()
                }
            })
            .collect()),
        "url" => Ok(text
            .bytes()
            .map(|b| {
                if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
                    (b as char).to_string()
                } else {
                    format!("%{:02X}", b)
                }
            })
            .collect()),
        other => Err(eval_error(format!("unknown escaping strategy {}", other))),
    }
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            other => out.push(other),
        }
    }
    out
}

/// Accepts RFC 3339, `YYYY-MM-DD[ HH:MM[:SS]]` and unix timestamps. Null and
/// `"now"` mean the current time.
pub(crate) fn parse_datetime(value: &Value) -> Result<DateTime<Utc>, TemplateError> {
    match value {
        Value::Null => Ok(Utc::now()),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| eval_error(format!("invalid timestamp {}", n))),
        Value::String(text) => {
            let text = text.trim();
            if text.is_empty() || text == "now" {
                return Ok(Utc::now());
            }
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Ok(parsed.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
                if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
                    return Ok(parsed.and_utc());
                }
            }
            if let Some(midnight) = NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
            {
                return Ok(midnight.and_utc());
            }
            text.parse::<i64>()
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .ok_or_else(|| eval_error(format!("unparseable date {:?}", text)))
        }
        other => Err(eval_error(format!("cannot convert {} to a date", other))),
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(31)
}

/// Format with PHP `date()` letters. Times are UTC.
pub(crate) fn format_php_date(moment: &DateTime<Utc>, format: &str) -> String {
    let mut out = String::new();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        let piece = match c {
            'd' => moment.format("%d").to_string(),
            'D' => moment.format("%a").to_string(),
            'j' => moment.day().to_string(),
            'l' => moment.format("%A").to_string(),
            'N' => moment.weekday().number_from_monday().to_string(),
            'w' => moment.weekday().num_days_from_sunday().to_string(),
            'z' => moment.ordinal0().to_string(),
            'W' => format!("{:02}", moment.iso_week().week()),
            'F' => moment.format("%B").to_string(),
            'm' => moment.format("%m").to_string(),
            'M' => moment.format("%b").to_string(),
            'n' => moment.month().to_string(),
            't' => days_in_month(moment.year(), moment.month()).to_string(),
            'L' => u8::from(NaiveDate::from_ymd_opt(moment.year(), 2, 29).is_some()).to_string(),
            'Y' => moment.year().to_string(),
            'y' => moment.format("%y").to_string(),
            'a' => moment.format("%P").to_string(),
            'A' => moment.format("%p").to_string(),
            'g' => moment.format("%-I").to_string(),
            'G' => moment.hour().to_string(),
            'h' => moment.format("%I").to_string(),
            'H' => moment.format("%H").to_string(),
            'i' => moment.format("%M").to_string(),
            's' => moment.format("%S").to_string(),
            'u' => format!("{:06}", moment.timestamp_subsec_micros()),
            'v' => format!("{:03}", moment.timestamp_subsec_millis()),
            'e' | 'T' => "UTC".to_string(),
            'P' => "+00:00".to_string(),
            'O' => "+0000".to_string(),
            'c' => moment.format("%Y-%m-%dT%H:%M:%S+00:00").to_string(),
            'r' => moment.format("%a, %d %b %Y %H:%M:%S +0000").to_string(),
            'U' => moment.timestamp().to_string(),
            '\\' => chars.next().map(String::from).unwrap_or_default(),
            other => other.to_string(),
        };
        out.push_str(&piece);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter(name: &str, input: Value, args: Vec<Value>) -> Value {
        apply_filter(name, input, args).unwrap()
    }

    #[test]
    fn test_case_filters() {
        assert_eq!(filter("upper", json!("server"), vec![]), json!("SERVER"));
        assert_eq!(filter("capitalize", json!("hELLO world"), vec![]), json!("Hello world"));
        assert_eq!(filter("title", json!("core switch b"), vec![]), json!("Core Switch B"));
    }

    #[test]
    fn test_length_and_trim() {
        assert_eq!(filter("length", json!([1, 2, 3]), vec![]), json!(3));
        assert_eq!(filter("length", json!("héllo"), vec![]), json!(5));
        assert_eq!(filter("length", Value::Null, vec![]), json!(0));
        assert_eq!(filter("trim", json!("  x  "), vec![]), json!("x"));
        assert_eq!(filter("trim", json!("--x--"), vec![json!("-"), json!("left")]), json!("x--"));
    }

    #[test]
    fn test_round_methods() {
        assert_eq!(filter("round", json!(2.5), vec![]), json!(3));
        assert_eq!(filter("round", json!(3.14159), vec![json!(2)]), json!(3.14));
        assert_eq!(filter("round", json!(2.1), vec![json!(0), json!("ceil")]), json!(3));
        assert_eq!(filter("round", json!(2.9), vec![json!(0), json!("floor")]), json!(2));
    }

    #[test]
    fn test_escape_strategies() {
        assert_eq!(escape("<a href='x'>", "html").unwrap(), "&lt;a href=&#039;x&#039;&gt;");
        assert_eq!(escape("a b", "url").unwrap(), "a%20b");
        assert_eq!(escape("a b", "html_attr").unwrap(), "a&#x20;b");
        assert_eq!(escape("a'b", "js").unwrap(), "a\\u0027b");
        assert_eq!(escape("x", "css"), Err(TemplateError::Syntax));
    }

    #[test]
    fn test_date_filter_uses_php_letters() {
        let out = filter("date", json!("2024-03-05 14:07:09"), vec![json!("d/m/Y H:i:s")]);
        assert_eq!(out, json!("05/03/2024 14:07:09"));
        let out = filter("date", json!("2024-02-10"), vec![json!("D, j M y \\a\\t G t L")]);
        assert_eq!(out, json!("Sat, 10 Feb 24 at 0 29 1"));
        let out = filter("date", json!(0), vec![]);
        assert_eq!(out, json!("January 1, 1970 00:00"));
    }

    #[test]
    fn test_functions() {
        assert_eq!(call_function("min", vec![json!(4), json!(2), json!(9)]).unwrap(), json!(2));
        assert_eq!(call_function("max", vec![json!([1, 7, 3])]).unwrap(), json!(7));
        assert_eq!(call_function("range", vec![json!(1), json!(3)]).unwrap(), json!([1, 2, 3]));
        assert_eq!(
            call_function("date", vec![json!("2024-01-02")]).unwrap(),
            json!("2024-01-02T00:00:00+00:00")
        );
        let picked = call_function("random", vec![json!(["a", "b"])]).unwrap();
        assert!(picked == json!("a") || picked == json!("b"));
        let n = call_function("random", vec![json!(5)]).unwrap().as_i64().unwrap();
        assert!((0..=5).contains(&n));
        assert!(call_function("min", vec![]).is_err());
    }
}
