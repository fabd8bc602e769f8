//! Exposition formats served on the metrics path.

use std::collections::HashSet;

pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";
pub const OPEN_METRICS_CONTENT_TYPE: &str =
    "application/openmetrics-text; version=1.0.0; charset=utf-8";

const OPEN_METRICS_MEDIA_TYPE: &str = "application/openmetrics-text";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    OpenMetrics,
}

impl Format {
    /// Picks the format for a request's `Accept` header. OpenMetrics is only
    /// served when it is enabled and the client asks for it.
    pub fn negotiate(accept: Option<&str>, open_metrics_enabled: bool) -> Format {
        if !open_metrics_enabled {
            return Format::Text;
        }
        let wants_open_metrics = accept.is_some_and(|accept| {
            accept.split(',').any(|range| {
                range
                    .split(';')
                    .next()
                    .is_some_and(|media| media.trim().eq_ignore_ascii_case(OPEN_METRICS_MEDIA_TYPE))
            })
        });
        if wants_open_metrics {
            Format::OpenMetrics
        } else {
            Format::Text
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Format::Text => TEXT_CONTENT_TYPE,
            Format::OpenMetrics => OPEN_METRICS_CONTENT_TYPE,
        }
    }

    /// Encodes a Prometheus text exposition in this format.
    pub fn encode(&self, text: String) -> String {
        match self {
            Format::Text => text,
            Format::OpenMetrics => to_open_metrics(&text),
        }
    }
}

/// Rewrites a Prometheus text exposition as OpenMetrics.
///
/// Counter families are named without the `_total` suffix and their samples
/// carry it; the body is terminated by `# EOF`.
pub fn to_open_metrics(text: &str) -> String {
    let mut counters = HashSet::new();
    for line in text.lines() {
        if let Some((name, kind)) = parse_type_line(line) {
            if kind == "counter" {
                counters.insert(name.trim_end_matches("_total").to_string());
            }
        }
    }

    let mut out = String::with_capacity(text.len() + 16);
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(rest) = line
            .strip_prefix("# HELP ")
            .or_else(|| line.strip_prefix("# TYPE "))
        {
            let directive = &line[..line.len() - rest.len()];
            let (name, tail) = rest.split_once(' ').unwrap_or((rest, ""));
            let family = name.trim_end_matches("_total");
            if counters.contains(family) {
                out.push_str(directive);
                out.push_str(family);
                out.push(' ');
                out.push_str(tail);
            } else {
                out.push_str(line);
            }
        } else if line.starts_with('#') {
            out.push_str(line);
        } else {
            let name_end = line.find(['{', ' ']).unwrap_or(line.len());
            let name = &line[..name_end];
            if counters.contains(name) {
                out.push_str(name);
                out.push_str("_total");
                out.push_str(&line[name_end..]);
            } else {
                out.push_str(line);
            }
        }
        out.push('\n');
    }
    out.push_str("# EOF\n");
    out
}

fn parse_type_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("# TYPE ")?;
    let mut parts = rest.split_whitespace();
    Some((parts.next()?, parts.next()?))
}

/// Finds the value of the first sample of `name` whose labels include every
/// `(label, value)` pair.
pub fn find_sample(text: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    text.lines()
        .filter(|line| !line.starts_with('#'))
        .filter(|line| {
            line.strip_prefix(name)
                .is_some_and(|rest| rest.starts_with('{') || rest.starts_with(' '))
        })
        .find(|line| {
            labels
                .iter()
                .all(|(label, value)| line.contains(&format!("{}=\"{}\"", label, value)))
        })
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
}
