// Tally - An asynchronous UDP Statsd client for Rust!
//
// Copyright 2024-2026 The Tally Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Functions for building sanitized Statsd lines.
//!
//! Every line has the form
//!
//! ``` text
//! <bucket>[,<key>=<value>,...]:<numeric>|<type>[@<rate>]
//! ```
//!
//! where the bucket is the sanitized application prefix and measurement
//! name joined by a `.` and the optional tag block is separated from the
//! bucket by a `,`. None of the functions here hold any state, they may be
//! called from any number of threads at once.

use crate::types::MetricLine;
use indexmap::IndexMap;
use std::fmt::{self, Write};

/// Key-value dimensions attached to a metric.
///
/// Tags are written to the wire in insertion order.
pub type Tags = IndexMap<String, String>;

// Characters that delimit parts of the tag block and so can't appear
// inside a tag key or value once it has been sanitized.
const TAG_RESERVED: &[char] = &[',', '=', ':', '|'];

const TAG_SEPARATOR: char = ',';
const BUCKET_SEPARATOR: char = '.';

/// Type of metric that knows how to display itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricType {
    Counter,
    Timer,
    Gauge,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MetricType::Counter => "c".fmt(f),
            MetricType::Timer => "ms".fmt(f),
            MetricType::Gauge => "g".fmt(f),
        }
    }
}

/// Holder for primitive metric values that knows how to display itself
#[derive(Debug, Clone, Copy)]
enum MetricValue {
    Signed(i64),
    Unsigned(u64),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MetricValue::Signed(v) => v.fmt(f),
            MetricValue::Unsigned(v) => v.fmt(f),
        }
    }
}

#[derive(Debug, Clone)]
struct MetricFormatter {
    bucket: String,
    tags: String,
    val: MetricValue,
    type_: MetricType,
    rate: Option<f64>,
}

impl MetricFormatter {
    fn new(prefix: &str, measurement: &str, tags: &Tags, val: MetricValue, type_: MetricType) -> Self {
        MetricFormatter {
            bucket: build_bucket(prefix, measurement),
            tags: join(tags),
            val,
            type_,
            rate: None,
        }
    }

    fn with_rate(mut self, rate: f64) -> Self {
        self.rate = Some(rate);
        self
    }

    #[rustfmt::skip]
    fn size_hint(&self) -> usize {
        self.bucket.len()
            + 1 /* , */ + self.tags.len()
            + 1 /* : */ + 20 /* value */
            + 1 /* | */ + 2 /* type */
            + self.rate.map_or(0, |_| 1 /* @ */ + 5 /* rate */)
    }

    fn format(&self) -> MetricLine {
        let mut out = String::with_capacity(self.size_hint());
        out.push_str(&self.bucket);
        if !self.tags.is_empty() {
            out.push(TAG_SEPARATOR);
            out.push_str(&self.tags);
        }

        let _ = write!(out, ":{}|{}", self.val, self.type_);
        if let Some(rate) = self.rate {
            let _ = write!(out, "@{:.3}", rate);
        }

        MetricLine::new(out)
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Clean up a single part of a metric name or tag.
///
/// All whitespace is removed, leading and trailing characters that aren't
/// ASCII letters, digits, or `_` are stripped, and runs of `.` are collapsed
/// into a single `.`. Sanitizing an already sanitized string returns it
/// unchanged.
///
/// # Example
///
/// ```
/// use tally::builder::sanitize;
///
/// assert_eq!("a.b.c", sanitize("..a..b .c.."));
/// assert_eq!("abc", sanitize(", ,abc, ,"));
/// assert_eq!("", sanitize(""));
/// ```
pub fn sanitize(src: &str) -> String {
    if src.is_empty() {
        return String::new();
    }

    let compact: String = src.chars().filter(|c| !c.is_whitespace()).collect();
    let stripped = compact.trim_matches(|c: char| !is_word_char(c));

    // Both ends are word characters at this point so there is nothing
    // left to trim once the separators have been collapsed.
    let mut out = String::with_capacity(stripped.len());
    let mut last = None;
    for c in stripped.chars() {
        if c == BUCKET_SEPARATOR && last == Some(BUCKET_SEPARATOR) {
            continue;
        }

        out.push(c);
        last = Some(c);
    }

    out
}

fn sanitize_tag(src: &str) -> String {
    sanitize(src).replace(TAG_RESERVED, "_")
}

/// Join tags into the `key=value,key=value` form used on the wire.
///
/// Keys and values are sanitized and any `,`, `=`, `:`, or `|` left inside
/// them are replaced with `_` so that the tag block can always be split
/// apart again. No tags results in an empty string.
pub fn join(tags: &Tags) -> String {
    let mut out = String::new();
    for (i, (key, value)) in tags.iter().enumerate() {
        if i > 0 {
            out.push(TAG_SEPARATOR);
        }

        out.push_str(&sanitize_tag(key));
        out.push('=');
        out.push_str(&sanitize_tag(value));
    }

    out
}

/// Build a bucket name from an application prefix and measurement name.
///
/// Both parts are sanitized. If either ends up empty it's left out along
/// with the `.` that would have separated the two.
///
/// # Example
///
/// ```
/// use tally::builder::build_bucket;
///
/// assert_eq!("a.b", build_bucket("", "a.b"));
/// assert_eq!("a", build_bucket("a", ""));
/// assert_eq!("app.r1.r2.r3", build_bucket("app", ".r1..r2. .r3  .."));
/// ```
pub fn build_bucket(prefix: &str, measurement: &str) -> String {
    let prefix = sanitize(prefix);
    let measurement = sanitize(measurement);

    if prefix.is_empty() {
        measurement
    } else if measurement.is_empty() {
        prefix
    } else {
        let mut out = prefix;
        out.push(BUCKET_SEPARATOR);
        out.push_str(&measurement);
        out
    }
}

/// Build a counter line, `<bucket>:<count>|c`
pub fn build_counter(prefix: &str, measurement: &str, tags: &Tags, count: i64) -> MetricLine {
    MetricFormatter::new(prefix, measurement, tags, MetricValue::Signed(count), MetricType::Counter).format()
}

/// Build a gauge line, `<bucket>:<reading>|g`
pub fn build_gauge(prefix: &str, measurement: &str, tags: &Tags, reading: i64) -> MetricLine {
    MetricFormatter::new(prefix, measurement, tags, MetricValue::Signed(reading), MetricType::Gauge).format()
}

/// Build a timer line, `<bucket>:<duration>|ms`
pub fn build_timer(prefix: &str, measurement: &str, tags: &Tags, duration_ms: u64) -> MetricLine {
    MetricFormatter::new(prefix, measurement, tags, MetricValue::Unsigned(duration_ms), MetricType::Timer).format()
}

/// Build a sampled counter line, `<bucket>:<count>|c@<rate>`
///
/// The sample rate is always written with three decimal places.
pub fn build_sample_counter(prefix: &str, measurement: &str, tags: &Tags, count: i64, sample_rate: f64) -> MetricLine {
    MetricFormatter::new(prefix, measurement, tags, MetricValue::Signed(count), MetricType::Counter)
        .with_rate(sample_rate)
        .format()
}
