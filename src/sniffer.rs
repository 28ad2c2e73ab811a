//! Detection of the trace format from the first bytes of the input.
//!
//! Stateless and total: any byte sequence classifies as exactly one type,
//! falling back to `Unknown`. Fixed magic numbers are checked first, then
//! textual heuristics over a bounded lookahead.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

pub const GUESS_TRACE_MAX_LOOKAHEAD: usize = 64;

const FUCHSIA_MAGIC: &[u8] = &[0x10, 0x00, 0x04, 0x46, 0x78, 0x54, 0x16, 0x00];
const PERF_MAGIC: &[u8] = b"PERFILE2";
const ZIP_MAGIC: &[u8] = &[b'P', b'K', 0x03, 0x04];
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];

lazy_static! {
    // Logcat threadtime lines: "MM-DD HH:MM:SS.mmm  PID  TID LEVEL TAG: ..."
    static ref LOGCAT_LINE: Regex =
        Regex::new(r"^\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d+\s+\d+\s+\d+\s+[VDIWEF]\s").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceType {
    Unknown,
    Json,
    Proto,
    NinjaLog,
    Fuchsia,
    Systrace,
    Gzip,
    Ctrace,
    Zip,
    PerfData,
    AndroidLogcat,
}

impl fmt::Display for TraceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TraceType::Unknown => "unknown trace",
            TraceType::Json => "JSON trace",
            TraceType::Proto => "proto trace",
            TraceType::NinjaLog => "ninja log",
            TraceType::Fuchsia => "fuchsia trace",
            TraceType::Systrace => "systrace trace",
            TraceType::Gzip => "gzip trace",
            TraceType::Ctrace => "ctrace trace",
            TraceType::Zip => "ZIP file",
            TraceType::PerfData => "perf data",
            TraceType::AndroidLogcat => "Android logcat",
        };
        f.write_str(name)
    }
}

fn first_line(data: &[u8]) -> &[u8] {
    match data.iter().position(|&b| b == b'\n') {
        Some(pos) => &data[..pos],
        None => &[],
    }
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

pub fn guess_trace_type(data: &[u8]) -> TraceType {
    if data.is_empty() {
        return TraceType::Unknown;
    }

    if data.starts_with(FUCHSIA_MAGIC) {
        return TraceType::Fuchsia;
    }
    if data.starts_with(PERF_MAGIC) {
        return TraceType::PerfData;
    }
    if data.starts_with(ZIP_MAGIC) {
        return TraceType::Zip;
    }
    if data.starts_with(GZIP_MAGIC) {
        return TraceType::Gzip;
    }

    let lookahead = &data[..data.len().min(GUESS_TRACE_MAX_LOOKAHEAD)];
    let start = String::from_utf8_lossy(lookahead);

    let start_minus_white_space: String = start.chars().filter(|c| !c.is_whitespace()).collect();
    if start_minus_white_space.starts_with("{\"") || start_minus_white_space.starts_with("[{\"") {
        return TraceType::Json;
    }

    // Systrace with header but no leading HTML.
    if contains_bytes(lookahead, b"# tracer") {
        return TraceType::Systrace;
    }

    // Systrace with leading HTML; both <!DOCTYPE html> and <!DOCTYPE HTML>
    // occur in the wild.
    let lower_start = start.to_lowercase();
    if lower_start.starts_with("<!doctype html>") || lower_start.starts_with("<html>") {
        return TraceType::Systrace;
    }

    // atrace -z output: "TRACE:" followed by a zlib stream header.
    if contains_bytes(lookahead, b"TRACE:\n\x78\x9c") {
        return TraceType::Ctrace;
    }
    if contains_bytes(lookahead, b"TRACE:\n") {
        return TraceType::Systrace;
    }

    if start.starts_with("# ninja log") {
        return TraceType::NinjaLog;
    }

    let line = String::from_utf8_lossy(first_line(data));
    if LOGCAT_LINE.is_match(&line) || line.starts_with("--------- beginning of ") {
        return TraceType::AndroidLogcat;
    }

    // Systrace with no header or leading HTML.
    if start.starts_with(' ') {
        return TraceType::Systrace;
    }

    // A proto trace starts with a field-1 length-delimited tag.
    if data[0] == 0x0a {
        return TraceType::Proto;
    }

    TraceType::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_unknown() {
        assert_eq!(guess_trace_type(b""), TraceType::Unknown);
    }

    #[test]
    fn test_magic_numbers() {
        assert_eq!(
            guess_trace_type(&[0x10, 0x00, 0x04, 0x46, 0x78, 0x54, 0x16, 0x00, 0xff]),
            TraceType::Fuchsia
        );
        assert_eq!(guess_trace_type(b"PERFILE2rest"), TraceType::PerfData);
        assert_eq!(guess_trace_type(b"PK\x03\x04zip"), TraceType::Zip);
        assert_eq!(guess_trace_type(&[0x1f, 0x8b, 0x08]), TraceType::Gzip);
    }

    #[test]
    fn test_byte_swapped_perf_magic_is_not_perf() {
        assert_eq!(guess_trace_type(b"2ELIFREP"), TraceType::Unknown);
    }

    #[test]
    fn test_json() {
        assert_eq!(guess_trace_type(b"{\"traceEvents\":[]}"), TraceType::Json);
        assert_eq!(guess_trace_type(b"  [{\"pid\": 1}]"), TraceType::Json);
    }

    #[test]
    fn test_systrace_variants() {
        assert_eq!(guess_trace_type(b"# tracer: nop\n"), TraceType::Systrace);
        assert_eq!(
            guess_trace_type(b"<!DOCTYPE html>\n<head>"),
            TraceType::Systrace
        );
        assert_eq!(guess_trace_type(b"<html>stuff"), TraceType::Systrace);
        assert_eq!(guess_trace_type(b"TRACE:\nfoo"), TraceType::Systrace);
        assert_eq!(guess_trace_type(b" surfaceflinger-598"), TraceType::Systrace);
    }

    #[test]
    fn test_ctrace() {
        assert_eq!(guess_trace_type(b"TRACE:\n\x78\x9c\x01"), TraceType::Ctrace);
    }

    #[test]
    fn test_ninja_log() {
        assert_eq!(guess_trace_type(b"# ninja log v5\n"), TraceType::NinjaLog);
    }

    #[test]
    fn test_logcat() {
        assert_eq!(
            guess_trace_type(b"07-28 14:25:20.355  1000  1013 I vold  : mount\n"),
            TraceType::AndroidLogcat
        );
        assert_eq!(
            guess_trace_type(b"--------- beginning of main\n07-28 ...\n"),
            TraceType::AndroidLogcat
        );
    }

    #[test]
    fn test_proto() {
        assert_eq!(guess_trace_type(&[0x0a, 0x10, 0x02]), TraceType::Proto);
    }

    #[test]
    fn test_unknown() {
        assert_eq!(guess_trace_type(b"garbage input"), TraceType::Unknown);
    }
}
