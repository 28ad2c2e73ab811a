//! Top-level import pipeline: sniffs the input format, routes chunks to the
//! tokenizer, and on end of file drains the sorter through the record parser.

use anyhow::{bail, Result};

use crate::buffer::TraceBlobView;
use crate::context::TraceContext;
use crate::perf::parser::RecordParser;
use crate::perf::tokenizer::PerfDataTokenizer;
use crate::sniffer::{guess_trace_type, TraceType, GUESS_TRACE_MAX_LOOKAHEAD};

enum Input {
    /// Not yet classified; bytes accumulate until the sniffing lookahead is
    /// full (or the file ends first).
    Sniffing(Vec<u8>),
    Perf(PerfDataTokenizer),
}

pub struct TraceProcessor {
    context: TraceContext,
    parser: RecordParser,
    input: Input,
    trace_type: Option<TraceType>,
}

impl TraceProcessor {
    pub fn new() -> Self {
        Self {
            context: TraceContext::new(),
            parser: RecordParser::new(),
            input: Input::Sniffing(Vec::new()),
            trace_type: None,
        }
    }

    pub fn trace_type(&self) -> Option<TraceType> {
        self.trace_type
    }

    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    /// Feeds one chunk of the input file. Chunk boundaries are arbitrary; the
    /// emitted records do not depend on them.
    pub fn parse(&mut self, data: Vec<u8>) -> Result<()> {
        match &mut self.input {
            Input::Sniffing(pending) => {
                pending.extend_from_slice(&data);
                if pending.len() < GUESS_TRACE_MAX_LOOKAHEAD {
                    return Ok(());
                }
                self.route_pending()
            }
            Input::Perf(tokenizer) => {
                tokenizer.parse(&mut self.context, TraceBlobView::new(data))?;
                Ok(())
            }
        }
    }

    fn route_pending(&mut self) -> Result<()> {
        let Input::Sniffing(pending) = &mut self.input else {
            return Ok(());
        };
        let pending = std::mem::take(pending);

        let trace_type = guess_trace_type(&pending);
        self.trace_type = Some(trace_type);
        log::debug!("{trace_type} detected");

        match trace_type {
            TraceType::PerfData => {
                let mut tokenizer = PerfDataTokenizer::new();
                tokenizer.parse(&mut self.context, TraceBlobView::new(pending))?;
                self.input = Input::Perf(tokenizer);
                Ok(())
            }
            TraceType::Unknown => bail!("unknown trace type provided"),
            other => bail!("{other} parsing not supported"),
        }
    }

    /// Signals that no more chunks are coming, then parses everything the
    /// tokenizer admitted to the sorter, in timestamp order.
    pub fn notify_end_of_file(&mut self) -> Result<()> {
        if matches!(self.input, Input::Sniffing(_)) {
            self.route_pending()?;
        }

        let records = self.context.sorter.drain_sorted();
        for (trace_ts, record) in records {
            self.parser.parse_perf_record(&mut self.context, trace_ts, record);
        }
        Ok(())
    }
}

impl Default for TraceProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_input_is_rejected() {
        let mut processor = TraceProcessor::new();
        processor.parse(b"garbage".to_vec()).unwrap();
        assert!(processor.notify_end_of_file().is_err());
        assert_eq!(processor.trace_type(), Some(TraceType::Unknown));
    }

    #[test]
    fn test_recognized_but_unsupported_input() {
        let mut processor = TraceProcessor::new();
        processor.parse(vec![0x1f, 0x8b, 0x08, 0x00]).unwrap();
        let err = processor.notify_end_of_file().unwrap_err();
        assert!(err.to_string().contains("gzip trace"));
    }

    #[test]
    fn test_small_chunks_are_buffered_until_classified() {
        let mut processor = TraceProcessor::new();
        for byte in b"PERF" {
            processor.parse(vec![*byte]).unwrap();
        }
        assert_eq!(processor.trace_type(), None);
    }
}
