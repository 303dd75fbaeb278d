//! Newline-delimited JSON framing.
//!
//! Wire format: one compact JSON [`Record`] per line, terminated by `\n`.
//! Records never contain a raw newline because JSON escapes them inside
//! strings, so the receiver can act on each line as soon as it arrives.

use bytes::Bytes;

use crate::errors::FrameError;
use crate::protocol::Record;

/// Content type of an incremental response body, also used as the
/// `Accept` value that requests incremental delivery.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Sent in place of a record that failed to serialize, so the receiver still
/// sees a terminal record.
const SERIALIZE_FAILED_LINE: &[u8] =
    br#"{"error":{"message":"record could not be serialized","code":"internal"}}"#;

/// Encodes one record as a newline-terminated JSON line.
pub fn encode_record(record: &Record) -> Bytes {
    let mut line = match serde_json::to_vec(record) {
        Ok(line) => line,
        Err(err) => {
            tracing::error!(error = %err, "record serialization failed; sending internal error");
            SERIALIZE_FAILED_LINE.to_vec()
        }
    };
    line.push(b'\n');
    Bytes::from(line)
}

/// Incremental decoder that accepts arbitrary chunk boundaries.
#[derive(Default)]
pub struct RecordDecoder {
    buf: Vec<u8>,
    /// Length of the buffered prefix already known to hold no newline.
    scanned: usize,
}

impl RecordDecoder {
    /// Appends a chunk and returns every record completed by it.
    ///
    /// Blank lines are skipped. A malformed line yields an error entry and
    /// decoding continues with the next line.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<Result<Record, FrameError>> {
        self.buf.extend_from_slice(chunk);
        let mut records = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buf[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            if let Some(record) = parse_line(&self.buf[start..end]) {
                records.push(record);
            }
            start = end + 1;
            from = start;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();
        records
    }

    /// Decodes a trailing record that was not newline-terminated.
    ///
    /// Single-mode bodies are one JSON object that may lack the final newline.
    pub fn finish(&mut self) -> Option<Result<Record, FrameError>> {
        let rest = std::mem::take(&mut self.buf);
        self.scanned = 0;
        parse_line(&rest)
    }

    /// True when no partial record is buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.iter().all(u8::is_ascii_whitespace)
    }
}

fn parse_line(bytes: &[u8]) -> Option<Result<Record, FrameError>> {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => return Some(Err(err.into())),
    };
    let line = text.trim_end_matches('\r').trim();
    if line.is_empty() {
        return None;
    }
    Some(decode_envelope(line))
}

fn decode_envelope(line: &str) -> Result<Record, FrameError> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    if let Some(object) = value.as_object()
        && let Some(key) = object
            .keys()
            .find(|key| !matches!(key.as_str(), "message" | "result" | "error"))
    {
        return Err(FrameError::UnknownRecord(key.clone()));
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CallError;

    #[test]
    fn encoded_record_is_a_single_line() {
        let bytes = encode_record(&Record::fragment("line one\nline two"));
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);
        assert!(bytes.ends_with(b"\n"));
    }

    #[test]
    fn serialization_fallback_is_a_terminal_internal_error() {
        let mut wire = SERIALIZE_FAILED_LINE.to_vec();
        wire.push(b'\n');
        let mut records = RecordDecoder::default().push_chunk(&wire);
        assert_eq!(records.len(), 1);
        let record = records.remove(0).expect("decodes");
        assert!(record.is_terminal());
        assert!(matches!(record, Record::Error(ref e) if e.code == crate::errors::ErrorCode::Internal));
    }

    #[test]
    fn decoder_handles_partial_chunk_boundaries() {
        let mut decoder = RecordDecoder::default();
        let first = decoder.push_chunk(b"{\"message\":{\"partial\":\"Per \"}}\n{\"message\":{\"par");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].as_ref().expect("record"), &Record::fragment("Per "));
        assert!(!decoder.is_empty());

        let second = decoder.push_chunk(b"tial\":\"our \"}}\n");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].as_ref().expect("record"), &Record::fragment("our "));
        assert!(decoder.is_empty());
    }

    #[test]
    fn decoder_preserves_order_across_one_chunk() {
        let mut wire = Vec::new();
        let sent = vec![
            Record::fragment("a"),
            Record::fragment("b"),
            Record::error(CallError::internal("boom")),
        ];
        for record in &sent {
            wire.extend_from_slice(&encode_record(record));
        }
        let received: Vec<Record> = RecordDecoder::default()
            .push_chunk(&wire)
            .into_iter()
            .map(|r| r.expect("record"))
            .collect();
        assert_eq!(received, sent);
    }

    #[test]
    fn large_record_split_into_small_chunks_is_scanned_once() {
        let completion = "x".repeat(4 * 1024 * 1024);
        let wire = encode_record(&Record::result(completion.clone()));
        let mut decoder = RecordDecoder::default();
        let mut records = Vec::new();
        for chunk in wire.chunks(4 * 1024) {
            records.extend(decoder.push_chunk(chunk));
            // Everything still buffered has been searched and is never
            // searched again.
            assert_eq!(decoder.scanned, decoder.buf.len());
        }
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].as_ref().expect("record"), &Record::result(completion));
        assert!(decoder.is_empty());
    }

    #[test]
    fn decoder_skips_blank_lines_and_crlf() {
        let mut decoder = RecordDecoder::default();
        let records = decoder.push_chunk(b"\r\n\n{\"result\":{\"completion\":\"x\"}}\r\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].as_ref().expect("record"), &Record::result("x"));
    }

    #[test]
    fn finish_decodes_unterminated_single_mode_body() {
        let mut decoder = RecordDecoder::default();
        assert!(decoder.push_chunk(b"{\"result\":{\"completion\":\"done\"}}").is_empty());
        let record = decoder.finish().expect("trailing record").expect("valid");
        assert_eq!(record, Record::result("done"));
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn malformed_line_is_reported_and_decoding_continues() {
        let mut decoder = RecordDecoder::default();
        let records = decoder.push_chunk(
            b"{\"unknown\":{}}\n{\"result\":\"oops\"}\n{\"result\":{\"completion\":\"ok\"}}\n",
        );
        assert_eq!(records.len(), 3);
        assert!(matches!(&records[0], Err(FrameError::UnknownRecord(key)) if key == "unknown"));
        assert!(matches!(records[1], Err(FrameError::Json(_))));
        assert_eq!(records[2].as_ref().expect("record"), &Record::result("ok"));
    }
}
