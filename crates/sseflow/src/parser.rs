//! Incremental SSE frame parser.
//!
//! Consumes decoded text in arbitrary pieces, splits it on `"\n"`, and
//! assembles records terminated by a blank line. An unterminated trailing
//! line is carried over to the next call.
//!
//! Line handling:
//! - `""` or `"\r"` ends a record; it is emitted if a `data` field was seen.
//! - Lines starting with `:` are comments.
//! - `field: value` is split at the first colon, and one leading space of
//!   the value is stripped. A line without a colon is a field with an empty
//!   value.
//! - `data` appends `value + "\n"`; `event` and `id` overwrite; `retry`
//!   accepts ASCII digits only; anything else is ignored.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

/// A complete SSE record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Value of the last `id` field, if any.
    pub id: Option<String>,

    /// Value of the last `event` field, if any.
    pub event: Option<String>,

    /// Every `data` value, each followed by `"\n"`.
    pub data: String,

    /// Reconnect interval suggested by a `retry` field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<Duration>,
}

impl Message {
    /// Creates a message carrying only `data`.
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// Sets the event id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the event type.
    #[must_use]
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Event type, defaulting to `message` as browsers do.
    pub fn event_type(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Errors raised while framing the stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// A line exceeded the configured limit and was dropped.
    #[error("Line of {length} bytes exceeds the {limit}-byte limit")]
    LineTooLong {
        /// Bytes seen for the line when it was rejected
        length: usize,
        /// Configured maximum
        limit: usize,
    },
}

/// Record under construction.
#[derive(Debug, Default, Clone)]
struct PendingMessage {
    id: Option<String>,
    event: Option<String>,
    data: Option<String>,
    retry: Option<Duration>,
}

impl PendingMessage {
    fn take(&mut self) -> Option<Message> {
        let pending = std::mem::take(self);
        pending.data.map(|data| Message {
            id: pending.id,
            event: pending.event,
            data,
            retry: pending.retry,
        })
    }
}

/// Stateful line-oriented SSE parser.
#[derive(Debug, Default, Clone)]
pub struct FrameParser {
    carry: String,
    pending: PendingMessage,
    max_line_length: Option<usize>,
    discarding: bool,
}

impl FrameParser {
    /// Creates a parser with no line length limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a parser that rejects lines longer than `limit` bytes.
    pub fn with_max_line_length(limit: usize) -> Self {
        Self {
            max_line_length: Some(limit),
            ..Self::default()
        }
    }

    /// Feeds decoded text and returns the records it completed.
    ///
    /// Records completed before a [`ParseError`] in the same call are lost;
    /// use [`feed_into`](Self::feed_into) to keep them.
    pub fn feed(&mut self, text: &str) -> Result<Vec<Message>, ParseError> {
        let mut messages = Vec::new();
        self.feed_into(text, &mut messages)?;
        Ok(messages)
    }

    /// Feeds decoded text, appending completed records to `out`.
    ///
    /// An over-long line is dropped and reported after every other line of
    /// `text` has been processed.
    pub fn feed_into(&mut self, text: &str, out: &mut Vec<Message>) -> Result<(), ParseError> {
        let mut text = text;
        if self.discarding {
            match text.find('\n') {
                Some(end) => {
                    text = &text[end + 1..];
                    self.discarding = false;
                }
                None => return Ok(()),
            }
        }

        if !text.contains('\n') {
            self.carry.push_str(text);
            return self.check_carry();
        }

        let mut buffer = std::mem::take(&mut self.carry);
        buffer.push_str(text);

        let mut error = None;
        let mut lines = buffer.split('\n');
        // `split` always yields at least one segment; the last one is the new carry
        let tail = lines.next_back().unwrap_or_default();

        for line in lines {
            if let Some(limit) = self.max_line_length
                && line.len() > limit
            {
                debug!(length = line.len(), limit, "Dropping over-long line");
                error.get_or_insert(ParseError::LineTooLong {
                    length: line.len(),
                    limit,
                });
                continue;
            }
            if let Some(message) = self.process_line(line) {
                out.push(message);
            }
        }

        self.carry.push_str(tail);
        let carry_result = self.check_carry();

        match error {
            Some(e) => Err(e),
            None => carry_result,
        }
    }

    /// Clears the carried partial line and the record under construction.
    pub fn reset(&mut self) {
        self.carry.clear();
        self.pending = PendingMessage::default();
        self.discarding = false;
    }

    /// Length in bytes of the unterminated line being carried.
    pub fn carry_len(&self) -> usize {
        self.carry.len()
    }

    fn check_carry(&mut self) -> Result<(), ParseError> {
        match self.max_line_length {
            Some(limit) if self.carry.len() > limit => {
                let length = self.carry.len();
                debug!(length, limit, "Dropping over-long partial line");
                self.carry.clear();
                self.discarding = true;
                Err(ParseError::LineTooLong { length, limit })
            }
            _ => Ok(()),
        }
    }

    fn process_line(&mut self, line: &str) -> Option<Message> {
        if line.is_empty() || line == "\r" {
            let message = self.pending.take();
            if message.is_none() {
                trace!("Discarding record without data");
            }
            return message;
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                let data = self.pending.data.get_or_insert_with(String::new);
                data.push_str(value);
                data.push('\n');
            }
            "event" => self.pending.event = Some(value.to_string()),
            "id" => self.pending.id = Some(value.to_string()),
            "retry" => {
                if value.bytes().all(|b| b.is_ascii_digit())
                    && let Ok(ms) = value.parse::<u64>()
                {
                    self.pending.retry = Some(Duration::from_millis(ms));
                }
            }
            other => trace!(field = other, "Ignoring unknown field"),
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn parse_all(input: &str) -> Vec<Message> {
        FrameParser::new().feed(input).unwrap()
    }

    #[test]
    fn test_single_message() {
        assert_eq!(parse_all("data: hello\n\n"), vec![Message::new("hello\n")]);
    }

    #[test]
    fn test_split_across_feeds() {
        let mut parser = FrameParser::new();
        assert!(parser.feed("data: hel").unwrap().is_empty());
        assert_eq!(parser.feed("lo\n\n").unwrap(), vec![Message::new("hello\n")]);
    }

    #[test]
    fn test_multi_line_data_join() {
        assert_eq!(
            parse_all("data: foo\ndata: bar\n\n"),
            vec![Message::new("foo\nbar\n")]
        );
    }

    #[test]
    fn test_record_without_data_is_discarded() {
        assert!(parse_all("event: ping\nid: 7\n\n").is_empty());
    }

    #[test]
    fn test_discarded_record_does_not_leak_fields() {
        let messages = parse_all("event: ping\nid: 7\n\ndata: x\n\n");
        assert_eq!(messages, vec![Message::new("x\n")]);
    }

    #[test]
    fn test_event_and_id_overwrite() {
        let messages = parse_all("event: a\nevent: b\nid: 1\nid: 2\ndata: x\n\n");
        assert_eq!(
            messages,
            vec![Message::new("x\n").with_event("b").with_id("2")]
        );
    }

    #[test]
    fn test_comments_and_unknown_fields_ignored() {
        let messages = parse_all(": keep-alive\nfoo: bar\ndata: x\n:another\n\n");
        assert_eq!(messages, vec![Message::new("x\n")]);
    }

    #[test]
    fn test_field_without_colon() {
        // "data" alone is a data field with an empty value
        assert_eq!(parse_all("data\n\n"), vec![Message::new("\n")]);
    }

    #[test]
    fn test_only_one_leading_space_stripped() {
        assert_eq!(parse_all("data:  two\n\n"), vec![Message::new(" two\n")]);
        assert_eq!(parse_all("data:none\n\n"), vec![Message::new("none\n")]);
    }

    #[test]
    fn test_value_may_contain_colons() {
        assert_eq!(
            parse_all("data: a:b: c\n\n"),
            vec![Message::new("a:b: c\n")]
        );
    }

    #[test]
    fn test_crlf_blank_line_terminates() {
        let messages = parse_all("data: x\r\n\r\n");
        // The field line keeps its '\r'; only the exact "\r" line terminates
        assert_eq!(messages, vec![Message::new("x\r\n")]);
    }

    #[test]
    fn test_retry_field() {
        let messages = parse_all("retry: 2500\ndata: x\n\nretry: soon\ndata: y\n\n");
        assert_eq!(messages[0].retry, Some(Duration::from_millis(2500)));
        assert_eq!(messages[1].retry, None);
    }

    #[test]
    fn test_empty_id_is_kept_as_empty() {
        let messages = parse_all("id:\ndata: x\n\n");
        assert_eq!(messages[0].id.as_deref(), Some(""));
    }

    #[test]
    fn test_unterminated_record_is_not_emitted() {
        let mut parser = FrameParser::new();
        assert!(parser.feed("data: x\n").unwrap().is_empty());
        assert_eq!(parser.carry_len(), 0);
        assert_eq!(parser.feed("\n").unwrap(), vec![Message::new("x\n")]);
    }

    #[test]
    fn test_reset_discards_partial_state() {
        let mut parser = FrameParser::new();
        parser.feed("data: stale\ndata: par").unwrap();
        parser.reset();
        assert_eq!(parser.feed("data: fresh\n\n").unwrap(), vec![Message::new("fresh\n")]);
    }

    #[test]
    fn test_event_type_default() {
        assert_eq!(Message::new("x").event_type(), "message");
        assert_eq!(Message::new("x").with_event("tick").event_type(), "tick");
    }

    #[test]
    fn test_long_complete_line_dropped_others_kept() {
        let mut parser = FrameParser::with_max_line_length(16);
        let mut out = Vec::new();
        let input = "data: ok\n\ndata: this line is far too long\ndata: b\n\n";

        let err = parser.feed_into(input, &mut out).unwrap_err();
        assert_eq!(err, ParseError::LineTooLong { length: 31, limit: 16 });
        assert_eq!(out, vec![Message::new("ok\n"), Message::new("b\n")]);
    }

    #[test]
    fn test_long_carry_skips_until_newline() {
        let mut parser = FrameParser::with_max_line_length(8);

        let err = parser.feed("data: 0123456789").unwrap_err();
        assert!(matches!(err, ParseError::LineTooLong { limit: 8, .. }));
        assert_eq!(parser.carry_len(), 0);

        // Rest of the over-long line is skipped
        assert!(parser.feed("more junk").unwrap().is_empty());
        assert_eq!(
            parser.feed(" tail\ndata: y\n\n").unwrap(),
            vec![Message::new("y\n")]
        );
    }

    fn sse_stream() -> impl Strategy<Value = String> {
        let line = prop_oneof![
            "[a-z ]{0,12}".prop_map(|v| format!("data: {v}")),
            "[a-z]{1,6}".prop_map(|v| format!("event: {v}")),
            "[0-9]{1,4}".prop_map(|v| format!("id: {v}")),
            "[a-z ]{0,8}".prop_map(|v| format!(": {v}")),
            Just(String::new()),
            Just("\r".to_string()),
        ];
        prop::collection::vec(line, 0..24).prop_map(|lines| {
            let mut text = lines.join("\n");
            text.push('\n');
            text
        })
    }

    proptest! {
        /// Property: feeding a stream whole or in arbitrary pieces yields identical records
        #[test]
        fn prop_frame_reassembly_idempotence(
            text in sse_stream(),
            splits in prop::collection::vec(any::<prop::sample::Index>(), 0..6),
        ) {
            let whole = parse_all(&text);

            let mut points: Vec<usize> = splits.iter().map(|i| i.index(text.len() + 1)).collect();
            points.sort_unstable();

            let mut parser = FrameParser::new();
            let mut pieces = Vec::new();
            let mut start = 0;
            // The generated text is ASCII, so every byte offset is a char boundary
            for point in points {
                pieces.extend(parser.feed(&text[start..point]).unwrap());
                start = point;
            }
            pieces.extend(parser.feed(&text[start..]).unwrap());

            prop_assert_eq!(pieces, whole);
        }

        /// Property: arbitrary text never panics and every record carries data
        #[test]
        fn prop_arbitrary_text_is_tolerated(text in "[\\PC\r\n]{0,128}") {
            let messages = FrameParser::new().feed(&text).unwrap();
            for message in messages {
                prop_assert!(message.data.ends_with('\n'));
            }
        }
    }
}
