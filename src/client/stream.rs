//! Client – Stream
//! ===============
//!
//! Incremental decoding of llama-server's server-sent events.
//!
//! ```text
//! body bytes ─▶ SseLines ─▶ CompletionStream ─▶ "A", "B", …
//!                 (lines)     (data: {json} → delta, data: [DONE] → end)
//! ```
//!
//! [`CompletionStream`] owns its line source. The source, and with it the
//! HTTP connection, is dropped the moment the sequence ends: on `[DONE]`,
//! on end of body, after a transport error, or when the consumer drops the
//! stream early.
//!
//! Over HTTP the lines pass through [`IdleDeadline`], so a server that goes
//! quiet mid-body surfaces as a timeout instead of blocking forever.

use std::{io, iter::FusedIterator, sync::mpsc, time::Duration};

use serde_json::Value;

use crate::{
    client::{codec::decode_completion, error::ClientError},
    error::BackendResult,
};

const EVENT_MARKER: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// What a single event line means for the sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Non-empty text to hand to the consumer.
    Delta(String),
    /// The `[DONE]` sentinel.
    Done,
    /// Separator, comment, other field, malformed or empty payload.
    Skip,
}

pub fn parse_event_line(raw: &str) -> StreamEvent {
    let line = raw.trim();
    if line.is_empty() {
        return StreamEvent::Skip;
    }
    let Some(payload) = line.strip_prefix(EVENT_MARKER) else {
        return StreamEvent::Skip;
    };
    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return StreamEvent::Done;
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(json) => {
            let delta = decode_completion(&json);
            if delta.is_empty() {
                StreamEvent::Skip
            } else {
                StreamEvent::Delta(delta)
            }
        }
        Err(e) => {
            crate::debug!("skipping malformed event ({e}): {payload}");
            StreamEvent::Skip
        }
    }
}

/// Splits a byte stream on `\n`, decoding each line lossily so a bad byte
/// spoils one event rather than the whole stream.
#[derive(Debug)]
pub struct SseLines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: io::BufRead> SseLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(512),
        }
    }
}

impl<R: io::BufRead> Iterator for SseLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        loop {
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) if self.buf.is_empty() => return None,
                Ok(_) => return Some(Ok(String::from_utf8_lossy(&self.buf).into_owned())),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Line source that fails with [`io::ErrorKind::TimedOut`] when the next line
/// takes longer than `idle` to arrive.
///
/// Blocking reads cannot be interrupted, so a dedicated thread pulls lines
/// and hands them over a rendezvous channel: at most one line is in flight.
/// Dropping this source makes the reader thread's next hand-off fail; the
/// thread then exits and drops the underlying body.
#[derive(Debug)]
pub struct IdleDeadline {
    rx: Option<mpsc::Receiver<io::Result<String>>>,
    idle: Duration,
}

impl IdleDeadline {
    pub fn spawn<I>(lines: I, idle: Duration) -> io::Result<Self>
    where
        I: Iterator<Item = io::Result<String>> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(0);
        std::thread::Builder::new()
            .name("sse-reader".into())
            .spawn(move || {
                for line in lines {
                    let failed = line.is_err();
                    if tx.send(line).is_err() || failed {
                        break;
                    }
                }
            })?;
        Ok(Self { rx: Some(rx), idle })
    }
}

impl Iterator for IdleDeadline {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let rx = self.rx.as_ref()?;
        match rx.recv_timeout(self.idle) {
            Ok(line) => Some(line),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                self.rx = None;
                None
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                self.rx = None;
                Some(Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no data for {:?}", self.idle),
                )))
            }
        }
    }
}

/// Lazy, single-pass sequence of completion deltas.
///
/// Yields `Ok(delta)` in transport order, at most one `Err` (after which it
/// ends), and then `None` forever.
pub struct CompletionStream<I> {
    lines: Option<I>,
    timeout: Duration,
    yielded: usize,
}

impl<I> CompletionStream<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    /// `timeout` is reported in [`ClientError::Timeout`] when a read expires.
    pub fn new(lines: I, timeout: Duration) -> Self {
        Self {
            lines: Some(lines),
            timeout,
            yielded: 0,
        }
    }

    /// `true` once the line source has been released.
    pub fn is_finished(&self) -> bool {
        self.lines.is_none()
    }

    fn finish(&mut self, why: &str) {
        if self.lines.take().is_some() {
            crate::trace!("completion stream finished ({why}) after {} deltas", self.yielded);
        }
    }
}

impl<I> Iterator for CompletionStream<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    type Item = BackendResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let lines = self.lines.as_mut()?;
            match lines.next() {
                None => {
                    self.finish("end of body");
                    return None;
                }
                Some(Err(e)) => {
                    self.finish("transport error");
                    return Some(Err(ClientError::from_io(e, self.timeout).into()));
                }
                Some(Ok(line)) => match parse_event_line(&line) {
                    StreamEvent::Delta(text) => {
                        self.yielded += 1;
                        return Some(Ok(text));
                    }
                    StreamEvent::Done => {
                        self.finish("[DONE]");
                        return None;
                    }
                    StreamEvent::Skip => continue,
                },
            }
        }
    }
}

impl<I> FusedIterator for CompletionStream<I> where I: Iterator<Item = io::Result<String>> {}

impl<I> std::fmt::Debug for CompletionStream<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionStream")
            .field("open", &self.lines.is_some())
            .field("yielded", &self.yielded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    use super::*;
    use crate::error::BackendError;

    fn ok_lines(lines: &[&str]) -> impl Iterator<Item = io::Result<String>> {
        lines
            .iter()
            .map(|l| Ok(l.to_string()))
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Line source that records when it is dropped.
    struct Tracked<I> {
        inner: I,
        dropped: Arc<AtomicBool>,
    }

    impl<I: Iterator> Iterator for Tracked<I> {
        type Item = I::Item;
        fn next(&mut self) -> Option<I::Item> {
            self.inner.next()
        }
    }

    impl<I> Drop for Tracked<I> {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn yields_deltas_in_order_then_ends() {
        let stream = CompletionStream::new(
            ok_lines(&[
                r#"data: {"choices":[{"text":"A"}]}"#,
                "",
                r#"data: {"choices":[{"text":"B"}]}"#,
                "data: [DONE]",
            ]),
            Duration::from_secs(1),
        );
        let got: Vec<String> = stream.map(Result::unwrap).collect();
        assert_eq!(got, vec!["A", "B"]);
    }

    #[test]
    fn malformed_event_is_skipped() {
        let stream = CompletionStream::new(
            ok_lines(&[
                r#"data: {"choices":[{"text":"A"}]}"#,
                r#"data: {"choices":[{"text": broken"#,
                r#"data: {"choices":[{"text":"B"}]}"#,
                "data: [DONE]",
            ]),
            Duration::from_secs(1),
        );
        let got: Vec<String> = stream.map(Result::unwrap).collect();
        assert_eq!(got, vec!["A", "B"]);
    }

    #[test]
    fn non_data_lines_and_empty_deltas_are_skipped() {
        let stream = CompletionStream::new(
            ok_lines(&[
                ": keep-alive comment",
                "event: completion",
                r#"data: {"choices":[{"text":""}]}"#,
                r#"data: {"choices":[]}"#,
                r#"data: {"choices":[{"text":null}]}"#,
                "  data:   {\"choices\":[{\"text\":\"x\"}]}  \r\n",
            ]),
            Duration::from_secs(1),
        );
        let got: Vec<String> = stream.map(Result::unwrap).collect();
        assert_eq!(got, vec!["x"]);
    }

    #[test]
    fn nothing_after_done_is_read() {
        let mut stream = CompletionStream::new(
            ok_lines(&[
                r#"data: {"choices":[{"text":"A"}]}"#,
                "data: [DONE]",
                r#"data: {"choices":[{"text":"late"}]}"#,
            ]),
            Duration::from_secs(1),
        );
        assert_eq!(stream.next().unwrap().unwrap(), "A");
        assert!(stream.next().is_none());
        assert!(stream.is_finished());
        assert!(stream.next().is_none(), "stream must stay fused");
    }

    #[test]
    fn transport_error_is_yielded_once() {
        let lines = vec![
            Ok(r#"data: {"choices":[{"text":"A"}]}"#.to_string()),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            Ok(r#"data: {"choices":[{"text":"B"}]}"#.to_string()),
        ];
        let mut stream = CompletionStream::new(lines.into_iter(), Duration::from_secs(1));
        assert_eq!(stream.next().unwrap().unwrap(), "A");
        match stream.next() {
            Some(Err(BackendError::Transport(ClientError::Io(e)))) => {
                assert_eq!(e.kind(), io::ErrorKind::ConnectionReset)
            }
            other => panic!("expected transport error, got {other:?}"),
        }
        assert!(stream.next().is_none());
    }

    #[test]
    fn read_timeout_maps_to_timeout() {
        let lines = vec![Err(io::Error::new(io::ErrorKind::TimedOut, "slow"))];
        let mut stream = CompletionStream::new(lines.into_iter(), Duration::from_secs(3));
        match stream.next() {
            Some(Err(BackendError::Transport(ClientError::Timeout(d)))) => {
                assert_eq!(d, Duration::from_secs(3))
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn source_released_on_done_and_on_early_drop() {
        let dropped = Arc::new(AtomicBool::new(false));
        let mut stream = CompletionStream::new(
            Tracked {
                inner: ok_lines(&[r#"data: {"choices":[{"text":"A"}]}"#, "data: [DONE]"]),
                dropped: dropped.clone(),
            },
            Duration::from_secs(1),
        );
        assert_eq!(stream.next().unwrap().unwrap(), "A");
        assert!(!dropped.load(Ordering::SeqCst));
        assert!(stream.next().is_none());
        assert!(dropped.load(Ordering::SeqCst), "released at [DONE]");

        let dropped = Arc::new(AtomicBool::new(false));
        let mut stream = CompletionStream::new(
            Tracked {
                inner: ok_lines(&[
                    r#"data: {"choices":[{"text":"A"}]}"#,
                    r#"data: {"choices":[{"text":"B"}]}"#,
                ]),
                dropped: dropped.clone(),
            },
            Duration::from_secs(1),
        );
        assert_eq!(stream.next().unwrap().unwrap(), "A");
        drop(stream);
        assert!(dropped.load(Ordering::SeqCst), "released on early drop");
    }

    /// Yields its lines, then stalls for `stall` before ending.
    struct Stalling {
        lines: std::vec::IntoIter<io::Result<String>>,
        stall: Duration,
    }

    impl Iterator for Stalling {
        type Item = io::Result<String>;
        fn next(&mut self) -> Option<Self::Item> {
            let next = self.lines.next();
            if next.is_none() {
                std::thread::sleep(self.stall);
            }
            next
        }
    }

    #[test]
    fn idle_deadline_passes_lines_through_in_order() {
        let lines = IdleDeadline::spawn(
            ok_lines(&["one", "two", "three"]),
            Duration::from_secs(5),
        )
        .unwrap();
        let got: Vec<String> = lines.map(Result::unwrap).collect();
        assert_eq!(got, vec!["one", "two", "three"]);
    }

    #[test]
    fn silent_source_times_out_as_timeout_error() {
        let source = Stalling {
            lines: vec![Ok(r#"data: {"choices":[{"text":"A"}]}"#.to_string())].into_iter(),
            stall: Duration::from_secs(5),
        };
        let lines = IdleDeadline::spawn(source, Duration::from_millis(200)).unwrap();
        let mut stream = CompletionStream::new(lines, Duration::from_millis(200));

        assert_eq!(stream.next().unwrap().unwrap(), "A");
        let started = std::time::Instant::now();
        match stream.next() {
            Some(Err(BackendError::Transport(ClientError::Timeout(d)))) => {
                assert_eq!(d, Duration::from_millis(200))
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(stream.next().is_none());
        assert!(stream.is_finished());
    }

    #[test]
    fn sse_lines_splits_and_decodes_lossily() {
        let raw: &[u8] = b"data: one\n\ndata: \xff two\r\nlast-without-newline";
        let lines: Vec<String> = SseLines::new(raw).map(Result::unwrap).collect();
        assert_eq!(
            lines,
            vec![
                "data: one\n".to_string(),
                "\n".to_string(),
                "data: \u{fffd} two\r\n".to_string(),
                "last-without-newline".to_string(),
            ]
        );
    }

    #[test]
    fn parse_event_line_cases() {
        assert_eq!(parse_event_line("data: [DONE]"), StreamEvent::Done);
        assert_eq!(parse_event_line("data:[DONE]\n"), StreamEvent::Done);
        assert_eq!(parse_event_line(""), StreamEvent::Skip);
        assert_eq!(parse_event_line("id: 7"), StreamEvent::Skip);
        assert_eq!(parse_event_line("data: not json"), StreamEvent::Skip);
        assert_eq!(
            parse_event_line(r#"data: {"choices":[{"text":" hi"}]}"#),
            StreamEvent::Delta(" hi".into())
        );
    }
}
