use anyhow::{anyhow, Result};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use std::io::Write;

/// Finite, non-restartable sequence of text fragments from the model.
pub type TextStream = BoxStream<'static, Result<String>>;

/// Receives fragments as they arrive, e.g. for live display.
pub trait FragmentSink: Send {
    fn on_fragment(&mut self, fragment: &str);

    fn on_finish(&mut self) {}
}

pub struct NullSink;

impl FragmentSink for NullSink {
    fn on_fragment(&mut self, _fragment: &str) {}
}

pub struct StdoutSink;

impl FragmentSink for StdoutSink {
    fn on_fragment(&mut self, fragment: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(fragment.as_bytes());
        let _ = out.flush();
    }

    fn on_finish(&mut self) {
        println!();
    }
}

/// Drains `stream`, forwarding every fragment to `sink`, and returns the
/// concatenated text. The first error aborts the drain.
pub async fn collect_stream(mut stream: TextStream, sink: &mut dyn FragmentSink) -> Result<String> {
    let mut text = String::new();
    while let Some(fragment) = stream.next().await {
        let fragment = fragment?;
        sink.on_fragment(&fragment);
        text.push_str(&fragment);
    }
    sink.on_finish();
    Ok(text)
}

struct LineState {
    inner: BoxStream<'static, Result<Vec<u8>>>,
    buffer: Vec<u8>,
    finished: bool,
}

impl LineState {
    fn next_line(&mut self) -> Option<String> {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
        if self.finished && !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
        None
    }
}

/// Re-chunks a byte stream into non-empty trimmed lines. A transport error
/// is yielded once and ends the stream.
pub fn split_lines<S, B, E>(bytes: S) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let inner = bytes
        .map(|chunk| match chunk {
            Ok(b) => Ok(b.as_ref().to_vec()),
            Err(e) => Err(anyhow!(e)),
        })
        .boxed();
    let state = LineState {
        inner,
        buffer: Vec::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.next_line() {
                return Some((Ok(line), state));
            }
            if state.finished {
                return None;
            }
            match state.inner.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    state.finished = true;
                    state.buffer.clear();
                    return Some((Err(e.context("Stream interrupted")), state));
                }
                None => state.finished = true,
            }
        }
    })
    .boxed()
}

/// Maps each line through `parse`, dropping lines that carry no text.
pub fn fragments<F>(lines: BoxStream<'static, Result<String>>, parse: F) -> TextStream
where
    F: Fn(&str) -> Result<Option<String>> + Send + Sync + 'static,
{
    lines
        .filter_map(move |line| {
            let item = match line {
                Ok(line) => parse(&line).transpose(),
                Err(e) => Some(Err(e)),
            };
            futures_util::future::ready(item)
        })
        .boxed()
}
