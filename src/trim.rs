//! Streaming whitespace trim filter.
//!
//! Wraps an HTML response body and strips leading/trailing whitespace from
//! each line, except inside verbatim regions (preformatted text, textareas,
//! inline scripts) whose bytes must pass through untouched. Marker matching
//! is a plain substring test on the raw line, never a tag-aware parse: a
//! line containing the literal text `<pre` anywhere (even in a comment)
//! toggles state. Downstream content relies on that behaviour.

use std::sync::{Mutex, MutexGuard};

use axum::{
    body::Body,
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tracing::warn;

use crate::guard::request_extension;

/// Lines containing one of these resume trimming; the marker line itself
/// passes through unmodified.
const TRIM_RESUME_MARKERS: [&str; 4] = ["<html", "</textarea", "</pre", "</script"];

/// Lines containing one of these (seen while trimming) suspend trimming;
/// subsequent lines pass through verbatim.
const TRIM_SUSPEND_MARKERS: [&str; 4] = ["</html", "<textarea", "<pre", "<script"];

/// Per-response trim state.
///
/// Holds not-yet-flushed bytes and the trim-active flag. Only complete
/// (newline-terminated) lines are processed on each push; a trailing
/// partial line stays buffered until the next push or [`finish`], so a
/// marker split across chunks is still seen whole.
///
/// [`finish`]: TrimSession::finish
#[derive(Debug)]
pub struct TrimSession {
    buffer: BytesMut,
    trimming: bool,
}

impl Default for TrimSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TrimSession {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            trimming: true,
        }
    }

    /// Append a chunk and flush all complete lines.
    pub fn push(&mut self, chunk: &[u8]) -> Bytes {
        self.buffer.extend_from_slice(chunk);

        let Some(last_newline) = self.buffer.iter().rposition(|&b| b == b'\n') else {
            return Bytes::new();
        };
        let complete = self.buffer.split_to(last_newline + 1);

        let mut out = BytesMut::with_capacity(complete.len());
        let mut rest: &[u8] = &complete;
        while let Some(end) = rest.iter().position(|&b| b == b'\n') {
            let (line, tail) = rest.split_at(end + 1);
            self.emit_line(line, &mut out);
            rest = tail;
        }
        out.freeze()
    }

    /// Flush any buffered partial final line at end-of-stream.
    pub fn finish(&mut self) -> Bytes {
        if self.buffer.is_empty() {
            return Bytes::new();
        }
        let remainder = self.buffer.split();
        let mut out = BytesMut::with_capacity(remainder.len() + 1);
        self.emit_line(&remainder, &mut out);
        out.freeze()
    }

    /// One line, with or without its trailing newline.
    fn emit_line(&mut self, raw: &[u8], out: &mut BytesMut) {
        let content = strip_terminator(raw);

        if contains_any(content, &TRIM_RESUME_MARKERS) {
            out.extend_from_slice(raw);
            self.trimming = true;
        } else if self.trimming {
            out.extend_from_slice(content.trim_ascii());
            out.extend_from_slice(b"\n");
            if contains_any(content, &TRIM_SUSPEND_MARKERS) {
                self.trimming = false;
            }
        } else {
            out.extend_from_slice(raw);
        }
    }
}

fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn contains_any(line: &[u8], markers: &[&str]) -> bool {
    markers.iter().any(|marker| {
        let needle = marker.as_bytes();
        line.len() >= needle.len() && line.windows(needle.len()).any(|window| window == needle)
    })
}

/// Middleware wrapping no-extension responses with the trim filter.
///
/// Paths carrying a file extension are already-final content and bypass
/// the transform. Content-Length is dropped because trimming changes the
/// body size mid-stream.
pub async fn trim_filter_layer(request: Request<Body>, next: Next) -> Response {
    if request_extension(request.uri().path()).is_some() {
        return next.run(request).await;
    }

    let response = next.run(request).await;
    let (mut parts, body) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, trim_body(body))
}

/// Wrap a body stream with a [`TrimSession`].
///
/// The session sits behind a mutex so append and flush are serialized even
/// if the host polls the stream from more than one place. Upstream errors
/// (client gone, renderer failure) end the stream; the buffered remainder
/// is dropped with it.
pub fn trim_body(body: Body) -> Body {
    let mut stream = body.into_data_stream();
    let session = Mutex::new(TrimSession::new());

    Body::from_stream(async_stream::stream! {
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    let out = lock_session(&session).push(&chunk);
                    if !out.is_empty() {
                        yield Ok::<Bytes, axum::Error>(out);
                    }
                }
                Err(err) => {
                    yield Err(err);
                    return;
                }
            }
        }
        let out = lock_session(&session).finish();
        if !out.is_empty() {
            yield Ok(out);
        }
    })
}

fn lock_session(session: &Mutex<TrimSession>) -> MutexGuard<'_, TrimSession> {
    match session.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                target = "facciata::trim",
                lock_kind = "mutex.lock",
                result = "poisoned_recovered",
                "Recovered from poisoned trim buffer lock"
            );
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &str) -> String {
        let mut session = TrimSession::new();
        let mut out = Vec::new();
        out.extend_from_slice(&session.push(input.as_bytes()));
        out.extend_from_slice(&session.finish());
        String::from_utf8(out).expect("trim output should stay valid UTF-8")
    }

    #[test]
    fn marker_free_input_is_trimmed_per_line() {
        assert_eq!(run("  <div>\n  hi  \n</div>  \n"), "<div>\nhi\n</div>\n");
    }

    #[test]
    fn pre_region_passes_through_verbatim() {
        let input = "  before  \n<pre>\n  literal text  \n</pre>\n  after  \n";
        let output = run(input);
        assert_eq!(output, "before\n<pre>\n  literal text  \n</pre>\nafter\n");
    }

    #[test]
    fn resume_marker_line_passes_unmodified() {
        let input = "  <html lang=\"en\">\n  <body>  \n";
        assert_eq!(run(input), "  <html lang=\"en\">\n<body>\n");
    }

    #[test]
    fn script_region_keeps_indentation() {
        let input = "<script>\n  var x = 1;  \n</script>\n  <p>  hi  </p>  \n";
        assert_eq!(run(input), "<script>\n  var x = 1;  \n</script>\n<p>  hi  </p>\n");
    }

    #[test]
    fn marker_in_comment_still_toggles() {
        // Substring matching is deliberate: no tag-boundary awareness.
        let input = "<!-- mentions <pre here -->\n   spaced   \n</pre>\n  x  \n";
        assert_eq!(
            run(input),
            "<!-- mentions <pre here -->\n   spaced   \n</pre>\nx\n"
        );
    }

    #[test]
    fn chunk_boundaries_do_not_change_output() {
        let input = "  <p>one</p>  \n<textarea>\n   raw   \n</textarea>\n  two  \n";
        let expected = run(input);

        for size in [1, 2, 3, 5, 7, 11] {
            let mut session = TrimSession::new();
            let mut out = Vec::new();
            for chunk in input.as_bytes().chunks(size) {
                out.extend_from_slice(&session.push(chunk));
            }
            out.extend_from_slice(&session.finish());
            assert_eq!(String::from_utf8(out).unwrap(), expected, "chunk size {size}");
        }
    }

    #[test]
    fn partial_line_is_held_until_finish() {
        let mut session = TrimSession::new();
        assert_eq!(session.push(b"  first  \n  sec"), Bytes::from("first\n"));
        assert_eq!(session.push(b"ond  "), Bytes::new());
        assert_eq!(session.finish(), Bytes::from("second\n"));
    }

    #[test]
    fn verbatim_partial_line_stays_untrimmed() {
        let mut session = TrimSession::new();
        assert_eq!(session.push(b"<pre>\n  dang"), Bytes::from("<pre>\n"));
        assert_eq!(session.push(b"ling  "), Bytes::new());
        assert_eq!(session.finish(), Bytes::from("  dangling  "));
    }

    #[test]
    fn crlf_lines_are_trimmed() {
        assert_eq!(run("  a  \r\n  b  \r\n"), "a\nb\n");
    }

    #[test]
    fn empty_input_produces_nothing() {
        assert_eq!(run(""), "");
        let mut session = TrimSession::new();
        assert_eq!(session.push(b""), Bytes::new());
        assert_eq!(session.finish(), Bytes::new());
    }
}
