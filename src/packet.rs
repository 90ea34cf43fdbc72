//! Error packets for the legacy [`Recovery`](crate::middleware::recovery::Recovery)
//! middleware.
//!
//! A packet is the flat, pre-hub report shape: one message, one exception
//! with a stack trace, and a set of string tags supplied at capture time.
//! Anything that can deliver such a report implements [`Client`];
//! [`sentry::Client`] does out of the box.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::sync::Arc;
use std::time::SystemTime;

use sentry::protocol::{Event, Exception, Frame, Level, Stacktrace};

/// Tags attached to a packet when it is captured.
pub type Tags = BTreeMap<String, String>;

/// A single error report.
#[derive(Clone, Debug)]
pub struct Packet {
    pub message: String,
    pub exception: PacketException,
    pub level: Level,
    pub timestamp: SystemTime,
}

impl Packet {
    pub fn new(message: impl Into<String>, exception: PacketException) -> Self {
        Self {
            message: message.into(),
            exception,
            level: Level::Error,
            timestamp: SystemTime::now(),
        }
    }

    /// Converts the packet into a Sentry event carrying `tags`.
    pub fn into_event(self, tags: Tags) -> Event<'static> {
        let exception = Exception {
            ty: "panic".into(),
            value: Some(self.exception.value),
            stacktrace: self.exception.stacktrace,
            ..Default::default()
        };
        Event {
            message: Some(self.message),
            exception: vec![exception].into(),
            level: self.level,
            timestamp: self.timestamp,
            tags,
            ..Default::default()
        }
    }
}

/// The exception part of a [`Packet`].
#[derive(Clone, Debug)]
pub struct PacketException {
    pub value: String,
    pub stacktrace: Option<Stacktrace>,
}

impl PacketException {
    pub fn new(value: impl Into<String>, stacktrace: Option<Stacktrace>) -> Self {
        Self { value: value.into(), stacktrace }
    }
}

/// Delivers packets to an error-tracking backend.
///
/// `capture` is fire-and-forget: delivery, batching and retries are the
/// implementation's business and failures are never reported back.
pub trait Client: Send + Sync + 'static {
    fn capture(&self, packet: Packet, tags: Tags);
}

impl Client for sentry::Client {
    fn capture(&self, packet: Packet, tags: Tags) {
        self.capture_event(packet.into_event(tags), None);
    }
}

impl<C: Client + ?Sized> Client for Arc<C> {
    fn capture(&self, packet: Packet, tags: Tags) {
        (**self).capture(packet, tags);
    }
}

/// Captures the calling thread's stack.
///
/// The innermost `skip` frames are dropped, and every frame whose source file
/// is readable gets up to `context_lines` lines of source on either side of
/// the executing line. Returns `None` when no frame survives.
pub fn capture_stacktrace(skip: usize, context_lines: usize) -> Option<Stacktrace> {
    let mut stacktrace = sentry::integrations::backtrace::current_stacktrace()?;

    // Sentry orders frames oldest first, so the innermost ones are at the end.
    let keep = stacktrace.frames.len().saturating_sub(skip);
    stacktrace.frames.truncate(keep);
    if stacktrace.frames.is_empty() {
        return None;
    }

    let mut sources = SourceCache::default();
    for frame in &mut stacktrace.frames {
        sources.annotate(frame, context_lines);
    }
    Some(stacktrace)
}

#[derive(Default)]
struct SourceCache {
    files: HashMap<String, Option<Vec<String>>>,
}

impl SourceCache {
    fn annotate(&mut self, frame: &mut Frame, context_lines: usize) {
        let (Some(path), Some(lineno)) = (frame.abs_path.clone(), frame.lineno) else {
            return;
        };
        let Some(lines) = self
            .files
            .entry(path)
            .or_insert_with_key(|path| {
                fs::read_to_string(path)
                    .ok()
                    .map(|src| src.lines().map(str::to_owned).collect())
            })
            .as_ref()
        else {
            return;
        };

        let Some(idx) = (lineno as usize).checked_sub(1).filter(|&i| i < lines.len()) else {
            return;
        };
        let start = idx.saturating_sub(context_lines);
        let end = (idx + 1 + context_lines).min(lines.len());

        frame.pre_context = lines[start..idx].to_vec();
        frame.context_line = Some(lines[idx].clone());
        frame.post_context = lines[idx + 1..end].to_vec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn packet_becomes_a_tagged_event() {
        let packet = Packet::new("boom", PacketException::new("boom", None));
        let mut tags = Tags::new();
        tags.insert("endpoint".into(), "/explode?x=1".into());

        let event = packet.into_event(tags);
        assert_eq!(event.message.as_deref(), Some("boom"));
        assert_eq!(event.level, Level::Error);
        assert_eq!(event.tags.get("endpoint").map(String::as_str), Some("/explode?x=1"));
        assert_eq!(event.exception.values.len(), 1);
        assert_eq!(event.exception.values[0].value.as_deref(), Some("boom"));
    }

    #[inline(never)]
    fn frames(skip: usize) -> usize {
        capture_stacktrace(skip, 0).map_or(0, |s| s.frames.len())
    }

    #[test]
    fn skip_drops_innermost_frames() {
        let all = frames(0);
        assert!(all > 2);
        assert_eq!(all - frames(2), 2);
        assert_eq!(frames(usize::MAX), 0);
    }

    #[test]
    fn source_context_is_capped() {
        let path = std::env::temp_dir().join(format!("tsu-sentry-ctx-{}.rs", std::process::id()));
        let mut file = fs::File::create(&path).unwrap();
        for i in 1..=10 {
            writeln!(file, "line {i}").unwrap();
        }
        drop(file);

        let mut frame = Frame {
            abs_path: Some(path.to_string_lossy().into_owned()),
            lineno: Some(5),
            ..Default::default()
        };
        SourceCache::default().annotate(&mut frame, 3);
        fs::remove_file(&path).unwrap();

        assert_eq!(frame.pre_context, ["line 2", "line 3", "line 4"]);
        assert_eq!(frame.context_line.as_deref(), Some("line 5"));
        assert_eq!(frame.post_context, ["line 6", "line 7", "line 8"]);
    }

    #[test]
    fn context_is_clamped_at_file_edges() {
        let path = std::env::temp_dir().join(format!("tsu-sentry-edge-{}.rs", std::process::id()));
        fs::write(&path, "first\nsecond\n").unwrap();

        let mut frame = Frame {
            abs_path: Some(path.to_string_lossy().into_owned()),
            lineno: Some(1),
            ..Default::default()
        };
        SourceCache::default().annotate(&mut frame, 3);
        fs::remove_file(&path).unwrap();

        assert!(frame.pre_context.is_empty());
        assert_eq!(frame.context_line.as_deref(), Some("first"));
        assert_eq!(frame.post_context, ["second"]);
    }

    #[test]
    fn unreadable_sources_are_left_alone() {
        let mut frame = Frame {
            abs_path: Some("/definitely/not/here.rs".into()),
            lineno: Some(3),
            ..Default::default()
        };
        SourceCache::default().annotate(&mut frame, 3);
        assert!(frame.context_line.is_none());
    }
}
