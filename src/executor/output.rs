//! Observable buffer for script output.
//!
//! Both reader tasks append into the same [`OutputSink`], so fragments keep
//! their arrival order across stdout and stderr. Every change bumps a
//! revision published on a `watch` channel; a UI re-renders (and
//! auto-scrolls) when it sees a new revision.
//!
//! Every fragment gets a sequence number that keeps counting across evictions
//! and resets, so an [`OutputCursor`] never re-reads or skips retained
//! fragments when a capped buffer drops its oldest lines.
//!
//! ## Thread Safety
//!
//! The fragments live in `Arc<Mutex<Buffer>>`; the lock is held only for the
//! push or copy, never across an await.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputOrigin {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputOrigin::Stdout => write!(f, "stdout"),
            OutputOrigin::Stderr => write!(f, "stderr"),
        }
    }
}

/// One line of output, without its trailing newline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFragment {
    pub text: String,
    pub origin: OutputOrigin,
}

#[derive(Debug, Default)]
struct Buffer {
    fragments: VecDeque<OutputFragment>,
    /// Sequence number of `fragments[0]`
    first_seq: u64,
}

impl Buffer {
    fn end_seq(&self) -> u64 {
        self.first_seq + self.fragments.len() as u64
    }
}

#[derive(Debug, Clone)]
pub struct OutputSink {
    fragments: Arc<Mutex<Buffer>>,
    /// Oldest fragments are evicted past this count; `None` keeps everything
    max_fragments: Option<usize>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for OutputSink {
    fn default() -> Self {
        Self::new(None)
    }
}

impl OutputSink {
    pub fn new(max_fragments: Option<usize>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            fragments: Arc::new(Mutex::new(Buffer::default())),
            max_fragments,
            revision: Arc::new(revision),
        }
    }

    pub fn append(&self, text: impl Into<String>, origin: OutputOrigin) {
        {
            let mut buffer = self.fragments.lock();
            buffer.fragments.push_back(OutputFragment {
                text: text.into(),
                origin,
            });
            if let Some(max) = self.max_fragments {
                while buffer.fragments.len() > max {
                    buffer.fragments.pop_front();
                    buffer.first_seq += 1;
                }
            }
        }
        self.bump();
    }

    /// Clear all output; called once at the start of every run
    pub fn reset(&self) {
        {
            let mut buffer = self.fragments.lock();
            buffer.first_seq = buffer.end_seq();
            buffer.fragments.clear();
        }
        self.bump();
    }

    /// All fragments joined with newlines
    pub fn snapshot(&self) -> String {
        let buffer = self.fragments.lock();
        let mut out = String::new();
        for (i, fragment) in buffer.fragments.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&fragment.text);
        }
        out
    }

    pub fn fragments(&self) -> Vec<OutputFragment> {
        self.fragments.lock().fragments.iter().cloned().collect()
    }

    /// Retained fragments with sequence number `seq` or later, plus the
    /// sequence number to pass next time.
    ///
    /// Fragments evicted before they were read are skipped, never repeated.
    pub fn fragments_from(&self, seq: u64) -> (Vec<OutputFragment>, u64) {
        let buffer = self.fragments.lock();
        let skip = seq.saturating_sub(buffer.first_seq) as usize;
        let fragments = buffer.fragments.iter().skip(skip).cloned().collect();
        (fragments, buffer.end_seq())
    }

    /// Sequence number the next appended fragment will get
    pub fn next_seq(&self) -> u64 {
        self.fragments.lock().end_seq()
    }

    /// The last `n` lines of output
    pub fn last_lines(&self, n: usize) -> Vec<String> {
        let buffer = self.fragments.lock();
        let skip = buffer.fragments.len().saturating_sub(n);
        buffer.fragments.iter().skip(skip).map(|f| f.text.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.fragments.lock().fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.lock().fragments.is_empty()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Change notification; the value is the revision counter
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }
}

/// Reads each fragment of an [`OutputSink`] once, in order
#[derive(Debug, Default, Clone, Copy)]
pub struct OutputCursor {
    next: u64,
}

impl OutputCursor {
    /// Start at whatever `sink` appends next
    pub fn at_end(sink: &OutputSink) -> Self {
        Self {
            next: sink.next_seq(),
        }
    }

    /// Fragments appended since the last read
    pub fn read(&mut self, sink: &OutputSink) -> Vec<OutputFragment> {
        let (fragments, next) = sink.fragments_from(self.next);
        self.next = next;
        fragments
    }
}
