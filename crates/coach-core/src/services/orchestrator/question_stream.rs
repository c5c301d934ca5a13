//! Incremental marker scanner for interview question streams
//!
//! The model streams `question [REFERENCE_ANSWER] reference` and may write
//! `[END_INTERVIEW]` at any point. Markers can be split across chunks, so any
//! trailing text that could be the start of a marker is held back until the
//! next chunk decides it.

use crate::services::ai::{END_INTERVIEW_MARKER, REFERENCE_ANSWER_MARKER};

/// What the caller should do with the text seen so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// More question text
    Question(String),
    /// The reference-answer marker was seen; the question text is complete
    QuestionComplete,
    /// More reference-answer text
    Reference(String),
    /// The end-interview marker was seen
    EndInterview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Question,
    Reference,
    /// After the end marker; text is kept as closing remarks
    Closing,
}

#[derive(Debug)]
pub struct QuestionSplitter {
    section: Section,
    pending: String,
    closing: String,
}

impl Default for QuestionSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl QuestionSplitter {
    pub fn new() -> Self {
        Self {
            section: Section::Question,
            pending: String::new(),
            closing: String::new(),
        }
    }

    /// Text written after the end marker
    pub fn closing_text(&self) -> &str {
        &self.closing
    }

    pub fn saw_end(&self) -> bool {
        self.section == Section::Closing
    }

    /// Feed the next chunk
    pub fn push(&mut self, chunk: &str) -> Vec<Segment> {
        self.pending.push_str(chunk);
        let mut out = Vec::new();
        self.drain(&mut out, false);
        out
    }

    /// Stream ended; release anything held back
    pub fn finish(&mut self) -> Vec<Segment> {
        let mut out = Vec::new();
        self.drain(&mut out, true);
        out
    }

    fn emit(&self, out: &mut Vec<Segment>, text: String) {
        if text.is_empty() {
            return;
        }
        match self.section {
            Section::Question => out.push(Segment::Question(text)),
            Section::Reference => out.push(Segment::Reference(text)),
            Section::Closing => {}
        }
    }

    fn drain(&mut self, out: &mut Vec<Segment>, flush: bool) {
        loop {
            if self.section == Section::Closing {
                self.closing.push_str(&self.pending);
                self.pending.clear();
                return;
            }

            let markers: &[&str] = match self.section {
                Section::Question => &[REFERENCE_ANSWER_MARKER, END_INTERVIEW_MARKER],
                _ => &[END_INTERVIEW_MARKER],
            };

            let found = markers
                .iter()
                .filter_map(|m| self.pending.find(m).map(|pos| (pos, *m)))
                .min_by_key(|(pos, _)| *pos);

            match found {
                Some((pos, marker)) => {
                    let before = self.pending[..pos].to_string();
                    let after = self.pending[pos + marker.len()..].to_string();
                    self.emit(out, before);
                    if marker == REFERENCE_ANSWER_MARKER {
                        out.push(Segment::QuestionComplete);
                        self.section = Section::Reference;
                    } else {
                        out.push(Segment::EndInterview);
                        self.section = Section::Closing;
                    }
                    self.pending = after;
                }
                None => {
                    let keep = if flush {
                        0
                    } else {
                        held_suffix_len(&self.pending, markers)
                    };
                    let split = self.pending.len() - keep;
                    let ready = self.pending[..split].to_string();
                    self.pending = self.pending[split..].to_string();
                    self.emit(out, ready);
                    return;
                }
            }
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of a marker
fn held_suffix_len(text: &str, markers: &[&str]) -> usize {
    let mut best = 0;
    for marker in markers {
        let max = marker.len().saturating_sub(1).min(text.len());
        for k in (1..=max).rev() {
            let start = text.len() - k;
            if text.is_char_boundary(start) && marker.starts_with(&text[start..]) {
                best = best.max(k);
                break;
            }
        }
    }
    best
}
