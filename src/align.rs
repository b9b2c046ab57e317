//! Maps model annotations back onto the text they describe.
//!
//! The model returns a display string plus an ordered list of
//! `{word, reasoning}` pairs. [`align`] partitions the display string into
//! plain and annotated segments so the renderer can attach a tooltip to each
//! annotated run. Concatenating the segment contents always reproduces the
//! input text.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A substring the model chose, plus a short justification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub word: String,
    #[serde(default)]
    pub reasoning: String,
}

impl Annotation {
    pub fn new(word: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            word: word.into(),
            reasoning: reasoning.into(),
        }
    }
}

/// A contiguous run of display text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Segment {
    Plain { content: String },
    Annotated { content: String, reasoning: String },
}

impl Segment {
    pub fn content(&self) -> &str {
        match self {
            Segment::Plain { content } | Segment::Annotated { content, .. } => content,
        }
    }

    pub fn reasoning(&self) -> Option<&str> {
        match self {
            Segment::Plain { .. } => None,
            Segment::Annotated { reasoning, .. } => Some(reasoning),
        }
    }

    pub fn is_annotated(&self) -> bool {
        matches!(self, Segment::Annotated { .. })
    }
}

/// Partitions `text` into plain and annotated segments.
///
/// Annotations are consumed in the order given. A word that has already been
/// matched `k` times in this call targets its `(k + 1)`-th occurrence in
/// `text`; when that occurrence lies behind the scan cursor the next
/// occurrence at or after the cursor is used instead. Annotations with no
/// usable occurrence are dropped without touching the cursor.
pub fn align(text: &str, annotations: &[Annotation]) -> Vec<Segment> {
    let mut segments = Vec::with_capacity(annotations.len() * 2 + 1);
    let mut cursor = 0usize;
    let mut matched: HashMap<String, usize> = HashMap::new();

    for annotation in annotations {
        if annotation.word.is_empty() {
            continue;
        }
        let key = annotation.word.to_lowercase();
        let seen = matched.get(&key).copied().unwrap_or(0);
        let Some((start, end)) = Occurrences::new(text, &annotation.word)
            .enumerate()
            .find(|(index, (start, _))| *index >= seen && *start >= cursor)
            .map(|(_, span)| span)
        else {
            continue;
        };

        push_plain(&mut segments, &text[cursor..start]);
        segments.push(Segment::Annotated {
            content: text[start..end].to_string(),
            reasoning: annotation.reasoning.clone(),
        });
        cursor = end;
        *matched.entry(key).or_insert(0) += 1;
    }

    push_plain(&mut segments, &text[cursor..]);
    segments
}

/// Returns the first `visible_chars` characters of `text`.
///
/// Used for the typewriter reveal: the partially typed prefix is aligned
/// just like the full string.
pub fn reveal(text: &str, visible_chars: usize) -> &str {
    match text.char_indices().nth(visible_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Concatenates segment contents back into a single string.
pub fn join_segments(segments: &[Segment]) -> String {
    segments.iter().map(Segment::content).collect()
}

fn push_plain(segments: &mut Vec<Segment>, content: &str) {
    if content.is_empty() {
        return;
    }
    segments.push(Segment::Plain {
        content: content.to_string(),
    });
}

/// Non-overlapping, case-insensitive occurrences of a needle, as byte spans.
struct Occurrences<'a> {
    haystack: &'a str,
    needle: &'a str,
    from: usize,
}

impl<'a> Occurrences<'a> {
    fn new(haystack: &'a str, needle: &'a str) -> Self {
        Self {
            haystack,
            needle,
            from: 0,
        }
    }
}

impl Iterator for Occurrences<'_> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.needle.is_empty() {
            return None;
        }
        for (offset, _) in self.haystack[self.from..].char_indices() {
            let start = self.from + offset;
            if let Some(end) = match_at(self.haystack, start, self.needle) {
                self.from = end;
                return Some((start, end));
            }
        }
        self.from = self.haystack.len();
        None
    }
}

fn match_at(haystack: &str, start: usize, needle: &str) -> Option<usize> {
    let mut hay = haystack[start..].char_indices();
    let mut end = start;
    for expected in needle.chars() {
        let (offset, actual) = hay.next()?;
        if !chars_eq_ignore_case(actual, expected) {
            return None;
        }
        end = start + offset + actual.len_utf8();
    }
    Some(end)
}

fn chars_eq_ignore_case(a: char, b: char) -> bool {
    a == b || a.to_lowercase().eq(b.to_lowercase())
}
