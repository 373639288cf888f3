//! Streaming sentence segmentation.
//!
//! Narrator chunks arrive character by character; the splitter keeps a
//! rolling buffer and emits a sentence whenever a terminator (`.`, `!`,
//! `?`, `…`) is followed by whitespace, unless the preceding word is a
//! known abbreviation or a single capital (initials). A terminator inside
//! closing quotes emits together with the quote. Whatever remains at
//! stream end is flushed as a final sentence.

use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Words that end with a period without ending a sentence.
static ABBREVIATIONS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["mr", "mrs", "ms", "dr", "st", "etc", "vs"].into_iter().collect());

const TERMINATORS: [char; 4] = ['.', '!', '?', '…'];
const CLOSING_QUOTES: [char; 4] = ['"', '\'', '\u{201D}', '\u{2019}'];

/// Incremental sentence splitter over a rolling buffer.
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    buffer: String,
}

impl SentenceSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append streamed text and drain every completed sentence.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let mut sentences = Vec::new();
        while let Some(end) = find_sentence_end(&self.buffer) {
            let rest = self.buffer.split_off(end);
            let sentence = std::mem::replace(&mut self.buffer, rest);
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            // Drop the boundary whitespace.
            let trimmed = self.buffer.trim_start().to_string();
            self.buffer = trimmed;
        }
        sentences
    }

    /// Flush the trailing partial sentence at stream end.
    pub fn flush(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.buffer);
        let tail = tail.trim();
        if tail.is_empty() {
            None
        } else {
            Some(tail.to_string())
        }
    }
}

/// Find the byte offset just past the end of the first complete sentence,
/// or `None` if the buffer holds no confirmed boundary yet.
fn find_sentence_end(buffer: &str) -> Option<usize> {
    let chars: Vec<(usize, char)> = buffer.char_indices().collect();
    let mut i = 0;

    while i < chars.len() {
        let (_, c) = chars[i];
        if !TERMINATORS.contains(&c) {
            i += 1;
            continue;
        }

        // Collapse a run of periods ("..." style ellipsis) into one
        // terminator ending at the last period.
        let mut term_end = i;
        let run = c == '.';
        while run && term_end + 1 < chars.len() && chars[term_end + 1].1 == '.' {
            term_end += 1;
        }
        let single_period = c == '.' && term_end == i;

        // Include closing quotes after the terminator.
        let mut close = term_end;
        while close + 1 < chars.len() && CLOSING_QUOTES.contains(&chars[close + 1].1) {
            close += 1;
        }

        // The boundary is only confirmed once the following character is
        // whitespace; a buffer ending right at the terminator may still be
        // mid-abbreviation or mid-ellipsis, so wait for more input.
        if close + 1 >= chars.len() {
            return None;
        }
        if !chars[close + 1].1.is_whitespace() {
            i = close + 1;
            continue;
        }

        if single_period && is_abbreviation_before(&chars, i) {
            i += 1;
            continue;
        }

        let (last_idx, last_char) = chars[close];
        return Some(last_idx + last_char.len_utf8());
    }

    None
}

/// Whether the word ending at the period at `chars[period]` is on the
/// abbreviation denylist or is a single capital initial.
fn is_abbreviation_before(chars: &[(usize, char)], period: usize) -> bool {
    let mut word = String::new();
    let mut j = period;
    while j > 0 {
        let c = chars[j - 1].1;
        if c.is_alphabetic() {
            word.insert(0, c);
            j -= 1;
        } else {
            break;
        }
    }

    if word.is_empty() {
        return false;
    }
    if word.chars().count() == 1 && word.chars().next().is_some_and(|c| c.is_uppercase()) {
        return true;
    }
    ABBREVIATIONS.contains(word.to_lowercase().as_str())
}
