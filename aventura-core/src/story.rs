//! Append-only story entry log.
//!
//! Every user action, narration, and system notice becomes one immutable
//! [`StoryEntry`] with a monotonically increasing sequence. The only
//! mutation ever applied after append is stamping the chapter
//! backreference when a chapter closes over a range.

use crate::id::{ChapterId, MessageId};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Role of a story entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryRole {
    UserAction,
    Narration,
    System,
}

/// One immutable entry in the story log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryEntry {
    pub id: MessageId,
    pub role: EntryRole,
    /// Monotonically increasing, starting at 1.
    pub seq: u64,
    pub content: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Set once the entry is closed into a chapter.
    pub chapter_id: Option<ChapterId>,
}

/// The append-only log for one story.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoryLog {
    entries: Vec<StoryEntry>,
}

impl StoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new entry and return its id.
    pub fn append(&mut self, role: EntryRole, content: impl Into<String>) -> MessageId {
        let id = MessageId::new();
        let seq = self.entries.len() as u64 + 1;
        self.entries.push(StoryEntry {
            id,
            role,
            seq,
            content: content.into(),
            timestamp_ms: Utc::now().timestamp_millis(),
            chapter_id: None,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[StoryEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&StoryEntry> {
        self.entries.last()
    }

    /// Highest sequence in the log (0 when empty).
    pub fn last_seq(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn get(&self, id: MessageId) -> Option<&StoryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Entry at a given sequence number.
    pub fn by_seq(&self, seq: u64) -> Option<&StoryEntry> {
        if seq == 0 {
            return None;
        }
        self.entries.get(seq as usize - 1)
    }

    /// Entries in the closed sequence range `[start, end]`.
    pub fn range(&self, start_seq: u64, end_seq: u64) -> &[StoryEntry] {
        if start_seq == 0 || start_seq > end_seq || start_seq > self.last_seq() {
            return &[];
        }
        let end = end_seq.min(self.last_seq()) as usize;
        &self.entries[start_seq as usize - 1..end]
    }

    /// The most recent `n` entries.
    pub fn recent(&self, n: usize) -> &[StoryEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    /// Stamp the chapter backreference on a closed range.
    ///
    /// This is the single permitted post-append mutation; content, role,
    /// and sequence never change.
    pub fn assign_chapter(&mut self, start_seq: u64, end_seq: u64, chapter_id: ChapterId) {
        if start_seq == 0 {
            return;
        }
        let end = end_seq.min(self.last_seq()) as usize;
        for entry in &mut self.entries[start_seq as usize - 1..end] {
            entry.chapter_id = Some(chapter_id);
        }
    }

    /// Render a range of entries as a labelled transcript.
    pub fn transcript(&self, start_seq: u64, end_seq: u64) -> String {
        let mut out = String::new();
        for entry in self.range(start_seq, end_seq) {
            let label = match entry.role {
                EntryRole::UserAction => "Player",
                EntryRole::Narration => "Narrator",
                EntryRole::System => "System",
            };
            out.push_str(&format!("[{}] {}: {}\n", entry.seq, label, entry.content));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_sequences_are_monotone() {
        let mut log = StoryLog::new();
        log.append(EntryRole::UserAction, "I open the door.");
        log.append(EntryRole::Narration, "It creaks open.");
        log.append(EntryRole::UserAction, "I step inside.");

        let seqs: Vec<u64> = log.entries().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(log.last_seq(), 3);
    }

    #[test]
    fn test_range_is_closed_and_clamped() {
        let mut log = StoryLog::new();
        for i in 0..5 {
            log.append(EntryRole::Narration, format!("entry {i}"));
        }

        assert_eq!(log.range(2, 4).len(), 3);
        assert_eq!(log.range(2, 4)[0].seq, 2);
        assert_eq!(log.range(4, 99).len(), 2);
        assert!(log.range(0, 3).is_empty());
        assert!(log.range(6, 8).is_empty());
    }

    #[test]
    fn test_recent_window() {
        let mut log = StoryLog::new();
        for i in 0..10 {
            log.append(EntryRole::UserAction, format!("msg {i}"));
        }
        let recent = log.recent(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].seq, 8);

        assert_eq!(log.recent(100).len(), 10);
    }

    #[test]
    fn test_assign_chapter_stamps_backreference() {
        let mut log = StoryLog::new();
        for i in 0..6 {
            log.append(EntryRole::Narration, format!("entry {i}"));
        }
        let chapter = ChapterId::new();
        log.assign_chapter(1, 4, chapter);

        assert!(log.entries()[..4]
            .iter()
            .all(|e| e.chapter_id == Some(chapter)));
        assert!(log.entries()[4..].iter().all(|e| e.chapter_id.is_none()));
    }

    #[test]
    fn test_transcript_labels_roles() {
        let mut log = StoryLog::new();
        log.append(EntryRole::UserAction, "I listen.");
        log.append(EntryRole::Narration, "Silence answers.");

        let transcript = log.transcript(1, 2);
        assert!(transcript.contains("Player: I listen."));
        assert!(transcript.contains("Narrator: Silence answers."));
    }
}
