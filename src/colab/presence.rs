use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A participant's selection in one file: anchor and head byte offsets.
/// Anchor equals head for a plain caret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CursorState {
    pub anchor: usize,
    pub head: usize,
}

/// Ephemeral per-participant cursor state, last-write-wins per
/// (participant, file). Nothing here is persisted; clients rebuild it from
/// scratch after a reconnect.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    cursors: HashMap<String, HashMap<String, CursorState>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the cursor for a participant/file pair.
    pub fn update(&mut self, participant_id: &str, path: &str, cursor: CursorState) {
        self.cursors
            .entry(participant_id.to_string())
            .or_default()
            .insert(path.to_string(), cursor);
    }

    pub fn clear_file(&mut self, participant_id: &str, path: &str) {
        if let Some(files) = self.cursors.get_mut(participant_id) {
            files.remove(path);
            if files.is_empty() {
                self.cursors.remove(participant_id);
            }
        }
    }

    /// Drop all cursor state a participant had, across every file.
    pub fn remove_participant(&mut self, participant_id: &str) {
        self.cursors.remove(participant_id);
    }

    /// Cursors currently placed in one file, for the snapshot a newly
    /// opening participant receives.
    pub fn cursors_in(&self, path: &str) -> Vec<(String, CursorState)> {
        let mut out: Vec<(String, CursorState)> = self
            .cursors
            .iter()
            .filter_map(|(pid, files)| files.get(path).map(|c| (pid.clone(), *c)))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins_per_participant_and_file() {
        let mut tracker = PresenceTracker::new();
        tracker.update("p1", "a.txt", CursorState { anchor: 0, head: 0 });
        tracker.update("p1", "a.txt", CursorState { anchor: 4, head: 9 });
        assert_eq!(
            tracker.cursors_in("a.txt"),
            vec![("p1".to_string(), CursorState { anchor: 4, head: 9 })]
        );
    }

    #[test]
    fn removal_clears_every_file() {
        let mut tracker = PresenceTracker::new();
        tracker.update("p1", "a.txt", CursorState { anchor: 1, head: 1 });
        tracker.update("p1", "b.txt", CursorState { anchor: 2, head: 2 });
        tracker.update("p2", "a.txt", CursorState { anchor: 3, head: 3 });

        tracker.remove_participant("p1");
        assert_eq!(tracker.cursors_in("a.txt").len(), 1);
        assert!(tracker.cursors_in("b.txt").is_empty());
    }

    #[test]
    fn closing_a_file_clears_only_that_cursor() {
        let mut tracker = PresenceTracker::new();
        tracker.update("p1", "a.txt", CursorState { anchor: 1, head: 1 });
        tracker.update("p1", "b.txt", CursorState { anchor: 2, head: 2 });

        tracker.clear_file("p1", "a.txt");
        assert!(tracker.cursors_in("a.txt").is_empty());
        assert_eq!(tracker.cursors_in("b.txt").len(), 1);
    }
}
