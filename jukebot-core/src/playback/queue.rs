// src/playback/queue.rs
//
// Ordered pending tracks plus the now-playing slot for one guild.

use std::collections::VecDeque;

use rand::Rng;
use rand::seq::SliceRandom;

use jukebot_common::models::{LoopMode, Track, TrackId};

use crate::Error;

/// Why the now-playing track is leaving its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Completed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Queue {
    now_playing: Option<Track>,
    pending: VecDeque<Track>,
    capacity: usize,
}

impl Queue {
    pub fn new(capacity: usize) -> Self {
        Self {
            now_playing: None,
            pending: VecDeque::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn now_playing(&self) -> Option<&Track> {
        self.now_playing.as_ref()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Track> {
        self.pending.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.capacity
    }

    /// Appends to the tail and returns the 1-based pending position.
    pub fn push_back(&mut self, track: Track) -> Result<usize, Error> {
        self.ensure_room()?;
        self.pending.push_back(track);
        Ok(self.pending.len())
    }

    /// Inserts ahead of every other pending track.
    pub fn push_front(&mut self, track: Track) -> Result<(), Error> {
        self.ensure_room()?;
        self.pending.push_front(track);
        Ok(())
    }

    fn ensure_room(&self) -> Result<(), Error> {
        if self.is_full() {
            return Err(Error::CapacityExceeded { capacity: self.capacity });
        }
        Ok(())
    }

    /// Removes the pending track at `position` (0 is the next track to play).
    /// The now-playing slot is not addressable.
    pub fn remove(&mut self, position: usize) -> Result<Track, Error> {
        let len = self.pending.len();
        self.pending
            .remove(position)
            .ok_or_else(|| Error::NotFound(format!("no queued track at position {position} (queue has {len})")))
    }

    pub fn move_track(&mut self, from: usize, to: usize) -> Result<(), Error> {
        let len = self.pending.len();
        if from >= len || to >= len {
            return Err(Error::NotFound(format!(
                "cannot move {from} -> {to}: queue has {len} tracks"
            )));
        }
        if let Some(track) = self.pending.remove(from) {
            self.pending.insert(to, track);
        }
        Ok(())
    }

    /// Drops every pending track and returns how many went.
    pub fn clear_pending(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }

    /// Uniform random permutation of the pending tracks only.
    pub fn shuffle_pending<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.pending.make_contiguous().shuffle(rng);
    }

    pub fn contains(&self, id: &TrackId) -> bool {
        self.now_playing.as_ref().is_some_and(|t| &t.id == id) || self.pending.iter().any(|t| &t.id == id)
    }

    pub fn pop_next(&mut self) -> Option<Track> {
        self.pending.pop_front()
    }

    /// Puts a track into the now-playing slot, returning whatever was there.
    pub fn set_now_playing(&mut self, track: Track) -> Option<Track> {
        self.now_playing.replace(track)
    }

    pub fn take_now_playing(&mut self) -> Option<Track> {
        self.now_playing.take()
    }

    /// Empties the now-playing slot and applies the loop rule:
    /// - `Track`: a completed track goes back to the front, so it plays again.
    /// - `Queue`: a completed or skipped track goes to the tail.
    ///
    /// Loop re-insertion rotates existing tracks and ignores capacity.
    /// Failed tracks are never re-inserted.
    pub fn finish_current(&mut self, loop_mode: LoopMode, reason: FinishReason) -> Option<Track> {
        let finished = self.now_playing.take()?;
        match (loop_mode, reason) {
            (LoopMode::Track, FinishReason::Completed) => self.pending.push_front(finished.clone()),
            (LoopMode::Queue, FinishReason::Completed | FinishReason::Skipped) => {
                self.pending.push_back(finished.clone())
            }
            _ => {}
        }
        Some(finished)
    }

    pub fn pending_snapshot(&self) -> Vec<Track> {
        self.pending.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn t(id: &str) -> Track {
        Track::new(id, id.to_uppercase(), format!("https://example.com/{id}"))
    }

    fn ids(q: &Queue) -> Vec<String> {
        q.pending().map(|t| t.id.to_string()).collect()
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut q = Queue::new(2);
        assert_eq!(q.push_back(t("a")).unwrap(), 1);
        assert_eq!(q.push_back(t("b")).unwrap(), 2);
        let err = q.push_back(t("c")).unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded { capacity: 2 }));
        assert!(matches!(q.push_front(t("c")), Err(Error::CapacityExceeded { .. })));
        assert_eq!(ids(&q), vec!["a", "b"]);
    }

    #[test]
    fn test_now_playing_does_not_count_toward_capacity() {
        let mut q = Queue::new(1);
        q.set_now_playing(t("a"));
        q.push_back(t("b")).unwrap();
        assert_eq!(q.pending_len(), 1);
    }

    #[test]
    fn test_remove_out_of_range_leaves_queue_unchanged() {
        let mut q = Queue::new(10);
        q.push_back(t("a")).unwrap();
        q.push_back(t("b")).unwrap();
        assert!(matches!(q.remove(2), Err(Error::NotFound(_))));
        assert_eq!(ids(&q), vec!["a", "b"]);
        assert_eq!(q.remove(0).unwrap().id.as_str(), "a");
        assert_eq!(ids(&q), vec!["b"]);
    }

    #[test]
    fn test_move_track() {
        let mut q = Queue::new(10);
        for id in ["a", "b", "c"] {
            q.push_back(t(id)).unwrap();
        }
        q.move_track(2, 0).unwrap();
        assert_eq!(ids(&q), vec!["c", "a", "b"]);
        assert!(q.move_track(0, 3).is_err());
        assert_eq!(ids(&q), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_loop_track_requeues_at_front() {
        let mut q = Queue::new(10);
        q.set_now_playing(t("a"));
        q.push_back(t("b")).unwrap();
        let done = q.finish_current(LoopMode::Track, FinishReason::Completed).unwrap();
        assert_eq!(done.id.as_str(), "a");
        assert_eq!(ids(&q), vec!["a", "b"]);
    }

    #[test]
    fn test_loop_track_does_not_repeat_skipped() {
        let mut q = Queue::new(10);
        q.set_now_playing(t("a"));
        q.push_back(t("b")).unwrap();
        q.finish_current(LoopMode::Track, FinishReason::Skipped);
        assert_eq!(ids(&q), vec!["b"]);
    }

    #[test]
    fn test_loop_queue_rotates_even_when_full() {
        let mut q = Queue::new(1);
        q.set_now_playing(t("a"));
        q.push_back(t("b")).unwrap();
        q.finish_current(LoopMode::Queue, FinishReason::Completed);
        assert_eq!(ids(&q), vec!["b", "a"]);
        assert!(q.now_playing().is_none());
    }

    #[test]
    fn test_failed_track_never_loops() {
        let mut q = Queue::new(10);
        q.set_now_playing(t("a"));
        q.finish_current(LoopMode::Queue, FinishReason::Failed);
        assert_eq!(q.pending_len(), 0);
    }

    #[test]
    fn test_shuffle_keeps_now_playing_and_members() {
        let mut q = Queue::new(100);
        q.set_now_playing(t("np"));
        for i in 0..20 {
            q.push_back(t(&format!("t{i}"))).unwrap();
        }
        let before = ids(&q);
        let mut rng = StdRng::seed_from_u64(7);
        q.shuffle_pending(&mut rng);
        let mut after = ids(&q);
        assert_ne!(before, after);
        after.sort();
        let mut sorted_before = before.clone();
        sorted_before.sort();
        assert_eq!(after, sorted_before);
        assert_eq!(q.now_playing().unwrap().id.as_str(), "np");
    }

    #[test]
    fn test_contains_checks_both_slots() {
        let mut q = Queue::new(10);
        q.set_now_playing(t("a"));
        q.push_back(t("b")).unwrap();
        assert!(q.contains(&TrackId::new("a")));
        assert!(q.contains(&TrackId::new("b")));
        assert!(!q.contains(&TrackId::new("c")));
    }
}
