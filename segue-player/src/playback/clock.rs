//! Frame accounting across the feed loop and crossfade handoff
//!
//! The clock tracks three counters: frames written from the current track,
//! frames written from the staged next track after the crossfade switch
//! point, and frames the device has actually played since the current track
//! began. `frames_played <= total written` holds at every step, and a
//! handoff carries the counters forward exactly, so no frame is ever
//! double-counted or lost across a track boundary.

/// Playback position accounting for one engine session.
#[derive(Debug, Default)]
pub struct PlaybackClock {
    /// Frames written to the sink from the current track
    frames_written: u64,
    /// Frames written from the staged next track past the crossfade point
    next_frames_written: u64,
    /// Frames the device has played since the current track started
    frames_played: u64,
    /// Sink head sample at the last `advance_from_head` call
    last_head: u64,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record frames accepted by the sink.
    ///
    /// `to_next` is true once the feed loop has switched its byte source to
    /// the staged next decoder at the crossfade point.
    pub fn note_written(&mut self, frames: u64, to_next: bool) {
        if to_next {
            self.next_frames_written += frames;
        } else {
            self.frames_written += frames;
        }
    }

    /// Fold in a fresh sink playback head sample.
    ///
    /// The head is monotonic per sink instance; only the delta since the
    /// last sample is attributed to this clock, so a clock can outlive the
    /// track that created it but not miscount across sink rebuilds.
    pub fn advance_from_head(&mut self, head: u64) {
        let delta = head.saturating_sub(self.last_head);
        self.last_head = head;
        self.frames_played = (self.frames_played + delta).min(self.total_written());
    }

    /// Played has caught up with everything written from the current track.
    /// Combined with decoder end-of-stream this is the handoff point;
    /// without it, an underrun.
    pub fn caught_up(&self) -> bool {
        self.frames_played >= self.frames_written
    }

    /// Carry counters across a natural track handoff.
    ///
    /// The completed track's frames leave both sides of the ledger; frames
    /// already written (and possibly played) from the next track become the
    /// new track's tally.
    pub fn handoff(&mut self) {
        self.frames_played = self.frames_played.saturating_sub(self.frames_written);
        self.frames_written = self.next_frames_written;
        self.next_frames_written = 0;
    }

    /// A rebuilt sink restarts its head at zero and drops queued frames;
    /// account the dropped tail as played so completion logic still fires.
    pub fn on_sink_rebuilt(&mut self) {
        self.frames_played = self.total_written();
        self.last_head = 0;
    }

    /// Forget everything (stop/reset path).
    pub fn reset(&mut self) {
        self.frames_written = 0;
        self.next_frames_written = 0;
        self.frames_played = 0;
        // last_head intentionally survives: the sink head keeps counting.
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn next_frames_written(&self) -> u64 {
        self.next_frames_written
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played
    }

    pub fn total_written(&self) -> u64 {
        self.frames_written + self.next_frames_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_played_never_exceeds_written() {
        let mut clock = PlaybackClock::new();
        clock.note_written(100, false);
        // head overshoots what we wrote (e.g. sink noise); clamp holds
        clock.advance_from_head(500);
        assert_eq!(clock.frames_played(), 100);
        assert!(clock.frames_played() <= clock.total_written());
    }

    #[test]
    fn test_delta_based_head_tracking() {
        let mut clock = PlaybackClock::new();
        clock.note_written(1000, false);
        clock.advance_from_head(300);
        assert_eq!(clock.frames_played(), 300);
        clock.advance_from_head(700);
        assert_eq!(clock.frames_played(), 700);
        // stale head resample is a no-op
        clock.advance_from_head(700);
        assert_eq!(clock.frames_played(), 700);
    }

    #[test]
    fn test_caught_up_detection() {
        let mut clock = PlaybackClock::new();
        clock.note_written(500, false);
        clock.advance_from_head(499);
        assert!(!clock.caught_up());
        clock.advance_from_head(500);
        assert!(clock.caught_up());
    }

    #[test]
    fn test_handoff_conserves_totals_exactly() {
        let mut clock = PlaybackClock::new();
        // current track fully written, next track crossfading in
        clock.note_written(10_000, false);
        clock.note_written(2_500, true);

        // device played the whole current track plus part of the next
        clock.advance_from_head(11_000);
        assert_eq!(clock.frames_played(), 11_000);
        assert!(clock.caught_up());

        clock.handoff();
        assert_eq!(clock.frames_written(), 2_500);
        assert_eq!(clock.next_frames_written(), 0);
        // the 1000 next-track frames already played carry forward
        assert_eq!(clock.frames_played(), 1_000);
        assert!(clock.frames_played() <= clock.total_written());
    }

    #[test]
    fn test_handoff_at_exact_boundary() {
        let mut clock = PlaybackClock::new();
        clock.note_written(4_000, false);
        clock.note_written(100, true);
        clock.advance_from_head(4_000);

        clock.handoff();
        assert_eq!(clock.frames_played(), 0);
        assert_eq!(clock.frames_written(), 100);
    }

    #[test]
    fn test_sink_rebuild_settles_outstanding_frames() {
        let mut clock = PlaybackClock::new();
        clock.note_written(2_000, false);
        clock.advance_from_head(1_200);

        clock.on_sink_rebuilt();
        assert_eq!(clock.frames_played(), 2_000);
        assert!(clock.caught_up());

        // the new sink's head starts over at zero
        clock.note_written(300, false);
        clock.advance_from_head(150);
        assert_eq!(clock.frames_played(), 2_150);
    }

    #[test]
    fn test_reset_preserves_head_baseline() {
        let mut clock = PlaybackClock::new();
        clock.note_written(1_000, false);
        clock.advance_from_head(800);
        clock.reset();

        assert_eq!(clock.frames_written(), 0);
        assert_eq!(clock.frames_played(), 0);

        // same sink keeps counting from 800; only the delta counts
        clock.note_written(500, false);
        clock.advance_from_head(1_000);
        assert_eq!(clock.frames_played(), 200);
    }
}
