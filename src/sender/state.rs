//! Error tracking and the pending-bytes backlog.
//!
//! Both live behind short synchronous locks owned by the sender and are never
//! held across an `.await`.

use tokio::time::{Duration, Instant};

use crate::error::SenderError;

/// Last observed failure, the reconnect cooldown and the consecutive
/// internal-failure count.
///
/// The error and the instant it was observed are stored together, so one is
/// present exactly when the other is. The cooldown start is tracked apart
/// from them: a serialisation failure replaces the last error but leaves a
/// running cooldown untouched.
#[derive(Debug, Default)]
pub struct ErrorState {
    last_error: Option<(SenderError, Instant)>,
    cooldown_from: Option<Instant>,
    error_count: u32,
}

impl ErrorState {
    /// Record `error` as observed at `now`.
    ///
    /// Failures that involve the collector restart the cooldown;
    /// serialisation failures do not.
    pub fn record(&mut self, error: SenderError, now: Instant) {
        if !matches!(error, SenderError::Serialization(_)) {
            self.cooldown_from = Some(now);
        }
        self.last_error = Some((error, now));
    }

    /// Forget the last error, ending any cooldown.
    pub fn clear(&mut self) {
        self.last_error = None;
        self.cooldown_from = None;
    }

    pub fn last_error(&self) -> Option<&SenderError> {
        self.last_error.as_ref().map(|(error, _)| error)
    }

    pub fn last_error_at(&self) -> Option<Instant> {
        self.last_error.as_ref().map(|(_, at)| *at)
    }

    /// Whether reconnects are suppressed at `now`.
    ///
    /// A cooldown whose end is not representable never expires.
    pub fn in_cooldown(&self, now: Instant, retry_timeout: Duration) -> bool {
        self.cooldown_from.is_some_and(|from| {
            from.checked_add(retry_timeout)
                .is_none_or(|until| now < until)
        })
    }

    /// Count another internal failure, returning the new total.
    pub fn increment(&mut self) -> u32 {
        self.error_count = self.error_count.saturating_add(1);
        self.error_count
    }

    pub fn reset_count(&mut self) {
        self.error_count = 0;
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }
}

/// Payload assembled for one send attempt.
#[derive(Debug)]
pub struct Coalesced {
    /// Earlier undelivered bytes followed by the new bytes.
    pub payload: Vec<u8>,
    /// Whether a backlog existed when the attempt started.
    pub had_backlog: bool,
}

/// Serialised-but-undelivered packets, concatenated in emission order.
#[derive(Debug, Default)]
pub struct PendingBuffer {
    bytes: Option<Vec<u8>>,
}

impl PendingBuffer {
    /// Take the backlog and append `bytes` to it.
    pub fn coalesce(&mut self, bytes: Vec<u8>) -> Coalesced {
        match self.bytes.take() {
            Some(mut backlog) if !backlog.is_empty() => {
                backlog.extend_from_slice(&bytes);
                Coalesced {
                    payload: backlog,
                    had_backlog: true,
                }
            }
            _ => Coalesced {
                payload: bytes,
                had_backlog: false,
            },
        }
    }

    /// Keep a failed attempt's payload for the next send, or hand it back for
    /// the overflow handler.
    ///
    /// The cap is only enforced when a backlog already existed before the
    /// attempt: a single oversized payload is buffered, and the next failure
    /// discards the lot.
    pub fn buffer_or_overflow(&mut self, attempt: Coalesced, bufmax: usize) -> Option<Vec<u8>> {
        let Coalesced {
            mut payload,
            mut had_backlog,
        } = attempt;
        // Another send may have buffered while this one was in flight.
        if let Some(mut newer) = self.bytes.take().filter(|bytes| !bytes.is_empty()) {
            newer.extend_from_slice(&payload);
            payload = newer;
            had_backlog = true;
        }
        if had_backlog && payload.len() > bufmax {
            Some(payload)
        } else {
            self.bytes = Some(payload);
            None
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of the backlog, if any.
    pub fn contents(&self) -> Option<Vec<u8>> {
        self.bytes.clone().filter(|bytes| !bytes.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use std::{io, sync::Arc};

    use rstest::rstest;

    use super::*;

    fn transport_error() -> SenderError {
        SenderError::Transport(Arc::new(io::Error::from(io::ErrorKind::BrokenPipe)))
    }

    #[rstest]
    fn record_and_clear_keep_error_and_time_together() {
        let mut state = ErrorState::default();
        assert!(state.last_error().is_none());
        assert!(state.last_error_at().is_none());

        let now = Instant::now();
        state.record(transport_error(), now);
        assert!(state.last_error().is_some());
        assert_eq!(state.last_error_at(), Some(now));

        state.clear();
        assert!(state.last_error().is_none());
        assert!(state.last_error_at().is_none());
    }

    #[rstest]
    #[case(Duration::from_secs(0), true)]
    #[case(Duration::from_secs(29), true)]
    #[case(Duration::from_secs(30), false)]
    #[case(Duration::from_secs(31), false)]
    fn cooldown_window_is_half_open(#[case] elapsed: Duration, #[case] cooling: bool) {
        let mut state = ErrorState::default();
        let at = Instant::now();
        state.record(transport_error(), at);
        assert_eq!(state.in_cooldown(at + elapsed, Duration::from_secs(30)), cooling);
    }

    #[rstest]
    fn serialisation_errors_do_not_cool_down() {
        let mut state = ErrorState::default();
        let at = Instant::now();
        state.record(SenderError::Serialization("bad".into()), at);
        assert!(!state.in_cooldown(at, Duration::from_secs(30)));
    }

    #[rstest]
    fn serialisation_error_keeps_running_cooldown() {
        let mut state = ErrorState::default();
        let at = Instant::now();
        state.record(transport_error(), at);
        state.record(
            SenderError::Serialization("bad".into()),
            at + Duration::from_secs(5),
        );
        assert!(matches!(state.last_error(), Some(SenderError::Serialization(_))));
        assert!(state.in_cooldown(at + Duration::from_secs(29), Duration::from_secs(30)));
        assert!(!state.in_cooldown(at + Duration::from_secs(30), Duration::from_secs(30)));
    }

    #[rstest]
    fn clear_ends_cooldown() {
        let mut state = ErrorState::default();
        let at = Instant::now();
        state.record(transport_error(), at);
        state.clear();
        assert!(!state.in_cooldown(at, Duration::from_secs(30)));
    }

    #[rstest]
    fn unbounded_retry_timeout_never_expires() {
        let mut state = ErrorState::default();
        let at = Instant::now();
        state.record(transport_error(), at);
        assert!(state.in_cooldown(at + Duration::from_secs(86_400), Duration::MAX));
    }

    #[rstest]
    fn error_count_increments_and_resets() {
        let mut state = ErrorState::default();
        assert_eq!(state.increment(), 1);
        assert_eq!(state.increment(), 2);
        state.reset_count();
        assert_eq!(state.error_count(), 0);
    }

    #[rstest]
    fn coalesce_appends_in_arrival_order() {
        let mut pending = PendingBuffer::default();
        let first = pending.coalesce(b"A".to_vec());
        assert!(!first.had_backlog);
        assert!(pending.buffer_or_overflow(first, 1024).is_none());

        let second = pending.coalesce(b"B".to_vec());
        assert!(second.had_backlog);
        assert_eq!(second.payload, b"AB");
        assert!(pending.is_empty(), "backlog is taken for the attempt");
    }

    #[rstest]
    fn oversized_first_failure_is_buffered() {
        let mut pending = PendingBuffer::default();
        let attempt = pending.coalesce(vec![0u8; 64]);
        assert!(pending.buffer_or_overflow(attempt, 8).is_none());
        assert_eq!(pending.len(), 64);
    }

    #[rstest]
    fn overflow_returns_whole_backlog_and_empties_buffer() {
        let mut pending = PendingBuffer::default();
        let attempt = pending.coalesce(vec![1u8; 10]);
        assert!(pending.buffer_or_overflow(attempt, 8).is_none());

        let attempt = pending.coalesce(vec![2u8; 2]);
        let discarded = pending
            .buffer_or_overflow(attempt, 8)
            .expect("backlog over the cap overflows");
        assert_eq!(discarded.len(), 12);
        assert_eq!(&discarded[..10], &[1u8; 10]);
        assert!(pending.is_empty());
        assert!(pending.contents().is_none());
    }

    #[rstest]
    fn backlog_within_cap_is_kept() {
        let mut pending = PendingBuffer::default();
        let attempt = pending.coalesce(b"abc".to_vec());
        assert!(pending.buffer_or_overflow(attempt, 8).is_none());
        let attempt = pending.coalesce(b"def".to_vec());
        assert!(pending.buffer_or_overflow(attempt, 8).is_none());
        assert_eq!(pending.contents().as_deref(), Some(&b"abcdef"[..]));
    }

    #[rstest]
    fn concurrent_backlog_is_merged_before_ours() {
        let mut pending = PendingBuffer::default();
        let ours = pending.coalesce(b"late".to_vec());
        let theirs = pending.coalesce(b"early".to_vec());
        assert!(pending.buffer_or_overflow(theirs, 1024).is_none());
        assert!(pending.buffer_or_overflow(ours, 1024).is_none());
        assert_eq!(pending.contents().as_deref(), Some(&b"earlylate"[..]));
    }
}
