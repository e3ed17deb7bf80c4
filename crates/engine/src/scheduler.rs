// Broadcast scheduler: when the local state goes out on the wire.
//
// The latest reported state is re-sent every resend interval, forever, until
// the engine closes. A new report or a peer's roll call sends right away and
// restarts the interval from that moment.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct BroadcastScheduler<P> {
    resend_interval: Duration,
    local: Option<P>,
    next_resend: Option<Instant>,
}

impl<P> BroadcastScheduler<P> {
    pub fn new(resend_interval: Duration) -> Self {
        Self { resend_interval, local: None, next_resend: None }
    }

    /// Replace the local state and re-arm the resend timer.
    /// The caller sends the new state immediately.
    pub fn report(&mut self, payload: P, now: Instant) {
        self.local = Some(payload);
        self.next_resend = Some(now + self.resend_interval);
    }

    /// A peer asked everyone to re-announce. Returns true when there is a
    /// local state to send now; the resend timer restarts from `now`.
    pub fn answer_roll_call(&mut self, now: Instant) -> bool {
        if self.local.is_none() {
            return false;
        }
        self.next_resend = Some(now + self.resend_interval);
        true
    }

    /// Returns true when the resend deadline has passed, advancing it by
    /// one interval from `now`.
    pub fn poll_resend(&mut self, now: Instant) -> bool {
        match self.next_resend {
            Some(deadline) if deadline <= now && self.local.is_some() => {
                self.next_resend = Some(now + self.resend_interval);
                true
            }
            _ => false,
        }
    }

    pub fn next_resend(&self) -> Option<Instant> {
        self.next_resend
    }

    pub fn local_state(&self) -> Option<&P> {
        self.local.as_ref()
    }

    /// Stop resending. The stored state is kept but never sent again.
    pub fn cancel(&mut self) {
        self.next_resend = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESEND: Duration = Duration::from_secs(15);

    #[test]
    fn nothing_scheduled_before_first_report() {
        let mut scheduler: BroadcastScheduler<&str> = BroadcastScheduler::new(RESEND);
        let now = Instant::now();

        assert!(scheduler.next_resend().is_none());
        assert!(!scheduler.poll_resend(now + RESEND * 10));
        assert!(!scheduler.answer_roll_call(now));
    }

    #[test]
    fn report_arms_resend_one_interval_out() {
        let mut scheduler = BroadcastScheduler::new(RESEND);
        let now = Instant::now();

        scheduler.report("/doc/1", now);

        assert_eq!(scheduler.local_state(), Some(&"/doc/1"));
        assert_eq!(scheduler.next_resend(), Some(now + RESEND));
        assert!(!scheduler.poll_resend(now + RESEND - Duration::from_millis(1)));
        assert!(scheduler.poll_resend(now + RESEND));
        assert_eq!(scheduler.next_resend(), Some(now + RESEND * 2));
    }

    #[test]
    fn resend_repeats_forever() {
        let mut scheduler = BroadcastScheduler::new(RESEND);
        let now = Instant::now();
        scheduler.report("/doc/1", now);

        let sent = (1..=5).filter(|tick| scheduler.poll_resend(now + RESEND * *tick)).count();
        assert_eq!(sent, 5);
    }

    #[test]
    fn new_report_restarts_interval() {
        let mut scheduler = BroadcastScheduler::new(RESEND);
        let now = Instant::now();
        scheduler.report("/doc/1", now);

        let later = now + Duration::from_secs(10);
        scheduler.report("/doc/2", later);

        assert!(!scheduler.poll_resend(now + RESEND));
        assert!(scheduler.poll_resend(later + RESEND));
        assert_eq!(scheduler.local_state(), Some(&"/doc/2"));
    }

    #[test]
    fn roll_call_answers_immediately_and_resets_timer() {
        let mut scheduler = BroadcastScheduler::new(RESEND);
        let now = Instant::now();
        scheduler.report("/doc/1", now);

        let roll_call_at = now + Duration::from_secs(14);
        assert!(scheduler.answer_roll_call(roll_call_at));
        assert_eq!(scheduler.next_resend(), Some(roll_call_at + RESEND));
        assert!(!scheduler.poll_resend(now + RESEND));
    }

    #[test]
    fn cancel_stops_resending() {
        let mut scheduler = BroadcastScheduler::new(RESEND);
        let now = Instant::now();
        scheduler.report("/doc/1", now);

        scheduler.cancel();

        assert!(scheduler.next_resend().is_none());
        assert!(!scheduler.poll_resend(now + RESEND * 3));
    }
}
