use std::sync::atomic::{AtomicU64, Ordering};

/// Ticket handed out when a fetch starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

/// Orders fetches so a slow, older response never overwrites a newer one.
#[derive(Debug, Default)]
pub struct Sequencer {
    issued: AtomicU64,
    applied: AtomicU64,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> Ticket {
        Ticket(self.issued.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// The newest ticket handed out so far.
    pub fn latest(&self) -> Ticket {
        Ticket(self.issued.load(Ordering::SeqCst))
    }

    /// Claim the right to apply the response for `ticket`.
    ///
    /// Succeeds unless a response for a later ticket was already applied.
    /// Callers must apply under the same lock they call this in.
    pub fn accept(&self, ticket: Ticket) -> bool {
        self.applied.fetch_max(ticket.0, Ordering::SeqCst) < ticket.0
    }

    /// Whether nothing newer than `ticket` has been applied yet.
    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.applied.load(Ordering::SeqCst) < ticket.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_completion_of_older_fetch_is_rejected() {
        let seq = Sequencer::new();
        let a = seq.begin();
        let b = seq.begin();
        assert!(seq.accept(b));
        assert!(!seq.is_current(a));
        assert!(!seq.accept(a));
    }

    #[test]
    fn latest_tracks_issued_tickets() {
        let seq = Sequencer::new();
        let before = seq.latest();
        let a = seq.begin();
        assert!(before < a);
        assert_eq!(seq.latest(), a);
    }

    #[test]
    fn in_order_completions_both_apply() {
        let seq = Sequencer::new();
        let a = seq.begin();
        let b = seq.begin();
        assert!(seq.accept(a));
        assert!(seq.is_current(b));
        assert!(seq.accept(b));
        assert!(!seq.accept(b));
    }
}
