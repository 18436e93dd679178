//! Request sequencing — last request wins, stale responses are dropped.
//!
//! Every collaborator call takes a [`RequestTicket`]. When its response comes
//! back, [`RequestLedger::is_current`] decides whether it may still be applied.

use crate::error::Operation;

/// Identifies one issued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTicket {
    pub operation: Operation,
    pub seq: u64,
    pub epoch: u64,
}

/// Tracks the newest request of each kind.
///
/// `epoch` changes on shutdown and board change, invalidating everything
/// issued before.
#[derive(Debug, Default)]
pub struct RequestLedger {
    next_seq: u64,
    epoch: u64,
    latest: [u64; 4],
    /// Sequence of the newest request that replaces the session as a result
    /// of a user action or start (anything but a refresh).
    last_mutation: u64,
}

impl RequestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&mut self, operation: Operation) -> RequestTicket {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.latest[slot(operation)] = seq;
        if operation != Operation::Refresh {
            self.last_mutation = seq;
        }
        RequestTicket {
            operation,
            seq,
            epoch: self.epoch,
        }
    }

    /// Whether a response to `ticket` may still be applied.
    ///
    /// Refreshes also lose to any start/answer/confirm issued after them.
    pub fn is_current(&self, ticket: &RequestTicket) -> bool {
        if ticket.epoch != self.epoch {
            return false;
        }
        if self.latest[slot(ticket.operation)] != ticket.seq {
            return false;
        }
        ticket.operation != Operation::Refresh || self.last_mutation < ticket.seq
    }

    /// Whether `ticket` was issued since the last invalidation.
    pub fn same_epoch(&self, ticket: &RequestTicket) -> bool {
        ticket.epoch == self.epoch
    }

    /// Invalidate every outstanding ticket.
    pub fn invalidate_all(&mut self) {
        self.epoch += 1;
    }
}

fn slot(operation: Operation) -> usize {
    match operation {
        Operation::Start => 0,
        Operation::Refresh => 1,
        Operation::Answer => 2,
        Operation::Confirm => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ticket_is_current() {
        let mut ledger = RequestLedger::new();
        let t = ledger.issue(Operation::Refresh);
        assert!(ledger.is_current(&t));
    }

    #[test]
    fn newer_request_of_same_kind_wins() {
        let mut ledger = RequestLedger::new();
        let first = ledger.issue(Operation::Refresh);
        let second = ledger.issue(Operation::Refresh);
        assert!(!ledger.is_current(&first));
        assert!(ledger.is_current(&second));
    }

    #[test]
    fn answer_after_refresh_makes_refresh_stale() {
        let mut ledger = RequestLedger::new();
        let refresh = ledger.issue(Operation::Refresh);
        let answer = ledger.issue(Operation::Answer);
        assert!(!ledger.is_current(&refresh));
        assert!(ledger.is_current(&answer));
    }

    #[test]
    fn refresh_after_answer_is_still_current() {
        let mut ledger = RequestLedger::new();
        let answer = ledger.issue(Operation::Answer);
        let refresh = ledger.issue(Operation::Refresh);
        assert!(ledger.is_current(&refresh));
        // Kinds are tracked independently for non-refresh requests.
        assert!(ledger.is_current(&answer));
    }

    #[test]
    fn invalidate_drops_everything_outstanding() {
        let mut ledger = RequestLedger::new();
        let start = ledger.issue(Operation::Start);
        let refresh = ledger.issue(Operation::Refresh);
        ledger.invalidate_all();
        assert!(!ledger.is_current(&start));
        assert!(!ledger.is_current(&refresh));

        let again = ledger.issue(Operation::Start);
        assert!(ledger.is_current(&again));
    }
}
