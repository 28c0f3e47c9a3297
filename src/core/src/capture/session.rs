use std::collections::HashSet;
use std::time::Instant;

use crate::job::types::Job;

/// Per-flow capture state: the open job plus the bookkeeping needed for
/// sequence dedup and idle-timeout closure. Owned exclusively by the session
/// table until finalization.
#[derive(Debug)]
pub struct TapSession {
    pub job: Job,
    /// Monotonic time of the last packet on this flow, in either direction.
    pub last_seen: Instant,
    /// Raw sequence numbers already accepted. Sequences are opaque tokens
    /// within one session; wrap-around is not reconciled.
    seq_seen: HashSet<u32>,
    next_seq: u32,
    initialized: bool,
}

impl TapSession {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            last_seen: Instant::now(),
            seq_seen: HashSet::new(),
            next_seq: 0,
            initialized: false,
        }
    }

    /// Accepts a segment's sequence number. Returns false for a duplicate
    /// (retransmission); the first accepted sequence latches the session.
    pub fn accept_seq(&mut self, seq: u32) -> bool {
        if !self.seq_seen.insert(seq) {
            return false;
        }
        if !self.initialized {
            self.next_seq = seq;
            self.initialized = true;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::types::Transport;

    fn session() -> TapSession {
        TapSession::new(Job::new(
            "dev-1",
            "site-1",
            "192.168.1.50".parse().unwrap(),
            9100,
            "192.168.1.10".parse().unwrap(),
            Transport::Tcp9100,
        ))
    }

    #[test]
    fn duplicate_sequence_is_rejected() {
        let mut session = session();
        assert!(session.accept_seq(1000));
        assert!(!session.accept_seq(1000));
        assert!(session.accept_seq(1005));
    }

    #[test]
    fn first_sequence_latches() {
        let mut session = session();
        assert!(!session.initialized);
        session.accept_seq(4_294_967_000);
        assert!(session.initialized);
        assert_eq!(session.next_seq, 4_294_967_000);
        // Later sequences do not move the latch.
        session.accept_seq(12);
        assert_eq!(session.next_seq, 4_294_967_000);
    }
}
