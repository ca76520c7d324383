//! The six-state promise status machine.

/// Lifecycle states of a promise.
///
/// The "pre" states mean the outcome is known but the continuation has not
/// yet run through its executor. `Fulfilled`, `Rejected`, and `Cancelled`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromiseStatus {
    /// Not settled yet.
    Init,
    /// Resolved; the continuation has not run yet.
    PreFulfilled,
    /// Resolved and the continuation has run in its executor.
    Fulfilled,
    /// Rejected; the continuation has not run yet.
    PreRejected,
    /// Rejected and the continuation has run in its executor.
    Rejected,
    /// Cancelled; callback and storage have been purged.
    Cancelled,
}

/// Enforces the legal transitions between [`PromiseStatus`] values.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StatusMachine {
    status: PromiseStatus,
}

impl StatusMachine {
    pub(crate) const fn new() -> Self {
        Self {
            status: PromiseStatus::Init,
        }
    }

    pub(crate) const fn get(self) -> PromiseStatus {
        self.status
    }

    pub(crate) fn to_pre_fulfilled(&mut self) -> bool {
        self.step(PromiseStatus::Init, PromiseStatus::PreFulfilled)
    }

    pub(crate) fn to_fulfilled(&mut self) -> bool {
        self.step(PromiseStatus::PreFulfilled, PromiseStatus::Fulfilled)
    }

    pub(crate) fn to_pre_rejected(&mut self) -> bool {
        self.step(PromiseStatus::Init, PromiseStatus::PreRejected)
    }

    pub(crate) fn to_rejected(&mut self) -> bool {
        self.step(PromiseStatus::PreRejected, PromiseStatus::Rejected)
    }

    pub(crate) fn to_cancelled(&mut self) -> bool {
        match self.status {
            PromiseStatus::Init | PromiseStatus::PreFulfilled | PromiseStatus::PreRejected => {
                self.status = PromiseStatus::Cancelled;
                true
            }
            _ => false,
        }
    }

    fn step(&mut self, from: PromiseStatus, to: PromiseStatus) -> bool {
        if self.status == from {
            self.status = to;
            true
        } else {
            false
        }
    }

    /// Not settled yet.
    pub(crate) fn is_empty(self) -> bool {
        self.status == PromiseStatus::Init
    }

    /// The outcome is known but the continuation has not run.
    pub(crate) fn is_pending(self) -> bool {
        matches!(
            self.status,
            PromiseStatus::PreFulfilled | PromiseStatus::PreRejected
        )
    }

    /// The continuation has run in its executor.
    pub(crate) fn is_done(self) -> bool {
        matches!(
            self.status,
            PromiseStatus::Fulfilled | PromiseStatus::Rejected
        )
    }

    /// `resolve` has been called.
    pub(crate) fn is_satisfied(self) -> bool {
        matches!(
            self.status,
            PromiseStatus::PreFulfilled | PromiseStatus::Fulfilled
        )
    }

    /// `reject` has been called.
    pub(crate) fn is_unsatisfied(self) -> bool {
        matches!(
            self.status,
            PromiseStatus::PreRejected | PromiseStatus::Rejected
        )
    }

    /// The outcome has been recorded (settled either way, not cancelled).
    pub(crate) fn is_settled(self) -> bool {
        !self.is_empty() && self.status != PromiseStatus::Cancelled
    }

    pub(crate) fn is_cancelled(self) -> bool {
        self.status == PromiseStatus::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fulfilment_path() {
        let mut m = StatusMachine::new();
        assert!(m.is_empty());
        assert!(m.to_pre_fulfilled());
        assert!(m.is_pending());
        assert!(m.is_satisfied());
        assert!(!m.is_done());
        assert!(m.to_fulfilled());
        assert!(m.is_done());
        assert!(m.is_settled());
    }

    #[test]
    fn rejection_path() {
        let mut m = StatusMachine::new();
        assert!(m.to_pre_rejected());
        assert!(m.is_unsatisfied());
        assert!(m.to_rejected());
        assert!(m.is_done());
    }

    #[test]
    fn settlement_is_exclusive() {
        let mut m = StatusMachine::new();
        assert!(m.to_pre_fulfilled());
        assert!(!m.to_pre_rejected());
        assert!(!m.to_pre_fulfilled());
        assert!(!m.to_rejected());
    }

    #[test]
    fn cancel_from_init_and_pre_states_only() {
        let mut m = StatusMachine::new();
        assert!(m.to_cancelled());
        assert!(m.is_cancelled());
        assert!(!m.is_settled());

        let mut m = StatusMachine::new();
        assert!(m.to_pre_fulfilled());
        assert!(m.to_cancelled());

        let mut m = StatusMachine::new();
        assert!(m.to_pre_fulfilled());
        assert!(m.to_fulfilled());
        assert!(!m.to_cancelled());
        assert!(m.is_done());
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut m = StatusMachine::new();
        assert!(m.to_cancelled());
        assert!(!m.to_cancelled());
        assert!(m.is_cancelled());
    }
}
