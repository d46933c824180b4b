//! Process-wide bound on concurrently fetching downloads.
//!
//! The gate keeps non-owning references to every known download in
//! registration order. Downloads that find no free slot stay registered and
//! idle; the next [`AdmissionGate::unregister`] activates as many of them as
//! capacity allows. There is no fairness or aging beyond registration order.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, instrument};

use super::config::clamp_concurrency;

/// A download tracked by the [`AdmissionGate`].
pub trait GateMember: Send + Sync {
    /// Returns true while the member holds a slot.
    fn is_active(&self) -> bool;

    /// Asks an idle member to start; members decide themselves whether they can.
    fn activate(&self);
}

/// Registry bounding how many members are active at once.
pub struct AdmissionGate {
    max_concurrency: usize,
    members: Mutex<Vec<Weak<dyn GateMember>>>,
}

impl std::fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("max_concurrency", &self.max_concurrency)
            .field("registered", &self.registered())
            .finish()
    }
}

impl AdmissionGate {
    /// Creates a gate; the limit is clamped to `[1, 1000]`.
    #[must_use]
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: clamp_concurrency(max_concurrency),
            members: Mutex::new(Vec::new()),
        }
    }

    /// Configured limit.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Adds a member; registering the same member twice is a no-op.
    pub fn register(&self, member: Weak<dyn GateMember>) {
        let mut members = self.lock();
        if !members.iter().any(|known| Weak::ptr_eq(known, &member)) {
            members.push(member);
        }
    }

    /// Removes a member, then activates idle members in registration order
    /// while capacity remains.
    #[instrument(level = "debug", skip_all)]
    pub fn unregister(&self, member: &Weak<dyn GateMember>) {
        let live: Vec<Arc<dyn GateMember>> = {
            let mut members = self.lock();
            members.retain(|known| !Weak::ptr_eq(known, member));
            members.retain(|known| known.strong_count() > 0);
            members.iter().filter_map(Weak::upgrade).collect()
        };

        for candidate in live.into_iter().filter(|candidate| !candidate.is_active()) {
            if !self.can_admit() {
                break;
            }
            debug!("activating queued download");
            candidate.activate();
        }
    }

    /// Free slots; stale references are pruned on the way.
    #[must_use]
    pub fn capacity_remaining(&self) -> usize {
        let (remaining, _live) = {
            let mut members = self.lock();
            self.remaining_locked(&mut members)
        };
        remaining
    }

    /// Returns true when at least one slot is free.
    #[must_use]
    pub fn can_admit(&self) -> bool {
        self.capacity_remaining() > 0
    }

    /// Runs `claim` and returns true if a slot is free, atomically with
    /// respect to other admissions. `claim` must make the caller count as
    /// active.
    pub fn try_admit(&self, claim: impl FnOnce()) -> bool {
        let (admitted, _live) = {
            let mut members = self.lock();
            let (remaining, live) = self.remaining_locked(&mut members);
            if remaining > 0 {
                claim();
            }
            (remaining > 0, live)
        };
        admitted
    }

    /// Number of live registered members.
    #[must_use]
    pub fn registered(&self) -> usize {
        let mut members = self.lock();
        members.retain(|known| known.strong_count() > 0);
        members.len()
    }

    // Upgraded members are returned so they drop after the lock is released;
    // a member's final drop unregisters itself.
    fn remaining_locked(
        &self,
        members: &mut Vec<Weak<dyn GateMember>>,
    ) -> (usize, Vec<Arc<dyn GateMember>>) {
        members.retain(|known| known.strong_count() > 0);
        let live: Vec<Arc<dyn GateMember>> = members.iter().filter_map(Weak::upgrade).collect();
        let active = live.iter().filter(|member| member.is_active()).count();
        (self.max_concurrency.saturating_sub(active), live)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Weak<dyn GateMember>>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    /// Member that takes a slot through the gate when activated.
    struct FakeMember {
        gate: Weak<AdmissionGate>,
        active: AtomicBool,
        activations: AtomicUsize,
    }

    impl FakeMember {
        fn new(gate: &Arc<AdmissionGate>) -> Arc<Self> {
            Arc::new(Self {
                gate: Arc::downgrade(gate),
                active: AtomicBool::new(false),
                activations: AtomicUsize::new(0),
            })
        }

        fn start(self: &Arc<Self>) {
            let gate = self.gate.upgrade().unwrap();
            let member: Weak<dyn GateMember> = Arc::downgrade(&(self.clone() as Arc<dyn GateMember>));
            gate.register(member);
            self.activate();
        }

        fn finish(self: &Arc<Self>) {
            self.active.store(false, Ordering::SeqCst);
            let member: Weak<dyn GateMember> = Arc::downgrade(&(self.clone() as Arc<dyn GateMember>));
            self.gate.upgrade().unwrap().unregister(&member);
        }
    }

    impl GateMember for FakeMember {
        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }

        fn activate(&self) {
            self.activations.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = self.gate.upgrade() {
                gate.try_admit(|| self.active.store(true, Ordering::SeqCst));
            }
        }
    }

    #[test]
    fn test_limit_is_clamped() {
        assert_eq!(AdmissionGate::new(0).max_concurrency(), 1);
        assert_eq!(AdmissionGate::new(10_000).max_concurrency(), 1000);
    }

    #[test]
    fn test_register_is_idempotent() {
        let gate = Arc::new(AdmissionGate::new(2));
        let member = FakeMember::new(&gate);
        let weak: Weak<dyn GateMember> = Arc::downgrade(&(member.clone() as Arc<dyn GateMember>));
        gate.register(weak.clone());
        gate.register(weak);
        assert_eq!(gate.registered(), 1);
    }

    #[test]
    fn test_third_member_waits_until_slot_frees() {
        let gate = Arc::new(AdmissionGate::new(2));
        let a = FakeMember::new(&gate);
        let b = FakeMember::new(&gate);
        let c = FakeMember::new(&gate);
        a.start();
        b.start();
        c.start();

        assert!(a.is_active());
        assert!(b.is_active());
        assert!(!c.is_active());
        assert_eq!(gate.capacity_remaining(), 0);
        assert!(!gate.can_admit());

        a.finish();
        assert!(c.is_active());
        assert_eq!(gate.registered(), 2);
    }

    #[test]
    fn test_reactivation_follows_registration_order() {
        let gate = Arc::new(AdmissionGate::new(1));
        let first = FakeMember::new(&gate);
        let second = FakeMember::new(&gate);
        let third = FakeMember::new(&gate);
        first.start();
        second.start();
        third.start();

        first.finish();
        assert!(second.is_active());
        assert!(!third.is_active());
        assert_eq!(third.activations.load(Ordering::SeqCst), 1);

        second.finish();
        assert!(third.is_active());
    }

    #[test]
    fn test_dropped_members_are_pruned() {
        let gate = Arc::new(AdmissionGate::new(1));
        let a = FakeMember::new(&gate);
        a.start();
        assert_eq!(gate.capacity_remaining(), 0);
        drop(a);
        assert_eq!(gate.capacity_remaining(), 1);
        assert_eq!(gate.registered(), 0);
    }
}
