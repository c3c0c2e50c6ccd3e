//! Versioned records and the decide/apply contract for stock changes.

/// A record with an identity and a version counter.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Bumped once per committed change. Stores refuse a write whose
    /// [`ExpectedVersion`] no longer matches.
    fn version(&self) -> u64;
}

/// Version a writer read before deciding.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Write unconditionally (first insert).
    Any,
    Exact(u64),
}

impl ExpectedVersion {
    /// Pins the write to the version `root` was loaded at.
    pub fn of<A: AggregateRoot>(root: &A) -> Self {
        ExpectedVersion::Exact(root.version())
    }

    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }
}

/// Pure decision logic over a loaded record.
///
/// `handle` inspects the current state and returns the changes to commit
/// without mutating anything; `apply` folds a committed change back into
/// the state. Neither performs IO.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Must bump `version()` by one.
    fn apply(&mut self, event: &Self::Event);

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Shelf {
        id: u32,
        version: u64,
    }

    impl AggregateRoot for Shelf {
        type Id = u32;

        fn id(&self) -> &u32 {
            &self.id
        }

        fn version(&self) -> u64 {
            self.version
        }
    }

    #[test]
    fn any_accepts_every_version() {
        assert!(ExpectedVersion::Any.matches(0));
        assert!(ExpectedVersion::Any.matches(42));
    }

    #[test]
    fn loaded_version_goes_stale_after_a_commit() {
        let mut shelf = Shelf { id: 1, version: 3 };
        let expected = ExpectedVersion::of(&shelf);
        assert!(expected.matches(3));

        shelf.version += 1;
        assert!(!expected.matches(shelf.version()));
        assert_eq!(*shelf.id(), 1);
    }
}
