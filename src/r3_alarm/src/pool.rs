//! Statically allocated slot pool and the two index-linked lists threaded
//! through it.
#![deny(missing_docs)]
use core::fmt;

use crate::{
    tick::{ticks_until, Tick},
    utils::Init,
    Callback,
};

/// The reserved link value meaning "no next slot".
pub const SENTINEL: u8 = 0xff;

/// The link to the next slot in a list, or the end of the list.
///
/// This is a one-byte encoding of `Option<usize>` where [`Link::END`]
/// represents `None`.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Link(u8);

impl Link {
    /// The end of a list.
    pub const END: Self = Self(SENTINEL);

    /// Construct a link to the slot at index `i`.
    #[inline]
    pub const fn new(i: usize) -> Self {
        debug_assert!(i < SENTINEL as usize);
        Self(i as u8)
    }

    /// Get the index of the slot this link points to.
    #[inline]
    pub const fn get(self) -> Option<usize> {
        if self.0 == SENTINEL {
            None
        } else {
            Some(self.0 as usize)
        }
    }

    /// Get a flag indicating whether `self` is [`Link::END`].
    #[inline]
    pub const fn is_end(self) -> bool {
        self.0 == SENTINEL
    }
}

impl From<Option<usize>> for Link {
    #[inline]
    fn from(x: Option<usize>) -> Self {
        match x {
            Some(i) => Self::new(i),
            None => Self::END,
        }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.get() {
            Some(i) => write!(f, "Link({i})"),
            None => f.write_str("Link::END"),
        }
    }
}

impl Init for Link {
    const INIT: Self = Self::END;
}

/// *Callback slot* - the state data of one alarm.
#[derive(Clone, Copy, Debug)]
pub struct Slot<'a> {
    /// The absolute tick at which the callback should be invoked.
    pub fire_tick: Tick,
    /// The next slot in whichever list currently owns this slot.
    pub next: Link,
    /// `true` iff the slot is linked into the scheduled list. Diagnostic
    /// only; list traversal never looks at it.
    pub in_use: bool,
    /// The function invoked when the alarm fires. Null while the slot is
    /// free.
    pub callback: Callback<'a>,
}

impl Init for Slot<'_> {
    const INIT: Self = Self {
        fire_tick: Init::INIT,
        next: Link::INIT,
        in_use: Init::INIT,
        callback: Callback::INIT,
    };
}

/// A fixed array of `N` slots partitioned into a free list (unordered) and a
/// scheduled list (sorted by fire tick).
///
/// Every slot belongs to exactly one of the two lists at any time. All list
/// operations except [`insert_scheduled`](Self::insert_scheduled) are O(1).
pub struct SlotPool<'a, const N: usize> {
    slots: [Slot<'a>; N],
    free_head: Link,
    scheduled_head: Link,
}

impl<'a, const N: usize> SlotPool<'a, N> {
    /// Evaluated on every construction so that a bad `N` fails the build.
    const VALID_CAPACITY: () = assert!(
        N < SENTINEL as usize,
        "the capacity must be less than the sentinel link value"
    );

    /// Construct a pool with every slot linked into the free list in index
    /// order and an empty scheduled list.
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_CAPACITY;

        let mut slots = [Slot::INIT; N];

        // `[T]::iter` is unusable in `const fn`
        let mut i = 0;
        while i < N {
            slots[i].next = if i + 1 < N {
                Link::new(i + 1)
            } else {
                Link::END
            };
            i += 1;
        }

        Self {
            slots,
            free_head: if N > 0 { Link::new(0) } else { Link::END },
            scheduled_head: Link::END,
        }
    }

    /// Relink every slot into the free list, discarding all scheduled
    /// alarms.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Get the slot array, indexed by the values yielded by
    /// [`free_iter`](Self::free_iter) and
    /// [`scheduled_iter`](Self::scheduled_iter).
    pub fn slots(&self) -> &[Slot<'a>; N] {
        &self.slots
    }

    /// Get a mutable reference to the slot at index `i`.
    ///
    /// Changing [`Slot::next`] or the `fire_tick` of a scheduled slot through
    /// this breaks the list invariants.
    ///
    /// # Panics
    ///
    /// Panics if `i >= N`.
    pub fn slot_mut(&mut self, i: usize) -> &mut Slot<'a> {
        &mut self.slots[i]
    }

    /// Get the index of the slot that [`pop_free`](Self::pop_free) would
    /// return next.
    pub fn free_head(&self) -> Option<usize> {
        self.free_head.get()
    }

    /// Get the index of the earliest scheduled slot.
    pub fn scheduled_head(&self) -> Option<usize> {
        self.scheduled_head.get()
    }

    /// Detach the first slot of the free list.
    #[inline]
    pub fn pop_free(&mut self) -> Option<usize> {
        let i = self.free_head.get()?;
        self.free_head = self.slots[i].next;
        self.slots[i].next = Link::END;
        Some(i)
    }

    /// Attach a detached slot at the front of the free list.
    #[inline]
    pub fn push_free(&mut self, i: usize) {
        self.slots[i].next = self.free_head;
        self.free_head = Link::new(i);
    }

    /// Detach the first (earliest) slot of the scheduled list.
    #[inline]
    pub fn pop_scheduled(&mut self) -> Option<usize> {
        let i = self.scheduled_head.get()?;
        self.scheduled_head = self.slots[i].next;
        self.slots[i].next = Link::END;
        Some(i)
    }

    /// Link a detached slot into the scheduled list, keeping the list sorted
    /// by fire tick as seen from `now`.
    ///
    /// The slot is placed right before the first slot that fires at the same
    /// time or later, or at the tail if there's none. Runs in O(n) where n is
    /// the length of the scheduled list.
    pub fn insert_scheduled(&mut self, i: usize, now: Tick) {
        let target = ticks_until(self.slots[i].fire_tick, now);

        // `lag` trails `lead` by one slot
        let mut lag = None;
        let mut lead = self.scheduled_head;
        while let Some(j) = lead.get() {
            if ticks_until(self.slots[j].fire_tick, now) >= target {
                break;
            }
            lag = Some(j);
            lead = self.slots[j].next;
        }

        self.slots[i].next = lead;
        match lag {
            Some(j) => self.slots[j].next = Link::new(i),
            None => self.scheduled_head = Link::new(i),
        }
    }

    /// Iterate over the indices of the free slots.
    pub fn free_iter(&self) -> ListIter<'_, 'a, N> {
        ListIter {
            pool: self,
            cur: self.free_head,
            remaining: N,
        }
    }

    /// Iterate over the indices of the scheduled slots, earliest first.
    pub fn scheduled_iter(&self) -> ListIter<'_, 'a, N> {
        ListIter {
            pool: self,
            cur: self.scheduled_head,
            remaining: N,
        }
    }
}

impl<const N: usize> Init for SlotPool<'_, N> {
    const INIT: Self = Self::new();
}

impl<const N: usize> fmt::Debug for SlotPool<'_, N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SlotPool")
            .field("free", &self.free_iter().count())
            .field("scheduled", &DebugScheduled { pool: self })
            .finish()
    }
}

struct DebugScheduled<'p, 'a, const N: usize> {
    pool: &'p SlotPool<'a, N>,
}

impl<const N: usize> fmt::Debug for DebugScheduled<'_, '_, N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list()
            .entries(
                self.pool
                    .scheduled_iter()
                    .map(|i| self.pool.slots[i].fire_tick),
            )
            .finish()
    }
}

/// Iterator over one of the lists of a [`SlotPool`].
pub struct ListIter<'p, 'a, const N: usize> {
    pool: &'p SlotPool<'a, N>,
    cur: Link,
    /// Upper bound on the remaining items. Keeps a corrupted (cyclic) list
    /// from hanging the iteration.
    remaining: usize,
}

impl<const N: usize> Iterator for ListIter<'_, '_, N> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let i = self.cur.get()?;
        if self.remaining == 0 {
            debug_assert!(false, "linked list is inconsistent");
            return None;
        }
        self.remaining -= 1;
        self.cur = self.pool.slots[i].next;
        Some(i)
    }
}
