use std::ptr;
use std::sync::atomic::{AtomicIsize, AtomicPtr, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use seize::Collector;

use super::{tag, Entry};

// A fixed-capacity table of slots, laid out in a single owned allocation.
//
// A table never grows in place. Once its insert budget is exhausted a
// double-capacity successor is linked through `state.next` and live entries
// are migrated over cooperatively.
pub struct Table<K, V> {
    // Mask for the table length.
    pub mask: usize,

    // The remaining insert budget before a resize must be triggered.
    //
    // This may transiently go negative under racing inserts, hence signed.
    pub remaining: AtomicIsize,

    // Migration state for this table.
    pub state: State<K, V>,

    // The slot array.
    slots: Box<[Slot<K, V>]>,
}

// One table cell: an atomic tag plus atomically-swapped entry storage.
pub struct Slot<K, V> {
    // The slot tag: `EMPTY`, `TOMBSTONE`, `MOVED`, or a remapped key hash.
    pub tag: AtomicU64,

    // The entry for this slot, possibly carrying pointer tag bits.
    pub entry: AtomicPtr<Entry<K, V>>,
}

impl<K, V> Slot<K, V> {
    fn new() -> Slot<K, V> {
        Slot {
            tag: AtomicU64::new(tag::EMPTY),
            entry: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

// Migration state for a table.
pub struct State<K, V> {
    // The successor table, set once by the winner of the resize race.
    pub next: AtomicPtr<Table<K, V>>,

    // The number of slots claimed by migration helpers.
    pub claim: AtomicUsize,

    // The number of slots that have been fully migrated.
    pub copied: AtomicUsize,

    // The lifecycle phase of this table.
    pub status: AtomicU8,
}

impl State<(), ()> {
    /// The table is the active target for all operations.
    pub const LIVE: u8 = 0;

    /// A successor exists and slots are being migrated into it.
    pub const DRAINING: u8 = 1;

    /// Every slot is `MOVED` and the table has been unlinked from the root.
    pub const RETIRED: u8 = 2;
}

impl<K, V> Default for State<K, V> {
    fn default() -> State<K, V> {
        State {
            next: AtomicPtr::new(ptr::null_mut()),
            claim: AtomicUsize::new(0),
            copied: AtomicUsize::new(0),
            status: AtomicU8::new(State::LIVE),
        }
    }
}

impl<K, V> Table<K, V> {
    // Allocate a table with the provided length.
    pub fn alloc(len: usize, max_load_factor: f64) -> *mut Table<K, V> {
        assert!(len.is_power_of_two());

        let slots = (0..len).map(|_| Slot::new()).collect();

        // The insert budget for this table, matching the configured load factor.
        let budget = (len as f64 * max_load_factor) as isize + 1;

        Box::into_raw(Box::new(Table {
            mask: len - 1,
            remaining: AtomicIsize::new(budget),
            state: State::default(),
            slots,
        }))
    }

    /// Creates a reference to a table from a raw pointer.
    ///
    /// # Safety
    ///
    /// The pointer must have been created by `Table::alloc` and not yet
    /// deallocated, and must remain valid for the returned lifetime.
    #[inline]
    pub unsafe fn from_raw<'a>(raw: *mut Table<K, V>) -> &'a Table<K, V> {
        unsafe { &*raw }
    }

    /// Returns the length of the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.mask + 1
    }

    /// Returns the slot at the given index.
    #[inline]
    pub fn slot(&self, i: usize) -> &Slot<K, V> {
        &self.slots[i]
    }

    /// Returns a reference to the successor table, if it has been created.
    ///
    /// A successor always outlives its predecessor: the predecessor is
    /// retired first, so the returned reference is valid for as long as
    /// `self` is reachable.
    #[inline]
    pub fn next_table(&self) -> Option<&Table<K, V>> {
        let next = self.state.next.load(Ordering::Acquire);

        if next.is_null() {
            return None;
        }

        // Safety: Non-null successor pointers are valid table allocations
        // that are only deallocated after this table.
        unsafe { Some(Table::from_raw(next)) }
    }

    // Deallocate a table created by `Table::alloc`.
    //
    // # Safety
    //
    // The table must not be accessed after this call. Entries reachable from
    // the slots are not dropped.
    pub unsafe fn dealloc(raw: *mut Table<K, V>) {
        // Safety: The caller guarantees the pointer came from `Table::alloc`.
        drop(unsafe { Box::from_raw(raw) });
    }

    // Reclaimer callback for a retired table.
    //
    // # Safety
    //
    // Called by the collector once no guard can still reference the table.
    // Every slot of a retired table is `MOVED`, so its entries are owned by
    // the successor and must not be dropped here.
    pub(crate) unsafe fn reclaim(raw: *mut Table<K, V>, _collector: &Collector) {
        unsafe { Table::dealloc(raw) }
    }
}
