mod alloc;
mod probe;
mod utils;

use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};
use std::hint;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use seize::{Collector, Guard, LocalGuard, OwnedGuard};

use self::alloc::{Slot, State, Table};
use self::probe::Probe;
use self::utils::{AtomicPtrFetchOps, Counter, StrictProvenance, Unpack};

// Slot tag words.
//
// A tag is one of the sentinels below, or the remapped hash of the key that
// claimed the slot.
pub(crate) mod tag {
    /// The slot has never held an entry; terminates probe sequences.
    pub const EMPTY: u64 = 0;

    /// The slot was migrated; consult the successor table.
    pub const MOVED: u64 = 1;

    /// The slot held an entry that was erased. Probes continue past it.
    pub const TOMBSTONE: u64 = 2;

    // Hashes that collide with a sentinel are folded in here.
    const RESERVED: u64 = 0x7000_0000_0000_0000;

    /// Remap a hash so it never collides with a sentinel tag.
    #[inline]
    pub fn from_hash(hash: u64) -> u64 {
        if hash <= TOMBSTONE {
            return RESERVED | hash;
        }

        hash
    }
}

// The MurmurHash3 64-bit finalizer.
//
// The standard hasher is close to the identity for integer keys, so the raw
// hash is avalanched before it is used as a tag and probe seed.
#[inline]
fn fmix64(mut hash: u64) -> u64 {
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xff51afd7ed558ccd);
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xc4ceb9fe1a85ec53);
    hash ^= hash >> 33;
    hash
}

// An entry in the map.
//
// Entries are allocated individually and published to a slot with a single
// pointer store, so values of any type can be swapped atomically.
#[repr(align(8))]
pub struct Entry<K, V> {
    pub key: K,
    pub value: V,
}

// The slot's entry is being migrated to the successor table. The mark is
// terminal: writers that observe it redirect to the successor.
const COPYING: usize = 0b01;

// The carry of a `COPYING` entry into the successor has been claimed.
// Exactly one helper sets this, installs the entry, and finishes the slot.
const CARRIED: usize = 0b100;

// Sentinel address for an erased entry. `Entry` is aligned to 8 bytes, so
// the address can never belong to a real allocation.
const TOMBSTONE_ENTRY: usize = 0b10;

impl<K, V> Unpack for Entry<K, V> {
    // The alignment of `Entry` keeps the mark bits free.
    const MASK: usize = !(COPYING | CARRIED);
}

#[inline]
fn tombstone<K, V>() -> *mut Entry<K, V> {
    TOMBSTONE_ENTRY as _
}

// Reclaimer callback for a map entry.
unsafe fn reclaim_entry<K, V>(entry: *mut Entry<K, V>, _collector: &Collector) {
    // Safety: The entry is unreachable and was allocated with `Box::new`.
    drop(unsafe { Box::from_raw(entry) });
}

// The minimum table length.
const MIN_LENGTH: usize = 8;

// The maximum fraction of a table occupied before a resize is triggered.
const MAX_LOAD_FACTOR: f64 = 0.5;

// The number of slots a helper migrates per claim.
const CHUNK: usize = 64;

/// A lock-free, open-addressed hash table with cooperative incremental
/// resizing.
pub struct HashMap<K, V, S> {
    // The root table pointer.
    table: AtomicPtr<Table<K, V>>,

    // Collector for memory reclamation.
    collector: Collector,

    // The number of entries in the map.
    count: Counter,

    // Hasher for keys.
    hasher: S,
}

// Safety: The raw pointers in the table are owned entry and table
// allocations, moved and dropped only through the reclamation protocol.
unsafe impl<K, V, S> Send for HashMap<K, V, S>
where
    K: Send,
    V: Send,
    S: Send,
{
}

unsafe impl<K, V, S> Sync for HashMap<K, V, S>
where
    K: Send + Sync,
    V: Send + Sync,
    S: Sync,
{
}

// The result of an insert attempt in a single table.
enum InsertStatus<'a, K, V> {
    // A new entry was published.
    Inserted,
    // An existing entry for the key was replaced.
    Replaced(*mut Entry<K, V>),
    // The probe hit a fully migrated slot.
    Moved,
    // The probe hit a slot locked by the migrator, still holding `entry`.
    Migrated {
        entry: Option<*mut Entry<K, V>>,
        slot: &'a Slot<K, V>,
    },
    // No usable slot in this table.
    Full,
}

// The result of publishing an entry into a slot tagged with its hash.
enum PublishStatus<K, V> {
    Inserted,
    Replaced(*mut Entry<K, V>),
    // The slot is locked by the migrator, still holding `entry`.
    Migrated(Option<*mut Entry<K, V>>),
    // The slot's entry was erased.
    Erased,
}

// The result of reviving a tombstone slot.
enum ReuseStatus {
    Reused,
    // The slot was locked by the migrator before the entry was published.
    Migrated,
    // Another insert revived the slot first.
    Lost,
}

impl<K, V, S> HashMap<K, V, S> {
    /// Creates a table that can hold `capacity` entries without resizing.
    pub fn new(capacity: usize, hasher: S) -> HashMap<K, V, S> {
        // Entries occupy at most half of the slots.
        let len = usize::max(MIN_LENGTH, (capacity * 2).next_power_of_two());

        HashMap {
            table: AtomicPtr::new(Table::alloc(len, MAX_LOAD_FACTOR)),
            collector: Collector::new(),
            count: Counter::default(),
            hasher,
        }
    }

    /// Returns a guard for this map's collector.
    #[inline]
    pub fn guard(&self) -> LocalGuard<'_> {
        self.collector.enter()
    }

    /// Returns an owned guard for this map's collector.
    #[inline]
    pub fn owned_guard(&self) -> OwnedGuard<'_> {
        self.collector.enter_owned()
    }

    /// Returns the approximate number of entries in the map.
    #[inline]
    pub fn len(&self) -> usize {
        self.count.sum()
    }

    /// Returns the capacity, in slots, of the current root table.
    #[inline]
    pub fn capacity(&self, guard: &impl Guard) -> usize {
        self.verify(guard);
        self.root(guard).len()
    }

    // Verify that a guard is associated with this map's collector.
    #[inline]
    fn verify(&self, guard: &impl Guard) {
        assert_eq!(
            *guard.collector(),
            self.collector,
            "accessed map with a guard from a different collector"
        );
    }

    // Returns a reference to the root table.
    #[inline]
    fn root<'g>(&self, guard: &'g impl Guard) -> &'g Table<K, V> {
        let raw = guard.protect(&self.table, Ordering::Acquire);

        // Safety: The root table is retired only after it is unlinked, and
        // the load is protected by the guard.
        unsafe { Table::from_raw(raw) }
    }
}

impl<K, V, S> HashMap<K, V, S>
where
    K: Hash,
    S: BuildHasher,
{
    // Returns the tag for a key.
    //
    // Note that key identity in this map is the full 64-bit avalanched
    // hash; distinct keys that collide on it are indistinguishable.
    #[inline]
    fn hash<Q>(&self, key: &Q) -> u64
    where
        Q: Hash + ?Sized,
    {
        tag::from_hash(fmix64(self.hasher.hash_one(key)))
    }

    /// Returns a reference to the value for this key, if it exists.
    pub fn get<'g, Q>(&self, key: &Q, guard: &'g impl Guard) -> Option<&'g V>
    where
        K: Borrow<Q>,
        Q: Hash + ?Sized,
    {
        self.verify(guard);

        let hash = self.hash(key);
        let mut table = self.root(guard);
        let mut helped = false;

        'table: loop {
            let mut probe = Probe::start(hash, table.mask);

            while probe.len <= table.mask {
                let slot = table.slot(probe.i);
                let t = slot.tag.load(Ordering::Acquire);

                // The chain ends here; the key is not in the map.
                if t == tag::EMPTY {
                    return None;
                }

                if t == tag::MOVED {
                    // Push the migration along before following it.
                    if !helped {
                        self.help_migrate(table, guard);
                        helped = true;
                    }

                    table = table.next_table().unwrap();
                    continue 'table;
                }

                if t == hash {
                    let entry = guard.protect(&slot.entry, Ordering::Acquire).unpack();

                    // A marked entry is still live until its slot is
                    // `MOVED`.
                    if !entry.ptr.is_null() && entry.ptr != tombstone() {
                        // Safety: Entries are retired through the guard.
                        return Some(unsafe { &(*entry.ptr).value });
                    }

                    // Claimed but unpublished, or erased. A matching entry
                    // may still live further along the chain.
                }

                probe.next(table.mask);
            }

            // The probe span was exhausted without reaching the chain end,
            // so the key may have spilled into a successor.
            match table.next_table() {
                Some(next) => table = next,
                None => return None,
            }
        }
    }

    /// Inserts a key-value pair into the map, returning the previous value
    /// for this key if one was present.
    pub fn insert<'g>(&self, key: K, value: V, guard: &'g impl Guard) -> Option<&'g V> {
        self.verify(guard);

        let hash = self.hash(&key);
        let new = Box::into_raw(Box::new(Entry { key, value }));

        let mut table = self.root(guard);

        // An exhausted insert budget obligates us to help the resize before
        // claiming more space.
        if table.remaining.load(Ordering::Relaxed) <= 0 {
            table = self.help_migrate(table, guard);
        }

        loop {
            match self.insert_at(hash, new, table, guard) {
                InsertStatus::Inserted => {
                    self.count.get(guard).fetch_add(1, Ordering::Relaxed);
                    return None;
                }

                InsertStatus::Replaced(old) => {
                    // Safety: The entry is unreachable to new probes once
                    // the exchange succeeds; the guard waits out readers
                    // that already hold it.
                    unsafe { guard.defer_retire(old, reclaim_entry::<K, V>) };

                    return Some(unsafe { &(*old).value });
                }

                InsertStatus::Migrated { entry, slot } => {
                    let next = table.next_table().unwrap();

                    // Carry the displaced entry over and finish the slot,
                    // so probes stop consulting the old table, before
                    // retrying in the successor.
                    match entry {
                        Some(entry) => self.migrate_entry(entry, slot, next, guard),
                        None => slot.tag.store(tag::MOVED, Ordering::Release),
                    }

                    if next.remaining.load(Ordering::Relaxed) <= 0 {
                        self.help_migrate(next, guard);
                    }

                    table = next;
                }

                InsertStatus::Moved => {
                    self.help_migrate(table, guard);
                    table = table.next_table().unwrap();
                }

                InsertStatus::Full => {
                    table = self.help_migrate(table, guard);
                }
            }
        }
    }

    /// Removes the entry for this key, returning its value if one was
    /// present.
    pub fn remove<'g, Q>(&self, key: &Q, guard: &'g impl Guard) -> Option<&'g V>
    where
        K: Borrow<Q>,
        Q: Hash + ?Sized,
    {
        self.verify(guard);

        let hash = self.hash(key);
        let mut table = self.root(guard);
        let mut removed = None;
        let mut helped = false;

        'table: loop {
            let mut probe = Probe::start(hash, table.mask);

            while probe.len <= table.mask {
                let slot = table.slot(probe.i);
                let t = slot.tag.load(Ordering::Acquire);

                if t == tag::EMPTY {
                    break 'table;
                }

                if t == tag::MOVED {
                    if !helped {
                        self.help_migrate(table, guard);
                        helped = true;
                    }

                    table = table.next_table().unwrap();
                    continue 'table;
                }

                if t == hash {
                    let mut entry = guard.protect(&slot.entry, Ordering::Acquire).unpack();

                    loop {
                        if entry.tag() & COPYING != 0 {
                            // The slot is being migrated; finish it and
                            // take the erase to the successor.
                            let next = table.next_table().unwrap();

                            if !entry.ptr.is_null() && entry.ptr != tombstone() {
                                self.migrate_entry(entry.ptr, slot, next, guard);
                            } else {
                                slot.tag.store(tag::MOVED, Ordering::Release);
                            }

                            table = next;
                            continue 'table;
                        }

                        // In-flight insert or already erased; anything left
                        // to find lives further along the chain.
                        if entry.ptr.is_null() || entry.ptr == tombstone() {
                            break;
                        }

                        match slot.entry.compare_exchange(
                            entry.raw,
                            tombstone(),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => {
                                self.count.get(guard).fetch_sub(1, Ordering::Relaxed);

                                // The tag follows the sentinel. Losing this
                                // exchange means the migrator got to the
                                // slot first; it will find the tombstone.
                                let _ = slot.tag.compare_exchange(
                                    hash,
                                    tag::TOMBSTONE,
                                    Ordering::AcqRel,
                                    Ordering::Relaxed,
                                );

                                // Safety: The entry is unreachable to new
                                // probes once the exchange succeeds.
                                unsafe {
                                    guard.defer_retire(entry.ptr, reclaim_entry::<K, V>)
                                };

                                removed.get_or_insert(entry.ptr);
                                break;
                            }
                            Err(found) => entry = found.unpack(),
                        }
                    }
                }

                probe.next(table.mask);
            }

            // Exhausted the probe span; a matching entry can only be
            // further down the resize chain.
            match table.next_table() {
                Some(next) => table = next,
                None => break 'table,
            }
        }

        // Safety: Retirement is deferred past this guard.
        removed.map(|entry: *mut Entry<K, V>| unsafe { &(*entry).value })
    }

    // Attempt an insert within a single table.
    fn insert_at<'g>(
        &self,
        hash: u64,
        new: *mut Entry<K, V>,
        table: &'g Table<K, V>,
        guard: &'g impl Guard,
    ) -> InsertStatus<'g, K, V> {
        let mut tombstone_slot = None;
        let mut probe = Probe::start(hash, table.mask);

        while probe.len <= table.mask {
            let slot = table.slot(probe.i);
            let mut t = slot.tag.load(Ordering::Acquire);

            if t == tag::EMPTY {
                // The chain ends here, so the key is not present past this
                // point. Revive the earliest tombstone the probe passed, if
                // any; it does not consume insert budget.
                if let Some(ts) = tombstone_slot {
                    match self.reuse_at(ts, hash, new) {
                        ReuseStatus::Reused => return InsertStatus::Inserted,
                        ReuseStatus::Migrated => {
                            return InsertStatus::Migrated {
                                entry: None,
                                slot: ts,
                            }
                        }
                        ReuseStatus::Lost => {
                            // Another insert revived the slot; rescan.
                            tombstone_slot = None;
                            probe = Probe::start(hash, table.mask);
                            continue;
                        }
                    }
                }

                match slot.tag.compare_exchange(
                    tag::EMPTY,
                    hash,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        table.remaining.fetch_sub(1, Ordering::Relaxed);
                        t = hash;
                    }
                    // Another thread claimed the slot; re-evaluate it.
                    Err(found) => t = found,
                }
            }

            if t == tag::MOVED {
                return InsertStatus::Moved;
            }

            if t == hash {
                match self.publish_at(slot, new, guard) {
                    PublishStatus::Inserted => return InsertStatus::Inserted,
                    PublishStatus::Replaced(old) => return InsertStatus::Replaced(old),
                    PublishStatus::Migrated(entry) => {
                        return InsertStatus::Migrated { entry, slot }
                    }
                    // Erased; the key may still live further along the
                    // chain.
                    PublishStatus::Erased => {}
                }
            } else if t == tag::TOMBSTONE && tombstone_slot.is_none() {
                tombstone_slot = Some(slot);
            }

            probe.next(table.mask);
        }

        InsertStatus::Full
    }

    // Publish `new` into a slot tagged with its hash, replacing the current
    // entry if one is present.
    fn publish_at(
        &self,
        slot: &Slot<K, V>,
        new: *mut Entry<K, V>,
        guard: &impl Guard,
    ) -> PublishStatus<K, V> {
        let mut entry = guard.protect(&slot.entry, Ordering::Acquire).unpack();

        loop {
            if entry.tag() & COPYING != 0 {
                let displaced =
                    (!entry.ptr.is_null() && entry.ptr != tombstone()).then_some(entry.ptr);

                return PublishStatus::Migrated(displaced);
            }

            if entry.ptr == tombstone() {
                return PublishStatus::Erased;
            }

            match slot
                .entry
                .compare_exchange(entry.raw, new, Ordering::AcqRel, Ordering::Acquire)
            {
                // Completed an insert: ours, or one the slot's claimant
                // never finished.
                Ok(_) if entry.ptr.is_null() => return PublishStatus::Inserted,
                Ok(_) => return PublishStatus::Replaced(entry.ptr),
                Err(found) => entry = found.unpack(),
            }
        }
    }

    // Revive an erased slot for a new entry. Only attempted once the probe
    // has confirmed the key is absent from the rest of the chain.
    fn reuse_at(&self, slot: &Slot<K, V>, hash: u64, new: *mut Entry<K, V>) -> ReuseStatus {
        if slot
            .tag
            .compare_exchange(tag::TOMBSTONE, hash, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return ReuseStatus::Lost;
        }

        // The claim succeeded, so the slot still holds the tombstone
        // sentinel unless the migrator marked it in the meantime.
        match slot
            .entry
            .compare_exchange(tombstone(), new, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => ReuseStatus::Reused,
            Err(_) => ReuseStatus::Migrated,
        }
    }

    // Locate the successor of `table`, allocating it if the resize has not
    // started yet. Exactly one allocation wins; losers discard theirs and
    // adopt the winner's.
    #[cold]
    fn get_or_alloc_next<'a>(&self, table: &'a Table<K, V>) -> &'a Table<K, V> {
        if let Some(next) = table.next_table() {
            return next;
        }

        let next = Table::alloc(table.len() << 1, MAX_LOAD_FACTOR);

        match table.state.next.compare_exchange(
            ptr::null_mut(),
            next,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            // Safety: We just allocated the table, or lost the race to a
            // published successor that outlives `table`.
            Ok(_) => unsafe { Table::from_raw(next) },
            Err(found) => {
                unsafe { Table::dealloc(next) };
                unsafe { Table::from_raw(found) }
            }
        }
    }

    // Help drain `table` into its successor, migrating one chunk of slots.
    //
    // Returns the root table after helping, which may have advanced.
    #[cold]
    fn help_migrate<'g>(&self, table: &Table<K, V>, guard: &'g impl Guard) -> &'g Table<K, V> {
        // A retired table is fully drained; there is nothing to help with.
        if table.state.status.load(Ordering::Acquire) == State::RETIRED {
            return self.root(guard);
        }

        let next = self.get_or_alloc_next(table);

        let _ = table.state.status.compare_exchange(
            State::LIVE,
            State::DRAINING,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );

        let len = table.len();
        let start = table.state.claim.fetch_add(CHUNK, Ordering::Relaxed);

        if start < len {
            let end = usize::min(start + CHUNK, len);

            for i in start..end {
                self.migrate_at(table, next, i, guard);
            }

            let copied =
                table.state.copied.fetch_add(end - start, Ordering::AcqRel) + (end - start);
            debug_assert!(copied <= len);

            if copied == len {
                self.try_promote(table, next, guard);
            }
        } else if table.state.copied.load(Ordering::Acquire) == len {
            // Nothing left to claim; finish a promotion that a straggler
            // may have left behind.
            self.try_promote(table, next, guard);
        }

        self.root(guard)
    }

    // Migrate the slot at index `i` of `table` into its successor.
    //
    // Slot indices are claimed exclusively in chunks, so each slot is
    // migrated by one helper; when this returns, its entry, if it was live,
    // is reachable in the successor.
    fn migrate_at(&self, table: &Table<K, V>, next: &Table<K, V>, i: usize, guard: &impl Guard) {
        let slot = table.slot(i);

        // Lock out writers. After the mark the slot's entry can no longer
        // change, so it is safe to carry into the successor.
        let found = slot.entry.fetch_or(COPYING, Ordering::AcqRel).unpack();

        // `migrate_entry` finishes the slot once the entry is installed.
        if !found.ptr.is_null() && found.ptr != tombstone() {
            self.migrate_entry(found.ptr, slot, next, guard);
            return;
        }

        slot.tag.store(tag::MOVED, Ordering::Release);
    }

    // Carry an entry displaced from `src` into the successor chain and
    // finish the slot.
    //
    // Racing helpers elect a single carrier by tagging the frozen entry
    // word; only the carrier installs the entry, so it is published into
    // the chain exactly once. Losers wait for the carrier's `MOVED` store,
    // so on return the slot is finished and the entry, unless superseded
    // by a newer write in the successor, is reachable there.
    fn migrate_entry<'g>(
        &self,
        entry: *mut Entry<K, V>,
        src: &Slot<K, V>,
        dst: &'g Table<K, V>,
        guard: &'g impl Guard,
    ) {
        let copying = entry.map_addr(|addr| addr | COPYING);
        let carried = entry.map_addr(|addr| addr | COPYING | CARRIED);

        if src
            .entry
            .compare_exchange(copying, carried, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Another helper owns the carry and has only a bounded install
            // left before it finishes the slot.
            while src.tag.load(Ordering::Acquire) != tag::MOVED {
                hint::spin_loop();
            }

            return;
        }

        let installed = self.insert_copy(entry, dst);

        // The entry is reachable in the successor, or dead; finish the
        // slot so probes stop consulting it.
        src.tag.store(tag::MOVED, Ordering::Release);

        // A newer write for the key reached the successor first. The copy
        // is unreachable once the slot is `MOVED`.
        if !installed {
            // Safety: We own the carry, so the entry is retired exactly
            // once; the guard waits out readers that still hold it.
            unsafe { guard.defer_retire(entry, reclaim_entry::<K, V>) };
        }
    }

    // Install a carried entry into `dst`, or deeper down the resize chain
    // if `dst` is itself draining. Only unclaimed slots are published to.
    //
    // Returns `false` if the key was already written to the chain,
    // superseding the carried entry.
    fn insert_copy(&self, entry: *mut Entry<K, V>, mut dst: &Table<K, V>) -> bool {
        // Safety: The entry was live when its slot was frozen, and the
        // sole carrier keeps it reachable until the slot is `MOVED`.
        let hash = self.hash(unsafe { &(*entry).key });

        'dst: loop {
            let mut probe = Probe::start(hash, dst.mask);

            while probe.len <= dst.mask {
                let slot = dst.slot(probe.i);
                let mut t = slot.tag.load(Ordering::Acquire);

                if t == tag::EMPTY {
                    match slot.tag.compare_exchange(
                        tag::EMPTY,
                        hash,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            dst.remaining.fetch_sub(1, Ordering::Relaxed);
                            t = hash;
                        }
                        Err(found) => t = found,
                    }
                }

                if t == tag::MOVED {
                    dst = dst.next_table().unwrap();
                    continue 'dst;
                }

                if t == hash {
                    match slot.entry.compare_exchange(
                        ptr::null_mut(),
                        entry,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return true,
                        Err(found) => {
                            // Our claim was overtaken by a deeper
                            // migration.
                            if found.unpack().ptr.is_null() {
                                dst = dst.next_table().unwrap();
                                continue 'dst;
                            }

                            // A newer write for the key got here first.
                            return false;
                        }
                    }
                }

                probe.next(dst.mask);
            }

            dst = match dst.next_table() {
                Some(next) => next,
                None => self.get_or_alloc_next(dst),
            };
        }
    }

    // Swap the root from `table` to its fully migrated successor and
    // retire `table`.
    fn try_promote(&self, table: &Table<K, V>, next: &Table<K, V>, guard: &impl Guard) {
        let raw = table as *const Table<K, V> as *mut Table<K, V>;
        let new = next as *const Table<K, V> as *mut Table<K, V>;

        if self
            .table
            .compare_exchange(raw, new, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            table.state.status.store(State::RETIRED, Ordering::Release);

            // Safety: The table is unlinked from the root, so it is
            // unreachable to new guards; the collector waits out existing
            // ones.
            unsafe { guard.defer_retire(raw, Table::reclaim) };
        }
    }
}

impl<K, V, S> Drop for HashMap<K, V, S> {
    fn drop(&mut self) {
        let mut raw = *self.table.get_mut();

        // Drop every table in the resize chain, along with the entries it
        // still owns. Marked entries are owned by a successor table, or
        // were already retired through the collector.
        while !raw.is_null() {
            // Safety: This thread has exclusive access to the map, and the
            // chain is only deallocated here.
            let table = unsafe { Table::from_raw(raw) };

            for i in 0..table.len() {
                let entry = table.slot(i).entry.load(Ordering::Relaxed).unpack();

                if entry.tag() & COPYING != 0 {
                    continue;
                }

                if entry.ptr.is_null() || entry.ptr == tombstone() {
                    continue;
                }

                // Safety: The entry is live and owned by this table.
                drop(unsafe { Box::from_raw(entry.ptr) });
            }

            let next = table.state.next.load(Ordering::Relaxed);
            unsafe { Table::dealloc(raw) };
            raw = next;
        }
    }
}
