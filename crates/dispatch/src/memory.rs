//! Single process store. Every stand owns a mutex protected waiting line
//! ordered by `(joined_at, entry id)`; claims made inside a transaction stay
//! reserved until commit and are put back into their old position on
//! rollback.

use std::{
    collections::{BTreeMap, HashMap},
    mem,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard,
        RwLockWriteGuard,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{
    driver::Driver,
    queue::{QueueEntry, QueuePosition, QueueStatus},
    ride::{Ride, RideStatus},
    stand::Stand,
    user::User,
    Page, WithId,
};
use tokio::sync::Notify;
use utility::id::{HasId, Id};

use crate::database::{
    AtomicClaimableStore, Database, DatabaseAutocommit, DatabaseError,
    DatabaseTransaction, DriverRepo, Inserted, RideRepo, StandRepo, UserRepo,
};

type Result<T> = crate::database::Result<T>;

// Critical sections below never panic half way, so a poisoned lock still
// guards consistent data.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

struct Sequence(AtomicI64);

impl Default for Sequence {
    fn default() -> Self {
        Self(AtomicI64::new(1))
    }
}

impl Sequence {
    fn next<T: HasId<IdType = i64>>(&self) -> Id<T> {
        Id::new(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

// registry tables

#[derive(Default)]
struct Tables {
    stands: BTreeMap<i64, Stand>,
    drivers: BTreeMap<i64, Driver>,
    users: BTreeMap<i64, User>,
    rides: BTreeMap<i64, Ride>,
}

impl Tables {
    fn apply(&mut self, overlay: Tables) {
        self.stands.extend(overlay.stands);
        self.drivers.extend(overlay.drivers);
        self.users.extend(overlay.users);
        self.rides.extend(overlay.rides);
    }
}

trait Record: HasId<IdType = i64> + Clone + Send + Sync {
    fn table(tables: &Tables) -> &BTreeMap<i64, Self>;
    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<i64, Self>;
}

macro_rules! record {
    ($model:ty, $field:ident) => {
        impl Record for $model {
            fn table(tables: &Tables) -> &BTreeMap<i64, Self> {
                &tables.$field
            }

            fn table_mut(tables: &mut Tables) -> &mut BTreeMap<i64, Self> {
                &mut tables.$field
            }
        }
    };
}

/// A ride as a transaction first read it. The stored ride must still match
/// when the transaction's write of it becomes visible.
struct RideGuard {
    id: Id<Ride>,
    status: RideStatus,
    driver_id: Option<Id<Driver>>,
}

impl RideGuard {
    fn of(id: &Id<Ride>, seen: &Ride) -> Self {
        Self {
            id: id.clone(),
            status: seen.status,
            driver_id: seen.driver_id.clone(),
        }
    }

    fn check(&self, tables: &Tables) -> Result<()> {
        match tables.rides.get(&self.id.raw()) {
            Some(ride) if ride.status != self.status || ride.driver_id != self.driver_id => {
                Err(DatabaseError::Conflict(format!(
                    "ride {} was changed concurrently and is now {}",
                    self.id, ride.status
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Fails if a written ride would put its driver on a second active ride.
fn check_drivers(tables: &Tables, written: &BTreeMap<i64, Ride>) -> Result<()> {
    for (id, ride) in written {
        let Some(driver) = ride.active_driver() else {
            continue;
        };
        let clash = tables
            .rides
            .iter()
            .filter(|&(other, _)| !written.contains_key(other))
            .chain(written.iter())
            .find(|&(other, other_ride)| {
                other != id && other_ride.active_driver() == Some(driver)
            });
        if let Some((other, _)) = clash {
            return Err(DatabaseError::Conflict(format!(
                "driver {} is already on ride {}",
                driver, other
            )));
        }
    }
    Ok(())
}

record!(Stand, stands);
record!(Driver, drivers);
record!(User, users);
record!(Ride, rides);

// waiting lines

struct Slot {
    entry: WithId<QueueEntry>,
    reserved_by: Option<u64>,
}

#[derive(Default)]
struct LineState {
    waiting: BTreeMap<QueuePosition, Slot>,
    closed: BTreeMap<i64, WithId<QueueEntry>>,
    /// Bumped whenever a reservation is resolved.
    generation: u64,
}

impl LineState {
    fn close<F>(&mut self, position: &QueuePosition, f: F) -> Option<WithId<QueueEntry>>
    where
        F: FnOnce(&mut QueueEntry),
    {
        let mut entry = self.waiting.remove(position)?.entry;
        f(&mut entry.content);
        self.closed.insert(entry.id.raw(), entry.clone());
        self.generation += 1;
        Some(entry)
    }
}

#[derive(Default)]
struct StandLine {
    state: Mutex<LineState>,
    released: Notify,
}

fn assigned(at: DateTime<Utc>) -> impl FnOnce(&mut QueueEntry) {
    move |entry| {
        entry.status = QueueStatus::Assigned;
        entry.assigned_at = Some(at);
    }
}

enum LeaveAttempt {
    Done(Option<WithId<QueueEntry>>),
    Contended {
        line: Arc<StandLine>,
        generation: u64,
    },
}

#[derive(Clone)]
struct Reservation {
    stand: Id<Stand>,
    position: QueuePosition,
    assigned_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryQueue {
    sequence: Sequence,
    lines: RwLock<HashMap<Id<Stand>, Arc<StandLine>>>,
    locations: RwLock<HashMap<Id<QueueEntry>, (Id<Stand>, QueuePosition)>>,
    /// Last known waiting entry per driver. Claims do not touch this index, so
    /// an entry found here may already be closed and is then treated as absent.
    waiting_by_driver: Mutex<HashMap<Id<Driver>, (Id<Stand>, QueuePosition)>>,
}

impl MemoryQueue {
    fn existing_line(&self, stand: &Id<Stand>) -> Option<Arc<StandLine>> {
        read(&self.lines).get(stand).cloned()
    }

    fn line(&self, stand: &Id<Stand>) -> Arc<StandLine> {
        if let Some(line) = self.existing_line(stand) {
            return line;
        }
        write(&self.lines).entry(stand.clone()).or_default().clone()
    }

    fn insert(
        &self,
        stand: &Id<Stand>,
        driver: &Id<Driver>,
        joined_at: DateTime<Utc>,
    ) -> Inserted<WithId<QueueEntry>> {
        let mut index = lock(&self.waiting_by_driver);

        if let Some((current_stand, position)) = index.get(driver).cloned() {
            let line = self.line(&current_stand);
            let state = lock(&line.state);
            if let Some(slot) = state.waiting.get(&position) {
                return Inserted::Existing(slot.entry.clone());
            }
        }

        let entry = WithId::new(
            self.sequence.next(),
            QueueEntry::waiting(stand.clone(), driver.clone(), joined_at),
        );
        let position = QueuePosition::of(&entry);
        let line = self.line(stand);
        lock(&line.state).waiting.insert(
            position,
            Slot {
                entry: entry.clone(),
                reserved_by: None,
            },
        );
        write(&self.locations).insert(entry.id.clone(), (stand.clone(), position));
        index.insert(driver.clone(), (stand.clone(), position));

        Inserted::Created(entry)
    }

    /// Claims and closes the oldest unreserved entry right away.
    fn claim_now(
        &self,
        stand: &Id<Stand>,
        at: DateTime<Utc>,
    ) -> Option<WithId<QueueEntry>> {
        let line = self.existing_line(stand)?;
        let mut state = lock(&line.state);
        let position = state
            .waiting
            .iter()
            .find(|(_, slot)| slot.reserved_by.is_none())
            .map(|(position, _)| *position)?;
        state.close(&position, assigned(at))
    }

    /// Reserves the oldest unreserved entry for the transaction `token`.
    fn reserve(
        &self,
        stand: &Id<Stand>,
        token: u64,
        at: DateTime<Utc>,
    ) -> Option<WithId<QueueEntry>> {
        let line = self.existing_line(stand)?;
        let mut state = lock(&line.state);
        let slot = state
            .waiting
            .values_mut()
            .find(|slot| slot.reserved_by.is_none())?;
        slot.reserved_by = Some(token);
        let mut entry = slot.entry.clone();
        assigned(at)(&mut entry.content);
        Some(entry)
    }

    fn finalize(&self, reservation: &Reservation, token: u64) {
        let Some(line) = self.existing_line(&reservation.stand) else {
            return;
        };
        {
            let mut state = lock(&line.state);
            let reserved = state
                .waiting
                .get(&reservation.position)
                .is_some_and(|slot| slot.reserved_by == Some(token));
            if reserved {
                state.close(&reservation.position, assigned(reservation.assigned_at));
            }
        }
        line.released.notify_waiters();
    }

    fn release(&self, reservation: &Reservation, token: u64) {
        let Some(line) = self.existing_line(&reservation.stand) else {
            return;
        };
        {
            let mut state = lock(&line.state);
            if let Some(slot) = state.waiting.get_mut(&reservation.position) {
                if slot.reserved_by == Some(token) {
                    slot.reserved_by = None;
                }
            }
            state.generation += 1;
        }
        line.released.notify_waiters();
    }

    fn try_leave(&self, driver: &Id<Driver>) -> LeaveAttempt {
        let mut index = lock(&self.waiting_by_driver);
        let Some((stand, position)) = index.get(driver).cloned() else {
            return LeaveAttempt::Done(None);
        };
        let line = self.line(&stand);
        let mut state = lock(&line.state);

        match state.waiting.get(&position).map(|slot| slot.reserved_by.is_some()) {
            None => {
                index.remove(driver);
                LeaveAttempt::Done(None)
            }
            Some(true) => {
                let generation = state.generation;
                drop(state);
                LeaveAttempt::Contended { line, generation }
            }
            Some(false) => {
                let left =
                    state.close(&position, |entry| entry.status = QueueStatus::Left);
                index.remove(driver);
                LeaveAttempt::Done(left)
            }
        }
    }

    /// A driver whose entry is being claimed right now waits for that claim
    /// to commit or roll back.
    async fn leave(&self, driver: &Id<Driver>) -> Option<WithId<QueueEntry>> {
        loop {
            let (line, generation) = match self.try_leave(driver) {
                LeaveAttempt::Done(left) => return left,
                LeaveAttempt::Contended { line, generation } => (line, generation),
            };
            let released = line.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            let unchanged = lock(&line.state).generation == generation;
            if unchanged {
                released.await;
            }
        }
    }

    /// Reserved entries still count as waiting.
    fn waiting_of(&self, driver: &Id<Driver>) -> Option<WithId<QueueEntry>> {
        let index = lock(&self.waiting_by_driver);
        let (stand, position) = index.get(driver)?;
        let line = self.existing_line(stand)?;
        let state = lock(&line.state);
        state.waiting.get(position).map(|slot| slot.entry.clone())
    }

    fn list_waiting(&self, stand: &Id<Stand>) -> Vec<WithId<QueueEntry>> {
        match self.existing_line(stand) {
            Some(line) => lock(&line.state)
                .waiting
                .values()
                .map(|slot| slot.entry.clone())
                .collect(),
            None => vec![],
        }
    }

    fn get(&self, id: &Id<QueueEntry>) -> Option<WithId<QueueEntry>> {
        let (stand, position) = read(&self.locations).get(id).cloned()?;
        let line = self.existing_line(&stand)?;
        let state = lock(&line.state);
        state
            .waiting
            .get(&position)
            .map(|slot| slot.entry.clone())
            .or_else(|| state.closed.get(&id.raw()).cloned())
    }
}

// store

#[derive(Default)]
struct Shared {
    tables: RwLock<Tables>,
    queue: MemoryQueue,
    stand_ids: Sequence,
    driver_ids: Sequence,
    user_ids: Sequence,
    ride_ids: Sequence,
    transactions: AtomicU64,
}

/// In-memory [`Database`]. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    type Transaction = MemorySession;
    type Autocommit = MemorySession;

    async fn transaction(&self) -> Result<Self::Transaction> {
        let token = self.shared.transactions.fetch_add(1, Ordering::Relaxed);
        Ok(MemorySession {
            shared: self.shared.clone(),
            mode: Mode::Transaction(Pending {
                token,
                overlay: Tables::default(),
                reservations: vec![],
                ride_guards: vec![],
            }),
        })
    }

    fn auto(&self) -> Self::Autocommit {
        MemorySession {
            shared: self.shared.clone(),
            mode: Mode::Autocommit,
        }
    }
}

struct Pending {
    token: u64,
    overlay: Tables,
    reservations: Vec<Reservation>,
    /// One per ride written in this transaction that existed before it.
    ride_guards: Vec<RideGuard>,
}

enum Mode {
    Autocommit,
    Transaction(Pending),
}

/// A session on a [`MemoryDatabase`], either autocommitting every operation
/// or collecting them until [`DatabaseTransaction::commit`].
///
/// Registry writes and claims are transactional. Queue inserts and leaves are
/// applied immediately in both modes.
pub struct MemorySession {
    shared: Arc<Shared>,
    mode: Mode,
}

impl MemorySession {
    fn get<R: Record>(&self, id: &Id<R>) -> Result<WithId<R>> {
        if let Mode::Transaction(pending) = &self.mode {
            if let Some(record) = R::table(&pending.overlay).get(&id.raw()) {
                return Ok(WithId::new(id.clone(), record.clone()));
            }
        }
        R::table(&read(&self.shared.tables))
            .get(&id.raw())
            .cloned()
            .map(|record| WithId::new(id.clone(), record))
            .ok_or(DatabaseError::NotFound)
    }

    fn exists<R: Record>(&self, id: &Id<R>) -> Result<bool> {
        match self.get(id) {
            Ok(_) => Ok(true),
            Err(DatabaseError::NotFound) => Ok(false),
            Err(why) => Err(why),
        }
    }

    fn merged<R: Record>(&self) -> BTreeMap<i64, R> {
        let mut merged = R::table(&read(&self.shared.tables)).clone();
        if let Mode::Transaction(pending) = &self.mode {
            merged.extend(
                R::table(&pending.overlay)
                    .iter()
                    .map(|(id, record)| (*id, record.clone())),
            );
        }
        merged
    }

    fn list<R: Record>(&self, page: Page) -> Result<Vec<WithId<R>>> {
        Ok(self
            .merged::<R>()
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .map(|(id, record)| WithId::new(Id::new(id), record))
            .collect())
    }

    fn put<R: Record>(&mut self, id: Id<R>, record: R) -> Result<WithId<R>> {
        match &mut self.mode {
            Mode::Autocommit => {
                R::table_mut(&mut write(&self.shared.tables))
                    .insert(id.raw(), record.clone());
            }
            Mode::Transaction(pending) => {
                R::table_mut(&mut pending.overlay).insert(id.raw(), record.clone());
            }
        }
        Ok(WithId::new(id, record))
    }

    fn update<R: Record>(&mut self, record: WithId<R>) -> Result<WithId<R>> {
        self.get(&record.id)?;
        self.put(record.id, record.content)
    }

    /// Writes a ride that was read as `seen`. Autocommit checks it against the
    /// stored ride right away, a transaction checks again on commit.
    fn put_ride(&mut self, seen: &Ride, ride: WithId<Ride>) -> Result<WithId<Ride>> {
        let guard = RideGuard::of(&ride.id, seen);
        match &mut self.mode {
            Mode::Autocommit => {
                let mut tables = write(&self.shared.tables);
                guard.check(&tables)?;
                let written = BTreeMap::from([(ride.id.raw(), ride.content.clone())]);
                check_drivers(&tables, &written)?;
                tables.rides.extend(written);
            }
            Mode::Transaction(pending) => {
                // a ride already in the overlay was read from it
                if !pending.overlay.rides.contains_key(&ride.id.raw()) {
                    guard.check(&read(&self.shared.tables))?;
                    pending.ride_guards.push(guard);
                }
                pending
                    .overlay
                    .rides
                    .insert(ride.id.raw(), ride.content.clone());
            }
        }
        Ok(ride)
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if let Mode::Transaction(pending) = &self.mode {
            for reservation in pending.reservations.iter() {
                self.shared.queue.release(reservation, pending.token);
            }
        }
    }
}

#[async_trait]
impl DatabaseTransaction for MemorySession {
    async fn commit(mut self) -> Result<()> {
        let Mode::Transaction(pending) = mem::replace(&mut self.mode, Mode::Autocommit)
        else {
            return Ok(());
        };
        // the table lock is held while claims are finalized, so readers see
        // assignments and ride changes together.
        let mut tables = write(&self.shared.tables);
        let verdict = pending
            .ride_guards
            .iter()
            .try_for_each(|guard| guard.check(&tables))
            .and_then(|()| check_drivers(&tables, &pending.overlay.rides));
        if let Err(why) = verdict {
            drop(tables);
            for reservation in pending.reservations.iter() {
                self.shared.queue.release(reservation, pending.token);
            }
            return Err(why);
        }
        for reservation in pending.reservations.iter() {
            self.shared.queue.finalize(reservation, pending.token);
        }
        tables.apply(pending.overlay);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        drop(self);
        Ok(())
    }
}

impl DatabaseAutocommit for MemorySession {}

#[async_trait]
impl StandRepo for MemorySession {
    async fn stand_exists(&mut self, id: &Id<Stand>) -> Result<bool> {
        self.exists(id)
    }

    async fn get_stand(&mut self, id: &Id<Stand>) -> Result<WithId<Stand>> {
        self.get(id)
    }

    async fn get_stands(&mut self, page: Page) -> Result<Vec<WithId<Stand>>> {
        self.list(page)
    }

    async fn insert_stand(&mut self, stand: Stand) -> Result<WithId<Stand>> {
        let id = self.shared.stand_ids.next();
        self.put(id, stand)
    }

    async fn update_stand(&mut self, stand: WithId<Stand>) -> Result<WithId<Stand>> {
        self.update(stand)
    }
}

#[async_trait]
impl DriverRepo for MemorySession {
    async fn driver_exists(&mut self, id: &Id<Driver>) -> Result<bool> {
        self.exists(id)
    }

    async fn driver_stand(&mut self, id: &Id<Driver>) -> Result<Option<Id<Stand>>> {
        self.get(id).map(|driver| driver.content.stand_id)
    }

    async fn get_driver(&mut self, id: &Id<Driver>) -> Result<WithId<Driver>> {
        self.get(id)
    }

    async fn get_drivers(&mut self, page: Page) -> Result<Vec<WithId<Driver>>> {
        self.list(page)
    }

    async fn insert_driver(&mut self, driver: Driver) -> Result<WithId<Driver>> {
        let id = self.shared.driver_ids.next();
        self.put(id, driver)
    }

    async fn update_driver(
        &mut self,
        driver: WithId<Driver>,
    ) -> Result<WithId<Driver>> {
        self.update(driver)
    }

    async fn set_driver_availability(
        &mut self,
        id: &Id<Driver>,
        available: bool,
    ) -> Result<WithId<Driver>> {
        let mut driver = self.get(id)?;
        driver.content.is_available = available;
        self.put(driver.id, driver.content)
    }
}

#[async_trait]
impl UserRepo for MemorySession {
    async fn user_exists(&mut self, id: &Id<User>) -> Result<bool> {
        self.exists(id)
    }

    async fn get_user(&mut self, id: &Id<User>) -> Result<WithId<User>> {
        self.get(id)
    }

    async fn insert_user(&mut self, user: User) -> Result<WithId<User>> {
        let id = self.shared.user_ids.next();
        self.put(id, user)
    }
}

#[async_trait]
impl RideRepo for MemorySession {
    async fn get_ride(&mut self, id: &Id<Ride>) -> Result<WithId<Ride>> {
        self.get(id)
    }

    async fn get_rides(&mut self, page: Page) -> Result<Vec<WithId<Ride>>> {
        self.list(page)
    }

    async fn insert_ride(&mut self, ride: Ride) -> Result<WithId<Ride>> {
        let id = self.shared.ride_ids.next();
        self.put(id, ride)
    }

    async fn update_ride(
        &mut self,
        seen: &Ride,
        ride: WithId<Ride>,
    ) -> Result<WithId<Ride>> {
        self.get(&ride.id)?;
        self.put_ride(seen, ride)
    }

    async fn assign_ride(
        &mut self,
        id: &Id<Ride>,
        driver: &Id<Driver>,
    ) -> Result<WithId<Ride>> {
        let ride = self.get(id)?;
        if ride.content.status != RideStatus::Pending {
            return Err(DatabaseError::Conflict(format!(
                "ride {} is {}, not pending",
                id, ride.content.status
            )));
        }
        let assigned = Ride {
            driver_id: Some(driver.clone()),
            status: RideStatus::Accepted,
            ..ride.content.clone()
        };
        self.put_ride(&ride.content, WithId::new(ride.id, assigned))
    }

    async fn active_rides_of(
        &mut self,
        driver: &Id<Driver>,
    ) -> Result<Vec<WithId<Ride>>> {
        Ok(self
            .merged::<Ride>()
            .into_iter()
            .filter(|(_, ride)| ride.active_driver() == Some(driver))
            .map(|(id, ride)| WithId::new(Id::new(id), ride))
            .collect())
    }
}

#[async_trait]
impl AtomicClaimableStore for MemorySession {
    async fn insert_queue_entry(
        &mut self,
        stand: &Id<Stand>,
        driver: &Id<Driver>,
        joined_at: DateTime<Utc>,
    ) -> Result<Inserted<WithId<QueueEntry>>> {
        Ok(self.shared.queue.insert(stand, driver, joined_at))
    }

    async fn claim_oldest(
        &mut self,
        stand: &Id<Stand>,
        assigned_at: DateTime<Utc>,
    ) -> Result<Option<WithId<QueueEntry>>> {
        match &mut self.mode {
            Mode::Autocommit => Ok(self.shared.queue.claim_now(stand, assigned_at)),
            Mode::Transaction(pending) => {
                let claimed =
                    self.shared.queue.reserve(stand, pending.token, assigned_at);
                if let Some(entry) = &claimed {
                    pending.reservations.push(Reservation {
                        stand: stand.clone(),
                        position: QueuePosition::of(entry),
                        assigned_at,
                    });
                }
                Ok(claimed)
            }
        }
    }

    async fn mark_left(
        &mut self,
        driver: &Id<Driver>,
    ) -> Result<Option<WithId<QueueEntry>>> {
        Ok(self.shared.queue.leave(driver).await)
    }

    async fn list_waiting(
        &mut self,
        stand: &Id<Stand>,
    ) -> Result<Vec<WithId<QueueEntry>>> {
        Ok(self.shared.queue.list_waiting(stand))
    }

    async fn waiting_entry_of(
        &mut self,
        driver: &Id<Driver>,
    ) -> Result<Option<WithId<QueueEntry>>> {
        Ok(self.shared.queue.waiting_of(driver))
    }

    async fn get_queue_entry(
        &mut self,
        id: &Id<QueueEntry>,
    ) -> Result<WithId<QueueEntry>> {
        self.shared.queue.get(id).ok_or(DatabaseError::NotFound)
    }
}


#[cfg(test)]
mod conformance_suite {
    use super::MemoryDatabase;

    async fn memory() -> Option<MemoryDatabase> {
        let _ = env_logger::builder().is_test(true).try_init();
        Some(MemoryDatabase::new())
    }

    crate::conformance_tests!(memory());
}
