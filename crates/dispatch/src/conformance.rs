//! Behaviour every [`Database`] implementation has to show.
//!
//! Each check sets up its own stand, drivers and users, so the checks can run
//! concurrently against one shared store. Use [`conformance_tests!`] to turn
//! them into test functions:
//!
//! ```ignore
//! dispatch::conformance_tests!(async { Some(MemoryDatabase::new()) });
//! ```
//!
//! The expression is evaluated once per test and may yield `None` to skip.

use std::{
    collections::BTreeSet,
    sync::atomic::{AtomicUsize, Ordering},
};

use chrono::Utc;
use futures::future;
use model::{
    driver::{Driver, NewDriver},
    queue::{QueueEntry, QueueStatus},
    ride::{NewRide, Ride, RideStatus},
    stand::Stand,
    user::{NewUser, User},
    WithId,
};
use utility::id::Id;

use crate::{
    database::{
        AtomicClaimableStore, Database, DatabaseError, DatabaseTransaction, RideRepo,
    },
    server::Server,
    DispatchError,
};

#[macro_export]
macro_rules! conformance_tests {
    ($connect:expr) => {
        $crate::conformance_tests!(
            @checks $connect,
            claims_follow_join_order,
            join_is_idempotent,
            leave_without_entry_reports_not_queued,
            join_then_leave_is_net_zero,
            concurrent_claims_are_disjoint,
            concurrent_rides_take_distinct_drivers,
            claims_skip_entries_held_by_open_transactions,
            rides_take_drivers_in_join_order,
            updates_from_stale_reads_conflict,
            drivers_hold_one_active_ride
        );
    };
    (@checks $connect:expr, $($check:ident),* $(,)?) => {
        $(
            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn $check() {
                if let Some(database) = $connect.await {
                    $crate::conformance::$check(database).await;
                }
            }
        )*
    };
}

static SCENES: AtomicUsize = AtomicUsize::new(0);

struct Scene<D>
where
    D: Database,
{
    server: Server<D>,
    stand: Id<Stand>,
}

impl<D> Scene<D>
where
    D: Database,
{
    async fn new(database: D) -> Self {
        let server = Server::new(database);
        let number = SCENES.fetch_add(1, Ordering::Relaxed);
        let stand = server
            .registry()
            .create_stand(Stand {
                name: format!("conformance stand {}", number),
                location: format!("bay {}", number),
            })
            .await
            .unwrap()
            .id;
        Self { server, stand }
    }

    async fn driver(&self) -> Id<Driver> {
        self.server
            .registry()
            .create_driver(NewDriver {
                name: "conformance driver".to_owned(),
                phone: "0".to_owned(),
                stand_id: Some(self.stand.clone()),
            })
            .await
            .unwrap()
            .id
    }

    async fn queued_drivers(&self, count: usize) -> Vec<Id<Driver>> {
        let mut drivers = vec![];
        for _ in 0..count {
            let driver = self.driver().await;
            self.server.queue().join(&self.stand, &driver).await.unwrap();
            drivers.push(driver);
        }
        drivers
    }

    async fn user(&self) -> Id<User> {
        self.server
            .registry()
            .create_user(NewUser {
                name: "conformance rider".to_owned(),
                email: "rider@example.org".to_owned(),
            })
            .await
            .unwrap()
            .id
    }

    fn ride(&self, user: &Id<User>) -> NewRide {
        NewRide {
            user_id: user.clone(),
            start_location: "here".to_owned(),
            end_location: "there".to_owned(),
            stand_id: Some(self.stand.clone()),
        }
    }

    /// A ride requested without a stand, so it stays pending.
    async fn pending_ride(&self, user: &Id<User>) -> WithId<Ride> {
        self.server
            .dispatcher()
            .create_ride(NewRide {
                stand_id: None,
                ..self.ride(user)
            })
            .await
            .unwrap()
    }

    async fn waiting(&self) -> Vec<Id<QueueEntry>> {
        self.server
            .queue()
            .peek_queue(&self.stand)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.id)
            .collect()
    }
}

fn drivers_of(entries: &[WithId<QueueEntry>]) -> Vec<Id<Driver>> {
    entries
        .iter()
        .map(|entry| entry.content.driver_id.clone())
        .collect()
}

pub async fn claims_follow_join_order<D: Database>(database: D) {
    let scene = Scene::new(database).await;
    let drivers = scene.queued_drivers(4).await;
    let queue = scene.server.queue();

    let waiting = queue.peek_queue(&scene.stand).await.unwrap();
    assert_eq!(drivers_of(&waiting), drivers);

    let mut claimed = vec![];
    for _ in 0..drivers.len() {
        claimed.push(queue.assign_next(&scene.stand).await.unwrap());
    }
    assert_eq!(drivers_of(&claimed), drivers);
    assert!(claimed
        .windows(2)
        .all(|pair| pair[0].content.joined_at <= pair[1].content.joined_at));
    assert!(claimed.iter().all(|entry| {
        entry.content.status == QueueStatus::Assigned && entry.content.assigned_at.is_some()
    }));

    let exhausted = queue.assign_next(&scene.stand).await;
    assert!(matches!(exhausted, Err(DispatchError::NoDriverAvailable(_))));
}

pub async fn join_is_idempotent<D: Database>(database: D) {
    let scene = Scene::new(database).await;
    let driver = scene.driver().await;
    let queue = scene.server.queue();

    let first = queue.join(&scene.stand, &driver).await.unwrap();
    let second = queue.join(&scene.stand, &driver).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(scene.waiting().await, vec![first.id]);
}

pub async fn leave_without_entry_reports_not_queued<D: Database>(database: D) {
    let scene = Scene::new(database).await;
    let waiting = scene.queued_drivers(2).await;
    let idle = scene.driver().await;
    let queue = scene.server.queue();
    let before = scene.waiting().await;

    let result = queue.leave(&idle).await;
    assert!(matches!(result, Err(DispatchError::NotQueued(_))));
    assert_eq!(scene.waiting().await, before);

    let left = queue.leave(&waiting[0]).await.unwrap();
    assert_eq!(left.content.status, QueueStatus::Left);
    let again = queue.leave(&waiting[0]).await;
    assert!(matches!(again, Err(DispatchError::NotQueued(_))));
}

pub async fn join_then_leave_is_net_zero<D: Database>(database: D) {
    let scene = Scene::new(database).await;
    scene.queued_drivers(2).await;
    let before = scene.waiting().await;

    let passing = scene.driver().await;
    let queue = scene.server.queue();
    queue.join(&scene.stand, &passing).await.unwrap();
    assert_eq!(scene.waiting().await.len(), before.len() + 1);
    queue.leave(&passing).await.unwrap();

    assert_eq!(scene.waiting().await, before);
}

const CLAIMERS: usize = 8;
const WAITING: usize = 3;

pub async fn concurrent_claims_are_disjoint<D: Database>(database: D) {
    let scene = Scene::new(database).await;
    let drivers = scene.queued_drivers(WAITING).await;

    let claims = (0..CLAIMERS).map(|_| {
        let queue = scene.server.queue();
        let stand = scene.stand.clone();
        tokio::spawn(async move { queue.assign_next(&stand).await })
    });
    let mut claimed = BTreeSet::new();
    let mut empty = 0;
    for result in future::join_all(claims).await {
        match result.unwrap() {
            Ok(entry) => assert!(claimed.insert(entry.content.driver_id)),
            Err(DispatchError::NoDriverAvailable(_)) => empty += 1,
            Err(why) => panic!("unexpected claim failure: {}", why),
        }
    }

    assert_eq!(claimed, drivers.into_iter().collect::<BTreeSet<_>>());
    assert_eq!(empty, CLAIMERS - WAITING);
    assert!(scene.waiting().await.is_empty());
}

pub async fn concurrent_rides_take_distinct_drivers<D: Database>(database: D) {
    let scene = Scene::new(database).await;
    let drivers = scene.queued_drivers(WAITING).await;
    let user = scene.user().await;

    let rides = (0..CLAIMERS).map(|_| {
        let dispatcher = scene.server.dispatcher();
        let request = scene.ride(&user);
        tokio::spawn(async move { dispatcher.create_ride(request).await })
    });
    let mut assigned = BTreeSet::new();
    let mut pending = 0;
    for result in future::join_all(rides).await {
        let ride = result.unwrap().unwrap();
        match ride.content.status {
            RideStatus::Accepted => {
                let driver = ride.content.driver_id.unwrap();
                assert!(assigned.insert(driver));
            }
            RideStatus::Pending => {
                assert!(ride.content.driver_id.is_none());
                pending += 1;
            }
            other => panic!("unexpected ride status {}", other),
        }
    }

    assert_eq!(assigned, drivers.into_iter().collect::<BTreeSet<_>>());
    assert_eq!(pending, CLAIMERS - WAITING);
}

pub async fn claims_skip_entries_held_by_open_transactions<D: Database>(database: D) {
    let scene = Scene::new(database.clone()).await;
    let drivers = scene.queued_drivers(2).await;
    let queue = scene.server.queue();

    let mut tx = database.transaction().await.unwrap();
    let held = tx
        .claim_oldest(&scene.stand, Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(held.content.driver_id, drivers[0]);

    // the oldest entry is held, the next one is handed out without waiting
    let skipped = queue.assign_next(&scene.stand).await.unwrap();
    assert_eq!(skipped.content.driver_id, drivers[1]);
    let nothing = queue.assign_next(&scene.stand).await;
    assert!(matches!(nothing, Err(DispatchError::NoDriverAvailable(_))));

    tx.rollback().await.unwrap();

    let waiting = queue.peek_queue(&scene.stand).await.unwrap();
    assert_eq!(drivers_of(&waiting), vec![drivers[0].clone()]);
    assert!(waiting[0].content.assigned_at.is_none());
    let released = queue.assign_next(&scene.stand).await.unwrap();
    assert_eq!(released.id, held.id);
}

pub async fn rides_take_drivers_in_join_order<D: Database>(database: D) {
    let scene = Scene::new(database).await;
    let drivers = scene.queued_drivers(2).await;
    let user = scene.user().await;
    let dispatcher = scene.server.dispatcher();
    let first_entry = scene.waiting().await[0].clone();

    let first = dispatcher.create_ride(scene.ride(&user)).await.unwrap();
    assert_eq!(first.content.status, RideStatus::Accepted);
    assert_eq!(first.content.driver_id, Some(drivers[0].clone()));
    let entry = scene.server.queue().get_entry(&first_entry).await.unwrap();
    assert_eq!(entry.content.status, QueueStatus::Assigned);
    assert_eq!(dispatcher.get_ride(&first.id).await.unwrap(), first);

    let second = dispatcher.create_ride(scene.ride(&user)).await.unwrap();
    assert_eq!(second.content.status, RideStatus::Accepted);
    assert_eq!(second.content.driver_id, Some(drivers[1].clone()));

    let third = dispatcher.create_ride(scene.ride(&user)).await.unwrap();
    assert_eq!(third.content.status, RideStatus::Pending);
    assert!(third.content.driver_id.is_none());
}

pub async fn updates_from_stale_reads_conflict<D: Database>(database: D) {
    let scene = Scene::new(database.clone()).await;
    let drivers = scene.queued_drivers(1).await;
    let user = scene.user().await;
    let dispatcher = scene.server.dispatcher();
    let ride = scene.pending_ride(&user).await;

    let mut stale = database.transaction().await.unwrap();
    let seen = stale.get_ride(&ride.id).await.unwrap();

    let assigned = dispatcher.assign_pending(&ride.id, &scene.stand).await.unwrap();
    assert_eq!(assigned.content.driver_id, Some(drivers[0].clone()));

    let cancelled = Ride {
        status: RideStatus::Cancelled,
        ..seen.content.clone()
    };
    let result = async {
        stale
            .update_ride(&seen.content, WithId::new(ride.id.clone(), cancelled))
            .await?;
        stale.commit().await
    }
    .await;
    assert!(matches!(result, Err(DatabaseError::Conflict(_))));

    // the assignment survives, so the claimed entry still has its ride
    assert_eq!(dispatcher.get_ride(&ride.id).await.unwrap(), assigned);
}

pub async fn drivers_hold_one_active_ride<D: Database>(database: D) {
    let scene = Scene::new(database.clone()).await;
    let driver = scene.driver().await;
    let user = scene.user().await;
    let first = scene.pending_ride(&user).await;
    let second = scene.pending_ride(&user).await;

    let mut tx = database.transaction().await.unwrap();
    tx.assign_ride(&first.id, &driver).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = database.transaction().await.unwrap();
    let result = async {
        tx.assign_ride(&second.id, &driver).await?;
        tx.commit().await
    }
    .await;
    assert!(matches!(result, Err(DatabaseError::Conflict(_))));

    let dispatcher = scene.server.dispatcher();
    assert_eq!(dispatcher.get_ride(&second.id).await.unwrap(), second);
    let busy = database.auto().active_rides_of(&driver).await.unwrap();
    assert_eq!(busy.len(), 1);
    assert_eq!(busy[0].id, first.id);
}
