use std::sync::Arc;

use chrono::Utc;
use model::{
    ride::{NewRide, Ride, RideStatus, RideUpdate},
    stand::Stand,
    Page, WithId,
};
use utility::id::Id;

use crate::{
    database::{
        AtomicClaimableStore, Database, DatabaseTransaction, DriverRepo, RideRepo,
        StandRepo, UserRepo,
    },
    not_found_as,
    notify::{AssignmentEvent, Notifier},
    queue::claim_next,
    DispatchError, DispatchResult,
};

/// Creates rides and assigns drivers waiting at stands to them.
#[derive(Clone)]
pub struct RideDispatcher<D>
where
    D: Database,
{
    database: D,
    notifier: Arc<dyn Notifier>,
}

impl<D> RideDispatcher<D>
where
    D: Database,
{
    pub(crate) fn new(database: D, notifier: Arc<dyn Notifier>) -> Self {
        Self { database, notifier }
    }

    /// Persists a pending ride and, if a stand is given, tries to assign the
    /// driver waiting longest there. An empty stand is not an error: the ride
    /// is returned pending.
    pub async fn create_ride(&self, request: NewRide) -> DispatchResult<WithId<Ride>> {
        let mut db = self.database.auto();
        if !db.user_exists(&request.user_id).await? {
            return Err(DispatchError::UserNotFound(request.user_id));
        }
        if let Some(stand_id) = request.stand_id.as_ref() {
            if !db.stand_exists(stand_id).await? {
                return Err(DispatchError::StandNotFound(stand_id.clone()));
            }
        }

        let ride = db
            .insert_ride(Ride::requested(
                request.user_id,
                request.start_location,
                request.end_location,
                Utc::now(),
            ))
            .await?;
        log::info!("Ride {} requested by user {}", ride.id, ride.content.user_id);

        let Some(stand_id) = request.stand_id else {
            return Ok(ride);
        };
        match self.assign_from_stand(&ride.id, &stand_id).await {
            Ok(assigned) => Ok(assigned),
            Err(DispatchError::NoDriverAvailable(_)) => {
                log::info!(
                    "No driver waiting at stand {}, ride {} stays pending",
                    stand_id,
                    ride.id
                );
                Ok(ride)
            }
            Err(why) => {
                log::error!("Auto-assignment of ride {} failed: {}", ride.id, why);
                Err(DispatchError::AutoAssignFailed {
                    ride: ride.id,
                    source: Box::new(why),
                })
            }
        }
    }

    /// Retries the assignment of a pending ride from the given stand.
    pub async fn assign_pending(
        &self,
        ride_id: &Id<Ride>,
        stand_id: &Id<Stand>,
    ) -> DispatchResult<WithId<Ride>> {
        let ride = self.get_ride(ride_id).await?;
        if ride.content.status != RideStatus::Pending {
            return Err(DispatchError::InvalidState(format!(
                "ride {} is {}, only pending rides can be assigned",
                ride_id, ride.content.status
            )));
        }
        self.assign_from_stand(ride_id, stand_id).await
    }

    /// Claims a driver and assigns the ride in one transaction. The
    /// notification goes out only after the commit.
    async fn assign_from_stand(
        &self,
        ride_id: &Id<Ride>,
        stand_id: &Id<Stand>,
    ) -> DispatchResult<WithId<Ride>> {
        let assigned_at = Utc::now();
        let mut tx = self.database.transaction().await?;
        let result = async {
            let entry = claim_next(&mut tx, stand_id, assigned_at).await?;
            let driver_id = entry.content.driver_id;
            let ride = tx.assign_ride(ride_id, &driver_id).await?;
            DispatchResult::Ok((ride, driver_id))
        }
        .await;

        let (ride, driver_id) = match result {
            Ok(assigned) => assigned,
            Err(why) => {
                if let Err(rollback) = tx.rollback().await {
                    log::error!("Rollback of ride {} failed: {}", ride_id, rollback);
                }
                return Err(why);
            }
        };
        tx.commit().await?;

        log::info!(
            "Assigned driver {} from stand {} to ride {}",
            driver_id,
            stand_id,
            ride_id
        );
        self.notifier.notify(AssignmentEvent {
            ride_id: ride.id.clone(),
            driver_id,
            assigned_at,
        });
        Ok(ride)
    }

    /// Explicit change of a ride's driver or status. Completed and cancelled
    /// rides keep their status. An accepted ride needs a driver, who must not
    /// be waiting at a stand or busy with another active ride. Fails with
    /// `Conflict` if the ride changed since it was read.
    pub async fn update_ride(
        &self,
        ride_id: &Id<Ride>,
        update: RideUpdate,
    ) -> DispatchResult<WithId<Ride>> {
        let mut tx = self.database.transaction().await?;
        let ride = not_found_as(
            tx.get_ride(ride_id).await.map_err(DispatchError::from),
            || DispatchError::RideNotFound(ride_id.clone()),
        )?;
        if let Some(next) = update.status {
            if !ride.content.status.can_transition_to(next) {
                return Err(DispatchError::InvalidState(format!(
                    "ride {} can not move from {} to {}",
                    ride_id, ride.content.status, next
                )));
            }
        }
        let updated = update.clone().apply(ride.content.clone());
        if updated.status == RideStatus::Accepted && updated.driver_id.is_none() {
            return Err(DispatchError::InvalidState(format!(
                "ride {} can not be accepted without a driver",
                ride_id
            )));
        }
        if let Some(driver_id) = update.driver_id.as_ref() {
            if !tx.driver_exists(driver_id).await? {
                return Err(DispatchError::DriverNotFound(driver_id.clone()));
            }
            let newly_bound = updated.active_driver().is_some()
                && ride.content.driver_id.as_ref() != Some(driver_id);
            if newly_bound {
                if let Some(entry) = tx.waiting_entry_of(driver_id).await? {
                    return Err(DispatchError::Conflict(format!(
                        "driver {} is waiting at stand {}",
                        driver_id, entry.content.stand_id
                    )));
                }
                let busy = tx.active_rides_of(driver_id).await?;
                if let Some(other) = busy.iter().find(|other| other.id != *ride_id) {
                    return Err(DispatchError::Conflict(format!(
                        "driver {} is already on ride {}",
                        driver_id, other.id
                    )));
                }
            }
        }
        let result = tx
            .update_ride(&ride.content, WithId::new(ride.id.clone(), updated))
            .await?;
        tx.commit().await?;
        log::info!("Ride {} is now {}", result.id, result.content.status);
        Ok(result)
    }

    pub async fn get_ride(&self, ride_id: &Id<Ride>) -> DispatchResult<WithId<Ride>> {
        not_found_as(
            self.database
                .auto()
                .get_ride(ride_id)
                .await
                .map_err(DispatchError::from),
            || DispatchError::RideNotFound(ride_id.clone()),
        )
    }

    pub async fn get_rides(&self, page: Page) -> DispatchResult<Vec<WithId<Ride>>> {
        Ok(self.database.auto().get_rides(page).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use model::{
        driver::{Driver, NewDriver},
        queue::{QueueEntry, QueueStatus},
        ride::{NewRide, Ride, RideStatus, RideUpdate},
        stand::Stand,
        user::{NewUser, User},
        Page, WithId,
    };
    use tokio::sync::mpsc;
    use utility::id::Id;

    use crate::{
        database::{
            AtomicClaimableStore, Database, DatabaseError, DatabaseTransaction,
            DriverRepo, Inserted, Result, RideRepo, StandRepo, UserRepo,
        },
        memory::{MemoryDatabase, MemorySession},
        notify::ChannelNotifier,
        server::Server,
        DispatchError,
    };

    /// A memory store whose transactions fail to write ride assignments.
    #[derive(Clone)]
    struct FailingAssignments(MemoryDatabase);

    struct FailingSession(MemorySession);

    #[async_trait]
    impl Database for FailingAssignments {
        type Transaction = FailingSession;
        type Autocommit = MemorySession;

        async fn transaction(&self) -> Result<FailingSession> {
            Ok(FailingSession(self.0.transaction().await?))
        }

        fn auto(&self) -> MemorySession {
            self.0.auto()
        }
    }

    #[async_trait]
    impl DatabaseTransaction for FailingSession {
        async fn commit(self) -> Result<()> {
            self.0.commit().await
        }

        async fn rollback(self) -> Result<()> {
            self.0.rollback().await
        }
    }

    #[async_trait]
    impl StandRepo for FailingSession {
        async fn stand_exists(&mut self, id: &Id<Stand>) -> Result<bool> {
            self.0.stand_exists(id).await
        }

        async fn get_stand(&mut self, id: &Id<Stand>) -> Result<WithId<Stand>> {
            self.0.get_stand(id).await
        }

        async fn get_stands(&mut self, page: Page) -> Result<Vec<WithId<Stand>>> {
            self.0.get_stands(page).await
        }

        async fn insert_stand(&mut self, stand: Stand) -> Result<WithId<Stand>> {
            self.0.insert_stand(stand).await
        }

        async fn update_stand(&mut self, stand: WithId<Stand>) -> Result<WithId<Stand>> {
            self.0.update_stand(stand).await
        }
    }

    #[async_trait]
    impl DriverRepo for FailingSession {
        async fn driver_exists(&mut self, id: &Id<Driver>) -> Result<bool> {
            self.0.driver_exists(id).await
        }

        async fn driver_stand(&mut self, id: &Id<Driver>) -> Result<Option<Id<Stand>>> {
            self.0.driver_stand(id).await
        }

        async fn get_driver(&mut self, id: &Id<Driver>) -> Result<WithId<Driver>> {
            self.0.get_driver(id).await
        }

        async fn get_drivers(&mut self, page: Page) -> Result<Vec<WithId<Driver>>> {
            self.0.get_drivers(page).await
        }

        async fn insert_driver(&mut self, driver: Driver) -> Result<WithId<Driver>> {
            self.0.insert_driver(driver).await
        }

        async fn update_driver(
            &mut self,
            driver: WithId<Driver>,
        ) -> Result<WithId<Driver>> {
            self.0.update_driver(driver).await
        }

        async fn set_driver_availability(
            &mut self,
            id: &Id<Driver>,
            available: bool,
        ) -> Result<WithId<Driver>> {
            self.0.set_driver_availability(id, available).await
        }
    }

    #[async_trait]
    impl UserRepo for FailingSession {
        async fn user_exists(&mut self, id: &Id<User>) -> Result<bool> {
            self.0.user_exists(id).await
        }

        async fn get_user(&mut self, id: &Id<User>) -> Result<WithId<User>> {
            self.0.get_user(id).await
        }

        async fn insert_user(&mut self, user: User) -> Result<WithId<User>> {
            self.0.insert_user(user).await
        }
    }

    #[async_trait]
    impl RideRepo for FailingSession {
        async fn get_ride(&mut self, id: &Id<Ride>) -> Result<WithId<Ride>> {
            self.0.get_ride(id).await
        }

        async fn get_rides(&mut self, page: Page) -> Result<Vec<WithId<Ride>>> {
            self.0.get_rides(page).await
        }

        async fn insert_ride(&mut self, ride: Ride) -> Result<WithId<Ride>> {
            self.0.insert_ride(ride).await
        }

        async fn update_ride(
            &mut self,
            seen: &Ride,
            ride: WithId<Ride>,
        ) -> Result<WithId<Ride>> {
            self.0.update_ride(seen, ride).await
        }

        async fn assign_ride(
            &mut self,
            _id: &Id<Ride>,
            _driver: &Id<Driver>,
        ) -> Result<WithId<Ride>> {
            Err(DatabaseError::other("connection reset while assigning"))
        }

        async fn active_rides_of(
            &mut self,
            driver: &Id<Driver>,
        ) -> Result<Vec<WithId<Ride>>> {
            self.0.active_rides_of(driver).await
        }
    }

    #[async_trait]
    impl AtomicClaimableStore for FailingSession {
        async fn insert_queue_entry(
            &mut self,
            stand: &Id<Stand>,
            driver: &Id<Driver>,
            joined_at: DateTime<Utc>,
        ) -> Result<Inserted<WithId<QueueEntry>>> {
            self.0.insert_queue_entry(stand, driver, joined_at).await
        }

        async fn claim_oldest(
            &mut self,
            stand: &Id<Stand>,
            assigned_at: DateTime<Utc>,
        ) -> Result<Option<WithId<QueueEntry>>> {
            self.0.claim_oldest(stand, assigned_at).await
        }

        async fn mark_left(
            &mut self,
            driver: &Id<Driver>,
        ) -> Result<Option<WithId<QueueEntry>>> {
            self.0.mark_left(driver).await
        }

        async fn list_waiting(
            &mut self,
            stand: &Id<Stand>,
        ) -> Result<Vec<WithId<QueueEntry>>> {
            self.0.list_waiting(stand).await
        }

        async fn waiting_entry_of(
            &mut self,
            driver: &Id<Driver>,
        ) -> Result<Option<WithId<QueueEntry>>> {
            self.0.waiting_entry_of(driver).await
        }

        async fn get_queue_entry(
            &mut self,
            id: &Id<QueueEntry>,
        ) -> Result<WithId<QueueEntry>> {
            self.0.get_queue_entry(id).await
        }
    }

    struct Fixture {
        server: Server<MemoryDatabase>,
        stand: Id<Stand>,
        user: Id<User>,
    }

    async fn fixture() -> (Fixture, mpsc::Receiver<crate::notify::AssignmentEvent>) {
        fixture_on(MemoryDatabase::new()).await
    }

    async fn fixture_on(
        database: MemoryDatabase,
    ) -> (Fixture, mpsc::Receiver<crate::notify::AssignmentEvent>) {
        let (notifier, events) = ChannelNotifier::new(8);
        let server = Server::new(database).with_notifier(Arc::new(notifier));
        let registry = server.registry();
        let stand = registry
            .create_stand(Stand {
                name: "s".to_owned(),
                location: "l".to_owned(),
            })
            .await
            .unwrap()
            .id;
        let user = registry
            .create_user(NewUser {
                name: "u".to_owned(),
                email: "u@example.org".to_owned(),
            })
            .await
            .unwrap()
            .id;
        (Fixture { server, stand, user }, events)
    }

    fn request(fixture: &Fixture, stand: Option<Id<Stand>>) -> NewRide {
        NewRide {
            user_id: fixture.user.clone(),
            start_location: "a".to_owned(),
            end_location: "b".to_owned(),
            stand_id: stand,
        }
    }

    async fn driver(fixture: &Fixture) -> Id<Driver> {
        fixture
            .server
            .registry()
            .create_driver(NewDriver {
                name: "d".to_owned(),
                phone: "1".to_owned(),
                stand_id: Some(fixture.stand.clone()),
            })
            .await
            .unwrap()
            .id
    }

    async fn queued_driver(fixture: &Fixture) -> Id<Driver> {
        let driver = driver(fixture).await;
        fixture
            .server
            .queue()
            .join(&fixture.stand, &driver)
            .await
            .unwrap();
        driver
    }

    fn with_driver(driver: &Id<Driver>, status: RideStatus) -> RideUpdate {
        RideUpdate {
            driver_id: Some(driver.clone()),
            status: Some(status),
        }
    }

    #[tokio::test]
    async fn unknown_user_creates_nothing() {
        let (fixture, _) = fixture().await;
        let result = fixture
            .server
            .dispatcher()
            .create_ride(NewRide {
                user_id: Id::new(404),
                ..request(&fixture, None)
            })
            .await;
        assert!(matches!(result, Err(DispatchError::UserNotFound(_))));
        let rides = fixture
            .server
            .dispatcher()
            .get_rides(Default::default())
            .await
            .unwrap();
        assert!(rides.is_empty());
    }

    #[tokio::test]
    async fn unknown_stand_creates_nothing() {
        let (fixture, _) = fixture().await;
        let result = fixture
            .server
            .dispatcher()
            .create_ride(request(&fixture, Some(Id::new(404))))
            .await;
        assert!(matches!(result, Err(DispatchError::StandNotFound(_))));
    }

    #[tokio::test]
    async fn ride_without_stand_stays_pending() {
        let (fixture, _) = fixture().await;
        queued_driver(&fixture).await;
        let ride = fixture
            .server
            .dispatcher()
            .create_ride(request(&fixture, None))
            .await
            .unwrap();
        assert_eq!(ride.content.status, RideStatus::Pending);
        let waiting = fixture.server.queue().peek_queue(&fixture.stand).await;
        assert_eq!(waiting.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn auto_assignment_notifies_driver() {
        let (fixture, mut events) = fixture().await;
        let driver = queued_driver(&fixture).await;
        let ride = fixture
            .server
            .dispatcher()
            .create_ride(request(&fixture, Some(fixture.stand.clone())))
            .await
            .unwrap();
        assert_eq!(ride.content.status, RideStatus::Accepted);
        assert_eq!(ride.content.driver_id, Some(driver.clone()));

        let event = events.recv().await.unwrap();
        assert_eq!(event.ride_id, ride.id);
        assert_eq!(event.driver_id, driver);
    }

    #[tokio::test]
    async fn empty_stand_sends_no_notification() {
        let (fixture, mut events) = fixture().await;
        let ride = fixture
            .server
            .dispatcher()
            .create_ride(request(&fixture, Some(fixture.stand.clone())))
            .await
            .unwrap();
        assert_eq!(ride.content.status, RideStatus::Pending);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn pending_ride_is_assigned_later() {
        let (fixture, _) = fixture().await;
        let dispatcher = fixture.server.dispatcher();
        let ride = dispatcher
            .create_ride(request(&fixture, Some(fixture.stand.clone())))
            .await
            .unwrap();

        let nobody = dispatcher.assign_pending(&ride.id, &fixture.stand).await;
        assert!(matches!(nobody, Err(DispatchError::NoDriverAvailable(_))));
        assert_eq!(
            dispatcher.get_ride(&ride.id).await.unwrap().content.status,
            RideStatus::Pending
        );

        let driver = queued_driver(&fixture).await;
        let assigned = dispatcher
            .assign_pending(&ride.id, &fixture.stand)
            .await
            .unwrap();
        assert_eq!(assigned.content.driver_id, Some(driver));

        let again = dispatcher.assign_pending(&ride.id, &fixture.stand).await;
        assert!(matches!(again, Err(DispatchError::InvalidState(_))));
    }

    #[tokio::test]
    async fn final_states_are_kept() {
        let (fixture, _) = fixture().await;
        let dispatcher = fixture.server.dispatcher();
        let ride = dispatcher
            .create_ride(request(&fixture, None))
            .await
            .unwrap();

        let cancelled = dispatcher
            .update_ride(
                &ride.id,
                RideUpdate {
                    status: Some(RideStatus::Cancelled),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cancelled.content.status, RideStatus::Cancelled);

        let reopened = dispatcher
            .update_ride(
                &ride.id,
                RideUpdate {
                    status: Some(RideStatus::Pending),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(reopened, Err(DispatchError::InvalidState(_))));

        let missing = dispatcher
            .update_ride(&Id::new(404), RideUpdate::default())
            .await;
        assert!(matches!(missing, Err(DispatchError::RideNotFound(_))));
    }

    #[tokio::test]
    async fn failed_assignment_keeps_ride_pending_and_driver_queued() {
        let database = MemoryDatabase::new();
        let (fixture, mut events) = fixture_on(database.clone()).await;
        let driver = queued_driver(&fixture).await;
        let failing = Server::new(FailingAssignments(database));

        let result = failing
            .dispatcher()
            .create_ride(request(&fixture, Some(fixture.stand.clone())))
            .await;
        let (ride, source) = match result {
            Err(DispatchError::AutoAssignFailed { ride, source }) => (ride, source),
            other => panic!("expected a failed auto-assignment, got {:?}", other),
        };
        assert!(matches!(*source, DispatchError::Storage(_)));

        let dispatcher = fixture.server.dispatcher();
        let stored = dispatcher.get_ride(&ride).await.unwrap();
        assert_eq!(stored.content.status, RideStatus::Pending);
        assert!(stored.content.driver_id.is_none());

        let waiting = fixture.server.queue().peek_queue(&fixture.stand).await.unwrap();
        assert_eq!(waiting[0].content.driver_id, driver);
        assert_eq!(waiting[0].content.status, QueueStatus::Waiting);
        assert!(waiting[0].content.assigned_at.is_none());
        assert!(events.try_recv().is_err());

        let assigned = dispatcher
            .assign_pending(&ride, &fixture.stand)
            .await
            .unwrap();
        assert_eq!(assigned.content.driver_id, Some(driver));
    }

    #[tokio::test]
    async fn accepting_requires_a_driver() {
        let (fixture, _) = fixture().await;
        let dispatcher = fixture.server.dispatcher();
        let ride = dispatcher
            .create_ride(request(&fixture, None))
            .await
            .unwrap();

        let result = dispatcher
            .update_ride(
                &ride.id,
                RideUpdate {
                    status: Some(RideStatus::Accepted),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(DispatchError::InvalidState(_))));
        assert_eq!(dispatcher.get_ride(&ride.id).await.unwrap(), ride);

        let idle = driver(&fixture).await;
        let accepted = dispatcher
            .update_ride(&ride.id, with_driver(&idle, RideStatus::Accepted))
            .await
            .unwrap();
        assert_eq!(accepted.content.driver_id, Some(idle));
    }

    #[tokio::test]
    async fn waiting_driver_can_not_be_put_on_a_ride() {
        let (fixture, _) = fixture().await;
        let dispatcher = fixture.server.dispatcher();
        let waiting = queued_driver(&fixture).await;
        let ride = dispatcher
            .create_ride(request(&fixture, None))
            .await
            .unwrap();

        let result = dispatcher
            .update_ride(&ride.id, with_driver(&waiting, RideStatus::Accepted))
            .await;
        assert!(matches!(result, Err(DispatchError::Conflict(_))));
        assert_eq!(dispatcher.get_ride(&ride.id).await.unwrap(), ride);

        let line = fixture.server.queue().peek_queue(&fixture.stand).await.unwrap();
        assert_eq!(line.len(), 1);
        assert_eq!(line[0].content.driver_id, waiting);
    }

    #[tokio::test]
    async fn driver_takes_one_active_ride_at_a_time() {
        let (fixture, _) = fixture().await;
        let dispatcher = fixture.server.dispatcher();
        let busy = queued_driver(&fixture).await;
        let first = dispatcher
            .create_ride(request(&fixture, Some(fixture.stand.clone())))
            .await
            .unwrap();
        assert_eq!(first.content.driver_id, Some(busy.clone()));
        let second = dispatcher
            .create_ride(request(&fixture, None))
            .await
            .unwrap();

        let result = dispatcher
            .update_ride(&second.id, with_driver(&busy, RideStatus::Accepted))
            .await;
        assert!(matches!(result, Err(DispatchError::Conflict(_))));
        let rejoin = fixture.server.queue().join(&fixture.stand, &busy).await;
        assert!(matches!(rejoin, Err(DispatchError::Conflict(_))));

        dispatcher
            .update_ride(
                &first.id,
                RideUpdate {
                    status: Some(RideStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let taken = dispatcher
            .update_ride(&second.id, with_driver(&busy, RideStatus::Accepted))
            .await
            .unwrap();
        assert_eq!(taken.content.driver_id, Some(busy));
    }
}
