use chrono::{DateTime, Utc};
use model::{driver::Driver, queue::QueueEntry, stand::Stand, WithId};
use utility::id::Id;

use crate::{
    database::{
        AtomicClaimableStore, Database, DatabaseOperations, DriverRepo, RideRepo,
        StandRepo,
    },
    not_found_as, DispatchError, DispatchResult,
};

/// Validates the stand and claims its oldest waiting driver through `store`.
pub(crate) async fn claim_next<T>(
    store: &mut T,
    stand_id: &Id<Stand>,
    assigned_at: DateTime<Utc>,
) -> DispatchResult<WithId<QueueEntry>>
where
    T: DatabaseOperations,
{
    if !store.stand_exists(stand_id).await? {
        return Err(DispatchError::StandNotFound(stand_id.clone()));
    }
    store
        .claim_oldest(stand_id, assigned_at)
        .await?
        .ok_or_else(|| DispatchError::NoDriverAvailable(stand_id.clone()))
}

/// Membership rules of the stand waiting lines.
#[derive(Debug, Clone)]
pub struct StandQueue<D>
where
    D: Database,
{
    database: D,
}

impl<D> StandQueue<D>
where
    D: Database,
{
    pub(crate) fn new(database: D) -> Self {
        Self { database }
    }

    /// Puts the driver into the waiting line of the stand they are bound to.
    /// Joining again while still waiting returns the entry from the first
    /// join. A driver on a pending or accepted ride can not join.
    pub async fn join(
        &self,
        stand_id: &Id<Stand>,
        driver_id: &Id<Driver>,
    ) -> DispatchResult<WithId<QueueEntry>> {
        let mut db = self.database.auto();
        if !db.stand_exists(stand_id).await? {
            return Err(DispatchError::StandNotFound(stand_id.clone()));
        }
        let bound = not_found_as(
            db.driver_stand(driver_id).await.map_err(DispatchError::from),
            || DispatchError::DriverNotFound(driver_id.clone()),
        )?;
        if bound.as_ref() != Some(stand_id) {
            return Err(DispatchError::DriverStandMismatch {
                driver: driver_id.clone(),
                stand: stand_id.clone(),
            });
        }
        if let Some(ride) = db.active_rides_of(driver_id).await?.first() {
            return Err(DispatchError::Conflict(format!(
                "driver {} is on ride {}",
                driver_id, ride.id
            )));
        }

        let inserted = db
            .insert_queue_entry(stand_id, driver_id, Utc::now())
            .await?;
        let created = inserted.is_created();
        let entry = inserted.into_inner();
        if entry.content.stand_id != *stand_id {
            // only possible after the driver was rebound while waiting
            return Err(DispatchError::Conflict(format!(
                "driver {} is already waiting at stand {}",
                driver_id, entry.content.stand_id
            )));
        }
        if created {
            log::info!(
                "Driver {} joined stand {} (entry {})",
                driver_id,
                stand_id,
                entry.id
            );
        } else {
            log::debug!("Driver {} already waiting at stand {}", driver_id, stand_id);
        }
        Ok(entry)
    }

    pub async fn leave(
        &self,
        driver_id: &Id<Driver>,
    ) -> DispatchResult<WithId<QueueEntry>> {
        match self.database.auto().mark_left(driver_id).await? {
            Some(entry) => {
                log::info!(
                    "Driver {} left stand {}",
                    driver_id,
                    entry.content.stand_id
                );
                Ok(entry)
            }
            None => Err(DispatchError::NotQueued(driver_id.clone())),
        }
    }

    pub async fn peek_queue(
        &self,
        stand_id: &Id<Stand>,
    ) -> DispatchResult<Vec<WithId<QueueEntry>>> {
        Ok(self.database.auto().list_waiting(stand_id).await?)
    }

    /// Claims the driver who has been waiting longest at the stand.
    pub async fn assign_next(
        &self,
        stand_id: &Id<Stand>,
    ) -> DispatchResult<WithId<QueueEntry>> {
        let entry = claim_next(&mut self.database.auto(), stand_id, Utc::now()).await?;
        log::info!(
            "Claimed driver {} from stand {}",
            entry.content.driver_id,
            stand_id
        );
        Ok(entry)
    }

    pub async fn get_entry(
        &self,
        id: &Id<QueueEntry>,
    ) -> DispatchResult<WithId<QueueEntry>> {
        Ok(self.database.auto().get_queue_entry(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use model::{driver::NewDriver, stand::Stand};
    use utility::id::Id;

    use crate::{memory::MemoryDatabase, server::Server, DispatchError};

    async fn setup() -> (Server<MemoryDatabase>, Id<Stand>, Id<Stand>) {
        let server = Server::new(MemoryDatabase::new());
        let registry = server.registry();
        let north = registry
            .create_stand(Stand {
                name: "north".to_owned(),
                location: "north gate".to_owned(),
            })
            .await
            .unwrap();
        let south = registry
            .create_stand(Stand {
                name: "south".to_owned(),
                location: "south gate".to_owned(),
            })
            .await
            .unwrap();
        (server, north.id, south.id)
    }

    fn driver_at(stand: &Id<Stand>) -> NewDriver {
        NewDriver {
            name: "d".to_owned(),
            phone: "1".to_owned(),
            stand_id: Some(stand.clone()),
        }
    }

    #[tokio::test]
    async fn join_validates_stand_and_driver() {
        let (server, north, _) = setup().await;
        let queue = server.queue();

        let missing_stand = queue.join(&Id::new(99), &Id::new(1)).await;
        assert!(matches!(missing_stand, Err(DispatchError::StandNotFound(_))));

        let missing_driver = queue.join(&north, &Id::new(99)).await;
        assert!(matches!(missing_driver, Err(DispatchError::DriverNotFound(_))));
    }

    #[tokio::test]
    async fn join_rejects_foreign_stand() {
        let (server, north, south) = setup().await;
        let driver = server
            .registry()
            .create_driver(driver_at(&north))
            .await
            .unwrap();

        let result = server.queue().join(&south, &driver.id).await;
        assert!(matches!(
            result,
            Err(DispatchError::DriverStandMismatch { .. })
        ));
        assert!(server.queue().peek_queue(&south).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unbound_driver_can_not_join() {
        let (server, north, _) = setup().await;
        let driver = server
            .registry()
            .create_driver(NewDriver {
                stand_id: None,
                ..driver_at(&north)
            })
            .await
            .unwrap();

        let result = server.queue().join(&north, &driver.id).await;
        assert!(matches!(
            result,
            Err(DispatchError::DriverStandMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn rebound_driver_still_waiting_elsewhere_conflicts() {
        let (server, north, south) = setup().await;
        let registry = server.registry();
        let driver = registry.create_driver(driver_at(&north)).await.unwrap();
        server.queue().join(&north, &driver.id).await.unwrap();

        registry
            .update_driver(
                &driver.id,
                model::driver::DriverUpdate {
                    stand_id: Some(south.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let result = server.queue().join(&south, &driver.id).await;
        assert!(matches!(result, Err(DispatchError::Conflict(_))));
    }

    #[tokio::test]
    async fn assign_next_on_empty_stand() {
        let (server, north, _) = setup().await;
        let result = server.queue().assign_next(&north).await;
        assert!(matches!(result, Err(DispatchError::NoDriverAvailable(_))));

        let result = server.queue().assign_next(&Id::new(99)).await;
        assert!(matches!(result, Err(DispatchError::StandNotFound(_))));
    }

    #[tokio::test]
    async fn claimed_entry_is_recorded_as_assigned() {
        let (server, north, _) = setup().await;
        let driver = server
            .registry()
            .create_driver(driver_at(&north))
            .await
            .unwrap();
        let joined = server.queue().join(&north, &driver.id).await.unwrap();

        let claimed = server.queue().assign_next(&north).await.unwrap();
        assert_eq!(claimed.id, joined.id);
        let stored = server.queue().get_entry(&joined.id).await.unwrap();
        assert_eq!(stored.content.status, model::queue::QueueStatus::Assigned);
        assert!(stored.content.assigned_at.is_some());

        // a claimed driver is no longer waiting
        let left = server.queue().leave(&driver.id).await;
        assert!(matches!(left, Err(DispatchError::NotQueued(_))));
    }
}
