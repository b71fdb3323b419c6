use chrono::Utc;
use model::{
    driver::{Driver, DriverUpdate, NewDriver},
    stand::{Stand, StandUpdate},
    user::{NewUser, User},
    Page, WithId,
};
use utility::{id::Id, let_also::LetAlso};

use crate::{
    database::{Database, DatabaseTransaction, DriverRepo, StandRepo, UserRepo},
    not_found_as, DispatchError, DispatchResult,
};

/// Record management of stands, drivers and users.
#[derive(Debug, Clone)]
pub struct Registry<D>
where
    D: Database,
{
    database: D,
}

impl<D> Registry<D>
where
    D: Database,
{
    pub(crate) fn new(database: D) -> Self {
        Self { database }
    }
}

impl<D> Registry<D>
where
    D: Database,
{
    pub async fn create_stand(&self, stand: Stand) -> DispatchResult<WithId<Stand>> {
        let stand = self.database.auto().insert_stand(stand).await?;
        log::info!("Created stand {} ({})", stand.id, stand.content.name);
        Ok(stand)
    }

    pub async fn get_stand(&self, id: &Id<Stand>) -> DispatchResult<WithId<Stand>> {
        self.database
            .auto()
            .get_stand(id)
            .await
            .map_err(DispatchError::from)
            .let_owned(|result| {
                not_found_as(result, || DispatchError::StandNotFound(id.clone()))
            })
    }

    pub async fn get_stands(&self, page: Page) -> DispatchResult<Vec<WithId<Stand>>> {
        Ok(self.database.auto().get_stands(page).await?)
    }

    pub async fn update_stand(
        &self,
        id: &Id<Stand>,
        update: StandUpdate,
    ) -> DispatchResult<WithId<Stand>> {
        let mut tx = self.database.transaction().await?;
        let stand = not_found_as(
            tx.get_stand(id).await.map_err(DispatchError::from),
            || DispatchError::StandNotFound(id.clone()),
        )?;
        let result = tx
            .update_stand(WithId::new(stand.id, update.apply(stand.content)))
            .await?;
        tx.commit().await?;
        Ok(result)
    }
}

async fn ensure_stand<T>(db: &mut T, stand: Option<&Id<Stand>>) -> DispatchResult<()>
where
    T: StandRepo + Send,
{
    if let Some(id) = stand {
        if !db.stand_exists(id).await? {
            return Err(DispatchError::StandNotFound(id.clone()));
        }
    }
    Ok(())
}

impl<D> Registry<D>
where
    D: Database,
{
    pub async fn create_driver(
        &self,
        driver: NewDriver,
    ) -> DispatchResult<WithId<Driver>> {
        let mut db = self.database.auto();
        ensure_stand(&mut db, driver.stand_id.as_ref()).await?;
        let driver = db.insert_driver(driver.into_driver(Utc::now())).await?;
        log::info!("Registered driver {} ({})", driver.id, driver.content.name);
        Ok(driver)
    }

    pub async fn get_driver(&self, id: &Id<Driver>) -> DispatchResult<WithId<Driver>> {
        not_found_as(
            self.database
                .auto()
                .get_driver(id)
                .await
                .map_err(DispatchError::from),
            || DispatchError::DriverNotFound(id.clone()),
        )
    }

    pub async fn get_drivers(&self, page: Page) -> DispatchResult<Vec<WithId<Driver>>> {
        Ok(self.database.auto().get_drivers(page).await?)
    }

    /// Rebinding a driver does not touch a waiting entry at the old stand.
    pub async fn update_driver(
        &self,
        id: &Id<Driver>,
        update: DriverUpdate,
    ) -> DispatchResult<WithId<Driver>> {
        let mut tx = self.database.transaction().await?;
        ensure_stand(&mut tx, update.stand_id.as_ref()).await?;
        let driver = not_found_as(
            tx.get_driver(id).await.map_err(DispatchError::from),
            || DispatchError::DriverNotFound(id.clone()),
        )?;
        let result = tx
            .update_driver(WithId::new(driver.id, update.apply(driver.content)))
            .await?;
        tx.commit().await?;
        Ok(result)
    }

    pub async fn set_driver_availability(
        &self,
        id: &Id<Driver>,
        available: bool,
    ) -> DispatchResult<WithId<Driver>> {
        not_found_as(
            self.database
                .auto()
                .set_driver_availability(id, available)
                .await
                .map_err(DispatchError::from),
            || DispatchError::DriverNotFound(id.clone()),
        )
    }
}

impl<D> Registry<D>
where
    D: Database,
{
    pub async fn create_user(&self, user: NewUser) -> DispatchResult<WithId<User>> {
        Ok(self
            .database
            .auto()
            .insert_user(user.into_user(Utc::now()))
            .await?)
    }

    pub async fn get_user(&self, id: &Id<User>) -> DispatchResult<WithId<User>> {
        not_found_as(
            self.database
                .auto()
                .get_user(id)
                .await
                .map_err(DispatchError::from),
            || DispatchError::UserNotFound(id.clone()),
        )
    }
}
