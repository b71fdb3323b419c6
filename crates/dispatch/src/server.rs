use std::sync::Arc;

use crate::{
    database::Database,
    dispatcher::RideDispatcher,
    notify::{NoopNotifier, Notifier},
    queue::StandQueue,
    registry::Registry,
};

/// Owns the store handle and hands out the services working on it.
#[derive(Clone)]
pub struct Server<D>
where
    D: Database,
{
    database: D,
    notifier: Arc<dyn Notifier>,
}

impl<D> Server<D>
where
    D: Database,
{
    pub fn new(database: D) -> Self {
        Self {
            database,
            notifier: Arc::new(NoopNotifier),
        }
    }

    pub fn with_notifier(self, notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier, ..self }
    }

    pub fn queue(&self) -> StandQueue<D> {
        StandQueue::new(self.database.clone())
    }

    pub fn dispatcher(&self) -> RideDispatcher<D> {
        RideDispatcher::new(self.database.clone(), self.notifier.clone())
    }

    pub fn registry(&self) -> Registry<D> {
        Registry::new(self.database.clone())
    }
}
