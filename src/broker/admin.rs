use crate::broker::resource::{LockState, Properties, Resource, Transition};
use crate::broker::{Broker, Error};
use tracing::{info, instrument};

impl Broker {
    #[instrument(skip(self, properties))]
    pub async fn register(
        &self,
        resource_set: String,
        properties: Properties,
    ) -> Result<Resource, Error> {
        if resource_set.is_empty() {
            return Err(Error::InvalidInput(
                "'resource_set' must not be empty".to_string(),
            ));
        }

        let resource = Resource::new(resource_set, properties);
        self.store.insert_resource(resource.clone()).await?;
        info!("Registered resource {}", resource.id);
        Ok(resource)
    }

    /// Deletes a resource, which must be `Free`.
    ///
    /// # Errors
    ///
    /// * `Error::ResourceDoesNotExist` if there is no such resource
    /// * `Error::ResourceLocked` if it is in any other state than `Free`
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str) -> Result<(), Error> {
        match self.store.delete_resource(id, LockState::Free).await? {
            Transition::Applied => {
                info!("Removed resource {id}");
                Ok(())
            }
            Transition::Conflict(_) => Err(Error::ResourceLocked),
            Transition::Missing => Err(Error::ResourceDoesNotExist),
        }
    }

    /// Withdraws a free resource from acquisition. Disabling an already
    /// disabled resource succeeds.
    #[instrument(skip(self))]
    pub async fn disable(&self, id: &str) -> Result<(), Error> {
        match self
            .store
            .transition(id, LockState::Free, LockState::Disabled)
            .await?
        {
            Transition::Applied => {
                info!("Disabled resource {id}");
                Ok(())
            }
            Transition::Conflict(LockState::Disabled) => Ok(()),
            Transition::Conflict(_) => Err(Error::ResourceLocked),
            Transition::Missing => Err(Error::ResourceDoesNotExist),
        }
    }

    #[instrument(skip(self))]
    pub async fn enable(&self, id: &str) -> Result<(), Error> {
        match self
            .store
            .transition(id, LockState::Disabled, LockState::Free)
            .await?
        {
            Transition::Applied => {
                info!("Enabled resource {id}");
                Ok(())
            }
            Transition::Conflict(_) => Err(Error::ResourceNotDisabled),
            Transition::Missing => Err(Error::ResourceDoesNotExist),
        }
    }

    pub async fn list(&self, resource_set: Option<&str>) -> Result<Vec<Resource>, Error> {
        Ok(self
            .store
            .list_resources(resource_set.map(ToString::to_string))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::request::{AcquisitionOptions, ResourceRequest};
    use crate::broker::tests::{create_test_broker, register, state_of};
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_list() {
        let broker = create_test_broker();
        let printer = register(&broker, "printers", json!({"color": true})).await;
        register(&broker, "scanners", json!({})).await;
        register(&broker, "printers", json!({"color": true})).await;

        let all = broker.list(None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|r| r.lock_state == LockState::Free));

        let printers = broker.list(Some("printers")).await.unwrap();
        assert_eq!(printers.len(), 2);
        assert_eq!(printers[0].id, printer);
        assert_eq!(printers[0].properties["color"], true);

        assert!(broker.list(Some("plotters")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_rejects_empty_set() {
        let broker = create_test_broker();
        let error = broker
            .register(String::new(), Properties::new())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_remove() {
        let broker = create_test_broker();
        let id = register(&broker, "test", json!({})).await;

        assert_eq!(broker.remove(&id).await, Ok(()));
        assert!(broker.list(None).await.unwrap().is_empty());
        assert_eq!(broker.remove(&id).await, Err(Error::ResourceDoesNotExist));
    }

    #[tokio::test]
    async fn test_remove_and_disable_require_unlock() {
        let broker = create_test_broker();
        let id = register(&broker, "test", json!({})).await;
        let token = broker
            .acquire(vec![ResourceRequest::new("test")], AcquisitionOptions::default())
            .await
            .unwrap();

        assert_eq!(broker.remove(&id).await, Err(Error::ResourceLocked));
        assert_eq!(broker.disable(&id).await, Err(Error::ResourceLocked));
        assert_eq!(state_of(&broker, &id).await, LockState::Locked);

        broker.release_by_token(&token.id).await.unwrap();
        assert_eq!(broker.disable(&id).await, Ok(()));
        assert_eq!(broker.remove(&id).await, Err(Error::ResourceLocked));
        assert_eq!(broker.enable(&id).await, Ok(()));
        assert_eq!(broker.remove(&id).await, Ok(()));
    }

    #[tokio::test]
    async fn test_disable_and_enable() {
        let broker = create_test_broker();
        let id = register(&broker, "test", json!({})).await;

        assert_eq!(broker.enable(&id).await, Err(Error::ResourceNotDisabled));

        assert_eq!(broker.disable(&id).await, Ok(()));
        assert_eq!(broker.disable(&id).await, Ok(()));
        assert_eq!(state_of(&broker, &id).await, LockState::Disabled);

        let error = broker
            .acquire(vec![ResourceRequest::new("test")], AcquisitionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::MissingResources(_)));

        assert_eq!(broker.enable(&id).await, Ok(()));
        assert_eq!(state_of(&broker, &id).await, LockState::Free);
        assert_eq!(broker.enable(&id).await, Err(Error::ResourceNotDisabled));

        assert_eq!(broker.disable("unknown").await, Err(Error::ResourceDoesNotExist));
        assert_eq!(broker.enable("unknown").await, Err(Error::ResourceDoesNotExist));
    }
}
