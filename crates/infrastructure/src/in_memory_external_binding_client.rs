use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use grantwarden_application::{ExternalApiError, ExternalBindingClient};
use grantwarden_domain::{BindingRef, ResourceId, Subject};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredBinding {
    binding_ref: BindingRef,
    external_role_id: String,
}

/// In-memory stand-in for the external binding system.
///
/// Used by the worker when no external API is configured and by tests that
/// need to observe or inject drift.
#[derive(Debug, Default)]
pub struct InMemoryExternalBindingClient {
    bindings: RwLock<HashMap<(Subject, ResourceId), StoredBinding>>,
    next_id: AtomicU64,
}

impl InMemoryExternalBindingClient {
    /// Creates an empty binding system.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the external role bound for `subject` on `resource_id`, if any.
    pub async fn bound_role(&self, subject: &Subject, resource_id: &ResourceId) -> Option<String> {
        self.bindings
            .read()
            .await
            .get(&(subject.clone(), resource_id.clone()))
            .map(|binding| binding.external_role_id.clone())
    }

    /// Removes a binding behind the store's back.
    pub async fn remove_out_of_band(&self, subject: &Subject, resource_id: &ResourceId) -> bool {
        self.bindings
            .write()
            .await
            .remove(&(subject.clone(), resource_id.clone()))
            .is_some()
    }

    fn next_binding_ref(&self, resource_id: &ResourceId) -> Result<BindingRef, ExternalApiError> {
        let sequence = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        BindingRef::new(format!("{resource_id}/accessBindings/{sequence}"))
            .map_err(|error| ExternalApiError::transport(error.to_string()))
    }
}

#[async_trait]
impl ExternalBindingClient for InMemoryExternalBindingClient {
    async fn create(
        &self,
        resource_id: &ResourceId,
        subject: &Subject,
        external_role_id: &str,
    ) -> Result<BindingRef, ExternalApiError> {
        let mut bindings = self.bindings.write().await;
        let key = (subject.clone(), resource_id.clone());

        if bindings.contains_key(&key) {
            return Err(ExternalApiError::with_status(
                409,
                format!("'{subject}' already has a binding on '{resource_id}'"),
            ));
        }

        let binding_ref = self.next_binding_ref(resource_id)?;
        bindings.insert(
            key,
            StoredBinding {
                binding_ref: binding_ref.clone(),
                external_role_id: external_role_id.to_owned(),
            },
        );

        Ok(binding_ref)
    }

    async fn find(
        &self,
        subject: &Subject,
        resource_id: &ResourceId,
    ) -> Result<Option<BindingRef>, ExternalApiError> {
        Ok(self
            .bindings
            .read()
            .await
            .get(&(subject.clone(), resource_id.clone()))
            .map(|binding| binding.binding_ref.clone()))
    }

    async fn delete(&self, binding_ref: &BindingRef) -> Result<(), ExternalApiError> {
        let mut bindings = self.bindings.write().await;
        let before = bindings.len();
        bindings.retain(|_, binding| &binding.binding_ref != binding_ref);

        if bindings.len() == before {
            return Err(ExternalApiError::with_status(
                404,
                format!("binding '{binding_ref}' does not exist"),
            ));
        }

        Ok(())
    }
}
