//! Collectors list the actual state of one resource type.

use async_trait::async_trait;

use crate::config::Configuration;
use crate::remote::RemoteError;
use crate::resource::{Resource, ResourceType};
use crate::selector::Selectors;

/// Trait for listing the actual state of a resource type.
#[async_trait]
pub trait Collector: Send + Sync {
    /// The type this collector lists.
    fn resource_type(&self) -> &ResourceType;

    /// List the resources present on the remote system.
    ///
    /// `selectors` is a hint: collectors may use it to narrow the remote
    /// query, and the controller filters the result again regardless.
    /// Implementations must not mutate remote state.
    async fn list(
        &self,
        configuration: &Configuration,
        selectors: &Selectors,
    ) -> Result<Vec<Resource>, RemoteError>;
}
