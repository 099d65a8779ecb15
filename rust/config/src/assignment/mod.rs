pub mod assignment_policy;
pub mod config;
pub mod rendezvous_hash;
use crate::{registry::Registry, Configurable};

use self::{assignment_policy::AssignmentPolicy, config::AssignmentPolicyConfig};
use taskctl_error::ChromaError;

pub async fn from_config(
    config: &AssignmentPolicyConfig,
    registry: &Registry,
) -> Result<Box<dyn AssignmentPolicy>, Box<dyn ChromaError>> {
    match &config {
        crate::assignment::config::AssignmentPolicyConfig::RendezvousHashing(_) => Ok(Box::new(
            assignment_policy::RendezvousHashingAssignmentPolicy::try_from_config(
                config, registry,
            )
            .await?,
        )),
    }
}
