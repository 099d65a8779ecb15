use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
/// The type of hasher to use.
/// # Options
/// - Murmur3: The murmur3 hasher.
pub enum HasherType {
    Murmur3,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
/// The configuration for the assignment policy.
/// # Options
/// - RendezvousHashing: The rendezvous hashing assignment policy.
pub enum AssignmentPolicyConfig {
    RendezvousHashing(RendezvousHashingAssignmentPolicyConfig),
}

impl Default for AssignmentPolicyConfig {
    fn default() -> Self {
        AssignmentPolicyConfig::RendezvousHashing(RendezvousHashingAssignmentPolicyConfig {
            hasher: HasherType::Murmur3,
        })
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
/// The configuration for the rendezvous hashing assignment policy.
/// # Fields
/// - hasher: The type of hasher to use.
pub struct RendezvousHashingAssignmentPolicyConfig {
    pub hasher: HasherType,
}
