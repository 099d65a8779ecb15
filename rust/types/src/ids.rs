use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_wrapper {
    ($name:ident) => {
        #[derive(
            Copy, Clone, Debug, Default, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize,
        )]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                $name(Uuid::new_v4())
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map($name)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

/// Identifies a collection.
uuid_wrapper!(CollectionUuid);
/// Identifies a database.
uuid_wrapper!(DatabaseUuid);
/// Identifies a segment.
uuid_wrapper!(SegmentUuid);
/// Identifies an attached function.
uuid_wrapper!(AttachedFunctionUuid);
/// Identifies a function (operator definition).
uuid_wrapper!(FunctionUuid);
/// Identifies a task.
uuid_wrapper!(TaskUuid);

/// The canonical "smallest valid v7" UUID: timestamp zero, version 7, variant 10,
/// all random bits zero. Used as the initial `lowest_live_nonce` for a task and
/// as the nonce on its first heap schedule.
pub const MINIMAL_UUID_V7: Uuid = Uuid::from_bytes([
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x70, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_uuid_v7_has_expected_version_and_variant() {
        assert_eq!(MINIMAL_UUID_V7.get_version_num(), 7);
        assert_eq!(
            MINIMAL_UUID_V7.as_bytes(),
            &[0, 0, 0, 0, 0, 0, 0x70, 0, 0x80, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn collection_uuid_round_trips_through_string() {
        let id = CollectionUuid::new();
        let parsed: CollectionUuid = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
