use crate::DatabaseUuid;

#[derive(Clone, Debug, PartialEq)]
pub struct Database {
    pub id: DatabaseUuid,
    pub name: String,
    pub tenant: String,
}
