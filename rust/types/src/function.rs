use crate::FunctionUuid;

/// A function is a named, built-in compute operator that an attached function
/// or task binds to. Functions themselves are not created by this coordinator;
/// they are resolved by name during `Attach`/`CreateTask`.
#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub id: FunctionUuid,
    pub name: String,
}
