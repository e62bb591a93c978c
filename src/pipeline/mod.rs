//! Shape checks and the validation state machine.

pub mod shape;
pub mod validator;
