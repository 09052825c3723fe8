pub mod layout;
pub mod value;

#[allow(clippy::module_inception)]
mod row;

pub use layout::{DataType, Field, RowLayout};
pub use row::Row;
pub use value::Value;
