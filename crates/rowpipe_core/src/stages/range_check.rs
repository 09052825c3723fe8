use rowpipe_error::{ErrorKind, RowpipeError, Result};

use crate::graph::StageDefinition;
use crate::row::Row;
use crate::stage::Stage;
use crate::worker::RowIo;

/// Error code attached to rows rejected by a range check.
pub const OUT_OF_RANGE_CODE: &str = "RANGE001";

/// Passes rows whose integer field lies within `[min, max]`.
///
/// Rows outside the range, or with a null value, are sent to error handling
/// when the stage has an error policy and fail the stage otherwise.
#[derive(Debug, Clone)]
pub struct RangeCheck {
    field: String,
    min: Option<i64>,
    max: Option<i64>,
}

impl RangeCheck {
    pub const KIND: &'static str = "range_check";

    pub fn new(field: impl Into<String>, min: Option<i64>, max: Option<i64>) -> Self {
        RangeCheck {
            field: field.into(),
            min,
            max,
        }
    }

    pub fn from_definition(def: &StageDefinition) -> Result<Self> {
        let invalid = |option: &'static str| {
            RowpipeError::new("Invalid stage option")
                .with_kind(ErrorKind::InvalidConfig)
                .with_field("stage", &def.name)
                .with_field("option", option)
        };

        let field = def.option_str("field").ok_or_else(|| invalid("field"))?;
        let bound = |option: &'static str| match def.option(option) {
            Some(_) => def.option_i64(option).map(Some).ok_or_else(|| invalid(option)),
            None => Ok(None),
        };

        Ok(Self::new(field, bound("min")?, bound("max")?))
    }

    fn in_range(&self, row: &Row) -> Result<bool> {
        let value = row.get(&self.field).ok_or_else(|| {
            RowpipeError::new("Missing field for range check").with_field("field", &self.field)
        })?;
        let Some(value) = value.try_as_i64()? else {
            return Ok(false);
        };
        Ok(self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max))
    }
}

impl Stage for RangeCheck {
    fn process_row(&mut self, io: &mut RowIo) -> Result<bool> {
        let Some(row) = io.get_row()? else {
            return Ok(false);
        };

        if self.in_range(&row)? {
            io.put_row(row)?;
        } else if io.definition().error_policy.is_some() {
            io.put_error_row(row, 1, "Value out of range", self.field.clone(), OUT_OF_RANGE_CODE)?;
        } else {
            return Err(RowpipeError::new("Value out of range").with_field("field", &self.field));
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::row::{DataType, Field, RowLayout, Value};

    #[test]
    fn range() {
        struct TestCase {
            value: Value,
            in_range: bool,
        }

        let check = RangeCheck::new("id", Some(0), Some(10));
        let layout = Arc::new(RowLayout::new([Field::new("id", DataType::Integer)]));

        let cases = [
            TestCase {
                value: Value::Integer(0),
                in_range: true,
            },
            TestCase {
                value: Value::Integer(10),
                in_range: true,
            },
            TestCase {
                value: Value::Integer(11),
                in_range: false,
            },
            TestCase {
                value: Value::Integer(-1),
                in_range: false,
            },
            TestCase {
                value: Value::Null,
                in_range: false,
            },
        ];

        for case in cases {
            let row = Row::try_new(layout.clone(), vec![case.value.clone()]).unwrap();
            assert_eq!(case.in_range, check.in_range(&row).unwrap(), "value: {:?}", case.value);
        }
    }

    #[test]
    fn requires_field() {
        let err = RangeCheck::from_definition(&StageDefinition::new("check", RangeCheck::KIND)).unwrap_err();
        assert_eq!(ErrorKind::InvalidConfig, err.kind());
    }
}
