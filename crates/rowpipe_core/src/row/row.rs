use std::fmt;
use std::sync::Arc;

use rowpipe_error::{RowpipeError, Result};

use super::layout::RowLayout;
use super::value::Value;

/// A fixed-arity tuple of values along with its layout.
///
/// The layout is shared, so cloning a row only deep copies its values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    layout: Arc<RowLayout>,
    values: Vec<Value>,
}

impl Row {
    /// Create a new row, checking that the number of values matches the
    /// layout.
    pub fn try_new(layout: Arc<RowLayout>, values: Vec<Value>) -> Result<Self> {
        if layout.len() != values.len() {
            return Err(RowpipeError::new("Row arity does not match row layout")
                .with_field("layout_fields", layout.len())
                .with_field("values", values.len()));
        }
        Ok(Row { layout, values })
    }

    pub fn layout(&self) -> &Arc<RowLayout> {
        &self.layout
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Get a value by field name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.layout.index_of(name).and_then(|idx| self.values.get(idx))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_parts(self) -> (Arc<RowLayout>, Vec<Value>) {
        (self.layout, self.values)
    }

    /// Extend this row with extra values, switching to `layout` which must
    /// describe the existing fields followed by the extra ones.
    pub fn extend(self, layout: Arc<RowLayout>, extra: impl IntoIterator<Item = Value>) -> Result<Row> {
        let mut values = self.values;
        values.extend(extra);
        Row::try_new(layout, values)
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (idx, value) in self.values.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{value}")?;
        }
        write!(f, ")")
    }
}
