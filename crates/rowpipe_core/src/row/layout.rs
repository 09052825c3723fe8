use std::fmt;

use rowpipe_error::{ErrorKind, RowpipeError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Integer,
    Number,
    String,
    Date,
    Timestamp,
    Binary,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Boolean => "Boolean",
            Self::Integer => "Integer",
            Self::Number => "Number",
            Self::String => "String",
            Self::Date => "Date",
            Self::Timestamp => "Timestamp",
            Self::Binary => "Binary",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub datatype: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        Field {
            name: name.into(),
            datatype,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.datatype)
    }
}

/// Ordered description of the fields in a row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowLayout {
    pub fields: Vec<Field>,
}

impl RowLayout {
    pub fn new(fields: impl IntoIterator<Item = Field>) -> Self {
        RowLayout {
            fields: fields.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    /// Find the position of a field by name.
    ///
    /// An exact match is preferred, falling back to a case-insensitive match.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .or_else(|| {
                self.fields
                    .iter()
                    .position(|f| f.name.eq_ignore_ascii_case(name))
            })
    }

    /// Return a new layout with `other`'s fields appended.
    pub fn concat(&self, other: &RowLayout) -> RowLayout {
        let mut fields = self.fields.clone();
        fields.extend(other.fields.iter().cloned());
        RowLayout { fields }
    }

    /// Check that no two fields share a name (ignoring case).
    pub fn check_unique_names(&self) -> Result<()> {
        let mut names: Vec<String> = self
            .fields
            .iter()
            .map(|f| f.name.to_ascii_lowercase())
            .collect();
        names.sort_unstable();

        for pair in names.windows(2) {
            if pair[0] == pair[1] {
                return Err(RowpipeError::new("Duplicate field name in row layout")
                    .with_kind(ErrorKind::RowLayoutMismatch)
                    .with_field("field", &pair[0]));
            }
        }

        Ok(())
    }

    /// Structurally compare `other` against this layout.
    ///
    /// Field count, field name by position (case-insensitive) and field type
    /// by position must all match.
    pub fn check_matches(&self, other: &RowLayout) -> Result<()> {
        if self.len() != other.len() {
            return Err(
                RowpipeError::new("Row layouts have a different number of fields")
                    .with_kind(ErrorKind::RowLayoutMismatch)
                    .with_field("expected", self.len())
                    .with_field("got", other.len())
                    .with_field("layout", other),
            );
        }

        for (idx, (reference, compare)) in self.fields.iter().zip(&other.fields).enumerate() {
            if !reference.name.eq_ignore_ascii_case(&compare.name) {
                return Err(RowpipeError::new("Mixing rows with different field names")
                    .with_kind(ErrorKind::RowLayoutMismatch)
                    .with_field("position", idx + 1)
                    .with_field("expected", reference)
                    .with_field("got", compare));
            }

            if reference.datatype != compare.datatype {
                return Err(RowpipeError::new("Mixing rows with different field types")
                    .with_kind(ErrorKind::RowLayoutMismatch)
                    .with_field("position", idx + 1)
                    .with_field("expected", reference)
                    .with_field("got", compare));
            }
        }

        Ok(())
    }
}

impl fmt::Display for RowLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (idx, field) in self.fields.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{field}")?;
        }
        write!(f, "]")
    }
}
