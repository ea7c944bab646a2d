//! Descriptors for the output of a stage in a query plan.
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use rowsieve_error::{DbError, Result};

use crate::arrays::datatype::DataType;

/// Set of column names for which every row of a stream is known to be
/// mutually distinct.
///
/// Cheap to clone. There's no mutating API, stages that change the guarantee
/// replace the set on a new descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DistinctColumns(Arc<BTreeSet<String>>);

impl DistinctColumns {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    /// Returns true if every column in `columns` is in this set.
    pub fn contains_all<S: AsRef<str>>(&self, columns: impl IntoIterator<Item = S>) -> bool {
        columns.into_iter().all(|c| self.0.contains(c.as_ref()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|s| s.as_str())
    }
}

impl<S: Into<String>> FromIterator<S> for DistinctColumns {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        DistinctColumns(Arc::new(iter.into_iter().map(Into::into).collect()))
    }
}

impl fmt::Display for DistinctColumns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (idx, name) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}")?;
        }
        write!(f, "]")
    }
}

/// Describes the output of a plan stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    names: Vec<String>,
    datatypes: Vec<DataType>,
    distinct_columns: DistinctColumns,
    partitions: usize,
}

impl StreamDescriptor {
    pub fn try_new<S: Into<String>>(
        columns: impl IntoIterator<Item = (S, DataType)>,
        partitions: usize,
    ) -> Result<Self> {
        if partitions == 0 {
            return Err(DbError::new("Stream must have at least one partition"));
        }

        let (names, datatypes): (Vec<String>, Vec<DataType>) = columns
            .into_iter()
            .map(|(name, datatype)| (name.into(), datatype))
            .unzip();

        for (idx, name) in names.iter().enumerate() {
            if names[..idx].contains(name) {
                return Err(DbError::new(format!("Duplicate column name '{name}'")));
            }
        }

        Ok(StreamDescriptor {
            names,
            datatypes,
            distinct_columns: DistinctColumns::empty(),
            partitions,
        })
    }

    /// Return a copy of this descriptor with the distinct columns replaced.
    pub fn with_distinct_columns(&self, distinct_columns: DistinctColumns) -> Self {
        StreamDescriptor {
            distinct_columns,
            ..self.clone()
        }
    }

    /// Return a copy of this descriptor with a different partition count.
    pub fn with_partitions(&self, partitions: usize) -> Self {
        StreamDescriptor {
            partitions,
            ..self.clone()
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn datatypes(&self) -> &[DataType] {
        &self.datatypes
    }

    pub fn distinct_columns(&self) -> &DistinctColumns {
        &self.distinct_columns
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    pub fn has_single_partition(&self) -> bool {
        self.partitions == 1
    }

    pub fn num_columns(&self) -> usize {
        self.names.len()
    }

    /// Get the index of a column by name.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| DbError::new(format!("Missing column '{name}'")))
    }
}
