//! Build-time planning of query steps.

pub mod plan_distinct;

use std::fmt;

/// Ordered list of column names the stream is sorted by.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SortPrefix {
    columns: Vec<String>,
}

impl SortPrefix {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        SortPrefix {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl fmt::Display for SortPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.columns.join(", "))
    }
}

/// How a step changes the shape of the stream it reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamTraits {
    /// Distinct columns of the input hold for the output.
    pub preserves_distinct_columns: bool,
    /// Output is a single lane.
    pub returns_single_partition: bool,
    /// Output has the same number of lanes as the input.
    pub preserves_number_of_partitions: bool,
}
