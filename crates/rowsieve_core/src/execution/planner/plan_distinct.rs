use std::collections::BTreeSet;

use rowsieve_error::{DbError, Result};
use tracing::debug;

use super::{SortPrefix, StreamTraits};
use crate::execution::operators::distinct::size_limits::SizeLimits;
use crate::execution::operators::distinct::{DistinctStrategy, PhysicalDistinct};
use crate::execution::pipeline::PipelineBuilder;
use crate::execution::stream::{DistinctColumns, StreamDescriptor};
use crate::explain::explainable::{ExplainConfig, ExplainEntry, Explainable};

/// What the distinct step does at execution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistinctPlan {
    /// Input is already distinct on the requested columns, nothing to do.
    PassThrough,
    /// Add a distinct operator using the given strategy.
    Operator(DistinctStrategy),
}

/// Plan step removing duplicate rows.
///
/// Decides at build time whether any work is needed, and if so which
/// strategy to use. A pre-distinct step runs on every lane independently and
/// only reduces the amount of data flowing to a later final step. A final
/// step runs on a single lane and produces the globally distinct result.
#[derive(Debug, Clone)]
pub struct DistinctStep {
    input: StreamDescriptor,
    output: StreamDescriptor,
    /// Names of the distinct columns, ordered by column index.
    columns: Vec<String>,
    /// Indices of the distinct columns, sorted ascending.
    column_indices: Vec<usize>,
    limits: SizeLimits,
    limit_hint: Option<usize>,
    pre_distinct: bool,
    sort_prefix: Option<SortPrefix>,
    plan: DistinctPlan,
}

impl DistinctStep {
    /// Plan a distinct over `columns` of `input`.
    ///
    /// No columns means every column of the input. A limit hint of zero means
    /// no hint.
    pub fn try_new<S: AsRef<str>>(
        input: StreamDescriptor,
        limits: SizeLimits,
        limit_hint: Option<usize>,
        columns: impl IntoIterator<Item = S>,
        pre_distinct: bool,
        sort_prefix: Option<SortPrefix>,
    ) -> Result<Self> {
        let mut indices = BTreeSet::new();
        for name in columns {
            indices.insert(input.column_index(name.as_ref())?);
        }
        if indices.is_empty() {
            indices.extend(0..input.num_columns());
        }
        let column_indices: Vec<usize> = indices.into_iter().collect();
        let columns: Vec<String> = column_indices
            .iter()
            .map(|&idx| input.names()[idx].clone())
            .collect();

        let limit_hint = limit_hint.filter(|&hint| hint > 0);

        if input.distinct_columns().contains_all(&columns) {
            debug!(
                columns = ?columns,
                input_distinct = %input.distinct_columns(),
                "input already distinct, skipping distinct",
            );

            return Ok(DistinctStep {
                output: input.clone(),
                input,
                columns,
                column_indices,
                limits,
                limit_hint,
                pre_distinct,
                sort_prefix,
                plan: DistinctPlan::PassThrough,
            });
        }

        // Collapsing lanes interleaves their batches, so a sort order only
        // holds for the operator's input when no collapse is added.
        let order_preserved = pre_distinct || input.has_single_partition();
        let prefix_columns = match &sort_prefix {
            Some(sort_prefix) if order_preserved => {
                sorted_distinct_prefix(&input, sort_prefix, &column_indices)
            }
            _ => Vec::new(),
        };
        let strategy = if prefix_columns.is_empty() {
            DistinctStrategy::Hash
        } else {
            let remaining_columns = column_indices
                .iter()
                .copied()
                .filter(|idx| !prefix_columns.contains(idx))
                .collect();
            DistinctStrategy::SortedPrefix {
                prefix_columns,
                remaining_columns,
            }
        };

        // A pre-distinct over multiple lanes only removes duplicates within a
        // lane, so the output can't claim to be distinct.
        let output_distinct = if !pre_distinct || input.has_single_partition() {
            columns.iter().collect::<DistinctColumns>()
        } else {
            DistinctColumns::empty()
        };
        let mut output = input.with_distinct_columns(output_distinct);
        if !pre_distinct {
            output = output.with_partitions(1);
        }

        debug!(
            columns = ?columns,
            strategy = strategy.name(),
            pre_distinct,
            limit_hint = ?limit_hint,
            limits = %limits,
            output_distinct = %output.distinct_columns(),
            "planned distinct",
        );

        Ok(DistinctStep {
            input,
            output,
            columns,
            column_indices,
            limits,
            limit_hint,
            pre_distinct,
            sort_prefix,
            plan: DistinctPlan::Operator(strategy),
        })
    }

    pub fn input(&self) -> &StreamDescriptor {
        &self.input
    }

    pub fn output(&self) -> &StreamDescriptor {
        &self.output
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn plan(&self) -> &DistinctPlan {
        &self.plan
    }

    pub fn limit_hint(&self) -> Option<usize> {
        self.limit_hint
    }

    /// Sort order of the input, if known.
    pub fn sort_prefix(&self) -> Option<&SortPrefix> {
        self.sort_prefix.as_ref()
    }

    pub fn is_pass_through(&self) -> bool {
        self.plan == DistinctPlan::PassThrough
    }

    /// If the operator must run on a single lane to produce a correct result.
    pub fn requires_single_partition(&self) -> bool {
        !self.pre_distinct && !self.is_pass_through()
    }

    pub fn traits(&self) -> StreamTraits {
        let pass_through = self.is_pass_through();
        StreamTraits {
            preserves_distinct_columns: pass_through,
            returns_single_partition: !self.pre_distinct && !pass_through,
            preserves_number_of_partitions: self.pre_distinct || pass_through,
        }
    }

    /// Create the physical operator for this step.
    ///
    /// Returns `None` when the step passes its input through untouched.
    pub fn physical_operator(&self) -> Result<Option<PhysicalDistinct>> {
        let strategy = match &self.plan {
            DistinctPlan::PassThrough => return Ok(None),
            DistinctPlan::Operator(strategy) => strategy.clone(),
        };

        let operator = PhysicalDistinct::try_new(
            self.input.datatypes().to_vec(),
            self.column_indices.clone(),
            strategy,
            self.limits,
            self.limit_hint,
            self.requires_single_partition(),
        )?;

        Ok(Some(operator))
    }

    /// Add this step's operator to the pipeline.
    ///
    /// A final step collapses the pipeline to a single lane first.
    pub fn transform_pipeline(&self, builder: &mut PipelineBuilder) -> Result<()> {
        if builder.partitions() != self.input.partitions() {
            return Err(
                DbError::new("Pipeline partitions don't match distinct input")
                    .with_field("pipeline", builder.partitions())
                    .with_field("input", self.input.partitions()),
            );
        }

        let operator = match self.physical_operator()? {
            Some(operator) => operator,
            None => return Ok(()),
        };

        if self.requires_single_partition() && builder.partitions() > 1 {
            builder.collapse_to_single_partition()?;
        }
        builder.push_operator(operator)
    }
}

/// Find the longest leading run of the sort prefix made up of distinct
/// columns.
///
/// Stops at the first name that isn't a column of the input.
fn sorted_distinct_prefix(
    input: &StreamDescriptor,
    sort_prefix: &SortPrefix,
    column_indices: &[usize],
) -> Vec<usize> {
    let mut prefix = Vec::new();
    for name in sort_prefix.columns() {
        let idx = match input.names().iter().position(|col| col == name) {
            Some(idx) if column_indices.contains(&idx) => idx,
            _ => break,
        };
        if !prefix.contains(&idx) {
            prefix.push(idx);
        }
    }
    prefix
}

impl Explainable for DistinctStep {
    fn explain_entry(&self, conf: ExplainConfig) -> ExplainEntry {
        let strategy = match &self.plan {
            DistinctPlan::PassThrough => "pass_through",
            DistinctPlan::Operator(strategy) => strategy.name(),
        };

        let mut ent = ExplainEntry::new("Distinct")
            .with_values("columns", &self.columns)
            .with_value("strategy", strategy)
            .with_value("pre_distinct", self.pre_distinct);

        if let DistinctPlan::Operator(DistinctStrategy::SortedPrefix { prefix_columns, .. }) =
            &self.plan
        {
            ent = ent.with_values(
                "sort_prefix",
                prefix_columns.iter().map(|&idx| &self.input.names()[idx]),
            );
        }
        if let Some(hint) = self.limit_hint {
            ent = ent.with_value("limit_hint", hint);
        }
        if conf.verbose || self.limits.has_limits() {
            ent = ent.with_value("limits", self.limits);
        }

        ent
    }
}
