use std::collections::HashMap;
use std::sync::LazyLock;

use rowsieve_error::{DbError, Result};

use crate::arrays::scalar::ScalarValue;
use crate::execution::operators::distinct::size_limits::{OverflowMode, SizeLimits};
use crate::runtime::pipeline::PipelineRuntime;

/// Configuration for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub partitions: u64,
    pub batch_size: u64,
    /// Zero indicates no limit.
    pub max_rows_in_distinct: u64,
    /// Zero indicates no limit.
    pub max_bytes_in_distinct: u64,
    pub distinct_overflow_mode: OverflowMode,
}

impl SessionConfig {
    pub fn new<P>(executor: &P) -> Self
    where
        P: PipelineRuntime,
    {
        SessionConfig {
            partitions: executor.default_partitions() as u64,
            batch_size: DEFAULT_BATCH_SIZE as u64,
            max_rows_in_distinct: 0,
            max_bytes_in_distinct: 0,
            distinct_overflow_mode: OverflowMode::Strict,
        }
    }

    pub fn set_from_scalar(&mut self, name: &str, value: ScalarValue) -> Result<()> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::new(format!("Missing setting for '{name}'")))?;

        (func.set)(value, self)
    }

    pub fn get_as_scalar(&self, name: &str) -> Result<ScalarValue> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::new(format!("Missing setting for '{name}'")))?;

        let val = (func.get)(self);
        Ok(val)
    }

    pub fn reset<P>(&mut self, name: &str, executor: &P) -> Result<()>
    where
        P: PipelineRuntime,
    {
        let def_conf = Self::new(executor);

        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::new(format!("Missing setting for '{name}'")))?;

        let scalar = (func.get)(&def_conf);
        (func.set)(scalar, self)
    }

    pub fn reset_all<P>(&mut self, executor: &P)
    where
        P: PipelineRuntime,
    {
        *self = Self::new(executor);
    }

    /// Every setting with its description and current value, ordered by
    /// name.
    pub fn list_settings(&self) -> Vec<SettingEntry> {
        let mut entries: Vec<_> = GET_SET_FUNCTIONS
            .iter()
            .map(|(&name, func)| SettingEntry {
                name,
                description: func.description,
                value: (func.get)(self),
            })
            .collect();
        entries.sort_by_key(|ent| ent.name);
        entries
    }

    /// Size limits to use for distinct sets.
    pub fn distinct_size_limits(&self) -> SizeLimits {
        let as_limit = |v: u64| if v == 0 { None } else { Some(v as usize) };

        SizeLimits {
            max_rows: as_limit(self.max_rows_in_distinct),
            max_bytes: as_limit(self.max_bytes_in_distinct),
            overflow_mode: self.distinct_overflow_mode,
        }
    }
}

/// A session setting as reported by `SessionConfig::list_settings`.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub value: ScalarValue,
}

struct SettingFunctions {
    description: &'static str,
    set: fn(scalar: ScalarValue, conf: &mut SessionConfig) -> Result<()>,
    get: fn(conf: &SessionConfig) -> ScalarValue,
}

impl SettingFunctions {
    const fn new<S: SessionSetting>() -> Self {
        SettingFunctions {
            description: S::DESCRIPTION,
            set: S::set_from_scalar as _,
            get: S::get_as_scalar as _,
        }
    }
}

fn insert_setting<S: SessionSetting>(map: &mut HashMap<&'static str, SettingFunctions>) {
    if map.insert(S::NAME, SettingFunctions::new::<S>()).is_some() {
        panic!("Duplicate settings names: {}", S::NAME);
    }
}

static GET_SET_FUNCTIONS: LazyLock<HashMap<&'static str, SettingFunctions>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    insert_setting::<Partitions>(&mut map);
    insert_setting::<BatchSize>(&mut map);
    insert_setting::<MaxRowsInDistinct>(&mut map);
    insert_setting::<MaxBytesInDistinct>(&mut map);
    insert_setting::<DistinctOverflowMode>(&mut map);

    map
});

pub trait SessionSetting: Sync + Send + 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn set_from_scalar(scalar: ScalarValue, conf: &mut SessionConfig) -> Result<()>;
    fn get_as_scalar(conf: &SessionConfig) -> ScalarValue;
}

const MIN_PARTITION_COUNT: usize = 1;
const MAX_PARTITION_COUNT: usize = 512;

pub struct Partitions;

impl Partitions {
    pub fn validate_value(val: usize) -> Result<()> {
        if val < MIN_PARTITION_COUNT {
            return Err(DbError::new(format!(
                "Partition count cannot be less than {MIN_PARTITION_COUNT}"
            )));
        }

        if val > MAX_PARTITION_COUNT {
            return Err(DbError::new(format!(
                "Partition count cannot be greater than {MAX_PARTITION_COUNT}"
            )));
        }

        Ok(())
    }
}

impl SessionSetting for Partitions {
    const NAME: &'static str = "partitions";
    const DESCRIPTION: &'static str = "Number of partitions to use during execution";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut SessionConfig) -> Result<()> {
        let val = scalar.try_as_usize()?;
        Self::validate_value(val)?;

        conf.partitions = val as u64;
        Ok(())
    }

    fn get_as_scalar(conf: &SessionConfig) -> ScalarValue {
        conf.partitions.into()
    }
}

pub const DEFAULT_BATCH_SIZE: usize = 2048;

const MIN_BATCH_SIZE: usize = 1;
const MAX_BATCH_SIZE: usize = 8192;

pub struct BatchSize;

impl SessionSetting for BatchSize {
    const NAME: &'static str = "batch_size";
    const DESCRIPTION: &'static str = "Desired number of rows in a batch";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut SessionConfig) -> Result<()> {
        let val = scalar.try_as_usize()?;

        if val < MIN_BATCH_SIZE {
            return Err(DbError::new(format!(
                "Batch size cannot be less than {MIN_BATCH_SIZE}"
            )));
        }

        if val > MAX_BATCH_SIZE {
            return Err(DbError::new(format!(
                "Batch size cannot be greater than {MAX_BATCH_SIZE}"
            )));
        }

        conf.batch_size = val as u64;
        Ok(())
    }

    fn get_as_scalar(conf: &SessionConfig) -> ScalarValue {
        conf.batch_size.into()
    }
}

pub struct MaxRowsInDistinct;

impl SessionSetting for MaxRowsInDistinct {
    const NAME: &'static str = "max_rows_in_distinct";
    const DESCRIPTION: &'static str =
        "Maximum number of rows a distinct set may hold, zero for unlimited";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut SessionConfig) -> Result<()> {
        let val = scalar.try_as_usize()?;
        conf.max_rows_in_distinct = val as u64;
        Ok(())
    }

    fn get_as_scalar(conf: &SessionConfig) -> ScalarValue {
        conf.max_rows_in_distinct.into()
    }
}

pub struct MaxBytesInDistinct;

impl SessionSetting for MaxBytesInDistinct {
    const NAME: &'static str = "max_bytes_in_distinct";
    const DESCRIPTION: &'static str =
        "Maximum estimated bytes a distinct set may hold, zero for unlimited";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut SessionConfig) -> Result<()> {
        let val = scalar.try_as_usize()?;
        conf.max_bytes_in_distinct = val as u64;
        Ok(())
    }

    fn get_as_scalar(conf: &SessionConfig) -> ScalarValue {
        conf.max_bytes_in_distinct.into()
    }
}

pub struct DistinctOverflowMode;

impl SessionSetting for DistinctOverflowMode {
    const NAME: &'static str = "distinct_overflow_mode";
    const DESCRIPTION: &'static str =
        "What to do when a distinct set exceeds its limits, 'strict' or 'passthrough'";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut SessionConfig) -> Result<()> {
        let mode = scalar.try_as_str()?.parse()?;
        conf.distinct_overflow_mode = mode;
        Ok(())
    }

    fn get_as_scalar(conf: &SessionConfig) -> ScalarValue {
        conf.distinct_overflow_mode.to_string().into()
    }
}
