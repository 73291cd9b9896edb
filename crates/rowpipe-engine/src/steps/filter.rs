//! Passes rows whose field compares true against a constant

use crate::error::{RowFormatError, StepError};
use crate::row::{Row, RowMeta, Value};
use crate::step::{BatchOutcome, Step, StepContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "=", alias = "eq")]
    Equal,
    #[serde(rename = "<>", alias = "ne")]
    NotEqual,
    #[serde(rename = "<", alias = "lt")]
    Less,
    #[serde(rename = "<=", alias = "le")]
    LessOrEqual,
    #[serde(rename = ">", alias = "gt")]
    Greater,
    #[serde(rename = ">=", alias = "ge")]
    GreaterOrEqual,
    #[serde(rename = "is_null")]
    IsNull,
    #[serde(rename = "is_not_null")]
    IsNotNull,
}

impl FilterOperator {
    fn needs_constant(&self) -> bool {
        !matches!(self, FilterOperator::IsNull | FilterOperator::IsNotNull)
    }

    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            FilterOperator::Equal => ordering == Ordering::Equal,
            FilterOperator::NotEqual => ordering != Ordering::Equal,
            FilterOperator::Less => ordering == Ordering::Less,
            FilterOperator::LessOrEqual => ordering != Ordering::Greater,
            FilterOperator::Greater => ordering == Ordering::Greater,
            FilterOperator::GreaterOrEqual => ordering != Ordering::Less,
            FilterOperator::IsNull | FilterOperator::IsNotNull => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub field: String,
    pub operator: FilterOperator,
    /// Constant in the text form of the field's type
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub send_true_to: Option<String>,
    #[serde(default)]
    pub send_false_to: Option<String>,
}

impl FilterConfig {
    pub fn validate(&self) -> Result<(), StepError> {
        if self.operator.needs_constant() && self.value.is_none() {
            return Err(StepError::Configuration(format!(
                "filter on '{}' needs a value to compare with",
                self.field
            )));
        }
        Ok(())
    }

    /// Steps that receive rows only through the true/false targets
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.send_true_to
            .as_deref()
            .into_iter()
            .chain(self.send_false_to.as_deref())
    }
}

/// Comparison prepared for one input layout
struct Condition {
    layout: Arc<RowMeta>,
    index: usize,
    constant: Value,
}

pub struct FilterStep {
    config: FilterConfig,
    condition: Option<Condition>,
}

impl FilterStep {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            condition: None,
        }
    }

    fn prepare(&mut self, meta: &Arc<RowMeta>) -> Result<(), StepError> {
        let stale = self
            .condition
            .as_ref()
            .is_none_or(|c| !Arc::ptr_eq(&c.layout, meta) && c.layout != *meta);
        if stale {
            let index = meta
                .index_of(&self.config.field)
                .ok_or_else(|| RowFormatError::MissingField(self.config.field.clone()))?;
            let field = &meta.fields()[index];
            let constant = match (&self.config.value, self.config.operator.needs_constant()) {
                (Some(text), true) => Value::parse(field.value_type, text).map_err(|reason| {
                    StepError::Configuration(format!("filter value for '{}': {reason}", field.name))
                })?,
                _ => Value::Null,
            };
            self.condition = Some(Condition {
                layout: meta.clone(),
                index,
                constant,
            });
        }
        Ok(())
    }

    fn matches(&mut self, row: &Row) -> Result<bool, StepError> {
        let operator = self.config.operator;
        self.prepare(row.meta())?;
        let condition = self
            .condition
            .as_ref()
            .ok_or_else(|| StepError::internal("filter condition not prepared"))?;
        let value = row
            .get(condition.index)
            .ok_or_else(|| RowFormatError::MissingField(self.config.field.clone()))?;

        match operator {
            FilterOperator::IsNull => return Ok(value.is_null()),
            FilterOperator::IsNotNull => return Ok(!value.is_null()),
            _ => {},
        }
        if value.is_null() {
            return Ok(false);
        }
        let ordering = value.compare(&condition.constant).ok_or_else(|| {
            let field = &row.meta().fields()[condition.index];
            RowFormatError::TypeMismatch {
                field: field.name.clone(),
                expected: field.value_type.to_string(),
                actual: value
                    .value_type()
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "null".into()),
            }
        })?;
        Ok(operator.holds(ordering))
    }
}

#[async_trait]
impl Step for FilterStep {
    fn kind(&self) -> &'static str {
        "filter"
    }

    async fn init(&mut self, _ctx: &mut StepContext) -> Result<(), StepError> {
        self.config.validate()
    }

    async fn process_one_batch(
        &mut self,
        ctx: &mut StepContext,
    ) -> Result<BatchOutcome, StepError> {
        let Some(row) = ctx.get_row().await? else {
            return Ok(BatchOutcome::Finished);
        };

        let keep = self.matches(&row)?;
        let chooses_targets = self.config.targets().next().is_some();
        let target = if keep {
            &self.config.send_true_to
        } else {
            &self.config.send_false_to
        };

        if !chooses_targets {
            if keep {
                ctx.put_row(row).await?;
            } else {
                ctx.result_mut().lines_rejected += 1;
            }
        } else if let Some(target) = target {
            ctx.put_row_to(target, row).await?;
        } else if !keep {
            ctx.result_mut().lines_rejected += 1;
        }
        // a true row with only a false target goes nowhere
        Ok(BatchOutcome::HasMore)
    }
}
