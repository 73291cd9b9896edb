//! Emits a fixed number of rows built from constants

use crate::error::StepError;
use crate::row::{Row, RowMeta, Value, ValueMeta, ValueType};
use crate::step::{BatchOutcome, Step, StepContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorField {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// Text form of the constant; absent means null
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default = "unset")]
    pub length: i32,
    #[serde(default = "unset")]
    pub precision: i32,
}

fn unset() -> i32 {
    -1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub limit: u64,
    #[serde(default)]
    pub fields: Vec<GeneratorField>,
    /// Integer field holding the 1-based row number, appended last
    #[serde(default)]
    pub sequence_field: Option<String>,
}

impl GeneratorConfig {
    /// Layout and constant values of every generated row.
    pub fn layout(&self) -> Result<(RowMeta, Vec<Value>), StepError> {
        let mut fields = Vec::with_capacity(self.fields.len() + 1);
        let mut values = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = match &field.value {
                None => Value::Null,
                Some(text) => Value::parse(field.value_type, text).map_err(|reason| {
                    StepError::Configuration(format!("field '{}': {reason}", field.name))
                })?,
            };
            fields.push(
                ValueMeta::new(&field.name, field.value_type)
                    .with_length(field.length, field.precision),
            );
            values.push(value);
        }
        if let Some(name) = &self.sequence_field {
            fields.push(ValueMeta::new(name, ValueType::Integer));
        }
        Ok((RowMeta::new(fields), values))
    }
}

pub struct GeneratorStep {
    config: GeneratorConfig,
    meta: Arc<RowMeta>,
    constants: Vec<Value>,
    emitted: u64,
}

impl GeneratorStep {
    pub fn new(config: GeneratorConfig) -> Self {
        Self {
            config,
            meta: Arc::new(RowMeta::default()),
            constants: Vec::new(),
            emitted: 0,
        }
    }
}

#[async_trait]
impl Step for GeneratorStep {
    fn kind(&self) -> &'static str {
        "generator"
    }

    async fn init(&mut self, _ctx: &mut StepContext) -> Result<(), StepError> {
        let (meta, constants) = self.config.layout()?;
        self.meta = Arc::new(meta);
        self.constants = constants;
        Ok(())
    }

    async fn process_one_batch(
        &mut self,
        ctx: &mut StepContext,
    ) -> Result<BatchOutcome, StepError> {
        let batch = ctx.batch_size() as u64;
        let end = self.config.limit.min(self.emitted.saturating_add(batch));
        while self.emitted < end {
            let mut values = self.constants.clone();
            if self.config.sequence_field.is_some() {
                values.push(Value::Integer((self.emitted + 1) as i64));
            }
            ctx.put_row(Row::new(self.meta.clone(), values)?).await?;
            self.emitted += 1;
        }

        if self.emitted >= self.config.limit {
            Ok(BatchOutcome::Finished)
        } else {
            Ok(BatchOutcome::HasMore)
        }
    }
}
