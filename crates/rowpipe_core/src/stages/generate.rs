use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rowpipe_error::{ErrorKind, RowpipeError, Result};

use crate::graph::StageDefinition;
use crate::row::{DataType, Field, Row, RowLayout, Value};
use crate::stage::Stage;
use crate::worker::RowIo;

/// Emits `count` rows with a single increasing integer field.
///
/// Options:
/// - `count`: number of rows to emit per copy.
/// - `start`: first value, defaults to 1.
/// - `field`: name of the generated field, defaults to `id`.
/// - `delay_ms`: pause between rows, defaults to 0.
#[derive(Debug)]
pub struct GenerateRows {
    layout: Arc<RowLayout>,
    next: i64,
    remaining: u64,
    delay: Option<Duration>,
}

impl GenerateRows {
    pub const KIND: &'static str = "generate";

    pub fn new(field: impl Into<String>, start: i64, count: u64) -> Self {
        GenerateRows {
            layout: Arc::new(RowLayout::new([Field::new(field, DataType::Integer)])),
            next: start,
            remaining: count,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay).filter(|d| !d.is_zero());
        self
    }

    pub fn from_definition(def: &StageDefinition, _copy: usize) -> Result<Self> {
        let non_negative = |key: &'static str, default: i64| -> Result<u64> {
            let value = match def.option(key) {
                Some(_) => def.option_i64(key).ok_or_else(|| invalid_option(def, key))?,
                None => default,
            };
            u64::try_from(value).map_err(|_| invalid_option(def, key))
        };

        let count = non_negative("count", 0)?;
        let delay = non_negative("delay_ms", 0)?;
        let start = match def.option("start") {
            Some(_) => def.option_i64("start").ok_or_else(|| invalid_option(def, "start"))?,
            None => 1,
        };
        let field = def.option_str("field").unwrap_or("id");

        Ok(Self::new(field, start, count).with_delay(Duration::from_millis(delay)))
    }
}

fn invalid_option(def: &StageDefinition, key: &'static str) -> RowpipeError {
    RowpipeError::new("Invalid stage option")
        .with_kind(ErrorKind::InvalidConfig)
        .with_field("stage", &def.name)
        .with_field("option", key)
}

impl Stage for GenerateRows {
    fn process_row(&mut self, io: &mut RowIo) -> Result<bool> {
        if self.remaining == 0 {
            return Ok(false);
        }
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }

        let row = Row::try_new(self.layout.clone(), vec![Value::Integer(self.next)])?;
        io.increment_lines_input();
        io.put_row(row)?;

        self.next += 1;
        self.remaining -= 1;
        Ok(self.remaining > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options() {
        let def = StageDefinition::new("gen", GenerateRows::KIND)
            .with_option("count", 3)
            .with_option("start", 10)
            .with_option("field", "seq");
        let generate = GenerateRows::from_definition(&def, 0).unwrap();
        assert_eq!(3, generate.remaining);
        assert_eq!(10, generate.next);
        assert_eq!(Some(0), generate.layout.index_of("seq"));
        assert!(generate.delay.is_none());
    }

    #[test]
    fn invalid_options() {
        for (key, value) in [
            ("count", serde_json::json!(-1)),
            ("count", serde_json::json!("many")),
            ("start", serde_json::json!(1.5)),
        ] {
            let def = StageDefinition::new("gen", GenerateRows::KIND).with_option(key, value);
            let err = GenerateRows::from_definition(&def, 0).unwrap_err();
            assert_eq!(ErrorKind::InvalidConfig, err.kind(), "option: {key}");
        }
    }
}
