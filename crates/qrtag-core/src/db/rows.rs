//! Row decoding helpers shared by the repositories

use libsql::{Row, Value};

use crate::error::{Error, Result};

pub fn flag(row: &Row, idx: i32) -> Result<bool> {
    Ok(row.get::<i64>(idx)? != 0)
}

pub fn optional_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Text(text) => Ok(Some(text)),
        other => Err(Error::Database(format!(
            "expected text in column {idx}, found {other:?}"
        ))),
    }
}

pub fn text_or_null(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |text| Value::Text(text.to_string()))
}

pub fn count(row: &Row, idx: i32) -> Result<u64> {
    let value = row.get::<i64>(idx)?;
    u64::try_from(value).map_err(|_| Error::Database(format!("negative count {value}")))
}
