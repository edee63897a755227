//! Record conversion
//!
//! Converts JSON record values into Arrow columns matching a table's
//! schema, including nested list, map, and struct columns. Conversion is
//! idempotent for already-correctly-typed inputs and lenient about the
//! usual wire representations: ISO-8601 timestamp variants with `T` or
//! space separators and `Z`/`+00`/`+00:00`/`+0000` offsets, epoch-millis
//! integers, string decimals and UUIDs, base64 bytes. A JSON object or
//! array aimed at a string column is stored as its JSON text.

use crate::error::{DataError, DataResult};
use arrow_array::builder::FixedSizeBinaryBuilder;
use arrow_array::{
    ArrayRef, BooleanArray, Date32Array, Decimal128Array, Float32Array, Float64Array, Int32Array,
    Int64Array, LargeBinaryArray, ListArray, MapArray, RecordBatch, StringArray, StructArray,
    Time64MicrosecondArray, TimestampMicrosecondArray,
};
use arrow_buffer::{NullBuffer, OffsetBuffer};
use arrow_schema::DataType;
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use iceberg::arrow::schema_to_arrow_schema;
use iceberg::spec::{ListType, MapType, NestedField, PrimitiveType, Schema as IcebergSchema, StructType, Type};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

/// Converts record values into Arrow batches for one table schema
pub struct RecordConverter {
    schema: Arc<IcebergSchema>,
    arrow_schema: Arc<arrow_schema::Schema>,
}

impl RecordConverter {
    pub fn new(schema: Arc<IcebergSchema>) -> DataResult<Self> {
        let arrow_schema = schema_to_arrow_schema(schema.as_ref())
            .map_err(|e| DataError::Schema(format!("schema to arrow: {e}")))?;
        Ok(Self {
            schema,
            arrow_schema: Arc::new(arrow_schema),
        })
    }

    /// Check one record value without materializing arrays, so conversion
    /// errors surface on the record that caused them.
    pub fn validate_row(&self, row: &JsonValue) -> DataResult<()> {
        if !row.is_object() {
            return Err(DataError::conversion("record value is not an object"));
        }
        for field in self.schema.as_struct().fields() {
            let value = row.get(field.name.as_str()).filter(|v| !v.is_null());
            match value {
                None if field.required => {
                    return Err(DataError::conversion(format!(
                        "missing required field {}",
                        field.name
                    )));
                }
                None => {}
                Some(value) => {
                    check_value(&field.name, field.field_type.as_ref(), value)?;
                }
            }
        }
        Ok(())
    }

    /// Convert buffered rows into one Arrow batch.
    pub fn convert_batch(&self, rows: &[JsonValue]) -> DataResult<RecordBatch> {
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.arrow_schema.fields().len());
        for (index, field) in self.schema.as_struct().fields().iter().enumerate() {
            columns.push(self.build_column(index, field, rows)?);
        }
        RecordBatch::try_new(self.arrow_schema.clone(), columns)
            .map_err(|e| DataError::conversion(format!("arrow batch: {e}")))
    }

    fn build_column(
        &self,
        index: usize,
        field: &NestedField,
        rows: &[JsonValue],
    ) -> DataResult<ArrayRef> {
        let name = field.name.as_str();
        let values: Vec<Option<&JsonValue>> = rows
            .iter()
            .map(|row| row.get(name).filter(|v| !v.is_null()))
            .collect();

        if field.required && values.iter().any(Option::is_none) {
            return Err(DataError::conversion(format!(
                "missing required field {name}"
            )));
        }

        let arrow_field = self.arrow_schema.field(index);
        build_array(
            name,
            field.field_type.as_ref(),
            arrow_field.data_type(),
            &values,
        )
    }
}

// ============================================================================
// Value checks (per-record, array-free)
// ============================================================================

fn check_value(name: &str, ty: &Type, value: &JsonValue) -> DataResult<()> {
    match ty {
        Type::Primitive(primitive) => check_primitive(name, primitive, value),
        Type::Struct(struct_type) => check_struct(name, struct_type, value),
        Type::List(list_type) => check_list(name, list_type, value),
        Type::Map(map_type) => check_map(name, map_type, value),
    }
}

fn check_struct(name: &str, struct_type: &StructType, value: &JsonValue) -> DataResult<()> {
    let JsonValue::Object(object) = value else {
        return Err(DataError::conversion(format!(
            "field {name}: not a struct value: {value}"
        )));
    };
    for nested in struct_type.fields() {
        let child = object.get(nested.name.as_str()).filter(|v| !v.is_null());
        match child {
            None if nested.required => {
                return Err(DataError::conversion(format!(
                    "missing required field {name}.{}",
                    nested.name
                )));
            }
            None => {}
            Some(child) => {
                check_value(
                    &format!("{name}.{}", nested.name),
                    nested.field_type.as_ref(),
                    child,
                )?;
            }
        }
    }
    Ok(())
}

fn check_list(name: &str, list_type: &ListType, value: &JsonValue) -> DataResult<()> {
    let JsonValue::Array(items) = value else {
        return Err(DataError::conversion(format!(
            "field {name}: not a list value: {value}"
        )));
    };
    let element = &list_type.element_field;
    for item in items {
        if item.is_null() {
            if element.required {
                return Err(DataError::conversion(format!(
                    "field {name}: null element in list of required elements"
                )));
            }
            continue;
        }
        check_value(&format!("{name}.element"), element.field_type.as_ref(), item)?;
    }
    Ok(())
}

fn check_map(name: &str, map_type: &MapType, value: &JsonValue) -> DataResult<()> {
    let JsonValue::Object(entries) = value else {
        return Err(DataError::conversion(format!(
            "field {name}: not a map value: {value}"
        )));
    };
    for (key, entry) in entries {
        let key_value = JsonValue::String(key.clone());
        check_value(
            &format!("{name}.key"),
            map_type.key_field.field_type.as_ref(),
            &key_value,
        )?;
        if entry.is_null() {
            if map_type.value_field.required {
                return Err(DataError::conversion(format!(
                    "field {name}: null value for key {key} in map of required values"
                )));
            }
            continue;
        }
        check_value(
            &format!("{name}.value"),
            map_type.value_field.field_type.as_ref(),
            entry,
        )?;
    }
    Ok(())
}

fn check_primitive(name: &str, primitive: &PrimitiveType, value: &JsonValue) -> DataResult<()> {
    match primitive {
        PrimitiveType::Boolean => convert_bool(name, value).map(|_| ()),
        PrimitiveType::Int => convert_i32(name, value).map(|_| ()),
        PrimitiveType::Long => convert_i64(name, value).map(|_| ()),
        PrimitiveType::Float => convert_f64(name, value).map(|_| ()),
        PrimitiveType::Double => convert_f64(name, value).map(|_| ()),
        PrimitiveType::Date => convert_date_days(name, value).map(|_| ()),
        PrimitiveType::Time => convert_time_micros(name, value).map(|_| ()),
        PrimitiveType::Timestamp | PrimitiveType::Timestamptz => {
            convert_timestamp_micros(name, value).map(|_| ())
        }
        PrimitiveType::String => Ok(()),
        PrimitiveType::Uuid => convert_uuid(name, value).map(|_| ()),
        PrimitiveType::Decimal { scale, .. } => {
            convert_decimal(name, value, *scale).map(|_| ())
        }
        PrimitiveType::Binary => convert_bytes(name, value).map(|_| ()),
        PrimitiveType::Fixed(len) => {
            let bytes = convert_bytes(name, value)?;
            if bytes.len() as u64 != *len {
                return Err(DataError::conversion(format!(
                    "field {name}: expected {} fixed bytes, got {}",
                    len,
                    bytes.len()
                )));
            }
            Ok(())
        }
        other => Err(DataError::Schema(format!(
            "field {name}: unsupported type {other:?}"
        ))),
    }
}

// ============================================================================
// Array builders
// ============================================================================

fn build_array(
    name: &str,
    ty: &Type,
    data_type: &DataType,
    values: &[Option<&JsonValue>],
) -> DataResult<ArrayRef> {
    match ty {
        Type::Primitive(primitive) => build_primitive_array(name, primitive, values),
        Type::Struct(struct_type) => build_struct_array(name, struct_type, data_type, values),
        Type::List(list_type) => build_list_array(name, list_type, data_type, values),
        Type::Map(map_type) => build_map_array(name, map_type, data_type, values),
    }
}

fn build_struct_array(
    name: &str,
    struct_type: &StructType,
    data_type: &DataType,
    values: &[Option<&JsonValue>],
) -> DataResult<ArrayRef> {
    let DataType::Struct(arrow_fields) = data_type else {
        return Err(DataError::Schema(format!(
            "field {name}: expected an arrow struct, got {data_type}"
        )));
    };

    let mut child_arrays: Vec<ArrayRef> = Vec::with_capacity(arrow_fields.len());
    for (nested, arrow_child) in struct_type.fields().iter().zip(arrow_fields.iter()) {
        let child_name = format!("{name}.{}", nested.name);
        let child_values: Vec<Option<&JsonValue>> = values
            .iter()
            .map(|v| {
                v.and_then(|value| value.get(nested.name.as_str()))
                    .filter(|c| !c.is_null())
            })
            .collect();

        if nested.required {
            let missing = values
                .iter()
                .zip(child_values.iter())
                .any(|(parent, child)| parent.is_some() && child.is_none());
            if missing {
                return Err(DataError::conversion(format!(
                    "missing required field {child_name}"
                )));
            }
        }

        child_arrays.push(build_array(
            &child_name,
            nested.field_type.as_ref(),
            arrow_child.data_type(),
            &child_values,
        )?);
    }

    let nulls = NullBuffer::from(values.iter().map(Option::is_some).collect::<Vec<bool>>());
    let array = StructArray::try_new(arrow_fields.clone(), child_arrays, Some(nulls))
        .map_err(|e| DataError::conversion(format!("field {name}: {e}")))?;
    Ok(Arc::new(array))
}

fn build_list_array(
    name: &str,
    list_type: &ListType,
    data_type: &DataType,
    values: &[Option<&JsonValue>],
) -> DataResult<ArrayRef> {
    let DataType::List(element_field) = data_type else {
        return Err(DataError::Schema(format!(
            "field {name}: expected an arrow list, got {data_type}"
        )));
    };
    let element = &list_type.element_field;

    let mut flat: Vec<Option<&JsonValue>> = Vec::new();
    let mut offsets: Vec<i32> = Vec::with_capacity(values.len() + 1);
    offsets.push(0);
    for value in values {
        match value {
            Some(JsonValue::Array(items)) => {
                for item in items {
                    let item = Some(item).filter(|i| !i.is_null());
                    if item.is_none() && element.required {
                        return Err(DataError::conversion(format!(
                            "field {name}: null element in list of required elements"
                        )));
                    }
                    flat.push(item);
                }
            }
            Some(other) => {
                return Err(DataError::conversion(format!(
                    "field {name}: not a list value: {other}"
                )));
            }
            None => {}
        }
        offsets.push(flat.len() as i32);
    }

    let child = build_array(
        &format!("{name}.element"),
        element.field_type.as_ref(),
        element_field.data_type(),
        &flat,
    )?;
    let nulls = NullBuffer::from(values.iter().map(Option::is_some).collect::<Vec<bool>>());
    let array = ListArray::try_new(
        element_field.clone(),
        OffsetBuffer::new(offsets.into()),
        child,
        Some(nulls),
    )
    .map_err(|e| DataError::conversion(format!("field {name}: {e}")))?;
    Ok(Arc::new(array))
}

fn build_map_array(
    name: &str,
    map_type: &MapType,
    data_type: &DataType,
    values: &[Option<&JsonValue>],
) -> DataResult<ArrayRef> {
    let DataType::Map(entries_field, ordered) = data_type else {
        return Err(DataError::Schema(format!(
            "field {name}: expected an arrow map, got {data_type}"
        )));
    };
    let DataType::Struct(entry_fields) = entries_field.data_type() else {
        return Err(DataError::Schema(format!(
            "field {name}: malformed arrow map entries"
        )));
    };

    // JSON map keys are strings; the key conversion parses them into the
    // key field's type.
    let mut keys: Vec<JsonValue> = Vec::new();
    let mut flat_values: Vec<Option<&JsonValue>> = Vec::new();
    let mut offsets: Vec<i32> = Vec::with_capacity(values.len() + 1);
    offsets.push(0);
    for value in values {
        match value {
            Some(JsonValue::Object(entries)) => {
                for (key, entry) in entries {
                    keys.push(JsonValue::String(key.clone()));
                    let entry = Some(entry).filter(|e| !e.is_null());
                    if entry.is_none() && map_type.value_field.required {
                        return Err(DataError::conversion(format!(
                            "field {name}: null value for key {key} in map of required values"
                        )));
                    }
                    flat_values.push(entry);
                }
            }
            Some(other) => {
                return Err(DataError::conversion(format!(
                    "field {name}: not a map value: {other}"
                )));
            }
            None => {}
        }
        offsets.push(keys.len() as i32);
    }

    let key_refs: Vec<Option<&JsonValue>> = keys.iter().map(Some).collect();
    let key_array = build_array(
        &format!("{name}.key"),
        map_type.key_field.field_type.as_ref(),
        entry_fields[0].data_type(),
        &key_refs,
    )?;
    let value_array = build_array(
        &format!("{name}.value"),
        map_type.value_field.field_type.as_ref(),
        entry_fields[1].data_type(),
        &flat_values,
    )?;
    let entries = StructArray::try_new(
        entry_fields.clone(),
        vec![key_array, value_array],
        None,
    )
    .map_err(|e| DataError::conversion(format!("field {name}: {e}")))?;

    let nulls = NullBuffer::from(values.iter().map(Option::is_some).collect::<Vec<bool>>());
    let array = MapArray::try_new(
        entries_field.clone(),
        OffsetBuffer::new(offsets.into()),
        entries,
        Some(nulls),
        *ordered,
    )
    .map_err(|e| DataError::conversion(format!("field {name}: {e}")))?;
    Ok(Arc::new(array))
}

fn build_primitive_array(
    name: &str,
    primitive: &PrimitiveType,
    values: &[Option<&JsonValue>],
) -> DataResult<ArrayRef> {
    let array: ArrayRef = match primitive {
        PrimitiveType::Boolean => Arc::new(
            values
                .iter()
                .map(|v| v.map(|v| convert_bool(name, v)).transpose())
                .collect::<DataResult<BooleanArray>>()?,
        ),
        PrimitiveType::Int => Arc::new(
            values
                .iter()
                .map(|v| v.map(|v| convert_i32(name, v)).transpose())
                .collect::<DataResult<Int32Array>>()?,
        ),
        PrimitiveType::Long => Arc::new(
            values
                .iter()
                .map(|v| v.map(|v| convert_i64(name, v)).transpose())
                .collect::<DataResult<Int64Array>>()?,
        ),
        PrimitiveType::Float => Arc::new(
            values
                .iter()
                .map(|v| {
                    v.map(|v| convert_f64(name, v).map(|f| f as f32))
                        .transpose()
                })
                .collect::<DataResult<Float32Array>>()?,
        ),
        PrimitiveType::Double => Arc::new(
            values
                .iter()
                .map(|v| v.map(|v| convert_f64(name, v)).transpose())
                .collect::<DataResult<Float64Array>>()?,
        ),
        PrimitiveType::Date => Arc::new(
            values
                .iter()
                .map(|v| v.map(|v| convert_date_days(name, v)).transpose())
                .collect::<DataResult<Date32Array>>()?,
        ),
        PrimitiveType::Time => Arc::new(
            values
                .iter()
                .map(|v| v.map(|v| convert_time_micros(name, v)).transpose())
                .collect::<DataResult<Time64MicrosecondArray>>()?,
        ),
        PrimitiveType::Timestamp => Arc::new(
            values
                .iter()
                .map(|v| v.map(|v| convert_timestamp_micros(name, v)).transpose())
                .collect::<DataResult<TimestampMicrosecondArray>>()?,
        ),
        PrimitiveType::Timestamptz => Arc::new(
            values
                .iter()
                .map(|v| v.map(|v| convert_timestamp_micros(name, v)).transpose())
                .collect::<DataResult<TimestampMicrosecondArray>>()?
                .with_timezone("+00:00"),
        ),
        PrimitiveType::String => Arc::new(
            values
                .iter()
                .map(|v| {
                    v.map(|v| match v {
                        JsonValue::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                })
                .collect::<StringArray>(),
        ),
        PrimitiveType::Uuid => {
            let mut builder = FixedSizeBinaryBuilder::with_capacity(values.len(), 16);
            for value in values {
                match value {
                    Some(v) => {
                        let uuid = convert_uuid(name, v)?;
                        builder
                            .append_value(uuid.as_bytes())
                            .map_err(|e| DataError::conversion(format!("field {name}: {e}")))?;
                    }
                    None => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        PrimitiveType::Decimal { precision, scale } => {
            let array = values
                .iter()
                .map(|v| v.map(|v| convert_decimal(name, v, *scale)).transpose())
                .collect::<DataResult<Decimal128Array>>()?;
            Arc::new(
                array
                    .with_precision_and_scale(*precision as u8, *scale as i8)
                    .map_err(|e| DataError::conversion(format!("field {name}: {e}")))?,
            )
        }
        PrimitiveType::Binary => Arc::new(
            values
                .iter()
                .map(|v| v.map(|v| convert_bytes(name, v)).transpose())
                .collect::<DataResult<Vec<Option<Vec<u8>>>>>()?
                .into_iter()
                .collect::<LargeBinaryArray>(),
        ),
        PrimitiveType::Fixed(len) => {
            let mut builder = FixedSizeBinaryBuilder::with_capacity(values.len(), *len as i32);
            for value in values {
                match value {
                    Some(v) => {
                        let bytes = convert_bytes(name, v)?;
                        builder
                            .append_value(&bytes)
                            .map_err(|e| DataError::conversion(format!("field {name}: {e}")))?;
                    }
                    None => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        other => {
            return Err(DataError::Schema(format!(
                "field {name}: unsupported type {other:?}"
            )));
        }
    };
    Ok(array)
}

// ============================================================================
// Scalar conversions
// ============================================================================

fn convert_bool(name: &str, value: &JsonValue) -> DataResult<bool> {
    match value {
        JsonValue::Bool(b) => Ok(*b),
        JsonValue::String(s) => s
            .parse()
            .map_err(|_| DataError::conversion(format!("field {name}: not a boolean: {s}"))),
        other => Err(DataError::conversion(format!(
            "field {name}: not a boolean: {other}"
        ))),
    }
}

fn convert_i64(name: &str, value: &JsonValue) -> DataResult<i64> {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .ok_or_else(|| DataError::conversion(format!("field {name}: not an integer: {n}"))),
        JsonValue::String(s) => s
            .parse()
            .map_err(|_| DataError::conversion(format!("field {name}: not an integer: {s}"))),
        other => Err(DataError::conversion(format!(
            "field {name}: not an integer: {other}"
        ))),
    }
}

fn convert_i32(name: &str, value: &JsonValue) -> DataResult<i32> {
    let wide = convert_i64(name, value)?;
    i32::try_from(wide)
        .map_err(|_| DataError::conversion(format!("field {name}: out of int range: {wide}")))
}

fn convert_f64(name: &str, value: &JsonValue) -> DataResult<f64> {
    match value {
        JsonValue::Number(n) => n
            .as_f64()
            .ok_or_else(|| DataError::conversion(format!("field {name}: not a number: {n}"))),
        JsonValue::String(s) => s
            .parse()
            .map_err(|_| DataError::conversion(format!("field {name}: not a number: {s}"))),
        other => Err(DataError::conversion(format!(
            "field {name}: not a number: {other}"
        ))),
    }
}

/// Days since the Unix epoch.
fn convert_date_days(name: &str, value: &JsonValue) -> DataResult<i32> {
    match value {
        JsonValue::Number(_) => convert_i32(name, value),
        JsonValue::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            // NaiveDate::default() is the Unix epoch
            .map(|date| (date - NaiveDate::default()).num_days() as i32)
            .map_err(|_| DataError::conversion(format!("field {name}: not a date: {s}"))),
        other => Err(DataError::conversion(format!(
            "field {name}: not a date: {other}"
        ))),
    }
}

/// Microseconds since midnight.
fn convert_time_micros(name: &str, value: &JsonValue) -> DataResult<i64> {
    match value {
        JsonValue::Number(_) => convert_i64(name, value),
        JsonValue::String(s) => NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
            .map(|time| {
                time.num_seconds_from_midnight() as i64 * 1_000_000
                    + (time.nanosecond() / 1_000) as i64
            })
            .map_err(|_| DataError::conversion(format!("field {name}: not a time: {s}"))),
        other => Err(DataError::conversion(format!(
            "field {name}: not a time: {other}"
        ))),
    }
}

/// Microseconds since the Unix epoch, UTC. Integer inputs are taken as
/// epoch millis; naive date-times are interpreted as UTC.
fn convert_timestamp_micros(name: &str, value: &JsonValue) -> DataResult<i64> {
    match value {
        JsonValue::Number(_) => convert_i64(name, value).map(|millis| millis * 1_000),
        JsonValue::String(s) => parse_timestamp_string(s)
            .ok_or_else(|| DataError::conversion(format!("field {name}: not a timestamp: {s}"))),
        other => Err(DataError::conversion(format!(
            "field {name}: not a timestamp: {other}"
        ))),
    }
}

/// Parse a timestamp string in any of the accepted variants.
pub fn parse_timestamp_string(input: &str) -> Option<i64> {
    let normalized = normalize_datetime(input);
    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt.timestamp_micros());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc().timestamp_micros());
    }
    None
}

/// Bring the accepted separator and offset variants into RFC 3339 form:
/// space separators become `T`, `+00` and `+0000` offsets become `+00:00`.
fn normalize_datetime(input: &str) -> String {
    let mut out = input.trim().replacen(' ', "T", 1);
    if let Some(idx) = out.rfind(['+', '-']) {
        if idx > 10 {
            let offset = &out[idx + 1..];
            if offset.len() == 2 && offset.bytes().all(|b| b.is_ascii_digit()) {
                out.push_str(":00");
            } else if offset.len() == 4 && offset.bytes().all(|b| b.is_ascii_digit()) {
                out.insert(idx + 3, ':');
            }
        }
    }
    out
}

fn convert_uuid(name: &str, value: &JsonValue) -> DataResult<Uuid> {
    match value {
        JsonValue::String(s) => Uuid::parse_str(s)
            .map_err(|_| DataError::conversion(format!("field {name}: not a uuid: {s}"))),
        other => Err(DataError::conversion(format!(
            "field {name}: not a uuid: {other}"
        ))),
    }
}

/// Unscaled decimal mantissa for the given scale.
fn convert_decimal(name: &str, value: &JsonValue, scale: u32) -> DataResult<i128> {
    let text = match value {
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.trim().to_string(),
        other => {
            return Err(DataError::conversion(format!(
                "field {name}: not a decimal: {other}"
            )))
        }
    };

    let negative = text.starts_with('-');
    let unsigned = text.trim_start_matches(['-', '+']);
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if frac_part.len() > scale as usize {
        return Err(DataError::conversion(format!(
            "field {name}: decimal {text} exceeds scale {scale}"
        )));
    }

    let mut digits = String::with_capacity(int_part.len() + scale as usize);
    digits.push_str(int_part);
    digits.push_str(frac_part);
    for _ in frac_part.len()..scale as usize {
        digits.push('0');
    }
    let mantissa: i128 = digits
        .parse()
        .map_err(|_| DataError::conversion(format!("field {name}: not a decimal: {text}")))?;
    Ok(if negative { -mantissa } else { mantissa })
}

fn convert_bytes(name: &str, value: &JsonValue) -> DataResult<Vec<u8>> {
    match value {
        JsonValue::String(s) => base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|_| DataError::conversion(format!("field {name}: not base64 bytes"))),
        JsonValue::Array(items) => items
            .iter()
            .map(|item| {
                item.as_i64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| DataError::conversion(format!("field {name}: not a byte array")))
            })
            .collect(),
        other => Err(DataError::conversion(format!(
            "field {name}: not bytes: {other}"
        ))),
    }
}
