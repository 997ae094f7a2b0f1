//! Schema-driven binary codec.
//!
//! ```text
//! [action_id: u8][field_1][field_2]...      fields in schema order
//! string  = [len: u16][utf8 bytes]
//! int32   = [i32 big-endian]
//! list<T> = [count: u16][T]...
//! object  = sub-fields back to back, no prefix
//! ```
//!
//! The schema alone decides what is read and in what order; nothing is
//! inferred from the bytes.

use std::sync::Arc;

use bytes::{Buf, BufMut};
use serde_json::{Map, Value};

use crate::schema::{FieldSpec, FieldType, Schema};
use crate::{Codec, Envelope, ProtocolError};

/// Largest string byte length and list element count on the wire.
pub const MAX_WIRE_LEN: usize = u16::MAX as usize;

/// Binary [`Codec`] backed by a shared, immutable [`Schema`].
#[derive(Debug, Clone)]
pub struct BinaryCodec {
    schema: Arc<Schema>,
}

impl BinaryCodec {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

impl Codec for BinaryCodec {
    /// Fails on the first missing or ill-typed field. The output buffer is
    /// local, so a failure never leaks a partial payload.
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
        let action = envelope.action().ok_or(ProtocolError::MissingAction)?;
        let spec = self
            .schema
            .by_name(action)
            .ok_or_else(|| ProtocolError::UnknownAction(action.to_string()))?;

        let mut out = Vec::with_capacity(64);
        out.put_u8(spec.id);
        for field in &spec.fields {
            let value = envelope
                .get(&field.name)
                .ok_or_else(|| ProtocolError::MissingField {
                    field: field.name.clone(),
                })?;
            encode_value(&mut out, &field.ty, value, &field.name)?;
        }
        Ok(out)
    }

    fn decode(&self, data: &[u8]) -> Result<Envelope, ProtocolError> {
        let mut cursor = data;
        need(&cursor, 1, "action")?;
        let id = cursor.get_u8();
        let spec = self
            .schema
            .by_id(id)
            .ok_or(ProtocolError::UnknownActionId(id))?;

        let mut envelope = Envelope::new(&spec.name);
        for field in &spec.fields {
            let value = decode_value(&mut cursor, &field.ty, &field.name)?;
            envelope.insert(field.name.clone(), value);
        }

        if cursor.has_remaining() {
            return Err(ProtocolError::TrailingBytes(cursor.remaining()));
        }
        Ok(envelope)
    }
}

fn encode_value(
    out: &mut Vec<u8>,
    ty: &FieldType,
    value: &Value,
    path: &str,
) -> Result<(), ProtocolError> {
    match ty {
        FieldType::String => {
            let text = value.as_str().ok_or_else(|| mismatch(path, "a string"))?;
            if text.len() > MAX_WIRE_LEN {
                return Err(ProtocolError::StringTooLong {
                    field: path.to_string(),
                    len: text.len(),
                });
            }
            out.put_u16(text.len() as u16);
            out.put_slice(text.as_bytes());
        }
        FieldType::Int32 => {
            let number = value.as_i64().ok_or_else(|| {
                if value.is_number() {
                    ProtocolError::IntOutOfRange {
                        field: path.to_string(),
                        value: value.to_string(),
                    }
                } else {
                    mismatch(path, "an integer")
                }
            })?;
            let number = i32::try_from(number).map_err(|_| ProtocolError::IntOutOfRange {
                field: path.to_string(),
                value: number.to_string(),
            })?;
            out.put_i32(number);
        }
        FieldType::List(items) => {
            let elements = value.as_array().ok_or_else(|| mismatch(path, "a list"))?;
            if elements.len() > MAX_WIRE_LEN {
                return Err(ProtocolError::ListTooLong {
                    field: path.to_string(),
                    len: elements.len(),
                });
            }
            out.put_u16(elements.len() as u16);
            for (index, element) in elements.iter().enumerate() {
                encode_value(out, items, element, &format!("{path}[{index}]"))?;
            }
        }
        FieldType::Object(fields) => {
            let object = value.as_object().ok_or_else(|| mismatch(path, "an object"))?;
            encode_object(out, fields, object, path)?;
        }
    }
    Ok(())
}

fn encode_object(
    out: &mut Vec<u8>,
    fields: &[FieldSpec],
    object: &Map<String, Value>,
    path: &str,
) -> Result<(), ProtocolError> {
    for field in fields {
        let field_path = format!("{path}.{}", field.name);
        let value = object
            .get(&field.name)
            .filter(|value| !value.is_null())
            .ok_or_else(|| ProtocolError::MissingField {
                field: field_path.clone(),
            })?;
        encode_value(out, &field.ty, value, &field_path)?;
    }
    Ok(())
}

fn decode_value(cursor: &mut &[u8], ty: &FieldType, path: &str) -> Result<Value, ProtocolError> {
    match ty {
        FieldType::String => {
            need(cursor, 2, path)?;
            let len = usize::from(cursor.get_u16());
            need(cursor, len, path)?;
            let text = std::str::from_utf8(&cursor[..len]).map_err(|_| {
                ProtocolError::InvalidUtf8 {
                    field: path.to_string(),
                }
            })?;
            let value = Value::from(text);
            cursor.advance(len);
            Ok(value)
        }
        FieldType::Int32 => {
            need(cursor, 4, path)?;
            Ok(Value::from(cursor.get_i32()))
        }
        FieldType::List(items) => {
            need(cursor, 2, path)?;
            let count = usize::from(cursor.get_u16());
            let mut elements = Vec::with_capacity(count.min(cursor.remaining()));
            for index in 0..count {
                elements.push(decode_value(cursor, items, &format!("{path}[{index}]"))?);
            }
            Ok(Value::Array(elements))
        }
        FieldType::Object(fields) => {
            let mut object = Map::new();
            for field in fields {
                let field_path = format!("{path}.{}", field.name);
                let value = decode_value(cursor, &field.ty, &field_path)?;
                object.insert(field.name.clone(), value);
            }
            Ok(Value::Object(object))
        }
    }
}

/// Checks that `needed` more bytes are available before a `get_*` call,
/// which would otherwise panic.
fn need(cursor: &&[u8], needed: usize, path: &str) -> Result<(), ProtocolError> {
    if cursor.remaining() < needed {
        return Err(ProtocolError::Underrun {
            field: path.to_string(),
            needed,
            remaining: cursor.remaining(),
        });
    }
    Ok(())
}

fn mismatch(path: &str, expected: &'static str) -> ProtocolError {
    ProtocolError::TypeMismatch {
        field: path.to_string(),
        expected,
    }
}
