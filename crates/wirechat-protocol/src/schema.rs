//! Schema model for the binary codec.
//!
//! The schema document is JSON with string type tags. It is compiled once,
//! at load time, into a typed tree of [`FieldType`]s; the codec then walks
//! that tree and never looks at a type tag again.
//!
//! Two layouts are accepted. The listed layout is an `actions` array with
//! ids inline. The keyed layout has an `action_ids` map beside a `messages`
//! map, with list element types in `element_type`; its field order is the
//! key order in the document.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

use serde::de::{IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::envelope::ACTION_KEY;
use crate::SchemaError;

/// The schema shipped with the crate, covering every chat action.
const BUILTIN_SCHEMA: &str = include_str!("../schema/chat.json");

// ---------------------------------------------------------------------------
// Compiled model
// ---------------------------------------------------------------------------

/// The wire type of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// u16 length prefix, then UTF-8 bytes.
    String,
    /// Four bytes, big-endian, signed.
    Int32,
    /// u16 element count, then each element.
    List(Box<FieldType>),
    /// The declared sub-fields back to back, no prefix.
    Object(Vec<FieldSpec>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
}

/// One action: its wire id and its fields in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSpec {
    pub id: u8,
    pub name: String,
    pub fields: Vec<FieldSpec>,
}

/// Immutable action table, indexed both ways.
#[derive(Debug, Clone)]
pub struct Schema {
    actions: Vec<ActionSpec>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<u8, usize>,
}

impl Schema {
    /// Parses and validates a schema document.
    pub fn from_json_str(source: &str) -> Result<Self, SchemaError> {
        let layout: Layout = serde_json::from_str(source).map_err(SchemaError::Parse)?;
        let doc = if layout.action_ids.is_some() {
            let keyed: KeyedDoc = serde_json::from_str(source).map_err(SchemaError::Parse)?;
            keyed.into_listed()?
        } else {
            serde_json::from_str(source).map_err(SchemaError::Parse)?
        };
        Self::compile(doc)
    }

    /// Loads a schema document from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let schema = Self::from_json_str(&source)?;
        tracing::info!(path = %path.display(), actions = schema.actions.len(), "schema loaded");
        Ok(schema)
    }

    /// The built-in chat schema.
    pub fn builtin() -> Result<Self, SchemaError> {
        Self::from_json_str(BUILTIN_SCHEMA)
    }

    pub fn by_name(&self, name: &str) -> Option<&ActionSpec> {
        self.by_name.get(name).map(|&index| &self.actions[index])
    }

    pub fn by_id(&self, id: u8) -> Option<&ActionSpec> {
        self.by_id.get(&id).map(|&index| &self.actions[index])
    }

    pub fn actions(&self) -> impl Iterator<Item = &ActionSpec> {
        self.actions.iter()
    }

    /// Returns the names from `required` that the schema does not declare.
    pub fn missing<'a>(&self, required: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        required
            .into_iter()
            .filter(|name| !self.by_name.contains_key(*name))
            .collect()
    }

    fn compile(doc: SchemaDoc) -> Result<Self, SchemaError> {
        if doc.actions.is_empty() {
            return Err(SchemaError::NoActions);
        }

        let mut actions = Vec::with_capacity(doc.actions.len());
        let mut by_name = HashMap::new();
        let mut by_id: HashMap<u8, usize> = HashMap::new();

        for action in doc.actions {
            if by_name.contains_key(&action.name) {
                return Err(SchemaError::DuplicateAction(action.name));
            }
            if let Some(&first) = by_id.get(&action.id) {
                let first: &ActionSpec = &actions[first];
                return Err(SchemaError::DuplicateId {
                    id: action.id,
                    first: first.name.clone(),
                    second: action.name,
                });
            }
            if action.fields.iter().any(|field| field.name == ACTION_KEY) {
                return Err(SchemaError::ReservedField(action.name));
            }

            let fields = compile_fields(&action.name, action.fields)?;
            let index = actions.len();
            by_name.insert(action.name.clone(), index);
            by_id.insert(action.id, index);
            actions.push(ActionSpec {
                id: action.id,
                name: action.name,
                fields,
            });
        }

        Ok(Self {
            actions,
            by_name,
            by_id,
        })
    }
}

fn compile_fields(path: &str, docs: Vec<FieldDoc>) -> Result<Vec<FieldSpec>, SchemaError> {
    let mut seen = HashSet::new();
    let mut fields = Vec::with_capacity(docs.len());
    for doc in docs {
        if !seen.insert(doc.name.clone()) {
            return Err(SchemaError::DuplicateField {
                action: path.to_string(),
                field: doc.name,
            });
        }
        let field_path = format!("{path}.{}", doc.name);
        let ty = compile_type(&field_path, doc.ty)?;
        fields.push(FieldSpec { name: doc.name, ty });
    }
    Ok(fields)
}

fn compile_type(path: &str, doc: TypeDoc) -> Result<FieldType, SchemaError> {
    match doc.kind {
        Kind::String => Ok(FieldType::String),
        Kind::Int => Ok(FieldType::Int32),
        Kind::List => {
            let items = doc
                .items
                .ok_or_else(|| SchemaError::MissingItems(path.to_string()))?;
            let inner = compile_type(&format!("{path}[]"), *items)?;
            Ok(FieldType::List(Box::new(inner)))
        }
        Kind::Object => {
            let fields = doc
                .fields
                .ok_or_else(|| SchemaError::MissingFields(path.to_string()))?;
            Ok(FieldType::Object(compile_fields(path, fields)?))
        }
    }
}

// ---------------------------------------------------------------------------
// Document shape
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SchemaDoc {
    actions: Vec<ActionDoc>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ActionDoc {
    name: String,
    id: u8,
    #[serde(default)]
    fields: Vec<FieldDoc>,
}

#[derive(Deserialize)]
struct FieldDoc {
    name: String,
    #[serde(flatten)]
    ty: TypeDoc,
}

#[derive(Deserialize)]
struct TypeDoc {
    #[serde(rename = "type")]
    kind: Kind,
    items: Option<Box<TypeDoc>>,
    fields: Option<Vec<FieldDoc>>,
}

#[derive(Deserialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum Kind {
    String,
    #[serde(alias = "int32")]
    Int,
    List,
    Object,
}

// ---------------------------------------------------------------------------
// Keyed layout
// ---------------------------------------------------------------------------

/// Only used to tell the two layouts apart.
#[derive(Deserialize)]
struct Layout {
    action_ids: Option<IgnoredAny>,
}

#[derive(Deserialize)]
struct KeyedDoc {
    action_ids: Ordered<u8>,
    messages: Ordered<KeyedMessage>,
}

#[derive(Deserialize)]
struct KeyedMessage {
    #[serde(default)]
    fields: Ordered<KeyedField>,
}

#[derive(Deserialize)]
struct KeyedField {
    #[serde(rename = "type")]
    kind: Kind,
    element_type: Option<Kind>,
    items: Option<KeyedItems>,
    fields: Option<Ordered<KeyedField>>,
}

#[derive(Deserialize)]
struct KeyedItems {
    fields: Ordered<KeyedField>,
}

impl KeyedDoc {
    /// Rewrites the document into the listed layout, in `messages` order.
    /// Ids with no message entry are dropped; decoding them fails later as
    /// an unknown id.
    fn into_listed(self) -> Result<SchemaDoc, SchemaError> {
        let ids: HashMap<String, u8> = self.action_ids.0.into_iter().collect();
        let actions = self
            .messages
            .0
            .into_iter()
            .map(|(name, message)| {
                let id = *ids
                    .get(&name)
                    .ok_or_else(|| SchemaError::MissingId(name.clone()))?;
                Ok(ActionDoc {
                    name,
                    id,
                    fields: keyed_fields(message.fields),
                })
            })
            .collect::<Result<Vec<_>, SchemaError>>()?;
        Ok(SchemaDoc { actions })
    }
}

impl KeyedField {
    fn into_type(self) -> TypeDoc {
        let element_fields = self.items.map(|items| keyed_fields(items.fields));
        let items = self.element_type.map(|kind| {
            Box::new(TypeDoc {
                kind,
                items: None,
                fields: element_fields,
            })
        });
        TypeDoc {
            kind: self.kind,
            items,
            fields: self.fields.map(keyed_fields),
        }
    }
}

fn keyed_fields(fields: Ordered<KeyedField>) -> Vec<FieldDoc> {
    fields
        .0
        .into_iter()
        .map(|(name, field)| FieldDoc {
            name,
            ty: field.into_type(),
        })
        .collect()
}

/// A JSON object read as entries in document order.
struct Ordered<T>(Vec<(String, T)>);

impl<T> Default for Ordered<T> {
    fn default() -> Self {
        Ordered(Vec::new())
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Ordered<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedVisitor<T> {
            type Value = Ordered<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry()? {
                    entries.push(entry);
                }
                Ok(Ordered(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}
