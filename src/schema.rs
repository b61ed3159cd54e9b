//! Table schema as declared by the engine's index mapping.
//!
//! The grouping core only depends on column existence and on the coarse
//! [`ColumnKind`] classification of each column.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::value::Dtype;

/// Field type as declared in the mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Keyword,
    Text,
    Long,
    Integer,
    Short,
    Byte,
    UnsignedLong,
    Double,
    Float,
    HalfFloat,
    ScaledFloat,
    Boolean,
    Date,
    DateNanos,
    Ip,
    GeoPoint,
    Other(String),
}

impl FieldType {
    pub fn from_mapping_type(name: &str) -> Self {
        match name {
            "keyword" | "constant_keyword" | "wildcard" => FieldType::Keyword,
            "text" | "match_only_text" => FieldType::Text,
            "long" => FieldType::Long,
            "integer" => FieldType::Integer,
            "short" => FieldType::Short,
            "byte" => FieldType::Byte,
            "unsigned_long" => FieldType::UnsignedLong,
            "double" => FieldType::Double,
            "float" => FieldType::Float,
            "half_float" => FieldType::HalfFloat,
            "scaled_float" => FieldType::ScaledFloat,
            "boolean" => FieldType::Boolean,
            "date" => FieldType::Date,
            "date_nanos" => FieldType::DateNanos,
            "ip" => FieldType::Ip,
            "geo_point" => FieldType::GeoPoint,
            other => FieldType::Other(other.to_string()),
        }
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            FieldType::Long
            | FieldType::Integer
            | FieldType::Short
            | FieldType::Byte
            | FieldType::UnsignedLong => ColumnKind::Integer,
            FieldType::Double
            | FieldType::Float
            | FieldType::HalfFloat
            | FieldType::ScaledFloat => ColumnKind::Float,
            FieldType::Boolean => ColumnKind::Boolean,
            FieldType::Date | FieldType::DateNanos => ColumnKind::Temporal,
            FieldType::Keyword | FieldType::Ip => ColumnKind::Categorical,
            FieldType::Text | FieldType::GeoPoint | FieldType::Other(_) => {
                ColumnKind::Unaggregatable
            }
        }
    }

    /// Name of the type as it appears in a mapping
    pub fn as_str(&self) -> &str {
        match self {
            FieldType::Keyword => "keyword",
            FieldType::Text => "text",
            FieldType::Long => "long",
            FieldType::Integer => "integer",
            FieldType::Short => "short",
            FieldType::Byte => "byte",
            FieldType::UnsignedLong => "unsigned_long",
            FieldType::Double => "double",
            FieldType::Float => "float",
            FieldType::HalfFloat => "half_float",
            FieldType::ScaledFloat => "scaled_float",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::DateNanos => "date_nanos",
            FieldType::Ip => "ip",
            FieldType::GeoPoint => "geo_point",
            FieldType::Other(name) => name,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse classification the grouping core works with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Integer,
    Float,
    Boolean,
    Temporal,
    Categorical,
    /// No doc values: cannot be bucketed or aggregated
    Unaggregatable,
}

impl ColumnKind {
    /// Numeric in the `numeric_only=True` sense (booleans included, as in pandas)
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnKind::Integer | ColumnKind::Float | ColumnKind::Boolean
        )
    }

    /// Dtype of the raw column, also used for group-key index levels
    pub fn dtype(&self) -> Dtype {
        match self {
            ColumnKind::Integer => Dtype::Int64,
            ColumnKind::Float => Dtype::Float64,
            ColumnKind::Boolean => Dtype::Bool,
            ColumnKind::Temporal => Dtype::Datetime,
            ColumnKind::Categorical | ColumnKind::Unaggregatable => Dtype::Object,
        }
    }
}

/// One column of a table
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Column name as exposed to users (dotted path for nested objects)
    pub name: String,
    pub field_type: FieldType,
    /// Field to bucket/aggregate on; a `text` field with a keyword sub-field
    /// aggregates through `<name>.keyword`
    pub agg_field: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        let agg_field = if field_type.kind() == ColumnKind::Unaggregatable {
            None
        } else {
            Some(name.clone())
        };
        Field {
            name,
            field_type,
            agg_field,
        }
    }

    /// Text field that aggregates through a keyword sub-field
    pub fn text_with_keyword(name: impl Into<String>, keyword_field: impl Into<String>) -> Self {
        Field {
            name: name.into(),
            field_type: FieldType::Text,
            agg_field: Some(keyword_field.into()),
        }
    }

    pub fn kind(&self) -> ColumnKind {
        match (&self.field_type, &self.agg_field) {
            (FieldType::Text, Some(_)) => ColumnKind::Categorical,
            (field_type, _) => field_type.kind(),
        }
    }

    pub fn is_aggregatable(&self) -> bool {
        self.agg_field.is_some()
    }
}

/// Ordered set of fields of one table (index pattern)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSchema {
    fields: Vec<Field>,
    positions: HashMap<String, usize>,
}

impl TableSchema {
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        let mut positions = HashMap::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            if positions.insert(field.name.clone(), i).is_some() {
                return Err(Error::Consistency(format!(
                    "Duplicate column '{}' in schema",
                    field.name
                )));
            }
        }
        Ok(TableSchema { fields, positions })
    }

    /// Parse the JSON returned by a `GET <index>/_mapping` call.
    ///
    /// Accepts the full response (`{"<index>": {"mappings": {...}}}`), a bare
    /// `{"mappings": {...}}` or a bare `{"properties": {...}}`. When several
    /// indices are present their fields are merged in response order.
    /// Nested `properties` become dotted column names.
    pub fn from_mapping(mapping: &Value) -> Result<Self> {
        let mut fields = Vec::new();
        let mut seen = HashMap::new();

        let mut collect = |properties: &Map<String, Value>| {
            for field in flatten_mapping(properties) {
                if seen.insert(field.name.clone(), ()).is_none() {
                    fields.push(field);
                }
            }
        };

        if let Some(properties) = mapping.get("properties").and_then(Value::as_object) {
            collect(properties);
        } else if let Some(properties) = mapping
            .get("mappings")
            .and_then(|m| m.get("properties"))
            .and_then(Value::as_object)
        {
            collect(properties);
        } else if let Some(indices) = mapping.as_object() {
            for (index, body) in indices {
                let properties = body
                    .get("mappings")
                    .and_then(|m| m.get("properties"))
                    .and_then(Value::as_object)
                    .ok_or_else(|| {
                        Error::Consistency(format!("Mapping of '{}' has no properties", index))
                    })?;
                collect(properties);
            }
        } else {
            return Err(Error::Consistency("Mapping is not a JSON object".into()));
        }

        TableSchema::new(fields)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.positions.get(name).map(|&i| &self.fields[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Restrict to the given columns, in the given order
    pub fn select(&self, columns: &[String]) -> Result<Self> {
        let missing: Vec<String> = columns
            .iter()
            .filter(|c| !self.contains(c))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(Error::UnknownColumn(missing));
        }
        let mut fields = Vec::with_capacity(columns.len());
        for column in columns {
            if let Some(field) = self.get(column) {
                if !fields.iter().any(|f: &Field| f.name == field.name) {
                    fields.push(field.clone());
                }
            }
        }
        TableSchema::new(fields)
    }
}

/// Flatten one index's properties, then point each alias at its target.
/// Targets are resolved after every concrete field is known, so an alias
/// may precede its target in the mapping.
fn flatten_mapping(properties: &Map<String, Value>) -> Vec<Field> {
    let mut fields = Vec::new();
    let mut aliases = Vec::new();
    flatten_properties(properties, "", &mut fields, &mut aliases);

    for (position, target) in aliases {
        let resolved = fields
            .iter()
            .find(|f| f.name == target && !matches!(&f.field_type, FieldType::Other(t) if t == "alias"))
            .cloned();
        if let Some(target_field) = resolved {
            let name = std::mem::take(&mut fields[position].name);
            fields[position] = Field { name, ..target_field };
        }
    }
    fields
}

fn flatten_properties(
    properties: &Map<String, Value>,
    prefix: &str,
    out: &mut Vec<Field>,
    aliases: &mut Vec<(usize, String)>,
) {
    for (name, body) in properties {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };

        if let Some(nested) = body.get("properties").and_then(Value::as_object) {
            flatten_properties(nested, &path, out, aliases);
            continue;
        }

        let type_name = body.get("type").and_then(Value::as_str).unwrap_or("object");
        if type_name == "alias" {
            if let Some(target) = body.get("path").and_then(Value::as_str) {
                aliases.push((out.len(), target.to_string()));
            }
        }

        let field_type = FieldType::from_mapping_type(type_name);
        let field = if field_type == FieldType::Text {
            let keyword = body
                .get("fields")
                .and_then(Value::as_object)
                .and_then(|subfields| {
                    subfields.iter().find(|(_, sub)| {
                        sub.get("type").and_then(Value::as_str) == Some("keyword")
                    })
                })
                .map(|(sub_name, _)| format!("{}.{}", path, sub_name));
            match keyword {
                Some(keyword) => Field::text_with_keyword(path, keyword),
                None => Field::new(path, field_type),
            }
        } else {
            Field::new(path, field_type)
        };
        out.push(field);
    }
}

/// Source of table schemas (the engine's mapping endpoint, or a fixture)
pub trait SchemaProvider: Send + Sync {
    fn schema(&self, index: &str) -> Result<TableSchema>;
}

/// Schema provider reading mappings through a [`Transport`]
pub struct TransportSchemaProvider {
    transport: Arc<dyn Transport>,
}

impl TransportSchemaProvider {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        TransportSchemaProvider { transport }
    }
}

impl SchemaProvider for TransportSchemaProvider {
    fn schema(&self, index: &str) -> Result<TableSchema> {
        let mapping = self.transport.mapping(index)?;
        TableSchema::from_mapping(&mapping)
    }
}

/// Memoised schemas per index.
///
/// A cache is an explicit value owned by the caller. Entries live until
/// [`SchemaCache::invalidate`] or [`SchemaCache::clear`] is called; callers
/// must invalidate an index whose mapping they know has changed.
pub struct SchemaCache<P: SchemaProvider> {
    provider: P,
    entries: RwLock<HashMap<String, Arc<TableSchema>>>,
}

impl<P: SchemaProvider> SchemaCache<P> {
    pub fn new(provider: P) -> Self {
        SchemaCache {
            provider,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Get the schema of `index`, asking the provider on a miss
    pub fn get(&self, index: &str) -> Result<Arc<TableSchema>> {
        if let Some(schema) = self.read().get(index) {
            return Ok(Arc::clone(schema));
        }

        let schema = Arc::new(self.provider.schema(index)?);
        log::debug!("cached schema of '{}' ({} fields)", index, schema.len());
        self.write().insert(index.to_string(), Arc::clone(&schema));
        Ok(schema)
    }

    /// Drop the cached schema of one index; returns whether it was cached
    pub fn invalidate(&self, index: &str) -> bool {
        self.write().remove(index).is_some()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Poisoning is ignored: every update is a single insert or remove.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<TableSchema>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<TableSchema>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
