//! Declarative table description shared by every pipeline stage.
//!
//! A [`TableSchema`] names the target table, lists its fields in order and,
//! for each [`FieldSpec`], records where the value comes from
//! ([`FieldSource`]), the declared [`FieldType`] and the [`NullPolicy`] used
//! when a value is missing or malformed. The normalizer, the coercer and the
//! loader all read the same schema, so a field cannot be typed one way in the
//! staging table and another way in the coercer.
//!
//! ## Responsibilities
//!
//! - YAML schema loading and saving via `serde_yaml`
//! - Field type and null policy parsing
//! - Validation against the catalog-wide boolean allow/deny declarations
//! - Key resolution (primary key, conflict key, touch field)

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    fmt,
    fs::File,
    io::BufReader,
    path::Path,
    str::FromStr,
};

use anyhow::{Context, Result, anyhow};
use heck::ToLowerCamelCase;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    data::{parse_integer, parse_timestamp},
    error::SchemaError,
};

pub const DEFAULT_KEY_SEPARATOR: &str = "_";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FieldType {
    Integer,
    Float,
    Boolean,
    Timestamp,
    #[default]
    Text,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Timestamp => "timestamp",
            FieldType::Text => "text",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &["integer", "float", "boolean", "timestamp", "text"]
    }

    /// Column type used for the staging table.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Integer => "BIGINT",
            FieldType::Float => "DOUBLE PRECISION",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::Text => "TEXT",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "integer" | "int" | "bigint" => Ok(FieldType::Integer),
            "float" | "double" | "double precision" => Ok(FieldType::Float),
            "boolean" | "bool" => Ok(FieldType::Boolean),
            "timestamp" | "datetime" | "date" => Ok(FieldType::Timestamp),
            "text" | "string" => Ok(FieldType::Text),
            _ => Err(anyhow!(
                "Unknown field type '{value}'. Supported types: {}",
                FieldType::variants().join(", ")
            )),
        }
    }
}

impl Serialize for FieldType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        FieldType::from_str(&token).map_err(serde::de::Error::custom)
    }
}

/// What to emit when a value is missing or cannot be coerced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullPolicy {
    #[default]
    Null,
    Zero,
    Empty,
    Default(String),
}

impl NullPolicy {
    pub fn allowed_for(&self, datatype: FieldType) -> bool {
        match self {
            NullPolicy::Null => true,
            NullPolicy::Zero => datatype == FieldType::Integer,
            NullPolicy::Empty => datatype == FieldType::Text,
            NullPolicy::Default(_) => matches!(
                datatype,
                FieldType::Integer | FieldType::Timestamp | FieldType::Text
            ),
        }
    }
}

impl fmt::Display for NullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NullPolicy::Null => write!(f, "null"),
            NullPolicy::Zero => write!(f, "zero"),
            NullPolicy::Empty => write!(f, "empty"),
            NullPolicy::Default(value) => write!(f, "default({value})"),
        }
    }
}

/// String concatenation of source columns, e.g. `game_id` + `play_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySpec {
    pub parts: Vec<String>,
    #[serde(default = "KeySpec::default_separator")]
    pub separator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

impl KeySpec {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeySpec {
            parts: parts.into_iter().map(Into::into).collect(),
            separator: Self::default_separator(),
            suffix: None,
        }
    }

    pub fn with_suffix(mut self, suffix: &str) -> Self {
        self.suffix = Some(suffix.to_string());
        self
    }

    fn default_separator() -> String {
        DEFAULT_KEY_SEPARATOR.to_string()
    }

    pub fn describe(&self) -> String {
        let mut rendered = self.parts.join(&format!(" {} ", self.separator));
        if let Some(suffix) = &self.suffix {
            rendered.push_str(&format!(" {} \"{suffix}\"", self.separator));
        }
        rendered
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    Column(String),
    Concat(KeySpec),
    Synthesized,
    LoadTime,
}

impl FieldSource {
    pub fn describe(&self) -> String {
        match self {
            FieldSource::Column(column) => column.clone(),
            FieldSource::Concat(spec) => spec.describe(),
            FieldSource::Synthesized => "(synthesized)".to_string(),
            FieldSource::LoadTime => "(load time)".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub source: FieldSource,
    #[serde(rename = "type", default)]
    pub datatype: FieldType,
    #[serde(default)]
    pub null_policy: NullPolicy,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
}

impl FieldSpec {
    /// Maps `source` to its camelCase counterpart.
    pub fn mapped(source: &str, datatype: FieldType) -> Self {
        Self::renamed(source, &source.to_lower_camel_case(), datatype)
    }

    pub fn renamed(source: &str, name: &str, datatype: FieldType) -> Self {
        FieldSpec {
            name: name.to_string(),
            source: FieldSource::Column(source.to_string()),
            datatype,
            null_policy: NullPolicy::Null,
            required: false,
        }
    }

    pub fn concat(name: &str, key: KeySpec) -> Self {
        FieldSpec {
            name: name.to_string(),
            source: FieldSource::Concat(key),
            datatype: FieldType::Text,
            null_policy: NullPolicy::Null,
            required: false,
        }
    }

    pub fn synthesized(name: &str, datatype: FieldType) -> Self {
        FieldSpec {
            name: name.to_string(),
            source: FieldSource::Synthesized,
            datatype,
            null_policy: NullPolicy::Null,
            required: false,
        }
    }

    pub fn load_time(name: &str) -> Self {
        FieldSpec {
            name: name.to_string(),
            source: FieldSource::LoadTime,
            datatype: FieldType::Timestamp,
            null_policy: NullPolicy::Null,
            required: false,
        }
    }

    pub fn zero(mut self) -> Self {
        self.null_policy = NullPolicy::Zero;
        self
    }

    pub fn empty(mut self) -> Self {
        self.null_policy = NullPolicy::Empty;
        self
    }

    pub fn default_to(mut self, value: &str) -> Self {
        self.null_policy = NullPolicy::Default(value.to_string());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn source_column(&self) -> Option<&str> {
        match &self.source {
            FieldSource::Column(column) => Some(column),
            _ => None,
        }
    }
}

/// Catalog-wide explicit boolean classification, keyed by source column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDeclarations {
    #[serde(default)]
    pub boolean_allow: BTreeSet<String>,
    #[serde(default)]
    pub boolean_deny: BTreeSet<String>,
}

impl TypeDeclarations {
    pub fn new<A, D>(allow: A, deny: D) -> Self
    where
        A: IntoIterator<Item = &'static str>,
        D: IntoIterator<Item = &'static str>,
    {
        TypeDeclarations {
            boolean_allow: allow.into_iter().map(str::to_string).collect(),
            boolean_deny: deny.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn is_boolean_denied(&self, column: &str) -> bool {
        self.boolean_deny.contains(column)
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        if let Some(column) = self.boolean_allow.intersection(&self.boolean_deny).next() {
            return Err(SchemaError::ConflictingDeclaration {
                column: column.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub primary_key: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflict_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub touch_field: Option<String>,
    pub fields: Vec<FieldSpec>,
}

impl TableSchema {
    pub fn new(name: &str, primary_key: &str, fields: Vec<FieldSpec>) -> Self {
        TableSchema {
            name: name.to_string(),
            primary_key: primary_key.to_string(),
            conflict_key: Vec::new(),
            touch_field: None,
            fields,
        }
    }

    pub fn with_conflict_key(mut self, fields: &[&str]) -> Self {
        self.conflict_key = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_touch_field(mut self, field: &str) -> Self {
        self.touch_field = Some(field.to_string());
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields in output order: the primary key first, then declaration order.
    pub fn ordered_fields(&self) -> Vec<&FieldSpec> {
        let mut ordered = Vec::with_capacity(self.fields.len());
        if let Some(pk) = self.field(&self.primary_key) {
            ordered.push(pk);
        }
        ordered.extend(self.fields.iter().filter(|f| f.name != self.primary_key));
        ordered
    }

    pub fn field_names(&self) -> Vec<String> {
        self.ordered_fields()
            .iter()
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn conflict_fields(&self) -> Vec<&str> {
        if self.conflict_key.is_empty() {
            vec![self.primary_key.as_str()]
        } else {
            self.conflict_key.iter().map(String::as_str).collect()
        }
    }

    pub fn is_conflict_field(&self, name: &str) -> bool {
        self.conflict_fields().contains(&name)
    }

    pub fn is_touch_field(&self, name: &str) -> bool {
        self.touch_field.as_deref() == Some(name)
    }

    /// Source columns that must exist for the primary key to be derivable.
    pub fn key_source_columns(&self) -> Vec<&str> {
        match self.field(&self.primary_key).map(|f| &f.source) {
            Some(FieldSource::Concat(spec)) => spec.parts.iter().map(String::as_str).collect(),
            Some(FieldSource::Column(column)) => vec![column.as_str()],
            _ => Vec::new(),
        }
    }

    pub fn validate(&self, declarations: &TypeDeclarations) -> Result<(), SchemaError> {
        let table = self.name.clone();
        let mut names = HashSet::new();
        let mut sources: HashMap<&str, &str> = HashMap::new();
        for field in &self.fields {
            if !names.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    table,
                    field: field.name.clone(),
                });
            }
            if let Some(column) = field.source_column() {
                if let Some(first) = sources.insert(column, field.name.as_str()) {
                    return Err(SchemaError::DuplicateSource {
                        table,
                        column: column.to_string(),
                        first: first.to_string(),
                        second: field.name.clone(),
                    });
                }
                if field.datatype == FieldType::Boolean && declarations.is_boolean_denied(column)
                {
                    return Err(SchemaError::DeniedBoolean {
                        table,
                        field: field.name.clone(),
                        column: column.to_string(),
                    });
                }
                if declarations.boolean_allow.contains(column)
                    && field.datatype != FieldType::Boolean
                {
                    return Err(SchemaError::TypeMismatch {
                        table,
                        field: field.name.clone(),
                        expected: FieldType::Boolean,
                        actual: field.datatype,
                    });
                }
            }
            self.validate_field_shape(field)?;
        }

        let pk = self
            .field(&self.primary_key)
            .ok_or_else(|| SchemaError::UnknownField {
                table: table.clone(),
                field: self.primary_key.clone(),
                role: "primary key",
            })?;
        if matches!(pk.source, FieldSource::Synthesized | FieldSource::LoadTime) {
            return Err(SchemaError::EmptyKey {
                table,
                field: pk.name.clone(),
            });
        }
        for key in &self.conflict_key {
            if self.field(key).is_none() {
                return Err(SchemaError::UnknownField {
                    table,
                    field: key.clone(),
                    role: "conflict key",
                });
            }
        }
        if let Some(touch) = &self.touch_field {
            let field = self.field(touch).ok_or_else(|| SchemaError::UnknownField {
                table: table.clone(),
                field: touch.clone(),
                role: "touch field",
            })?;
            if field.datatype != FieldType::Timestamp {
                return Err(SchemaError::TypeMismatch {
                    table,
                    field: touch.clone(),
                    expected: FieldType::Timestamp,
                    actual: field.datatype,
                });
            }
        }
        Ok(())
    }

    fn validate_field_shape(&self, field: &FieldSpec) -> Result<(), SchemaError> {
        if !field.null_policy.allowed_for(field.datatype) {
            return Err(SchemaError::IllegalPolicy {
                table: self.name.clone(),
                field: field.name.clone(),
                policy: field.null_policy.to_string(),
                datatype: field.datatype,
            });
        }
        if let NullPolicy::Default(value) = &field.null_policy {
            let parses = match field.datatype {
                FieldType::Integer => parse_integer(value).is_some(),
                FieldType::Timestamp => parse_timestamp(value).is_ok(),
                _ => true,
            };
            if !parses {
                return Err(SchemaError::InvalidDefault {
                    table: self.name.clone(),
                    field: field.name.clone(),
                    value: value.clone(),
                    datatype: field.datatype,
                });
            }
        }
        match &field.source {
            FieldSource::Concat(spec) if spec.parts.is_empty() => Err(SchemaError::EmptyKey {
                table: self.name.clone(),
                field: field.name.clone(),
            }),
            FieldSource::Concat(_) if field.datatype != FieldType::Text => {
                Err(SchemaError::TypeMismatch {
                    table: self.name.clone(),
                    field: field.name.clone(),
                    expected: FieldType::Text,
                    actual: field.datatype,
                })
            }
            FieldSource::LoadTime if field.datatype != FieldType::Timestamp => {
                Err(SchemaError::TypeMismatch {
                    table: self.name.clone(),
                    field: field.name.clone(),
                    expected: FieldType::Timestamp,
                    actual: field.datatype,
                })
            }
            _ => Ok(()),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema file {path:?}"))?;
        let reader = BufReader::new(file);
        let schema: TableSchema =
            serde_yaml::from_reader(reader).context("Parsing table schema YAML")?;
        Ok(schema)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating schema file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing table schema YAML")
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Serializing table schema to YAML string")
    }
}
