//! Declarative description of every option the front-ends expose.
//!
//! A schema is a list of categories, each an ordered list of fields. Field
//! order is display order. The built-in schema lives in
//! `data/settings.json`; alternative schemas load through the same path and
//! must pass [`Schema::validate`] against the snapshot before anything is
//! rendered from them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::store::{self, ConfigStore, StoreError};

const BUILTIN_SCHEMA: &str = include_str!("../data/settings.json");

pub const NO_HELP: &str = "No help available.";
pub const UNKNOWN_NAME: &str = "???";

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid settings schema: {0}")]
    Parse(String),
    #[error("duplicate {what} '{name}' in settings schema")]
    Duplicate { what: &'static str, name: String },
    #[error("settings schema does not match configuration at '{path}': {reason}")]
    Mismatch { path: String, reason: String },
    #[error("invalid dataset names: {0}")]
    Datasets(String),
    #[error("invalid help texts: {0}")]
    HelpTexts(String),
    #[error("could not read {0}")]
    Io(String),
}

/// Large external name tables an enabled-set field or lookup column can
/// refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    Items,
    Moves,
    Monsters,
    Abilities,
    Dungeons,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub code: i64,
    pub text: String,
}

/// How a display column derives its text from the row key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lookup {
    RowKey,
    DatasetName(Dataset),
    IdAndName(Dataset),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnKind {
    Toggle,
    Display {
        #[serde(default)]
        lookup: Option<Lookup>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub label: String,
    #[serde(flatten)]
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    Toggle,
    Choice { options: Vec<ChoiceOption> },
    Text,
    Bounded { max: u32 },
    EnabledSet { dataset: Dataset },
    Grid { columns: Vec<Column> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub help: Option<String>,
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl Field {
    pub fn help_text(&self) -> &str {
        match self.help.as_deref() {
            Some(help) if !help.trim().is_empty() => help,
            _ => NO_HELP,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub title: String,
    pub fields: Vec<Field>,
}

impl Category {
    pub fn field_path(&self, field: &Field) -> String {
        store::join(&[self.name.as_str(), field.name.as_str()])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub categories: Vec<Category>,
}

impl Schema {
    pub fn builtin() -> Result<Self, SchemaError> {
        Self::from_json_str(BUILTIN_SCHEMA)
    }

    pub fn from_json_str(data: &str) -> Result<Self, SchemaError> {
        let schema: Schema =
            serde_json::from_str(data).map_err(|e| SchemaError::Parse(e.to_string()))?;
        schema.check_unique()?;
        Ok(schema)
    }

    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let data = fs::read_to_string(path)
            .map_err(|e| SchemaError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&data)
    }

    pub fn category(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name == name)
    }

    /// Replaces field help with the entries of `texts`. Fields without an
    /// entry keep what the schema declares. Returns how many were replaced.
    pub fn apply_help(&mut self, texts: &HelpTexts) -> usize {
        let mut applied = 0;
        for category in &mut self.categories {
            for field in &mut category.fields {
                if let Some(text) = texts.get(&category.name, &field.name) {
                    field.help = Some(text.to_string());
                    applied += 1;
                }
            }
        }
        applied
    }

    fn check_unique(&self) -> Result<(), SchemaError> {
        let mut categories = HashSet::new();
        for category in &self.categories {
            if !categories.insert(category.name.as_str()) {
                return Err(SchemaError::Duplicate {
                    what: "category",
                    name: category.name.clone(),
                });
            }
            let mut fields = HashSet::new();
            for field in &category.fields {
                if !fields.insert(field.name.as_str()) {
                    return Err(SchemaError::Duplicate {
                        what: "field",
                        name: category.field_path(field),
                    });
                }
                if let FieldKind::Grid { columns } = &field.kind {
                    let mut names = HashSet::new();
                    for column in columns {
                        if !names.insert(column.name.as_str()) {
                            return Err(SchemaError::Duplicate {
                                what: "column",
                                name: store::join(&[
                                    category.field_path(field).as_str(),
                                    column.name.as_str(),
                                ]),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Checks that every field resolves in `store` with the value kind its
    /// control binds to.
    pub fn validate(&self, store: &ConfigStore) -> Result<(), SchemaError> {
        for category in &self.categories {
            for field in &category.fields {
                let path = category.field_path(field);
                validate_field(store, &path, &field.kind).map_err(|e| SchemaError::Mismatch {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
                if let FieldKind::Bounded { max } = &field.kind {
                    let value = store.get_int(&path).unwrap_or_default();
                    if !(0..=i64::from(*max)).contains(&value) {
                        return Err(SchemaError::Mismatch {
                            reason: format!("{} is outside 0..={}", value, max),
                            path,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn validate_field(store: &ConfigStore, path: &str, kind: &FieldKind) -> Result<(), StoreError> {
    match kind {
        FieldKind::Toggle => store.get_bool(path).map(drop),
        FieldKind::Choice { options } => {
            let code = store.get_int(path)?;
            if !options.iter().any(|o| o.code == code) {
                log::warn!("{} holds code {} which is not one of its options", path, code);
            }
            Ok(())
        }
        FieldKind::Text => store.get_text(path).map(drop),
        FieldKind::Bounded { .. } => store.get_int(path).map(drop),
        FieldKind::EnabledSet { .. } => store.get_id_set(path).map(drop),
        FieldKind::Grid { columns } => {
            for row in store.children(path)? {
                for column in columns {
                    let cell = store::join(&[path, row, column.name.as_str()]);
                    match &column.kind {
                        ColumnKind::Toggle => {
                            store.get_bool(&cell)?;
                        }
                        ColumnKind::Display { lookup: None } => {
                            store.get(&cell)?;
                        }
                        ColumnKind::Display { lookup: Some(_) } => {}
                    }
                }
            }
            Ok(())
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NameTable {
    Map(BTreeMap<String, String>),
    Pairs(Vec<(i64, String)>),
}

/// Id to display-name tables, each sorted by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Datasets {
    tables: HashMap<Dataset, Vec<(i64, String)>>,
}

impl Datasets {
    pub fn from_json_str(data: &str) -> Result<Self, SchemaError> {
        let raw: HashMap<Dataset, NameTable> =
            serde_json::from_str(data).map_err(|e| SchemaError::Datasets(e.to_string()))?;
        let mut datasets = Datasets::default();
        for (dataset, table) in raw {
            let entries = match table {
                NameTable::Pairs(pairs) => pairs,
                NameTable::Map(map) => map
                    .into_iter()
                    .map(|(id, name)| {
                        id.trim()
                            .parse::<i64>()
                            .map(|id| (id, name))
                            .map_err(|_| SchemaError::Datasets(format!("'{}' is not a numeric id", id)))
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            };
            datasets.insert(dataset, entries);
        }
        Ok(datasets)
    }

    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let data = fs::read_to_string(path)
            .map_err(|e| SchemaError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&data)
    }

    pub fn insert(&mut self, dataset: Dataset, mut entries: Vec<(i64, String)>) {
        entries.sort_by_key(|(id, _)| *id);
        entries.dedup_by_key(|(id, _)| *id);
        self.tables.insert(dataset, entries);
    }

    pub fn entries(&self, dataset: Dataset) -> &[(i64, String)] {
        self.tables.get(&dataset).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn name(&self, dataset: Dataset, id: i64) -> &str {
        let entries = self.entries(dataset);
        entries
            .binary_search_by_key(&id, |(i, _)| *i)
            .map(|idx| entries[idx].1.as_str())
            .unwrap_or(UNKNOWN_NAME)
    }

    /// Text a lookup column shows for a given row key.
    pub fn resolve(&self, lookup: Lookup, row_key: &str) -> String {
        let id = row_key.trim().parse::<i64>().ok();
        match (lookup, id) {
            (Lookup::RowKey, _) => row_key.to_string(),
            (Lookup::DatasetName(dataset), Some(id)) => self.name(dataset, id).to_string(),
            (Lookup::IdAndName(dataset), Some(id)) => format!("{}: {}", id, self.name(dataset, id)),
            (Lookup::DatasetName(_), None) => UNKNOWN_NAME.to_string(),
            (Lookup::IdAndName(_), None) => format!("{}: {}", row_key, UNKNOWN_NAME),
        }
    }
}

/// Help for each field, keyed by category then field name. Entries that
/// are not strings are skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HelpTexts {
    texts: HashMap<String, HashMap<String, String>>,
}

impl HelpTexts {
    pub fn from_json_str(data: &str) -> Result<Self, SchemaError> {
        let raw: HashMap<String, HashMap<String, serde_json::Value>> =
            serde_json::from_str(data).map_err(|e| SchemaError::HelpTexts(e.to_string()))?;
        let texts = raw
            .into_iter()
            .map(|(category, fields)| {
                let fields = fields
                    .into_iter()
                    .filter_map(|(field, text)| match text {
                        serde_json::Value::String(text) => Some((field, text)),
                        _ => None,
                    })
                    .collect();
                (category, fields)
            })
            .collect();
        Ok(Self { texts })
    }

    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let data = fs::read_to_string(path)
            .map_err(|e| SchemaError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&data)
    }

    pub fn get(&self, category: &str, field: &str) -> Option<&str> {
        self.texts.get(category)?.get(field).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults;

    #[test]
    fn builtin_schema_parses_and_matches_default_snapshot() {
        let schema = Schema::builtin().unwrap();
        let store = defaults::default_store().unwrap();
        schema.validate(&store).unwrap();
        let names: Vec<&str> = schema.categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            ["starters_npcs", "dungeons", "improvements", "pokemon", "locations", "chapters", "text"]
        );
    }

    #[test]
    fn unknown_field_kind_is_a_load_error() {
        let doc = r#"{"categories": [{"name": "a", "title": "A", "fields": [
            {"name": "x", "label": "X", "kind": "colour_picker"}
        ]}]}"#;
        assert!(matches!(Schema::from_json_str(doc), Err(SchemaError::Parse(_))));
    }

    #[test]
    fn unknown_column_kind_is_a_load_error() {
        let doc = r#"{"categories": [{"name": "a", "title": "A", "fields": [
            {"name": "g", "label": "G", "kind": "grid", "columns": [
                {"name": "c", "label": "C", "kind": "slider"}
            ]}
        ]}]}"#;
        assert!(matches!(Schema::from_json_str(doc), Err(SchemaError::Parse(_))));
    }

    #[test]
    fn duplicate_fields_are_rejected() {
        let doc = r#"{"categories": [{"name": "a", "title": "A", "fields": [
            {"name": "x", "label": "X", "kind": "toggle"},
            {"name": "x", "label": "X again", "kind": "text"}
        ]}]}"#;
        assert!(matches!(
            Schema::from_json_str(doc),
            Err(SchemaError::Duplicate { what: "field", .. })
        ));
    }

    #[test]
    fn validate_reports_wrong_kind() {
        let doc = r#"{"categories": [{"name": "a", "title": "A", "fields": [
            {"name": "x", "label": "X", "kind": "toggle"}
        ]}]}"#;
        let schema = Schema::from_json_str(doc).unwrap();
        let store = ConfigStore::from_snapshot(serde_json::json!({"a": {"x": 3}})).unwrap();
        match schema.validate(&store) {
            Err(SchemaError::Mismatch { path, .. }) => assert_eq!(path, "a.x"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn validate_requires_toggle_cells_in_every_grid_row() {
        let doc = r#"{"categories": [{"name": "d", "title": "D", "fields": [
            {"name": "settings", "label": "S", "kind": "grid", "columns": [
                {"name": "_name", "label": "Dungeon", "kind": "display", "lookup": {"id_and_name": "dungeons"}},
                {"name": "unlock", "label": "Unlock?", "kind": "toggle"}
            ]}
        ]}]}"#;
        let schema = Schema::from_json_str(doc).unwrap();
        let store = ConfigStore::from_snapshot(serde_json::json!({
            "d": {"settings": {"0": {"unlock": true}, "1": {"randomize": true}}}
        }))
        .unwrap();
        assert!(matches!(schema.validate(&store), Err(SchemaError::Mismatch { .. })));
    }

    #[test]
    fn datasets_accept_maps_and_pairs() {
        let ds = Datasets::from_json_str(
            r#"{"items": {"10": "Apple", "2": "Stick"}, "moves": [[5, "Tackle"], [1, "Pound"]]}"#,
        )
        .unwrap();
        assert_eq!(ds.entries(Dataset::Items), &[(2, "Stick".to_string()), (10, "Apple".to_string())]);
        assert_eq!(ds.name(Dataset::Moves, 1), "Pound");
        assert_eq!(ds.name(Dataset::Moves, 99), UNKNOWN_NAME);
        assert!(ds.entries(Dataset::Abilities).is_empty());
    }

    #[test]
    fn datasets_reject_non_numeric_ids() {
        assert!(Datasets::from_json_str(r#"{"items": {"x": "Apple"}}"#).is_err());
    }

    #[test]
    fn lookups_resolve_from_row_key() {
        let mut ds = Datasets::default();
        ds.insert(Dataset::Dungeons, vec![(3, "Mt. Steel".into())]);
        assert_eq!(ds.resolve(Lookup::IdAndName(Dataset::Dungeons), "3"), "3: Mt. Steel");
        assert_eq!(ds.resolve(Lookup::DatasetName(Dataset::Dungeons), "3"), "Mt. Steel");
        assert_eq!(ds.resolve(Lookup::RowKey, "3"), "3");
        assert_eq!(ds.resolve(Lookup::IdAndName(Dataset::Dungeons), "x"), "x: ???");
    }

    #[test]
    fn validate_rejects_bounded_values_out_of_range() {
        let doc = r#"{"categories": [{"name": "d", "title": "D", "fields": [
            {"name": "chance", "label": "C", "kind": "bounded", "max": 100}
        ]}]}"#;
        let schema = Schema::from_json_str(doc).unwrap();
        let fits = ConfigStore::from_snapshot(serde_json::json!({"d": {"chance": 100}})).unwrap();
        schema.validate(&fits).unwrap();
        for bad in [150, -1] {
            let store = ConfigStore::from_snapshot(serde_json::json!({"d": {"chance": bad}})).unwrap();
            match schema.validate(&store) {
                Err(SchemaError::Mismatch { path, .. }) => assert_eq!(path, "d.chance"),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn help_texts_replace_declared_help() {
        let mut schema = Schema::builtin().unwrap();
        let texts = HelpTexts::from_json_str(
            r#"{"dungeons": {"layouts": "Shuffles floor layouts.", "mode": "Mode help.", "nested": {"x": "y"}},
                "nowhere": {"x": "ignored"}}"#,
        )
        .unwrap();
        assert_eq!(schema.apply_help(&texts), 2);
        let dungeons = schema.category("dungeons").unwrap();
        let field = |name: &str| dungeons.fields.iter().find(|f| f.name == name).unwrap();
        assert_eq!(field("layouts").help_text(), "Shuffles floor layouts.");
        assert_eq!(field("mode").help_text(), "Mode help.");
        assert_eq!(field("weather").help_text(), NO_HELP);
    }

    #[test]
    fn help_texts_must_be_nested_objects() {
        assert!(matches!(
            HelpTexts::from_json_str(r#"["not", "a", "table"]"#),
            Err(SchemaError::HelpTexts(_))
        ));
    }

    #[test]
    fn help_falls_back_when_missing() {
        let field = Field {
            name: "x".into(),
            label: "X".into(),
            help: None,
            kind: FieldKind::Toggle,
        };
        assert_eq!(field.help_text(), NO_HELP);
    }
}
