//! Turns a schema category into controls bound to a [`ConfigStore`].
//!
//! Controls are toolkit-neutral: a front-end draws them however it likes
//! and routes user input through their change methods, which write to the
//! store straight away. Each control also keeps the last value it wrote so
//! a front-end can redraw without reading the store back.

use thiserror::Error;

use crate::chunk::TableLayout;
use crate::schema::{
    Category, ChoiceOption, ColumnKind, Dataset, Datasets, Field, FieldKind, Lookup, Schema,
    SchemaError,
};
use crate::store::{self, ConfigStore, StoreError, Value};

/// Path of the seed the randomisation dialog edits.
pub const SEED_PATH: &str = "seed";

#[derive(Debug, Error, PartialEq)]
pub enum RenderError {
    #[error("unknown settings category '{0}'")]
    UnknownCategory(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{code} is not a valid option for '{path}'")]
    InvalidChoice { path: String, code: i64 },
    #[error("'{path}' needs a finite number")]
    NonFiniteInput { path: String },
    #[error("column '{column}' of '{path}' is read-only")]
    ReadOnlyColumn { path: String, column: String },
    #[error("'{path}' has no cell at row {row}, column {column}")]
    NoSuchCell { path: String, row: usize, column: usize },
}

pub type RenderResult<T> = std::result::Result<T, RenderError>;

/// What every control shows next to its input.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlInfo {
    pub path: String,
    pub label: String,
    pub help: String,
}

impl ControlInfo {
    fn new(path: String, field: &Field) -> Self {
        Self {
            path,
            label: field.label.clone(),
            help: field.help_text().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToggleControl {
    pub info: ControlInfo,
    value: bool,
}

impl ToggleControl {
    pub fn value(&self) -> bool {
        self.value
    }

    pub fn set(&mut self, store: &mut ConfigStore, value: bool) -> RenderResult<()> {
        store.set(&self.info.path, Value::Bool(value))?;
        self.value = value;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceControl {
    pub info: ControlInfo,
    pub options: Vec<ChoiceOption>,
    selected: i64,
}

impl ChoiceControl {
    pub fn selected(&self) -> i64 {
        self.selected
    }

    pub fn selected_text(&self) -> Option<&str> {
        self.options
            .iter()
            .find(|o| o.code == self.selected)
            .map(|o| o.text.as_str())
    }

    pub fn select(&mut self, store: &mut ConfigStore, code: i64) -> RenderResult<()> {
        if !self.options.iter().any(|o| o.code == code) {
            return Err(RenderError::InvalidChoice {
                path: self.info.path.clone(),
                code,
            });
        }
        store.set(&self.info.path, Value::Int(code))?;
        self.selected = code;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextControl {
    pub info: ControlInfo,
    value: String,
}

impl TextControl {
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn edit(&mut self, store: &mut ConfigStore, value: String) -> RenderResult<()> {
        store.set(&self.info.path, Value::Text(value.clone()))?;
        self.value = value;
        Ok(())
    }
}

/// Rounds `input` up to the next integer and clamps it to `[0, max]`.
/// Returns `None` for NaN and infinities.
pub fn clamp_bounded(input: f64, max: u32) -> Option<i64> {
    if !input.is_finite() {
        return None;
    }
    Some(input.ceil().clamp(0.0, f64::from(max)) as i64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundedControl {
    pub info: ControlInfo,
    pub max: u32,
    value: i64,
}

impl BoundedControl {
    pub fn value(&self) -> i64 {
        self.value
    }

    /// Stores `input` after rounding it up and clamping it to the range.
    /// Returns the value actually stored.
    pub fn input(&mut self, store: &mut ConfigStore, input: f64) -> RenderResult<i64> {
        let value = clamp_bounded(input, self.max).ok_or_else(|| RenderError::NonFiniteInput {
            path: self.info.path.clone(),
        })?;
        store.set(&self.info.path, Value::Int(value))?;
        self.value = value;
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnHeader {
    pub label: String,
    pub toggle: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Label(String),
    Switch(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    /// Row id for enabled sets, grid row key otherwise.
    pub key: String,
    /// Name used when labelling the chunk the row falls in.
    pub title: String,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq)]
enum TableBinding {
    EnabledSet,
    /// Column names, in column order.
    Grid(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableControl {
    pub info: ControlInfo,
    pub columns: Vec<ColumnHeader>,
    pub rows: Vec<TableRow>,
    pub layout: TableLayout,
    binding: TableBinding,
}

impl TableControl {
    fn new(info: ControlInfo, columns: Vec<ColumnHeader>, rows: Vec<TableRow>, binding: TableBinding) -> Self {
        let titles: Vec<&str> = rows.iter().map(|r| r.title.as_str()).collect();
        let layout = TableLayout::for_rows(&titles);
        Self {
            info,
            columns,
            rows,
            layout,
            binding,
        }
    }

    pub fn is_enabled_set(&self) -> bool {
        matches!(self.binding, TableBinding::EnabledSet)
    }

    /// Flips the switch at (`row`, `column`) and writes it to the store.
    pub fn toggle(&mut self, store: &mut ConfigStore, row: usize, column: usize, checked: bool) -> RenderResult<()> {
        let no_such_cell = || RenderError::NoSuchCell {
            path: self.info.path.clone(),
            row,
            column,
        };
        let header = self.columns.get(column).ok_or_else(no_such_cell)?;
        let table_row = self.rows.get(row).ok_or_else(no_such_cell)?;
        if !header.toggle {
            return Err(RenderError::ReadOnlyColumn {
                path: self.info.path.clone(),
                column: header.label.clone(),
            });
        }

        match &self.binding {
            TableBinding::EnabledSet => {
                let id = table_row
                    .key
                    .parse::<i64>()
                    .map_err(|_| no_such_cell())?;
                store.toggle_membership(&self.info.path, id, checked)?;
            }
            TableBinding::Grid(names) => {
                let name = names.get(column).ok_or_else(no_such_cell)?;
                let path = store::join(&[self.info.path.as_str(), table_row.key.as_str(), name.as_str()]);
                store.set(&path, Value::Bool(checked))?;
            }
        }

        if let Some(cell) = self.rows[row].cells.get_mut(column) {
            *cell = Cell::Switch(checked);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Toggle(ToggleControl),
    Choice(ChoiceControl),
    Text(TextControl),
    Bounded(BoundedControl),
    Table(TableControl),
}

impl Control {
    pub fn info(&self) -> &ControlInfo {
        match self {
            Control::Toggle(c) => &c.info,
            Control::Choice(c) => &c.info,
            Control::Text(c) => &c.info,
            Control::Bounded(c) => &c.info,
            Control::Table(c) => &c.info,
        }
    }
}

pub struct Renderer {
    schema: Schema,
    datasets: Datasets,
}

impl Renderer {
    /// Fails if `schema` does not fit the snapshot in `store`.
    pub fn new(schema: Schema, datasets: Datasets, store: &ConfigStore) -> Result<Self, SchemaError> {
        schema.validate(store)?;
        Ok(Self { schema, datasets })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn render(&self, store: &ConfigStore, category: &str) -> RenderResult<Vec<Control>> {
        let category = self
            .schema
            .category(category)
            .ok_or_else(|| RenderError::UnknownCategory(category.to_string()))?;
        category
            .fields
            .iter()
            .map(|field| self.render_field(store, category, field))
            .collect()
    }

    /// The free-text seed, if the snapshot carries one.
    pub fn seed_control(&self, store: &ConfigStore) -> Option<TextControl> {
        let value = store.get_text(SEED_PATH).ok()?.to_string();
        Some(TextControl {
            info: ControlInfo {
                path: SEED_PATH.to_string(),
                label: "Seed".to_string(),
                help: "Leave empty to pick a seed automatically.".to_string(),
            },
            value,
        })
    }

    fn render_field(&self, store: &ConfigStore, category: &Category, field: &Field) -> RenderResult<Control> {
        let path = category.field_path(field);
        let info = ControlInfo::new(path.clone(), field);
        let control = match &field.kind {
            FieldKind::Toggle => Control::Toggle(ToggleControl {
                value: store.get_bool(&path)?,
                info,
            }),
            FieldKind::Choice { options } => Control::Choice(ChoiceControl {
                selected: store.get_int(&path)?,
                options: options.clone(),
                info,
            }),
            FieldKind::Text => Control::Text(TextControl {
                value: store.get_text(&path)?.to_string(),
                info,
            }),
            FieldKind::Bounded { max } => Control::Bounded(BoundedControl {
                value: store.get_int(&path)?,
                max: *max,
                info,
            }),
            FieldKind::EnabledSet { dataset } => {
                Control::Table(self.enabled_set_table(store, info, *dataset)?)
            }
            FieldKind::Grid { columns } => {
                let headers = columns
                    .iter()
                    .map(|c| ColumnHeader {
                        label: c.label.clone(),
                        toggle: c.kind == ColumnKind::Toggle,
                    })
                    .collect();
                let mut rows = Vec::new();
                for key in store.children(&path)? {
                    let mut cells = Vec::with_capacity(columns.len());
                    for column in columns {
                        let cell_path = store::join(&[path.as_str(), key, column.name.as_str()]);
                        let cell = match &column.kind {
                            ColumnKind::Toggle => Cell::Switch(store.get_bool(&cell_path)?),
                            ColumnKind::Display { lookup: Some(lookup) } => {
                                Cell::Label(self.datasets.resolve(*lookup, key))
                            }
                            ColumnKind::Display { lookup: None } => {
                                Cell::Label(display_value(store.get(&cell_path)?))
                            }
                        };
                        cells.push(cell);
                    }
                    let title = cells
                        .iter()
                        .find_map(|c| match c {
                            Cell::Label(text) => Some(text.clone()),
                            Cell::Switch(_) => None,
                        })
                        .unwrap_or_else(|| key.to_string());
                    rows.push(TableRow {
                        key: key.to_string(),
                        title,
                        cells,
                    });
                }
                let names = columns.iter().map(|c| c.name.clone()).collect();
                Control::Table(TableControl::new(info, headers, rows, TableBinding::Grid(names)))
            }
        };
        Ok(control)
    }

    fn enabled_set_table(&self, store: &ConfigStore, info: ControlInfo, dataset: Dataset) -> RenderResult<TableControl> {
        let enabled = store.get_id_set(&info.path)?;
        let rows = self
            .datasets
            .entries(dataset)
            .iter()
            .map(|(id, _)| {
                let title = self.datasets.resolve(Lookup::IdAndName(dataset), &id.to_string());
                TableRow {
                    key: id.to_string(),
                    cells: vec![Cell::Label(title.clone()), Cell::Switch(enabled.contains(id))],
                    title,
                }
            })
            .collect();
        let columns = vec![
            ColumnHeader {
                label: "Name".to_string(),
                toggle: false,
            },
            ColumnHeader {
                label: "Use?".to_string(),
                toggle: true,
            },
        ];
        Ok(TableControl::new(info, columns, rows, TableBinding::EnabledSet))
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Bool(true) => "Yes".to_string(),
        Value::Bool(false) => "No".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Text(s) => s.clone(),
        Value::IdSet(ids) => ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Raw(raw) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::CHUNK_SIZE;
    use serde_json::json;

    const SCHEMA: &str = r#"{"categories": [{"name": "dungeons", "title": "Dungeons", "fields": [
        {"name": "layouts", "label": "Randomize Layouts?", "kind": "toggle", "help": "Layouts."},
        {"name": "mode", "label": "Mode", "kind": "choice", "options": [
            {"code": 0, "text": "Fully random"}, {"code": 1, "text": "Similar"}
        ]},
        {"name": "name", "label": "Name", "kind": "text"},
        {"name": "chance", "label": "Chance", "kind": "bounded", "max": 100},
        {"name": "items_enabled", "label": "Enabled Items", "kind": "enabled_set", "dataset": "items"},
        {"name": "settings", "label": "Dungeon Settings", "kind": "grid", "columns": [
            {"name": "_name", "label": "Dungeon", "kind": "display", "lookup": {"id_and_name": "dungeons"}},
            {"name": "unlock", "label": "Unlock?", "kind": "toggle"},
            {"name": "floors", "label": "Floors", "kind": "display"}
        ]}
    ]}]}"#;

    fn fixture(items: i64) -> (Renderer, ConfigStore) {
        let store = ConfigStore::from_snapshot(json!({
            "dungeons": {
                "layouts": false,
                "mode": 0,
                "name": "Beach Cave",
                "chance": 10,
                "items_enabled": [1, 3],
                "settings": {
                    "5": {"unlock": false, "floors": 4},
                    "1": {"unlock": true, "floors": 9}
                }
            },
            "seed": "ABC"
        }))
        .unwrap();
        let mut datasets = Datasets::default();
        datasets.insert(Dataset::Items, (1..=items).map(|i| (i, format!("Item {}", i))).collect());
        datasets.insert(Dataset::Dungeons, vec![(1, "Beach Cave".into()), (5, "Drenched Bluff".into())]);
        let schema = Schema::from_json_str(SCHEMA).unwrap();
        (Renderer::new(schema, datasets, &store).unwrap(), store)
    }

    fn control<'a>(controls: &'a mut [Control], path: &str) -> &'a mut Control {
        controls.iter_mut().find(|c| c.info().path == path).unwrap()
    }

    #[test]
    fn renders_one_control_per_field_in_order() {
        let (renderer, store) = fixture(3);
        let controls = renderer.render(&store, "dungeons").unwrap();
        let paths: Vec<&str> = controls.iter().map(|c| c.info().path.as_str()).collect();
        assert_eq!(
            paths,
            [
                "dungeons.layouts",
                "dungeons.mode",
                "dungeons.name",
                "dungeons.chance",
                "dungeons.items_enabled",
                "dungeons.settings"
            ]
        );
        assert_eq!(controls[0].info().help, "Layouts.");
        assert_eq!(controls[1].info().help, crate::schema::NO_HELP);
    }

    #[test]
    fn unknown_category_is_an_error() {
        let (renderer, store) = fixture(3);
        assert_eq!(
            renderer.render(&store, "nope"),
            Err(RenderError::UnknownCategory("nope".into()))
        );
    }

    #[test]
    fn scalar_controls_write_through() {
        let (renderer, mut store) = fixture(3);
        let mut controls = renderer.render(&store, "dungeons").unwrap();

        if let Control::Toggle(c) = control(&mut controls, "dungeons.layouts") {
            c.set(&mut store, true).unwrap();
            assert!(c.value());
        }
        if let Control::Choice(c) = control(&mut controls, "dungeons.mode") {
            c.select(&mut store, 1).unwrap();
            assert_eq!(c.selected_text(), Some("Similar"));
            assert!(c.select(&mut store, 7).is_err());
        }
        if let Control::Text(c) = control(&mut controls, "dungeons.name") {
            c.edit(&mut store, "Mt. Thunder".into()).unwrap();
        }

        assert!(store.get_bool("dungeons.layouts").unwrap());
        assert_eq!(store.get_int("dungeons.mode").unwrap(), 1);
        assert_eq!(store.get_text("dungeons.name").unwrap(), "Mt. Thunder");
    }

    #[test]
    fn bounded_rounds_up_and_clamps() {
        let (renderer, mut store) = fixture(3);
        let mut controls = renderer.render(&store, "dungeons").unwrap();
        let Control::Bounded(c) = control(&mut controls, "dungeons.chance") else {
            panic!("expected a bounded control");
        };
        assert_eq!(c.input(&mut store, 55.4).unwrap(), 56);
        assert_eq!(store.get_int("dungeons.chance").unwrap(), 56);
        assert_eq!(c.input(&mut store, 150.0).unwrap(), 100);
        assert_eq!(c.input(&mut store, -3.0).unwrap(), 0);
        assert!(c.input(&mut store, f64::NAN).is_err());
        assert_eq!(store.get_int("dungeons.chance").unwrap(), 0);
    }

    #[test]
    fn enabled_set_rows_reflect_membership() {
        let (renderer, mut store) = fixture(3);
        let mut controls = renderer.render(&store, "dungeons").unwrap();
        let Control::Table(table) = control(&mut controls, "dungeons.items_enabled") else {
            panic!("expected a table");
        };
        assert!(table.is_enabled_set());
        let switches: Vec<&Cell> = table.rows.iter().map(|r| &r.cells[1]).collect();
        assert_eq!(switches, [&Cell::Switch(true), &Cell::Switch(false), &Cell::Switch(true)]);
        assert_eq!(table.rows[1].cells[0], Cell::Label("2: Item 2".into()));

        table.toggle(&mut store, 1, 1, true).unwrap();
        table.toggle(&mut store, 1, 1, true).unwrap();
        assert_eq!(store.get_id_set("dungeons.items_enabled").unwrap(), &[1, 3, 2]);
        table.toggle(&mut store, 1, 1, false).unwrap();
        assert_eq!(store.get_id_set("dungeons.items_enabled").unwrap(), &[1, 3]);
        assert_eq!(table.rows[1].cells[1], Cell::Switch(false));

        assert!(matches!(
            table.toggle(&mut store, 0, 0, true),
            Err(RenderError::ReadOnlyColumn { .. })
        ));
    }

    #[test]
    fn grid_rows_follow_store_order_and_bind_toggle_columns() {
        let (renderer, mut store) = fixture(3);
        let mut controls = renderer.render(&store, "dungeons").unwrap();
        let Control::Table(table) = control(&mut controls, "dungeons.settings") else {
            panic!("expected a table");
        };
        assert!(!table.is_enabled_set());
        let keys: Vec<&str> = table.rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["5", "1"]);
        assert_eq!(table.rows[0].title, "5: Drenched Bluff");
        assert_eq!(table.rows[0].cells[2], Cell::Label("4".into()));

        table.toggle(&mut store, 0, 1, true).unwrap();
        assert!(store.get_bool("dungeons.settings.5.unlock").unwrap());
        assert!(store.get_bool("dungeons.settings.1.unlock").unwrap());
        assert!(matches!(
            table.toggle(&mut store, 0, 2, true),
            Err(RenderError::ReadOnlyColumn { .. })
        ));
        assert!(matches!(
            table.toggle(&mut store, 9, 1, true),
            Err(RenderError::NoSuchCell { .. })
        ));
    }

    #[test]
    fn large_enabled_sets_are_chunked() {
        let (renderer, store) = fixture(45);
        let controls = renderer.render(&store, "dungeons").unwrap();
        let Some(Control::Table(table)) = controls.iter().find(|c| c.info().path == "dungeons.items_enabled") else {
            panic!("expected a table");
        };
        let chunks = table.layout.chunks();
        assert_eq!(chunks.len(), 45usize.div_ceil(CHUNK_SIZE));
        assert_eq!(chunks[0].label, "1: Item 1 - 20: Item 20");
        assert_eq!(chunks[2].label, "41: Item 41 - 45: Item 45");
    }

    #[test]
    fn seed_control_edits_top_level_seed() {
        let (renderer, mut store) = fixture(3);
        let mut seed = renderer.seed_control(&store).unwrap();
        assert_eq!(seed.value(), "ABC");
        seed.edit(&mut store, "12345".into()).unwrap();
        assert_eq!(store.get_text(SEED_PATH).unwrap(), "12345");
    }
}
