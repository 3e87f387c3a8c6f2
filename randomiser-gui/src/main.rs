use eframe::egui;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use randomiser_core::render::{Cell, RenderResult, TableControl};
use randomiser_core::{
    load, ConfigStore, Control, HttpTransport, Phase, RandomizationSession, Renderer, Sources,
};

const DEFAULT_SERVER: &str = "http://localhost:44235";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct GuiConfig {
    server_url: String,
    config_path: String,
    datasets_path: String,
    help_path: String,
    last_rom_path: String,
}

impl Default for GuiConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER.to_string(),
            config_path: String::new(),
            datasets_path: String::new(),
            help_path: String::new(),
            last_rom_path: String::new(),
        }
    }
}

fn app_dir() -> Option<PathBuf> {
    let mut base = dirs::config_dir().or_else(dirs::data_dir)?;
    base.push("Randomiser");
    Some(base)
}

fn config_path() -> Option<PathBuf> {
    app_dir().map(|dir| dir.join("gui_config.json"))
}

fn load_config() -> GuiConfig {
    if let Some(path) = config_path() {
        if let Ok(data) = fs::read_to_string(&path) {
            if let Ok(cfg) = serde_json::from_str::<GuiConfig>(&data) {
                return cfg;
            }
        }
    }
    GuiConfig::default()
}

fn save_config(cfg: &GuiConfig) {
    if let Some(path) = config_path() {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Ok(data) = serde_json::to_string_pretty(cfg) {
            if let Err(e) = fs::write(&path, data) {
                log::warn!("could not save {}: {}", path.display(), e);
            }
        }
    }
}

fn non_empty(path: &str) -> Option<&Path> {
    let path = path.trim();
    if path.is_empty() {
        None
    } else {
        Some(Path::new(path))
    }
}

fn init_logging() -> Result<(), fern::InitError> {
    let level = std::env::var("RANDOMISER_LOG")
        .ok()
        .and_then(|v| v.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Some(dir) = app_dir() {
        if fs::create_dir_all(&dir).is_ok() {
            dispatch = dispatch.chain(fern::log_file(dir.join("randomiser-gui.log"))?);
        }
    }
    dispatch.apply()?;
    Ok(())
}

/// Settings currently being edited. Controls are rendered once per tab and
/// kept, since they remember what they last wrote.
struct Editor {
    store: ConfigStore,
    renderer: Renderer,
    controls: HashMap<String, Vec<Control>>,
}

impl Editor {
    fn open(cfg: &GuiConfig) -> randomiser_core::Result<Self> {
        let (store, renderer) = load(Sources {
            schema: None,
            config: non_empty(&cfg.config_path),
            datasets: non_empty(&cfg.datasets_path),
            help: non_empty(&cfg.help_path),
        })?;
        Ok(Self {
            store,
            renderer,
            controls: HashMap::new(),
        })
    }
}

struct RandomizeDialog {
    rom_path: String,
    seed_text: String,
    transport: Option<Arc<HttpTransport>>,
    session: Option<RandomizationSession>,
    error: Option<String>,
}

struct RandomiserApp {
    cfg: GuiConfig,
    editor: Option<Editor>,
    load_error: Option<String>,
    current_tab: usize,
    status: Option<String>,
    dialog: Option<RandomizeDialog>,
}

impl RandomiserApp {
    fn new() -> Self {
        let cfg = load_config();
        let mut app = Self {
            cfg,
            editor: None,
            load_error: None,
            current_tab: 0,
            status: None,
            dialog: None,
        };
        app.reload();
        app
    }

    fn reload(&mut self) {
        match Editor::open(&self.cfg) {
            Ok(editor) => {
                self.editor = Some(editor);
                self.load_error = None;
                self.current_tab = 0;
            }
            Err(e) => {
                log::error!("could not load settings: {}", e);
                self.editor = None;
                self.load_error = Some(e.to_string());
            }
        }
    }

    fn open_dialog(&mut self) {
        let seed_text = self
            .editor
            .as_ref()
            .and_then(|ed| ed.renderer.seed_control(&ed.store))
            .map(|seed| seed.value().to_string())
            .unwrap_or_default();
        self.dialog = Some(RandomizeDialog {
            rom_path: self.cfg.last_rom_path.clone(),
            seed_text,
            transport: None,
            session: None,
            error: None,
        });
    }

    fn start_randomization(&mut self) {
        let (Some(editor), Some(dialog)) = (self.editor.as_mut(), self.dialog.as_mut()) else {
            return;
        };
        dialog.error = None;

        if let Some(mut seed) = editor.renderer.seed_control(&editor.store) {
            if let Err(e) = seed.edit(&mut editor.store, dialog.seed_text.trim().to_string()) {
                dialog.error = Some(e.to_string());
                return;
            }
        }

        let rom = match fs::read(dialog.rom_path.trim()) {
            Ok(rom) => rom,
            Err(e) => {
                dialog.error = Some(format!("Could not read ROM: {}", e));
                return;
            }
        };
        let transport = match HttpTransport::new(&self.cfg.server_url) {
            Ok(t) => Arc::new(t),
            Err(e) => {
                dialog.error = Some(e.to_string());
                return;
            }
        };

        self.cfg.last_rom_path = dialog.rom_path.trim().to_string();
        save_config(&self.cfg);

        let mut session = RandomizationSession::new(transport.clone());
        match session.start(rom, editor.store.snapshot()) {
            Ok(()) => {
                dialog.transport = Some(transport);
                dialog.session = Some(session);
            }
            Err(e) => dialog.error = Some(e.to_string()),
        }
    }

    fn save_settings(&mut self) {
        let Some(editor) = self.editor.as_ref() else {
            return;
        };
        let Some(path) = rfd::FileDialog::new()
            .add_filter("Settings", &["json"])
            .set_file_name("config.json")
            .save_file()
        else {
            return;
        };
        let result = serde_json::to_string_pretty(&editor.store.snapshot())
            .map_err(|e| e.to_string())
            .and_then(|data| fs::write(&path, data).map_err(|e| e.to_string()));
        self.status = Some(match result {
            Ok(()) => {
                self.cfg.config_path = path.display().to_string();
                save_config(&self.cfg);
                format!("Saved settings to {}", path.display())
            }
            Err(e) => format!("Could not save settings: {}", e),
        });
    }

    fn toolbar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if ui.button("Open settings...").clicked() {
                if let Some(path) = rfd::FileDialog::new().add_filter("Settings", &["json"]).pick_file() {
                    self.cfg.config_path = path.display().to_string();
                    save_config(&self.cfg);
                    self.reload();
                }
            }
            if ui.button("Save settings...").clicked() {
                self.save_settings();
            }
            if ui.button("Load name tables...").clicked() {
                if let Some(path) = rfd::FileDialog::new().add_filter("Name tables", &["json"]).pick_file() {
                    self.cfg.datasets_path = path.display().to_string();
                    save_config(&self.cfg);
                    self.reload();
                }
            }
            if ui.button("Load help texts...").clicked() {
                if let Some(path) = rfd::FileDialog::new().add_filter("Help texts", &["json"]).pick_file() {
                    self.cfg.help_path = path.display().to_string();
                    save_config(&self.cfg);
                    self.reload();
                }
            }
            if ui.button("Reset to defaults").clicked() {
                self.cfg.config_path.clear();
                save_config(&self.cfg);
                self.reload();
            }

            ui.separator();
            ui.label("Server:");
            if ui.text_edit_singleline(&mut self.cfg.server_url).lost_focus() {
                save_config(&self.cfg);
            }

            ui.separator();
            let can_start = self.editor.is_some() && self.dialog.is_none();
            if ui.add_enabled(can_start, egui::Button::new("Randomize!")).clicked() {
                self.open_dialog();
            }
        });
    }

    fn settings_panel(&mut self, ui: &mut egui::Ui) {
        let Some(editor) = self.editor.as_mut() else {
            ui.heading("Settings could not be loaded");
            if let Some(err) = &self.load_error {
                ui.colored_label(egui::Color32::from_rgb(255, 110, 110), err.as_str());
            }
            return;
        };

        let tabs: Vec<(String, String)> = editor
            .renderer
            .schema()
            .categories
            .iter()
            .map(|c| (c.name.clone(), c.title.clone()))
            .collect();
        if tabs.is_empty() {
            ui.label("No settings available.");
            return;
        }
        self.current_tab = self.current_tab.min(tabs.len() - 1);

        ui.horizontal_wrapped(|ui| {
            for (idx, (_, title)) in tabs.iter().enumerate() {
                ui.selectable_value(&mut self.current_tab, idx, title.as_str());
            }
        });
        ui.separator();

        let name = &tabs[self.current_tab].0;
        if !editor.controls.contains_key(name) {
            match editor.renderer.render(&editor.store, name) {
                Ok(controls) => {
                    editor.controls.insert(name.clone(), controls);
                }
                Err(e) => {
                    ui.colored_label(egui::Color32::from_rgb(255, 110, 110), e.to_string());
                    return;
                }
            }
        }
        let Some(controls) = editor.controls.get_mut(name) else {
            return;
        };

        let store = &mut editor.store;
        let mut failure = None;
        egui::ScrollArea::vertical()
            .id_source("settings_scroll")
            .show(ui, |ui| {
                for control in controls.iter_mut() {
                    if let Err(e) = draw_control(ui, control, store) {
                        failure = Some(e.to_string());
                    }
                    ui.add_space(4.0);
                }
            });
        if let Some(e) = failure {
            log::error!("{}", e);
            self.status = Some(e);
        }
    }

    fn dialog_window(&mut self, ctx: &egui::Context) {
        let mut start = false;
        let mut close = false;
        let Some(dialog) = self.dialog.as_mut() else {
            return;
        };

        egui::Window::new("Randomize")
            .collapsible(false)
            .resizable(false)
            .show(ctx, |ui| match &dialog.session {
                None => {
                    ui.horizontal(|ui| {
                        ui.label("ROM:");
                        ui.text_edit_singleline(&mut dialog.rom_path);
                        if ui.button("Browse...").clicked() {
                            let mut picker = rfd::FileDialog::new().add_filter("NDS ROM", &["nds"]);
                            if let Some(dir) = Path::new(dialog.rom_path.trim()).parent() {
                                if dir.is_dir() {
                                    picker = picker.set_directory(dir);
                                }
                            }
                            if let Some(path) = picker.pick_file() {
                                dialog.rom_path = path.display().to_string();
                            }
                        }
                    });
                    ui.horizontal(|ui| {
                        ui.label("Seed:");
                        ui.text_edit_singleline(&mut dialog.seed_text)
                            .on_hover_text("Leave empty to let the server pick one.");
                        if ui.button("Random seed").clicked() {
                            dialog.seed_text = rand::thread_rng().gen::<u64>().to_string();
                        }
                    });
                    if let Some(err) = &dialog.error {
                        ui.colored_label(egui::Color32::from_rgb(255, 110, 110), err.as_str());
                    }
                    ui.separator();
                    ui.horizontal(|ui| {
                        let ready = !dialog.rom_path.trim().is_empty();
                        start = ui.add_enabled(ready, egui::Button::new("Start")).clicked();
                        close = ui.button("Cancel").clicked();
                    });
                }
                Some(session) => {
                    draw_progress(ui, session, dialog.transport.as_deref());
                    ui.separator();
                    close = ui
                        .add_enabled(session.can_close(), egui::Button::new("Close"))
                        .clicked();
                }
            });

        if start {
            self.start_randomization();
        }
        if close {
            if let Some(session) = dialog_session(&mut self.dialog) {
                if !session.close() {
                    return;
                }
            }
            self.dialog = None;
        }
    }
}

fn dialog_session(dialog: &mut Option<RandomizeDialog>) -> Option<&mut RandomizationSession> {
    dialog.as_mut().and_then(|d| d.session.as_mut())
}

fn draw_progress(ui: &mut egui::Ui, session: &RandomizationSession, transport: Option<&HttpTransport>) {
    match session.phase() {
        Phase::Failed => {
            ui.heading("Error");
            ui.colored_label(egui::Color32::from_rgb(255, 110, 110), "Oh no! Randomization failed.");
        }
        Phase::Succeeded => {
            ui.heading("Done!");
        }
        _ => {
            ui.heading("Randomizing...");
        }
    }

    if session.phase() != Phase::Failed {
        ui.add(egui::ProgressBar::new(session.progress_fraction()).show_percentage());
    }
    egui::ScrollArea::vertical()
        .id_source("progress_message")
        .max_height(200.0)
        .show(ui, |ui| {
            ui.monospace(session.message());
        });

    if let Some(seed) = session.seed() {
        ui.horizontal(|ui| {
            ui.label("Your Seed:");
            ui.monospace(seed);
        });
    }
    if session.phase() == Phase::Succeeded {
        if let Some(transport) = transport {
            ui.hyperlink_to("Download randomised ROM", transport.download_url().to_string());
        }
    }
}

fn draw_control(ui: &mut egui::Ui, control: &mut Control, store: &mut ConfigStore) -> RenderResult<()> {
    match control {
        Control::Toggle(c) => {
            let mut value = c.value();
            let resp = ui.checkbox(&mut value, c.info.label.as_str()).on_hover_text(c.info.help.as_str());
            if resp.changed() {
                c.set(store, value)?;
            }
        }
        Control::Choice(c) => {
            let mut picked = None;
            ui.horizontal(|ui| {
                ui.label(c.info.label.as_str()).on_hover_text(c.info.help.as_str());
                egui::ComboBox::from_id_source(&c.info.path)
                    .selected_text(c.selected_text().unwrap_or("?"))
                    .show_ui(ui, |ui| {
                        for option in &c.options {
                            let selected = option.code == c.selected();
                            if ui.selectable_label(selected, option.text.as_str()).clicked() {
                                picked = Some(option.code);
                            }
                        }
                    });
            });
            if let Some(code) = picked {
                c.select(store, code)?;
            }
        }
        Control::Text(c) => {
            let mut text = c.value().to_string();
            let changed = ui
                .horizontal(|ui| {
                    ui.label(c.info.label.as_str()).on_hover_text(c.info.help.as_str());
                    ui.text_edit_singleline(&mut text).changed()
                })
                .inner;
            if changed {
                c.edit(store, text)?;
            }
        }
        Control::Bounded(c) => {
            let mut value = c.value() as f64;
            let changed = ui
                .horizontal(|ui| {
                    ui.label(c.info.label.as_str()).on_hover_text(c.info.help.as_str());
                    ui.add(egui::Slider::new(&mut value, 0.0..=f64::from(c.max)).integer())
                        .changed()
                })
                .inner;
            if changed {
                c.input(store, value)?;
            }
        }
        Control::Table(table) => draw_table(ui, table, store)?,
    }
    Ok(())
}

fn draw_table(ui: &mut egui::Ui, table: &mut TableControl, store: &mut ConfigStore) -> RenderResult<()> {
    ui.label(egui::RichText::new(table.info.label.as_str()).strong())
        .on_hover_text(table.info.help.as_str());

    let chunk_count = table.layout.chunks().len();
    if chunk_count == 0 {
        let all = 0..table.rows.len();
        return draw_rows(ui, table, store, all);
    }

    ui.horizontal(|ui| {
        if ui.small_button("Expand all").clicked() {
            table.layout.set_all_expanded(true);
        }
        if ui.small_button("Collapse all").clicked() {
            table.layout.set_all_expanded(false);
        }
    });

    let mut result = Ok(());
    for idx in 0..chunk_count {
        let (label, expanded, rows) = {
            let chunk = &table.layout.chunks()[idx];
            (chunk.label.clone(), chunk.is_expanded(), chunk.rows.clone())
        };
        let resp = egui::CollapsingHeader::new(label)
            .id_source((&table.info.path, idx))
            .open(Some(expanded))
            .show(ui, |ui| draw_rows(ui, table, store, rows));
        if let Some(Err(e)) = resp.body_returned {
            result = Err(e);
        }
        if resp.header_response.clicked() {
            if let Some(chunk) = table.layout.chunk_mut(idx) {
                chunk.toggle();
            }
        }
    }
    result
}

fn draw_rows(ui: &mut egui::Ui, table: &mut TableControl, store: &mut ConfigStore, rows: Range<usize>) -> RenderResult<()> {
    let mut flipped = None;
    egui::Grid::new((&table.info.path, rows.start))
        .striped(true)
        .show(ui, |ui| {
            for header in &table.columns {
                ui.strong(header.label.as_str());
            }
            ui.end_row();
            for row in rows {
                let Some(table_row) = table.rows.get(row) else {
                    break;
                };
                for (col, cell) in table_row.cells.iter().enumerate() {
                    match cell {
                        Cell::Label(text) => {
                            ui.label(text.as_str());
                        }
                        Cell::Switch(on) => {
                            let mut checked = *on;
                            if ui.checkbox(&mut checked, "").changed() {
                                flipped = Some((row, col, checked));
                            }
                        }
                    }
                }
                ui.end_row();
            }
        });
    if let Some((row, col, checked)) = flipped {
        table.toggle(store, row, col, checked)?;
    }
    Ok(())
}

impl eframe::App for RandomiserApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if let Some(session) = dialog_session(&mut self.dialog) {
            for event in session.poll() {
                log::debug!("session event: {:?}", event);
            }
        }

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            ui.add_space(4.0);
            self.toolbar(ui);
            ui.add_space(4.0);
        });

        egui::TopBottomPanel::bottom("footer").show(ctx, |ui| {
            ui.add_space(4.0);
            match &self.status {
                Some(status) => ui.label(status.as_str()),
                None => ui.label("Hover over a setting to see its help."),
            };
            ui.add_space(4.0);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.add_enabled_ui(self.dialog.is_none(), |ui| self.settings_panel(ui));
        });

        self.dialog_window(ctx);

        ctx.request_repaint_after(Duration::from_millis(100));
    }
}

fn main() -> eframe::Result<()> {
    if let Err(e) = init_logging() {
        eprintln!("Failed to set up logging: {e}");
    }

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([960.0, 680.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Randomiser",
        native_options,
        Box::new(|cc| {
            cc.egui_ctx.set_visuals(egui::Visuals::dark());
            Box::new(RandomiserApp::new())
        }),
    )
}
