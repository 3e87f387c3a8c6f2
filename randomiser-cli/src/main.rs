use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use randomiser_core::render::{Cell, Control, RenderError, TableControl, SEED_PATH};
use randomiser_core::store::PATH_SEPARATOR;
use randomiser_core::{
    load, ConfigStore, HttpTransport, Phase, RandomizationSession, RandomiserError, Renderer, Result,
    Sources, Value,
};

#[derive(Debug, Parser)]
#[command(name = "randomiser-cli", version, about = "Command-line front-end for the ROM randomiser server")]
struct Args {
    /// Base address of the randomiser server.
    #[arg(long, global = true, default_value = "http://localhost:44235")]
    server: String,

    /// Configuration snapshot (JSON). Defaults to the built-in one.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Id to name tables for items, moves, monsters, abilities and dungeons.
    #[arg(long, global = true)]
    datasets: Option<PathBuf>,

    /// Help for each setting, keyed by category then field name.
    #[arg(long, global = true)]
    help_texts: Option<PathBuf>,

    #[arg(long, global = true, hide = true)]
    schema: Option<PathBuf>,

    #[arg(long, global = true, default_value = "info")]
    log_level: log::LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the settings categories.
    Categories,
    /// Print the controls of one category with their current values.
    Show {
        category: String,

        /// Print every row of chunked tables instead of just the section names.
        #[arg(long)]
        expand: bool,
    },
    /// Upload a ROM and run the randomiser with the current settings.
    Randomize {
        #[arg(long)]
        rom: PathBuf,

        /// Seed to use; empty lets the server pick one.
        #[arg(long)]
        seed: Option<String>,

        /// Override a setting, e.g. `--set dungeons.layouts=false`.
        #[arg(long = "set", value_name = "PATH=VALUE")]
        overrides: Vec<String>,

        /// Where to save the randomised ROM.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Give up after this many seconds; 0 waits forever.
        #[arg(long, default_value_t = 3600)]
        timeout_secs: u64,
    },
}

fn init_logging(level: log::LevelFilter) -> std::result::Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
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
        .chain(std::io::stderr())
        .apply()
}

fn split_override(raw: &str) -> Result<(&str, &str)> {
    let (path, value) = raw
        .split_once('=')
        .ok_or_else(|| RandomiserError::Override(format!("'{}' is not PATH=VALUE", raw)))?;
    Ok((path.trim(), value))
}

/// JSON when it parses as JSON, text otherwise.
fn parse_value(value: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(value) {
        Ok(json) => Value::from(json),
        Err(_) => Value::Text(value.to_string()),
    }
}

/// Routes `PATH=VALUE` through the control that owns `PATH`, so it gets the
/// same checks as an edit in the GUI. Paths no control owns are written
/// as-is.
fn apply_override(store: &mut ConfigStore, renderer: &Renderer, raw: &str) -> Result<()> {
    let (path, value) = split_override(raw)?;
    let category = path.split(PATH_SEPARATOR).next().unwrap_or_default();
    let mut controls = match renderer.render(store, category) {
        Ok(controls) => controls,
        Err(RenderError::UnknownCategory(_)) => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    let invalid = |expected: &str| {
        RandomiserError::Override(format!("'{}' needs {}, got '{}'", path, expected, value))
    };

    match controls.iter_mut().find(|c| c.info().path == path) {
        Some(Control::Toggle(c)) => {
            let on = value.trim().parse::<bool>().map_err(|_| invalid("true or false"))?;
            c.set(store, on)?;
        }
        Some(Control::Choice(c)) => {
            let code = value.trim().parse::<i64>().map_err(|_| invalid("an option code"))?;
            c.select(store, code)?;
        }
        Some(Control::Text(c)) => c.edit(store, value.to_string())?,
        Some(Control::Bounded(c)) => {
            let number = value.trim().parse::<f64>().map_err(|_| invalid("a number"))?;
            let stored = c.input(store, number)?;
            log::debug!("{} stored as {}", path, stored);
        }
        Some(Control::Table(_)) | None => store.set(path, parse_value(value))?,
    }
    Ok(())
}

fn print_table(table: &mut TableControl, expand: bool) {
    println!("  {} ({} rows)", table.info.label, table.rows.len());
    if expand {
        table.layout.set_all_expanded(true);
    }
    let headings: Vec<&str> = table.columns.iter().map(|c| c.label.as_str()).collect();
    let print_row = |idx: usize| {
        let cells: Vec<String> = table.rows[idx]
            .cells
            .iter()
            .map(|cell| match cell {
                Cell::Label(text) => text.clone(),
                Cell::Switch(true) => "[x]".to_string(),
                Cell::Switch(false) => "[ ]".to_string(),
            })
            .collect();
        println!("      {}", cells.join(" | "));
    };
    println!("      {}", headings.join(" | "));
    let chunks = table.layout.chunks();
    if chunks.is_empty() {
        (0..table.rows.len()).for_each(print_row);
        return;
    }
    for chunk in chunks {
        if chunk.is_expanded() {
            println!("    v {}", chunk.label);
            chunk.rows.clone().for_each(print_row);
        } else {
            println!("    > {} ({} rows)", chunk.label, chunk.rows.len());
        }
    }
}

fn show(store: &ConfigStore, renderer: &Renderer, category: &str, expand: bool) -> Result<()> {
    let mut controls = renderer.render(store, category)?;
    if let Some(title) = renderer.schema().category(category).map(|c| c.title.as_str()) {
        println!("{}", title);
    }
    for control in controls.iter_mut() {
        match control {
            Control::Toggle(c) => {
                let mark = if c.value() { "[x]" } else { "[ ]" };
                println!("  {} {}  ({})", mark, c.info.label, c.info.path);
            }
            Control::Choice(c) => println!(
                "  {}: {} ({})  ({})",
                c.info.label,
                c.selected_text().unwrap_or("?"),
                c.selected(),
                c.info.path
            ),
            Control::Text(c) => println!("  {}: {:?}  ({})", c.info.label, c.value(), c.info.path),
            Control::Bounded(c) => println!(
                "  {}: {} / {}  ({})",
                c.info.label,
                c.value(),
                c.max,
                c.info.path
            ),
            Control::Table(t) => print_table(t, expand),
        }
    }
    Ok(())
}

/// `None` when the timeout is 0 or too far out to represent.
fn deadline_after(timeout: Duration) -> Option<Instant> {
    if timeout.is_zero() {
        None
    } else {
        Instant::now().checked_add(timeout)
    }
}

fn randomize(
    server: &str,
    mut store: ConfigStore,
    renderer: &Renderer,
    rom: PathBuf,
    seed: Option<String>,
    overrides: &[String],
    output: Option<PathBuf>,
    timeout: Duration,
) -> Result<()> {
    if let Some(seed) = seed {
        store.set(SEED_PATH, Value::Text(seed))?;
    }
    for raw in overrides {
        apply_override(&mut store, renderer, raw)?;
    }

    let rom_bytes = fs::read(&rom)?;
    let transport = Arc::new(HttpTransport::new(server)?);
    let mut session = RandomizationSession::new(transport.clone());
    session.start(rom_bytes, store.snapshot())?;

    let deadline = deadline_after(timeout);
    let mut last_step = None;
    while !session.is_terminal() {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(RandomiserError::Job(
                "timed out waiting for the server to finish".to_string(),
            ));
        }
        session.wait(Duration::from_millis(250));
        if session.phase() == Phase::Running && last_step != Some(session.step()) {
            last_step = Some(session.step());
            println!(
                "[{:>3}%] {}",
                (session.progress_fraction() * 100.0).round() as u32,
                session.message()
            );
        }
    }

    if session.phase() == Phase::Failed {
        return Err(RandomiserError::Job(session.message().to_string()));
    }

    if let Some(seed) = session.seed() {
        println!("Your Seed: {}", seed);
    }
    match output {
        Some(path) => {
            let data = transport.download()?;
            fs::write(&path, data)?;
            println!("Randomised ROM written to {}", path.display());
        }
        None => println!("Randomised ROM: {}", transport.download_url()),
    }
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let (store, renderer) = load(Sources {
        schema: args.schema.as_deref(),
        config: args.config.as_deref(),
        datasets: args.datasets.as_deref(),
        help: args.help_texts.as_deref(),
    })?;

    match args.command {
        Command::Categories => {
            for category in &renderer.schema().categories {
                println!("{:<16} {}", category.name, category.title);
            }
            Ok(())
        }
        Command::Show { category, expand } => show(&store, &renderer, &category, expand),
        Command::Randomize {
            rom,
            seed,
            overrides,
            output,
            timeout_secs,
        } => randomize(
            &args.server,
            store,
            &renderer,
            rom,
            seed,
            &overrides,
            output,
            Duration::from_secs(timeout_secs),
        ),
    }
}

fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging(args.log_level) {
        eprintln!("Failed to set up logging: {e}");
    }

    if let Err(err) = run(args) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builtin() -> (ConfigStore, Renderer) {
        load(Sources::default()).unwrap()
    }

    #[test]
    fn overrides_go_through_their_controls() {
        let (mut store, renderer) = builtin();

        apply_override(&mut store, &renderer, "dungeons.max_sticky_chance=150").unwrap();
        assert_eq!(store.get("dungeons.max_sticky_chance").unwrap(), &Value::Int(100));
        apply_override(&mut store, &renderer, "dungeons.max_mh_chance=12.2").unwrap();
        assert_eq!(store.get("dungeons.max_mh_chance").unwrap(), &Value::Int(13));

        apply_override(&mut store, &renderer, "locations.first=123").unwrap();
        assert_eq!(store.get_text("locations.first").unwrap(), "123");

        apply_override(&mut store, &renderer, "dungeons.layouts=true").unwrap();
        assert!(store.get_bool("dungeons.layouts").unwrap());

        apply_override(&mut store, &renderer, "dungeons.mode=1").unwrap();
        assert_eq!(store.get_int("dungeons.mode").unwrap(), 1);
    }

    #[test]
    fn overrides_reject_what_the_control_rejects() {
        let (mut store, renderer) = builtin();
        let before = store.snapshot();

        assert!(matches!(
            apply_override(&mut store, &renderer, "dungeons.mode=99"),
            Err(RandomiserError::Render(RenderError::InvalidChoice { code: 99, .. }))
        ));
        assert!(matches!(
            apply_override(&mut store, &renderer, "dungeons.layouts=maybe"),
            Err(RandomiserError::Override(_))
        ));
        assert!(apply_override(&mut store, &renderer, "dungeons.max_sticky_chance=NaN").is_err());
        assert!(apply_override(&mut store, &renderer, "no-equals-sign").is_err());
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn overrides_without_a_control_are_written_raw() {
        let (mut store, renderer) = builtin();

        apply_override(&mut store, &renderer, "pokemon.moves_enabled=[1,2]").unwrap();
        assert_eq!(store.get_id_set("pokemon.moves_enabled").unwrap(), &[1, 2]);

        apply_override(&mut store, &renderer, "quiz.include_vanilla_questions=false").unwrap();
        assert_eq!(store.get("quiz.include_vanilla_questions").unwrap(), &Value::Bool(false));

        assert!(apply_override(&mut store, &renderer, "quiz.nonexistent=1").is_err());
    }

    #[test]
    fn huge_timeouts_mean_no_deadline() {
        assert_eq!(deadline_after(Duration::from_secs(u64::MAX)), None);
        assert_eq!(deadline_after(Duration::ZERO), None);
        assert!(deadline_after(Duration::from_secs(60)).is_some());
    }

    #[test]
    fn args_parse_randomize_subcommand() {
        let args = Args::try_parse_from([
            "randomiser-cli",
            "--server",
            "http://127.0.0.1:9000",
            "randomize",
            "--rom",
            "game.nds",
            "--set",
            "text.main=false",
            "--set",
            "dungeons.mode=0",
        ])
        .unwrap();
        match args.command {
            Command::Randomize { rom, overrides, .. } => {
                assert_eq!(rom, PathBuf::from("game.nds"));
                assert_eq!(overrides.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
