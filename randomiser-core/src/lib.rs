use std::path::Path;
use thiserror::Error;

pub mod chunk;
pub mod defaults;
pub mod protocol;
pub mod render;
pub mod schema;
pub mod session;
pub mod store;
pub mod transport;

pub use render::{Control, Renderer};
pub use schema::{Datasets, HelpTexts, Schema};
pub use session::{Phase, RandomizationSession, SessionEvent};
pub use store::{ConfigStore, Value};
pub use transport::{HttpTransport, Transport};

#[derive(Debug, Error)]
pub enum RandomiserError {
    #[error("configuration error: {0}")]
    Store(#[from] store::StoreError),
    #[error(transparent)]
    Schema(#[from] schema::SchemaError),
    #[error(transparent)]
    Render(#[from] render::RenderError),
    #[error(transparent)]
    Session(#[from] session::SessionError),
    #[error("transport error: {0}")]
    Transport(#[from] transport::TransportError),
    #[error("invalid override: {0}")]
    Override(String),
    #[error("randomization failed: {0}")]
    Job(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RandomiserError>;

/// Where a front-end gets its schema, snapshot, name tables and help texts
/// from. `None` picks the built-in version.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sources<'a> {
    pub schema: Option<&'a Path>,
    pub config: Option<&'a Path>,
    pub datasets: Option<&'a Path>,
    pub help: Option<&'a Path>,
}

/// Loads everything a front-end needs and checks the schema against the
/// snapshot. A mismatch is fatal: nothing can be rendered from it.
pub fn load(sources: Sources<'_>) -> Result<(ConfigStore, Renderer)> {
    let mut schema = match sources.schema {
        Some(path) => Schema::load(path)?,
        None => Schema::builtin()?,
    };
    let store = match sources.config {
        Some(path) => ConfigStore::load(path)?,
        None => defaults::default_store()?,
    };
    let datasets = match sources.datasets {
        Some(path) => Datasets::load(path)?,
        None => Datasets::default(),
    };
    if let Some(path) = sources.help {
        let applied = schema.apply_help(&HelpTexts::load(path)?);
        log::debug!("applied {} help texts from {}", applied, path.display());
    }
    let renderer = Renderer::new(schema, datasets, &store)?;
    log::info!(
        "loaded {} settings categories",
        renderer.schema().categories.len()
    );
    Ok((store, renderer))
}
