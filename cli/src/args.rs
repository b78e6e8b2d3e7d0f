use std::path::PathBuf;

use clap::Parser;
use tracing::Level;

/// Content-addressed store import/build tooling.
///
/// Exercises the import pipeline and the `path`/`toFile`/`derivation`
/// primitives directly, without a scripting-language frontend attached.
#[derive(Parser, Clone)]
pub struct Args {
    /// A global log level to use when printing logs. `RUST_LOG` (per
    /// `tracing_subscriber::filter::EnvFilter`) always takes priority.
    #[arg(long, default_value_t = Level::INFO, env = "TVIX_LOG_LEVEL")]
    pub log_level: Level,

    /// The store directory objects are imported into.
    #[arg(long, env = "NIX_STORE_DIR", default_value = "/nix/store")]
    pub store_dir: PathBuf,

    /// Path to the source-import cache database. Defaults to a path under
    /// the platform data directory.
    #[arg(long, env = "TVIX_CACHE_PATH")]
    pub cache_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Clone)]
pub enum Command {
    /// Imports a filesystem path into the store.
    Path {
        path: PathBuf,
        /// Overrides the name component of the resulting store path
        /// (defaults to the path's basename).
        #[arg(long)]
        name: Option<String>,
    },
    /// Imports the contents of a file as a literal store object.
    ToFile { name: String, file: PathBuf },
    /// Builds and writes a derivation described by a JSON spec file.
    Derivation { spec: PathBuf },
}

/// The default cache database location: `<platform data dir>/tvix/store-cache.sqlite`.
pub fn default_cache_path() -> Option<PathBuf> {
    let mut path = dirs::data_dir()?;
    path.push("tvix");
    path.push("store-cache.sqlite");
    Some(path)
}
