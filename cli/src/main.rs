mod args;
mod derivation_spec;

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;

use args::{Args, Command};
use tvix_host::{ContextString, PathArg, ScriptContext};
use tvix_store::{Cache, FilesystemImportSink, StoreDir};

/// This binary never has a calling script to resolve a relative `path`
/// argument against, since it's driven entirely by CLI arguments rather
/// than an interpreter evaluating a file.
struct CliScriptContext;

impl ScriptContext for CliScriptContext {
    fn caller_file(&self) -> Option<PathBuf> {
        None
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tvix_tracing::TracingBuilder::default()
        .level(args.log_level)
        .build()?;

    let store_dir_str = args
        .store_dir
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("store directory is not valid UTF-8"))?;
    let store_dir = StoreDir::from_str(store_dir_str)?;
    fs::create_dir_all(&args.store_dir)?;

    let cache_path = args
        .cache_path
        .clone()
        .or_else(args::default_cache_path)
        .ok_or_else(|| {
            anyhow::anyhow!("no --cache-path given, and no platform data directory available")
        })?;
    if let Some(parent) = cache_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut cache = Cache::open(&cache_path)?;
    let mut sink = FilesystemImportSink::new(&args.store_dir);

    match args.command {
        Command::Path { path, name } => {
            let ctx = CliScriptContext;
            let path_str = path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("path is not valid UTF-8"))?
                .to_string();
            let result = tvix_host::path(
                &store_dir,
                &mut cache,
                &mut sink,
                &ctx,
                PathArg {
                    path: path_str,
                    name,
                },
            )?;
            println!("{}", result.value);
        }
        Command::ToFile { name, file } => {
            let contents = fs::read_to_string(&file)?;
            let contents = ContextString::without_context(contents);
            let result = tvix_host::to_file(&store_dir, &mut cache, &mut sink, &name, &contents)?;
            println!("{}", result.value);
        }
        Command::Derivation { spec } => {
            let spec_bytes = fs::read(&spec)?;
            let spec: derivation_spec::DerivationSpec = serde_json::from_slice(&spec_bytes)?;
            let req = spec.into_request()?;
            let result = tvix_host::derivation(&store_dir, &mut cache, &mut sink, req, |drv_path| {
                panic!(
                    "input derivation {} referenced, but this demonstration binary has no \
                     evaluator-side cache to resolve upstream derivation hashes from",
                    drv_path
                )
            })?;
            println!("{}", store_dir.to_absolute_path(&result.drv_path));
            for (name, path) in &result.outputs {
                println!("{name}: {path}");
            }
        }
    }

    Ok(())
}
