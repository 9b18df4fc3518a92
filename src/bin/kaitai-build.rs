use std::path::Path;

use anyhow::{bail, Result};
use kaitai_build::adapter;
use kaitai_build::config::{KaitaiConfig, DEFAULT_CONFIG_FILE};
use kaitai_build::LogSink;

fn usage() -> &'static str {
    "Usage:\n  kaitai-build generate [--config <kaitai.toml>]\n  kaitai-build fetch [--config <kaitai.toml>]"
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [cmd] if cmd == "generate" => generate(Path::new(DEFAULT_CONFIG_FILE)),
        [cmd, flag, path] if cmd == "generate" && flag == "--config" => {
            generate(Path::new(path))
        }
        [cmd] if cmd == "fetch" => fetch(Path::new(DEFAULT_CONFIG_FILE)),
        [cmd, flag, path] if cmd == "fetch" && flag == "--config" => fetch(Path::new(path)),
        _ => bail!(usage()),
    }
}

fn generate(config_path: &Path) -> Result<()> {
    let config = KaitaiConfig::load(config_path)?;
    if let Some(root) = adapter::run(&config, &LogSink)? {
        println!("{}", root.display());
    }
    Ok(())
}

fn fetch(config_path: &Path) -> Result<()> {
    let config = KaitaiConfig::load(config_path)?;
    let compiler = adapter::fetch(&config, &LogSink)?;
    println!("{}", compiler.display());
    Ok(())
}
