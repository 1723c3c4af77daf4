use super::config::{default_config_path, default_database_path};
use std::path::{Path, PathBuf};

/// Version banner plus the files a command would use by default
fn report(config: Option<&Path>) -> String {
    let config = config
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);
    format!(
        "courier {}\nconfig:   {}\ndatabase: {} (unless overridden)",
        env!("CARGO_PKG_VERSION"),
        config.display(),
        default_database_path().display()
    )
}

/// Display version information
pub fn execute(config: Option<PathBuf>) {
    println!("{}", report(config.as_deref()));
}
