use anyhow::Result;

use crate::config::Config;

pub fn list_tables(config: &Config) -> Result<()> {
    if config.tables.is_empty() {
        println!("No tables configured.");
        return Ok(());
    }

    println!(
        "{:<20} {:<24} {:>7} {:<8} FILE",
        "TABLE", "TARGET", "COLUMNS", "STAGED"
    );
    for table in &config.tables {
        let path = config.staging_path(table);
        let staged = if path.exists() { "yes" } else { "missing" };
        println!(
            "{:<20} {:<24} {:>7} {:<8} {}",
            table.key,
            table.target,
            table.columns.len(),
            staged,
            path.display()
        );
    }

    Ok(())
}
