use colored::*;

pub fn success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

pub fn warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

pub fn header(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
    println!("{}", "=".repeat(title.len()).cyan());
}

pub fn key_value(key: &str, value: impl std::fmt::Display) {
    println!("  {:<18} {}", format!("{}:", key).bold(), value);
}
