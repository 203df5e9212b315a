use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

// Human-facing output goes to stderr; stdout is reserved for JSON.

pub fn print_success(msg: &str) {
    eprintln!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    eprintln!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    eprintln!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_banner() {
    eprintln!();
    eprintln!(
        "{} {}",
        SPARKLE,
        style("jobpilot").bold().cyan()
    );
    eprintln!(
        "{}\n",
        style("Finds openings, tailors documents, applies on schedule.").dim()
    );
}

enum Line {
    Command(String, String),
    Status(String, String),
    Text(String),
    Hint(String, String),
    Warn(String),
    Blank,
}

/// A titled block of help or status lines.
pub struct GuideSection {
    title: String,
    lines: Vec<Line>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.lines
            .push(Line::Command(name.to_string(), description.to_string()));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines
            .push(Line::Status(label.to_string(), value.to_string()));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.lines.push(Line::Text(text.to_string()));
        self
    }

    pub fn hint(mut self, example: &str, description: &str) -> Self {
        self.lines
            .push(Line::Hint(example.to_string(), description.to_string()));
        self
    }

    pub fn warn(mut self, text: &str) -> Self {
        self.lines.push(Line::Warn(text.to_string()));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(Line::Blank);
        self
    }

    pub fn print(&self) {
        eprintln!("\n {}", style(&self.title).bold().underlined());
        let width = self
            .lines
            .iter()
            .filter_map(|l| match l {
                Line::Command(name, _) => Some(name.len()),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        for line in &self.lines {
            match line {
                Line::Command(name, desc) => eprintln!(
                    "   {}  {}",
                    style(format!("{:<width$}", name, width = width)).green(),
                    desc
                ),
                Line::Status(label, value) => {
                    eprintln!("  {} {}: {}", GEAR, style(label).bold().cyan(), value)
                }
                Line::Text(text) => eprintln!("   {}", text),
                Line::Hint(example, desc) if desc.is_empty() => {
                    eprintln!("   {} {}", style("$").dim(), style(example).cyan())
                }
                Line::Hint(example, desc) => eprintln!(
                    "   {} {}  {}",
                    style("$").dim(),
                    style(example).cyan(),
                    style(desc).dim()
                ),
                Line::Warn(text) => eprintln!("   {} {}", WARN_ICON, style(text).yellow()),
                Line::Blank => eprintln!(),
            }
        }
    }
}
