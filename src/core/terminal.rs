use console::{Emoji, style};

use crate::core::config::AppConfig;

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_step(step: &str) {
    println!("{} {}", SPARKLE, style(step).bold());
}

pub fn print_link(label: &str, url: &str) {
    println!(
        "  {} {}: {}",
        GLOBE,
        style(label).bold(),
        style(url).underlined().cyan()
    );
}

pub fn print_banner() {
    let lines: &[&str] = &[
        "           _       ",
        " ___  ___ | | ___  ",
        "/ __|/ _ \\| |/ _ \\ ",
        "\\__ \\ (_) | | (_) |",
        "|___/\\___/|_|\\___/ ",
    ];

    // Gradient: #818cf8 → #a78bfa → #22d3ee (diagonal top-left → bottom-right)
    let stops: [(u8, u8, u8); 3] = [(129, 140, 248), (167, 139, 250), (34, 211, 238)];
    let max_w = 19u32;
    let max_d = max_w + 4 * 10;

    println!();
    for (y, line) in lines.iter().enumerate() {
        for (x, ch) in line.chars().enumerate() {
            if ch == ' ' {
                print!(" ");
                continue;
            }
            let d = ((x as u32 + y as u32 * 10) * 1000 / max_d).min(1000);
            let (r, g, b) = if d <= 500 {
                lerp_color(stops[0], stops[1], d * 2)
            } else {
                lerp_color(stops[1], stops[2], (d - 500) * 2)
            };
            print!("\x1b[38;2;{};{};{}m{}", r, g, b, ch);
        }
        println!();
    }
    print!("\x1b[0m");

    println!("\x1b[38;2;34;211;238mA voice-first coding agent that asks before it acts.\x1b[0m\n");
}

fn lerp_color(a: (u8, u8, u8), b: (u8, u8, u8), t: u32) -> (u8, u8, u8) {
    let r = (a.0 as u32 * (1000 - t) + b.0 as u32 * t) / 1000;
    let g = (a.1 as u32 * (1000 - t) + b.1 as u32 * t) / 1000;
    let b_val = (a.2 as u32 * (1000 - t) + b.2 as u32 * t) / 1000;
    (r as u8, g as u8, b_val as u8)
}

/// Startup summary of the collaborators the server talks to.
pub fn print_service_summary(config: &AppConfig, https: bool) {
    let policy = config
        .policy
        .url
        .clone()
        .unwrap_or_else(|| "disabled (all tasks allowed)".to_string());
    GuideSection::new("Services")
        .status("Ollama", &config.chat.ollama_url)
        .status("Model", &config.chat.model)
        .status("Kokoro", &config.tts.kokoro_url)
        .status("Voice", &config.tts.voice)
        .status("Policy", &policy)
        .status("Agent", &config.agent.binary)
        .status("HTTPS", if https { "Enabled" } else { "Disabled" })
        .print();
}

pub fn print_goodbye() {
    println!(
        "\n{} {}",
        SPARKLE,
        style("solo stopped. See you next time!").bold().cyan()
    );
}

enum GuideLine {
    Command(String, String),
    Status(String, String),
    Text(String),
    Blank,
}

/// A titled block of aligned lines, built up and then printed at once.
pub struct GuideSection {
    title: String,
    lines: Vec<GuideLine>,
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
            .push(GuideLine::Command(name.to_string(), description.to_string()));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines
            .push(GuideLine::Status(label.to_string(), value.to_string()));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.lines.push(GuideLine::Text(text.to_string()));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(GuideLine::Blank);
        self
    }

    fn render(&self) -> Vec<String> {
        let width = self
            .lines
            .iter()
            .filter_map(|l| match l {
                GuideLine::Command(name, _) => Some(name.chars().count()),
                _ => None,
            })
            .max()
            .unwrap_or(0);

        let mut out = vec![format!("{} {}", guide_bar(), style(&self.title).bold())];
        for line in &self.lines {
            out.push(match line {
                GuideLine::Command(name, desc) => format!(
                    "{}   {}  {}",
                    guide_bar(),
                    style(format!("{:<width$}", name, width = width)).green(),
                    style(desc).dim()
                ),
                GuideLine::Status(label, value) => {
                    format!("{}   {}: {}", guide_bar(), style(label).bold().cyan(), value)
                }
                GuideLine::Text(text) => format!("{}   {}", guide_bar(), text),
                GuideLine::Blank => guide_bar().to_string(),
            });
        }
        out
    }

    pub fn print(&self) {
        println!();
        for line in self.render() {
            println!("{}", line);
        }
    }
}

pub fn guide_bar() -> console::StyledObject<&'static str> {
    style("│").dim()
}
