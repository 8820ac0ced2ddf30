//! Terminal presentation for the s3swarm CLI.
//!
//! Everything printed to stdout outside the progress dashboard goes through
//! these helpers.

use clap::builder::styling::{AnsiColor, Color, Style};
use clap::builder::Styles;
use crossterm::style::{Attribute, Stylize};
use unicode_width::UnicodeWidthStr;

// ═══════════════════════════════════════════════════════════════════════════════
// Clap Styles
// ═══════════════════════════════════════════════════════════════════════════════

pub fn get_styles() -> Styles {
    let accent = |color: AnsiColor| Style::new().bold().fg_color(Some(Color::Ansi(color)));
    Styles::styled()
        .usage(accent(AnsiColor::Yellow).underline())
        .header(accent(AnsiColor::Yellow).underline())
        .literal(accent(AnsiColor::Green))
        .invalid(accent(AnsiColor::Red))
        .error(accent(AnsiColor::Red))
        .valid(accent(AnsiColor::Green))
        .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack))))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Palette
// ═══════════════════════════════════════════════════════════════════════════════

pub mod colors {
    use crossterm::style::Color;

    pub const AMBER: Color = Color::Rgb {
        r: 255,
        g: 176,
        b: 0,
    };
    pub const HONEY: Color = Color::Rgb {
        r: 255,
        g: 214,
        b: 102,
    };
    pub const TEAL: Color = Color::Rgb {
        r: 0,
        g: 200,
        b: 190,
    };
    pub const GREEN: Color = Color::Rgb {
        r: 0,
        g: 255,
        b: 136,
    };
    pub const ORANGE: Color = Color::Rgb {
        r: 255,
        g: 140,
        b: 0,
    };
    pub const RED: Color = Color::Rgb {
        r: 255,
        g: 85,
        b: 85,
    };
    pub const DIM: Color = Color::Rgb {
        r: 128,
        g: 128,
        b: 128,
    };
    pub const WHITE: Color = Color::Rgb {
        r: 255,
        g: 255,
        b: 255,
    };
}

mod glyphs {
    pub const TOP_LEFT: &str = "╭";
    pub const TOP_RIGHT: &str = "╮";
    pub const BOTTOM_LEFT: &str = "╰";
    pub const BOTTOM_RIGHT: &str = "╯";
    pub const HORIZONTAL: &str = "─";
    pub const VERTICAL: &str = "│";
    pub const T_LEFT: &str = "├";
    pub const T_RIGHT: &str = "┤";
    pub const T_TOP: &str = "┬";
    pub const T_BOTTOM: &str = "┴";
    pub const CROSS: &str = "┼";
    pub const HEX: &str = "⬢";
    pub const BULLET: &str = "●";
    pub const BULLET_EMPTY: &str = "○";
    pub const ARROW: &str = "▶";
    pub const CHECK: &str = "✓";
    pub const CROSS_MARK: &str = "✗";
}

const SECTION_WIDTH: usize = 60;

// ═══════════════════════════════════════════════════════════════════════════════
// Banner
// ═══════════════════════════════════════════════════════════════════════════════

pub fn print_banner(version: &str) {
    let banner = r#"
   ███████╗██████╗ ███████╗██╗    ██╗ █████╗ ██████╗ ███╗   ███╗
   ██╔════╝╚════██╗██╔════╝██║    ██║██╔══██╗██╔══██╗████╗ ████║
   ███████╗ █████╔╝███████╗██║ █╗ ██║███████║██████╔╝██╔████╔██║
   ╚════██║ ╚═══██╗╚════██║██║███╗██║██╔══██║██╔══██╗██║╚██╔╝██║
   ███████║██████╔╝███████║╚███╔███╔╝██║  ██║██║  ██║██║ ╚═╝ ██║
   ╚══════╝╚═════╝ ╚══════╝ ╚══╝╚══╝ ╚═╝  ╚═╝╚═╝  ╚═╝╚═╝     ╚═╝
"#;

    let gradient = [
        colors::HONEY,
        colors::HONEY,
        colors::AMBER,
        colors::AMBER,
        colors::ORANGE,
        colors::ORANGE,
        colors::ORANGE,
    ];
    for (i, line) in banner.lines().enumerate() {
        let color = gradient.get(i).copied().unwrap_or(colors::AMBER);
        println!("{}", line.with(color).bold());
    }

    println!(
        "{}",
        format!("   ════════  S3 BULK DOWNLOADER  ·  v{}  ════════", version).with(colors::DIM)
    );
    println!();
}

// ═══════════════════════════════════════════════════════════════════════════════
// Status Lines
// ═══════════════════════════════════════════════════════════════════════════════

pub fn print_success(message: &str) {
    println!(
        " {} {}",
        glyphs::CHECK.with(colors::GREEN).bold(),
        message.with(colors::GREEN)
    );
}

pub fn print_error(message: &str) {
    println!(
        " {} {}",
        glyphs::CROSS_MARK.with(colors::RED).bold(),
        message.with(colors::RED)
    );
}

pub fn print_warning(message: &str) {
    println!(
        " {} {}",
        "⚠".with(colors::ORANGE).bold(),
        message.with(colors::ORANGE)
    );
}

pub fn print_info(message: &str) {
    println!(
        " {} {}",
        glyphs::HEX.with(colors::TEAL).bold(),
        message.with(colors::WHITE)
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sections
// ═══════════════════════════════════════════════════════════════════════════════

pub fn print_section_header(title: &str) {
    let title_width = title.width();
    let left = SECTION_WIDTH.saturating_sub(title_width + 2) / 2;
    let right = SECTION_WIDTH.saturating_sub(title_width + 2 + left);

    println!();
    println!(
        "{}{} {} {}{}",
        glyphs::TOP_LEFT.with(colors::AMBER),
        glyphs::HORIZONTAL.repeat(left).with(colors::AMBER),
        title.with(colors::HONEY).bold().attribute(Attribute::Italic),
        glyphs::HORIZONTAL.repeat(right).with(colors::AMBER),
        glyphs::TOP_RIGHT.with(colors::AMBER)
    );
}

pub fn print_section_footer() {
    println!(
        "{}{}{}",
        glyphs::BOTTOM_LEFT.with(colors::AMBER),
        glyphs::HORIZONTAL.repeat(SECTION_WIDTH).with(colors::AMBER),
        glyphs::BOTTOM_RIGHT.with(colors::AMBER)
    );
    println!();
}

pub fn print_key_value(key: &str, value: &str) {
    println!(
        "  {} {} {}",
        glyphs::BULLET.with(colors::AMBER),
        format!("{}:", key).with(colors::DIM),
        value.with(colors::WHITE)
    );
}

pub fn print_key_value_highlight(key: &str, value: &str) {
    println!(
        "  {} {} {}",
        glyphs::HEX.with(colors::ORANGE),
        format!("{}:", key).with(colors::HONEY).bold(),
        value.with(colors::GREEN).bold()
    );
}

pub fn print_list_item(item: &str) {
    println!(
        "  {}  {}",
        glyphs::ARROW.with(colors::TEAL),
        item.with(colors::WHITE)
    );
}

pub fn print_empty_list(message: &str) {
    println!(
        "  {} {}",
        glyphs::BULLET_EMPTY.with(colors::DIM),
        message.with(colors::DIM).attribute(Attribute::Italic)
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tables
// ═══════════════════════════════════════════════════════════════════════════════

/// Boxed table with cells truncated to a maximum column width.
pub struct TableBuilder {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    max_cell_width: usize,
}

impl TableBuilder {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
            max_cell_width: 48,
        }
    }

    pub fn with_max_cell_width(mut self, width: usize) -> Self {
        self.max_cell_width = width.max(4);
        self
    }

    pub fn add_row(&mut self, row: Vec<String>) {
        let mut row: Vec<String> = row
            .into_iter()
            .take(self.headers.len())
            .map(|cell| truncate(&cell, self.max_cell_width))
            .collect();
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    fn column_widths(&self) -> Vec<usize> {
        self.headers
            .iter()
            .enumerate()
            .map(|(i, header)| {
                self.rows
                    .iter()
                    .map(|row| row[i].width())
                    .fold(header.width(), usize::max)
            })
            .collect()
    }

    pub fn print(&self) {
        let widths = self.column_widths();
        let rule = |left: &str, mid: &str, right: &str| {
            let body = widths
                .iter()
                .map(|w| glyphs::HORIZONTAL.repeat(w + 2))
                .collect::<Vec<_>>()
                .join(mid);
            println!("{}", format!("{}{}{}", left, body, right).with(colors::AMBER));
        };

        rule(glyphs::TOP_LEFT, glyphs::T_TOP, glyphs::TOP_RIGHT);
        print!("{}", glyphs::VERTICAL.with(colors::AMBER));
        for (header, width) in self.headers.iter().zip(&widths) {
            print!(
                " {}{} {}",
                header.as_str().with(colors::HONEY).bold(),
                " ".repeat(width - header.width()),
                glyphs::VERTICAL.with(colors::AMBER)
            );
        }
        println!();
        rule(glyphs::T_LEFT, glyphs::CROSS, glyphs::T_RIGHT);

        for row in &self.rows {
            print!("{}", glyphs::VERTICAL.with(colors::AMBER));
            for (cell, width) in row.iter().zip(&widths) {
                print!(
                    " {}{} {}",
                    cell.as_str().with(colors::WHITE),
                    " ".repeat(width - cell.width()),
                    glyphs::VERTICAL.with(colors::AMBER)
                );
            }
            println!();
        }
        rule(glyphs::BOTTOM_LEFT, glyphs::T_BOTTOM, glyphs::BOTTOM_RIGHT);
    }
}

/// Cut `text` to at most `max` display columns, marking the cut with `…`.
fn truncate(text: &str, max: usize) -> String {
    if text.width() <= max {
        return text.to_string();
    }
    let mut out = String::new();
    let mut width = 0;
    for c in text.chars() {
        let w = unicode_width::UnicodeWidthChar::width(c).unwrap_or(0);
        if width + w + 1 > max {
            break;
        }
        out.push(c);
        width += w;
    }
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
        assert!(truncate("ファイル名ファイル名", 7).width() <= 7);
    }

    #[test]
    fn test_rows_are_padded_and_truncated() {
        let mut table = TableBuilder::new(&["Bucket", "File", "Error"]).with_max_cell_width(8);
        table.add_row(vec!["b".to_string(), "a-very-long-name.bin".to_string()]);
        table.add_row(vec![
            "bucket".to_string(),
            "f".to_string(),
            "Access Denied".to_string(),
            "extra".to_string(),
        ]);

        assert_eq!(table.rows[0].len(), 3);
        assert_eq!(table.rows[0][1], "a-very-…");
        assert_eq!(table.rows[1].len(), 3);
        assert_eq!(table.column_widths(), vec![6, 8, 8]);
    }
}
