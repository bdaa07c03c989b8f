//! Reading-order assembly of positioned text blocks.
//!
//! PDF content streams list text in creation order, which often differs from
//! the visual order. Blocks are ordered top-to-bottom, then left-to-right,
//! and blocks sharing a baseline are joined into one line.

use std::cmp::Ordering;

/// Approximate glyph advance as a fraction of the font size.
pub(crate) const AVG_GLYPH_WIDTH: f32 = 0.5;

/// Smallest baseline difference (in points) treated as a new line.
const MIN_LINE_TOLERANCE: f32 = 2.0;

/// A run of text at a position on the page (PDF user space, y grows upward).
#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    /// Baseline start, horizontal.
    pub x: f32,
    /// Baseline, vertical.
    pub y: f32,
    /// Effective font size in user space.
    pub font_size: f32,
    /// Decoded text.
    pub text: String,
}

impl TextBlock {
    pub fn new(x: f32, y: f32, font_size: f32, text: impl Into<String>) -> Self {
        Self {
            x,
            y,
            font_size,
            text: text.into(),
        }
    }

    /// Estimated right edge of the block.
    fn end_x(&self) -> f32 {
        self.x + self.text.chars().count() as f32 * self.font_size * AVG_GLYPH_WIDTH
    }

    fn line_tolerance(&self) -> f32 {
        (self.font_size * 0.5).max(MIN_LINE_TOLERANCE)
    }
}

/// Join blocks into lines of text in reading order.
pub fn assemble_reading_order(mut blocks: Vec<TextBlock>) -> String {
    blocks.retain(|b| !b.text.trim().is_empty());

    // Top of the page first, then left to right. Stable, so ties keep stream order.
    blocks.sort_by(|a, b| match b.y.total_cmp(&a.y) {
        Ordering::Equal => a.x.total_cmp(&b.x),
        other => other,
    });

    let mut lines: Vec<Vec<TextBlock>> = Vec::new();
    let mut line_y = f32::INFINITY;

    for block in blocks {
        match lines.last_mut() {
            Some(line) if (line_y - block.y).abs() <= block.line_tolerance() => line.push(block),
            _ => {
                line_y = block.y;
                lines.push(vec![block]);
            }
        }
    }

    lines
        .into_iter()
        .map(join_line)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn join_line(mut line: Vec<TextBlock>) -> String {
    line.sort_by(|a, b| a.x.total_cmp(&b.x));

    let mut out = String::new();
    let mut prev_end: Option<f32> = None;

    for block in &line {
        if let Some(end) = prev_end {
            let gap = block.x - end;
            let touching = gap < block.font_size * 0.25;
            if !touching && !out.ends_with(' ') && !block.text.starts_with(' ') {
                out.push(' ');
            }
        }
        out.push_str(&block.text);
        prev_end = Some(block.end_x());
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_orders_top_to_bottom() {
        let blocks = vec![
            TextBlock::new(72.0, 600.0, 12.0, "third"),
            TextBlock::new(72.0, 720.0, 12.0, "first"),
            TextBlock::new(72.0, 700.0, 12.0, "second"),
        ];
        assert_eq!(assemble_reading_order(blocks), "first\nsecond\nthird");
    }

    #[test]
    fn test_orders_left_to_right_within_line() {
        let blocks = vec![
            TextBlock::new(300.0, 700.0, 12.0, "jane@example.com"),
            TextBlock::new(72.0, 700.0, 12.0, "Email:"),
        ];
        assert_eq!(assemble_reading_order(blocks), "Email: jane@example.com");
    }

    #[test]
    fn test_groups_slightly_offset_baselines() {
        let blocks = vec![
            TextBlock::new(200.0, 699.0, 12.0, "Doe"),
            TextBlock::new(72.0, 700.5, 12.0, "Name:"),
            TextBlock::new(120.0, 700.0, 12.0, "Jane"),
            TextBlock::new(72.0, 680.0, 12.0, "Phone:"),
        ];
        assert_eq!(assemble_reading_order(blocks), "Name: Jane Doe\nPhone:");
    }

    #[test]
    fn test_touching_blocks_are_not_split() {
        // "Inv" is 3 glyphs * 6pt wide, so "oice" starts right where it ends.
        let blocks = vec![
            TextBlock::new(90.0, 700.0, 12.0, "oice"),
            TextBlock::new(72.0, 700.0, 12.0, "Inv"),
        ];
        assert_eq!(assemble_reading_order(blocks), "Invoice");
    }

    #[test]
    fn test_drops_blank_blocks() {
        let blocks = vec![
            TextBlock::new(72.0, 700.0, 12.0, "   "),
            TextBlock::new(72.0, 650.0, 12.0, "body"),
        ];
        assert_eq!(assemble_reading_order(blocks), "body");
        assert_eq!(assemble_reading_order(Vec::new()), "");
    }
}
