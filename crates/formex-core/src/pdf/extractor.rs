//! PDF text extraction using lopdf.

use std::collections::BTreeMap;

use lopdf::content::Operation;
use lopdf::{Document, Object, ObjectId};
use tracing::{debug, trace, warn};

use super::layout::{AVG_GLYPH_WIDTH, TextBlock, assemble_reading_order};
use super::{ExtractedText, PdfInfo, PdfPage, Result, SizeLimits, TextExtractor};
use crate::error::{PdfError, ValidationError};
use crate::models::config::PdfConfig;

/// Share of control characters above which decoded text is treated as garbage.
const MAX_CONTROL_CHAR_RATIO: f32 = 0.3;

/// PDF text extractor using lopdf.
#[derive(Debug, Clone, Default)]
pub struct PdfExtractor {
    limits: SizeLimits,
}

impl PdfExtractor {
    /// Create a new PDF extractor with default size limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Size limits taken from configuration.
    pub fn from_config(config: &PdfConfig) -> Self {
        Self {
            limits: SizeLimits::from(config),
        }
    }

    /// Use custom size limits.
    pub fn with_limits(mut self, limits: SizeLimits) -> Self {
        self.limits = limits;
        self
    }

    fn load(&self, data: &[u8]) -> Result<Document> {
        let mut doc = Document::load_mem(data).map_err(|e| PdfError::Parse(e.to_string()))?;

        // Handle PDFs with empty password encryption
        if doc.is_encrypted() {
            if doc.decrypt("").is_err() {
                return Err(PdfError::Encrypted);
            }
            debug!("Decrypted PDF with empty password");
        }

        Ok(doc)
    }

    /// Text of one page in reading order.
    fn page_text(&self, doc: &Document, number: u32, page_id: ObjectId) -> Result<String> {
        let content = doc
            .get_and_decode_page_content(page_id)
            .map_err(|e| PdfError::Page {
                page: number,
                reason: e.to_string(),
            })?;

        let blocks = collect_text_blocks(&content.operations);
        trace!("Page {}: {} positioned text blocks", number, blocks.len());

        let text = assemble_reading_order(blocks);
        if !text.is_empty() && !looks_undecodable(&text) {
            return Ok(text);
        }

        // Composite fonts need the font-aware decoder.
        debug!("Page {}: falling back to font-aware text extraction", number);
        let text = doc.extract_text(&[number]).map_err(|e| PdfError::Page {
            page: number,
            reason: e.to_string(),
        })?;

        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

impl TextExtractor for PdfExtractor {
    fn extract(&self, data: &[u8]) -> Result<ExtractedText> {
        let doc = self.load(data)?;

        let page_ids = doc.get_pages();
        if page_ids.is_empty() {
            return Err(PdfError::NoPages);
        }
        let page_count = page_ids.len() as u32;

        let mut pages = Vec::with_capacity(page_ids.len());
        let mut skipped = Vec::new();

        for (number, page_id) in page_ids {
            match self.page_text(&doc, number, page_id) {
                Ok(text) if !text.trim().is_empty() => pages.push(PdfPage { number, text }),
                Ok(_) => debug!("Page {} has no text", number),
                Err(e) => {
                    warn!("Error extracting text from page {}: {}", number, e);
                    skipped.push(number);
                }
            }
        }

        if pages.is_empty() {
            return Err(PdfError::NoText);
        }

        let extracted = ExtractedText::from_pages(pages, skipped, page_count);
        debug!(
            "Extracted {} characters from {}/{} pages",
            extracted.text.len(),
            extracted.pages.len(),
            page_count
        );
        Ok(extracted)
    }

    fn info(&self, data: &[u8]) -> Result<PdfInfo> {
        let doc = self.load(data)?;

        Ok(PdfInfo {
            page_count: doc.get_pages().len() as u32,
            size: data.len() as u64,
            metadata: document_metadata(&doc),
        })
    }

    fn validate(&self, data: &[u8]) -> std::result::Result<(), ValidationError> {
        self.limits.check(data.len() as u64)
    }
}

/// Entries of the trailer's /Info dictionary that decode to text.
fn document_metadata(doc: &Document) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();

    let info = match doc.trailer.get(b"Info").and_then(|o| doc.dereference(o)) {
        Ok((_, Object::Dictionary(dict))) => dict,
        _ => return metadata,
    };

    for (key, value) in info.iter() {
        let value = match doc.dereference(value) {
            Ok((_, Object::String(bytes, _))) => decode_pdf_string(bytes),
            Ok((_, Object::Name(name))) => String::from_utf8_lossy(name).into_owned(),
            _ => continue,
        };
        metadata.insert(String::from_utf8_lossy(key).into_owned(), value);
    }

    metadata
}

/// Affine transform `[a b c d e f]` in PDF row-vector convention.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f32; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn translate(tx: f32, ty: f32) -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    /// `self × other`.
    fn then(&self, other: &Matrix) -> Matrix {
        let [a1, b1, c1, d1, e1, f1] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a1 * a2 + b1 * c2,
            a1 * b2 + b1 * d2,
            c1 * a2 + d1 * c2,
            c1 * b2 + d1 * d2,
            e1 * a2 + f1 * c2 + e2,
            e1 * b2 + f1 * d2 + f2,
        ])
    }

    fn from_operands(operands: &[Object]) -> Option<Matrix> {
        if operands.len() < 6 {
            return None;
        }
        let mut m = [0.0; 6];
        for (slot, operand) in m.iter_mut().zip(operands) {
            *slot = number(operand)?;
        }
        Some(Matrix(m))
    }

    /// Vertical scale, used to turn font size into user-space size.
    fn vertical_scale(&self) -> f32 {
        let [_, _, c, d, _, _] = self.0;
        (c * c + d * d).sqrt()
    }
}

/// Text and graphics state tracked while walking a content stream.
struct TextState {
    ctm: Matrix,
    ctm_stack: Vec<Matrix>,
    tm: Matrix,
    tlm: Matrix,
    font_size: f32,
    leading: f32,
    horizontal_scale: f32,
    blocks: Vec<TextBlock>,
}

impl TextState {
    fn new() -> Self {
        Self {
            ctm: Matrix::IDENTITY,
            ctm_stack: Vec::new(),
            tm: Matrix::IDENTITY,
            tlm: Matrix::IDENTITY,
            font_size: 12.0,
            leading: 0.0,
            horizontal_scale: 1.0,
            blocks: Vec::new(),
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.tlm = Matrix::translate(tx, ty).then(&self.tlm);
        self.tm = self.tlm;
    }

    fn next_line(&mut self) {
        self.move_line(0.0, -self.leading);
    }

    fn advance(&mut self, tx: f32) {
        self.tm = Matrix::translate(tx, 0.0).then(&self.tm);
    }

    fn show(&mut self, text: String) {
        let glyphs = text.chars().count() as f32;
        let rendering = self.tm.then(&self.ctm);
        let [_, _, _, _, x, y] = rendering.0;
        let size = (self.font_size * rendering.vertical_scale()).abs();

        if !text.is_empty() {
            self.blocks.push(TextBlock::new(x, y, size.max(1.0), text));
        }
        self.advance(glyphs * self.font_size * AVG_GLYPH_WIDTH * self.horizontal_scale);
    }

    fn show_array(&mut self, items: &[Object]) {
        let mut run = String::new();
        for item in items {
            match item {
                Object::String(bytes, _) => run.push_str(&decode_pdf_string(bytes)),
                other => {
                    // Large negative kerning (in thousandths of an em) is a word gap.
                    if let Some(adjust) = number(other) {
                        if adjust < -200.0 && !run.ends_with(' ') {
                            run.push(' ');
                        }
                    }
                }
            }
        }
        self.show(run);
    }

    fn apply(&mut self, op: &Operation) {
        let operands = &op.operands;
        match op.operator.as_str() {
            "q" => self.ctm_stack.push(self.ctm),
            "Q" => {
                if let Some(ctm) = self.ctm_stack.pop() {
                    self.ctm = ctm;
                }
            }
            "cm" => {
                if let Some(m) = Matrix::from_operands(operands) {
                    self.ctm = m.then(&self.ctm);
                }
            }
            "BT" => {
                self.tm = Matrix::IDENTITY;
                self.tlm = Matrix::IDENTITY;
            }
            "Tf" => {
                if let Some(size) = operands.get(1).and_then(number) {
                    self.font_size = size;
                }
            }
            "TL" => {
                if let Some(leading) = operands.first().and_then(number) {
                    self.leading = leading;
                }
            }
            "Tz" => {
                if let Some(scale) = operands.first().and_then(number) {
                    self.horizontal_scale = scale / 100.0;
                }
            }
            "Td" | "TD" => {
                if let (Some(tx), Some(ty)) = (
                    operands.first().and_then(number),
                    operands.get(1).and_then(number),
                ) {
                    if op.operator == "TD" {
                        self.leading = -ty;
                    }
                    self.move_line(tx, ty);
                }
            }
            "Tm" => {
                if let Some(m) = Matrix::from_operands(operands) {
                    self.tm = m;
                    self.tlm = m;
                }
            }
            "T*" => self.next_line(),
            "Tj" => {
                if let Some(Object::String(bytes, _)) = operands.first() {
                    self.show(decode_pdf_string(bytes));
                }
            }
            "'" => {
                self.next_line();
                if let Some(Object::String(bytes, _)) = operands.first() {
                    self.show(decode_pdf_string(bytes));
                }
            }
            "\"" => {
                self.next_line();
                if let Some(Object::String(bytes, _)) = operands.get(2) {
                    self.show(decode_pdf_string(bytes));
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    self.show_array(items);
                }
            }
            _ => {}
        }
    }
}

/// Walk content-stream operations and collect positioned text runs.
fn collect_text_blocks(operations: &[Operation]) -> Vec<TextBlock> {
    let mut state = TextState::new();
    for op in operations {
        state.apply(op);
    }
    state.blocks
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// Decode a PDF text string: UTF-16BE with BOM, UTF-8 with BOM, otherwise byte-per-char.
fn decode_pdf_string(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
        _ => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Text dominated by control characters came from a font without a simple encoding.
fn looks_undecodable(text: &str) -> bool {
    let total = text.chars().filter(|c| !c.is_whitespace()).count();
    if total == 0 {
        return true;
    }
    let control = text
        .chars()
        .filter(|c| c.is_control() && !c.is_whitespace())
        .count();
    control as f32 / total as f32 > MAX_CONTROL_CHAR_RATIO
}
