//! A4 report layout on printpdf's built-in Helvetica faces.
//!
//! [`PdfWriter`] is a cursor that moves down the page: each call places its
//! text below the previous one and starts a new page at the bottom margin.
//! Glyph widths are approximated, so long table cells are truncated rather
//! than measured.

use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference};
use std::fmt::Debug;

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 15.0;
const PT_TO_MM: f32 = 0.3528;
/// Average Helvetica advance as a fraction of the font size.
const GLYPH_WIDTH: f32 = 0.5;
const LEADING: f32 = 1.4;

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("Failed to render PDF: {0}")]
    Render(String),
}

fn render_error(err: impl Debug) -> PdfError {
    PdfError::Render(format!("{err:?}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Title,
    Heading,
    Body,
    TableHeader,
    TableCell,
}

impl Style {
    fn size(self) -> f32 {
        match self {
            Style::Title => 18.0,
            Style::Heading => 13.0,
            Style::Body => 10.0,
            Style::TableHeader | Style::TableCell => 8.0,
        }
    }

    fn bold(self) -> bool {
        matches!(self, Style::Title | Style::Heading | Style::TableHeader)
    }

    fn line_height(self) -> f32 {
        self.size() * PT_TO_MM * LEADING
    }
}

/// How many characters of `size` point text fit in `width` millimetres.
fn chars_fitting(width: f32, size: f32) -> usize {
    ((width / (size * GLYPH_WIDTH * PT_TO_MM)) as usize).max(1)
}

/// Greedy word wrap; words longer than a line are split.
fn wrap(text: &str, max: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > max {
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            let rest = word.split_off(max);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        let len = line.chars().count();
        if len > 0 && len + 1 + word.len() > max {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.extend(word);
    }
    if !line.is_empty() || lines.is_empty() {
        lines.push(line);
    }
    lines
}

fn truncate(cell: &str, max: usize) -> String {
    if cell.chars().count() <= max {
        return cell.to_string();
    }
    if max <= 3 {
        return cell.chars().take(max).collect();
    }
    let mut out: String = cell.chars().take(max - 3).collect();
    out.push_str("...");
    out
}

pub struct PdfWriter {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    y: f32,
    pages: usize,
}

impl PdfWriter {
    pub fn new(title: &str) -> Result<Self, PdfError> {
        let (doc, page, layer) = PdfDocument::new(title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        let regular = doc.add_builtin_font(BuiltinFont::Helvetica).map_err(render_error)?;
        let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(render_error)?;
        let layer = doc.get_page(page).get_layer(layer);
        Ok(PdfWriter {
            doc,
            layer,
            regular,
            bold,
            y: PAGE_HEIGHT - MARGIN,
            pages: 1,
        })
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    fn new_page(&mut self) {
        let (page, layer) = self.doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.y = PAGE_HEIGHT - MARGIN;
        self.pages += 1;
    }

    /// Move the cursor down; returns `true` when that started a new page.
    fn advance(&mut self, height: f32) -> bool {
        let broke = self.y - height < MARGIN;
        if broke {
            self.new_page();
        }
        self.y -= height;
        broke
    }

    fn put(&self, text: &str, style: Style, x: f32) {
        let font = if style.bold() { &self.bold } else { &self.regular };
        self.layer.use_text(text, style.size(), Mm(x), Mm(self.y), font);
    }

    /// A wrapped paragraph across the full text width.
    pub fn text(&mut self, text: &str, style: Style) {
        let max = chars_fitting(PAGE_WIDTH - 2.0 * MARGIN, style.size());
        for line in wrap(text, max) {
            self.advance(style.line_height());
            self.put(&line, style, MARGIN);
        }
    }

    pub fn space(&mut self, height: f32) {
        self.advance(height);
    }

    /// Equal-width columns; the header row repeats on every page.
    pub fn table<S: AsRef<str>>(&mut self, headers: &[S], rows: &[Vec<String>]) {
        if headers.is_empty() {
            return;
        }
        let column = (PAGE_WIDTH - 2.0 * MARGIN) / headers.len() as f32;
        let max = chars_fitting(column - 1.0, Style::TableCell.size());
        let header: Vec<String> = headers.iter().map(|h| truncate(h.as_ref(), max)).collect();
        let height = Style::TableCell.line_height();

        self.advance(height);
        self.row(&header, column, Style::TableHeader);
        for row in rows {
            if self.advance(height) {
                self.row(&header, column, Style::TableHeader);
                self.advance(height);
            }
            let cells: Vec<String> = row.iter().map(|c| truncate(c, max)).collect();
            self.row(&cells, column, Style::TableCell);
        }
    }

    fn row(&self, cells: &[String], column: f32, style: Style) {
        for (i, cell) in cells.iter().enumerate() {
            self.put(cell, style, MARGIN + i as f32 * column);
        }
    }

    pub fn finish(self) -> Result<Vec<u8>, PdfError> {
        self.doc.save_to_bytes().map_err(render_error)
    }
}
