//! Virtual screen: a small VT100-subset emulator that turns raw terminal
//! output into plain text.
//!
//! Bytes are decoded by [`vte::Parser`]; the [`Grid`] applies the sequences
//! it understands (cursor movement, erases, line insertion and deletion,
//! scrolling, SGR attributes) and silently drops the rest. Rows that scroll
//! off the top are kept in a bounded scrollback so that
//! [`Screen::transcript`] reflects everything a person watching the
//! terminal would have seen.

use bitflags::bitflags;
use std::collections::VecDeque;
use unicode_width::UnicodeWidthChar;
use vte::{Params, Parser, Perform};

const TAB_WIDTH: usize = 8;
const DEFAULT_SCROLLBACK: usize = 10_000;

/// Marks the right half of a double-width character.
const WIDE_TAIL: char = '\0';

bitflags! {
    /// Text attributes tracked from SGR sequences.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Attrs: u8 {
        const BOLD = 1;
        const DIM = 1 << 1;
        const ITALIC = 1 << 2;
        const UNDERLINE = 1 << 3;
        const REVERSE = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    pub attrs: Attrs,
}

const BLANK: Cell = Cell {
    ch: ' ',
    attrs: Attrs::empty(),
};

#[derive(Debug, Clone)]
struct Row {
    cells: Vec<Cell>,
    /// The row was filled and output continued on the next row.
    wrapped: bool,
}

impl Row {
    fn blank(cols: usize) -> Self {
        Row {
            cells: vec![BLANK; cols],
            wrapped: false,
        }
    }

    fn collect(cells: &[Cell]) -> String {
        cells
            .iter()
            .map(|cell| cell.ch)
            .filter(|&ch| ch != WIDE_TAIL)
            .collect()
    }

    fn text(&self, trim: bool) -> String {
        let text = Row::collect(&self.cells);
        if trim {
            text.trim_end().to_string()
        } else {
            text
        }
    }

    /// Text trimmed of trailing blanks, except those before column `col`.
    fn text_through(&self, col: usize) -> String {
        let col = col.min(self.cells.len());
        let mut text = Row::collect(&self.cells[..col]);
        text.push_str(Row::collect(&self.cells[col..]).trim_end());
        text
    }

    fn is_blank(&self) -> bool {
        self.cells.iter().all(|cell| cell.ch == ' ')
    }
}

/// A row that has left the visible screen.
#[derive(Debug, Clone)]
struct Line {
    text: String,
    wrapped: bool,
}

impl Line {
    /// Bytes this line contributes to the transcript.
    fn transcript_len(&self) -> usize {
        self.text.len() + usize::from(!self.wrapped)
    }
}

#[derive(Debug, Clone, Copy)]
struct SavedCursor {
    row: usize,
    col: usize,
    attrs: Attrs,
}

/// Terminal state mutated by the parser.
struct Grid {
    cols: usize,
    rows: usize,
    lines: Vec<Row>,
    row: usize,
    col: usize,
    /// The last print filled the final column; the next print wraps first.
    pending_wrap: bool,
    attrs: Attrs,
    saved: Option<SavedCursor>,
    scrollback: VecDeque<Line>,
    scrollback_limit: usize,
    /// Transcript bytes discarded from the front of the scrollback.
    dropped: usize,
    title: Option<String>,
}

impl Grid {
    fn new(cols: usize, rows: usize, scrollback_limit: usize) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Grid {
            cols,
            rows,
            lines: vec![Row::blank(cols); rows],
            row: 0,
            col: 0,
            pending_wrap: false,
            attrs: Attrs::empty(),
            saved: None,
            scrollback: VecDeque::new(),
            scrollback_limit,
            dropped: 0,
            title: None,
        }
    }

    fn reset(&mut self) {
        for row in self.lines.iter_mut() {
            *row = Row::blank(self.cols);
        }
        self.row = 0;
        self.col = 0;
        self.pending_wrap = false;
        self.attrs = Attrs::empty();
        self.saved = None;
        self.title = None;
    }

    fn push_scrollback(&mut self, row: Row) {
        let line = Line {
            wrapped: row.wrapped,
            text: row.text(!row.wrapped),
        };
        self.scrollback.push_back(line);
        while self.scrollback.len() > self.scrollback_limit {
            if let Some(old) = self.scrollback.pop_front() {
                self.dropped += old.transcript_len();
            }
        }
    }

    fn scroll_up(&mut self) {
        let top = self.lines.remove(0);
        self.push_scrollback(top);
        self.lines.push(Row::blank(self.cols));
    }

    fn scroll_down(&mut self) {
        self.lines.pop();
        self.lines.insert(0, Row::blank(self.cols));
    }

    fn index(&mut self) {
        if self.row + 1 >= self.rows {
            self.scroll_up();
        } else {
            self.row += 1;
        }
    }

    fn reverse_index(&mut self) {
        if self.row == 0 {
            self.scroll_down();
        } else {
            self.row -= 1;
        }
    }

    fn newline(&mut self) {
        self.col = 0;
        self.pending_wrap = false;
        self.index();
    }

    fn wrap(&mut self) {
        self.lines[self.row].wrapped = true;
        self.newline();
    }

    fn goto(&mut self, row: usize, col: usize) {
        self.row = row.min(self.rows - 1);
        self.col = col.min(self.cols - 1);
        self.pending_wrap = false;
    }

    /// Blank both halves of a wide character overlapping `col`.
    fn split_wide(&mut self, col: usize) {
        let cells = &mut self.lines[self.row].cells;
        if cells[col].ch == WIDE_TAIL && col > 0 {
            cells[col - 1] = BLANK;
            cells[col] = BLANK;
        } else if col + 1 < cells.len() && cells[col + 1].ch == WIDE_TAIL {
            cells[col + 1] = BLANK;
        }
    }

    fn put_char(&mut self, ch: char) {
        let width = match ch.width() {
            Some(0) | None => return,
            Some(w) => w.min(self.cols),
        };
        if self.pending_wrap || self.col + width > self.cols {
            self.wrap();
        }

        let attrs = self.attrs;
        self.split_wide(self.col);
        if width == 2 {
            self.split_wide(self.col + 1);
        }
        let cells = &mut self.lines[self.row].cells;
        cells[self.col] = Cell { ch, attrs };
        if width == 2 {
            cells[self.col + 1] = Cell {
                ch: WIDE_TAIL,
                attrs,
            };
        }

        if self.col + width >= self.cols {
            self.col = self.cols - 1;
            self.pending_wrap = true;
        } else {
            self.col += width;
        }
    }

    fn erase_cells(&mut self, row: usize, from: usize, to: usize) {
        let cells = &mut self.lines[row].cells;
        let to = to.min(cells.len());
        for cell in cells.iter_mut().take(to).skip(from) {
            *cell = BLANK;
        }
    }

    fn erase_in_line(&mut self, mode: u16) {
        let row = self.row;
        match mode {
            0 => {
                self.erase_cells(row, self.col, self.cols);
                self.lines[row].wrapped = false;
            }
            1 => self.erase_cells(row, 0, self.col + 1),
            2 => {
                self.lines[row] = Row::blank(self.cols);
            }
            _ => {}
        }
    }

    fn erase_in_display(&mut self, mode: u16) {
        match mode {
            0 => {
                self.erase_in_line(0);
                for row in self.row + 1..self.rows {
                    self.lines[row] = Row::blank(self.cols);
                }
            }
            1 => {
                for row in 0..self.row {
                    self.lines[row] = Row::blank(self.cols);
                }
                self.erase_in_line(1);
            }
            2 => {
                // Whatever was on screen moves to scrollback instead of vanishing.
                if let Some(last) = self.lines.iter().rposition(|row| !row.is_blank()) {
                    let kept: Vec<Row> = self.lines.drain(..=last).collect();
                    for row in kept {
                        self.push_scrollback(row);
                    }
                }
                self.lines = vec![Row::blank(self.cols); self.rows];
            }
            // ED 3 clears saved lines; the transcript keeps them.
            _ => {}
        }
    }

    fn insert_chars(&mut self, n: usize) {
        let col = self.col;
        let cells = &mut self.lines[self.row].cells;
        for _ in 0..n.min(self.cols - col) {
            cells.insert(col, BLANK);
        }
        cells.truncate(self.cols);
        self.pending_wrap = false;
    }

    fn delete_chars(&mut self, n: usize) {
        let col = self.col;
        let cells = &mut self.lines[self.row].cells;
        let n = n.min(self.cols - col);
        cells.drain(col..col + n);
        cells.resize(self.cols, BLANK);
        self.pending_wrap = false;
    }

    fn insert_lines(&mut self, n: usize) {
        for _ in 0..n.min(self.rows - self.row) {
            self.lines.insert(self.row, Row::blank(self.cols));
        }
        self.lines.truncate(self.rows);
        self.col = 0;
        self.pending_wrap = false;
    }

    fn delete_lines(&mut self, n: usize) {
        let n = n.min(self.rows - self.row);
        self.lines.drain(self.row..self.row + n);
        self.lines.resize(self.rows, Row::blank(self.cols));
        self.col = 0;
        self.pending_wrap = false;
    }

    fn select_graphic_rendition(&mut self, params: &Params) {
        let mut values = params.iter().map(|group| group[0]);
        if params.is_empty() {
            self.attrs = Attrs::empty();
            return;
        }
        while let Some(value) = values.next() {
            match value {
                0 => self.attrs = Attrs::empty(),
                1 => self.attrs.insert(Attrs::BOLD),
                2 => self.attrs.insert(Attrs::DIM),
                3 => self.attrs.insert(Attrs::ITALIC),
                4 => self.attrs.insert(Attrs::UNDERLINE),
                7 => self.attrs.insert(Attrs::REVERSE),
                22 => self.attrs.remove(Attrs::BOLD | Attrs::DIM),
                23 => self.attrs.remove(Attrs::ITALIC),
                24 => self.attrs.remove(Attrs::UNDERLINE),
                27 => self.attrs.remove(Attrs::REVERSE),
                // Extended colours: 38;5;n or 38;2;r;g;b in semicolon form.
                38 | 48 | 58 => match values.next() {
                    Some(5) => {
                        values.next();
                    }
                    Some(2) => {
                        values.next();
                        values.next();
                        values.next();
                    }
                    _ => {}
                },
                _ => {}
            }
        }
    }

    fn last_visible_row(&self) -> Option<usize> {
        self.lines.iter().rposition(|row| !row.is_blank())
    }
}

/// Nth parameter of a CSI sequence, with `0` and absence meaning `default`.
fn arg(params: &Params, index: usize, default: u16) -> usize {
    match params.iter().nth(index).map(|group| group[0]) {
        Some(0) | None => default as usize,
        Some(value) => value as usize,
    }
}

/// Nth parameter where `0` is meaningful (erase modes).
fn mode(params: &Params) -> u16 {
    params.iter().next().map(|group| group[0]).unwrap_or(0)
}

impl Perform for Grid {
    fn print(&mut self, ch: char) {
        self.put_char(ch);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            // LF, VT, FF: line feed implies carriage return.
            0x0A..=0x0C => self.newline(),
            0x0D => {
                self.col = 0;
                self.pending_wrap = false;
            }
            0x08 => {
                self.pending_wrap = false;
                self.col = self.col.saturating_sub(1);
            }
            0x09 => {
                let next = (self.col / TAB_WIDTH + 1) * TAB_WIDTH;
                self.col = next.min(self.cols - 1);
                self.pending_wrap = false;
            }
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], ignore: bool, action: char) {
        // Private modes (CSI ? ...) and oversized sequences carry nothing textual.
        if ignore || !intermediates.is_empty() {
            return;
        }
        match action {
            'A' => self.goto(self.row.saturating_sub(arg(params, 0, 1)), self.col),
            'B' | 'e' => self.goto(self.row + arg(params, 0, 1), self.col),
            'C' | 'a' => self.goto(self.row, self.col + arg(params, 0, 1)),
            'D' => self.goto(self.row, self.col.saturating_sub(arg(params, 0, 1))),
            'E' => self.goto(self.row + arg(params, 0, 1), 0),
            'F' => self.goto(self.row.saturating_sub(arg(params, 0, 1)), 0),
            'G' | '`' => self.goto(self.row, arg(params, 0, 1) - 1),
            'd' => self.goto(arg(params, 0, 1) - 1, self.col),
            'H' | 'f' => self.goto(arg(params, 0, 1) - 1, arg(params, 1, 1) - 1),
            'J' => self.erase_in_display(mode(params)),
            'K' => self.erase_in_line(mode(params)),
            '@' => self.insert_chars(arg(params, 0, 1)),
            'P' => self.delete_chars(arg(params, 0, 1)),
            'X' => {
                let n = arg(params, 0, 1);
                self.erase_cells(self.row, self.col, self.col + n);
            }
            'L' => self.insert_lines(arg(params, 0, 1)),
            'M' => self.delete_lines(arg(params, 0, 1)),
            'S' => {
                for _ in 0..arg(params, 0, 1).min(self.rows) {
                    self.scroll_up();
                }
            }
            'T' => {
                for _ in 0..arg(params, 0, 1).min(self.rows) {
                    self.scroll_down();
                }
            }
            'm' => self.select_graphic_rendition(params),
            's' => self.esc_dispatch(&[], false, b'7'),
            'u' => self.esc_dispatch(&[], false, b'8'),
            _ => {}
        }
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], ignore: bool, byte: u8) {
        // Charset designations (ESC ( B and friends) do not affect text.
        if ignore || !intermediates.is_empty() {
            return;
        }
        match byte {
            b'7' => {
                self.saved = Some(SavedCursor {
                    row: self.row,
                    col: self.col,
                    attrs: self.attrs,
                });
            }
            b'8' => {
                if let Some(saved) = self.saved {
                    self.goto(saved.row, saved.col);
                    self.attrs = saved.attrs;
                }
            }
            b'D' => self.index(),
            b'E' => self.newline(),
            b'M' => self.reverse_index(),
            b'c' => self.reset(),
            _ => {}
        }
    }

    fn osc_dispatch(&mut self, params: &[&[u8]], _bell_terminated: bool) {
        if let [kind, rest @ ..] = params {
            if matches!(*kind, b"0" | b"2") && !rest.is_empty() {
                let title = rest.join(&b';');
                self.title = Some(String::from_utf8_lossy(&title).into_owned());
            }
        }
    }
}

/// Fixed-size terminal emulator fed with raw output bytes.
pub struct Screen {
    parser: Parser,
    grid: Grid,
}

impl Screen {
    /// Create a screen of `cols` x `rows` with the default scrollback.
    pub fn new(cols: u16, rows: u16) -> Self {
        Self::with_scrollback(cols, rows, DEFAULT_SCROLLBACK)
    }

    /// Create a screen keeping at most `scrollback` lines that left the view.
    pub fn with_scrollback(cols: u16, rows: u16, scrollback: usize) -> Self {
        Screen {
            parser: Parser::new(),
            grid: Grid::new(cols as usize, rows as usize, scrollback),
        }
    }

    /// Interpret raw output bytes. Malformed or unknown sequences are dropped.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.parser.advance(&mut self.grid, bytes);
    }

    /// The visible rows as text, each trimmed of trailing whitespace, with
    /// trailing blank rows omitted.
    pub fn render(&self) -> String {
        let rows: Vec<String> = self.grid.lines.iter().map(|row| row.text(true)).collect();
        let end = rows
            .iter()
            .rposition(|row| !row.is_empty())
            .map_or(0, |last| last + 1);
        rows[..end].join("\n")
    }

    /// Scrollback followed by the visible rows, with soft-wrapped rows joined
    /// into a single logical line.
    ///
    /// Blanks before the cursor on its row are kept, so a prompt such as
    /// `"$ "` still ends in its space.
    pub fn transcript(&self) -> String {
        let grid = &self.grid;
        let mut text = String::new();
        for line in &grid.scrollback {
            text.push_str(&line.text);
            if !line.wrapped {
                text.push('\n');
            }
        }

        let last = match grid.last_visible_row() {
            Some(last) if grid.col > 0 => Some(last.max(grid.row)),
            None if grid.col > 0 => Some(grid.row),
            last => last,
        };
        if let Some(last) = last {
            for (i, row) in grid.lines[..=last].iter().enumerate() {
                if row.wrapped {
                    text.push_str(&row.text(false));
                    continue;
                }
                if i == grid.row {
                    text.push_str(&row.text_through(grid.col));
                } else {
                    text.push_str(&row.text(true));
                }
                if i < last {
                    text.push('\n');
                }
            }
        }
        text
    }

    /// Number of transcript bytes that have been discarded from the front
    /// because the scrollback was full. Adding this to an index into
    /// [`transcript`](Self::transcript) gives a position that stays stable
    /// as old lines are dropped.
    pub fn transcript_offset(&self) -> usize {
        self.grid.dropped
    }

    /// Cursor position as `(row, col)`, zero based.
    pub fn cursor(&self) -> (u16, u16) {
        (self.grid.row as u16, self.grid.col as u16)
    }

    /// Screen size as `(cols, rows)`.
    pub fn size(&self) -> (u16, u16) {
        (self.grid.cols as u16, self.grid.rows as u16)
    }

    pub fn cell(&self, row: u16, col: u16) -> Option<Cell> {
        self.grid
            .lines
            .get(row as usize)
            .and_then(|line| line.cells.get(col as usize))
            .copied()
    }

    /// Window title set through OSC 0 or OSC 2.
    pub fn title(&self) -> Option<&str> {
        self.grid.title.as_deref()
    }
}
