use crate::error::{Error, Result};
use crate::import::dialect::Dialect;

// characters are widened to i32 so the two sentinels stay out of band
const NOT_USED: i32 = i32::MAX;
const END_OF_BLOCK: i32 = i32::MIN;

fn first_char(s: &[u8]) -> i32 {
    s.first().map_or(NOT_USED, |&b| i32::from(b))
}

fn used(c: i32) -> bool {
    c != NOT_USED
}

#[derive(Debug)]
struct Sequence {
    bytes: Vec<u8>,
    first: i32,
}

impl Sequence {
    fn new(s: &[u8]) -> Self {
        Self {
            bytes: s.to_vec(),
            first: first_char(s),
        }
    }

    fn used(&self) -> bool {
        used(self.first)
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowStatus {
    Begin,
    Prefix,
    BeginOfField,
    Field,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldStatus {
    /// More bytes are required, continue with the next block.
    Continued,
    EndOfField,
    EndOfLine,
}

/// Finds row boundaries in blocks of delimited text.
///
/// A block is any contiguous slice of a longer file; the scanner keeps its
/// state between blocks, pushing back bytes consumed from an incomplete
/// terminator or escape sequence so the next block re-evaluates them from
/// the same position.
#[derive(Debug)]
pub struct Scanner {
    skip_rows: u64,

    fields_terminated_by: Sequence,
    lines_starting_by: Sequence,
    lines_terminated_by: Sequence,

    enclosed_char: i32,
    escaped_char: i32,

    /// Pushback stack; sized once from the dialect, never reallocates.
    stack: Vec<u8>,

    pos: usize,
    remaining: usize,
    end_of_block: bool,
    status: RowStatus,
    found_enclosed_char: i32,
}

impl Scanner {
    pub fn new(dialect: &Dialect, skip_rows: u64) -> Result<Self> {
        if dialect.lines_terminated_by.is_empty()
            || dialect.lines_terminated_by == dialect.fields_terminated_by
        {
            return Err(Error::Validation(format!(
                "Scanner: unsupported LINES TERMINATED BY: '{}'",
                String::from_utf8_lossy(&dialect.lines_terminated_by)
            )));
        }

        let fields_terminated_by = Sequence::new(&dialect.fields_terminated_by);
        let lines_starting_by = Sequence::new(&dialect.lines_starting_by);
        let lines_terminated_by = Sequence::new(&dialect.lines_terminated_by);

        // room for a full terminator plus the FIELDS ENCLOSED BY character
        let capacity = (fields_terminated_by.len() + 1)
            .max(lines_starting_by.len())
            .max(lines_terminated_by.len() + 1);

        Ok(Self {
            skip_rows,
            fields_terminated_by,
            lines_starting_by,
            lines_terminated_by,
            enclosed_char: first_char(&dialect.fields_enclosed_by),
            escaped_char: first_char(&dialect.fields_escaped_by),
            stack: Vec::with_capacity(capacity),
            pos: 0,
            remaining: 0,
            end_of_block: false,
            status: RowStatus::Begin,
            found_enclosed_char: NOT_USED,
        })
    }

    /// Scans a block for rows.
    ///
    /// Returns the offset of the first row starting inside this block, or
    /// `None` when no row starts here and the caller should feed the next
    /// block into the same scanner.
    pub fn scan(&mut self, data: &[u8]) -> Option<usize> {
        self.pos = 0;
        self.remaining = data.len();
        self.end_of_block = false;

        while self.skip_rows > 0 {
            if self.skip_row(data) {
                self.skip_rows -= 1;
            } else {
                return None;
            }
        }

        let mut first_row = None;

        while self.remaining > 0 {
            match self.status {
                RowStatus::Begin => {
                    if first_row.is_none() {
                        first_row = Some(data.len() - self.remaining);
                    }

                    self.status = RowStatus::Prefix;
                }

                RowStatus::Prefix => {
                    if !self.skip_line_start(data) {
                        return first_row;
                    }

                    self.status = RowStatus::BeginOfField;
                }

                RowStatus::BeginOfField => {
                    let chr = self.get(data);

                    if chr == self.enclosed_char {
                        self.found_enclosed_char = chr;
                    } else {
                        self.found_enclosed_char = NOT_USED;
                        // the field is not enclosed, keep the character for
                        // further processing
                        self.unget(chr as u8);
                    }

                    self.status = RowStatus::Field;
                }

                RowStatus::Field => match self.scan_field(data) {
                    FieldStatus::Continued => {}
                    FieldStatus::EndOfField => self.status = RowStatus::BeginOfField,
                    FieldStatus::EndOfLine => self.status = RowStatus::Begin,
                },
            }
        }

        first_row
    }

    fn get(&mut self, data: &[u8]) -> i32 {
        if let Some(c) = self.stack.pop() {
            i32::from(c)
        } else if self.remaining > 0 {
            self.remaining -= 1;
            let c = data[self.pos];
            self.pos += 1;
            i32::from(c)
        } else {
            self.end_of_block = true;
            END_OF_BLOCK
        }
    }

    fn unget(&mut self, c: u8) {
        debug_assert!(self.stack.len() < self.stack.capacity());
        self.stack.push(c);
    }

    /// Checks whether the block contains `sequence` at the current position.
    /// The first character is NOT checked, the caller already consumed it.
    fn contains(&mut self, data: &[u8], sequence: Which) -> bool {
        let length = self.sequence(sequence).len();
        let mut chr = 0;
        let mut i = 1;

        while i < length {
            chr = self.get(data);

            if chr != i32::from(self.sequence(sequence).bytes[i]) {
                break;
            }

            i += 1;
        }

        if i == length {
            return true;
        }

        // when the block ends while looking for the sequence, the end of
        // block marker must not be stored
        if !self.end_of_block {
            self.unget(chr as u8);
        }

        while i > 1 {
            i -= 1;
            let byte = self.sequence(sequence).bytes[i];
            self.unget(byte);
        }

        false
    }

    fn sequence(&self, which: Which) -> &Sequence {
        match which {
            Which::FieldsTerminatedBy => &self.fields_terminated_by,
            Which::LinesStartingBy => &self.lines_starting_by,
            Which::LinesTerminatedBy => &self.lines_terminated_by,
        }
    }

    /// Skips bytes until a LINES TERMINATED BY sequence is consumed; its
    /// first character cannot be escaped.
    fn skip_row(&mut self, data: &[u8]) -> bool {
        while self.remaining > 0 {
            let chr = self.get(data);

            // check for escaped LINES TERMINATED BY sequences
            if chr == self.escaped_char {
                let _ = self.get(data);

                if self.end_of_block {
                    self.unget(self.escaped_char as u8);
                }

                continue;
            }

            if chr == self.lines_terminated_by.first
                && self.contains(data, Which::LinesTerminatedBy)
            {
                return true;
            }

            if self.end_of_block {
                // restore the full sequence for the next scan
                self.unget(chr as u8);
            }
        }

        false
    }

    /// Skips bytes until a LINES STARTING BY sequence is consumed.
    fn skip_line_start(&mut self, data: &[u8]) -> bool {
        if !self.lines_starting_by.used() {
            return true;
        }

        while self.remaining > 0 {
            let chr = self.get(data);

            if chr == self.lines_starting_by.first && self.contains(data, Which::LinesStartingBy)
            {
                return true;
            }

            if self.end_of_block {
                // restore the full sequence for the next scan
                self.unget(chr as u8);
            }
        }

        false
    }

    fn scan_field(&mut self, data: &[u8]) -> FieldStatus {
        // when the block ends mid-sequence, the listed characters are pushed
        // back so the next block re-evaluates from the same position
        macro_rules! handle_end_of_block {
            ($($c:expr),+) => {
                if self.end_of_block {
                    $(self.unget($c as u8);)+
                    return FieldStatus::Continued;
                }
            };
        }

        while self.remaining > 0 {
            let mut chr = self.get(data);

            if chr == self.escaped_char {
                chr = self.get(data);

                handle_end_of_block!(self.escaped_char);

                // when ESCAPED BY == ENCLOSED BY, only doubled-up escape
                // characters count as an escape sequence
                if self.escaped_char != self.enclosed_char || chr == self.escaped_char {
                    continue;
                }

                // this was not an escape sequence, continue with processing
                self.unget(chr as u8);
                chr = self.escaped_char;
            }

            if !used(self.found_enclosed_char) && chr == self.lines_terminated_by.first {
                if self.contains(data, Which::LinesTerminatedBy) {
                    return FieldStatus::EndOfLine;
                }

                handle_end_of_block!(chr);
            }

            if chr == self.found_enclosed_char {
                chr = self.get(data);

                handle_end_of_block!(self.found_enclosed_char);

                // doubled ENCLOSED BY character
                if chr == self.found_enclosed_char {
                    continue;
                }

                if chr == self.lines_terminated_by.first {
                    if self.contains(data, Which::LinesTerminatedBy) {
                        return FieldStatus::EndOfLine;
                    }

                    // both characters are restored, so that the next block
                    // ends up right here again
                    handle_end_of_block!(chr, self.found_enclosed_char);
                }

                if chr == self.fields_terminated_by.first {
                    if self.contains(data, Which::FieldsTerminatedBy) {
                        return FieldStatus::EndOfField;
                    }

                    handle_end_of_block!(chr, self.found_enclosed_char);
                }

                // this was not an end of field, continue with processing
                self.unget(chr as u8);
            } else if !used(self.found_enclosed_char) && chr == self.fields_terminated_by.first {
                if self.contains(data, Which::FieldsTerminatedBy) {
                    return FieldStatus::EndOfField;
                }

                handle_end_of_block!(chr);
            }
        }

        FieldStatus::Continued
    }
}

#[derive(Debug, Clone, Copy)]
enum Which {
    FieldsTerminatedBy,
    LinesStartingBy,
    LinesTerminatedBy,
}
