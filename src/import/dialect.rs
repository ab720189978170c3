use crate::error::{Error, Result};

// characters which have an escaped representation in dump data
const ESCAPED_CHARS: &[u8] = b"ntrb0ZN";
// every character a numeric value's text representation may start with
const NUMERIC_CHARS: &[u8] = b".0123456789e+-";

/// Field- and line-handling options of a delimited text format, matching the
/// `LOAD DATA INFILE` clauses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialect {
    pub lines_terminated_by: Vec<u8>,
    /// At most one byte.
    pub fields_escaped_by: Vec<u8>,
    pub fields_terminated_by: Vec<u8>,
    /// At most one byte.
    pub fields_enclosed_by: Vec<u8>,
    pub fields_optionally_enclosed: bool,
    pub lines_starting_by: Vec<u8>,
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            lines_terminated_by: b"\n".to_vec(),
            fields_escaped_by: b"\\".to_vec(),
            fields_terminated_by: b"\t".to_vec(),
            fields_enclosed_by: Vec::new(),
            fields_optionally_enclosed: false,
            lines_starting_by: Vec::new(),
        }
    }
}

impl Dialect {
    /// CSV: CRLF lines, comma-separated, optionally quoted.
    pub fn csv() -> Self {
        Self {
            lines_terminated_by: b"\r\n".to_vec(),
            fields_escaped_by: b"\\".to_vec(),
            fields_terminated_by: b",".to_vec(),
            fields_enclosed_by: b"\"".to_vec(),
            fields_optionally_enclosed: true,
            lines_starting_by: Vec::new(),
        }
    }

    /// TSV: as CSV with tab separators.
    pub fn tsv() -> Self {
        Self {
            fields_terminated_by: b"\t".to_vec(),
            ..Self::csv()
        }
    }

    /// Unix CSV: LF lines, always-quoted fields.
    pub fn csv_unix() -> Self {
        Self {
            lines_terminated_by: b"\n".to_vec(),
            fields_escaped_by: b"\\".to_vec(),
            fields_terminated_by: b",".to_vec(),
            fields_enclosed_by: b"\"".to_vec(),
            fields_optionally_enclosed: false,
            lines_starting_by: Vec::new(),
        }
    }

    /// One JSON document per line.
    pub fn json() -> Self {
        Self {
            lines_terminated_by: b"\n".to_vec(),
            fields_escaped_by: Vec::new(),
            fields_terminated_by: b"\n".to_vec(),
            fields_enclosed_by: Vec::new(),
            fields_optionally_enclosed: false,
            lines_starting_by: Vec::new(),
        }
    }

    /// Resolves a preset by name.
    pub fn by_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "default" => Ok(Self::default()),
            "csv" => Ok(Self::csv()),
            "tsv" => Ok(Self::tsv()),
            "json" => Ok(Self::json()),
            "csv-unix" => Ok(Self::csv_unix()),
            _ => Err(Error::Validation(
                "dialect value must be default, csv, tsv, json or csv-unix.".to_string(),
            )),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.fields_escaped_by.len() > 1 {
            return Err(Error::Validation(
                "fieldsEscapedBy must be empty or a char.".to_string(),
            ));
        }

        // a separator which is a prefix of another cannot be interpreted
        if !self.lines_terminated_by.is_empty()
            && !self.fields_escaped_by.is_empty()
            && self.lines_terminated_by.starts_with(&self.fields_escaped_by)
        {
            return Err(Error::Validation(
                "Separators cannot be the same or be a prefix of another.".to_string(),
            ));
        }

        if self.fields_enclosed_by.len() > 1 {
            return Err(Error::Validation(
                "fieldsEnclosedBy must be empty or a char.".to_string(),
            ));
        }

        if self.fields_optionally_enclosed && self.fields_enclosed_by.is_empty() {
            return Err(Error::Validation(
                "fieldsEnclosedBy must be set if fieldsOptionallyEnclosed is true.".to_string(),
            ));
        }

        if self.fields_terminated_by.is_empty() && self.fields_enclosed_by.is_empty() {
            return Err(Error::Validation(
                "The fieldsTerminatedBy and fieldsEnclosedBy are both empty, resulting in a \
                 fixed-row format. This is currently not supported."
                    .to_string(),
            ));
        }

        // the server cannot tell such a separator apart from data; this
        // mirrors the warning the server issues on export
        if let Some(&first) = self.fields_terminated_by.first() {
            if (self.fields_enclosed_by.is_empty() && ESCAPED_CHARS.contains(&first))
                || (self.fields_optionally_enclosed && NUMERIC_CHARS.contains(&first))
            {
                return Err(Error::Validation(format!(
                    "First character of the fieldsTerminatedBy string is ambiguous: {}, please \
                     use non-empty fieldsEnclosedBy and set fieldsOptionallyEnclosed to false.",
                    first as char
                )));
            }
        }

        Ok(())
    }

    /// Validates the dialect and applies the unpacker-level defaulting: an
    /// empty `LINES TERMINATED BY` falls back to the field terminator.
    pub fn finish(mut self) -> Result<Self> {
        self.validate()?;

        if self.lines_terminated_by.is_empty() && !self.fields_terminated_by.is_empty() {
            self.lines_terminated_by = self.fields_terminated_by.clone();
        }

        Ok(self)
    }

    /// Builds the `LOAD DATA INFILE` clause fragment describing this format.
    pub fn build_sql(&self) -> String {
        let mut sql = format!(
            "FIELDS TERMINATED BY {}",
            sql_quote(&self.fields_terminated_by)
        );

        if !self.fields_enclosed_by.is_empty() {
            if self.fields_optionally_enclosed {
                sql.push_str(" OPTIONALLY");
            }
            sql.push_str(&format!(
                " ENCLOSED BY {}",
                sql_quote(&self.fields_enclosed_by)
            ));
        }

        sql.push_str(&format!(
            " ESCAPED BY {} LINES STARTING BY {} TERMINATED BY {}",
            sql_quote(&self.fields_escaped_by),
            sql_quote(&self.lines_starting_by),
            sql_quote(&self.lines_terminated_by)
        ));

        sql
    }
}

/// Quotes a byte sequence as a SQL string literal.
fn sql_quote(bytes: &[u8]) -> String {
    let mut quoted = String::with_capacity(bytes.len() + 2);
    quoted.push('\'');

    for &b in bytes {
        match b {
            0x00 => quoted.push_str("\\0"),
            b'\n' => quoted.push_str("\\n"),
            b'\r' => quoted.push_str("\\r"),
            0x1a => quoted.push_str("\\Z"),
            b'\'' => quoted.push_str("\\'"),
            b'"' => quoted.push_str("\\\""),
            b'\\' => quoted.push_str("\\\\"),
            _ => quoted.push(b as char),
        }
    }

    quoted.push('\'');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn presets() {
        let csv = Dialect::csv();
        assert_eq!(csv.lines_terminated_by, b"\r\n");
        assert_eq!(csv.fields_terminated_by, b",");
        assert_eq!(csv.fields_enclosed_by, b"\"");
        assert!(csv.fields_optionally_enclosed);
        csv.validate().unwrap();

        let tsv = Dialect::tsv();
        assert_eq!(tsv.fields_terminated_by, b"\t");
        assert_eq!(tsv.lines_terminated_by, b"\r\n");
        tsv.validate().unwrap();

        let unix = Dialect::csv_unix();
        assert_eq!(unix.lines_terminated_by, b"\n");
        assert!(!unix.fields_optionally_enclosed);
        unix.validate().unwrap();

        let json = Dialect::json();
        assert_eq!(json.lines_terminated_by, b"\n");
        assert_eq!(json.fields_terminated_by, b"\n");
        assert!(json.fields_escaped_by.is_empty());
        json.validate().unwrap();

        assert_eq!(Dialect::by_name("CSV").unwrap(), Dialect::csv());
        assert!(Dialect::by_name("yaml").is_err());
    }

    #[test]
    fn escape_and_enclosure_must_be_single_bytes() {
        let dialect = Dialect {
            fields_escaped_by: b"\\\\".to_vec(),
            ..Dialect::default()
        };
        assert!(dialect.validate().is_err());

        let dialect = Dialect {
            fields_enclosed_by: b"\"\"".to_vec(),
            ..Dialect::csv()
        };
        assert!(dialect.validate().is_err());
    }

    #[test]
    fn optionally_enclosed_requires_an_enclosure() {
        let dialect = Dialect {
            fields_enclosed_by: Vec::new(),
            fields_optionally_enclosed: true,
            ..Dialect::csv()
        };
        assert!(dialect.validate().is_err());
    }

    #[test]
    fn escape_must_not_prefix_the_line_terminator() {
        let dialect = Dialect {
            lines_terminated_by: b"\\n".to_vec(),
            ..Dialect::default()
        };
        let err = dialect.validate().unwrap_err();
        assert!(err
            .to_string()
            .contains("Separators cannot be the same or be a prefix of another."));
    }

    #[test]
    fn fixed_row_format_is_rejected() {
        let dialect = Dialect {
            fields_terminated_by: Vec::new(),
            fields_enclosed_by: Vec::new(),
            fields_optionally_enclosed: false,
            ..Dialect::default()
        };
        assert!(dialect.validate().is_err());
    }

    #[test]
    fn ambiguous_field_terminator_first_characters() {
        // unenclosed: the first byte must not collide with an escape letter
        let dialect = Dialect {
            fields_terminated_by: b"n".to_vec(),
            fields_enclosed_by: Vec::new(),
            fields_optionally_enclosed: false,
            ..Dialect::default()
        };
        let err = dialect.validate().unwrap_err();
        assert!(err.to_string().contains("ambiguous: n"));

        // optionally enclosed: the first byte must not look numeric
        let dialect = Dialect {
            fields_terminated_by: b"1;".to_vec(),
            ..Dialect::csv()
        };
        let err = dialect.validate().unwrap_err();
        assert!(err.to_string().contains("ambiguous: 1"));

        // enclosed and not optional: the same byte is fine
        let dialect = Dialect {
            fields_terminated_by: b"n".to_vec(),
            ..Dialect::csv_unix()
        };
        dialect.validate().unwrap();
    }

    #[test]
    fn finish_substitutes_an_empty_line_terminator() {
        let dialect = Dialect {
            lines_terminated_by: Vec::new(),
            ..Dialect::default()
        }
        .finish()
        .unwrap();
        assert_eq!(dialect.lines_terminated_by, b"\t");
    }

    #[test]
    fn sql_fragment() {
        // the tab byte has no escaped form and is emitted verbatim
        assert_eq!(
            Dialect::default().build_sql(),
            "FIELDS TERMINATED BY '\t' ESCAPED BY '\\\\' LINES STARTING BY '' \
             TERMINATED BY '\\n'"
        );

        assert_eq!(
            Dialect::csv().build_sql(),
            "FIELDS TERMINATED BY ',' OPTIONALLY ENCLOSED BY '\\\"' ESCAPED BY '\\\\' \
             LINES STARTING BY '' TERMINATED BY '\\r\\n'"
        );
    }

    #[test]
    fn sql_quoting_escapes_special_bytes() {
        assert_eq!(sql_quote(b"a'b"), "'a\\'b'");
        assert_eq!(sql_quote(b"\r\n"), "'\\r\\n'");
        assert_eq!(sql_quote(&[0x00, 0x1a]), "'\\0\\Z'");
        assert_eq!(sql_quote(b""), "''");
    }
}
