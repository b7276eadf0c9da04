//! CSV reading and writing for sheet grids

use std::io::Write;

use crate::types::CellValue;

/// Split CSV text into records of raw fields.
///
/// Quoted fields may contain commas, doubled quotes and line breaks. Both
/// `\n` and `\r\n` end a record. A trailing line break does not produce an
/// empty record.
pub fn parse_csv(content: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut dirty = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
            continue;
        }

        match c {
            '"' => {
                in_quotes = true;
                dirty = true;
            }
            ',' => {
                fields.push(std::mem::take(&mut current));
                dirty = true;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                fields.push(std::mem::take(&mut current));
                records.push(std::mem::take(&mut fields));
                dirty = false;
            }
            _ => {
                current.push(c);
                dirty = true;
            }
        }
    }

    if dirty {
        fields.push(current);
        records.push(fields);
    }
    records
}

/// Interpret one raw CSV field as a cell
/// - empty -> Empty
/// - `true` / `false` (any case) -> Bool
/// - a plain decimal without leading zeros -> Number
/// - otherwise -> Text, untouched
pub fn parse_field(field: &str) -> CellValue {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return CellValue::Empty;
    }
    if trimmed.eq_ignore_ascii_case("true") {
        return CellValue::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return CellValue::Bool(false);
    }

    // "007" and "+5511..." stay text
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let leading_zero =
        digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.");
    let plain = digits
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.');
    if plain && !leading_zero {
        if let Ok(n) = trimmed.parse::<f64>() {
            return CellValue::Number(n);
        }
    }

    CellValue::Text(field.to_string())
}

/// Quote a field if it contains a delimiter, quote or line break
pub fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Write a grid of text cells, one line per row
pub fn write_rows<W: Write>(writer: &mut W, rows: &[Vec<String>]) -> std::io::Result<()> {
    for row in rows {
        let line: Vec<String> = row.iter().map(|f| escape_field(f)).collect();
        writeln!(writer, "{}", line.join(","))?;
    }
    writer.flush()
}
