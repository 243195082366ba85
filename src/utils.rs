use anyhow::{Result, bail};

/// Convert column letters to a 0-based column index ("A" -> 0, "Z" -> 25, "AA" -> 26).
pub fn column_letters_to_index(letters: &str) -> Result<u32> {
    if letters.is_empty() {
        bail!("empty column reference");
    }
    let mut result: u32 = 0;
    for ch in letters.chars() {
        if !ch.is_ascii_uppercase() {
            bail!("invalid column letter '{}' in '{}'", ch, letters);
        }
        result = result
            .checked_mul(26)
            .and_then(|r| r.checked_add(ch as u32 - 'A' as u32 + 1))
            .ok_or_else(|| anyhow::anyhow!("column reference '{}' overflows", letters))?;
    }
    Ok(result - 1)
}

/// Convert a 0-based column index back to letters (0 -> "A", 26 -> "AA").
pub fn column_index_to_letters(mut index: u32) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'A' + (index % 26) as u8) as char);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.iter().rev().collect()
}

/// Split an A1-style reference into 0-based (row, column) indices.
pub fn parse_cell_reference(reference: &str) -> Result<(u32, u32)> {
    let reference = reference.trim();
    let split = reference
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(|| anyhow::anyhow!("cell reference '{}' has no row number", reference))?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() {
        bail!("cell reference '{}' has no column letters", reference);
    }
    let row: u32 = digits
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid row number in '{}'", reference))?;
    if row == 0 {
        bail!("row numbers are 1-based, got '{}'", reference);
    }
    let col = column_letters_to_index(letters)?;
    Ok((row - 1, col))
}

/// Format 0-based (row, column) indices back into an A1-style reference.
pub fn cell_address(row: u32, col: u32) -> String {
    format!("{}{}", column_index_to_letters(col), row + 1)
}
