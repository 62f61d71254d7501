//! Well and sub-sample labels.
//!
//! Wells are named by a row letter followed by a 1-based column number
//! (`A1`, `B4`, `H12`). When a plate has more than one sample per well the
//! sub-sample is appended as a lowercase letter (`B4a`, `B4b`).
//!
//! Addresses typed by an operator may also use a 1-based sequential well
//! number counted row by row (`5` is row 0, column 4 on a 12-column plate).

use crate::error::{AmiError, AmiResult};
use crate::plate::PlateConfig;

/// Row letters, one per row. Plates never have more rows than letters.
pub const ROW_LETTERS: &[u8; 26] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// A parsed address: well plus an optional explicit sub-sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WellAddress {
    pub row: usize,
    pub col: usize,
    /// `None` when the address carried no sub-sample letter.
    pub sample: Option<usize>,
}

impl WellAddress {
    /// Sub-sample index, defaulting to the first sample.
    pub fn sample_or_first(&self) -> usize {
        self.sample.unwrap_or(0)
    }
}

/// Label of the well at `(row, col)`, e.g. `(1, 3)` is `"B4"`.
///
/// Rows beyond the alphabet wrap; [`PlateConfig::validate`] keeps `ny` within it.
pub fn well_label(row: usize, col: usize) -> String {
    let letter = ROW_LETTERS[row % ROW_LETTERS.len()] as char;
    format!("{}{}", letter, col + 1)
}

/// Letter of sub-sample `index` (`0` is `'a'`).
pub fn subsample_letter(index: usize) -> char {
    (b'a' + (index % 26) as u8) as char
}

/// Sub-sample suffix used in labels: empty for single-sample plates.
pub fn subsample_label(plate: &PlateConfig, index: usize) -> String {
    if plate.samples_per_well > 1 {
        subsample_letter(index).to_string()
    } else {
        String::new()
    }
}

/// Full label of a sample, e.g. `"B4a"` (or `"B4"` on a single-sample plate).
pub fn sample_label(plate: &PlateConfig, row: usize, col: usize, sample: usize) -> String {
    let mut label = well_label(row, col);
    label.push_str(&subsample_label(plate, sample));
    label
}

/// Index of the sub-sample named by `letter`, checked against the plate.
pub fn subsample_index(plate: &PlateConfig, letter: char) -> AmiResult<usize> {
    let text = letter.to_string();
    if !letter.is_ascii_lowercase() {
        return Err(AmiError::invalid_address(
            &text,
            "sub-sample must be a lowercase letter",
        ));
    }
    let index = (letter as u8 - b'a') as usize;
    if index >= plate.samples_per_well {
        return Err(AmiError::invalid_address(
            &text,
            format!(
                "sub-sample '{}' does not exist, plate has {} per well",
                letter, plate.samples_per_well
            ),
        ));
    }
    Ok(index)
}

/// Parse an operator-entered address against `plate`.
///
/// Spaces and line endings are ignored. A trailing non-digit selects the
/// sub-sample. The remainder is either a 1-based sequential well number or a
/// row letter (either case) followed by a 1-based column number.
pub fn row_col_from_label(plate: &PlateConfig, text: &str) -> AmiResult<WellAddress> {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, ' ' | '\r' | '\n' | '\t'))
        .collect();

    let Some(last) = cleaned.chars().last() else {
        return Err(AmiError::invalid_address(text, "address is empty"));
    };

    let (well, sample) = if last.is_ascii_digit() {
        (cleaned.as_str(), None)
    } else {
        let index = subsample_index(plate, last)
            .map_err(|_| invalid_subsample(text, last, plate.samples_per_well))?;
        (&cleaned[..cleaned.len() - last.len_utf8()], Some(index))
    };

    let Some(first) = well.chars().next() else {
        return Err(AmiError::invalid_address(text, "missing well"));
    };

    let (row, col) = if first.is_ascii_digit() {
        let number: usize = well
            .parse()
            .map_err(|_| AmiError::invalid_address(text, "well number is not an integer"))?;
        let wells = plate.nx * plate.ny;
        if number == 0 || number > wells {
            return Err(AmiError::invalid_address(
                text,
                format!("well number must be between 1 and {}", wells),
            ));
        }
        ((number - 1) / plate.nx, (number - 1) % plate.nx)
    } else {
        let row = row_from_letter(plate, first)
            .ok_or_else(|| AmiError::invalid_address(text, format!("unknown row '{}'", first)))?;
        let column: usize = well[first.len_utf8()..]
            .parse()
            .map_err(|_| AmiError::invalid_address(text, "column is not a number"))?;
        if column == 0 || column > plate.nx {
            return Err(AmiError::invalid_address(
                text,
                format!("column must be between 1 and {}", plate.nx),
            ));
        }
        (row, column - 1)
    };

    Ok(WellAddress { row, col, sample })
}

fn row_from_letter(plate: &PlateConfig, letter: char) -> Option<usize> {
    if !letter.is_ascii_alphabetic() {
        return None;
    }
    let index = (letter.to_ascii_uppercase() as u8 - b'A') as usize;
    (index < plate.ny).then_some(index)
}

fn invalid_subsample(text: &str, letter: char, samples_per_well: usize) -> AmiError {
    AmiError::invalid_address(
        text,
        format!(
            "sub-sample '{}' is not valid for {} sample(s) per well",
            letter, samples_per_well
        ),
    )
}
