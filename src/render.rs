//! Observation rendering: raw NLE buffers to a JSON-friendly view.
//!
//! Screen rows and the message line are decoded differently on purpose:
//! - rows keep every cell, mapping non-printable bytes to [`PLACEHOLDER`], so
//!   columns line up with the original grid;
//! - the message is a null-terminated string whose non-printable bytes are
//!   dropped without a placeholder.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::env::traits::{RawObservation, BLSTATS_TURN_INDEX};

/// Substituted for any byte outside the printable ASCII range in screen rows.
pub const PLACEHOLDER: char = '?';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("status vector has {len} entries; the turn counter needs at least {required}")]
    StatusTooShort { len: usize, required: usize },
}

/// The rendered, read-only view of one observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedObservation {
    /// One string per map row, trailing whitespace stripped.
    pub screen_text: Vec<String>,
    /// The decoded top-line message.
    pub message: String,
    /// The bottom-line status vector, verbatim.
    pub stats: Vec<i64>,
    /// In-game turn counter.
    pub turn: i64,
}

fn is_printable(byte: u8) -> bool {
    (32..=126).contains(&byte)
}

/// Decode one screen row. The result has one char per input byte before the
/// trailing whitespace is stripped.
pub fn render_row(row: &[u8]) -> String {
    let line: String = row
        .iter()
        .map(|&b| if is_printable(b) { b as char } else { PLACEHOLDER })
        .collect();
    line.trim_end().to_string()
}

/// Decode the null-terminated message buffer.
pub fn decode_message(buffer: &[u8]) -> String {
    buffer
        .iter()
        .take_while(|&&b| b != 0)
        .filter(|&&b| is_printable(b))
        .map(|&b| b as char)
        .collect()
}

/// Render a raw observation.
pub fn render_observation(obs: &RawObservation) -> Result<RenderedObservation, RenderError> {
    let turn = *obs
        .blstats
        .get(BLSTATS_TURN_INDEX)
        .ok_or(RenderError::StatusTooShort {
            len: obs.blstats.len(),
            required: BLSTATS_TURN_INDEX + 1,
        })?;

    Ok(RenderedObservation {
        screen_text: obs.chars.iter().map(|row| render_row(row)).collect(),
        message: decode_message(&obs.message),
        stats: obs.blstats.clone(),
        turn,
    })
}
