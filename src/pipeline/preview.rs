//! # Preview Grid
//!
//! Calcolo degli istanti dei fotogrammi e composizione della griglia.
//!
//! Gli istanti evitano il primo e l'ultimo fotogramma (spesso neri o titoli):
//! una frazione `margin` della durata viene tolta agli estremi prima di
//! spaziare uniformemente gli N fotogrammi.

use image::{imageops, RgbImage};
use std::path::{Path, PathBuf};

use crate::error::{BuildError, ScripyError};

/// Largest RGB canvas a preview may allocate (4 GiB)
const MAX_CANVAS_BYTES: u64 = 1 << 32;

/// Canvas size and cell count of a grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub width: u32,
    pub height: u32,
    pub cells: usize,
}

/// Rejects empty grids, overflowing sizes and canvases above
/// `MAX_CANVAS_BYTES` (`--columns`/`--rows` come straight from the command line).
pub fn grid_layout(
    columns: u32,
    rows: u32,
    cell_width: u32,
    cell_height: u32,
) -> Result<GridLayout, BuildError> {
    let invalid = |reason: String| BuildError::InvalidParameter { name: "grid", reason };
    if columns == 0 || rows == 0 {
        return Err(invalid(format!("{}x{} has no cell", columns, rows)));
    }
    let too_large = || invalid(format!("{}x{} grid is too large", columns, rows));

    let cells = columns.checked_mul(rows).ok_or_else(too_large)?;
    let width = cell_width.checked_mul(columns).ok_or_else(too_large)?;
    let height = cell_height.checked_mul(rows).ok_or_else(too_large)?;
    let bytes = u64::from(width)
        .checked_mul(u64::from(height))
        .and_then(|pixels| pixels.checked_mul(3))
        .ok_or_else(too_large)?;
    if bytes > MAX_CANVAS_BYTES || usize::try_from(bytes).is_err() {
        return Err(too_large());
    }

    Ok(GridLayout {
        width,
        height,
        cells: cells as usize,
    })
}

/// Time offsets (seconds) of `count` stills over a clip of `duration` seconds
pub fn preview_offsets(duration: f64, count: usize, margin: f64) -> Vec<f64> {
    if count == 0 {
        return Vec::new();
    }
    let chop = if count == 1 {
        margin * duration
    } else {
        margin * duration / (count - 1) as f64
    };

    (0..count)
        .map(|i| {
            if i == 0 {
                chop
            } else if i == count - 1 {
                duration - chop
            } else {
                chop + i as f64 * (duration - 2.0 * chop) / (count - 1) as f64
            }
        })
        .collect()
}

/// Paste `stills` row by row into a `columns` x `rows` grid of
/// `cell_width` x `cell_height` cells and save it to `output`.
pub fn compose_grid(
    stills: &[PathBuf],
    columns: u32,
    rows: u32,
    cell_width: u32,
    cell_height: u32,
    output: &Path,
) -> Result<(), ScripyError> {
    let layout = grid_layout(columns, rows, cell_width, cell_height)?;
    let mut canvas = RgbImage::new(layout.width, layout.height);

    for (index, still) in stills.iter().enumerate().take(layout.cells) {
        let index = index as u32;
        let x = (index % columns) * cell_width;
        let y = (index / columns) * cell_height;
        let tile = image::open(still)?.to_rgb8();
        imageops::replace(&mut canvas, &tile, x as i64, y as i64);
    }

    canvas.save(output)?;
    Ok(())
}
