//! Compositing of decoded frames onto the logical screen.

use std::io::Read;

use anyhow::{anyhow, Result};
use log::debug;

use crate::parser::{Decoder, DisposalMethod, Frame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Color table, indexed by palette index.
pub type Palette = Box<[Rgb]>;

/// Row major RGB image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canvas {
    width: usize,
    height: usize,
    pixels: Vec<Rgb>,
}

impl Canvas {
    pub fn new(width: u16, height: u16, fill: Rgb) -> Self {
        let width = usize::from(width);
        let height = usize::from(height);
        Self {
            width,
            height,
            pixels: vec![fill; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[Rgb] {
        &self.pixels
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Rgb]> {
        // an empty canvas has no pixels, so the chunk size never matters there
        self.pixels.chunks(self.width.max(1))
    }

    pub fn get(&self, x: usize, y: usize) -> Option<Rgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.pixels[y * self.width + x])
    }

    /// Fills the part of the rectangle that lies on the canvas.
    pub fn fill_rect(&mut self, left: u16, top: u16, width: u16, height: u16, color: Rgb) {
        let (left, top) = (usize::from(left), usize::from(top));
        let right = (left + usize::from(width)).min(self.width);
        let bottom = (top + usize::from(height)).min(self.height);

        for y in top..bottom {
            for x in left..right {
                self.pixels[y * self.width + x] = color;
            }
        }
    }

    /// Draws a frame at its position, clipped to the canvas.
    ///
    /// Transparent pixels leave the canvas untouched, indices past the end of the palette
    /// paint black.
    pub fn paint(&mut self, frame: &Frame, palette: &[Rgb]) {
        let frame_width = usize::from(frame.width);
        let frame_height = usize::from(frame.height);
        if frame_width == 0 {
            return;
        }

        let transparent = frame
            .graphic_control
            .and_then(|control| control.transparent_index());
        let rows: Vec<usize> = if frame.interlaced {
            interlaced_rows(frame_height).collect()
        } else {
            (0..frame_height).collect()
        };

        for (row, line) in rows.into_iter().zip(frame.indices.chunks(frame_width)) {
            let y = usize::from(frame.top) + row;
            if y >= self.height {
                continue;
            }

            for (column, &index) in line.iter().enumerate() {
                let x = usize::from(frame.left) + column;
                if x >= self.width {
                    break;
                }
                if Some(index) == transparent {
                    continue;
                }
                self.pixels[y * self.width + x] = palette
                    .get(usize::from(index))
                    .copied()
                    .unwrap_or_default();
            }
        }
    }
}

/// Destination rows of an interlaced image, in the order the stream stores them.
pub fn interlaced_rows(height: usize) -> impl Iterator<Item = usize> {
    [(0, 8), (4, 8), (2, 4), (1, 2)]
        .into_iter()
        .flat_map(move |(start, step)| (start..height).step_by(step))
}

/// Composites every frame of a parsed GIF into the picture left on screen after the last one.
pub fn render<T: Read>(decoder: &Decoder<'_, T>) -> Result<Canvas> {
    let screen = decoder
        .logical_screen_descriptor()
        .ok_or_else(|| anyhow!("logical screen descriptor is missing, parse the file first"))?;
    let global = decoder.global_color_table();

    let background = global
        .and_then(|table| table.get(usize::from(screen.background_color_index)))
        .copied()
        .unwrap_or(Rgb::BLACK);
    let mut canvas = Canvas::new(screen.screen_width, screen.screen_height, background);

    let mut previous: Option<(&Frame, Option<Vec<Rgb>>)> = None;
    for (i, frame) in decoder.frames().iter().enumerate() {
        if let Some((previous_frame, saved)) = previous.take() {
            dispose(&mut canvas, previous_frame, saved, background);
        }

        let palette = frame
            .palette(global)
            .ok_or_else(|| {
                anyhow!("frame {i} has no local color table and there is no global one")
            })?;

        let disposal_method = frame
            .graphic_control
            .and_then(|control| control.disposal_method);
        let saved = (disposal_method == Some(DisposalMethod::RestoreToPrevious))
            .then(|| canvas.pixels.clone());

        debug!(
            "painting frame {i}, {}x{} at ({}, {})",
            frame.width, frame.height, frame.left, frame.top
        );
        canvas.paint(frame, palette);
        previous = Some((frame, saved));
    }

    Ok(canvas)
}

fn dispose(canvas: &mut Canvas, frame: &Frame, saved: Option<Vec<Rgb>>, background: Rgb) {
    match frame.graphic_control.and_then(|control| control.disposal_method) {
        Some(DisposalMethod::RestoreToBackgroundColor) => {
            canvas.fill_rect(frame.left, frame.top, frame.width, frame.height, background);
        }
        Some(DisposalMethod::RestoreToPrevious) => {
            if let Some(pixels) = saved {
                canvas.pixels = pixels;
            }
        }
        Some(DisposalMethod::DoNotDispose) | None => {}
    }
}
