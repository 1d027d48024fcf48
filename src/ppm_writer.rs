use std::fs::File;
use std::io::{prelude::*, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use log::debug;

use crate::image::Canvas;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PpmFormat {
    /// P6, raw bytes.
    #[default]
    Binary,
    /// P3, decimal text.
    Ascii,
}

impl PpmFormat {
    fn magic_number(self) -> &'static [u8] {
        match self {
            PpmFormat::Binary => b"P6",
            PpmFormat::Ascii => b"P3",
        }
    }
}

pub fn save_ppm(
    path: &Path,
    canvas: &Canvas,
    format: PpmFormat,
    comment: Option<&str>,
) -> Result<()> {
    let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    debug!("writing {} as {:?}", path.display(), format);

    let mut writer = BufWriter::new(file);
    write_ppm(&mut writer, canvas, format, comment)?;
    writer.flush()?;
    Ok(())
}

pub fn write_ppm<W: Write>(
    mut writer: W,
    canvas: &Canvas,
    format: PpmFormat,
    comment: Option<&str>,
) -> Result<()> {
    writer.write_all(format.magic_number())?;
    writer.write_all(b"\n")?;
    if let Some(comment) = comment {
        // a comment line must not be split, or the rest would be read as image data
        let comment = comment.replace(['\r', '\n'], " ");
        writer.write_all(format!("# {comment}\n").as_bytes())?;
    }
    writer.write_all(format!("{} {}\n255\n", canvas.width(), canvas.height()).as_bytes())?;

    match format {
        PpmFormat::Binary => {
            for pixel in canvas.pixels() {
                writer.write_all(&[pixel.r, pixel.g, pixel.b])?;
            }
        }
        PpmFormat::Ascii => {
            for row in canvas.rows() {
                row.iter().enumerate().try_for_each(|(i, pixel)| -> Result<()> {
                    write!(writer, "{: >3} {: >3} {: >3}", pixel.r, pixel.g, pixel.b)?;
                    if i != row.len() - 1 {
                        writer.write_all(b" ")?;
                    }
                    Ok(())
                })?;
                writer.write_all(b"\n")?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Rgb;

    fn two_by_two() -> Canvas {
        let mut canvas = Canvas::new(2, 2, Rgb::new(1, 2, 3));
        canvas.fill_rect(1, 1, 1, 1, Rgb::new(255, 128, 0));
        canvas
    }

    #[test]
    fn writes_binary_ppm() {
        let mut out = vec![];
        write_ppm(&mut out, &two_by_two(), PpmFormat::Binary, None).unwrap();

        let mut expected = b"P6\n2 2\n255\n".to_vec();
        expected.extend_from_slice(&[1, 2, 3, 1, 2, 3, 1, 2, 3, 255, 128, 0]);
        assert_eq!(out, expected);
    }

    #[test]
    fn writes_ascii_ppm_with_comment() {
        let mut out = vec![];
        write_ppm(&mut out, &two_by_two(), PpmFormat::Ascii, Some("from\ngif")).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "P3\n# from gif\n2 2\n255\n  1   2   3   1   2   3\n  1   2   3 255 128   0\n"
        );
    }

    #[test]
    fn empty_canvas_has_only_a_header() {
        let mut out = vec![];
        write_ppm(&mut out, &Canvas::new(0, 0, Rgb::BLACK), PpmFormat::Ascii, None).unwrap();

        assert_eq!(out, b"P3\n0 0\n255\n");
    }
}
