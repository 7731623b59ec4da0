//! Image payload that survives the trip through stage programs.
//!
//! Distance maps and thickness maps are 32-bit float grayscale, which
//! `DynamicImage` cannot represent. Those are decoded and encoded with
//! the `tiff` crate directly; everything else goes through `image`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use image::{DynamicImage, ImageBuffer, ImageFormat, Luma};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{TiffEncoder, colortype};

/// Single-channel 32-bit float image.
pub type GrayF32Image = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Errors reading or writing a [`Raster`].
#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    /// The file could not be opened or created.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The TIFF codec rejected the data.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// The `image` codec rejected the data.
    #[error(transparent)]
    Image(#[from] image::ImageError),

    /// The decoded sample count does not match the dimensions.
    #[error("TIFF has {samples} samples for a {width}x{height} image")]
    SizeMismatch {
        /// Declared width.
        width: u32,
        /// Declared height.
        height: u32,
        /// Samples actually decoded.
        samples: usize,
    },

    /// Float images can only be written as TIFF.
    #[error("32-bit float images can only be written as TIFF")]
    FloatNeedsTiff,
}

/// An image held in the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum Raster {
    /// Anything `image` can represent, including the 8-bit source.
    Dynamic(DynamicImage),
    /// 32-bit float grayscale.
    GrayF32(GrayF32Image),
}

impl Raster {
    /// Width and height in pixels.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Dynamic(image) => (image.width(), image.height()),
            Self::GrayF32(image) => image.dimensions(),
        }
    }

    /// Decode the first page of a TIFF file.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError`] if the file is unreadable or not a
    /// supported TIFF.
    pub fn read_tiff(path: &Path) -> Result<Self, RasterError> {
        let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
        if decoder.colortype()? == tiff::ColorType::Gray(32) {
            let (width, height) = decoder.dimensions()?;
            if let DecodingResult::F32(samples) = decoder.read_image()? {
                let len = samples.len();
                return GrayF32Image::from_raw(width, height, samples)
                    .map(Self::GrayF32)
                    .ok_or(RasterError::SizeMismatch {
                        width,
                        height,
                        samples: len,
                    });
            }
        }
        Ok(Self::Dynamic(image::open(path)?))
    }

    /// Encode as an uncompressed TIFF file.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError`] if the file cannot be written.
    pub fn write_tiff(&self, path: &Path) -> Result<(), RasterError> {
        match self {
            Self::Dynamic(image) => image.save_with_format(path, ImageFormat::Tiff)?,
            Self::GrayF32(image) => {
                let mut writer = BufWriter::new(File::create(path)?);
                TiffEncoder::new(&mut writer)?.write_image::<colortype::Gray32Float>(
                    image.width(),
                    image.height(),
                    image.as_raw(),
                )?;
                writer.flush()?;
            }
        }
        Ok(())
    }

    /// Write to `path`, choosing the format from its extension.
    ///
    /// Paths without a recognized extension get TIFF. Float images are
    /// only accepted for TIFF paths.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError`] if the format cannot hold the image or the
    /// file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), RasterError> {
        let format = ImageFormat::from_path(path).unwrap_or(ImageFormat::Tiff);
        match (self, format) {
            (_, ImageFormat::Tiff) => self.write_tiff(path),
            (Self::Dynamic(image), format) => Ok(image.save_with_format(path, format)?),
            (Self::GrayF32(_), _) => Err(RasterError::FloatNeedsTiff),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::GrayImage;

    use super::*;

    #[allow(clippy::cast_precision_loss)]
    fn ramp() -> GrayF32Image {
        GrayF32Image::from_fn(4, 3, |x, y| Luma([(x + 4 * y) as f32 * 0.5]))
    }

    #[test]
    fn float_tiff_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thickness.tif");
        let raster = Raster::GrayF32(ramp());

        raster.write_tiff(&path).unwrap();
        assert_eq!(Raster::read_tiff(&path).unwrap(), raster);
    }

    #[test]
    fn float_tiff_written_by_other_tools_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.tif");
        let samples: Vec<f32> = (0..16_u8).map(f32::from).collect();
        let file = File::create(&path).unwrap();
        TiffEncoder::new(file)
            .unwrap()
            .write_image::<colortype::Gray32Float>(4, 4, &samples)
            .unwrap();

        let Raster::GrayF32(image) = Raster::read_tiff(&path).unwrap() else {
            unreachable!("float TIFF decoded through image");
        };
        assert_eq!(image.dimensions(), (4, 4));
        assert_eq!(image.get_pixel(3, 3), &Luma([15.0]));
    }

    #[test]
    fn gray8_tiff_stays_dynamic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.tif");
        let raster = Raster::Dynamic(DynamicImage::ImageLuma8(GrayImage::from_pixel(
            2,
            2,
            Luma([9]),
        )));

        raster.write_tiff(&path).unwrap();
        assert_eq!(Raster::read_tiff(&path).unwrap(), raster);
    }

    #[test]
    fn float_refuses_non_tiff_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = Raster::GrayF32(ramp())
            .save(&dir.path().join("out.png"))
            .unwrap_err();
        assert!(matches!(err, RasterError::FloatNeedsTiff));
    }

    #[test]
    fn save_without_extension_writes_tiff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        let raster = Raster::GrayF32(ramp());

        raster.save(&path).unwrap();
        assert_eq!(Raster::read_tiff(&path).unwrap(), raster);
    }

    #[test]
    fn dimensions_cover_both_variants() {
        assert_eq!(Raster::GrayF32(ramp()).dimensions(), (4, 3));
        let gray = DynamicImage::ImageLuma8(GrayImage::new(7, 5));
        assert_eq!(Raster::Dynamic(gray).dimensions(), (7, 5));
    }
}
