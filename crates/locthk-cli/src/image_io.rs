//! Reading the source image and writing the result.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use tiff::decoder::Decoder;

use crate::raster::{Raster, RasterError};

/// Errors loading the source image.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The file could not be decoded.
    #[error("could not open {path}: {source}")]
    Decode {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: image::ImageError,
    },

    /// The TIFF directory chain could not be walked.
    #[error("could not read the pages of {path}: {source}")]
    Pages {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: tiff::TiffError,
    },

    /// The file holds a stack of slices. Only single 2D images are
    /// processed.
    #[error("{path} is a stack of {pages} slices; only single-slice images are supported")]
    Stack {
        /// File that failed.
        path: PathBuf,
        /// Number of pages in the file.
        pages: usize,
    },

    /// The image is not 8-bit grayscale and conversion was not requested.
    #[error("{path} is {color:?}, not 8-bit grayscale (pass --convert to convert it)")]
    NotGray8 {
        /// File that failed.
        path: PathBuf,
        /// Color type found in the file.
        color: image::ColorType,
    },
}

/// Decode `path` as a single-slice 8-bit grayscale image.
///
/// Other color types are rejected unless `convert` is set, in which case
/// they are converted to luminance. Multi-page TIFF stacks are rejected.
///
/// # Errors
///
/// Returns [`SourceError`] if decoding fails, the file is a stack, or
/// the color type is wrong.
pub fn load_source(path: &Path, convert: bool) -> Result<Raster, SourceError> {
    if ImageFormat::from_path(path).is_ok_and(|f| f == ImageFormat::Tiff) {
        let pages = tiff_pages(path).map_err(|source| SourceError::Pages {
            path: path.to_owned(),
            source,
        })?;
        if pages > 1 {
            return Err(SourceError::Stack {
                path: path.to_owned(),
                pages,
            });
        }
    }

    let image = image::open(path).map_err(|source| SourceError::Decode {
        path: path.to_owned(),
        source,
    })?;
    match image {
        DynamicImage::ImageLuma8(_) => Ok(Raster::Dynamic(image)),
        other if convert => {
            tracing::info!(color = ?other.color(), "converting source to 8-bit grayscale");
            Ok(Raster::Dynamic(DynamicImage::ImageLuma8(other.to_luma8())))
        }
        other => Err(SourceError::NotGray8 {
            path: path.to_owned(),
            color: other.color(),
        }),
    }
}

/// Number of images in the TIFF directory chain.
fn tiff_pages(path: &Path) -> Result<usize, tiff::TiffError> {
    let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
    let mut pages = 1;
    while decoder.more_images() {
        decoder.next_image()?;
        pages += 1;
    }
    Ok(pages)
}

/// Title a freshly opened file gets: its file name, extension included.
pub fn source_title(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}

/// `<directory of input>/<title>.tif`.
pub fn default_output_path(input: &Path, title: &str) -> PathBuf {
    input
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(format!("{title}.tif"))
}

/// Write the result image. The format follows the extension; float
/// thickness maps need a TIFF path.
///
/// # Errors
///
/// Returns [`RasterError`] if the file cannot be written in that format.
pub fn save_result(image: &Raster, path: &Path) -> Result<(), RasterError> {
    image.save(path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use tiff::encoder::{TiffEncoder, colortype};

    use super::*;
    use crate::raster::GrayF32Image;

    fn luma8(raster: Raster) -> GrayImage {
        let Raster::Dynamic(DynamicImage::ImageLuma8(image)) = raster else {
            unreachable!("source is not 8-bit grayscale");
        };
        image
    }

    fn write_gray8_pages(path: &Path, pages: usize) {
        let mut encoder = TiffEncoder::new(File::create(path).unwrap()).unwrap();
        for page in 0..pages {
            let value = u8::try_from(page).unwrap();
            encoder
                .write_image::<colortype::Gray8>(3, 3, &[value; 9])
                .unwrap();
        }
    }

    #[test]
    fn gray_source_loads_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blobs.png");
        GrayImage::from_pixel(3, 3, Luma([200])).save(&path).unwrap();

        let image = luma8(load_source(&path, false).unwrap());
        assert_eq!(image.get_pixel(1, 1), &Luma([200]));
    }

    #[test]
    fn single_page_tiff_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slice.tif");
        write_gray8_pages(&path, 1);

        let image = luma8(load_source(&path, false).unwrap());
        assert_eq!(image.dimensions(), (3, 3));
    }

    #[test]
    fn tiff_stack_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.tif");
        write_gray8_pages(&path, 5);

        let err = load_source(&path, false).unwrap_err();
        assert!(matches!(err, SourceError::Stack { pages: 5, .. }), "{err}");
    }

    #[test]
    fn color_source_is_rejected_without_convert() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("color.png");
        RgbImage::from_pixel(2, 2, Rgb([10, 20, 30])).save(&path).unwrap();

        let err = load_source(&path, false).unwrap_err();
        assert!(matches!(
            err,
            SourceError::NotGray8 {
                color: image::ColorType::Rgb8,
                ..
            }
        ));
    }

    #[test]
    fn color_source_converts_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("color.png");
        RgbImage::from_pixel(2, 2, Rgb([255, 255, 255])).save(&path).unwrap();

        let image = luma8(load_source(&path, true).unwrap());
        assert_eq!(image.get_pixel(0, 0), &Luma([255]));
    }

    #[test]
    fn missing_file_fails_to_decode() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_source(&dir.path().join("absent.png"), false).unwrap_err();
        assert!(matches!(err, SourceError::Decode { .. }));
    }

    #[test]
    fn title_is_file_name() {
        assert_eq!(source_title(Path::new("/data/blobs.tif")), "blobs.tif");
        assert_eq!(source_title(Path::new("scan")), "scan");
    }

    #[test]
    fn output_lands_next_to_input() {
        assert_eq!(
            default_output_path(Path::new("/data/blobs.tif"), "blobs_LocThk"),
            Path::new("/data/blobs_LocThk.tif"),
        );
        assert_eq!(
            default_output_path(Path::new("blobs.tif"), "blobs_LocThk"),
            Path::new("blobs_LocThk.tif"),
        );
    }

    #[test]
    fn gray8_result_saves_as_tiff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tif");
        let image = GrayImage::from_pixel(2, 2, Luma([7]));

        save_result(&Raster::Dynamic(DynamicImage::ImageLuma8(image.clone())), &path).unwrap();
        assert_eq!(image::open(&path).unwrap().to_luma8(), image);
    }

    #[test]
    fn float_result_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blobs_LocThk.tif");
        let thickness = Raster::GrayF32(GrayF32Image::from_pixel(3, 2, Luma([4.25])));

        save_result(&thickness, &path).unwrap();
        assert_eq!(Raster::read_tiff(&path).unwrap(), thickness);
    }
}
