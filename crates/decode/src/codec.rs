//! Shared image-crate plumbing for the byte-oriented backends

use std::io::{BufRead, Seek};

use image::imageops::{self, FilterType};
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader, RgbaImage};

use crate::{Bounds, DecodeRequest, DecodedRaster, Result};

/// Decode and apply the EXIF orientation, if any
pub(crate) fn read_oriented<R: BufRead + Seek>(reader: ImageReader<R>) -> Result<DynamicImage> {
    let mut decoder = reader.with_guessed_format()?.into_decoder()?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image)
}

/// Sub-sample a buffer by `factor` with a triangle filter
pub(crate) fn subsample(image: &RgbaImage, factor: u32) -> RgbaImage {
    if factor <= 1 {
        return image.clone();
    }
    let target = Bounds::new(image.width(), image.height()).scaled(factor);
    imageops::resize(image, target.width, target.height, FilterType::Triangle)
}

/// Turn a fully decoded image into the raster for `request`
pub(crate) fn rasterize(image: DynamicImage, request: DecodeRequest) -> DecodedRaster {
    let rgba = image.into_rgba8();
    let natural = Bounds::new(rgba.width(), rgba.height());
    let factor = request.factor_for(natural);
    let image = if factor > 1 { subsample(&rgba, factor) } else { rgba };
    DecodedRaster {
        image,
        natural,
        factor,
    }
}
