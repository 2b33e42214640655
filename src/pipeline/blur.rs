use image::{imageops, RgbImage};

use crate::{error::BlurError, plate::BoundingBox};

/// Replaces `bbox` with a Gaussian-blurred copy of itself. The box must lie
/// entirely inside the image.
pub fn blur_region(image: &mut RgbImage, bbox: BoundingBox, sigma: f32) -> Result<(), BlurError> {
    let (width, height) = image.dimensions();
    if !bbox.fits_within(width, height) {
        return Err(BlurError {
            bbox: bbox.as_tuple(),
            width,
            height,
        });
    }

    let region = imageops::crop_imm(image, bbox.x as u32, bbox.y as u32, bbox.width, bbox.height)
        .to_image();
    let blurred = imageops::blur(&region, sigma);
    imageops::replace(image, &blurred, bbox.x as i64, bbox.y as i64);
    Ok(())
}
