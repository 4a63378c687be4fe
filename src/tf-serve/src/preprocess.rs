use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat};

use crate::config::Normalization;
use crate::error::{Error, Result};

/// Extensions accepted by the upload form and the CLI.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
const CAFFE_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];

/// Map a file extension to the image format it declares.
pub fn format_for_extension(ext: &str) -> Result<ImageFormat> {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
        "png" => Ok(ImageFormat::Png),
        other => Err(Error::Unsupported(format!(
            "image type `{}`, expected one of {}",
            other,
            SUPPORTED_EXTENSIONS.join(", ")
        ))),
    }
}

pub fn decode(data: &[u8]) -> Result<DynamicImage> {
    Ok(image::load_from_memory(data)?)
}

/// Resize to `size`x`size` and lay the pixels out as a `[1, size, size, 3]`
/// NHWC buffer, normalized for the model.
pub fn to_input(image: &DynamicImage, size: u32, normalization: Normalization) -> Vec<f32> {
    let rgb = image.to_rgb8();
    let resized = imageops::resize(&rgb, size, size, FilterType::Triangle);

    let mut input = Vec::with_capacity((size * size * 3) as usize);
    for pixel in resized.pixels() {
        let [r, g, b] = pixel.0;
        let rgb = [r as f32, g as f32, b as f32];

        match normalization {
            Normalization::Raw => input.extend_from_slice(&rgb),
            Normalization::Unit => input.extend(rgb.iter().map(|x| x / 255f32)),
            Normalization::Tf => input.extend(rgb.iter().map(|x| x / 127.5 - 1.0)),
            Normalization::Torch => input.extend(
                rgb.iter()
                    .enumerate()
                    .map(|(c, x)| (x / 255f32 - IMAGENET_MEAN[c]) / IMAGENET_STD[c]),
            ),
            Normalization::Caffe => input.extend(
                [rgb[2], rgb[1], rgb[0]]
                    .iter()
                    .enumerate()
                    .map(|(c, x)| x - CAFFE_MEAN_BGR[c]),
            ),
        }
    }

    input
}
