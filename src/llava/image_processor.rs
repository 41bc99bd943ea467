use anyhow::{ensure, Result};
use candle_core::{DType, Device, Tensor};
use candle_transformers::models::llava::utils::select_best_resolution;
use image::imageops::{overlay, FilterType};
use image::{DynamicImage, GenericImageView};

use super::config::PreprocessorConfig;

/// LLaVA-NeXT 的 anyres 预处理：
/// 整图缩放成一个正方形 + 按最佳网格分辨率切出的若干 tile，
/// 输出 `(n_tiles, 3, H, W)` 的 f32 张量（CPU 上）。
pub struct ImageProcessor {
    config: PreprocessorConfig,
    grid_pinpoints: Vec<(u32, u32)>,
}

impl ImageProcessor {
    pub fn new(config: PreprocessorConfig, grid_pinpoints: Vec<(u32, u32)>) -> Result<Self> {
        ensure!(
            config.image_mean.len() == 3 && config.image_std.len() == 3,
            "image_mean / image_std must have 3 channels"
        );
        ensure!(!grid_pinpoints.is_empty(), "image_grid_pinpoints is empty");
        Ok(Self {
            config,
            grid_pinpoints,
        })
    }

    pub fn preprocess(&self, image: &DynamicImage) -> Result<Tensor> {
        let image = DynamicImage::ImageRgb8(image.to_rgb8());
        let shortest_edge = self.config.size.shortest_edge;
        let crop = (self.config.crop_size.width, self.config.crop_size.height);
        let filter = self.filter();

        let best = select_best_resolution(image.dimensions(), &self.grid_pinpoints);
        let padded = resize_and_pad(&image, best);

        let mut tiles = vec![image.resize_exact(shortest_edge, shortest_edge, filter)];
        tiles.extend(divide_to_tiles(&padded, crop));

        let tensors = tiles
            .iter()
            .map(|tile| self.process_tile(tile))
            .collect::<Result<Vec<_>>>()?;
        Ok(Tensor::stack(&tensors, 0)?)
    }

    fn process_tile(&self, tile: &DynamicImage) -> Result<Tensor> {
        let mut tile = tile.clone();
        if self.config.do_resize {
            tile = resize_shortest_edge(&tile, self.config.size.shortest_edge, self.filter());
        }
        if self.config.do_center_crop {
            tile = center_crop(&tile, (self.config.crop_size.width, self.config.crop_size.height));
        }

        let (width, height) = tile.dimensions();
        let raw = tile.to_rgb8().into_raw();
        let mut pixels =
            Tensor::from_vec(raw, (height as usize, width as usize, 3), &Device::Cpu)?
                .to_dtype(DType::F32)?;
        if self.config.do_rescale {
            pixels = pixels.affine(self.config.rescale_factor as f64, 0.0)?;
        }
        if self.config.do_normalize {
            let mean = Tensor::from_slice(&self.config.image_mean, (3,), &Device::Cpu)?;
            let std = Tensor::from_slice(&self.config.image_std, (3,), &Device::Cpu)?;
            pixels = pixels.broadcast_sub(&mean)?.broadcast_div(&std)?;
        }
        // HWC -> CHW
        Ok(pixels.permute((2, 0, 1))?.contiguous()?)
    }

    // PIL 的 resample 编号
    fn filter(&self) -> FilterType {
        match self.config.resample {
            0 => FilterType::Nearest,
            1 => FilterType::Lanczos3,
            2 => FilterType::Triangle,
            _ => FilterType::CatmullRom,
        }
    }
}

/// 等比缩放到目标分辨率内，居中贴到黑底画布上
fn resize_and_pad(image: &DynamicImage, target: (u32, u32)) -> DynamicImage {
    let (width, height) = image.dimensions();
    let (target_width, target_height) = target;
    let scale_w = target_width as f32 / width as f32;
    let scale_h = target_height as f32 / height as f32;
    let (new_width, new_height) = if scale_w < scale_h {
        (
            target_width,
            ((height as f32 * scale_w).ceil() as u32).min(target_height),
        )
    } else {
        (
            ((width as f32 * scale_h).ceil() as u32).min(target_width),
            target_height,
        )
    };
    let resized = image.resize_exact(new_width, new_height, FilterType::CatmullRom);
    let mut canvas = DynamicImage::new_rgb8(target_width, target_height);
    let (left, top) = centered_offset((target_width, target_height), (new_width, new_height));
    overlay(&mut canvas, &resized, left as i64, top as i64);
    canvas
}

fn divide_to_tiles(image: &DynamicImage, (tile_w, tile_h): (u32, u32)) -> Vec<DynamicImage> {
    let (width, height) = image.dimensions();
    let mut tiles = Vec::new();
    for y in (0..height).step_by(tile_h as usize) {
        for x in (0..width).step_by(tile_w as usize) {
            tiles.push(image.crop_imm(x, y, tile_w, tile_h));
        }
    }
    tiles
}

fn resize_shortest_edge(image: &DynamicImage, size: u32, filter: FilterType) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width.min(height) == size {
        return image.clone();
    }
    let (new_width, new_height) = if width < height {
        (size, (size as f32 * height as f32 / width as f32).ceil() as u32)
    } else {
        ((size as f32 * width as f32 / height as f32).ceil() as u32, size)
    };
    image.resize_exact(new_width, new_height, filter)
}

fn center_crop(image: &DynamicImage, (crop_w, crop_h): (u32, u32)) -> DynamicImage {
    let (left, top) = centered_offset(image.dimensions(), (crop_w, crop_h));
    image.crop_imm(left, top, crop_w, crop_h)
}

fn centered_offset((width, height): (u32, u32), (inner_w, inner_h): (u32, u32)) -> (u32, u32) {
    let left = width.saturating_sub(inner_w).div_ceil(2);
    let top = height.saturating_sub(inner_h).div_ceil(2);
    (left, top)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llava::config::{CropSize, ShortestEdge};
    use image::{Rgb, RgbImage};

    fn tiny_config() -> PreprocessorConfig {
        PreprocessorConfig {
            crop_size: CropSize {
                height: 4,
                width: 4,
            },
            do_center_crop: true,
            do_normalize: true,
            do_rescale: true,
            do_resize: true,
            image_mean: vec![0.5, 0.5, 0.5],
            image_std: vec![0.5, 0.5, 0.5],
            resample: 3,
            rescale_factor: 1.0 / 255.0,
            size: ShortestEdge { shortest_edge: 4 },
        }
    }

    #[test]
    fn wide_image_gets_base_plus_two_tiles() {
        let processor = ImageProcessor::new(tiny_config(), vec![(4, 8), (8, 4), (8, 8)]).unwrap();
        let image = DynamicImage::new_rgb8(10, 5);
        let pixels = processor.preprocess(&image).unwrap();
        assert_eq!(pixels.dims(), &[3, 3, 4, 4]);
    }

    #[test]
    fn white_pixels_normalize_to_one() {
        let processor = ImageProcessor::new(tiny_config(), vec![(4, 4)]).unwrap();
        let white = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([255, 255, 255])));
        let pixels = processor.preprocess(&white).unwrap();
        assert_eq!(pixels.dims(), &[2, 3, 4, 4]);
        let values = pixels.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| (v - 1.0).abs() < 1e-5));
    }

    #[test]
    fn pad_keeps_aspect_ratio_centered() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 1, Rgb([255, 0, 0])));
        let padded = resize_and_pad(&image, (4, 4)).to_rgb8();
        assert_eq!(padded.dimensions(), (4, 4));
        assert_eq!(padded.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(padded.get_pixel(0, 1)[0], 255);
        assert_eq!(padded.get_pixel(3, 2)[0], 255);
        assert_eq!(padded.get_pixel(3, 3), &Rgb([0, 0, 0]));
    }

    #[test]
    fn rejects_bad_normalization_config() {
        let mut config = tiny_config();
        config.image_std = vec![1.0];
        assert!(ImageProcessor::new(config, vec![(4, 4)]).is_err());
    }
}
