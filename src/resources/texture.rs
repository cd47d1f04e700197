//! CPU texture storage, sampling and image I/O

use crate::error::{UlrError, UlrResult};
use glam::{Vec2, Vec3, Vec4};
use image::{DynamicImage, GenericImageView};
use std::ops::{Add, Mul};
use std::path::Path;

/// Values that can be bilinearly filtered
pub trait Texel: Copy + Default + Add<Output = Self> + Mul<f32, Output = Self> + Send + Sync {}

impl<T> Texel for T where T: Copy + Default + Add<Output = T> + Mul<f32, Output = T> + Send + Sync {}

/// Row-major texel grid, top row first.
///
/// Pixel `(x, y)` covers UV `[x/w, (x+1)/w) x [y/h, (y+1)/h)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData<T> {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<T>,
    pub name: String,
}

impl<T: Copy> TextureData<T> {
    /// Create a texture filled with one value
    pub fn new(width: u32, height: u32, fill: T, name: &str) -> Self {
        Self {
            width,
            height,
            texels: vec![fill; (width as usize) * (height as usize)],
            name: name.to_string(),
        }
    }

    /// Create a texture by evaluating `f(x, y)` for every pixel
    pub fn from_fn(width: u32, height: u32, name: &str, mut f: impl FnMut(u32, u32) -> T) -> Self {
        let mut texels = Vec::with_capacity((width as usize) * (height as usize));
        for y in 0..height {
            for x in 0..width {
                texels.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            texels,
            name: name.to_string(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn index(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + x as usize
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> T {
        self.texels[self.index(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: T) {
        let index = self.index(x, y);
        self.texels[index] = value;
    }

    /// Clamp-to-edge fetch with signed coordinates
    #[inline]
    pub fn get_clamped(&self, x: i32, y: i32) -> T {
        let x = x.clamp(0, self.width as i32 - 1) as u32;
        let y = y.clamp(0, self.height as i32 - 1) as u32;
        self.get(x, y)
    }

    /// UV of the centre of pixel `(x, y)`
    #[inline]
    pub fn pixel_center_uv(&self, x: u32, y: u32) -> Vec2 {
        Vec2::new(
            (x as f32 + 0.5) / self.width as f32,
            (y as f32 + 0.5) / self.height as f32,
        )
    }

    /// Nearest-texel lookup
    pub fn sample_nearest(&self, uv: Vec2) -> T {
        let x = (uv.x * self.width as f32).floor() as i32;
        let y = (uv.y * self.height as f32).floor() as i32;
        self.get_clamped(x, y)
    }

    pub fn map<U: Copy>(&self, name: &str, f: impl Fn(T) -> U) -> TextureData<U> {
        TextureData {
            width: self.width,
            height: self.height,
            texels: self.texels.iter().map(|&t| f(t)).collect(),
            name: name.to_string(),
        }
    }
}

impl<T: Texel> TextureData<T> {
    /// Bilinear lookup with clamp-to-edge addressing
    pub fn sample_bilinear(&self, uv: Vec2) -> T {
        let fx = uv.x * self.width as f32 - 0.5;
        let fy = uv.y * self.height as f32 - 0.5;
        let x0 = fx.floor();
        let y0 = fy.floor();
        let tx = fx - x0;
        let ty = fy - y0;
        let (x0, y0) = (x0 as i32, y0 as i32);

        let top = self.get_clamped(x0, y0) * (1.0 - tx) + self.get_clamped(x0 + 1, y0) * tx;
        let bottom =
            self.get_clamped(x0, y0 + 1) * (1.0 - tx) + self.get_clamped(x0 + 1, y0 + 1) * tx;
        top * (1.0 - ty) + bottom * ty
    }
}

impl TextureData<Vec3> {
    /// Load a linear RGB texture from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> UlrResult<Self> {
        let path = path.as_ref();
        let img = image::open(path).map_err(|source| UlrError::ImageLoad {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_image(&img, &file_name(path)))
    }

    /// Load texture from bytes
    pub fn from_bytes(bytes: &[u8], name: &str) -> UlrResult<Self> {
        let img = image::load_from_memory(bytes).map_err(|source| UlrError::ImageLoad {
            path: name.into(),
            source,
        })?;
        Ok(Self::from_image(&img, name))
    }

    fn from_image(img: &DynamicImage, name: &str) -> Self {
        let (width, height) = img.dimensions();
        let rgb = img.to_rgb8();
        Self {
            width,
            height,
            texels: rgb
                .pixels()
                .map(|p| Vec3::new(p[0] as f32, p[1] as f32, p[2] as f32) / 255.0)
                .collect(),
            name: name.to_string(),
        }
    }

    /// Create a solid color texture
    pub fn solid_color(width: u32, height: u32, color: Vec3, name: &str) -> Self {
        Self::new(width, height, color, name)
    }

    /// Create a checkerboard texture
    pub fn checkerboard(width: u32, height: u32, cell: u32, color1: Vec3, color2: Vec3) -> Self {
        let cell = cell.max(1);
        Self::from_fn(width, height, "checkerboard", |x, y| {
            if ((x / cell) + (y / cell)) % 2 == 0 {
                color1
            } else {
                color2
            }
        })
    }

    /// 8-bit RGBA bytes with opaque alpha, for GPU upload
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.texels
            .iter()
            .flat_map(|c| {
                let c = c.clamp(Vec3::ZERO, Vec3::ONE) * 255.0 + Vec3::splat(0.5);
                [c.x as u8, c.y as u8, c.z as u8, 255]
            })
            .collect()
    }
}

impl TextureData<f32> {
    /// Load a single-channel texture (luma) in `[0, 1]` from file
    pub fn luma_from_file<P: AsRef<Path>>(path: P) -> UlrResult<Self> {
        let path = path.as_ref();
        let img = image::open(path).map_err(|source| UlrError::ImageLoad {
            path: path.to_path_buf(),
            source,
        })?;
        let (width, height) = img.dimensions();
        let luma = img.to_luma8();
        Ok(Self {
            width,
            height,
            texels: luma.pixels().map(|p| p[0] as f32 / 255.0).collect(),
            name: file_name(path),
        })
    }
}

impl TextureData<Vec4> {
    /// 8-bit RGBA bytes, clamped
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.texels
            .iter()
            .flat_map(|c| {
                let c = c.clamp(Vec4::ZERO, Vec4::ONE) * 255.0 + Vec4::splat(0.5);
                [c.x as u8, c.y as u8, c.z as u8, c.w as u8]
            })
            .collect()
    }

    /// Write the image as an 8-bit PNG (or any format `image` infers from the extension)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> UlrResult<()> {
        let path = path.as_ref();
        image::save_buffer(
            path,
            &self.to_rgba8(),
            self.width,
            self.height,
            image::ColorType::Rgba8,
        )
        .map_err(|source| UlrError::ImageWrite {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bilinear_at_pixel_centers_is_exact() {
        let tex = TextureData::checkerboard(8, 8, 1, Vec3::ONE, Vec3::ZERO);
        for y in 0..8 {
            for x in 0..8 {
                let sampled = tex.sample_bilinear(tex.pixel_center_uv(x, y));
                assert!((sampled - tex.get(x, y)).length() < 1e-5);
            }
        }
    }

    #[test]
    fn test_bilinear_midpoint_averages() {
        let tex = TextureData::from_fn(2, 1, "ramp", |x, _| x as f32);
        assert!((tex.sample_bilinear(Vec2::new(0.5, 0.5)) - 0.5).abs() < 1e-6);
        // Clamp to edge outside the texel centres
        assert!((tex.sample_bilinear(Vec2::new(0.0, 0.5)) - 0.0).abs() < 1e-6);
        assert!((tex.sample_bilinear(Vec2::new(1.0, 0.5)) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_nearest_clamps() {
        let tex = TextureData::from_fn(4, 4, "ids", |x, y| (y * 4 + x) as f32);
        assert_eq!(tex.sample_nearest(Vec2::new(1.0, 1.0)), 15.0);
        assert_eq!(tex.sample_nearest(Vec2::new(-0.1, 0.0)), 0.0);
        assert_eq!(tex.sample_nearest(Vec2::new(0.3, 0.0)), 1.0);
    }

    #[test]
    fn test_rgba8_conversion() {
        let tex = TextureData::solid_color(1, 1, Vec3::new(1.0, 0.5, 0.0), "c");
        assert_eq!(tex.to_rgba8(), vec![255, 128, 0, 255]);
    }
}
