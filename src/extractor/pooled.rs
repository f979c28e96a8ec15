//! 格子平均による軽量な埋め込み

use image::RgbImage;

use super::{normalize_frame, FeatureExtractor};
use crate::error::{Result, SessionError};

/// 正規化画像を `grid x grid` の格子ごとにチャネル平均する抽出器
///
/// D = 3 * grid^2
#[derive(Debug, Clone)]
pub struct PooledEmbedder {
    image_size: u32,
    grid: u32,
}

impl PooledEmbedder {
    pub fn new(image_size: u32, grid: u32) -> Result<Self> {
        if grid == 0 || image_size < grid {
            return Err(SessionError::ExtractorLoad(format!(
                "格子サイズが不正です: grid={} image_size={}",
                grid, image_size
            )));
        }
        Ok(Self { image_size, grid })
    }
}

impl FeatureExtractor for PooledEmbedder {
    fn name(&self) -> &str {
        "pooled"
    }

    fn embedding_dim(&self) -> usize {
        3 * (self.grid * self.grid) as usize
    }

    fn extract(&self, frame: &RgbImage) -> Result<Vec<f32>> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(SessionError::Capture("空のフレームです".to_string()));
        }

        let size = self.image_size as usize;
        let grid = self.grid as usize;
        let data = normalize_frame(frame, self.image_size);

        let mut embedding = Vec::with_capacity(self.embedding_dim());
        for channel in 0..3 {
            let plane = &data[channel * size * size..(channel + 1) * size * size];
            for gy in 0..grid {
                let (y0, y1) = (gy * size / grid, (gy + 1) * size / grid);
                for gx in 0..grid {
                    let (x0, x1) = (gx * size / grid, (gx + 1) * size / grid);
                    let mut sum = 0.0f32;
                    for y in y0..y1 {
                        sum += plane[y * size + x0..y * size + x1].iter().sum::<f32>();
                    }
                    embedding.push(sum / ((y1 - y0) * (x1 - x0)) as f32);
                }
            }
        }
        Ok(embedding)
    }
}
