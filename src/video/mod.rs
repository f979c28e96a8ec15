//! 映像フレームの供給元
//!
//! カメラ（GStreamer）と、テストやバッチ学習用の静止画シーケンスを
//! 同じ `FrameSource` として扱います。

#[cfg(feature = "camera")]
pub mod camera;

#[cfg(feature = "camera")]
pub use camera::GstCamera;

use base64::Engine as _;
use image::{codecs::jpeg::JpegEncoder, ImageEncoder, RgbImage};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Result, SessionError};

/// フレーム供給元
pub trait FrameSource: Send + Sync {
    /// 現在のフレームを1枚取得
    fn capture(&self) -> Result<RgbImage>;

    /// ログ表示用の説明
    fn describe(&self) -> String;
}

/// 固定された画像列を順番に返す供給元
pub struct ImageSequence {
    frames: Vec<RgbImage>,
    cursor: AtomicUsize,
}

impl ImageSequence {
    pub fn new(frames: Vec<RgbImage>) -> Result<Self> {
        if frames.is_empty() {
            return Err(SessionError::CameraUnavailable(
                "画像シーケンスが空です".to_string(),
            ));
        }
        Ok(Self {
            frames,
            cursor: AtomicUsize::new(0),
        })
    }

    /// ディレクトリ内の画像をファイル名順に読み込む
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let frames = paths
            .iter()
            .map(|path| {
                image::open(path)
                    .map(|img| img.to_rgb8())
                    .map_err(|e| SessionError::Capture(format!("{}: {}", path.display(), e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(frames)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for ImageSequence {
    fn capture(&self) -> Result<RgbImage> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.frames.len();
        Ok(self.frames[index].clone())
    }

    fn describe(&self) -> String {
        format!("画像シーケンス ({}枚)", self.frames.len())
    }
}

/// プレビュー表示用にJPEGのdata URLへ変換
pub fn encode_preview(frame: &RgbImage, quality: u8) -> Result<String> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .write_image(
            frame.as_raw(),
            frame.width(),
            frame.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| SessionError::Capture(format!("JPEGエンコードに失敗: {}", e)))?;

    let data = base64::engine::general_purpose::STANDARD.encode(&jpeg);
    Ok(format!("data:image/jpeg;base64,{}", data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn sequence_cycles_through_frames() {
        let frames = vec![
            RgbImage::from_pixel(2, 2, Rgb([1, 1, 1])),
            RgbImage::from_pixel(2, 2, Rgb([2, 2, 2])),
        ];
        let source = ImageSequence::new(frames).unwrap();
        let seen: Vec<u8> = (0..5).map(|_| source.capture().unwrap()[(0, 0)][0]).collect();
        assert_eq!(seen, vec![1, 2, 1, 2, 1]);
    }

    #[test]
    fn empty_sequence_is_unavailable() {
        assert!(matches!(
            ImageSequence::new(Vec::new()),
            Err(SessionError::CameraUnavailable(_))
        ));
    }

    #[test]
    fn from_dir_reads_images_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(3, 3, Rgb([200, 0, 0]))
            .save(dir.path().join("b.png"))
            .unwrap();
        RgbImage::from_pixel(3, 3, Rgb([0, 200, 0]))
            .save(dir.path().join("a.png"))
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();

        let source = ImageSequence::from_dir(dir.path()).unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(source.capture().unwrap()[(0, 0)], Rgb([0, 200, 0]));
    }

    #[test]
    fn preview_is_a_jpeg_data_url() {
        let url = encode_preview(&RgbImage::new(8, 8), 80).unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));
    }
}
