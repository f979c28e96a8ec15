//! 画像フレームから特徴ベクトルを得る抽出器
//!
//! 抽出器は起動時に1度だけ読み込まれ、以降は全ての呼び出し元から読み取り専用で
//! 共有されます。

mod pooled;

pub use pooled::PooledEmbedder;

use image::{imageops::FilterType, RgbImage};
use tracing::info;

use crate::error::{Result, SessionError};

/// ImageNetの平均
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNetの標準偏差
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 特徴抽出器
pub trait FeatureExtractor: Send + Sync {
    /// ログ表示用の名前
    fn name(&self) -> &str;

    /// 出力ベクトルの長さ D
    fn embedding_dim(&self) -> usize;

    /// 1フレーム分の特徴ベクトルを計算
    fn extract(&self, frame: &RgbImage) -> Result<Vec<f32>>;

    /// 初回推論を済ませておく
    ///
    /// 出力幅が `embedding_dim` と一致しなければ読み込み失敗として扱います。
    fn warm_up(&self) -> Result<()> {
        let blank = RgbImage::new(32, 32);
        let embedding = self.extract(&blank)?;
        if embedding.len() != self.embedding_dim() {
            return Err(SessionError::ExtractorLoad(format!(
                "{}: 出力次元 {} が宣言値 {} と一致しません",
                self.name(),
                embedding.len(),
                self.embedding_dim()
            )));
        }
        info!(extractor = self.name(), dim = embedding.len(), "特徴抽出器の準備が完了しました");
        Ok(())
    }
}

/// フレームを正方形にリサイズしてImageNetの平均と標準偏差で正規化
///
/// # 戻り値
/// - 正規化されたRGB画像データ (C, H, W) の順で平坦化
pub fn normalize_frame(frame: &RgbImage, size: u32) -> Vec<f32> {
    let resized = if frame.width() == size && frame.height() == size {
        frame.clone()
    } else {
        image::imageops::resize(frame, size, size, FilterType::Triangle)
    };

    let mut data = Vec::with_capacity(3 * (size * size) as usize);
    for channel in 0..3 {
        for y in 0..size {
            for x in 0..size {
                let value = resized.get_pixel(x, y)[channel] as f32 / 255.0;
                data.push((value - MEAN[channel]) / STD[channel]);
            }
        }
    }
    data
}

#[cfg(feature = "ml")]
use crate::model::config::{ExtractorKind, ExtractorSettings};
#[cfg(feature = "ml")]
use std::sync::Arc;

/// 設定に従って抽出器を読み込み、ウォームアップまで行う
#[cfg(feature = "ml")]
pub fn load_extractor<B: burn::tensor::backend::Backend>(
    settings: &ExtractorSettings,
    device: &B::Device,
) -> Result<Arc<dyn FeatureExtractor>> {
    let extractor: Arc<dyn FeatureExtractor> = match settings.kind {
        ExtractorKind::Pooled => Arc::new(PooledEmbedder::new(settings.image_size, settings.grid)?),
        ExtractorKind::Conv => {
            let path = settings.weights_path.as_ref().ok_or_else(|| {
                SessionError::ExtractorLoad("conv抽出器の重みファイルが指定されていません".to_string())
            })?;
            Arc::new(crate::ml::ConvEmbedder::<B>::load(
                std::path::Path::new(path),
                settings.image_size,
                device,
            )?)
        }
    };
    extractor.warm_up()?;
    Ok(extractor)
}
