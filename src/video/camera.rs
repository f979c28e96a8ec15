//! GStreamerによるWebカメラ入力

use gstreamer::prelude::*;
use gstreamer::{self as gst, ElementFactory};
use gstreamer_app::AppSink;
use image::RgbImage;
use tracing::{info, warn};

use super::FrameSource;
use crate::error::{Result, SessionError};
use crate::model::CameraSettings;

/// 最初のフレームを待つ時間
const OPEN_TIMEOUT_MS: u64 = 5000;
/// 1フレームの取得を待つ時間
const CAPTURE_TIMEOUT_MS: u64 = 1000;

// stride を含む可能性のあるRGBプレーンから連続したバイト列を作る
fn plane_to_contiguous_rgb(video_info: &gstreamer_video::VideoInfo, src: &[u8]) -> Vec<u8> {
    let width = video_info.width() as usize;
    let height = video_info.height() as usize;
    let stride = video_info
        .stride()
        .first()
        .copied()
        .unwrap_or((width * 3) as i32) as usize;

    if stride == width * 3 && src.len() >= width * 3 * height {
        return src[..width * 3 * height].to_vec();
    }

    let mut out = Vec::with_capacity(width * 3 * height);
    for row in 0..height {
        let start = row * stride;
        let end = start + width * 3;
        if end <= src.len() {
            out.extend_from_slice(&src[start..end]);
        } else if start < src.len() {
            out.extend_from_slice(&src[start..]);
            out.extend(std::iter::repeat(0).take(end - src.len()));
        } else {
            out.extend(std::iter::repeat(0).take(width * 3));
        }
    }
    out
}

fn sample_to_image(sample: &gst::Sample) -> Result<RgbImage> {
    let buffer = sample
        .buffer()
        .ok_or_else(|| SessionError::Capture("バッファがありません".to_string()))?;
    let caps = sample
        .caps()
        .ok_or_else(|| SessionError::Capture("capsがありません".to_string()))?;
    let video_info = gstreamer_video::VideoInfo::from_caps(caps)
        .map_err(|e| SessionError::Capture(format!("映像情報の取得に失敗: {}", e)))?;
    let map = buffer
        .map_readable()
        .map_err(|e| SessionError::Capture(format!("バッファを読めません: {}", e)))?;

    let contiguous = plane_to_contiguous_rgb(&video_info, map.as_slice());
    RgbImage::from_raw(video_info.width(), video_info.height(), contiguous)
        .ok_or_else(|| SessionError::Capture("フレームサイズが不正です".to_string()))
}

/// Webカメラ
///
/// `source -> videoconvert -> videoscale -> appsink(RGB)` のパイプラインを保持し、
/// 破棄時に停止します。
pub struct GstCamera {
    pipeline: gst::Pipeline,
    appsink: AppSink,
    description: String,
}

impl GstCamera {
    /// パイプラインを開始し、最初のフレームが届くまで待つ
    pub fn open(settings: &CameraSettings) -> Result<Self> {
        let unavailable = |context: &str, e: &dyn std::fmt::Display| {
            SessionError::CameraUnavailable(format!("{}: {}", context, e))
        };

        gst::init().map_err(|e| unavailable("GStreamerの初期化に失敗しました", &e))?;

        let source = match &settings.device {
            Some(device) => ElementFactory::make("v4l2src")
                .name("source")
                .property("device", device.as_str())
                .build(),
            None => ElementFactory::make("autovideosrc").name("source").build(),
        }
        .map_err(|e| unavailable("カメラ入力の作成に失敗しました", &e))?;

        let videoconvert = ElementFactory::make("videoconvert")
            .name("converter")
            .build()
            .map_err(|e| unavailable("videoconvertの作成に失敗しました", &e))?;
        let videoscale = ElementFactory::make("videoscale")
            .name("scaler")
            .build()
            .map_err(|e| unavailable("videoscaleの作成に失敗しました", &e))?;

        let appsink = AppSink::builder()
            .name("sink")
            .caps(
                &gst::Caps::builder("video/x-raw")
                    .field("format", "RGB")
                    .field("width", settings.width as i32)
                    .field("height", settings.height as i32)
                    .build(),
            )
            .max_buffers(1)
            .drop(true)
            .sync(false)
            .build();

        let pipeline = gst::Pipeline::new();
        pipeline
            .add_many([
                &source,
                &videoconvert,
                &videoscale,
                appsink.upcast_ref::<gst::Element>(),
            ])
            .map_err(|e| unavailable("エレメントの追加に失敗しました", &e))?;
        gst::Element::link_many([
            &source,
            &videoconvert,
            &videoscale,
            appsink.upcast_ref::<gst::Element>(),
        ])
        .map_err(|e| unavailable("エレメントのリンクに失敗しました", &e))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| unavailable("パイプラインの開始に失敗しました", &e))?;

        let description = match &settings.device {
            Some(device) => format!("カメラ {} ({}x{})", device, settings.width, settings.height),
            None => format!("カメラ 自動選択 ({}x{})", settings.width, settings.height),
        };
        let camera = Self {
            pipeline,
            appsink,
            description,
        };

        // 最初のフレームでメタデータ（解像度）が確定する
        let first = camera
            .appsink
            .try_pull_sample(gst::ClockTime::from_mseconds(OPEN_TIMEOUT_MS))
            .ok_or_else(|| {
                SessionError::CameraUnavailable(
                    "カメラからフレームが届きません。接続と権限を確認してください".to_string(),
                )
            })?;
        let frame = sample_to_image(&first)?;
        info!(
            camera = %camera.description,
            width = frame.width(),
            height = frame.height(),
            "カメラを開始しました"
        );

        Ok(camera)
    }
}

impl FrameSource for GstCamera {
    fn capture(&self) -> Result<RgbImage> {
        let sample = self
            .appsink
            .try_pull_sample(gst::ClockTime::from_mseconds(CAPTURE_TIMEOUT_MS))
            .ok_or_else(|| SessionError::Capture("カメラのフレーム取得がタイムアウトしました".to_string()))?;
        sample_to_image(&sample)
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

impl Drop for GstCamera {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("カメラの停止に失敗しました: {}", e);
        }
    }
}
