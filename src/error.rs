//! セッション操作のエラー定義
//!
//! 収集・学習・推論・エクスポートの各操作境界で発生するエラーを1つの列挙型に
//! まとめています。UIにはメッセージをそのまま通知します。

/// セッション操作のエラー
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// カメラの権限が拒否された、またはデバイスが存在しない
    #[error("カメラを利用できません: {0}")]
    CameraUnavailable(String),

    /// カメラがまだ接続されていない
    #[error("カメラが接続されていません")]
    CameraNotReady,

    /// 特徴抽出器の読み込みに失敗（セッション全体で致命的）
    #[error("特徴抽出器の読み込みに失敗しました: {0}")]
    ExtractorLoad(String),

    #[error("学習には2つ以上のクラスが必要です (現在: {found})")]
    InsufficientClasses { found: usize },

    #[error("学習データがありません")]
    NoData,

    /// 埋め込みベクトルの次元がデータセットと一致しない
    #[error("特徴ベクトルの次元が一致しません: 期待 {expected}, 実際 {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("クラスID {id} は範囲外です (クラス数: {len})")]
    UnknownClass { id: usize, len: usize },

    #[error("学習済みモデルがありません")]
    NotTrained,

    #[error("学習パラメータが不正です: {0}")]
    InvalidHyperparameters(String),

    /// 学習エンジン内部のエラー
    #[error("学習に失敗しました: {0}")]
    Training(String),

    /// 1サンプルの取得に失敗（収集セッションのみ中断）
    #[error("フレームの取得に失敗しました: {0}")]
    Capture(String),

    #[error("エクスポートに失敗しました: {0}")]
    Export(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSONエラー: {0}")]
    Json(#[from] serde_json::Error),
}

impl SessionError {
    /// セッション全体を使用不能にするエラーかどうか
    ///
    /// 特徴抽出器の読み込み失敗のみが致命的で、それ以外は操作単位で回復します。
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::ExtractorLoad(_))
    }
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
