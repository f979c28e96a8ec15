//! セッション状態
//!
//! クラス一覧・サンプル・学習済み分類器を1つのオブジェクトにまとめます。
//! セッション開始時に作成され、リセットで空に戻ります。

pub mod registry;
#[cfg(feature = "ml")]
pub mod store;

pub use registry::{ClassLabel, ClassRegistry};
#[cfg(feature = "ml")]
pub use store::{SampleSnapshot, SampleStore};

#[cfg(feature = "ml")]
use burn::tensor::backend::Backend;
#[cfg(feature = "ml")]
use tracing::info;

#[cfg(feature = "ml")]
use crate::error::{Result, SessionError};
#[cfg(feature = "ml")]
use crate::ml::TrainedClassifier;
#[cfg(feature = "ml")]
use crate::prediction::Prediction;
#[cfg(feature = "ml")]
use crate::resources::ResourceLedger;
#[cfg(feature = "ml")]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "ml")]
use std::sync::{Mutex, MutexGuard, PoisonError};

/// 学習に渡すデータ一式
#[cfg(feature = "ml")]
#[derive(Debug, Clone)]
pub struct TrainingInput {
    pub snapshot: SampleSnapshot,
    pub class_names: Vec<String>,
    /// スナップショット取得時の世代。リセットを挟んだ結果は破棄する
    pub generation: u64,
}

/// セッション
#[cfg(feature = "ml")]
pub struct Session<B: Backend> {
    registry: ClassRegistry,
    store: SampleStore<B>,
    classifier: Option<TrainedClassifier<B>>,
    /// 学習時点のクラス名（出力ユニットの並び）
    trained_classes: Vec<String>,
    ledger: ResourceLedger,
    device: B::Device,
    generation: u64,
}

#[cfg(feature = "ml")]
impl<B: Backend> Session<B> {
    pub fn new(device: B::Device) -> Self {
        Self::with_ledger(device, ResourceLedger::new())
    }

    pub fn with_ledger(device: B::Device, ledger: ResourceLedger) -> Self {
        Self {
            registry: ClassRegistry::new(),
            store: SampleStore::new(device.clone(), ledger.clone()),
            classifier: None,
            trained_classes: Vec::new(),
            ledger,
            device,
            generation: 0,
        }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn store(&self) -> &SampleStore<B> {
        &self.store
    }

    pub fn classifier(&self) -> Option<&TrainedClassifier<B>> {
        self.classifier.as_ref()
    }

    pub fn trained_classes(&self) -> &[String] {
        &self.trained_classes
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// クラスを追加（空白のみの名前は無視）
    pub fn add_class(&mut self, name: &str) -> Option<usize> {
        let id = self.registry.add_class(name)?;
        info!(id, name = name.trim(), "クラスを追加しました");
        Some(id)
    }

    pub fn is_ready(&self) -> bool {
        self.registry.is_ready()
    }

    /// サンプルを追加して、そのクラスの新しいサンプル数を返す
    pub fn append_sample(&mut self, class_id: usize, feature: &[f32]) -> Result<usize> {
        self.registry.ensure_valid(class_id)?;
        self.store.append(class_id, feature)?;
        self.registry.record_sample(class_id)
    }

    /// 学習の前提条件を確認してデータを取り出す
    pub fn training_input(&self) -> Result<TrainingInput> {
        if self.registry.len() < 2 {
            return Err(SessionError::InsufficientClasses {
                found: self.registry.len(),
            });
        }
        if self.store.is_empty() {
            return Err(SessionError::NoData);
        }

        Ok(TrainingInput {
            snapshot: self.store.snapshot(self.registry.len())?,
            class_names: self.registry.names(),
            generation: self.generation,
        })
    }

    /// 学習済み分類器を差し替える
    ///
    /// 古い分類器はここで解放されます。`generation` が現在の世代と異なる場合
    /// （学習中にリセットされた場合）は何もせず `false` を返します。
    pub fn install_classifier(
        &mut self,
        classifier: TrainedClassifier<B>,
        class_names: Vec<String>,
        generation: u64,
    ) -> bool {
        if generation != self.generation {
            return false;
        }
        self.classifier = Some(classifier);
        self.trained_classes = class_names;
        true
    }

    /// 特徴ベクトル1件を分類
    pub fn predict(&self, feature: &[f32]) -> Result<Prediction> {
        let classifier = self.classifier.as_ref().ok_or(SessionError::NotTrained)?;
        let probabilities = classifier.predict(feature)?;
        Ok(Prediction::new(probabilities, &self.trained_classes))
    }

    /// 全状態を破棄して空に戻す
    pub fn reset(&mut self) {
        self.classifier = None;
        self.trained_classes.clear();
        self.store.clear();
        self.registry.clear();
        self.generation += 1;
        info!(generation = self.generation, "セッションをリセットしました");
    }
}

/// コントローラ間で共有するセッション
///
/// ロックは同期処理の間だけ保持し、awaitをまたいで保持しません。
#[cfg(feature = "ml")]
pub struct SessionState<B: Backend> {
    session: Mutex<Session<B>>,
    training: AtomicBool,
}

#[cfg(feature = "ml")]
impl<B: Backend> SessionState<B> {
    pub fn new(session: Session<B>) -> Self {
        Self {
            session: Mutex::new(session),
            training: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Session<B>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_training(&self) -> bool {
        self.training.load(Ordering::SeqCst)
    }

    /// 学習中フラグを立てる。既に立っていれば `None`
    pub fn begin_training(&self) -> Option<TrainingFlag<'_>> {
        self.training
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| TrainingFlag { flag: &self.training })
    }
}

/// 破棄時に学習中フラグを下ろす
#[cfg(feature = "ml")]
pub struct TrainingFlag<'a> {
    flag: &'a AtomicBool,
}

#[cfg(feature = "ml")]
impl Drop for TrainingFlag<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(all(test, feature = "ml"))]
mod tests {
    use super::*;
    use crate::ml::ClassifierConfig;
    use crate::resources::ResourceKind;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn classifier(session: &Session<TestBackend>, dim: usize, classes: usize) -> TrainedClassifier<TestBackend> {
        let model = ClassifierConfig::new(dim, classes).init::<TestBackend>(session.device());
        TrainedClassifier::new(
            session.ledger().track(ResourceKind::Classifier, model),
            session.device().clone(),
            dim,
            classes,
        )
    }

    #[test]
    fn sample_counts_track_dataset_rows() {
        let mut session = Session::<TestBackend>::new(Default::default());
        session.add_class("cat");
        session.add_class("dog");

        let ids = [0, 1, 1, 0, 1];
        for (i, id) in ids.iter().enumerate() {
            session.append_sample(*id, &[i as f32, 1.0]).unwrap();
        }

        assert_eq!(session.registry().total_samples(), ids.len());
        assert_eq!(session.store().len(), ids.len());
        assert_eq!(session.registry().get(1).unwrap().sample_count, 3);
        assert!(session.is_ready());
    }

    #[test]
    fn append_to_unknown_class_leaves_state_untouched() {
        let mut session = Session::<TestBackend>::new(Default::default());
        session.add_class("only");
        assert!(matches!(
            session.append_sample(2, &[1.0]),
            Err(SessionError::UnknownClass { id: 2, len: 1 })
        ));
        assert!(session.store().is_empty());
        assert_eq!(session.registry().total_samples(), 0);
    }

    #[test]
    fn training_input_checks_classes_then_data() {
        let mut session = Session::<TestBackend>::new(Default::default());
        assert!(matches!(
            session.training_input(),
            Err(SessionError::InsufficientClasses { found: 0 })
        ));

        session.add_class("a");
        session.add_class("b");
        assert!(matches!(session.training_input(), Err(SessionError::NoData)));

        session.append_sample(0, &[1.0, 0.0]).unwrap();
        let input = session.training_input().unwrap();
        assert_eq!(input.snapshot.num_classes, 2);
        assert_eq!(input.class_names, vec!["a", "b"]);
    }

    #[test]
    fn stale_generation_is_not_installed() {
        let mut session = Session::<TestBackend>::new(Default::default());
        let stale = session.generation();
        session.reset();

        let replacement = classifier(&session, 2, 2);
        assert!(!session.install_classifier(replacement, vec!["a".into(), "b".into()], stale));
        assert!(session.classifier().is_none());
        assert_eq!(session.ledger().live(ResourceKind::Classifier), 0);
    }

    #[test]
    fn reset_releases_everything_and_restarts_ids() {
        let mut session = Session::<TestBackend>::new(Default::default());
        session.add_class("a");
        session.add_class("b");
        session.append_sample(0, &[1.0, 2.0]).unwrap();
        let trained = classifier(&session, 2, 2);
        let generation = session.generation();
        assert!(session.install_classifier(trained, session.registry().names(), generation));
        assert_eq!(session.predict(&[1.0, 2.0]).unwrap().entries.len(), 2);

        session.reset();
        assert!(matches!(session.predict(&[1.0, 2.0]), Err(SessionError::NotTrained)));
        assert!(session.registry().is_empty());
        assert!(session.store().is_empty());
        assert!(session.classifier().is_none());
        assert!(!session.is_ready());
        assert_eq!(session.ledger().total_live(), 0);
        assert_eq!(session.add_class("again"), Some(0));
    }

    #[test]
    fn training_flag_is_exclusive_and_released_on_drop() {
        let state = SessionState::new(Session::<TestBackend>::new(Default::default()));
        let flag = state.begin_training().unwrap();
        assert!(state.is_training());
        assert!(state.begin_training().is_none());
        drop(flag);
        assert!(!state.is_training());
    }
}
