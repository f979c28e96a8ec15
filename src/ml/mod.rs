pub mod classifier;
pub mod embedder;
pub mod training;

pub use classifier::{ClassifierConfig, ClassifierHead, TrainedClassifier, HIDDEN_UNITS};
pub use embedder::{ConvEmbedder, ConvTrunk, ConvTrunkConfig, EMBEDDING_DIM};
pub use training::{fit_classifier, EpochReport, Hyperparameters, SampleBatcher, SampleDataset, TrainingSummary};
