//! Model handling: classifier backends, loading and the shared handle

pub mod classifier;
pub mod forest;
pub mod handle;
pub mod loader;
#[cfg(feature = "onnx")]
pub mod onnx;

pub use classifier::{Classifier, ModelSchema};
pub use forest::RandomForest;
pub use handle::ModelHandle;
pub use loader::{LoadedModel, ModelLoader};
