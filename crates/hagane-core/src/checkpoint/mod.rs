pub mod arch;
pub mod loader;
pub mod model;
pub mod tokenizer;
pub mod weights;

pub use arch::{Activation, Architecture, ModelFamily};
pub use loader::{Checkpoint, CheckpointLoader};
pub use model::{EncoderConfig, TokenClassifier};
pub use tokenizer::CheckpointTokenizer;
pub use weights::Weights;
