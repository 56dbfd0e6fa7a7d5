//! Session management for GG-EDGE.
//!
//! Handles model path validation, session construction and the handle
//! registries the runtime resolves caller handles through.

mod loader;
mod registry;
mod session;

pub use loader::{validate_model_path, ModelMetadata, ModelPath, GGUF_MAGIC};
pub use registry::{SessionHandle, SessionRegistry};
pub use session::{
    resolve_threads, EmbeddingSession, EmbeddingSessionInfo, InferenceSession, SessionInfo,
    SessionOptions,
};
