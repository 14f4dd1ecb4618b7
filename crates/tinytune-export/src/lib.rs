//! tinytune export
//!
//! Converts a merged fine-tuned model directory to GGUF with llama.cpp: an F16
//! conversion, then an optional quantization pass when a quantizer binary is
//! available.

pub mod error;
pub mod pipeline;
pub mod quantization;
pub mod tools;

pub use error::{ExportError, ExportResult};
pub use pipeline::{f16_temp_path, ExportArtifact, ExportPipeline, ExportRequest, ExportState};
pub use quantization::QuantizationLevel;
pub use tools::{ExportTools, QUANTIZER_CANDIDATES};
