//! Pipeline stages for vision-attack evaluation.
//!
//! ## Data Flow
//!
//! ```text
//! sources ──▶ encode ──▶ vision ──▶ cases ──▶ judge
//! (manifest)  (base64)   (VLM)     (ordered)  (LLM-as-judge)
//! ```
//!
//! 1. [`sources`] lists labeled images from the PDF manifest or a word list
//! 2. [`encode`] decodes each image and re-wraps it as a base64 PNG
//! 3. [`vision`] queries the model under test; failures become `"ERROR"`
//! 4. [`cases`] pairs each answer with its ground truth, in source order
//! 5. [`judge`] scores every case and isolates judge failures per case

pub mod cases;
pub mod encode;
pub mod judge;
pub mod sources;
pub mod vision;
