//! Pipeline stages for merging and recompressing PDFs.
//!
//! Each submodule implements exactly one transformation step.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ archive ──▶ merge ──▶ recompress
//! (parts)   (ZIP→PDFs)  (lopdf)   (tier ladder)
//!                          │           │
//!                      transform    images ──▶ encode
//!                       (repair)   (walker)    (JPEG)
//! ```
//!
//! 1. [`input`]: load paths/URLs and classify each part as PDF or ZIP
//! 2. [`archive`]: extract PDF members in natural name order
//! 3. [`merge`]: concatenate pages into one object graph; malformed inputs go
//!    through [`transform`] once
//! 4. [`recompress`]: walk the tier ladder until the byte budget is met;
//!    [`images`] finds and rewrites image XObjects through an
//!    [`encode::ImageCodec`] on the blocking pool

pub mod archive;
pub mod encode;
pub mod images;
pub mod input;
pub mod merge;
pub mod recompress;
pub mod transform;
