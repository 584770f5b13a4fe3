//! Memory implementations for Tandem.
//!
//! - [`StaticMemory`]: unlimited retention
//! - [`ForgetfulMemory`]: starts over on every user turn
//! - [`FileMemory`]: mirrors every append to a JSONL file (and optionally a
//!   plain-text transcript) before delegating to an inner memory

pub mod file;
pub mod forgetful;
pub mod static_memory;
pub mod transcript;

pub use file::{FileMemory, load_file};
pub use forgetful::ForgetfulMemory;
pub use static_memory::StaticMemory;
pub use transcript::{render_transcript, transcript_line};
