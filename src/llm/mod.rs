pub mod client;
pub mod context;
pub mod dual_stream;
pub mod prompts;

pub use client::*;
pub use context::*;
pub use dual_stream::*;
pub use prompts::*;
