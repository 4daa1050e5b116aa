//! Model backends.

pub mod openai_compat;

pub use openai_compat::{DEFAULT_OPENAI_BASE_URL, Message, OpenAiCompatFactory, OpenAiCompatSession};
