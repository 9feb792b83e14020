//! Chat-completion providers used to answer questions.

pub mod openai_chat;

pub use openai_chat::{ChatCompletion, ChatMessage, InferenceError, OpenAiChatClient, build_messages};
