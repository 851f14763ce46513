pub mod chunk;
pub mod history;
pub mod llm;
pub mod qa;
pub mod relay;
pub mod route;
pub mod splitter;
pub mod store;

pub use history::ChatHistory;
pub use route::{AnswerMode, Route};
