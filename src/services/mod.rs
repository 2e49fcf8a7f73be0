pub mod book;
pub mod character;
pub mod composer;
pub mod enhancer;
pub mod extractor;
pub mod images;
pub mod llm;
pub mod placeholder;
pub mod scenes;
pub mod settings;
pub mod store;
pub mod workflow;
