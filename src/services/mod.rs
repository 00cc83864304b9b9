pub mod book;
pub mod consistency;
pub mod llm;
pub mod manager;
pub mod quality;
pub mod rate_limit;
