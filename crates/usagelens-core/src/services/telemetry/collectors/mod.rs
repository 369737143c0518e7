//! Built-in telemetry collectors

pub mod claude_code;

pub use claude_code::ClaudeCodeCollector;
