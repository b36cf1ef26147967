//! Assertion evaluation and the visual oracles behind screenshot assertions

pub mod engine;
pub mod gemini;
pub mod oracle;

pub use engine::{AssertionEngine, AssertionReport, AssertionResult};
pub use gemini::{GeminiConfig, GeminiOracle};
pub use oracle::{OracleCall, OracleVerdict, ScriptedOracle, ScriptedReply, VisualOracle};
