pub mod depth;
pub mod engine;
