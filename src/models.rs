pub mod board;
pub mod pipeline;
