pub mod board;
pub mod funnels;
