pub mod board_service;
pub mod effects;
pub mod funnel_service;
pub mod move_gate;
