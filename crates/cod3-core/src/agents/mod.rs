//! Agent backends and the event model they share.
//!
//! Both backends normalize their wire traffic into [`event::StreamEvent`]s:
//! - [`acp`]: external agent over JSON-RPC on stdio
//! - [`koog`]: completion stream carrying a line protocol
//!
//! Tool calls from either side are merged by id in
//! [`accumulator::ToolCallAccumulator`], and every prompt runs as a turn
//! ([`turn`]).

pub mod accumulator;
pub mod acp;
pub mod event;
pub mod koog;
pub mod line_buffer;
pub mod turn;
