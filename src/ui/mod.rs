//! Presentation surfaces. Both are plain view models driven only by bus
//! events, so a front end renders whatever state they hold.

pub mod inline;
pub mod panel;
pub mod render;
