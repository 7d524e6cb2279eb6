pub mod display;
pub mod format_utils;
