// Technical indicators module

pub mod moving_average;

pub use moving_average::ema_series;
