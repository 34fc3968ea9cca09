// Example states built on the engine, registered as builtin plugins

pub mod fibonacci;
pub mod sequential;

pub use fibonacci::CalculateFibonacciSeries;
pub use sequential::CalculateTwoFibonacciSeriesSequentially;
