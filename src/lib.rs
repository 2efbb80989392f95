// Export modules for use in tests
pub mod export;
pub mod panic_handler;
pub mod settings;
pub mod sheet;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export the rendering entry points
pub use sheet::{
    DispatchConfig, Dispatcher, OutputDocument, Progress, RaffleDetails, RenderError,
    StatusMessage,
};
