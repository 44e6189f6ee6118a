pub mod detector;
pub mod filter;
pub mod observer;
pub mod traits;
pub mod types;

pub use detector::HttpElementDetector;
pub use observer::DesktopObserver;
pub use traits::{ElementDetector, ScreenObserver};
pub use types::{ElementKind, Screenshot, UIElement};
