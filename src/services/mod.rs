pub mod cache;
pub mod cleanup;
pub mod imaging;
pub mod lifecycle;

pub use cache::{ImageCache, ImageVariant, StoreImageFetcher};
pub use cleanup::CleanupCoordinator;
pub use lifecycle::{PhotoLifecycleEngine, PurgeReport, SoftDeleteReport};
