/// Recipient model and the component directory
pub mod directory;

/// Backing stores for recipient configuration
pub mod store;

pub use directory::{normalize_component, Recipient, RecipientDirectory};
pub use store::{JsonRecipientStore, MemoryRecipientStore, RecipientStore};
