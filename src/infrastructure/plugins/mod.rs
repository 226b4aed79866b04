//! Mod loading - package metadata, the built-in catalog and the loader

pub mod loader;
pub mod manifest;
pub mod registry;

pub use loader::{CodeProvider, LoadedMod, ModInitFn, ModLoader, INIT_SYMBOL};
pub use manifest::{PackageAuthor, PackageMetadata, PACKAGE_FILE};
pub use registry::ModCatalog;
