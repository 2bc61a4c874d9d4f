pub mod build;
pub mod format;
pub mod inspect;
pub mod manifest;
pub mod path_safety;

pub use build::{build, build_with_options, default_output_path, BuildError, BuildOptions, BuildReport};
pub use manifest::{parse, AssetEntry, AssetManifest, ManifestError};
