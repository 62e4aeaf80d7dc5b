//! AddonForge Core - Add-On Compiler
//!
//! # The Six Laws (Non-Negotiable)
//! 1. Generator Output Is Untrusted
//! 2. The Owned Namespace Is Enforced, The Reserved One Is Untouched
//! 3. Pack Identity Never Changes Once Issued
//! 4. Versions Advance By Exactly One Patch Per Build
//! 5. The Behavior Pack Always Depends On The Current Resource Pack
//! 6. A Build Fully Succeeds Or Leaves No Trace

pub mod config;
pub mod identifier;
pub mod buildlog;
pub mod stores;
pub mod normalize;
pub mod generator;
pub mod manifest;
pub mod packager;
pub mod hashing;
pub mod pipeline;

pub use config::{ForgeConfig, ConfigError, CorruptStatePolicy, MenuCategoryPolicy};
pub use identifier::{Identifier, NamespaceRewriter};
pub use buildlog::{BuildLog, BuildEvent, EventLevel};
pub use stores::{ContentStores, TextureAtlas, TranslationTable};
pub use normalize::{ContentDescriptor, Normalized, NormalizedContent, Normalizer, SideEffect};
pub use generator::{Generator, ResponseFileGenerator, parse_response};
pub use manifest::{ManifestManager, PackManifest, PackVersion, PackKind};
pub use packager::{Packager, PackagedArchive, archive_file_name};
pub use pipeline::{BuildPipeline, BuildReport, RepairReport, PipelineError};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
