#![allow(irrefutable_let_patterns, clippy::new_without_default)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications,
    // We don't match on a reference, unless required.
    clippy::pattern_type_mismatch,
)]

mod cache;
mod context;
mod mesh;
pub mod primitives;
pub mod static_object;
pub mod util;

pub use cache::{
    ListenerId, LoadedMeshFlags, LoadingCallback, MeshCache, MeshIdentifier, MeshLoadFlags,
    MeshState, Published, RenderMeshListener, StaticMeshFlags, StaticMeshInfo,
    StaticMeshListener, DEFAULT_MAX_MESHES,
};
pub use context::RenderContext;
pub use mesh::{dummy_object, submit_upload, MeshAddresses, RenderMesh};
pub use primitives::ProceduralMeshes;
pub use static_object::{BoundingBox, ColorSlots, StaticObject, StaticObjectFlags};
