//! 场景图原语
//!
//! 渲染器本体在引擎之外；这里只提供外观合成所需的最小能力：
//! 骨架与骨骼变换、网格资源与子网格索引缓冲、实体级的网格绑定

mod entity;
mod mesh;
mod skeleton;

pub use entity::{AttachmentInstance, MeshEntity, MeshInstance, MAX_MORPH_WEIGHT};
pub use mesh::{IndexBuffer, MeshResource, SubMesh};
pub use skeleton::{Bone, Skeleton};
