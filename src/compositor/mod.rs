//! 外观合成的纯函数集
//!
//! 骨骼变换合成与顶点可见性过滤，不持有任何状态

mod bones;
mod visibility;

pub use bones::{apply_bone_modifier, reset_bones};
pub use visibility::hide_vertices;
