//! Avatar Engine - Rust 实现的化身外观合成引擎
//!
//! 提供虚拟世界客户端中化身外观的核心功能：
//! - 外观描述文档（XML）的解析与序列化
//! - Master/Slave 修饰器的分段线性映射与批量重算
//! - 骨骼修饰器合成（Absolute/Relative/Cumulative 三种混合策略）
//! - Morph 权重应用与附件装配
//! - 附件遮挡的顶点隐藏
//! - 资源依赖解析与外观装配状态机

pub mod applier;
pub mod assets;
pub mod compositor;
pub mod description;
pub mod scene;

pub use applier::{AppearanceState, EcAvatar};
pub use assets::{
    resolve_asset_ref, AssetPayload, AssetStore, AssetType, DependencyTracker, TransferHandle,
};
pub use description::{
    AppearanceModifier, AvatarAttachment, AvatarDescAsset, BoneModifier, BoneModifierMode,
    BoneModifierSet, MasterModifier, MorphModifier, SlaveModifier, Transform,
};
pub use scene::{Bone, IndexBuffer, MeshEntity, MeshResource, Skeleton, SubMesh};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AvatarError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("Invalid avatar description: {0}")]
    Description(String),

    #[error("Asset error: {0}")]
    Asset(String),
}

pub type Result<T> = std::result::Result<T, AvatarError>;
