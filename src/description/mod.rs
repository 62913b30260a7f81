//! 化身外观描述数据模型

mod animation;
mod attachment;
mod default_desc;
mod desc;
mod modifier;
mod xml;

pub use animation::{animation_by_name, AnimationDefinition};
pub use attachment::AvatarAttachment;
pub use default_desc::default_description;
pub use desc::{AvatarDescAsset, ChangeSignal};
pub use modifier::{
    AccumulationMode, AppearanceModifier, BoneModifier, BoneModifierMode, BoneModifierSet,
    MasterModifier, ModifierKind, MorphModifier, SlaveModifier, ValueMapping,
};
pub use xml::{read_avatar_appearance, write_avatar_appearance};

pub(crate) use modifier::clamp01;
pub(crate) use xml::parse_float3;

use glam::{Quat, Vec3};

/// 化身、附件或骨骼的变换三元组
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub orientation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}
