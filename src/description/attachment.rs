//! 化身附件定义

use super::Transform;

/// 化身附件
#[derive(Clone, Debug, Default)]
pub struct AvatarAttachment {
    /// 附件名称
    pub name: String,
    /// 附件网格资源引用
    pub mesh: String,
    /// 是否链接化身骨架（用于动画跟随）
    pub link_skeleton: bool,
    /// 附件网格使用的材质，按子网格顺序
    pub materials: Vec<String>,
    /// 相对挂点的变换
    pub transform: Transform,
    /// 附件分类
    pub category: String,
    /// 挂接骨骼名称。为空表示直接挂到化身场景节点
    pub bone_name: String,
    /// 使用该附件时需要在化身基础网格上隐藏的顶点索引
    pub vertices_to_hide: Vec<u32>,
}
