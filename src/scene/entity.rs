//! 化身网格实体
//!
//! 实体级的网格/骨架绑定、材质、Morph 权重与附件。
//! 对应场景图中挂在可放置节点下的网格组件

use std::collections::HashMap;
use std::rc::Rc;

use glam::{Quat, Vec3};

use super::{MeshResource, Skeleton};

/// Morph 权重上限
///
/// 不允许到达 1.0，否则姿势动画会回绕到起点
pub const MAX_MORPH_WEIGHT: f32 = 0.99995;

fn clamp_morph_weight(weight: f32) -> f32 {
    // NaN 经 max 归零
    weight.max(0.0).min(MAX_MORPH_WEIGHT)
}

/// 实体上的网格绑定实例
#[derive(Clone, Debug)]
pub struct MeshInstance {
    /// 共享的基础网格资源
    pub resource: Rc<MeshResource>,
    /// 顶点隐藏专用的私有克隆
    pub cloned: Option<MeshResource>,
    /// 实体私有的骨架实例
    pub skeleton: Option<Skeleton>,
    /// 按子网格索引的材质引用
    materials: Vec<String>,
    /// 已启用的 Morph 权重
    morph_weights: HashMap<String, f32>,
}

impl MeshInstance {
    fn new(resource: Rc<MeshResource>, skeleton_asset: Option<&Rc<Skeleton>>, clone: bool) -> Self {
        let cloned = if clone {
            Some((*resource).clone())
        } else {
            None
        };
        // 骨架实例始终按实体克隆，修饰器不跨化身泄漏
        let skeleton = skeleton_asset
            .or(resource.skeleton.as_ref())
            .map(|s| (**s).clone());
        let materials = vec![String::new(); resource.submesh_count()];
        Self {
            resource,
            cloned,
            skeleton,
            materials,
            morph_weights: HashMap::new(),
        }
    }

    /// 当前生效的网格数据（有克隆时为克隆）
    pub fn active_mesh(&self) -> &MeshResource {
        self.cloned.as_ref().unwrap_or(&self.resource)
    }

    /// 指定 Morph 的当前权重，未启用为 0
    pub fn morph_weight(&self, name: &str) -> f32 {
        self.morph_weights.get(name).copied().unwrap_or(0.0)
    }
}

/// 实体上的附件实例
#[derive(Clone, Debug, Default)]
pub struct AttachmentInstance {
    pub resource: Option<Rc<MeshResource>>,
    /// 挂接骨骼，空表示挂到实体节点
    pub bone_name: String,
    pub link_skeleton: bool,
    materials: Vec<String>,
    pub position: Vec3,
    pub orientation: Quat,
    pub scale: Vec3,
    morph_weights: HashMap<String, f32>,
}

impl AttachmentInstance {
    pub fn morph_weight(&self, name: &str) -> f32 {
        self.morph_weights.get(name).copied().unwrap_or(0.0)
    }

    pub fn material(&self, submesh: usize) -> Option<&str> {
        self.materials.get(submesh).map(String::as_str)
    }
}

/// 化身网格实体
#[derive(Clone, Debug, Default)]
pub struct MeshEntity {
    mesh: Option<MeshInstance>,
    attachments: Vec<AttachmentInstance>,
    adjust_position: Vec3,
    adjust_orientation: Quat,
    cast_shadows: bool,
}

impl MeshEntity {
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定网格；`clone` 为 true 时使用私有克隆
    pub fn set_mesh(&mut self, resource: Rc<MeshResource>, clone: bool) {
        self.mesh = Some(MeshInstance::new(resource, None, clone));
    }

    /// 绑定网格并指定骨架资源
    pub fn set_mesh_with_skeleton(
        &mut self,
        resource: Rc<MeshResource>,
        skeleton: &Rc<Skeleton>,
        clone: bool,
    ) {
        self.mesh = Some(MeshInstance::new(resource, Some(skeleton), clone));
    }

    pub fn has_mesh(&self) -> bool {
        self.mesh.is_some()
    }

    pub fn mesh(&self) -> Option<&MeshInstance> {
        self.mesh.as_ref()
    }

    /// 私有克隆网格的可变引用（顶点隐藏只能在克隆上执行）
    pub fn cloned_mesh_mut(&mut self) -> Option<&mut MeshResource> {
        self.mesh.as_mut()?.cloned.as_mut()
    }

    /// 骨架实例
    pub fn skeleton(&self) -> Option<&Skeleton> {
        self.mesh.as_ref()?.skeleton.as_ref()
    }

    pub fn skeleton_mut(&mut self) -> Option<&mut Skeleton> {
        self.mesh.as_mut()?.skeleton.as_mut()
    }

    /// 同时取得骨架实例与原始（绑定姿势）骨架
    pub fn skeleton_pair_mut(&mut self) -> Option<(&mut Skeleton, Rc<Skeleton>)> {
        let mesh = self.mesh.as_mut()?;
        let original = mesh.resource.skeleton.clone()?;
        let instance = mesh.skeleton.as_mut()?;
        Some((instance, original))
    }

    /// 设置指定子网格的材质
    pub fn set_material(&mut self, index: usize, material: &str) {
        let Some(mesh) = self.mesh.as_mut() else {
            return;
        };
        if index < mesh.materials.len() {
            mesh.materials[index] = material.to_string();
        } else {
            log::warn!(
                "Material index {} out of bounds for mesh {} ({} submeshes)",
                index,
                mesh.resource.name,
                mesh.materials.len()
            );
        }
    }

    pub fn material(&self, index: usize) -> Option<&str> {
        self.mesh.as_ref()?.materials.get(index).map(String::as_str)
    }

    /// 设置 Morph 权重
    ///
    /// 网格未声明该 Morph 时忽略；权重 0 视为停用
    pub fn set_morph_weight(&mut self, name: &str, weight: f32) {
        let Some(mesh) = self.mesh.as_mut() else {
            return;
        };
        if !mesh.resource.has_morph(name) {
            return;
        }
        let weight = clamp_morph_weight(weight);
        if weight > 0.0 {
            mesh.morph_weights.insert(name.to_string(), weight);
        } else {
            mesh.morph_weights.remove(name);
        }
    }

    pub fn morph_weight(&self, name: &str) -> f32 {
        self.mesh.as_ref().map_or(0.0, |m| m.morph_weight(name))
    }

    // ========== 附件 ==========

    /// 移除全部附件
    pub fn remove_all_attachments(&mut self) {
        self.attachments.clear();
    }

    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    pub fn attachment(&self, index: usize) -> Option<&AttachmentInstance> {
        self.attachments.get(index)
    }

    fn attachment_slot(&mut self, index: usize) -> &mut AttachmentInstance {
        if index >= self.attachments.len() {
            self.attachments
                .resize_with(index + 1, AttachmentInstance::default);
        }
        &mut self.attachments[index]
    }

    /// 在指定挂点绑定附件网格
    pub fn set_attachment_mesh(
        &mut self,
        index: usize,
        resource: Rc<MeshResource>,
        bone_name: &str,
        link_skeleton: bool,
    ) {
        let mut bone_name = bone_name.to_string();
        if !bone_name.is_empty() {
            let known = self
                .skeleton()
                .map_or(false, |skeleton| skeleton.has_bone(&bone_name));
            if !known {
                log::warn!(
                    "Attachment bone {} not found in avatar skeleton, attaching to entity node",
                    bone_name
                );
                bone_name.clear();
            }
        }

        let slot = self.attachment_slot(index);
        slot.materials = vec![String::new(); resource.submesh_count()];
        slot.resource = Some(resource);
        slot.bone_name = bone_name;
        slot.link_skeleton = link_skeleton;
        slot.position = Vec3::ZERO;
        slot.orientation = Quat::IDENTITY;
        slot.scale = Vec3::ONE;
        slot.morph_weights.clear();
    }

    /// 设置附件子网格材质
    pub fn set_attachment_material(&mut self, index: usize, submesh: usize, material: &str) {
        let Some(attachment) = self.attachments.get_mut(index) else {
            return;
        };
        if submesh < attachment.materials.len() {
            attachment.materials[submesh] = material.to_string();
        } else {
            log::warn!(
                "Attachment material index {} out of bounds ({} submeshes)",
                submesh,
                attachment.materials.len()
            );
        }
    }

    pub fn set_attachment_position(&mut self, index: usize, position: Vec3) {
        if let Some(attachment) = self.attachments.get_mut(index) {
            attachment.position = position;
        }
    }

    pub fn set_attachment_orientation(&mut self, index: usize, orientation: Quat) {
        if let Some(attachment) = self.attachments.get_mut(index) {
            attachment.orientation = orientation;
        }
    }

    pub fn set_attachment_scale(&mut self, index: usize, scale: Vec3) {
        if let Some(attachment) = self.attachments.get_mut(index) {
            attachment.scale = scale;
        }
    }

    /// 设置附件上的同名 Morph 权重
    pub fn set_attachment_morph_weight(&mut self, index: usize, name: &str, weight: f32) {
        let Some(attachment) = self.attachments.get_mut(index) else {
            return;
        };
        let Some(resource) = attachment.resource.as_ref() else {
            return;
        };
        if !resource.has_morph(name) {
            return;
        }
        let weight = clamp_morph_weight(weight);
        if weight > 0.0 {
            attachment.morph_weights.insert(name.to_string(), weight);
        } else {
            attachment.morph_weights.remove(name);
        }
    }

    // ========== 实体级调整 ==========

    pub fn set_adjust_position(&mut self, position: Vec3) {
        self.adjust_position = position;
    }

    pub fn adjust_position(&self) -> Vec3 {
        self.adjust_position
    }

    pub fn set_adjust_orientation(&mut self, orientation: Quat) {
        self.adjust_orientation = orientation;
    }

    pub fn adjust_orientation(&self) -> Quat {
        self.adjust_orientation
    }

    pub fn set_cast_shadows(&mut self, cast_shadows: bool) {
        self.cast_shadows = cast_shadows;
    }

    pub fn cast_shadows(&self) -> bool {
        self.cast_shadows
    }
}
