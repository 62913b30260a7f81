//! 骨架与骨骼节点

use std::collections::HashMap;

use glam::{Quat, Vec3};

/// 骨骼节点
///
/// 每根骨骼保存两套本地变换：current（position/orientation/scale）供
/// 动画等运行时修改；initial 是重置或修饰器提交后的稳定基准，
/// Relative/Cumulative 混合都从这里量起
#[derive(Clone, Debug)]
pub struct Bone {
    pub name: String,
    /// 父骨骼索引，-1 表示根骨骼
    pub parent_index: i32,

    // 当前本地变换
    pub position: Vec3,
    pub orientation: Quat,
    pub scale: Vec3,

    // 初始状态
    pub initial_position: Vec3,
    pub initial_orientation: Quat,
    pub initial_scale: Vec3,
}

impl Bone {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent_index: -1,
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            scale: Vec3::ONE,
            initial_position: Vec3::ZERO,
            initial_orientation: Quat::IDENTITY,
            initial_scale: Vec3::ONE,
        }
    }

    /// 以给定绑定姿势创建骨骼，current 与 initial 同步初始化
    pub fn with_bind_pose(
        name: impl Into<String>,
        parent_index: i32,
        position: Vec3,
        orientation: Quat,
        scale: Vec3,
    ) -> Self {
        Self {
            name: name.into(),
            parent_index,
            position,
            orientation,
            scale,
            initial_position: position,
            initial_orientation: orientation,
            initial_scale: scale,
        }
    }

    /// 把当前变换保存为新的初始状态
    pub fn set_initial_state(&mut self) {
        self.initial_position = self.position;
        self.initial_orientation = self.orientation;
        self.initial_scale = self.scale;
    }
}

impl Default for Bone {
    fn default() -> Self {
        Self::new(String::new())
    }
}

/// 骨架
///
/// 资源形态即绑定姿势；实体上的实例是资源的克隆，
/// 修饰器改动不会泄漏到共享同一骨架资源的其他化身
#[derive(Clone, Debug, Default)]
pub struct Skeleton {
    bones: Vec<Bone>,
    name_to_index: HashMap<String, usize>,
}

impl Skeleton {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加骨骼
    pub fn add_bone(&mut self, bone: Bone) {
        let index = self.bones.len();
        self.name_to_index.insert(bone.name.clone(), index);
        self.bones.push(bone);
    }

    /// 通过名称查找骨骼
    pub fn find_bone_by_name(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn has_bone(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    /// 获取骨骼数量
    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    /// 获取骨骼
    pub fn bone(&self, index: usize) -> Option<&Bone> {
        self.bones.get(index)
    }

    /// 获取可变骨骼引用
    pub fn bone_mut(&mut self, index: usize) -> Option<&mut Bone> {
        self.bones.get_mut(index)
    }

    fn parent_of(&self, index: usize) -> Option<usize> {
        let parent = self.bones.get(index)?.parent_index;
        if parent >= 0 && (parent as usize) < self.bones.len() {
            Some(parent as usize)
        } else {
            None
        }
    }

    /// 沿父链组合初始变换，得到骨架空间中的初始派生位置
    ///
    /// 刻意不用当前变换：动画会改动当前值，初始状态才是稳定基准
    pub fn initial_derived_position(&self, index: usize) -> Vec3 {
        let Some(bone) = self.bone(index) else {
            return Vec3::ZERO;
        };
        let mut position = bone.initial_position;
        let mut current = index;
        while let Some(parent_index) = self.parent_of(current) {
            let parent = &self.bones[parent_index];
            position = parent.initial_orientation * (parent.initial_scale * position);
            position += parent.initial_position;
            current = parent_index;
        }
        position
    }

    /// 沿父链组合当前变换，得到骨架空间中的当前派生位置
    pub fn derived_position(&self, index: usize) -> Vec3 {
        let Some(bone) = self.bone(index) else {
            return Vec3::ZERO;
        };
        let mut position = bone.position;
        let mut current = index;
        while let Some(parent_index) = self.parent_of(current) {
            let parent = &self.bones[parent_index];
            position = parent.orientation * (parent.scale * position);
            position += parent.position;
            current = parent_index;
        }
        position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_bone_skeleton() -> Skeleton {
        let mut skeleton = Skeleton::new();
        skeleton.add_bone(Bone::with_bind_pose(
            "Root",
            -1,
            Vec3::new(0.0, 1.0, 0.0),
            Quat::IDENTITY,
            Vec3::ONE,
        ));
        skeleton.add_bone(Bone::with_bind_pose(
            "Spine",
            0,
            Vec3::new(0.0, 0.5, 0.0),
            Quat::IDENTITY,
            Vec3::ONE,
        ));
        skeleton
    }

    #[test]
    fn test_find_bone_by_name() {
        let skeleton = two_bone_skeleton();
        assert_eq!(skeleton.find_bone_by_name("Spine"), Some(1));
        assert!(skeleton.find_bone_by_name("Missing").is_none());
    }

    #[test]
    fn test_initial_derived_position() {
        let skeleton = two_bone_skeleton();
        let derived = skeleton.initial_derived_position(1);
        assert!(derived.abs_diff_eq(Vec3::new(0.0, 1.5, 0.0), 1e-6));
    }

    #[test]
    fn test_derived_position_follows_current() {
        let mut skeleton = two_bone_skeleton();
        // 当前位置被动画压低，初始派生位置不受影响
        skeleton.bone_mut(0).unwrap().position = Vec3::new(0.0, 0.2, 0.0);
        assert!(skeleton
            .derived_position(1)
            .abs_diff_eq(Vec3::new(0.0, 0.7, 0.0), 1e-6));
        assert!(skeleton
            .initial_derived_position(1)
            .abs_diff_eq(Vec3::new(0.0, 1.5, 0.0), 1e-6));
    }

    #[test]
    fn test_scaled_parent_chain() {
        let mut skeleton = Skeleton::new();
        skeleton.add_bone(Bone::with_bind_pose(
            "Root",
            -1,
            Vec3::ZERO,
            Quat::IDENTITY,
            Vec3::splat(2.0),
        ));
        skeleton.add_bone(Bone::with_bind_pose(
            "Child",
            0,
            Vec3::new(0.0, 1.0, 0.0),
            Quat::IDENTITY,
            Vec3::ONE,
        ));
        // 父骨骼缩放参与位置组合
        assert!(skeleton
            .initial_derived_position(1)
            .abs_diff_eq(Vec3::new(0.0, 2.0, 0.0), 1e-6));
    }
}
