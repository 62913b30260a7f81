//! 骨骼变换合成
//!
//! 先把骨架实例重置回原始绑定姿势，再按声明顺序应用骨骼修饰器。
//! Cumulative 策略依赖应用顺序，顺序必须保持

use glam::{EulerRot, Quat, Vec3};

use crate::description::{clamp01, BoneModifier, BoneModifierMode};
use crate::scene::Skeleton;

/// 把骨架实例重置回原始骨架的绑定姿势
///
/// 每根骨骼复制原始位置/朝向/缩放后提交为新的初始状态，
/// 后续 Relative/Cumulative 混合从这个基准量起。
/// 骨骼数不一致说明骨架不匹配，整体跳过
pub fn reset_bones(skeleton: &mut Skeleton, original: &Skeleton) {
    if skeleton.bone_count() != original.bone_count() {
        log::warn!(
            "Skeleton bone count mismatch: instance {} vs original {}, skipping bone reset",
            skeleton.bone_count(),
            original.bone_count()
        );
        return;
    }

    for index in 0..original.bone_count() {
        let Some(orig) = original.bone(index) else {
            continue;
        };
        let (position, orientation, scale) = (
            orig.initial_position,
            orig.initial_orientation,
            orig.initial_scale,
        );
        if let Some(bone) = skeleton.bone_mut(index) {
            bone.position = position;
            bone.orientation = orientation;
            bone.scale = scale;
            bone.set_initial_state();
        }
    }
}

/// 按给定强度应用单个骨骼修饰器
///
/// 三个通道独立混合：
/// - 旋转：按 XYZ 欧拉角逐轴混合，基准由 orientation_mode 决定
/// - 平移：Relative 基准为原始绑定位置，Absolute/Cumulative 为零
/// - 缩放：始终在当前初始缩放上混合，中性值为 1
///
/// 某轴的 start 与 end 都是中性值时不碰该轴，保留此前修饰器的结果。
/// 计算完成后提交为骨骼的新初始状态，供后续 Cumulative 修饰器叠加。
/// 骨骼在任一骨架中缺失时静默跳过
pub fn apply_bone_modifier(
    skeleton: &mut Skeleton,
    original: &Skeleton,
    modifier: &BoneModifier,
    value: f32,
) {
    let (Some(index), Some(orig_index)) = (
        skeleton.find_bone_by_name(&modifier.bone_name),
        original.find_bone_by_name(&modifier.bone_name),
    ) else {
        // 骨骼未找到，无事可做
        return;
    };
    let Some(orig_bone) = original.bone(orig_index) else {
        return;
    };
    let (init_position, init_orientation, init_scale) = match skeleton.bone(index) {
        Some(bone) => (
            bone.initial_position,
            bone.initial_orientation,
            bone.initial_scale,
        ),
        None => return,
    };

    let value = clamp01(value);

    // 旋转
    let (sx, sy, sz) = modifier.start.orientation.to_euler(EulerRot::XYZ);
    let (ex, ey, ez) = modifier.end.orientation.to_euler(EulerRot::XYZ);
    let (mut rx, mut ry, mut rz) = init_orientation.to_euler(EulerRot::XYZ);
    let (bx, by, bz) = match modifier.orientation_mode {
        BoneModifierMode::Absolute => (0.0, 0.0, 0.0),
        BoneModifierMode::Relative => orig_bone.initial_orientation.to_euler(EulerRot::XYZ),
        BoneModifierMode::Cumulative => init_orientation.to_euler(EulerRot::XYZ),
    };
    if sx != 0.0 || ex != 0.0 {
        rx = bx + sx * (1.0 - value) + ex * value;
    }
    if sy != 0.0 || ey != 0.0 {
        ry = by + sy * (1.0 - value) + ey * value;
    }
    if sz != 0.0 || ez != 0.0 {
        rz = bz + sz * (1.0 - value) + ez * value;
    }
    let orientation = Quat::from_euler(EulerRot::XYZ, rx, ry, rz);

    // 平移
    let start = modifier.start.position;
    let end = modifier.end.position;
    let base = match modifier.position_mode {
        BoneModifierMode::Relative => orig_bone.initial_position,
        BoneModifierMode::Absolute | BoneModifierMode::Cumulative => Vec3::ZERO,
    };
    let mut position = init_position;
    if start.x != 0.0 || end.x != 0.0 {
        position.x = base.x + start.x * (1.0 - value) + end.x * value;
    }
    if start.y != 0.0 || end.y != 0.0 {
        position.y = base.y + start.y * (1.0 - value) + end.y * value;
    }
    if start.z != 0.0 || end.z != 0.0 {
        position.z = base.z + start.z * (1.0 - value) + end.z * value;
    }

    // 缩放
    let start = modifier.start.scale;
    let end = modifier.end.scale;
    let mut scale = init_scale;
    if start.x != 1.0 || end.x != 1.0 {
        scale.x = start.x * (1.0 - value) + end.x * value;
    }
    if start.y != 1.0 || end.y != 1.0 {
        scale.y = start.y * (1.0 - value) + end.y * value;
    }
    if start.z != 1.0 || end.z != 1.0 {
        scale.z = start.z * (1.0 - value) + end.z * value;
    }

    if let Some(bone) = skeleton.bone_mut(index) {
        bone.position = position;
        bone.orientation = orientation;
        bone.scale = scale;
        bone.set_initial_state();
    }
}
