//! 外观修饰器值模型

use super::Transform;

/// 把值钳制到 [0,1]，NaN 视为 0
pub(crate) fn clamp01(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// 修饰器目标类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModifierKind {
    /// Morph 修饰器
    Morph,
    /// 骨骼修饰器集合（文档中称 dynamic_animation）
    Bone,
}

/// 外观修饰器基础值单元
///
/// 可被 Master 修饰器通过位置映射驱动；手动状态下只接受直接赋值
#[derive(Clone, Debug, Default)]
pub struct AppearanceModifier {
    /// 修饰器名称
    pub name: String,
    /// 当前影响值（0.0 - 1.0）
    pub value: f32,
    /// 手动状态。为 true 时 Master 修饰器不起作用
    pub manual: bool,
    /// 本轮重算累积的值
    sum: f32,
    /// 本轮重算累积的样本数
    samples: u32,
}

impl AppearanceModifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 重置累积状态，每轮 Master 重算开始时调用一次
    pub fn reset_accumulation(&mut self) {
        self.sum = 0.0;
        self.samples = 0;
    }

    /// 累积一个来自 Master 映射的值
    ///
    /// `use_average` 为 true 时多个 Master 驱动同一目标取平均，否则求和
    pub fn accumulate_value(&mut self, value: f32, use_average: bool) {
        self.sum += value;
        self.samples += 1;

        if self.manual {
            return;
        }

        if use_average {
            self.value = clamp01(self.sum / self.samples as f32);
        } else {
            self.value = clamp01(self.sum);
        }
    }

    /// 直接设置值并锁定为手动控制
    pub fn set_manual_value(&mut self, value: f32) {
        self.value = clamp01(value);
        self.manual = true;
    }
}

/// 骨骼修饰模式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BoneModifierMode {
    /// 相对骨骼的原始绑定变换
    #[default]
    Relative,
    /// 绝对值，不叠加任何基准
    Absolute,
    /// 累积，叠加在本轮之前的修饰结果之上
    Cumulative,
}

/// 单根骨骼的修饰描述
#[derive(Clone, Debug, Default)]
pub struct BoneModifier {
    /// 化身骨架中的骨骼名称
    pub bone_name: String,
    /// value=0 时的变换
    pub start: Transform,
    /// value=1 时的变换
    pub end: Transform,
    /// 位置修饰模式
    pub position_mode: BoneModifierMode,
    /// 旋转修饰模式
    pub orientation_mode: BoneModifierMode,
}

/// 一组共同生效的骨骼修饰器
#[derive(Clone, Debug, Default)]
pub struct BoneModifierSet {
    /// 集合自身的值单元
    pub modifier: AppearanceModifier,
    /// 按声明顺序应用的骨骼修饰器
    pub bones: Vec<BoneModifier>,
}

/// Morph 修饰器
#[derive(Clone, Debug, Default)]
pub struct MorphModifier {
    pub modifier: AppearanceModifier,
    /// 网格中的 Morph 目标名称
    pub morph_name: String,
}

/// Master 值累积模式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AccumulationMode {
    #[default]
    Average,
    Cumulative,
}

/// 映射表中的一个控制点
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValueMapping {
    pub master: f32,
    pub slave: f32,
}

/// 受 Master 修饰器驱动的从属映射
#[derive(Clone, Debug, Default)]
pub struct SlaveModifier {
    /// 目标修饰器名称
    pub name: String,
    /// 目标修饰器类型；未识别时为 None，重算时跳过
    pub kind: Option<ModifierKind>,
    /// 值累积模式
    pub mode: AccumulationMode,
    /// 值映射表。不足两个控制点时为恒等映射
    ///
    /// 正确性依赖控制点按 master 坐标升序插入
    pub mapping: Vec<ValueMapping>,
}

impl SlaveModifier {
    /// 把 Master 值通过分段线性映射换算为从属值
    pub fn mapped_value(&self, master_value: f32) -> f32 {
        if self.mapping.len() < 2 {
            return master_value;
        }

        let mut min_value = self.mapping[0].master;
        let mut max_value = self.mapping[0].master;
        for point in &self.mapping {
            min_value = min_value.min(point.master);
            max_value = max_value.max(point.master);
        }
        let master_value = master_value.clamp(min_value, max_value);

        // 从后向前找最后一个 master 坐标不超过输入的控制点
        let mut index = 0;
        for i in (0..self.mapping.len()).rev() {
            if self.mapping[i].master <= master_value {
                index = i;
                break;
            }
        }
        // 端点直接返回，不外推
        if index + 1 >= self.mapping.len() {
            return self.mapping[index].slave;
        }

        let low = self.mapping[index];
        let high = self.mapping[index + 1];
        let delta = high.master - low.master;
        let weight = if delta != 0.0 {
            (master_value - low.master) / delta
        } else {
            0.0
        };
        low.slave + weight * (high.slave - low.slave)
    }
}

/// 控制多个从属修饰器的 Master 修饰器
#[derive(Clone, Debug, Default)]
pub struct MasterModifier {
    /// 名称
    pub name: String,
    /// 分类描述，仅用于界面分组
    pub category: String,
    /// 当前位置值（0.0 - 1.0）
    pub value: f32,
    /// 受控的从属映射
    pub modifiers: Vec<SlaveModifier>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(points: &[(f32, f32)]) -> SlaveModifier {
        SlaveModifier {
            name: "test".to_string(),
            kind: Some(ModifierKind::Morph),
            mode: AccumulationMode::Average,
            mapping: points
                .iter()
                .map(|&(master, slave)| ValueMapping { master, slave })
                .collect(),
        }
    }

    #[test]
    fn test_accumulate_clamping() {
        let mut modifier = AppearanceModifier::new("test");
        modifier.accumulate_value(5.0, false);
        assert_eq!(modifier.value, 1.0);

        modifier.reset_accumulation();
        modifier.accumulate_value(-3.0, false);
        assert_eq!(modifier.value, 0.0);

        modifier.reset_accumulation();
        modifier.accumulate_value(f32::NAN, true);
        assert!(modifier.value >= 0.0 && modifier.value <= 1.0);

        modifier.set_manual_value(f32::INFINITY);
        assert_eq!(modifier.value, 1.0);
        modifier.set_manual_value(f32::NAN);
        assert_eq!(modifier.value, 0.0);
    }

    #[test]
    fn test_accumulate_sum_vs_average() {
        let mut modifier = AppearanceModifier::new("test");
        modifier.reset_accumulation();
        modifier.accumulate_value(0.4, false);
        modifier.accumulate_value(0.4, false);
        // 求和模式：多个 Master 相加
        assert!((modifier.value - 0.8).abs() < 1e-6);

        let mut modifier = AppearanceModifier::new("test");
        modifier.reset_accumulation();
        modifier.accumulate_value(0.4, true);
        modifier.accumulate_value(0.8, true);
        // 平均模式
        assert!((modifier.value - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_manual_ignores_accumulation() {
        let mut modifier = AppearanceModifier::new("test");
        modifier.set_manual_value(0.3);
        modifier.reset_accumulation();
        modifier.accumulate_value(0.9, false);
        assert!((modifier.value - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_mapping_interpolation() {
        let slave = mapping(&[(0.0, 0.2), (0.5, 0.8), (1.0, 0.3)]);
        assert!((slave.mapped_value(0.25) - 0.5).abs() < 1e-6);
        // 越界值钳制到映射表支持的范围
        assert!((slave.mapped_value(-5.0) - 0.2).abs() < 1e-6);
        assert!((slave.mapped_value(5.0) - 0.3).abs() < 1e-6);
        // 终点精确返回
        assert!((slave.mapped_value(1.0) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_mapping_identity() {
        let slave = mapping(&[]);
        assert_eq!(slave.mapped_value(0.37), 0.37);
        assert_eq!(slave.mapped_value(7.5), 7.5);

        let slave = mapping(&[(0.5, 0.9)]);
        assert_eq!(slave.mapped_value(0.2), 0.2);
    }

    #[test]
    fn test_mapping_duplicate_points() {
        // 重复的 master 坐标不会除零
        let slave = mapping(&[(0.5, 0.1), (0.5, 0.9)]);
        let value = slave.mapped_value(0.5);
        assert!(value.is_finite());
    }
}
