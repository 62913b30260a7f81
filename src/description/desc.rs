//! 化身外观描述聚合根

use std::collections::BTreeMap;

use crate::Result;

use super::modifier::{
    clamp01, AccumulationMode, AppearanceModifier, BoneModifierSet, MasterModifier, ModifierKind,
    MorphModifier,
};
use super::xml;
use super::{AnimationDefinition, AvatarAttachment};

/// 描述文档发出的变化信号
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeSignal {
    /// 结构性变化：网格/骨架/材质/附件
    Appearance,
    /// 仅值变化：Morph/骨骼修饰器
    DynamicAppearance,
}

/// 化身外观描述资源
///
/// 由外观 XML 文档解析而来，自身不持有任何渲染资源；
/// 变化通过信号队列交由外观应用器消费
#[derive(Clone, Debug, Default)]
pub struct AvatarDescAsset {
    /// 资源名称，用于相对引用解析
    pub name: String,
    /// 化身网格引用
    pub mesh: String,
    /// 化身骨架引用
    pub skeleton: String,
    /// 材质引用，按子网格顺序
    pub materials: Vec<String>,
    /// 附件
    pub attachments: Vec<AvatarAttachment>,
    /// 骨骼修饰器集合
    pub bone_modifiers: Vec<BoneModifierSet>,
    /// Morph 修饰器
    pub morph_modifiers: Vec<MorphModifier>,
    /// Master 修饰器
    pub master_modifiers: Vec<MasterModifier>,
    /// 动画定义
    pub animations: Vec<AnimationDefinition>,
    /// 杂项属性（basebone/rootbone/baseoffset 等）
    pub properties: BTreeMap<String, String>,
    /// 待消费的变化信号
    pending_signals: Vec<ChangeSignal>,
}

impl AvatarDescAsset {
    /// 从外观 XML 文档解析
    pub fn from_xml(name: &str, data: &str) -> Result<Self> {
        let mut desc = Self {
            name: name.to_string(),
            ..Default::default()
        };
        xml::read_avatar_appearance(&mut desc, data)?;
        // 解析后立即刷新从属修饰器
        desc.calculate_master_modifiers();
        desc.emit(ChangeSignal::Appearance);
        Ok(desc)
    }

    /// 序列化为外观 XML 文档
    pub fn to_xml(&self) -> Result<String> {
        xml::write_avatar_appearance(self)
    }

    /// 清空全部内容
    pub fn clear(&mut self) {
        self.mesh.clear();
        self.skeleton.clear();
        self.materials.clear();
        self.attachments.clear();
        self.bone_modifiers.clear();
        self.morph_modifiers.clear();
        self.master_modifiers.clear();
        self.animations.clear();
        self.properties.clear();
    }

    /// 是否声明了非空属性
    pub fn has_property(&self, name: &str) -> bool {
        self.properties.get(name).map_or(false, |v| !v.is_empty())
    }

    /// 获取非空属性值
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// 设置属性
    pub fn set_property(&mut self, name: &str, value: &str) {
        self.properties.insert(name.to_string(), value.to_string());
    }

    /// 收集描述引用的全部外部资源（未解析的原始引用）
    pub fn find_references(&self) -> Vec<String> {
        let mut refs = Vec::new();
        let mut add = |r: &str| {
            if !r.is_empty() {
                refs.push(r.to_string());
            }
        };
        add(&self.mesh);
        add(&self.skeleton);
        for material in &self.materials {
            add(material);
        }
        for attachment in &self.attachments {
            add(&attachment.mesh);
            for material in &attachment.materials {
                add(material);
            }
        }
        refs
    }

    /// 设置 Master 修饰器的值并重算全部从属修饰器
    ///
    /// 被该 Master 驱动的目标会解除手动锁定
    pub fn set_master_modifier_value(&mut self, name: &str, value: f32) {
        let Some(index) = self.master_modifiers.iter().position(|m| m.name == name) else {
            return;
        };
        self.master_modifiers[index].value = clamp01(value);

        let targets: Vec<(String, ModifierKind)> = self.master_modifiers[index]
            .modifiers
            .iter()
            .filter_map(|slave| slave.kind.map(|kind| (slave.name.clone(), kind)))
            .collect();
        for (slave_name, kind) in targets {
            if let Some(modifier) = self.find_modifier(&slave_name, kind) {
                modifier.manual = false;
            }
        }

        self.calculate_master_modifiers();
        self.emit(ChangeSignal::DynamicAppearance);
    }

    /// 直接设置修饰器的值并锁定为手动控制
    ///
    /// 先找 Morph，再找骨骼修饰器集合
    pub fn set_modifier_value(&mut self, name: &str, value: f32) {
        let value = clamp01(value);
        if let Some(modifier) = self.find_modifier(name, ModifierKind::Morph) {
            modifier.set_manual_value(value);
            self.emit(ChangeSignal::DynamicAppearance);
            return;
        }
        if let Some(modifier) = self.find_modifier(name, ModifierKind::Bone) {
            modifier.set_manual_value(value);
            self.emit(ChangeSignal::DynamicAppearance);
        }
    }

    /// 替换指定子网格的材质引用
    pub fn set_material(&mut self, index: usize, material: &str) {
        if index >= self.materials.len() {
            return;
        }
        self.materials[index] = material.to_string();
        self.emit(ChangeSignal::Appearance);
    }

    /// 从序列化的 attachment XML 片段添加附件
    pub fn add_attachment(&mut self, data: &str) -> Result<()> {
        let attachment = xml::read_attachment_fragment(data)?;
        self.attachments.push(attachment);
        self.emit(ChangeSignal::Appearance);
        Ok(())
    }

    /// 移除指定附件
    pub fn remove_attachment(&mut self, index: usize) {
        if index < self.attachments.len() {
            self.attachments.remove(index);
            self.emit(ChangeSignal::Appearance);
        } else {
            log::error!(
                "Failed to remove attachment at index {}! Only {} attachments exist on the avatar asset",
                index,
                self.attachments.len()
            );
        }
    }

    /// 移除指定分类下的全部附件
    pub fn remove_attachments_by_category(&mut self, category: &str) {
        let before = self.attachments.len();
        self.attachments.retain(|a| a.category != category);
        if self.attachments.len() != before {
            self.emit(ChangeSignal::Appearance);
        }
    }

    /// 重算 Master 修饰器对全部从属目标的影响
    ///
    /// 整批执行：先重置所有可能目标的累积状态，再按声明顺序
    /// 遍历 Master，同一目标的多次贡献按其声明的模式求和或平均。
    /// 手动控制的修饰器会被跳过
    pub fn calculate_master_modifiers(&mut self) {
        for morph in &mut self.morph_modifiers {
            morph.modifier.reset_accumulation();
        }
        for set in &mut self.bone_modifiers {
            set.modifier.reset_accumulation();
        }

        // 先收集贡献值，避免同时借用 Master 列表与目标集合
        let mut contributions = Vec::new();
        for master in &self.master_modifiers {
            for slave in &master.modifiers {
                if let Some(kind) = slave.kind {
                    contributions.push((
                        slave.name.clone(),
                        kind,
                        slave.mapped_value(master.value),
                        slave.mode,
                    ));
                }
            }
        }
        for (name, kind, value, mode) in contributions {
            if let Some(modifier) = self.find_modifier(&name, kind) {
                modifier.accumulate_value(value, mode == AccumulationMode::Average);
            }
        }
    }

    /// 按名称和类型查找修饰器值单元
    pub fn find_modifier(
        &mut self,
        name: &str,
        kind: ModifierKind,
    ) -> Option<&mut AppearanceModifier> {
        match kind {
            ModifierKind::Morph => self
                .morph_modifiers
                .iter_mut()
                .find(|m| m.modifier.name == name)
                .map(|m| &mut m.modifier),
            ModifierKind::Bone => self
                .bone_modifiers
                .iter_mut()
                .find(|s| s.modifier.name == name)
                .map(|s| &mut s.modifier),
        }
    }

    /// 取出全部待消费信号
    pub fn take_signals(&mut self) -> Vec<ChangeSignal> {
        std::mem::take(&mut self.pending_signals)
    }

    pub(crate) fn emit(&mut self, signal: ChangeSignal) {
        if !self.pending_signals.contains(&signal) {
            self.pending_signals.push(signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{SlaveModifier, ValueMapping};

    fn desc_with_master() -> AvatarDescAsset {
        let mut desc = AvatarDescAsset::default();
        desc.bone_modifiers.push(BoneModifierSet {
            modifier: AppearanceModifier::new("Waist"),
            bones: Vec::new(),
        });
        desc.morph_modifiers.push(MorphModifier {
            modifier: AppearanceModifier::new("Chubby"),
            morph_name: "Morph_Chubby".to_string(),
        });
        desc.master_modifiers.push(MasterModifier {
            name: "BodyFat".to_string(),
            category: "body".to_string(),
            value: 0.0,
            modifiers: vec![
                SlaveModifier {
                    name: "Waist".to_string(),
                    kind: Some(ModifierKind::Bone),
                    mode: AccumulationMode::Cumulative,
                    mapping: vec![
                        ValueMapping { master: 0.0, slave: 0.0 },
                        ValueMapping { master: 1.0, slave: 0.8 },
                    ],
                },
                SlaveModifier {
                    name: "Chubby".to_string(),
                    kind: Some(ModifierKind::Morph),
                    mode: AccumulationMode::Cumulative,
                    mapping: vec![
                        ValueMapping { master: 0.0, slave: 0.2 },
                        ValueMapping { master: 1.0, slave: 1.0 },
                    ],
                },
            ],
        });
        desc
    }

    #[test]
    fn test_master_fanout() {
        let mut desc = desc_with_master();
        desc.set_master_modifier_value("BodyFat", 0.5);

        // 每个从属目标按各自的映射曲线独立更新
        let waist = desc.find_modifier("Waist", ModifierKind::Bone).unwrap().value;
        assert!((waist - 0.4).abs() < 1e-6);
        let chubby = desc.find_modifier("Chubby", ModifierKind::Morph).unwrap().value;
        assert!((chubby - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_manual_lock_survives_recalculation() {
        let mut desc = desc_with_master();
        desc.set_modifier_value("Chubby", 0.25);
        desc.calculate_master_modifiers();
        let chubby = desc.find_modifier("Chubby", ModifierKind::Morph).unwrap();
        assert!((chubby.value - 0.25).abs() < 1e-6);
        assert!(chubby.manual);
    }

    #[test]
    fn test_master_clears_manual_lock() {
        let mut desc = desc_with_master();
        desc.set_modifier_value("Chubby", 0.25);
        // Master 直接驱动时解除目标的手动锁定
        desc.set_master_modifier_value("BodyFat", 1.0);
        let chubby = desc.find_modifier("Chubby", ModifierKind::Morph).unwrap();
        assert!(!chubby.manual);
        assert!((chubby.value - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_set_modifier_value_clamped() {
        let mut desc = desc_with_master();
        desc.set_modifier_value("Waist", 3.5);
        assert_eq!(desc.find_modifier("Waist", ModifierKind::Bone).unwrap().value, 1.0);
        desc.set_modifier_value("Waist", f32::NAN);
        assert_eq!(desc.find_modifier("Waist", ModifierKind::Bone).unwrap().value, 0.0);
    }

    #[test]
    fn test_shared_slave_accumulation() {
        let mut desc = desc_with_master();
        // 第二个 Master 驱动同一个 Morph 目标
        desc.master_modifiers.push(MasterModifier {
            name: "Belly".to_string(),
            category: "body".to_string(),
            value: 1.0,
            modifiers: vec![SlaveModifier {
                name: "Chubby".to_string(),
                kind: Some(ModifierKind::Morph),
                mode: AccumulationMode::Cumulative,
                mapping: vec![
                    ValueMapping { master: 0.0, slave: 0.0 },
                    ValueMapping { master: 1.0, slave: 0.5 },
                ],
            }],
        });
        desc.master_modifiers[0].value = 0.5;
        desc.calculate_master_modifiers();
        // 求和模式：0.6 + 0.5，钳制到 1.0
        let chubby = desc.find_modifier("Chubby", ModifierKind::Morph).unwrap().value;
        assert!((chubby - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_remove_attachments_by_category() {
        let mut desc = AvatarDescAsset::default();
        for (name, category) in [("hat", "headwear"), ("mask", "headwear"), ("sword", "hand")] {
            desc.attachments.push(AvatarAttachment {
                name: name.to_string(),
                category: category.to_string(),
                ..Default::default()
            });
        }
        desc.remove_attachments_by_category("headwear");
        assert_eq!(desc.attachments.len(), 1);
        assert_eq!(desc.attachments[0].name, "sword");
    }

    #[test]
    fn test_signals_deduplicated() {
        let mut desc = desc_with_master();
        desc.set_master_modifier_value("BodyFat", 0.2);
        desc.set_master_modifier_value("BodyFat", 0.4);
        let signals = desc.take_signals();
        assert_eq!(signals, vec![ChangeSignal::DynamicAppearance]);
        assert!(desc.take_signals().is_empty());
    }
}
