//! 内置默认化身描述
//!
//! 实体在外观文档下载完成前（或下载失败时）可先套用的兜底外观

use once_cell::sync::Lazy;

use super::AvatarDescAsset;

const DEFAULT_AVATAR_XML: &str = r#"
<avatar>
  <version>0.2</version>
  <base name="default" mesh="default_avatar.mesh"/>
  <skeleton name="default_avatar.skeleton"/>
  <material name="default_body.material"/>
  <material name="default_face.material"/>
  <dynamic_animation_parameter name="Height" position="0.5"/>
  <dynamic_animation name="Height">
    <bones>
      <bone name="Bip01_Spine">
        <rotation start="0 0 0" end="0 0 0" mode="relative"/>
        <translation start="0 -0.05 0" end="0 0.08 0" mode="relative"/>
        <scale start="1 1 1" end="1 1 1"/>
      </bone>
    </bones>
  </dynamic_animation>
  <morph_modifier name="Smile" internal_name="Morph_Smile" influence="0"/>
  <master_modifier name="Height" position="0.5" category="body">
    <target_modifier name="Height" type="dynamic_animation" mode="average">
      <position_mapping master="0" target="0"/>
      <position_mapping master="1" target="1"/>
    </target_modifier>
  </master_modifier>
  <property name="basebone" value="Bip01_Pelvis"/>
  <property name="rootbone" value="Bip01"/>
  <property name="baseoffset" value="0 0 0"/>
</avatar>
"#;

static DEFAULT_DESCRIPTION: Lazy<AvatarDescAsset> = Lazy::new(|| {
    AvatarDescAsset::from_xml("default_avatar.xml", DEFAULT_AVATAR_XML)
        .expect("builtin default avatar document must parse")
});

/// 获取内置默认化身描述的副本
pub fn default_description() -> AvatarDescAsset {
    DEFAULT_DESCRIPTION.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_description_parses() {
        let desc = default_description();
        assert_eq!(desc.mesh, "default_avatar.mesh");
        assert!(!desc.bone_modifiers.is_empty());
        assert!(desc.has_property("basebone"));
    }
}
