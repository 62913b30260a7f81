//! 外观描述文档的解析与序列化
//!
//! 文档格式沿用旧版元素集：`avatar`/`base`/`skeleton`/`material`/
//! `attachment`/`dynamic_animation`/`morph_modifier`/`master_modifier`/
//! `animation`/`property`。往返序列化保证语义等价，不保证逐字节一致

use glam::{EulerRot, Quat, Vec3};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::{AvatarError, Result};

use super::modifier::{
    clamp01, AccumulationMode, BoneModifier, BoneModifierMode, BoneModifierSet, MasterModifier,
    ModifierKind, MorphModifier, SlaveModifier, ValueMapping,
};
use super::{AnimationDefinition, AvatarAttachment, AvatarDescAsset};

type XmlReader<'a> = Reader<&'a [u8]>;

fn xml_err(e: impl std::fmt::Display) -> AvatarError {
    AvatarError::XmlParse(e.to_string())
}

fn attr(e: &BytesStart, name: &str) -> Option<String> {
    match e.try_get_attribute(name) {
        Ok(Some(a)) => a.unescape_value().ok().map(|v| v.into_owned()),
        _ => None,
    }
}

fn attr_or(e: &BytesStart, name: &str, default: &str) -> String {
    attr(e, name).unwrap_or_else(|| default.to_string())
}

fn parse_f32(value: &str, default: f32) -> f32 {
    value.trim().parse().unwrap_or(default)
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

/// 解析 "x y z"、"x,y,z" 或 "(x, y, z)" 形式的三维向量
pub(crate) fn parse_float3(value: &str) -> Vec3 {
    let parts: Vec<f32> = value
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().unwrap_or(0.0))
        .collect();
    if parts.len() < 3 {
        return Vec3::ZERO;
    }
    Vec3::new(parts[0], parts[1], parts[2])
}

/// 解析旧版姿态字符串
///
/// 三分量视为欧拉角（度），四分量视为 "w x y z" 四元数
pub(crate) fn parse_quat(value: &str) -> Quat {
    let parts: Vec<f32> = value
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().unwrap_or(0.0))
        .collect();
    match parts.len() {
        3 => euler_deg_to_quat(Vec3::new(parts[0], parts[1], parts[2])),
        4 => {
            let q = Quat::from_xyzw(parts[1], parts[2], parts[3], parts[0]);
            if q.length_squared() > 1e-12 {
                q.normalize()
            } else {
                Quat::IDENTITY
            }
        }
        _ => Quat::IDENTITY,
    }
}

/// 欧拉角（度，按 x y z 书写）转四元数，ZYX 顺序组合
fn euler_deg_to_quat(e: Vec3) -> Quat {
    Quat::from_euler(
        EulerRot::ZYX,
        e.z.to_radians(),
        e.y.to_radians(),
        e.x.to_radians(),
    )
}

fn quat_to_euler_deg(q: Quat) -> Vec3 {
    let (z, y, x) = q.to_euler(EulerRot::ZYX);
    Vec3::new(x.to_degrees(), y.to_degrees(), z.to_degrees())
}

fn format_float3(v: Vec3) -> String {
    format!("{} {} {}", v.x, v.y, v.z)
}

fn format_quat_wxyz(q: Quat) -> String {
    format!("{} {} {} {}", q.w, q.x, q.y, q.z)
}

fn format_bool(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

fn mode_name(mode: BoneModifierMode) -> &'static str {
    match mode {
        BoneModifierMode::Relative => "relative",
        BoneModifierMode::Absolute => "absolute",
        BoneModifierMode::Cumulative => "cumulative",
    }
}

fn parse_mode(value: &str, default: BoneModifierMode) -> BoneModifierMode {
    match value {
        "absolute" => BoneModifierMode::Absolute,
        "relative" => BoneModifierMode::Relative,
        "cumulative" => BoneModifierMode::Cumulative,
        _ => default,
    }
}

/// 把外观文档解析进描述。原有内容会被清空
pub fn read_avatar_appearance(desc: &mut AvatarDescAsset, data: &str) -> Result<()> {
    let mut reader = Reader::from_str(data);
    reader.config_mut().trim_text(true);

    desc.clear();

    let mut found_avatar = false;
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) if e.name().as_ref() == b"avatar" => {
                found_avatar = true;
                read_avatar_element(&mut reader, desc)?;
            }
            Event::Start(e) => {
                reader.read_to_end(e.name()).map_err(xml_err)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if !found_avatar {
        return Err(AvatarError::XmlParse("No avatar element".to_string()));
    }
    Ok(())
}

fn read_avatar_element(reader: &mut XmlReader, desc: &mut AvatarDescAsset) -> Result<()> {
    // dynamic_animation_parameter 可能先于其 dynamic_animation 出现，
    // 先攒起来，整个 avatar 元素读完后统一套用
    let mut parameters: Vec<(String, f32)> = Vec::new();

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => {
                let consumed = read_avatar_child(reader, desc, &mut parameters, &e, false)?;
                if !consumed {
                    reader.read_to_end(e.name()).map_err(xml_err)?;
                }
            }
            Event::Empty(e) => {
                read_avatar_child(reader, desc, &mut parameters, &e, true)?;
            }
            Event::End(e) if e.name().as_ref() == b"avatar" => break,
            Event::Eof => {
                return Err(AvatarError::XmlParse(
                    "Unexpected end of avatar document".to_string(),
                ))
            }
            _ => {}
        }
    }

    for (name, value) in parameters {
        if let Some(set) = desc
            .bone_modifiers
            .iter_mut()
            .find(|s| s.modifier.name == name)
        {
            set.modifier.value = clamp01(value);
        }
    }
    Ok(())
}

/// 处理 avatar 的一个子元素；返回 true 表示子元素的内容已被消费
fn read_avatar_child(
    reader: &mut XmlReader,
    desc: &mut AvatarDescAsset,
    parameters: &mut Vec<(String, f32)>,
    e: &BytesStart,
    is_empty: bool,
) -> Result<bool> {
    match e.name().as_ref() {
        b"base" => {
            desc.mesh = attr_or(e, "mesh", "");
            Ok(false)
        }
        b"skeleton" => {
            desc.skeleton = attr_or(e, "name", "");
            Ok(false)
        }
        b"material" => {
            desc.materials.push(attr_or(e, "name", ""));
            Ok(false)
        }
        b"attachment" if !is_empty => {
            if let Some(attachment) = read_attachment(reader)? {
                desc.attachments.push(attachment);
            }
            Ok(true)
        }
        b"dynamic_animation" if !is_empty => {
            if let Some(set) = read_bone_modifier_set(reader, e)? {
                desc.bone_modifiers.push(set);
            }
            Ok(true)
        }
        b"dynamic_animation_parameter" => {
            let name = attr_or(e, "name", "");
            let value = parse_f32(&attr_or(e, "position", "0.5"), 0.5);
            if !name.is_empty() {
                parameters.push((name, value));
            }
            Ok(false)
        }
        b"morph_modifier" => {
            let mut morph = MorphModifier::default();
            morph.modifier.name = attr_or(e, "name", "");
            morph.morph_name = attr_or(e, "internal_name", "");
            morph.modifier.value = clamp01(parse_f32(&attr_or(e, "influence", "0"), 0.0));
            desc.morph_modifiers.push(morph);
            Ok(false)
        }
        b"master_modifier" => {
            let mut master = MasterModifier {
                name: attr_or(e, "name", ""),
                category: attr_or(e, "category", ""),
                value: clamp01(parse_f32(&attr_or(e, "position", "0"), 0.0)),
                modifiers: Vec::new(),
            };
            if !is_empty {
                read_master_targets(reader, &mut master)?;
            }
            desc.master_modifiers.push(master);
            Ok(!is_empty)
        }
        b"animation" => {
            if let Some(animation) = read_animation_definition(e) {
                desc.animations.push(animation);
            }
            Ok(false)
        }
        b"property" => {
            let name = attr_or(e, "name", "");
            let value = attr_or(e, "value", "");
            if !name.is_empty() && !value.is_empty() {
                desc.properties.insert(name, value);
            }
            Ok(false)
        }
        _ => Ok(false),
    }
}

fn read_attachment(reader: &mut XmlReader) -> Result<Option<AvatarAttachment>> {
    let mut attachment = AvatarAttachment::default();
    let mut has_mesh = false;
    let mut has_avatar = false;

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => {
                if e.name().as_ref() == b"avatar" {
                    has_avatar = true;
                    read_attachment_avatar(reader, &mut attachment)?;
                } else {
                    read_attachment_leaf(&e, &mut attachment, &mut has_mesh);
                    reader.read_to_end(e.name()).map_err(xml_err)?;
                }
            }
            Event::Empty(e) => {
                read_attachment_leaf(&e, &mut attachment, &mut has_mesh);
            }
            Event::End(e) if e.name().as_ref() == b"attachment" => break,
            Event::Eof => {
                return Err(AvatarError::XmlParse(
                    "Unexpected end of attachment element".to_string(),
                ))
            }
            _ => {}
        }
    }

    if !has_mesh {
        log::error!("Attachment without mesh element");
        return Ok(None);
    }
    if !has_avatar {
        log::error!("Attachment without avatar element");
        return Ok(None);
    }
    Ok(Some(attachment))
}

fn read_attachment_leaf(e: &BytesStart, attachment: &mut AvatarAttachment, has_mesh: &mut bool) {
    match e.name().as_ref() {
        b"name" => attachment.name = attr_or(e, "value", ""),
        b"material" => attachment.materials.push(attr_or(e, "name", "")),
        b"category" => attachment.category = attr_or(e, "name", ""),
        b"mesh" => {
            attachment.mesh = attr_or(e, "name", "");
            attachment.link_skeleton = parse_bool(&attr_or(e, "linkskeleton", "0"));
            *has_mesh = true;
        }
        _ => {}
    }
}

fn read_attachment_avatar(reader: &mut XmlReader, attachment: &mut AvatarAttachment) -> Result<()> {
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => {
                read_attachment_avatar_leaf(&e, attachment);
                reader.read_to_end(e.name()).map_err(xml_err)?;
            }
            Event::Empty(e) => read_attachment_avatar_leaf(&e, attachment),
            Event::End(e) if e.name().as_ref() == b"avatar" => break,
            Event::Eof => {
                return Err(AvatarError::XmlParse(
                    "Unexpected end of attachment element".to_string(),
                ))
            }
            _ => {}
        }
    }
    Ok(())
}

fn read_attachment_avatar_leaf(e: &BytesStart, attachment: &mut AvatarAttachment) {
    match e.name().as_ref() {
        b"bone" => {
            let mut bone_name = attr_or(e, "name", "");
            // "None" 表示直接挂到化身场景节点
            if bone_name == "None" {
                bone_name.clear();
            }
            attachment.bone_name = bone_name;
            if let Some(offset) = attr(e, "offset") {
                attachment.transform.position = parse_float3(&offset);
            }
            if let Some(rotation) = attr(e, "rotation") {
                attachment.transform.orientation = parse_quat(&rotation);
            }
            if let Some(scale) = attr(e, "scale") {
                attachment.transform.scale = parse_float3(&scale);
            }
        }
        b"avatar_polygon" => {
            if let Some(idx) = attr(e, "idx").and_then(|v| v.trim().parse::<u32>().ok()) {
                attachment.vertices_to_hide.push(idx);
            }
        }
        _ => {}
    }
}

/// 从序列化的 attachment 片段解析单个附件
pub(crate) fn read_attachment_fragment(data: &str) -> Result<AvatarAttachment> {
    let mut reader = Reader::from_str(data);
    reader.config_mut().trim_text(true);
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) if e.name().as_ref() == b"attachment" => {
                return read_attachment(&mut reader)?.ok_or_else(|| {
                    AvatarError::XmlParse("Incomplete attachment element".to_string())
                });
            }
            Event::Start(e) => {
                reader.read_to_end(e.name()).map_err(xml_err)?;
            }
            Event::Eof => {
                return Err(AvatarError::XmlParse("No attachment element".to_string()))
            }
            _ => {}
        }
    }
}

fn read_bone_modifier_set(
    reader: &mut XmlReader,
    elem: &BytesStart,
) -> Result<Option<BoneModifierSet>> {
    let mut set = BoneModifierSet::default();
    set.modifier.name = attr_or(elem, "name", "");

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) if e.name().as_ref() == b"bones" => {
                read_bones(reader, &mut set)?;
            }
            Event::Start(e) => {
                // base_animations 等未使用的子元素
                reader.read_to_end(e.name()).map_err(xml_err)?;
            }
            Event::End(e) if e.name().as_ref() == b"dynamic_animation" => break,
            Event::Eof => {
                return Err(AvatarError::XmlParse(
                    "Unexpected end of dynamic_animation element".to_string(),
                ))
            }
            _ => {}
        }
    }

    // 没有任何骨骼的集合不保留
    if set.bones.is_empty() {
        return Ok(None);
    }
    Ok(Some(set))
}

fn read_bones(reader: &mut XmlReader, set: &mut BoneModifierSet) -> Result<()> {
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) if e.name().as_ref() == b"bone" => {
                let mut modifier = BoneModifier {
                    bone_name: attr_or(&e, "name", ""),
                    ..Default::default()
                };
                read_bone_channels(reader, &mut modifier)?;
                set.bones.push(modifier);
            }
            Event::Start(e) => {
                reader.read_to_end(e.name()).map_err(xml_err)?;
            }
            Event::End(e) if e.name().as_ref() == b"bones" => break,
            Event::Eof => {
                return Err(AvatarError::XmlParse(
                    "Unexpected end of bones element".to_string(),
                ))
            }
            _ => {}
        }
    }
    Ok(())
}

fn read_bone_channels(reader: &mut XmlReader, modifier: &mut BoneModifier) -> Result<()> {
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => {
                read_bone_channel(&e, modifier);
                reader.read_to_end(e.name()).map_err(xml_err)?;
            }
            Event::Empty(e) => read_bone_channel(&e, modifier),
            Event::End(e) if e.name().as_ref() == b"bone" => break,
            Event::Eof => {
                return Err(AvatarError::XmlParse(
                    "Unexpected end of bone element".to_string(),
                ))
            }
            _ => {}
        }
    }
    Ok(())
}

fn read_bone_channel(e: &BytesStart, modifier: &mut BoneModifier) {
    match e.name().as_ref() {
        b"rotation" => {
            // 旋转的 start/end 以欧拉角（度）书写
            modifier.start.orientation =
                euler_deg_to_quat(parse_float3(&attr_or(e, "start", "0 0 0")));
            modifier.end.orientation =
                euler_deg_to_quat(parse_float3(&attr_or(e, "end", "0 0 0")));
            modifier.orientation_mode =
                parse_mode(&attr_or(e, "mode", ""), BoneModifierMode::Relative);
        }
        b"translation" => {
            modifier.start.position = parse_float3(&attr_or(e, "start", "0 0 0"));
            modifier.end.position = parse_float3(&attr_or(e, "end", "0 0 0"));
            modifier.position_mode =
                parse_mode(&attr_or(e, "mode", ""), BoneModifierMode::Relative);
        }
        b"scale" => {
            modifier.start.scale = parse_float3(&attr_or(e, "start", "1 1 1"));
            modifier.end.scale = parse_float3(&attr_or(e, "end", "1 1 1"));
        }
        _ => {}
    }
}

fn read_master_targets(reader: &mut XmlReader, master: &mut MasterModifier) -> Result<()> {
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) if e.name().as_ref() == b"target_modifier" => {
                let mut slave = read_target_attrs(&e);
                read_target_mappings(reader, &mut slave)?;
                master.modifiers.push(slave);
            }
            Event::Empty(e) if e.name().as_ref() == b"target_modifier" => {
                master.modifiers.push(read_target_attrs(&e));
            }
            Event::Start(e) => {
                reader.read_to_end(e.name()).map_err(xml_err)?;
            }
            Event::End(e) if e.name().as_ref() == b"master_modifier" => break,
            Event::Eof => {
                return Err(AvatarError::XmlParse(
                    "Unexpected end of master_modifier element".to_string(),
                ))
            }
            _ => {}
        }
    }
    Ok(())
}

fn read_target_attrs(e: &BytesStart) -> SlaveModifier {
    let kind = match attr_or(e, "type", "").as_str() {
        "morph" => Some(ModifierKind::Morph),
        "bone" | "dynamic_animation" => Some(ModifierKind::Bone),
        _ => None,
    };
    let mode = if attr_or(e, "mode", "") == "cumulative" {
        AccumulationMode::Cumulative
    } else {
        AccumulationMode::Average
    };
    SlaveModifier {
        name: attr_or(e, "name", ""),
        kind,
        mode,
        mapping: Vec::new(),
    }
}

fn read_target_mappings(reader: &mut XmlReader, slave: &mut SlaveModifier) -> Result<()> {
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) if e.name().as_ref() == b"position_mapping" => {
                push_mapping(&e, slave);
                reader.read_to_end(e.name()).map_err(xml_err)?;
            }
            Event::Empty(e) if e.name().as_ref() == b"position_mapping" => push_mapping(&e, slave),
            Event::Start(e) => {
                reader.read_to_end(e.name()).map_err(xml_err)?;
            }
            Event::End(e) if e.name().as_ref() == b"target_modifier" => break,
            Event::Eof => {
                return Err(AvatarError::XmlParse(
                    "Unexpected end of target_modifier element".to_string(),
                ))
            }
            _ => {}
        }
    }
    Ok(())
}

fn push_mapping(e: &BytesStart, slave: &mut SlaveModifier) {
    slave.mapping.push(ValueMapping {
        master: parse_f32(&attr_or(e, "master", "0"), 0.0),
        slave: parse_f32(&attr_or(e, "target", "0"), 0.0),
    });
}

fn read_animation_definition(e: &BytesStart) -> Option<AnimationDefinition> {
    let mut id = attr_or(e, "id", "");
    if id.is_empty() {
        // 旧版字段
        id = attr_or(e, "uuid", "");
    }
    if id.is_empty() {
        log::error!("Missing animation identifier");
        return None;
    }

    let mut internal = attr_or(e, "internal_name", "");
    if internal.is_empty() {
        // 旧版字段
        internal = attr_or(e, "ogrename", "");
    }
    if internal.is_empty() {
        log::error!("Missing mesh animation name");
        return None;
    }

    Some(AnimationDefinition {
        id,
        name: attr_or(e, "name", ""),
        animation_name: internal,
        looped: parse_bool(&attr_or(e, "looped", "true")),
        exclusive: parse_bool(&attr_or(e, "exclusive", "false")),
        use_velocity: parse_bool(&attr_or(e, "usevelocity", "false")),
        always_restart: parse_bool(&attr_or(e, "alwaysrestart", "false")),
        fadein: parse_f32(&attr_or(e, "fadein", "0"), 0.0),
        fadeout: parse_f32(&attr_or(e, "fadeout", "0"), 0.0),
        speedfactor: parse_f32(&attr_or(e, "speedfactor", "1"), 1.0),
        weightfactor: parse_f32(&attr_or(e, "weightfactor", "1"), 1.0),
    })
}

/// 把描述序列化为外观 XML 文档
pub fn write_avatar_appearance(desc: &AvatarDescAsset) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer
        .write_event(Event::Start(BytesStart::new("avatar")))
        .map_err(xml_err)?;

    writer
        .write_event(Event::Start(BytesStart::new("version")))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Text(BytesText::new("0.2")))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("version")))
        .map_err(xml_err)?;

    let mut base = BytesStart::new("base");
    base.push_attribute(("name", "default"));
    base.push_attribute(("mesh", desc.mesh.as_str()));
    writer.write_event(Event::Empty(base)).map_err(xml_err)?;

    if !desc.skeleton.is_empty() {
        let mut skeleton = BytesStart::new("skeleton");
        skeleton.push_attribute(("name", desc.skeleton.as_str()));
        writer.write_event(Event::Empty(skeleton)).map_err(xml_err)?;
    }

    // 材质按子网格顺序写出
    for material in &desc.materials {
        let mut elem = BytesStart::new("material");
        elem.push_attribute(("name", material.as_str()));
        writer.write_event(Event::Empty(elem)).map_err(xml_err)?;
    }

    for attachment in &desc.attachments {
        write_attachment(&mut writer, attachment, &desc.mesh)?;
    }
    for set in &desc.bone_modifiers {
        write_bone_modifier_set(&mut writer, set)?;
    }
    for morph in &desc.morph_modifiers {
        let influence = morph.modifier.value.to_string();
        let mut elem = BytesStart::new("morph_modifier");
        elem.push_attribute(("name", morph.modifier.name.as_str()));
        elem.push_attribute(("internal_name", morph.morph_name.as_str()));
        elem.push_attribute(("influence", influence.as_str()));
        writer.write_event(Event::Empty(elem)).map_err(xml_err)?;
    }
    for master in &desc.master_modifiers {
        write_master_modifier(&mut writer, master)?;
    }
    for animation in &desc.animations {
        write_animation_definition(&mut writer, animation)?;
    }
    for (name, value) in &desc.properties {
        let mut elem = BytesStart::new("property");
        elem.push_attribute(("name", name.as_str()));
        elem.push_attribute(("value", value.as_str()));
        writer.write_event(Event::Empty(elem)).map_err(xml_err)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("avatar")))
        .map_err(xml_err)?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| AvatarError::XmlParse(format!("Invalid UTF-8 in serialized avatar: {e}")))
}

fn write_attachment<W: std::io::Write>(
    writer: &mut Writer<W>,
    attachment: &AvatarAttachment,
    mesh: &str,
) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new("attachment")))
        .map_err(xml_err)?;

    let mut name_elem = BytesStart::new("name");
    name_elem.push_attribute(("value", attachment.name.as_str()));
    writer.write_event(Event::Empty(name_elem)).map_err(xml_err)?;

    let mut mesh_elem = BytesStart::new("mesh");
    mesh_elem.push_attribute(("name", attachment.mesh.as_str()));
    mesh_elem.push_attribute(("linkskeleton", format_bool(attachment.link_skeleton)));
    writer.write_event(Event::Empty(mesh_elem)).map_err(xml_err)?;

    for material in &attachment.materials {
        let mut elem = BytesStart::new("material");
        elem.push_attribute(("name", material.as_str()));
        writer.write_event(Event::Empty(elem)).map_err(xml_err)?;
    }

    let mut category_elem = BytesStart::new("category");
    category_elem.push_attribute(("name", attachment.category.as_str()));
    writer
        .write_event(Event::Empty(category_elem))
        .map_err(xml_err)?;

    let mut avatar_elem = BytesStart::new("avatar");
    avatar_elem.push_attribute(("name", mesh));
    writer
        .write_event(Event::Start(avatar_elem))
        .map_err(xml_err)?;

    let bone_name = if attachment.bone_name.is_empty() {
        "None"
    } else {
        attachment.bone_name.as_str()
    };
    let offset = format_float3(attachment.transform.position);
    let rotation = format_quat_wxyz(attachment.transform.orientation);
    let scale = format_float3(attachment.transform.scale);
    let mut bone_elem = BytesStart::new("bone");
    bone_elem.push_attribute(("name", bone_name));
    bone_elem.push_attribute(("offset", offset.as_str()));
    bone_elem.push_attribute(("rotation", rotation.as_str()));
    bone_elem.push_attribute(("scale", scale.as_str()));
    writer.write_event(Event::Empty(bone_elem)).map_err(xml_err)?;

    for idx in &attachment.vertices_to_hide {
        let idx = idx.to_string();
        let mut elem = BytesStart::new("avatar_polygon");
        elem.push_attribute(("idx", idx.as_str()));
        writer.write_event(Event::Empty(elem)).map_err(xml_err)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("avatar")))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("attachment")))
        .map_err(xml_err)?;
    Ok(())
}

fn write_bone_modifier_set<W: std::io::Write>(
    writer: &mut Writer<W>,
    set: &BoneModifierSet,
) -> Result<()> {
    // 参数元素写在修饰器元素之前，读取端依赖这一顺序之内的任意排列
    let value = set.modifier.value.to_string();
    let mut parameter = BytesStart::new("dynamic_animation_parameter");
    parameter.push_attribute(("name", set.modifier.name.as_str()));
    parameter.push_attribute(("position", value.as_str()));
    writer.write_event(Event::Empty(parameter)).map_err(xml_err)?;

    let mut elem = BytesStart::new("dynamic_animation");
    elem.push_attribute(("name", set.modifier.name.as_str()));
    writer.write_event(Event::Start(elem)).map_err(xml_err)?;

    writer
        .write_event(Event::Empty(BytesStart::new("base_animations")))
        .map_err(xml_err)?;

    writer
        .write_event(Event::Start(BytesStart::new("bones")))
        .map_err(xml_err)?;
    for bone in &set.bones {
        write_bone(writer, bone)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("bones")))
        .map_err(xml_err)?;

    writer
        .write_event(Event::End(BytesEnd::new("dynamic_animation")))
        .map_err(xml_err)?;
    Ok(())
}

fn write_bone<W: std::io::Write>(writer: &mut Writer<W>, bone: &BoneModifier) -> Result<()> {
    let mut elem = BytesStart::new("bone");
    elem.push_attribute(("name", bone.bone_name.as_str()));
    writer.write_event(Event::Start(elem)).map_err(xml_err)?;

    let start = format_float3(quat_to_euler_deg(bone.start.orientation));
    let end = format_float3(quat_to_euler_deg(bone.end.orientation));
    let mut rotation = BytesStart::new("rotation");
    rotation.push_attribute(("start", start.as_str()));
    rotation.push_attribute(("end", end.as_str()));
    rotation.push_attribute(("mode", mode_name(bone.orientation_mode)));
    writer.write_event(Event::Empty(rotation)).map_err(xml_err)?;

    let start = format_float3(bone.start.position);
    let end = format_float3(bone.end.position);
    let mut translation = BytesStart::new("translation");
    translation.push_attribute(("start", start.as_str()));
    translation.push_attribute(("end", end.as_str()));
    translation.push_attribute(("mode", mode_name(bone.position_mode)));
    writer
        .write_event(Event::Empty(translation))
        .map_err(xml_err)?;

    let start = format_float3(bone.start.scale);
    let end = format_float3(bone.end.scale);
    let mut scale = BytesStart::new("scale");
    scale.push_attribute(("start", start.as_str()));
    scale.push_attribute(("end", end.as_str()));
    writer.write_event(Event::Empty(scale)).map_err(xml_err)?;

    writer
        .write_event(Event::End(BytesEnd::new("bone")))
        .map_err(xml_err)?;
    Ok(())
}

fn write_master_modifier<W: std::io::Write>(
    writer: &mut Writer<W>,
    master: &MasterModifier,
) -> Result<()> {
    let value = master.value.to_string();
    let mut elem = BytesStart::new("master_modifier");
    elem.push_attribute(("name", master.name.as_str()));
    elem.push_attribute(("position", value.as_str()));
    elem.push_attribute(("category", master.category.as_str()));
    writer.write_event(Event::Start(elem)).map_err(xml_err)?;

    for slave in &master.modifiers {
        let mut target = BytesStart::new("target_modifier");
        target.push_attribute(("name", slave.name.as_str()));
        match slave.kind {
            Some(ModifierKind::Morph) => target.push_attribute(("type", "morph")),
            Some(ModifierKind::Bone) => target.push_attribute(("type", "dynamic_animation")),
            None => {}
        }
        let mode = match slave.mode {
            AccumulationMode::Cumulative => "cumulative",
            AccumulationMode::Average => "average",
        };
        target.push_attribute(("mode", mode));
        writer.write_event(Event::Start(target)).map_err(xml_err)?;

        for mapping in &slave.mapping {
            let master_pos = mapping.master.to_string();
            let target_pos = mapping.slave.to_string();
            let mut elem = BytesStart::new("position_mapping");
            elem.push_attribute(("master", master_pos.as_str()));
            elem.push_attribute(("target", target_pos.as_str()));
            writer.write_event(Event::Empty(elem)).map_err(xml_err)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("target_modifier")))
            .map_err(xml_err)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("master_modifier")))
        .map_err(xml_err)?;
    Ok(())
}

fn write_animation_definition<W: std::io::Write>(
    writer: &mut Writer<W>,
    animation: &AnimationDefinition,
) -> Result<()> {
    let fadein = animation.fadein.to_string();
    let fadeout = animation.fadeout.to_string();
    let speedfactor = animation.speedfactor.to_string();
    let weightfactor = animation.weightfactor.to_string();

    let mut elem = BytesStart::new("animation");
    elem.push_attribute(("name", animation.name.as_str()));
    elem.push_attribute(("id", animation.id.as_str()));
    elem.push_attribute(("internal_name", animation.animation_name.as_str()));
    elem.push_attribute(("looped", format_bool(animation.looped)));
    elem.push_attribute(("exclusive", format_bool(animation.exclusive)));
    elem.push_attribute(("usevelocity", format_bool(animation.use_velocity)));
    elem.push_attribute(("alwaysrestart", format_bool(animation.always_restart)));
    elem.push_attribute(("fadein", fadein.as_str()));
    elem.push_attribute(("fadeout", fadeout.as_str()));
    elem.push_attribute(("speedfactor", speedfactor.as_str()));
    elem.push_attribute(("weightfactor", weightfactor.as_str()));
    writer.write_event(Event::Empty(elem)).map_err(xml_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
<avatar>
  <version>0.2</version>
  <base name="default" mesh="avatar.mesh"/>
  <skeleton name="avatar.skeleton"/>
  <material name="body.material"/>
  <material name="face.material"/>
  <attachment>
    <name value="hat"/>
    <mesh name="hat.mesh" linkskeleton="0"/>
    <material name="hat.material"/>
    <category name="headwear"/>
    <avatar name="avatar.mesh">
      <bone name="Bip01_Head" offset="0 0.1 0" rotation="1 0 0 0" scale="1 1 1"/>
      <avatar_polygon idx="4"/>
      <avatar_polygon idx="7"/>
    </avatar>
  </attachment>
  <dynamic_animation_parameter name="Height" position="0.8"/>
  <dynamic_animation name="Height">
    <base_animations/>
    <bones>
      <bone name="Spine">
        <rotation start="0 0 0" end="0 0 0" mode="relative"/>
        <translation start="0 0 0" end="0 0.1 0" mode="relative"/>
        <scale start="1 1 1" end="1 1.2 1"/>
      </bone>
    </bones>
  </dynamic_animation>
  <morph_modifier name="Chubby" internal_name="Morph_Chubby" influence="0.25"/>
  <master_modifier name="BodyFat" position="0.5" category="body">
    <target_modifier name="Chubby" type="morph" mode="average">
      <position_mapping master="0" target="0.2"/>
      <position_mapping master="1" target="1"/>
    </target_modifier>
    <target_modifier name="Height" type="dynamic_animation" mode="cumulative"/>
  </master_modifier>
  <animation name="Walk" id="6ed24bd8-91aa-4b12-ccc7-c97c857ab4e0" internal_name="walk" looped="1" fadein="0.25"/>
  <property name="basebone" value="Bip01_Pelvis"/>
  <property name="rootbone" value="Bip01"/>
</avatar>
"#;

    #[test]
    fn test_parse_float3() {
        assert_eq!(parse_float3("1 2 3"), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(parse_float3("1,2,3"), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(parse_float3("(1, 2, 3)"), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(parse_float3("garbage"), Vec3::ZERO);
    }

    #[test]
    fn test_parse_quat() {
        // 四分量按 w x y z 解释
        let q = parse_quat("1 0 0 0");
        assert!((q.w - 1.0).abs() < 1e-6);
        // 三分量按欧拉角（度）解释
        let q = parse_quat("90 0 0");
        let expected = Quat::from_euler(EulerRot::ZYX, 0.0, 0.0, std::f32::consts::FRAC_PI_2);
        assert!(q.abs_diff_eq(expected, 1e-5));
        // 非法输入退化为单位四元数
        assert!(parse_quat("0 0 0 0").abs_diff_eq(Quat::IDENTITY, 1e-6));
    }

    #[test]
    fn test_read_sample_document() {
        let desc = AvatarDescAsset::from_xml("avatar.xml", SAMPLE).unwrap();
        assert_eq!(desc.mesh, "avatar.mesh");
        assert_eq!(desc.skeleton, "avatar.skeleton");
        assert_eq!(desc.materials, vec!["body.material", "face.material"]);

        assert_eq!(desc.attachments.len(), 1);
        let attachment = &desc.attachments[0];
        assert_eq!(attachment.name, "hat");
        assert_eq!(attachment.bone_name, "Bip01_Head");
        assert_eq!(attachment.category, "headwear");
        assert_eq!(attachment.vertices_to_hide, vec![4, 7]);
        assert!((attachment.transform.position.y - 0.1).abs() < 1e-6);

        assert_eq!(desc.bone_modifiers.len(), 1);
        let set = &desc.bone_modifiers[0];
        assert_eq!(set.modifier.name, "Height");
        // 参数值 0.8 被解析后的 Master 重算覆盖：BodyFat=0.5 经恒等映射驱动 Height
        assert!((set.modifier.value - 0.5).abs() < 1e-6);
        assert_eq!(set.bones.len(), 1);
        assert_eq!(set.bones[0].bone_name, "Spine");
        assert_eq!(set.bones[0].position_mode, BoneModifierMode::Relative);
        assert!((set.bones[0].end.position.y - 0.1).abs() < 1e-6);

        assert_eq!(desc.morph_modifiers.len(), 1);
        assert_eq!(desc.master_modifiers.len(), 1);
        let master = &desc.master_modifiers[0];
        assert_eq!(master.modifiers.len(), 2);
        assert_eq!(master.modifiers[0].kind, Some(ModifierKind::Morph));
        assert_eq!(master.modifiers[1].kind, Some(ModifierKind::Bone));
        assert_eq!(master.modifiers[1].mode, AccumulationMode::Cumulative);

        assert_eq!(desc.animations.len(), 1);
        assert_eq!(desc.animations[0].animation_name, "walk");
        assert!(desc.animations[0].looped);

        assert_eq!(desc.property("basebone"), Some("Bip01_Pelvis"));
        assert!(!desc.has_property("baseoffset"));
    }

    #[test]
    fn test_roundtrip_equivalence() {
        let first = AvatarDescAsset::from_xml("avatar.xml", SAMPLE).unwrap();
        let serialized = first.to_xml().unwrap();
        let second = AvatarDescAsset::from_xml("avatar.xml", &serialized).unwrap();

        assert_eq!(first.mesh, second.mesh);
        assert_eq!(first.skeleton, second.skeleton);
        assert_eq!(first.materials, second.materials);
        assert_eq!(first.attachments.len(), second.attachments.len());
        assert_eq!(
            first.attachments[0].vertices_to_hide,
            second.attachments[0].vertices_to_hide
        );
        assert_eq!(first.bone_modifiers.len(), second.bone_modifiers.len());
        assert!(
            (first.bone_modifiers[0].modifier.value - second.bone_modifiers[0].modifier.value)
                .abs()
                < 1e-6
        );
        let a = &first.bone_modifiers[0].bones[0];
        let b = &second.bone_modifiers[0].bones[0];
        assert_eq!(a.position_mode, b.position_mode);
        assert!(a.end.position.abs_diff_eq(b.end.position, 1e-5));
        assert!(a.end.scale.abs_diff_eq(b.end.scale, 1e-5));
        assert!(a.start.orientation.abs_diff_eq(b.start.orientation, 1e-5));
        assert_eq!(first.morph_modifiers.len(), second.morph_modifiers.len());
        assert_eq!(first.master_modifiers.len(), second.master_modifiers.len());
        assert_eq!(
            first.master_modifiers[0].modifiers[0].mapping,
            second.master_modifiers[0].modifiers[0].mapping
        );
        assert_eq!(first.animations.len(), second.animations.len());
        assert_eq!(first.properties, second.properties);
    }

    #[test]
    fn test_invalid_document() {
        assert!(AvatarDescAsset::from_xml("broken.xml", "<mesh/>").is_err());
        assert!(AvatarDescAsset::from_xml("broken.xml", "not xml at all").is_err());
    }

    #[test]
    fn test_attachment_fragment() {
        let fragment = r#"
<attachment>
  <name value="sword"/>
  <mesh name="sword.mesh" linkskeleton="0"/>
  <category name="hand"/>
  <avatar name="avatar.mesh">
    <bone name="None" offset="0 0 0" scale="1 1 1"/>
  </avatar>
</attachment>
"#;
        let attachment = read_attachment_fragment(fragment).unwrap();
        assert_eq!(attachment.name, "sword");
        // "None" 骨骼名表示挂到场景节点
        assert!(attachment.bone_name.is_empty());

        assert!(read_attachment_fragment("<attachment/>").is_err());
    }
}
