//! 外观应用器
//!
//! 每个化身实体一个，负责把外观描述作用到场景实体上。
//! 描述文档及其依赖异步到达，应用器在客户端主循环里轮询推进：
//! Unbound → PendingDependencies → Bound。
//! 引用在下载途中被更换时，旧下载的完成结果直接丢弃

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use glam::Vec3;

use crate::assets::{
    resolve_asset_ref, AssetData, AssetStore, AssetType, DependencyTracker, TransferHandle,
    TransferResult,
};
use crate::compositor::{apply_bone_modifier, hide_vertices, reset_bones};
use crate::description::{default_description, parse_float3, AvatarDescAsset, ChangeSignal};
use crate::scene::MeshEntity;

/// 化身网格包围盒高度一半的近似值（遗憾的魔法数）
const FIXED_HEIGHT_OFFSET: f32 = -0.87;

/// 高度阻尼比的除零保护
const ROOT_HEIGHT_EPSILON: f32 = 1e-6;

/// 默认外观描述的缓存键
const DEFAULT_APPEARANCE_REF: &str = "default_avatar.xml";

/// 外观装配状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppearanceState {
    /// 尚未指定外观描述
    Unbound,
    /// 描述已指定，描述本身或其结构性资源仍在加载
    PendingDependencies,
    /// 结构性资源齐备，外观至少装配过一次
    Bound,
}

/// 化身外观应用器
pub struct EcAvatar {
    /// 当前外观描述引用
    appearance_ref: String,
    state: AppearanceState,
    /// 描述由资源缓存持有，这里只保留弱引用；
    /// 描述被逐出时实体退回 Unbound
    desc: Weak<RefCell<AvatarDescAsset>>,
    /// 描述文档自身的传输
    pending_transfer: Option<TransferHandle>,
    tracker: DependencyTracker,
}

impl EcAvatar {
    pub fn new() -> Self {
        Self {
            appearance_ref: String::new(),
            state: AppearanceState::Unbound,
            desc: Weak::new(),
            pending_transfer: None,
            tracker: DependencyTracker::new(),
        }
    }

    pub fn state(&self) -> AppearanceState {
        self.state
    }

    pub fn appearance_ref(&self) -> &str {
        &self.appearance_ref
    }

    /// 当前绑定的外观描述
    pub fn description(&self) -> Option<Rc<RefCell<AvatarDescAsset>>> {
        self.desc.upgrade()
    }

    /// 更换外观描述引用并发起下载
    ///
    /// 旧引用的在途下载不再被消费，其完成结果自然作废
    pub fn set_appearance_ref(&mut self, reference: &str, store: &mut AssetStore) {
        let reference = reference.trim();
        self.desc = Weak::new();
        self.pending_transfer = None;

        if reference.is_empty() {
            self.appearance_ref.clear();
            self.state = AppearanceState::Unbound;
            return;
        }

        self.appearance_ref = reference.to_string();
        self.state = AppearanceState::PendingDependencies;

        let handle = store.request_asset(reference, AssetType::AvatarDescription);
        if handle.is_valid() {
            self.pending_transfer = Some(handle);
        } else {
            log::error!("Failed to request avatar appearance {}", reference);
        }
    }

    /// 直接绑定一个已在缓存中的描述
    pub fn set_description(
        &mut self,
        reference: &str,
        desc: &Rc<RefCell<AvatarDescAsset>>,
        store: &mut AssetStore,
        entity: &mut MeshEntity,
    ) {
        self.appearance_ref = reference.to_string();
        self.pending_transfer = None;
        self.desc = Rc::downgrade(desc);
        self.refresh_dependencies(desc, store, entity);
    }

    /// 套用内置默认外观
    pub fn use_default_appearance(&mut self, store: &mut AssetStore, entity: &mut MeshEntity) {
        let desc = match store.description(DEFAULT_APPEARANCE_REF) {
            Some(desc) => desc,
            None => store.insert_description(DEFAULT_APPEARANCE_REF, default_description()),
        };
        self.set_description(DEFAULT_APPEARANCE_REF, &desc, store, entity);
    }

    /// 主循环驱动：消费传输结果与描述信号，推进装配状态
    pub fn update(&mut self, store: &mut AssetStore, entity: &mut MeshEntity) {
        self.process_transfer(store, entity);

        let Some(desc) = self.desc.upgrade() else {
            // 描述已被缓存逐出（或尚未到达）
            if self.state == AppearanceState::Bound {
                log::debug!("外观描述 {} 已被逐出，实体解除绑定", self.appearance_ref);
                self.state = AppearanceState::Unbound;
            }
            return;
        };

        // 先取出信号再处理，处理过程中可能再次借用描述
        let signals = desc.borrow_mut().take_signals();
        for signal in signals {
            match signal {
                ChangeSignal::Appearance => self.refresh_dependencies(&desc, store, entity),
                ChangeSignal::DynamicAppearance => {
                    if self.state == AppearanceState::Bound {
                        self.setup_dynamic_appearance(&desc.borrow(), entity);
                    }
                }
            }
        }

        if self.state == AppearanceState::PendingDependencies && self.tracker.poll(store) {
            self.state = AppearanceState::Bound;
            self.setup_appearance(&desc.borrow(), store, entity);
        }
    }

    fn process_transfer(&mut self, store: &mut AssetStore, entity: &mut MeshEntity) {
        let Some(handle) = self.pending_transfer else {
            return;
        };
        let Some(result) = store.take_transfer(handle) else {
            return;
        };
        self.pending_transfer = None;

        match result {
            TransferResult::Succeeded(AssetData::AvatarDescription(desc)) => {
                // 陈旧完成：下载期间引用已被更换则丢弃
                if desc.borrow().name != self.appearance_ref {
                    log::debug!(
                        "Discarding stale avatar appearance {}",
                        desc.borrow().name
                    );
                    return;
                }
                self.desc = Rc::downgrade(&desc);
                self.refresh_dependencies(&desc, store, entity);
            }
            TransferResult::Succeeded(_) => {
                log::error!(
                    "Avatar appearance transfer for {} returned wrong asset type",
                    self.appearance_ref
                );
            }
            TransferResult::Failed(reason) => {
                // 实体保持当前状态，不进入残缺的 Bound
                log::error!("Avatar appearance transfer failed, reason: {}", reason);
            }
        }
    }

    /// 重新收集描述的结构性依赖；齐备则立即装配，否则转入等待
    fn refresh_dependencies(
        &mut self,
        desc: &Rc<RefCell<AvatarDescAsset>>,
        store: &mut AssetStore,
        entity: &mut MeshEntity,
    ) {
        let references = collect_references(&desc.borrow());
        if self.tracker.begin(references, store) {
            self.state = AppearanceState::Bound;
            self.setup_appearance(&desc.borrow(), store, entity);
        } else {
            self.state = AppearanceState::PendingDependencies;
        }
    }

    /// 完整装配：网格与材质 → 动态外观 → 附件
    ///
    /// 对单个实体原子执行，中途不可观察到部分装配的状态
    fn setup_appearance(
        &mut self,
        desc: &AvatarDescAsset,
        store: &AssetStore,
        entity: &mut MeshEntity,
    ) {
        // 网格引用为空只可能是描述残废，什么都不做
        if desc.mesh.is_empty() {
            log::error!("Avatar description {} has no mesh, doing nothing", desc.name);
            return;
        }

        self.setup_mesh_and_materials(desc, store, entity);
        self.setup_dynamic_appearance(desc, entity);
        self.setup_attachments(desc, store, entity);
    }

    fn setup_mesh_and_materials(
        &self,
        desc: &AvatarDescAsset,
        store: &AssetStore,
        entity: &mut MeshEntity,
    ) {
        // 附件要求隐藏顶点时必须克隆网格，索引手术不能落在共享资源上
        let mut vertices_to_hide: HashSet<u32> = HashSet::new();
        let mut need_mesh_clone = false;
        for attachment in &desc.attachments {
            if !attachment.vertices_to_hide.is_empty() {
                need_mesh_clone = true;
                vertices_to_hide.extend(attachment.vertices_to_hide.iter().copied());
            }
        }

        let mesh_ref = resolve_asset_ref(&desc.name, &desc.mesh);
        let Some(mesh) = store.mesh(&mesh_ref) else {
            log::error!("Avatar mesh {} not found in asset store", mesh_ref);
            return;
        };

        if !desc.skeleton.is_empty() {
            let skeleton_ref = resolve_asset_ref(&desc.name, &desc.skeleton);
            if let Some(skeleton) = store.skeleton(&skeleton_ref) {
                entity.set_mesh_with_skeleton(mesh, &skeleton, need_mesh_clone);
            } else {
                log::warn!("Avatar skeleton {} not found, binding mesh only", skeleton_ref);
                entity.set_mesh(mesh, need_mesh_clone);
            }
        } else {
            entity.set_mesh(mesh, need_mesh_clone);
        }

        // 合并后的隐藏集合对新克隆执行一次
        if need_mesh_clone {
            if let Some(cloned) = entity.cloned_mesh_mut() {
                hide_vertices(cloned, &vertices_to_hide);
            }
        }

        for (index, material) in desc.materials.iter().enumerate() {
            entity.set_material(index, &resolve_asset_ref(&desc.name, material));
        }

        // 先按包围盒近似值定位，骨骼高度修正可用时会覆盖
        entity.set_adjust_position(Vec3::new(0.0, FIXED_HEIGHT_OFFSET, 0.0));
        entity.set_cast_shadows(true);
    }

    fn setup_attachments(
        &self,
        desc: &AvatarDescAsset,
        store: &AssetStore,
        entity: &mut MeshEntity,
    ) {
        entity.remove_all_attachments();

        for (index, attachment) in desc.attachments.iter().enumerate() {
            let mesh_ref = resolve_asset_ref(&desc.name, &attachment.mesh);
            let Some(mesh) = store.mesh(&mesh_ref) else {
                log::warn!("Attachment mesh {} not found, skipping", mesh_ref);
                continue;
            };
            entity.set_attachment_mesh(index, mesh, &attachment.bone_name, attachment.link_skeleton);
            for (submesh, material) in attachment.materials.iter().enumerate() {
                entity.set_attachment_material(
                    index,
                    submesh,
                    &resolve_asset_ref(&desc.name, material),
                );
            }
            entity.set_attachment_position(index, attachment.transform.position);
            entity.set_attachment_orientation(index, attachment.transform.orientation);
            entity.set_attachment_scale(index, attachment.transform.scale);
        }
    }

    /// 动画改变姿势后单独重算高度修正，不重置骨骼
    pub fn refresh_height_offset(&self, entity: &mut MeshEntity) {
        if let Some(desc) = self.desc.upgrade() {
            self.adjust_height_offset(&desc.borrow(), entity);
        }
    }

    /// 仅值变化的刷新：Morph → 骨骼修饰器 → 高度修正
    fn setup_dynamic_appearance(&self, desc: &AvatarDescAsset, entity: &mut MeshEntity) {
        self.setup_morphs(desc, entity);
        self.setup_bone_modifiers(desc, entity);
        self.adjust_height_offset(desc, entity);
    }

    fn setup_morphs(&self, desc: &AvatarDescAsset, entity: &mut MeshEntity) {
        for morph in &desc.morph_modifiers {
            entity.set_morph_weight(&morph.morph_name, morph.modifier.value);
            // 附件网格有同名 Morph 的话一并驱动
            for index in 0..entity.attachment_count() {
                entity.set_attachment_morph_weight(index, &morph.morph_name, morph.modifier.value);
            }
        }
    }

    fn setup_bone_modifiers(&self, desc: &AvatarDescAsset, entity: &mut MeshEntity) {
        let Some((skeleton, original)) = entity.skeleton_pair_mut() else {
            return;
        };
        reset_bones(skeleton, &original);
        for set in &desc.bone_modifiers {
            for bone_modifier in &set.bones {
                apply_bone_modifier(skeleton, &original, bone_modifier, set.modifier.value);
            }
        }
    }

    /// 计算网格垂直偏移，让化身的脚底在修饰器作用下保持贴地
    fn adjust_height_offset(&self, desc: &AvatarDescAsset, entity: &mut MeshEntity) {
        let mut offset = Vec3::ZERO;
        let mut initial_base_pos = Vec3::ZERO;

        if let Some(value) = desc.property("baseoffset") {
            initial_base_pos = parse_float3(value);
        }

        if let Some(base_bone_name) = desc.property("basebone") {
            if let Some(skeleton) = entity.skeleton() {
                if let Some(base_index) = skeleton.find_bone_by_name(base_bone_name) {
                    initial_base_pos += skeleton.initial_derived_position(base_index);
                    offset = initial_base_pos;

                    // rootbone 存在时按根骨骼的下沉比例衰减修正，坐姿等动画
                    // 把根骨骼压低时高度修正同步减小
                    if let Some(root_bone_name) = desc.property("rootbone") {
                        if let Some(root_index) = skeleton.find_bone_by_name(root_bone_name) {
                            let initial_root = skeleton.initial_derived_position(root_index);
                            let current_root = skeleton.derived_position(root_index);
                            let c = if initial_root.y.abs() < ROOT_HEIGHT_EPSILON {
                                1.0
                            } else {
                                (current_root.y / initial_root.y).abs().min(1.0)
                            };
                            offset = initial_base_pos * c;
                        }
                    }
                }
            }
        }

        entity.set_adjust_position(Vec3::new(0.0, -offset.y + FIXED_HEIGHT_OFFSET, 0.0));
    }
}

impl Default for EcAvatar {
    fn default() -> Self {
        Self::new()
    }
}

/// 收集描述的全部结构性依赖（解析为绝对引用）
fn collect_references(desc: &AvatarDescAsset) -> Vec<(String, AssetType)> {
    let mut references = Vec::new();
    let mut add = |reference: &str, asset_type: AssetType| {
        if !reference.is_empty() {
            references.push((resolve_asset_ref(&desc.name, reference), asset_type));
        }
    };
    add(&desc.mesh, AssetType::Mesh);
    add(&desc.skeleton, AssetType::Skeleton);
    for material in &desc.materials {
        add(material, AssetType::Material);
    }
    for attachment in &desc.attachments {
        add(&attachment.mesh, AssetType::Mesh);
        for material in &attachment.materials {
            add(material, AssetType::Material);
        }
    }
    references
}
