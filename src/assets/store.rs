//! 进程内资源缓存
//!
//! ref → 共享所有权的键值存储。获取/解码由外部资源子系统异步执行，
//! 通过传输句柄与完成/失败事件对接；没有强引用的条目可被逐出

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::description::AvatarDescAsset;
use crate::scene::{MeshResource, Skeleton};

/// 资源类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetType {
    AvatarDescription,
    Mesh,
    Skeleton,
    Material,
}

/// 传输句柄
///
/// 0 表示请求当场失败，调用方必须按失败处理
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransferHandle(pub u64);

impl TransferHandle {
    pub const INVALID: TransferHandle = TransferHandle(0);

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

/// 材质资源（材质脚本引用；纹理解析属于渲染层）
#[derive(Clone, Debug, Default)]
pub struct MaterialAsset {
    pub name: String,
}

/// 外部获取层递交的已解码载荷
///
/// 外观描述以文档原文递交，由缓存负责解析；
/// 网格/骨架/材质的二进制解码在渲染资源层完成
#[derive(Clone, Debug)]
pub enum AssetPayload {
    AvatarDescription(String),
    Mesh(MeshResource),
    Skeleton(Skeleton),
    Material(MaterialAsset),
}

/// 缓存中的已加载资源
#[derive(Clone, Debug)]
pub enum AssetData {
    AvatarDescription(Rc<RefCell<AvatarDescAsset>>),
    Mesh(Rc<MeshResource>),
    Skeleton(Rc<Skeleton>),
    Material(Rc<MaterialAsset>),
}

/// 传输结果
#[derive(Clone, Debug)]
pub enum TransferResult {
    Succeeded(AssetData),
    Failed(String),
}

#[derive(Debug)]
struct Transfer {
    reference: String,
    asset_type: AssetType,
    result: Option<TransferResult>,
}

/// 进程内资源缓存
#[derive(Default)]
pub struct AssetStore {
    assets: HashMap<String, AssetData>,
    transfers: HashMap<TransferHandle, Transfer>,
    next_handle: u64,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn make_handle(&mut self) -> TransferHandle {
        self.next_handle += 1;
        TransferHandle(self.next_handle)
    }

    /// 请求一个资源
    ///
    /// 已缓存的资源立即得到带成功结果的传输；
    /// 其余情况创建待完成的传输，等待外部获取层调用
    /// [`complete_transfer`](Self::complete_transfer) 或
    /// [`fail_transfer`](Self::fail_transfer)。
    /// 空引用当场失败，返回无效句柄
    pub fn request_asset(&mut self, reference: &str, asset_type: AssetType) -> TransferHandle {
        if reference.is_empty() {
            log::error!("Empty asset reference requested");
            return TransferHandle::INVALID;
        }

        let handle = self.make_handle();
        let result = self
            .assets
            .get(reference)
            .map(|data| TransferResult::Succeeded(data.clone()));
        self.transfers.insert(
            handle,
            Transfer {
                reference: reference.to_string(),
                asset_type,
                result,
            },
        );
        handle
    }

    /// 外部获取层递交下载完成的载荷
    pub fn complete_transfer(&mut self, handle: TransferHandle, payload: AssetPayload) {
        let Some(transfer) = self.transfers.get_mut(&handle) else {
            log::warn!("Completion for unknown transfer {:?}", handle);
            return;
        };
        let reference = transfer.reference.clone();

        let data = match payload {
            AssetPayload::AvatarDescription(text) => {
                match AvatarDescAsset::from_xml(&reference, &text) {
                    Ok(desc) => AssetData::AvatarDescription(Rc::new(RefCell::new(desc))),
                    Err(e) => {
                        log::error!("Failed to deserialize avatar description {}: {}", reference, e);
                        transfer.result = Some(TransferResult::Failed(e.to_string()));
                        return;
                    }
                }
            }
            AssetPayload::Mesh(mesh) => AssetData::Mesh(Rc::new(mesh)),
            AssetPayload::Skeleton(skeleton) => AssetData::Skeleton(Rc::new(skeleton)),
            AssetPayload::Material(material) => AssetData::Material(Rc::new(material)),
        };

        self.assets.insert(reference, data.clone());
        if let Some(transfer) = self.transfers.get_mut(&handle) {
            transfer.result = Some(TransferResult::Succeeded(data));
        }
    }

    /// 外部获取层报告下载失败
    pub fn fail_transfer(&mut self, handle: TransferHandle, reason: &str) {
        let Some(transfer) = self.transfers.get_mut(&handle) else {
            log::warn!("Failure for unknown transfer {:?}", handle);
            return;
        };
        log::error!(
            "Asset transfer failed for {}: {}",
            transfer.reference,
            reason
        );
        transfer.result = Some(TransferResult::Failed(reason.to_string()));
    }

    /// 取走已完成的传输结果；未完成时返回 None
    pub fn take_transfer(&mut self, handle: TransferHandle) -> Option<TransferResult> {
        if self.transfers.get(&handle)?.result.is_none() {
            return None;
        }
        self.transfers.remove(&handle).and_then(|t| t.result)
    }

    /// 仍在等待外部获取层的传输
    pub fn pending_transfers(&self) -> Vec<(TransferHandle, String, AssetType)> {
        self.transfers
            .iter()
            .filter(|(_, t)| t.result.is_none())
            .map(|(&handle, t)| (handle, t.reference.clone(), t.asset_type))
            .collect()
    }

    /// 资源是否已加载
    pub fn is_loaded(&self, reference: &str) -> bool {
        self.assets.contains_key(reference)
    }

    pub fn get(&self, reference: &str) -> Option<&AssetData> {
        self.assets.get(reference)
    }

    /// 已加载的外观描述
    pub fn description(&self, reference: &str) -> Option<Rc<RefCell<AvatarDescAsset>>> {
        match self.assets.get(reference) {
            Some(AssetData::AvatarDescription(desc)) => Some(Rc::clone(desc)),
            _ => None,
        }
    }

    /// 已加载的网格资源
    pub fn mesh(&self, reference: &str) -> Option<Rc<MeshResource>> {
        match self.assets.get(reference) {
            Some(AssetData::Mesh(mesh)) => Some(Rc::clone(mesh)),
            _ => None,
        }
    }

    /// 已加载的骨架资源
    pub fn skeleton(&self, reference: &str) -> Option<Rc<Skeleton>> {
        match self.assets.get(reference) {
            Some(AssetData::Skeleton(skeleton)) => Some(Rc::clone(skeleton)),
            _ => None,
        }
    }

    /// 已加载的材质资源
    pub fn material(&self, reference: &str) -> Option<Rc<MaterialAsset>> {
        match self.assets.get(reference) {
            Some(AssetData::Material(material)) => Some(Rc::clone(material)),
            _ => None,
        }
    }

    // 本地资源直接注册，不经过传输
    pub fn insert_description(
        &mut self,
        reference: &str,
        desc: AvatarDescAsset,
    ) -> Rc<RefCell<AvatarDescAsset>> {
        let desc = Rc::new(RefCell::new(desc));
        self.assets.insert(
            reference.to_string(),
            AssetData::AvatarDescription(Rc::clone(&desc)),
        );
        desc
    }

    pub fn insert_mesh(&mut self, reference: &str, mesh: MeshResource) -> Rc<MeshResource> {
        let mesh = Rc::new(mesh);
        self.assets
            .insert(reference.to_string(), AssetData::Mesh(Rc::clone(&mesh)));
        mesh
    }

    pub fn insert_skeleton(&mut self, reference: &str, skeleton: Skeleton) -> Rc<Skeleton> {
        let skeleton = Rc::new(skeleton);
        self.assets.insert(
            reference.to_string(),
            AssetData::Skeleton(Rc::clone(&skeleton)),
        );
        skeleton
    }

    pub fn insert_material(&mut self, reference: &str, material: MaterialAsset) -> Rc<MaterialAsset> {
        let material = Rc::new(material);
        self.assets.insert(
            reference.to_string(),
            AssetData::Material(Rc::clone(&material)),
        );
        material
    }

    /// 逐出所有不再被外部强引用的条目
    pub fn evict_unreferenced(&mut self) {
        self.assets.retain(|_, data| match data {
            AssetData::AvatarDescription(rc) => Rc::strong_count(rc) > 1,
            AssetData::Mesh(rc) => Rc::strong_count(rc) > 1,
            AssetData::Skeleton(rc) => Rc::strong_count(rc) > 1,
            AssetData::Material(rc) => Rc::strong_count(rc) > 1,
        });
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_reference_fails_synchronously() {
        let mut store = AssetStore::new();
        let handle = store.request_asset("", AssetType::Mesh);
        assert!(!handle.is_valid());
    }

    #[test]
    fn test_cached_asset_completes_immediately() {
        let mut store = AssetStore::new();
        store.insert_mesh("avatar.mesh", MeshResource::new("avatar.mesh"));
        let handle = store.request_asset("avatar.mesh", AssetType::Mesh);
        assert!(handle.is_valid());
        assert!(matches!(
            store.take_transfer(handle),
            Some(TransferResult::Succeeded(AssetData::Mesh(_)))
        ));
    }

    #[test]
    fn test_transfer_lifecycle() {
        let mut store = AssetStore::new();
        let handle = store.request_asset("avatar.mesh", AssetType::Mesh);
        assert!(handle.is_valid());
        // 未完成时取不到结果
        assert!(store.take_transfer(handle).is_none());
        assert_eq!(store.pending_transfers().len(), 1);

        store.complete_transfer(handle, AssetPayload::Mesh(MeshResource::new("avatar.mesh")));
        assert!(store.is_loaded("avatar.mesh"));
        assert!(matches!(
            store.take_transfer(handle),
            Some(TransferResult::Succeeded(_))
        ));
        // 结果只能取走一次
        assert!(store.take_transfer(handle).is_none());
    }

    #[test]
    fn test_failed_transfer_reports_reason() {
        let mut store = AssetStore::new();
        let handle = store.request_asset("missing.mesh", AssetType::Mesh);
        store.fail_transfer(handle, "404 not found");
        match store.take_transfer(handle) {
            Some(TransferResult::Failed(reason)) => assert!(reason.contains("404")),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!store.is_loaded("missing.mesh"));
    }

    #[test]
    fn test_malformed_description_fails_transfer() {
        let mut store = AssetStore::new();
        let handle = store.request_asset("broken.xml", AssetType::AvatarDescription);
        store.complete_transfer(handle, AssetPayload::AvatarDescription("<junk/>".to_string()));
        assert!(matches!(
            store.take_transfer(handle),
            Some(TransferResult::Failed(_))
        ));
        assert!(!store.is_loaded("broken.xml"));
    }

    #[test]
    fn test_evict_unreferenced() {
        let mut store = AssetStore::new();
        let held = store.insert_mesh("held.mesh", MeshResource::new("held.mesh"));
        store.insert_mesh("loose.mesh", MeshResource::new("loose.mesh"));
        store.evict_unreferenced();
        assert!(store.is_loaded("held.mesh"));
        assert!(!store.is_loaded("loose.mesh"));
        drop(held);
        store.evict_unreferenced();
        assert!(!store.is_loaded("held.mesh"));
    }
}
