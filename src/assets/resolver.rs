//! 每实体的结构性依赖追踪
//!
//! 外观描述引用的网格/骨架/材质/附件资源全部就绪后，
//! 实体才能从 PendingDependencies 进入 Bound

use super::{AssetStore, AssetType};

/// 结构性依赖追踪器
#[derive(Debug, Default)]
pub struct DependencyTracker {
    /// 尚未就绪的资源引用
    pending: Vec<String>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一批引用并请求其中未加载的资源；返回是否已全部就绪
    ///
    /// 同步失败的请求保持未满足状态，等待上层重试或换引用
    pub fn begin(
        &mut self,
        references: Vec<(String, AssetType)>,
        store: &mut AssetStore,
    ) -> bool {
        self.pending.clear();
        for (reference, asset_type) in references {
            if store.is_loaded(&reference) {
                continue;
            }
            let handle = store.request_asset(&reference, asset_type);
            if !handle.is_valid() {
                log::error!("Failed to request avatar dependency {}", reference);
            }
            self.pending.push(reference);
        }
        self.pending.is_empty()
    }

    /// 轮询缓存，返回是否全部就绪
    pub fn poll(&mut self, store: &AssetStore) -> bool {
        self.pending.retain(|reference| !store.is_loaded(reference));
        self.pending.is_empty()
    }

    /// 尚未就绪的引用数量
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetPayload;
    use crate::scene::MeshResource;

    #[test]
    fn test_tracker_waits_for_all_dependencies() {
        let mut store = AssetStore::new();
        store.insert_mesh("ready.mesh", MeshResource::new("ready.mesh"));

        let mut tracker = DependencyTracker::new();
        let ready = tracker.begin(
            vec![
                ("ready.mesh".to_string(), AssetType::Mesh),
                ("loading.mesh".to_string(), AssetType::Mesh),
            ],
            &mut store,
        );
        assert!(!ready);
        assert_eq!(tracker.pending_count(), 1);
        assert!(!tracker.poll(&store));

        // 外部获取层完成下载后依赖满足
        let pending = store.pending_transfers();
        assert_eq!(pending.len(), 1);
        store.complete_transfer(
            pending[0].0,
            AssetPayload::Mesh(MeshResource::new("loading.mesh")),
        );
        assert!(tracker.poll(&store));
    }

    #[test]
    fn test_tracker_ready_when_everything_cached() {
        let mut store = AssetStore::new();
        store.insert_mesh("ready.mesh", MeshResource::new("ready.mesh"));
        let mut tracker = DependencyTracker::new();
        assert!(tracker.begin(
            vec![("ready.mesh".to_string(), AssetType::Mesh)],
            &mut store
        ));
    }
}
