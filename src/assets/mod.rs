//! 资源缓存与依赖解析

mod resolver;
mod store;

pub use resolver::DependencyTracker;
pub use store::{
    AssetData, AssetPayload, AssetStore, AssetType, MaterialAsset, TransferHandle, TransferResult,
};

/// 把相对引用解析为绝对引用
///
/// 幂等且无副作用：带协议前缀或以 / 开头的引用原样返回，
/// 其余引用拼接到所属描述资源的目录下
pub fn resolve_asset_ref(owner: &str, reference: &str) -> String {
    if reference.is_empty() {
        return String::new();
    }
    if reference.contains("://") || reference.starts_with('/') {
        return reference.to_string();
    }
    match owner.rfind('/') {
        Some(position) => format!("{}{}", &owner[..=position], reference),
        None => reference.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_asset_ref() {
        assert_eq!(
            resolve_asset_ref("http://assets/avatars/me.xml", "body.mesh"),
            "http://assets/avatars/body.mesh"
        );
        assert_eq!(
            resolve_asset_ref("me.xml", "body.mesh"),
            "body.mesh"
        );
        assert_eq!(
            resolve_asset_ref("http://assets/me.xml", "local:///body.mesh"),
            "local:///body.mesh"
        );
        assert_eq!(resolve_asset_ref("me.xml", ""), "");
    }

    #[test]
    fn test_resolve_asset_ref_idempotent() {
        let owner = "http://assets/avatars/me.xml";
        let once = resolve_asset_ref(owner, "body.mesh");
        assert_eq!(resolve_asset_ref(owner, &once), once);
    }
}
