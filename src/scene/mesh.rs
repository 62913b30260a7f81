//! 网格资源与子网格索引缓冲

use std::rc::Rc;

use super::Skeleton;

/// 子网格三角形索引缓冲（16/32 位）
#[derive(Clone, Debug)]
pub enum IndexBuffer {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexBuffer {
    /// 索引数量
    pub fn index_count(&self) -> usize {
        match self {
            IndexBuffer::U16(indices) => indices.len(),
            IndexBuffer::U32(indices) => indices.len(),
        }
    }

    /// 三角形数量
    pub fn triangle_count(&self) -> usize {
        self.index_count() / 3
    }

    /// 读取索引
    pub fn index_at(&self, position: usize) -> Option<u32> {
        match self {
            IndexBuffer::U16(indices) => indices.get(position).map(|&i| i as u32),
            IndexBuffer::U32(indices) => indices.get(position).copied(),
        }
    }
}

/// 子网格
#[derive(Clone, Debug)]
pub struct SubMesh {
    pub indices: IndexBuffer,
}

impl SubMesh {
    pub fn new(indices: IndexBuffer) -> Self {
        Self { indices }
    }
}

impl Default for SubMesh {
    fn default() -> Self {
        Self {
            indices: IndexBuffer::U16(Vec::new()),
        }
    }
}

/// 网格资源
///
/// 常规情况下被多个化身只读共享；附件需要隐藏顶点时
/// 由实体克隆出私有副本再做索引手术
#[derive(Clone, Debug, Default)]
pub struct MeshResource {
    pub name: String,
    pub vertex_count: u32,
    pub submeshes: Vec<SubMesh>,
    /// 网格声明的 Morph 目标名称
    pub morph_names: Vec<String>,
    /// 网格自带的骨架（绑定姿势）
    pub skeleton: Option<Rc<Skeleton>>,
}

impl MeshResource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 子网格数量
    pub fn submesh_count(&self) -> usize {
        self.submeshes.len()
    }

    /// 是否声明了指定 Morph 目标
    pub fn has_morph(&self, name: &str) -> bool {
        self.morph_names.iter().any(|m| m == name)
    }
}
