//! 顶点可见性过滤
//!
//! 附件遮挡的身体部位通过删除引用被隐藏顶点的三角形实现

use std::collections::HashSet;

use crate::scene::{IndexBuffer, MeshResource};

/// 从网格第一个子网格中移除引用了被隐藏顶点的三角形
///
/// 稳定的就地压缩：保留的三角形保持原有顺序。
/// 只能对克隆出来的私有网格执行，且每个克隆只执行一次，
/// 压缩过的索引再次处理会被错误解释。
/// 当前资产只会把可隐藏的几何体放在第一个子网格
pub fn hide_vertices(mesh: &mut MeshResource, vertices_to_hide: &HashSet<u32>) {
    if vertices_to_hide.is_empty() {
        return;
    }
    let Some(submesh) = mesh.submeshes.first_mut() else {
        return;
    };
    match &mut submesh.indices {
        IndexBuffer::U16(indices) => {
            compact_triangles(indices, |&index| vertices_to_hide.contains(&(index as u32)))
        }
        IndexBuffer::U32(indices) => {
            compact_triangles(indices, |&index| vertices_to_hide.contains(&index))
        }
    }
}

fn compact_triangles<T: Copy>(indices: &mut Vec<T>, hidden: impl Fn(&T) -> bool) {
    let mut write = 0;
    let mut read = 0;
    while read + 3 <= indices.len() {
        let keep = !(hidden(&indices[read])
            || hidden(&indices[read + 1])
            || hidden(&indices[read + 2]));
        if keep {
            if write != read {
                indices[write] = indices[read];
                indices[write + 1] = indices[read + 1];
                indices[write + 2] = indices[read + 2];
            }
            write += 3;
        }
        read += 3;
    }
    indices.truncate(write);
}
