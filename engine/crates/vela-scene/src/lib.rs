//! 渲染器在场景一侧的协作者
//!
//! 这里不包含场景图，只提供每帧提交给渲染器的数据：相机、光源、网格与材质。

pub mod asset_registry;
pub mod camera;
pub mod lights;
pub mod material;
pub mod mesh;
pub mod shapes;

/// 提交绘制请求的实体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);
