use std::{any::Any, fmt::Debug, hash::Hash, marker::PhantomData};

use slotmap::{Key, SlotMap, new_key_type};

new_key_type! { pub struct AssetKey; }

/// 带类型的资产句柄，底层是 slotmap 的代际 key
pub struct AssetHandle<T> {
    key: AssetKey,
    _marker: PhantomData<fn() -> T>,
}
impl<T> AssetHandle<T> {
    #[inline]
    pub fn key(&self) -> AssetKey {
        self.key
    }

    /// 稳定的数值 identity，可用作缓存的 key
    #[inline]
    pub fn id(&self) -> u64 {
        self.key.data().as_ffi()
    }
}
impl<T> Clone for AssetHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for AssetHandle<T> {}
impl<T> PartialEq for AssetHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl<T> Eq for AssetHandle<T> {}
impl<T> Hash for AssetHandle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}
impl<T> Debug for AssetHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AssetHandle<{}>({:?})", std::any::type_name::<T>(), self.key)
    }
}

/// 类型擦除的资产注册表
///
/// 渲染器只通过句柄取资产，取出时做一次 downcast
#[derive(Default)]
pub struct AssetRegistry {
    assets: SlotMap<AssetKey, Box<dyn Any>>,
}
impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any>(&mut self, asset: T) -> AssetHandle<T> {
        AssetHandle {
            key: self.assets.insert(Box::new(asset)),
            _marker: PhantomData,
        }
    }

    pub fn get<T: Any>(&self, handle: AssetHandle<T>) -> Option<&T> {
        self.assets.get(handle.key)?.downcast_ref::<T>()
    }

    pub fn get_mut<T: Any>(&mut self, handle: AssetHandle<T>) -> Option<&mut T> {
        self.assets.get_mut(handle.key)?.downcast_mut::<T>()
    }

    /// 按 key 取资产，类型不匹配时返回 None
    pub fn get_erased<T: Any>(&self, key: AssetKey) -> Option<&T> {
        self.assets.get(key)?.downcast_ref::<T>()
    }

    pub fn remove<T: Any>(&mut self, handle: AssetHandle<T>) -> Option<T> {
        if !self.assets.get(handle.key)?.is::<T>() {
            return None;
        }
        let asset = self.assets.remove(handle.key)?;
        asset.downcast::<T>().ok().map(|asset| *asset)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn clear(&mut self) {
        self.assets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast() {
        let mut registry = AssetRegistry::new();
        let number = registry.insert(42_u32);
        let text = registry.insert(String::from("grid"));

        assert_eq!(registry.get(number), Some(&42));
        assert_eq!(registry.get(text).map(String::as_str), Some("grid"));
        assert_eq!(registry.get_erased::<String>(number.key()), None);

        assert_eq!(registry.remove(number), Some(42));
        assert_eq!(registry.get(number), None);
        assert_eq!(registry.len(), 1);
    }
}
