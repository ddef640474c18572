pub mod command;

pub mod errors {
    use thiserror::Error;
    use zlayer_core::document::DocumentError;
    use zlayer_core::handle::Handle;
    use zlayer_core::overrides::OverrideError;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error("layer {0} not found")]
        LayerNotFound(String),
        #[error("viewport {0} not found")]
        ViewportNotFound(Handle),
        #[error("no active viewport")]
        NoActiveViewport,
        #[error(transparent)]
        Override(#[from] OverrideError),
        #[error(transparent)]
        Document(#[from] DocumentError),
    }
}

pub mod session {
    use std::collections::BTreeMap;

    use tracing::{debug, warn};
    use zlayer_core::document::Document;
    use zlayer_core::handle::Handle;
    use zlayer_core::layer::{Layer, LayerAttributes};
    use zlayer_core::overrides::LayerOverrides;

    use crate::errors::EngineError;

    /// (图层句柄, 视口句柄)
    pub type OverrideKey = (Handle, Handle);

    /// 引擎层负责维护 `Document` 以及打开中的视口覆盖暂存区。
    ///
    /// 每个 (图层, 视口) 至多对应一个暂存区，重复获取返回同一实例。
    #[derive(Debug)]
    pub struct Session {
        document: Document,
        stores: BTreeMap<OverrideKey, LayerOverrides>,
        active_viewport: Option<Handle>,
    }

    impl Session {
        pub fn new() -> Self {
            Self::with_document(Document::default())
        }

        pub fn with_document(document: Document) -> Self {
            let active_viewport = first_viewport(&document);
            Self {
                document,
                stores: BTreeMap::new(),
                active_viewport,
            }
        }

        /// 替换当前文档。未提交的覆盖随旧文档一起丢弃。
        pub fn load_document(&mut self, document: Document) {
            let pending = self.dirty_overrides().len();
            if pending > 0 {
                warn!(pending, "替换文档时丢弃了未提交的视口覆盖");
            }
            self.stores.clear();
            self.active_viewport = first_viewport(&document);
            self.document = document;
        }

        #[inline]
        pub fn document(&self) -> &Document {
            &self.document
        }

        #[inline]
        pub fn document_mut(&mut self) -> &mut Document {
            &mut self.document
        }

        pub fn into_document(self) -> Document {
            self.document
        }

        #[inline]
        pub fn active_viewport(&self) -> Option<Handle> {
            self.active_viewport
        }

        pub fn set_active_viewport(&mut self, viewport: Handle) -> Result<(), EngineError> {
            if self.document.viewport(viewport).is_none() {
                return Err(EngineError::ViewportNotFound(viewport));
            }
            self.active_viewport = Some(viewport);
            Ok(())
        }

        /// 传入的视口为空时取当前活动视口。
        pub fn resolve_viewport(&self, viewport: Option<Handle>) -> Result<Handle, EngineError> {
            let viewport = viewport
                .or(self.active_viewport)
                .ok_or(EngineError::NoActiveViewport)?;
            if self.document.viewport(viewport).is_none() {
                return Err(EngineError::ViewportNotFound(viewport));
            }
            Ok(viewport)
        }

        fn layer_handle(&self, layer: &str) -> Result<Handle, EngineError> {
            self.document
                .layer(layer)
                .map(Layer::handle)
                .ok_or_else(|| EngineError::LayerNotFound(layer.to_string()))
        }

        /// 获取 (图层, 视口) 的暂存区；已打开时刷新图层基础值后返回同一实例。
        pub fn overrides(
            &mut self,
            layer: &str,
            viewport: Handle,
        ) -> Result<&mut LayerOverrides, EngineError> {
            let layer_handle = self.layer_handle(layer)?;
            if self.document.viewport(viewport).is_none() {
                return Err(EngineError::ViewportNotFound(viewport));
            }
            let key = (layer_handle, viewport);
            if !self.stores.contains_key(&key) {
                let store = self.document.vp_overrides(layer, viewport)?;
                debug!(layer, viewport = %viewport, "打开视口覆盖");
                self.stores.insert(key, store);
            }
            let store = self
                .stores
                .get_mut(&key)
                .ok_or_else(|| EngineError::LayerNotFound(layer.to_string()))?;
            store.refresh_base(&self.document)?;
            Ok(store)
        }

        pub fn is_open(&self, layer: &str, viewport: Handle) -> bool {
            self.layer_handle(layer)
                .is_ok_and(|handle| self.stores.contains_key(&(handle, viewport)))
        }

        /// 提交单个暂存区，返回是否存在打开的暂存区。
        pub fn commit(&mut self, layer: &str, viewport: Handle) -> Result<bool, EngineError> {
            let key = (self.layer_handle(layer)?, viewport);
            match self.stores.get_mut(&key) {
                Some(store) => {
                    store.commit(&mut self.document)?;
                    debug!(layer, viewport = %viewport, "已提交视口覆盖");
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        /// 提交全部有改动的暂存区，返回提交数量。
        pub fn commit_all(&mut self) -> Result<usize, EngineError> {
            let mut committed = 0;
            for store in self.stores.values_mut() {
                if store.is_dirty() {
                    store.commit(&mut self.document)?;
                    committed += 1;
                }
            }
            if committed > 0 {
                debug!(committed, "已提交全部视口覆盖");
            }
            Ok(committed)
        }

        pub fn dirty_overrides(&self) -> Vec<OverrideKey> {
            self.stores
                .iter()
                .filter(|(_, store)| store.is_dirty())
                .map(|(key, _)| *key)
                .collect()
        }

        pub fn open_overrides(&self) -> impl Iterator<Item = &LayerOverrides> {
            self.stores.values()
        }

        /// 关闭暂存区，未提交的修改被丢弃。返回之前是否处于打开状态。
        pub fn close_overrides(&mut self, layer: &str, viewport: Handle) -> bool {
            let Ok(handle) = self.layer_handle(layer) else {
                return false;
            };
            match self.stores.remove(&(handle, viewport)) {
                Some(store) => {
                    if store.is_dirty() {
                        warn!(layer, viewport = %viewport, "关闭时丢弃了未提交的视口覆盖");
                    }
                    true
                }
                None => false,
            }
        }

        /// 按已持久化的覆盖解析图层在视口中的最终属性，不受暂存区影响。
        pub fn effective_attributes(
            &self,
            layer: &str,
            viewport: Handle,
        ) -> Result<LayerAttributes, EngineError> {
            self.layer_handle(layer)?;
            if self.document.viewport(viewport).is_none() {
                return Err(EngineError::ViewportNotFound(viewport));
            }
            Ok(self.document.vp_overrides(layer, viewport)?.resolved())
        }

        /// 删除图层，同时关闭该图层上的暂存区。
        pub fn remove_layer(&mut self, layer: &str) -> Result<(), EngineError> {
            let handle = self.layer_handle(layer)?;
            self.document.remove_layer(layer)?;
            self.stores.retain(|(layer_handle, _), _| *layer_handle != handle);
            Ok(())
        }
    }

    impl Default for Session {
        fn default() -> Self {
            Self::new()
        }
    }

    fn first_viewport(document: &Document) -> Option<Handle> {
        document
            .viewports()
            .min_by_key(|vp| vp.status)
            .map(|vp| vp.handle)
    }

    #[cfg(test)]
    mod tests {
        use zlayer_core::document::DxfVersion;
        use zlayer_core::geometry::Point2;
        use zlayer_core::overrides::OverrideAttribute;

        use super::*;

        fn session() -> (Session, Handle, Handle) {
            let mut document = Document::new(DxfVersion::R2018);
            document.add_layer("WALLS").unwrap();
            let first = document.add_viewport(Point2::new(0.0, 0.0), 100.0, 100.0).unwrap();
            let second = document.add_viewport(Point2::new(200.0, 0.0), 100.0, 100.0).unwrap();
            (Session::with_document(document), first, second)
        }

        #[test]
        fn first_viewport_becomes_active() {
            let (mut session, first, second) = session();
            assert_eq!(session.active_viewport(), Some(first));
            session.set_active_viewport(second).unwrap();
            assert_eq!(session.resolve_viewport(None).unwrap(), second);
            assert!(matches!(
                session.set_active_viewport(Handle::new(0xFFFF)),
                Err(EngineError::ViewportNotFound(_))
            ));
        }

        #[test]
        fn same_pair_returns_same_store() {
            let (mut session, first, _) = session();
            session.overrides("WALLS", first).unwrap().set_color(4).unwrap();
            let again = session.overrides("walls", first).unwrap();
            assert_eq!(again.get_color(), 4);
            assert!(again.is_dirty());
            assert_eq!(session.dirty_overrides().len(), 1);
        }

        #[test]
        fn reopened_store_sees_new_base_values() {
            let (mut session, first, _) = session();
            session.overrides("WALLS", first).unwrap().set_lineweight(35).unwrap();
            session
                .document_mut()
                .layer_mut("WALLS")
                .unwrap()
                .set_color(2)
                .unwrap();

            let store = session.overrides("WALLS", first).unwrap();
            assert_eq!(store.get_color(), 2);
            assert_eq!(store.get_lineweight(), 35);
        }

        #[test]
        fn effective_attributes_ignore_staged_changes() {
            let (mut session, first, _) = session();
            session.overrides("WALLS", first).unwrap().set_color(1).unwrap();
            assert_eq!(session.effective_attributes("WALLS", first).unwrap().color, 7);

            assert!(session.commit("WALLS", first).unwrap());
            assert_eq!(session.effective_attributes("WALLS", first).unwrap().color, 1);
            assert!(session.dirty_overrides().is_empty());
        }

        #[test]
        fn closing_drops_uncommitted_changes() {
            let (mut session, first, _) = session();
            session.overrides("WALLS", first).unwrap().set_transparency(0.4).unwrap();
            assert!(session.close_overrides("WALLS", first));
            assert!(!session.close_overrides("WALLS", first));

            let store = session.overrides("WALLS", first).unwrap();
            assert!(!store.is_overridden(OverrideAttribute::Transparency));
        }

        #[test]
        fn commit_all_only_touches_dirty_stores() {
            let (mut session, first, second) = session();
            session.overrides("WALLS", first).unwrap().set_color(3).unwrap();
            session.overrides("WALLS", second).unwrap();
            assert_eq!(session.commit_all().unwrap(), 1);
            assert_eq!(session.commit_all().unwrap(), 0);
            assert_eq!(
                session.document().overridden_viewports("WALLS").unwrap(),
                vec![first]
            );
        }

        #[test]
        fn commit_without_open_store_is_noop() {
            let (mut session, first, _) = session();
            assert!(!session.commit("WALLS", first).unwrap());
            assert!(matches!(
                session.commit("MISSING", first),
                Err(EngineError::LayerNotFound(_))
            ));
        }

        #[test]
        fn removing_layer_closes_its_stores() {
            let (mut session, first, _) = session();
            session.overrides("WALLS", first).unwrap().set_color(3).unwrap();
            session.commit("WALLS", first).unwrap();
            session.remove_layer("WALLS").unwrap();
            assert_eq!(session.open_overrides().count(), 0);
            assert!(session.document().layer("WALLS").is_none());
        }

        #[test]
        fn load_document_resets_state() {
            let (mut session, first, _) = session();
            session.overrides("WALLS", first).unwrap().set_color(3).unwrap();
            session.load_document(Document::new(DxfVersion::R2018));
            assert_eq!(session.open_overrides().count(), 0);
            assert_eq!(session.active_viewport(), None);
            assert!(matches!(
                session.resolve_viewport(None),
                Err(EngineError::NoActiveViewport)
            ));
        }
    }
}
