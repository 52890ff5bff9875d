//! The symbol registry: default domains for implicit variables.
//!
//! Instances opt in at construction by registering themselves; the
//! engine only ever reads. The registry holds weak references so that
//! registration does not extend object lifetimes; dead entries are
//! skipped on read and can be pruned explicitly.

use std::sync::{Arc, RwLock, Weak};

use tracing::debug;

use crate::symbol::{Symbol, TypeInfo};
use crate::value::Value;

/// A cloneable handle to a shared instance index keyed by type.
///
/// Unlike a process-global graph, a registry is an explicit
/// collaborator: it is passed to variable constructors and captured by
/// the query, so two independent registries never observe each other's
/// instances. Callers must serialise mutation against evaluation.
#[derive(Clone, Default)]
pub struct SymbolRegistry {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    /// Registration order is preserved; per-type slices inherit it.
    instances: Vec<(&'static TypeInfo, Weak<dyn Symbol>)>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live instance. Typically called from a domain type's
    /// constructor.
    pub fn register<S: Symbol + 'static>(&self, instance: &Arc<S>) {
        let handle: Arc<dyn Symbol> = instance.clone();
        let mut inner = self.inner.write().expect("symbol registry poisoned");
        inner
            .instances
            .push((instance.type_info(), Arc::downgrade(&handle)));
    }

    /// Snapshot of all live instances whose type derives from `ty`, in
    /// registration order.
    pub fn instances_of(&self, ty: &TypeInfo) -> Vec<Value> {
        let inner = self.inner.read().expect("symbol registry poisoned");
        let slice: Vec<Value> = inner
            .instances
            .iter()
            .filter(|(info, _)| info.is(ty))
            .filter_map(|(_, weak)| weak.upgrade())
            .map(Value::Object)
            .collect();
        debug!(type_name = ty.name, count = slice.len(), "registry snapshot");
        slice
    }

    /// Drop entries whose instance has been deallocated.
    pub fn prune(&self) {
        let mut inner = self.inner.write().expect("symbol registry poisoned");
        inner.instances.retain(|(_, weak)| weak.strong_count() > 0);
    }

    /// Number of live registered instances.
    pub fn len(&self) -> usize {
        let inner = self.inner.read().expect("symbol registry poisoned");
        inner
            .instances
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::AccessError;

    static WIDGET: TypeInfo = TypeInfo::new("widget", None);
    static GADGET: TypeInfo = TypeInfo::new("gadget", Some(&WIDGET));

    #[derive(Debug)]
    struct Widget {
        label: &'static str,
        info: &'static TypeInfo,
    }

    impl Symbol for Widget {
        fn type_info(&self) -> &'static TypeInfo {
            self.info
        }

        fn attr(&self, name: &str) -> Result<Value, AccessError> {
            match name {
                "label" => Ok(Value::Text(self.label.to_string())),
                _ => Err(AccessError::MissingAttribute {
                    type_name: self.info.name,
                    attribute: name.to_string(),
                }),
            }
        }
    }

    fn widget(label: &'static str, info: &'static TypeInfo) -> Arc<Widget> {
        Arc::new(Widget { label, info })
    }

    #[test]
    fn slices_are_subtype_aware_and_ordered() {
        let registry = SymbolRegistry::new();
        let a = widget("a", &WIDGET);
        let b = widget("b", &GADGET);
        let c = widget("c", &WIDGET);
        registry.register(&a);
        registry.register(&b);
        registry.register(&c);

        let widgets = registry.instances_of(&WIDGET);
        let labels: Vec<_> = widgets
            .iter()
            .map(|v| v.attr("label").unwrap())
            .collect();
        assert_eq!(
            labels,
            vec![
                Value::Text("a".into()),
                Value::Text("b".into()),
                Value::Text("c".into())
            ]
        );

        assert_eq!(registry.instances_of(&GADGET).len(), 1);
    }

    #[test]
    fn dead_instances_are_skipped() {
        let registry = SymbolRegistry::new();
        let a = widget("a", &WIDGET);
        registry.register(&a);
        {
            let b = widget("b", &WIDGET);
            registry.register(&b);
            assert_eq!(registry.len(), 2);
        }
        assert_eq!(registry.instances_of(&WIDGET).len(), 1);
        registry.prune();
        assert_eq!(registry.len(), 1);
    }
}
